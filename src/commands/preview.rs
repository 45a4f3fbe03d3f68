use crate::commands::utils::{build_stack, print_plan, Cloud, Context};
use crate::engine::Engine;
use anyhow::Result;

/// Print what `up` would do, without touching the cloud
pub fn handle_preview(ctx: &Context) -> Result<()> {
    let settings = ctx.settings()?;
    let mut cloud = Cloud::open(ctx, &settings.region)?;
    let stack = build_stack(ctx, &mut cloud, &settings)?;

    let engine = Engine::new(cloud.provider(), ctx.store());
    let plan = engine.preview(&stack)?;
    print_plan(&ctx.stack, &plan);
    Ok(())
}
