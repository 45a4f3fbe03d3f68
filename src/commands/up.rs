use crate::commands::utils::{build_stack, confirm, print_outputs, print_plan, Cloud, Context};
use crate::engine::Engine;
use anyhow::Result;

/// Show the plan, confirm, and apply it
pub fn handle_up(ctx: &Context, yes: bool) -> Result<()> {
    let settings = ctx.settings()?;
    println!(
        "Deploying VPN gateway stack '{}' to {} (VPN port open to {})",
        ctx.stack, settings.region, settings.source_cidr
    );
    println!();

    let mut cloud = Cloud::open(ctx, &settings.region)?;
    let stack = build_stack(ctx, &mut cloud, &settings)?;

    let mut engine = Engine::new(cloud.provider(), ctx.store());
    let plan = engine.preview(&stack)?;
    print_plan(&ctx.stack, &plan);
    println!();

    if !plan.is_noop() && !yes && !confirm("Apply these changes?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let result = engine.apply(&stack, &plan);
    drop(engine);
    // keep the simulated cloud in step with partially saved state
    cloud.finish()?;
    let report = result?;

    println!();
    println!("✓ Stack '{}' is up to date ({})", ctx.stack, report.summary());
    if !report.exports.is_empty() {
        println!();
        println!("Outputs:");
        print_outputs(&report.exports);
    }
    Ok(())
}
