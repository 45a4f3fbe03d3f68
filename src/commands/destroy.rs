use crate::commands::utils::{confirm, Cloud, Context};
use crate::engine::{Engine, Plan};
use anyhow::Result;

/// Delete every resource recorded for the stack
pub fn handle_destroy(ctx: &Context, yes: bool) -> Result<()> {
    let store = ctx.store();
    let state = store.load(&ctx.stack)?;
    if state.is_empty() {
        println!("Stack '{}' has no resources. Nothing to destroy.", ctx.stack);
        return Ok(());
    }

    let plan = Plan::destroy(&state);
    println!("Stack '{}':", ctx.stack);
    for step in plan.steps() {
        println!("  {}", step);
    }
    println!();
    println!("Plan: {}", plan.summary());
    println!();

    if !yes && !confirm(&format!("Destroy every resource in stack '{}'?", ctx.stack))? {
        println!("Cancelled.");
        return Ok(());
    }

    let region = ctx.region()?;
    let mut cloud = Cloud::open(ctx, &region)?;
    let mut engine = Engine::new(cloud.provider(), store);
    let result = engine.destroy(&ctx.stack);
    drop(engine);
    cloud.finish()?;
    let report = result?;

    println!();
    println!("✓ Stack '{}' destroyed ({} deleted)", ctx.stack, report.deleted);
    Ok(())
}
