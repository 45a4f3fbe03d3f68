use crate::commands::utils::{print_outputs, Context};
use anyhow::Result;

pub fn handle_outputs(ctx: &Context) -> Result<()> {
    let state = ctx.store().load(&ctx.stack)?;
    if state.exports.is_empty() {
        println!(
            "No outputs recorded for stack '{}'. Run 'gateway up' first.",
            ctx.stack
        );
        return Ok(());
    }

    println!("Outputs for stack '{}':", ctx.stack);
    print_outputs(&state.exports);
    if let Some(updated) = state.updated_at {
        println!();
        println!("Last updated {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}
