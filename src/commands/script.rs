use crate::commands::utils::Context;
use crate::gateway;
use anyhow::{Context as _, Result};

/// Print the instance boot script, filled in from recorded state where possible
pub fn handle_script(ctx: &Context) -> Result<()> {
    let settings = ctx.settings()?;
    let state = ctx.store().load(&ctx.stack)?;

    // the script does not depend on the machine image
    let image = state
        .get("vpn-server")
        .and_then(|server| server.inputs.get("ami"))
        .and_then(|ami| ami.as_str())
        .unwrap_or_default()
        .to_string();
    let stack = gateway::build_stack(&ctx.stack, &settings, &image)?;
    let script = gateway::boot_script(&stack).context("Stack declares no VPN server")?;

    let lookup = |name: &str, attribute: &str| state.attribute(name, attribute);
    print!("{}", script.render_with_placeholders(&lookup));
    Ok(())
}
