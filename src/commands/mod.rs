// Command module routing
//
// To add a new command:
// 1. Create a new file in this directory (e.g., `mycommand.rs`)
// 2. Add `pub mod mycommand;` below
// 3. Add the match arm in `handle_command` function

pub mod config;
pub mod destroy;
pub mod outputs;
pub mod preview;
pub mod script;
pub mod up;
pub mod utils;

pub use utils::Context;

use crate::Commands;
use crate::Commands::*;
use anyhow::Result;

/// Dispatch command to appropriate handler
pub fn handle_command(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Preview => {
            preview::handle_preview(ctx)?;
        }
        Up { yes } => {
            up::handle_up(ctx, yes)?;
        }
        Destroy { yes } => {
            destroy::handle_destroy(ctx, yes)?;
        }
        Outputs => {
            outputs::handle_outputs(ctx)?;
        }
        Script => {
            script::handle_script(ctx)?;
        }
        Config { command } => {
            config::handle_config(ctx, command.as_ref())?;
        }
    }
    Ok(())
}
