use anyhow::Result;
use clap::Parser;
use gateway::commands::{self, Context};
use gateway::provider::ProviderKind;
use gateway::utils::logging;
use gateway::Commands;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Provision a single-node OpenVPN gateway on AWS", long_about = None)]
#[command(version)]
struct Cli {
    /// Stack (named deployment) to operate on
    #[arg(long, short = 's', global = true, default_value = "dev")]
    stack: String,

    /// Project directory holding gateway.toml and .gateway/ state
    #[arg(long, global = true, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Cloud to provision against
    #[arg(long, global = true, value_enum, default_value = "aws")]
    provider: ProviderKind,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let ctx = Context::resolve(cli.dir, cli.stack, cli.provider)?;
    commands::handle_command(&ctx, cli.command)?;

    Ok(())
}
