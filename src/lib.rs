// Library crate for gateway - exposes modules for use by the binary and tests
pub mod commands;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod graph;
pub mod provider;
pub mod utils;

// CLI-specific types (used by both library and binary)
use clap::Subcommand;
use config::SettingKey;

#[derive(Subcommand)]
pub enum Commands {
    /// Show what `up` would create, change, or delete
    Preview,
    /// Create or update the VPN gateway
    Up {
        /// Apply without asking for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Delete every resource of the stack
    Destroy {
        /// Destroy without asking for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Print the recorded stack outputs (public IP, bucket, instance, client config)
    Outputs,
    /// Print the instance boot script
    Script,
    /// Manage stack settings in gateway.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigCommands {
    /// Show every setting of the stack
    Show,
    /// Print one setting (its default when unset)
    Get { key: SettingKey },
    /// Set a setting
    Set { key: SettingKey, value: String },
    /// Remove a setting so its default applies
    Unset { key: SettingKey },
}
