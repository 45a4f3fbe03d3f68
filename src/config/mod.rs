use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

pub mod config_manager;

pub use config_manager::{ProjectConfig, SettingKey, StackConfig, CONFIG_FILE_NAME};

use crate::gateway::{security, GatewaySettings};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Project directory: `GATEWAY_DIR`, else the nearest ancestor holding
/// `gateway.toml`, else the current directory.
pub fn find_project_dir() -> Result<PathBuf> {
    let cwd = env::current_dir().context("Could not determine current directory")?;
    discover_project_dir(&cwd)
}

/// Same as [`find_project_dir`], starting from `cwd`.
///
/// A `.env` in `cwd` is loaded first so it can set `GATEWAY_DIR`.
pub fn discover_project_dir(cwd: &Path) -> Result<PathBuf> {
    load_env_file(cwd)?;

    if let Ok(dir) = env::var("GATEWAY_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    Ok(find_project_dir_from(cwd).unwrap_or_else(|| cwd.to_path_buf()))
}

/// Walk up from `start` looking for `gateway.toml`
pub fn find_project_dir_from(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE_NAME).exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load `<project>/.env` into the process environment, if present
pub fn load_env_file(project_dir: &Path) -> Result<bool> {
    let env_file = project_dir.join(".env");
    if !env_file.exists() {
        return Ok(false);
    }
    dotenv::from_path(&env_file)
        .with_context(|| format!("Failed to load .env file from {}", env_file.display()))?;
    log::debug!("Loaded {}", env_file.display());
    Ok(true)
}

/// Region for a stack: stack setting, then `AWS_REGION`, then the default
pub fn resolve_region(stack: &StackConfig, aws_region: Option<String>) -> String {
    stack
        .region
        .clone()
        .filter(|r| !r.trim().is_empty())
        .or_else(|| aws_region.filter(|r| !r.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Settings the gateway graph is built from, validated
pub fn gateway_settings(stack: &StackConfig) -> Result<GatewaySettings> {
    Ok(GatewaySettings {
        source_cidr: security::effective_source_cidr(stack.source_cidr.as_deref())?,
        region: resolve_region(stack, env::var("AWS_REGION").ok()),
        strict_boot_script: stack.strict_boot_script.unwrap_or(false),
    })
}

/// AWS CLI profile from the environment (`AWS_PROFILE`)
pub fn aws_profile() -> Option<String> {
    env::var("AWS_PROFILE").ok().filter(|p| !p.trim().is_empty())
}
