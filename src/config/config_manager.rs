use crate::gateway::security;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "gateway.toml";

/// Per-stack settings as written in `gateway.toml`
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StackConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_boot_script: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SettingKey {
    /// Address range allowed to reach the VPN port
    SourceCidr,
    /// AWS region the stack deploys to
    Region,
    /// Stop the boot script at the first failing command
    StrictBootScript,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::SourceCidr,
        SettingKey::Region,
        SettingKey::StrictBootScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::SourceCidr => "source-cidr",
            SettingKey::Region => "region",
            SettingKey::StrictBootScript => "strict-boot-script",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StackConfig {
    pub fn get(&self, key: SettingKey) -> Option<String> {
        match key {
            SettingKey::SourceCidr => self.source_cidr.clone(),
            SettingKey::Region => self.region.clone(),
            SettingKey::StrictBootScript => self.strict_boot_script.map(|b| b.to_string()),
        }
    }

    pub fn set(&mut self, key: SettingKey, value: &str) -> Result<()> {
        match key {
            SettingKey::SourceCidr => {
                if value.trim().is_empty() {
                    anyhow::bail!("source-cidr cannot be empty; use 'config unset source-cidr' to allow any address");
                }
                security::effective_source_cidr(Some(value))?;
                self.source_cidr = Some(value.to_string());
            }
            SettingKey::Region => {
                let region = value.trim();
                if region.is_empty() || region.contains(char::is_whitespace) {
                    anyhow::bail!("Invalid region: '{}'", value);
                }
                self.region = Some(region.to_string());
            }
            SettingKey::StrictBootScript => {
                let enabled = match value.trim().to_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => true,
                    "false" | "no" | "off" | "0" => false,
                    _ => anyhow::bail!("strict-boot-script must be true or false, got '{}'", value),
                };
                self.strict_boot_script = Some(enabled);
            }
        }
        Ok(())
    }

    pub fn unset(&mut self, key: SettingKey) {
        match key {
            SettingKey::SourceCidr => self.source_cidr = None,
            SettingKey::Region => self.region = None,
            SettingKey::StrictBootScript => self.strict_boot_script = None,
        }
    }
}

/// Contents of `gateway.toml`
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub stacks: BTreeMap<String, StackConfig>,
}

impl ProjectConfig {
    /// Settings for `name`; a stack without a table uses defaults
    pub fn stack(&self, name: &str) -> StackConfig {
        self.stacks.get(name).cloned().unwrap_or_default()
    }

    pub fn stack_mut(&mut self, name: &str) -> &mut StackConfig {
        self.stacks.entry(name.to_string()).or_default()
    }
}

pub fn get_config_file_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_FILE_NAME)
}

pub fn load_config(project_dir: &Path) -> Result<ProjectConfig> {
    let config_path = get_config_file_path(project_dir);

    if !config_path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    let config: ProjectConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

    Ok(config)
}

pub fn save_config(project_dir: &Path, config: &ProjectConfig) -> Result<()> {
    let config_path = get_config_file_path(project_dir);
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, content)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    Ok(())
}
