use crate::commands::utils::Context;
use crate::config::{self, config_manager, SettingKey};
use crate::gateway::DEFAULT_SOURCE_CIDR;
use crate::ConfigCommands;
use anyhow::Result;

/// Handle config commands
pub fn handle_config(ctx: &Context, command: Option<&ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => show_config(ctx)?,
        Some(ConfigCommands::Get { key }) => get_setting(ctx, *key)?,
        Some(ConfigCommands::Set { key, value }) => set_setting(ctx, *key, value)?,
        Some(ConfigCommands::Unset { key }) => unset_setting(ctx, *key)?,
    }
    Ok(())
}

fn default_for(key: SettingKey) -> String {
    match key {
        SettingKey::SourceCidr => DEFAULT_SOURCE_CIDR.to_string(),
        SettingKey::Region => std::env::var("AWS_REGION")
            .ok()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| config::DEFAULT_REGION.to_string()),
        SettingKey::StrictBootScript => "false".to_string(),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let stack = ctx.stack_config()?;
    println!("Stack Configuration");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "  File:  {}",
        config_manager::get_config_file_path(&ctx.project_dir).display()
    );
    println!("  Stack: {}", ctx.stack);
    println!();
    for key in SettingKey::ALL {
        match stack.get(key) {
            Some(value) => println!("  {:<20} {}", key.as_str(), value),
            None => println!("  {:<20} {} (default)", key.as_str(), default_for(key)),
        }
    }
    Ok(())
}

fn get_setting(ctx: &Context, key: SettingKey) -> Result<()> {
    let value = ctx
        .stack_config()?
        .get(key)
        .unwrap_or_else(|| default_for(key));
    println!("{}", value);
    Ok(())
}

fn set_setting(ctx: &Context, key: SettingKey, value: &str) -> Result<()> {
    let mut project = config_manager::load_config(&ctx.project_dir)?;
    project.stack_mut(&ctx.stack).set(key, value)?;
    config_manager::save_config(&ctx.project_dir, &project)?;
    println!("✓ {} = {} (stack '{}')", key, value, ctx.stack);
    Ok(())
}

fn unset_setting(ctx: &Context, key: SettingKey) -> Result<()> {
    let mut project = config_manager::load_config(&ctx.project_dir)?;
    project.stack_mut(&ctx.stack).unset(key);
    config_manager::save_config(&ctx.project_dir, &project)?;
    println!(
        "✓ {} unset for stack '{}' (now {})",
        key,
        ctx.stack,
        default_for(key)
    );
    Ok(())
}
