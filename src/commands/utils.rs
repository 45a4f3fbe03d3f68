use crate::config::{self, config_manager, StackConfig};
use crate::engine::{Action, Plan, StateStore};
use crate::gateway::{self, compute, GatewaySettings};
use crate::graph::Stack;
use crate::provider::{AwsCliProvider, MemoryProvider, Provider, ProviderKind};
use anyhow::Result;
use std::io::{self, Write};
use std::path::PathBuf;

/// Everything a command needs to know about where it runs
#[derive(Debug, Clone)]
pub struct Context {
    pub project_dir: PathBuf,
    pub stack: String,
    pub provider: ProviderKind,
}

impl Context {
    /// Resolve the project directory and load its `.env`
    pub fn resolve(dir: Option<PathBuf>, stack: String, provider: ProviderKind) -> Result<Self> {
        let valid = !stack.is_empty()
            && stack
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!(
                "Invalid stack name '{}': use letters, digits, '-' and '_'",
                stack
            );
        }

        let project_dir = match dir {
            Some(dir) => dir,
            None => config::find_project_dir()?,
        };
        config::load_env_file(&project_dir)?;
        log::info!("Project directory: {}", project_dir.display());
        Ok(Self {
            project_dir,
            stack,
            provider,
        })
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(&self.project_dir)
    }

    pub fn stack_config(&self) -> Result<StackConfig> {
        Ok(config_manager::load_config(&self.project_dir)?.stack(&self.stack))
    }

    pub fn settings(&self) -> Result<GatewaySettings> {
        config::gateway_settings(&self.stack_config()?)
    }

    pub fn region(&self) -> Result<String> {
        Ok(config::resolve_region(
            &self.stack_config()?,
            std::env::var("AWS_REGION").ok(),
        ))
    }
}

/// The provider a command drives
pub enum Cloud {
    Aws(AwsCliProvider),
    /// Simulated cloud and the file it persists to
    Memory(MemoryProvider, PathBuf),
}

impl Cloud {
    pub fn open(ctx: &Context, region: &str) -> Result<Self> {
        match ctx.provider {
            ProviderKind::Aws => Ok(Cloud::Aws(AwsCliProvider::new(
                region,
                config::aws_profile(),
            )?)),
            ProviderKind::Memory => {
                let path = ctx.store().simulated_cloud_path(&ctx.stack);
                let cloud = MemoryProvider::load(&path, region)?;
                Ok(Cloud::Memory(cloud, path))
            }
        }
    }

    pub fn provider(&mut self) -> &mut dyn Provider {
        match self {
            Cloud::Aws(aws) => aws,
            Cloud::Memory(memory, _) => memory,
        }
    }

    /// Persist the simulated cloud; nothing to do for a real one
    pub fn finish(&self) -> Result<()> {
        if let Cloud::Memory(memory, path) = self {
            memory.save(path)?;
        }
        Ok(())
    }
}

/// Look up the machine image and declare the gateway graph
pub fn build_stack(ctx: &Context, cloud: &mut Cloud, settings: &GatewaySettings) -> Result<Stack> {
    let image = cloud.provider().lookup_image(&compute::image_query())?;
    log::info!("Using machine image {}", image);
    gateway::build_stack(&ctx.stack, settings, &image)
}

pub fn print_plan(stack: &str, plan: &Plan) {
    println!("Stack '{}':", stack);
    for step in plan.changes() {
        println!("  {}", step);
    }
    if plan.is_noop() {
        println!("  (no changes)");
    }
    println!();
    println!("Plan: {}", plan.summary());
    if plan.count(Action::Replace) > 0 {
        println!("Replacements are created before the resources they replace are deleted.");
    }
}

/// Ask a yes/no question on the terminal; anything but y/yes is no
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let answer = input.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

pub fn print_outputs(outputs: &std::collections::BTreeMap<String, String>) {
    let width = outputs.keys().map(|k| k.len()).max().unwrap_or(0);
    for (name, value) in outputs {
        println!("  {:<width$}  {}", name, value, width = width);
    }
}
