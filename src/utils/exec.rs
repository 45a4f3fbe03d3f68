use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};

/// Local command execution helpers
pub mod local {
    use super::*;

    pub fn execute(program: &str, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        cmd.output()
            .with_context(|| format!("Failed to execute command: {}", program))
    }

    /// Check if a command exists using native Rust (which crate)
    pub fn check_command_exists(command: &str) -> bool {
        which::which(command).is_ok()
    }
}

/// Seam between code that builds command lines and the process that runs them
pub trait CommandRunner {
    /// Run `program` and return its stdout; a non-zero exit is an error carrying stderr
    fn run(&mut self, program: &str, args: &[String]) -> Result<String>;
}

/// Runs commands on this machine
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn run(&mut self, program: &str, args: &[String]) -> Result<String> {
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        log::debug!("exec: {} {}", program, summarize(args));

        let output = local::execute(program, &arg_refs)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} {} failed ({}): {}",
                program,
                summarize(args),
                output.status,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Leading words of a command line; long arguments (scripts, documents) are elided
pub fn summarize(args: &[String]) -> String {
    args.iter()
        .take(2)
        .map(|a| {
            if a.len() > 48 {
                format!("{}…", &a[..a.char_indices().nth(47).map(|(i, _)| i).unwrap_or(a.len())])
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
