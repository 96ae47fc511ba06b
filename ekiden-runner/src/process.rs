//! Child process helpers
//!
//! Thin wrappers around `tokio::process::Command` shared by the VM tool,
//! the remote shell and host disk operations. Children are killed when the
//! awaiting future is dropped, so timeouts and shutdown never leave stray
//! processes behind.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::RunnerError;

/// Creates a command that is killed if its future is dropped
pub fn command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true);
    cmd
}

/// Runs a command to completion and returns its stdout
///
/// A non-zero exit becomes `RunnerError::CommandFailed` carrying the trimmed
/// stdout and stderr.
pub async fn run_captured(mut cmd: Command, label: &str) -> Result<String> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", label))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !stderr.trim().is_empty() {
        debug!("{} stderr: {}", label, stderr.trim());
    }

    if !output.status.success() {
        let combined = format!("{}\n{}", stdout.trim(), stderr.trim());
        return Err(RunnerError::CommandFailed {
            program: label.to_string(),
            status: output.status.to_string(),
            output: combined.trim().to_string(),
        }
        .into());
    }

    Ok(stdout)
}

/// Runs a command with stdout/stderr attached to the host's
pub async fn run_streamed(mut cmd: Command, label: &str) -> Result<()> {
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("Failed to execute {}", label))?;

    if !status.success() {
        return Err(RunnerError::CommandFailed {
            program: label.to_string(),
            status: status.to_string(),
            output: String::new(),
        }
        .into());
    }

    Ok(())
}
