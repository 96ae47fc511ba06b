//! Host dependency checks

use std::io::ErrorKind;
use std::process::Stdio;
use tracing::{debug, info};

use crate::error::RunnerError;
use crate::process::command;

/// Programs the runner shells out to, with a harmless argument to probe them
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("tart", "--version"),
    ("sshpass", "-V"),
    ("ssh", "-V"),
    ("ssh-keygen", "-?"),
];

/// Availability of one required tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    /// First output line of the probe, usually a version
    pub detail: String,
}

/// Probes every tool in `tools`
///
/// A tool is available when it can be executed; its exit status does not
/// matter since some of them print usage with a failing status.
pub async fn probe_tools(tools: &[(&str, &str)]) -> Vec<ToolStatus> {
    let mut statuses = Vec::with_capacity(tools.len());

    for (name, arg) in tools {
        let mut cmd = command(name);
        cmd.arg(arg).stdin(Stdio::null());

        let status = match cmd.output().await {
            Ok(output) => {
                let text = if output.stdout.is_empty() {
                    output.stderr
                } else {
                    output.stdout
                };
                let detail = String::from_utf8_lossy(&text)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                ToolStatus {
                    name: name.to_string(),
                    available: true,
                    detail,
                }
            }
            Err(e) => ToolStatus {
                name: name.to_string(),
                available: false,
                detail: if e.kind() == ErrorKind::NotFound {
                    "not found in PATH".to_string()
                } else {
                    e.to_string()
                },
            },
        };

        debug!(tool = %status.name, available = status.available, "{}", status.detail);
        statuses.push(status);
    }

    statuses
}

/// Fails with every missing tool listed if any required tool is unavailable
pub async fn check_dependencies() -> Result<(), RunnerError> {
    let missing: Vec<String> = probe_tools(REQUIRED_TOOLS)
        .await
        .into_iter()
        .filter(|status| !status.available)
        .map(|status| status.name)
        .collect();

    if !missing.is_empty() {
        return Err(RunnerError::MissingTools(missing));
    }

    info!("All required tools are available");
    Ok(())
}
