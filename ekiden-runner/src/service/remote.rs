//! Remote execution against a booted guest
//!
//! Readiness probing, runner registration and the job run. Long commands
//! (configure, job) keep going through a graceful shutdown and are only
//! aborted once shutdown is forced; dropping the command kills the local
//! ssh process and with it the session.

use anyhow::{Context, Result};
use ekiden_core::config::GitHubConfig;
use ekiden_core::domain::token::RegistrationToken;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Timings;
use crate::error::RunnerError;
use crate::shutdown::Shutdown;
use crate::ssh::RemoteShell;
use crate::wait::poll_until;

/// Starts the runner agent and blocks until its single job is done
pub const RUN_JOB_COMMAND: &str = "source ~/.zprofile && ./actions-runner/run.sh";

const DEFAULT_LABEL: &str = "self-hosted";

/// Where and how a runner agent registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerRegistration {
    pub runner_url: String,
    pub labels: Vec<String>,
}

impl RunnerRegistration {
    pub fn from_config(github: &GitHubConfig) -> Self {
        Self {
            runner_url: github.runner_url.clone(),
            labels: github.runner_labels.clone(),
        }
    }

    /// Comma separated labels, `self-hosted` when none are configured
    pub fn labels_arg(&self) -> String {
        let labels: Vec<&str> = self
            .labels
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();

        if labels.is_empty() {
            DEFAULT_LABEL.to_string()
        } else {
            labels.join(",")
        }
    }
}

/// Builds the one-shot, ephemeral runner registration command
pub fn configure_command(registration: &RunnerRegistration, token: &str, instance_name: &str) -> String {
    format!(
        "./actions-runner/config.sh --url {} --token {} --ephemeral --name {} --labels {} --unattended --replace",
        shell_quote(&registration.runner_url),
        shell_quote(token),
        shell_quote(instance_name),
        shell_quote(&registration.labels_arg()),
    )
}

/// Quotes `value` for a POSIX shell unless it is made of safe characters only
fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:/@%+=".contains(c));

    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Remote execution client bound to a shell implementation
pub struct RemoteExecutionClient {
    shell: Arc<dyn RemoteShell>,
    timings: Timings,
}

impl RemoteExecutionClient {
    pub fn new(shell: Arc<dyn RemoteShell>, timings: Timings) -> Self {
        Self { shell, timings }
    }

    /// Polls until the guest accepts a remote session
    pub async fn wait_for_ready(&self, ip: Ipv4Addr, shutdown: &Shutdown) -> Result<()> {
        info!(%ip, "Waiting for SSH to be available");

        let shell = &self.shell;
        poll_until(
            "SSH",
            self.timings.poll_interval,
            self.timings.ready_timeout,
            shutdown,
            move || async move {
                match shell.probe(ip).await {
                    Ok(()) => Some(()),
                    Err(e) => {
                        debug!("SSH not ready: {:#}", e);
                        None
                    }
                }
            },
        )
        .await
        .context("VM never became reachable over SSH")?;

        info!(%ip, "SSH is available");
        Ok(())
    }

    /// Registers a single-use runner agent on the guest
    ///
    /// The instance name is used as the runner name so concurrent runners of
    /// one host never collide.
    pub async fn configure(
        &self,
        ip: Ipv4Addr,
        registration: &RunnerRegistration,
        token: &RegistrationToken,
        instance_name: &str,
        shutdown: &Shutdown,
    ) -> Result<()> {
        info!(%ip, "Configuring runner");

        let command = configure_command(registration, &token.token, instance_name);
        self.execute_until_forced(ip, &command, false, shutdown, "runner configuration")
            .await
            .context("Failed to configure runner")?;

        Ok(())
    }

    /// Runs the agent until it exits after one job
    ///
    /// Output is streamed to the host. A non-zero exit is returned as an
    /// ordinary error for the caller to log.
    pub async fn run_job(&self, ip: Ipv4Addr, shutdown: &Shutdown) -> Result<()> {
        info!(%ip, "Starting runner");
        self.execute_until_forced(ip, RUN_JOB_COMMAND, true, shutdown, "runner job")
            .await?;
        Ok(())
    }

    /// Runs `command` on the guest to completion
    pub async fn execute(&self, ip: Ipv4Addr, command: &str, stream: bool) -> Result<String> {
        self.shell.execute(ip, command, stream).await
    }

    async fn execute_until_forced(
        &self,
        ip: Ipv4Addr,
        command: &str,
        stream: bool,
        shutdown: &Shutdown,
        what: &str,
    ) -> Result<String> {
        tokio::select! {
            biased;
            _ = shutdown.forced() => Err(RunnerError::cancelled(what).into()),
            output = self.shell.execute(ip, command, stream) => output,
        }
    }
}
