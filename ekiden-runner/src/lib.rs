//! Ekiden runner
//!
//! Keeps a fixed number of ephemeral macOS VMs serving CI jobs. Every VM
//! registers a single-use runner, runs exactly one job and is deleted.
//!
//! Architecture:
//! - Repository: registration tokens from the CI coordinator
//! - Services: VM lifecycle, remote execution and base image setup
//! - Scheduler: dispatcher, slot pool and per-VM workers
//! - Collaborators: `tart`, `sshpass`/`ssh` and host disk tools behind traits

pub mod config;
pub mod disk;
pub mod error;
pub mod preflight;
pub mod process;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod ssh;
pub mod tart;
pub mod wait;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result};
use ekiden_client::GitHubClient;
use ekiden_core::Config;
use std::sync::Arc;
use tracing::info;

pub use config::Timings;
pub use error::RunnerError;
pub use scheduler::{Dispatcher, Services};
pub use shutdown::{Shutdown, listen_for_signals};

use crate::disk::StandardHostDisk;
use crate::ssh::SshPassShell;
use crate::tart::{TartCli, tart_home};

/// Runs the runner loop with the production collaborators until shutdown
///
/// # Arguments
/// * `config` - Validated configuration
/// * `shutdown` - Shared shutdown state, usually fed by [`listen_for_signals`]
pub async fn run(config: Config, shutdown: Shutdown) -> Result<()> {
    preflight::check_dependencies().await?;

    let client = GitHubClient::new(
        config.github.registration_endpoint.clone(),
        config.github.api_token.expose().to_string(),
    )
    .context("Failed to create GitHub client")?;

    let services = Services {
        tokens: Arc::new(client),
        tool: Arc::new(TartCli::new()),
        shell: Arc::new(SshPassShell::new(
            config.vm.username.clone(),
            config.vm.password.clone(),
        )),
        disk: Arc::new(StandardHostDisk),
        tart_home: tart_home(),
    };

    info!(
        "Runner {} with up to {} concurrent VM(s)",
        config.github.runner_name, config.options.max_concurrent_runners
    );

    Dispatcher::new(Arc::new(config), services, Timings::default())
        .run(&shutdown)
        .await
}
