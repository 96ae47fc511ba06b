//! `ekiden run`

use anyhow::Result;
use ekiden_runner::{Shutdown, listen_for_signals};
use std::path::Path;
use tracing::info;

use super::load_valid_config;

pub async fn handle_run(config_path: Option<&Path>) -> Result<()> {
    let config = load_valid_config(config_path)?;

    info!("Starting Ekiden {}", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    let signals = listen_for_signals(shutdown.clone());

    let result = ekiden_runner::run(config, shutdown).await;
    signals.abort();

    result?;
    info!("Ekiden stopped");
    Ok(())
}
