//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod check;
mod config;
mod run;
mod version;

pub use config::ConfigCommands;

use anyhow::{Context, Result};
use clap::Subcommand;
use ekiden_core::Config;
use std::path::Path;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the runner loop until SIGINT/SIGTERM or the shutdown flag file
    Run,
    /// Check that the required host tools are installed
    Check,
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Print version information
    Version,
}

/// Routes the command to its handler
///
/// # Arguments
/// * `command` - The command to execute
/// * `config_path` - Explicit config file, if one was given
pub async fn handle_command(command: Commands, config_path: Option<&Path>) -> Result<()> {
    match command {
        Commands::Run => run::handle_run(config_path).await,
        Commands::Check => check::handle_check().await,
        Commands::Config { command } => config::handle_config_command(command, config_path),
        Commands::Version => {
            version::print_version();
            Ok(())
        }
    }
}

/// Loads the configuration and rejects it if invalid
fn load_valid_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}
