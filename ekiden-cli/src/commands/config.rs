//! Config command handlers

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use colored::*;
use ekiden_core::{Config, ConfigError};
use std::fs;
use std::path::{Path, PathBuf};

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write an annotated example configuration
    Init {
        /// Destination file
        #[arg(short, long, default_value = "ekiden.yaml")]
        output: PathBuf,
    },
    /// Load the configuration and report every problem
    Validate,
}

pub fn handle_config_command(command: ConfigCommands, config_path: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommands::Init { output } => init_config(&output),
        ConfigCommands::Validate => validate_config(config_path),
    }
}

/// Writes the sample config, refusing to overwrite an existing file
fn init_config(output: &Path) -> Result<()> {
    if output.exists() {
        bail!("{} already exists, not overwriting", output.display());
    }

    fs::write(output, Config::sample())
        .with_context(|| format!("Failed to write config to {}", output.display()))?;

    println!("  {} {}", "Created".green(), output.display());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Fill in the github and registry sections");
    println!("  2. Run {} to check it", "ekiden config validate".cyan());
    println!("  3. Start the runners with {}", "ekiden run".cyan());

    Ok(())
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;

    match config.validate() {
        Ok(()) => {
            println!("{}", "✓ Configuration is valid".green().bold());
            println!(
                "  runner {} with up to {} concurrent VM(s)",
                config.github.runner_name.cyan(),
                config.options.max_concurrent_runners
            );
            Ok(())
        }
        Err(ConfigError::Invalid(problems)) => {
            println!("{}", "✗ Configuration is invalid".red().bold());
            for problem in &problems {
                println!("  - {}", problem);
            }
            bail!("{} configuration problem(s)", problems.len())
        }
        Err(e) => Err(e.into()),
    }
}
