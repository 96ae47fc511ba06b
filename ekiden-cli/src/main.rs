//! Ekiden CLI
//!
//! Runs the ephemeral VM runner loop and helps set up its configuration.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ekiden")]
#[command(about = "Ephemeral macOS VM runners for GitHub Actions", long_about = None)]
struct Cli {
    /// Config file; the default locations are searched when omitted
    #[arg(short, long, global = true, env = "EKIDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ekiden=debug,ekiden_runner=debug,ekiden_client=debug"
    } else {
        "ekiden=info,ekiden_runner=info,ekiden_client=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    handle_command(cli.command, cli.config.as_deref()).await
}
