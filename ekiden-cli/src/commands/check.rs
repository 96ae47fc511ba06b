//! `ekiden check`

use anyhow::{Result, bail};
use colored::*;
use ekiden_runner::preflight::{REQUIRED_TOOLS, probe_tools};

pub async fn handle_check() -> Result<()> {
    let statuses = probe_tools(REQUIRED_TOOLS).await;
    let mut missing = Vec::new();

    for status in &statuses {
        if status.available {
            println!("  {} {:<12} {}", "✓".green(), status.name, status.detail.dimmed());
        } else {
            println!("  {} {:<12} {}", "✗".red(), status.name, status.detail.red());
            missing.push(status.name.as_str());
        }
    }

    if !missing.is_empty() {
        bail!("missing required tools: {}", missing.join(", "));
    }

    println!("{}", "All required tools are available".green().bold());
    Ok(())
}
