//! Tart VM tool
//!
//! Handles the host side of the VM lifecycle through the `tart` CLI:
//! - Listing, pulling and logging in to the image registry
//! - Cloning, booting, stopping and deleting instances
//! - Reading the address of a booted instance

use anyhow::{Context, Result};
use async_trait::async_trait;
use ekiden_core::config::Secret;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::process::{command, run_captured, run_streamed};

/// Registry login passed to the VM tool
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: Secret,
}

/// Handle to a booted VM process
///
/// The process exit is awaited by an independent task that reports through a
/// one-shot channel, so holding this handle never blocks the caller.
#[derive(Debug)]
pub struct RunningVm {
    exit: oneshot::Receiver<Result<()>>,
}

impl RunningVm {
    /// Wraps a receiver that gets the process exit result
    pub fn new(exit: oneshot::Receiver<Result<()>>) -> Self {
        Self { exit }
    }

    /// Waits up to `grace` for the VM process to exit
    ///
    /// Returns true if it exited in time.
    pub async fn wait_for_exit(self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.exit).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                debug!("VM process exited with error: {:#}", e);
                true
            }
            // Sender dropped: the waiting task is gone, so is the process
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }
}

/// Operations of the external VM management tool
#[async_trait]
pub trait VmTool: Send + Sync {
    /// Returns the raw listing of local images and instances
    async fn list(&self) -> Result<String>;

    /// Authenticates against an image registry
    async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()>;

    /// Pulls an image into the local cache
    async fn pull(&self, reference: &str, credentials: Option<&RegistryCredentials>) -> Result<()>;

    /// Creates instance `name` from `source`
    async fn clone_vm(&self, source: &str, name: &str) -> Result<()>;

    /// Boots instance `name` without a display
    async fn run(&self, name: &str) -> Result<RunningVm>;

    /// Returns the tool's current answer for the instance address
    async fn ip(&self, name: &str) -> Result<String>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// `VmTool` backed by the `tart` binary
#[derive(Debug, Clone)]
pub struct TartCli {
    program: String,
}

impl TartCli {
    pub fn new() -> Self {
        Self {
            program: "tart".to_string(),
        }
    }

    fn tart(&self, args: &[&str]) -> tokio::process::Command {
        let mut cmd = command(&self.program);
        cmd.args(args);
        cmd
    }

    fn with_credentials(cmd: &mut tokio::process::Command, credentials: &RegistryCredentials) {
        cmd.env("TART_REGISTRY_USERNAME", &credentials.username)
            .env("TART_REGISTRY_PASSWORD", credentials.password.expose());
    }
}

impl Default for TartCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VmTool for TartCli {
    async fn list(&self) -> Result<String> {
        run_captured(self.tart(&["list"]), "tart list").await
    }

    async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()> {
        info!("Logging in to registry {}", registry);

        let mut cmd = self.tart(&["login", registry]);
        Self::with_credentials(&mut cmd, credentials);
        run_captured(cmd, "tart login").await?;
        Ok(())
    }

    async fn pull(&self, reference: &str, credentials: Option<&RegistryCredentials>) -> Result<()> {
        info!("Pulling VM image {}", reference);

        let mut cmd = self.tart(&["pull", reference, "--concurrency", "1"]);
        if let Some(credentials) = credentials {
            Self::with_credentials(&mut cmd, credentials);
        }
        run_streamed(cmd, "tart pull").await
    }

    async fn clone_vm(&self, source: &str, name: &str) -> Result<()> {
        let mut cmd = self.tart(&["clone", source, name]);
        // Keep the cached base image when disk space runs low
        cmd.env("TART_NO_AUTO_PRUNE", "");
        run_captured(cmd, "tart clone").await?;
        Ok(())
    }

    async fn run(&self, name: &str) -> Result<RunningVm> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(["run", "--no-graphics", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to execute tart run")?;

        let (tx, rx) = oneshot::channel();
        let instance = name.to_string();
        tokio::spawn(async move {
            let result = match child.wait().await {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(anyhow::anyhow!("tart run exited with {}", status)),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to wait for tart run")),
            };
            if let Err(e) = &result {
                warn!("VM process for {} ended: {:#}", instance, e);
            }
            let _ = tx.send(result);
        });

        Ok(RunningVm::new(rx))
    }

    async fn ip(&self, name: &str) -> Result<String> {
        run_captured(self.tart(&["ip", name]), "tart ip").await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        run_captured(self.tart(&["stop", name]), "tart stop").await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        run_captured(self.tart(&["delete", name]), "tart delete").await?;
        Ok(())
    }
}

/// Root of tart's state: `$TART_HOME`, else `~/.tart`
pub fn tart_home() -> PathBuf {
    if let Some(home) = std::env::var_os("TART_HOME").filter(|h| !h.is_empty()) {
        return PathBuf::from(home);
    }
    PathBuf::from(std::env::var_os("HOME").unwrap_or_default()).join(".tart")
}

/// Directory holding pulled OCI images
pub fn oci_cache_root(tart_home: &std::path::Path) -> PathBuf {
    tart_home.join("cache").join("OCIs")
}

/// Disk image of a local instance
pub fn instance_disk(tart_home: &std::path::Path, name: &str) -> PathBuf {
    tart_home.join("vms").join(name).join("disk.img")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn test_running_vm_reports_exit() {
        let (tx, rx) = oneshot::channel();
        let vm = RunningVm::new(rx);
        tx.send(Ok(())).unwrap();

        assert!(vm.wait_for_exit(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_vm_grace_expires() {
        let (_tx, rx) = oneshot::channel();
        let vm = RunningVm::new(rx);

        assert!(!vm.wait_for_exit(Duration::from_secs(30)).await);
    }

    #[test]
    fn test_tart_paths() {
        let home = Path::new("/Users/ci/.tart");
        assert_eq!(oci_cache_root(home), Path::new("/Users/ci/.tart/cache/OCIs"));
        assert_eq!(
            instance_disk(home, "truncate_instance"),
            Path::new("/Users/ci/.tart/vms/truncate_instance/disk.img")
        );
    }
}
