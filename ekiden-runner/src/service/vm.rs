//! VM lifecycle controller
//!
//! Drives one instance through clone → boot → address discovery → stop →
//! delete and tracks its [`LifecycleState`]. A controller is created per
//! iteration so concurrent workers never share the resolved image reference
//! or state.
//!
//! Teardown is guaranteed two ways:
//! - `VmController::cleanup` is awaited on every exit path of an iteration
//!   and runs on its own time budget, ignoring shutdown
//! - `CleanupGuard` schedules a detached best-effort removal if the iteration
//!   future is dropped before cleanup ran (panic, task abort)

use anyhow::{Context, Result};
use ekiden_core::domain::instance::parse_ipv4;
use ekiden_core::domain::lifecycle::LifecycleState;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Timings;
use crate::shutdown::Shutdown;
use crate::ssh::RemoteShell;
use crate::tart::{RunningVm, VmTool};
use crate::wait::poll_until;

/// Lifecycle controller for one VM instance
pub struct VmController {
    tool: Arc<dyn VmTool>,
    shell: Arc<dyn RemoteShell>,
    /// Reference the instance is cloned from
    image: String,
    timings: Timings,
    state: LifecycleState,
}

impl VmController {
    /// Creates a controller in the `Idle` state
    ///
    /// # Arguments
    /// * `tool` - VM management tool
    /// * `shell` - Remote shell, used to drop stale host keys
    /// * `image` - Resolved image reference to clone from
    /// * `timings` - Poll, timeout and cleanup budgets
    pub fn new(
        tool: Arc<dyn VmTool>,
        shell: Arc<dyn RemoteShell>,
        image: impl Into<String>,
        timings: Timings,
    ) -> Self {
        Self {
            tool,
            shell,
            image: image.into(),
            timings,
            state: LifecycleState::Idle,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Moves to `next` if the state machine allows it
    ///
    /// Invalid transitions are logged and ignored.
    pub fn transition(&mut self, next: LifecycleState) {
        if !self.state.can_transition_to(next) {
            warn!("Ignoring lifecycle transition {} -> {}", self.state, next);
            return;
        }
        debug!("Lifecycle {} -> {}", self.state, next);
        self.state = next;
    }

    /// Clones a new instance from the resolved image
    pub async fn clone_instance(&mut self, name: &str) -> Result<()> {
        info!("Cloning VM {} from {}", name, self.image);

        if let Err(e) = self.tool.clone_vm(&self.image, name).await {
            self.transition(LifecycleState::Failed);
            return Err(e).context("Failed to clone VM");
        }

        self.transition(LifecycleState::Cloned);
        Ok(())
    }

    /// Boots the instance without a display
    ///
    /// # Returns
    /// A handle whose exit can be awaited later without blocking now
    pub async fn start(&mut self, name: &str) -> Result<RunningVm> {
        info!("Starting VM {}", name);

        match self.tool.run(name).await {
            Ok(vm) => {
                self.transition(LifecycleState::Booting);
                Ok(vm)
            }
            Err(e) => {
                self.transition(LifecycleState::Failed);
                Err(e).context("Failed to start VM")
            }
        }
    }

    /// Polls until the instance reports a valid IPv4 address
    ///
    /// Host keys recorded for a previous tenant of the address are dropped
    /// once it is known. Timeout and shutdown both end the wait with an error.
    pub async fn wait_for_address(&mut self, name: &str, shutdown: &Shutdown) -> Result<Ipv4Addr> {
        info!("Waiting for VM IP address");

        let tool = &self.tool;
        let result = poll_until(
            "VM IP address",
            self.timings.poll_interval,
            self.timings.address_timeout,
            shutdown,
            move || async move {
                match tool.ip(name).await {
                    Ok(output) => parse_ipv4(&output),
                    Err(e) => {
                        debug!("tart ip not ready: {:#}", e);
                        None
                    }
                }
            },
        )
        .await;

        let ip = match result {
            Ok(ip) => ip,
            Err(e) => {
                self.transition(LifecycleState::Failed);
                return Err(e).context("Failed to get VM IP");
            }
        };

        info!(%ip, "VM IP obtained");

        if let Err(e) = self.shell.forget_host_key(ip).await {
            debug!("Failed to remove old host key for {}: {:#}", ip, e);
        }

        self.transition(LifecycleState::HasAddress);
        Ok(ip)
    }

    /// Requests a graceful stop
    pub async fn stop(&mut self, name: &str) -> Result<()> {
        info!("Stopping VM {}", name);
        self.tool.stop(name).await.context("Failed to stop VM")?;
        if self.state != LifecycleState::Failed {
            self.transition(LifecycleState::Stopping);
        }
        Ok(())
    }

    /// Deletes the instance
    pub async fn delete(&mut self, name: &str) -> Result<()> {
        info!("Deleting VM {}", name);
        self.tool.delete(name).await.context("Failed to delete VM")?;
        self.transition(LifecycleState::Deleted);
        Ok(())
    }

    /// Stops and deletes the instance, never failing the caller
    ///
    /// Runs on a fresh `cleanup_timeout` budget that does not observe
    /// shutdown, so a cancelled iteration still tears its VM down. The stop
    /// is skipped when a graceful stop already succeeded.
    pub async fn cleanup(&mut self, name: &str) {
        info!("Cleaning up VM {}", name);

        let budget = self.timings.cleanup_timeout;
        let already_stopped = self.state == LifecycleState::Stopping;
        let teardown = async {
            if !already_stopped {
                if let Err(e) = self.stop(name).await {
                    warn!("Failed to stop VM {} during cleanup: {:#}", name, e);
                }
            }
            self.delete(name).await
        };

        match tokio::time::timeout(budget, teardown).await {
            Ok(Ok(())) => debug!("VM {} deleted", name),
            Ok(Err(e)) => warn!("Failed to delete VM {} during cleanup: {:#}", name, e),
            Err(_) => warn!("Cleanup of VM {} did not finish within {:?}", name, budget),
        }

        if self.state != LifecycleState::Deleted {
            self.transition(LifecycleState::Deleted);
        }
    }
}

/// Last-resort teardown for an instance whose iteration never reached cleanup
///
/// Create the guard before cloning and `disarm` it after
/// [`VmController::cleanup`] returned. Dropping an armed guard spawns a
/// detached stop + delete on the current runtime.
pub struct CleanupGuard {
    tool: Arc<dyn VmTool>,
    name: String,
    budget: Duration,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(tool: Arc<dyn VmTool>, name: impl Into<String>, budget: Duration) -> Self {
        Self {
            tool,
            name: name.into(),
            budget,
            armed: true,
        }
    }

    /// Marks the instance as cleaned up
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("VM {} leaked: no runtime left to clean it up", self.name);
            return;
        };

        warn!("VM {} was not cleaned up, scheduling removal", self.name);
        let tool = Arc::clone(&self.tool);
        let name = std::mem::take(&mut self.name);
        let budget = self.budget;

        runtime.spawn(async move {
            let teardown = async {
                let _ = tool.stop(&name).await;
                tool.delete(&name).await
            };
            match tokio::time::timeout(budget, teardown).await {
                Ok(Ok(())) => info!("VM {} removed after abandoned iteration", name),
                Ok(Err(e)) => warn!("Failed to remove abandoned VM {}: {:#}", name, e),
                Err(_) => warn!("Removal of abandoned VM {} timed out", name),
            }
        });
    }
}
