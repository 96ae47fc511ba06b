//! Shutdown coordination
//!
//! Shutdown happens in two stages:
//! - graceful: no new VMs are admitted and every poll/wait point returns
//!   early, but jobs that are already running are allowed to finish
//! - forced: long-running remote commands are aborted as well and workers go
//!   straight to cleanup
//!
//! Cleanup itself never observes either stage.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared shutdown state for the dispatcher and its workers
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    graceful: CancellationToken,
    forced: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful drain
    pub fn request(&self) {
        self.graceful.cancel();
    }

    /// Requests an immediate stop; implies a graceful drain
    pub fn force(&self) {
        self.graceful.cancel();
        self.forced.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.graceful.is_cancelled()
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_cancelled()
    }

    /// Completes once a graceful (or forced) shutdown was requested
    pub async fn requested(&self) {
        self.graceful.cancelled().await
    }

    /// Completes once a forced shutdown was requested
    pub async fn forced(&self) {
        self.forced.cancelled().await
    }
}

/// Spawns a task translating process signals into shutdown requests
///
/// The first SIGINT/SIGTERM requests a graceful drain, the second one
/// forces it.
pub fn listen_for_signals(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal, "Received signal, draining in-flight runners");
        shutdown.request();

        let signal = wait_for_signal().await;
        warn!(signal, "Received second signal, aborting running jobs");
        shutdown.force();
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
