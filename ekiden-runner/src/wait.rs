//! Fixed-interval polling with timeout and cancellation
//!
//! Used for every "wait until the VM is ready" step. A probe that hangs is
//! abandoned when the deadline passes or shutdown is requested; dropping it
//! also kills any child process it spawned.

use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::RunnerError;
use crate::shutdown::Shutdown;

/// Polls `check` every `interval` until it yields a value
///
/// # Arguments
/// * `what` - Name of the awaited condition, used in logs and errors
/// * `interval` - Delay between probes; the first probe runs immediately
/// * `timeout` - Total time budget
/// * `shutdown` - A graceful shutdown request ends the wait early
/// * `check` - Probe returning `Some` once the condition holds
///
/// # Returns
/// * `Ok(value)` - The first value produced by `check`
/// * `Err(RunnerError::Timeout)` - The budget elapsed
/// * `Err(RunnerError::Cancelled)` - Shutdown was requested
pub async fn poll_until<T, F, Fut>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    shutdown: &Shutdown,
    mut check: F,
) -> Result<T, RunnerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0u32;

    loop {
        let probe = async {
            ticker.tick().await;
            check().await
        };

        tokio::select! {
            biased;
            _ = shutdown.requested() => {
                debug!(attempts, "Wait for {} cancelled", what);
                return Err(RunnerError::cancelled(what));
            }
            _ = time::sleep_until(deadline) => {
                return Err(RunnerError::timeout(what, timeout));
            }
            found = probe => {
                attempts += 1;
                if let Some(value) = found {
                    debug!(attempts, "{} ready", what);
                    return Ok(value);
                }
            }
        }
    }
}
