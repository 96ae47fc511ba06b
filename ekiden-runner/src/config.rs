//! Loop timings
//!
//! Every interval, timeout and backoff used by the orchestration loop.
//! They are threaded through constructors so tests and slow hosts can tune
//! them without touching global state.

use std::time::Duration;

/// Durations governing one runner host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Interval between address and readiness probes
    pub poll_interval: Duration,

    /// How long a booted VM may take to report an IPv4 address
    pub address_timeout: Duration,

    /// How long a VM with an address may take to accept remote sessions
    pub ready_timeout: Duration,

    /// Budget for stop + delete during cleanup, independent of shutdown
    pub cleanup_timeout: Duration,

    /// How long to wait for the VM process to exit after a graceful stop
    pub vm_exit_grace: Duration,

    /// Pause after a failed iteration before the slot is released
    pub failure_backoff: Duration,

    /// How often the shutdown flag is re-checked while all slots are busy
    pub shutdown_flag_poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            address_timeout: Duration::from_secs(300),
            ready_timeout: Duration::from_secs(300),
            cleanup_timeout: Duration::from_secs(30),
            vm_exit_grace: Duration::from_secs(30),
            failure_backoff: Duration::from_secs(10),
            shutdown_flag_poll: Duration::from_secs(1),
        }
    }
}
