//! VM lifecycle state machine
//!
//! One iteration drives a single instance along
//! `Idle → Cloned → Booting → HasAddress → Configured → JobRunning → Stopping → Deleted`.
//! `Failed` is reachable from any live state and still ends in `Deleted`,
//! because cleanup runs unconditionally.

use serde::{Deserialize, Serialize};

/// Execution phase of one worker iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No instance exists yet
    Idle,

    /// Instance cloned from the cached image
    Cloned,

    /// VM process started, waiting for an address
    Booting,

    /// Guest reported a valid IPv4 address
    HasAddress,

    /// Runner registered inside the guest
    Configured,

    /// Runner process is executing (or waiting for) a job
    JobRunning,

    /// Graceful stop requested
    Stopping,

    /// Instance removed; terminal
    Deleted,

    /// A step failed; cleanup still pending
    Failed,
}

impl LifecycleState {
    /// Position along the happy path; `Failed` sits outside it
    fn rank(self) -> Option<u8> {
        match self {
            LifecycleState::Idle => Some(0),
            LifecycleState::Cloned => Some(1),
            LifecycleState::Booting => Some(2),
            LifecycleState::HasAddress => Some(3),
            LifecycleState::Configured => Some(4),
            LifecycleState::JobRunning => Some(5),
            LifecycleState::Stopping => Some(6),
            LifecycleState::Deleted => Some(7),
            LifecycleState::Failed => None,
        }
    }

    /// Returns true once no further transition is possible
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Deleted
    }

    /// Whether moving from `self` to `next` is allowed
    ///
    /// States only advance. Any live state may fail, and every state,
    /// including `Idle` and `Failed`, may be cleaned up into `Deleted`.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (self.rank(), next) {
            (_, LifecycleState::Deleted) => true,
            (None, _) => false,
            (Some(_), LifecycleState::Failed) => true,
            (Some(current), next) => next.rank().is_some_and(|n| n > current),
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "Idle"),
            LifecycleState::Cloned => write!(f, "Cloned"),
            LifecycleState::Booting => write!(f, "Booting"),
            LifecycleState::HasAddress => write!(f, "HasAddress"),
            LifecycleState::Configured => write!(f, "Configured"),
            LifecycleState::JobRunning => write!(f, "JobRunning"),
            LifecycleState::Stopping => write!(f, "Stopping"),
            LifecycleState::Deleted => write!(f, "Deleted"),
            LifecycleState::Failed => write!(f, "Failed"),
        }
    }
}
