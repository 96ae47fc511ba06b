//! Error kinds the orchestration layer branches on
//!
//! Most runner code returns `anyhow::Result` with context attached. The
//! variants here are the ones callers need to recognise, for example to skip
//! the failure backoff after a cancellation.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// A polling wait ran out of time
    #[error("timeout waiting for {what} after {after:?}")]
    Timeout { what: String, after: Duration },

    /// A wait or command was interrupted by shutdown
    #[error("{what} cancelled by shutdown")]
    Cancelled { what: String },

    /// An external command exited unsuccessfully
    #[error("{program} failed ({status}): {output}")]
    CommandFailed {
        program: String,
        status: String,
        output: String,
    },

    /// Host tools required at runtime are not installed
    #[error("missing required tools: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    /// The base image is not cached and cannot be pulled
    #[error("image {image} not found locally and no registry URL configured")]
    ImageUnavailable { image: String },
}

impl RunnerError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn cancelled(what: impl Into<String>) -> Self {
        Self::Cancelled { what: what.into() }
    }

    /// Returns true if `err` (or anything in its chain) is a cancellation
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<RunnerError>(),
                Some(RunnerError::Cancelled { .. })
            )
        })
    }

    /// Returns true if `err` (or anything in its chain) is a timeout
    pub fn is_timeout(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<RunnerError>(),
                Some(RunnerError::Timeout { .. })
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_cancellation_detected_through_context() {
        let err: anyhow::Result<()> = Err(RunnerError::cancelled("VM address")).context("wait failed");
        let err = err.unwrap_err();
        assert!(RunnerError::is_cancellation(&err));
        assert!(!RunnerError::is_timeout(&err));
    }

    #[test]
    fn test_timeout_message() {
        let err = RunnerError::timeout("SSH", Duration::from_secs(300));
        assert_eq!(err.to_string(), "timeout waiting for SSH after 300s");
    }
}
