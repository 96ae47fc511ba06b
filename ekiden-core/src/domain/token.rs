//! Registration tokens
//!
//! A registration token authorizes exactly one runner registration. It is
//! fetched fresh for every VM and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registration token issued by the GitHub API
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub token: String,

    /// When the token stops being accepted
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RegistrationToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Returns true if the token has an expiry in the past
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
