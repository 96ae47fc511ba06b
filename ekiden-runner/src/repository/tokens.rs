//! Registration token repository
//!
//! Issues one fresh registration token per VM iteration. Retrying is the
//! caller's business: a failed fetch ends the iteration and the worker backs
//! off before its slot is reused.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ekiden_client::GitHubClient;
use ekiden_core::domain::token::RegistrationToken;
use tracing::warn;

/// Source of runner registration tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Requests a new registration token
    async fn registration_token(&self) -> Result<RegistrationToken>;
}

#[async_trait]
impl TokenProvider for GitHubClient {
    async fn registration_token(&self) -> Result<RegistrationToken> {
        match self.get_registration_token().await {
            Ok(token) => Ok(token),
            Err(e) => {
                if e.is_client_error() {
                    warn!("GitHub rejected the token request; check github.api_token and github.registration_endpoint");
                }
                Err(e).context("Failed to get registration token")
            }
        }
    }
}
