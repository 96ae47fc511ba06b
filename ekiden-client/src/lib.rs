//! Ekiden HTTP Client
//!
//! A small, typed client for the GitHub Actions registration-token endpoint.
//!
//! Every ephemeral VM registers with a fresh token, so the runner calls this
//! client once per iteration. The client wraps a single `reqwest::Client`
//! and can be cloned and shared between concurrent workers.
//!
//! # Example
//!
//! ```no_run
//! use ekiden_client::GitHubClient;
//!
//! # async fn example() -> ekiden_client::Result<()> {
//! let client = GitHubClient::new(
//!     "https://api.github.com/orgs/acme/actions/runners/registration-token",
//!     "ghp_example",
//! )?;
//!
//! let token = client.get_registration_token().await?;
//! println!("token expires at {:?}", token.expires_at);
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use ekiden_core::domain::token::RegistrationToken;
pub use error::{ClientError, Result};

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

/// Request timeout applied by [`GitHubClient::new`]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// GitHub REST API version sent with every request
const API_VERSION: &str = "2022-11-28";

/// HTTP client for the GitHub registration-token API
#[derive(Clone)]
pub struct GitHubClient {
    /// Registration token endpoint
    endpoint: String,
    /// Token used as bearer credential
    api_token: String,
    /// HTTP client instance
    client: Client,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Create a new client with the default request timeout
    ///
    /// # Arguments
    /// * `endpoint` - Registration token endpoint URL
    /// * `api_token` - Token allowed to create registration tokens
    pub fn new(endpoint: impl Into<String>, api_token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_client(endpoint, api_token, client))
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        endpoint: impl Into<String>,
        api_token: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: api_token.into(),
            client,
        }
    }

    /// Get the registration endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request a new runner registration token
    ///
    /// Issues exactly one request; retrying is left to the caller.
    ///
    /// # Returns
    /// The token and its expiry. Fails on transport errors, on any status
    /// other than 201 Created, on an unparseable body and on an empty token.
    pub async fn get_registration_token(&self) -> Result<RegistrationToken> {
        debug!("Requesting registration token from {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        let token: RegistrationToken = self.handle_created(response).await?;

        if token.token.is_empty() {
            return Err(ClientError::EmptyToken);
        }

        info!(expires_at = ?token.expires_at, "Registration token obtained");
        Ok(token)
    }

    /// Check for 201 Created and deserialize the JSON body
    async fn handle_created<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::CREATED {
            return Err(ClientError::api_error(status.as_u16(), body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
