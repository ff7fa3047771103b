//! Warehouse Authentication
//!
//! OAuth2 client-credentials tokens for the warehouse REST API, cached until
//! shortly before they expire.

use crate::execution::connector::DriverError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are refreshed this long before their reported expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Default scope for Databricks service principals.
const DEFAULT_SCOPE: &str = "all-apis";

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A bearer token valid for at least the next request.
    async fn token(&self) -> Result<String, DriverError>;
}

/// Pre-issued token, e.g. a personal access token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, DriverError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct OAuthTokenProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthTokenProvider {
    pub fn new(
        client: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: Option<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken, DriverError> {
        debug!(token_url = %self.token_url, "Requesting OAuth token");
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", self.scope.as_str())])
            .send()
            .await
            .map_err(|e| DriverError::Auth(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Auth(format!(
                "token endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriverError::Auth(format!("invalid token response: {}", e)))?;

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
        let refresh_at = Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN);
        info!(expires_in_secs = lifetime.as_secs(), "Obtained OAuth token");

        Ok(CachedToken {
            value: body.access_token,
            refresh_at,
        })
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn token(&self) -> Result<String, DriverError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}
