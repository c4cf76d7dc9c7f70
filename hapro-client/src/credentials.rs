//! Client-credentials exchange and the process-wide token cache.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use hapro_core::RelayConfig;

use crate::error::{decode_err, ClientError, Result};

/// Token endpoint reply. Extra fields (`token_type`, `scope`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Anything that can mint a fresh access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<TokenGrant>;
}

/// `grant_type=client_credentials` exchange against the external token
/// endpoint. Endpoint and secret are resolved per exchange, so a secret file
/// that appears after startup is picked up on the next refresh.
pub struct ClientCredentials {
    http: reqwest::Client,
    config: RelayConfig,
}

impl ClientCredentials {
    pub fn new(http: reqwest::Client, config: &RelayConfig) -> Self {
        Self {
            http,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn fetch_token(&self) -> Result<TokenGrant> {
        let url = self.config.token_url()?;
        let secret = self.config.client_secret()?;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("scopes", self.config.scope.as_str()),
        ];

        let response = self.http.post(&url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        let grant: TokenGrant =
            serde_json::from_str(&body).map_err(|err| decode_err(&url, err.to_string()))?;
        if grant.access_token.is_empty() {
            return Err(decode_err(&url, "empty access_token"));
        }
        Ok(grant)
    }
}

/// A token and the instant it stops being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Lazily populated bearer-token cache.
///
/// The check-then-refresh sequence runs under one async mutex, so concurrent
/// callers on a multi-threaded runtime share a single exchange instead of
/// racing to overwrite each other.
pub struct CredentialCache {
    source: Box<dyn TokenSource>,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialCache {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: Mutex::new(None),
        }
    }

    /// Cached token while `now < expires_at`; otherwise exactly one exchange.
    /// Exchange failures are returned as-is; retrying is the caller's call.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.access_token.clone());
        }

        let grant = self.source.fetch_token().await?;
        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(grant.expires_in))
            .ok_or_else(|| {
                decode_err(
                    "token endpoint",
                    format!("expires_in {} out of range", grant.expires_in),
                )
            })?;
        debug!(expires_in = grant.expires_in, "access token refreshed");
        *cached = Some(CachedToken {
            access_token: grant.access_token.clone(),
            expires_at,
        });
        Ok(grant.access_token)
    }

    /// Snapshot of the cache, for diagnostics.
    pub async fn cached(&self) -> Option<CachedToken> {
        self.cached.lock().await.clone()
    }

    /// Drop the cached token so the next call exchanges again.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
