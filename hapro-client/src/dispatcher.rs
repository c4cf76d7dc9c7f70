//! Outbound calls to the external service.
//!
//! Both calls are best-effort: the `try_*` variants surface the failure, the
//! plain variants log it and drop the payload. Nothing is queued or retried.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use hapro_core::{BackupSlug, InstallationSource, RelayConfig};

use crate::credentials::CredentialCache;
use crate::error::{ClientError, Result};

/// Receives the "backend has finished this archive" signal.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify_backup_complete(&self, slug: &BackupSlug);
}

/// Receives relayed host events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_notification(&self, payload: Value);
}

pub struct OutboundDispatcher {
    http: reqwest::Client,
    config: RelayConfig,
    installation: InstallationSource,
    credentials: Arc<CredentialCache>,
}

impl OutboundDispatcher {
    pub fn new(http: reqwest::Client, config: &RelayConfig, credentials: Arc<CredentialCache>) -> Self {
        Self {
            http,
            installation: config.installation_source(),
            config: config.clone(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// `{api_base}/api/{kind}/{installation_id}{suffix}`, resolved per call.
    fn endpoint(&self, kind: &str, suffix: &str) -> Result<String> {
        let base = self.config.api_base()?;
        let id = self.installation.resolve()?;
        Ok(format!("{base}/api/{kind}/{id}{suffix}"))
    }

    async fn post(&self, url: String, body: Option<&Value>) -> Result<()> {
        let token = self.credentials.token().await?;
        let mut request = self.http.post(&url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        debug!(%url, status = status.as_u16(), "outbound call delivered");
        Ok(())
    }

    /// `POST {api_base}/api/notification/{id}` with `payload` as JSON body.
    pub async fn try_send_notification(&self, payload: &Value) -> Result<()> {
        let url = self.endpoint("notification", "")?;
        self.post(url, Some(payload)).await
    }

    /// `POST {api_base}/api/backup/{id}/synchronize`, no body.
    pub async fn try_notify_backup_complete(&self, slug: &BackupSlug) -> Result<()> {
        let url = self.endpoint("backup", "/synchronize")?;
        debug!(slug = %slug, "signalling backup completion");
        self.post(url, None).await
    }
}

#[async_trait]
impl NotificationSink for OutboundDispatcher {
    async fn send_notification(&self, payload: Value) {
        if let Err(err) = self.try_send_notification(&payload).await {
            error!(error = %err, "dropping relayed notification");
        }
    }
}

#[async_trait]
impl CompletionNotifier for OutboundDispatcher {
    async fn notify_backup_complete(&self, slug: &BackupSlug) {
        if let Err(err) = self.try_notify_backup_complete(slug).await {
            error!(slug = %slug, error = %err, "backup completion signal failed");
        }
    }
}
