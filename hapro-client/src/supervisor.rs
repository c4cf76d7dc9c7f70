//! Backend (supervisor) REST client.
//!
//! Two bases share one bearer token:
//!
//! ```text
//! {supervisor_url}/…           supervisor API, JSON envelopes {result, data}
//! {supervisor_url}/core/api/…  host core API, JSON or plain text
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use hapro_core::{BackupSlug, RelayConfig};

use crate::error::{decode_err, ClientError, Result};

/// One entry of the backend's backup list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// Read access to the backend's list of finished backups.
#[async_trait]
pub trait BackupCatalog: Send + Sync {
    async fn list_backups(&self) -> Result<Vec<BackupEntry>>;

    /// `true` once an entry's slug equals `slug`.
    async fn contains(&self, slug: &BackupSlug) -> Result<bool> {
        let backups = self.list_backups().await?;
        Ok(backups.iter().any(|b| b.slug == slug.0))
    }
}

/// Extract backup entries from either `{data: {backups}}` or `{backups}`.
/// Entries without a string `slug` are skipped.
pub fn parse_backup_list(body: &Value) -> Option<Vec<BackupEntry>> {
    let list = body
        .get("data")
        .and_then(|data| data.get("backups"))
        .or_else(|| body.get("backups"))?
        .as_array()?;
    Some(
        list.iter()
            .filter_map(|entry| serde_json::from_value::<BackupEntry>(entry.clone()).ok())
            .collect(),
    )
}

/// Body of a core API reply; the core answers JSON or plain text.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreBody {
    Json(Value),
    Text(String),
}

/// Core API replies are passed through with their status; the host reports
/// bad service calls as a text body on a 4xx.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreReply {
    pub status: u16,
    pub body: CoreBody,
}

impl CoreReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Raw bytes and their declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct SupervisorClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl SupervisorClient {
    pub fn new(http: reqwest::Client, base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &RelayConfig) -> Self {
        Self::new(
            http,
            config.supervisor_url.clone(),
            config.supervisor_token.clone(),
        )
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Supervisor API call; non-2xx is an error, an empty body is `null`.
    pub async fn send_json(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        debug!(%method, %url, "supervisor request");
        let mut builder = self.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| decode_err(&url, err.to_string()))
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        self.send_json(Method::GET, path, None).await
    }

    /// Host core API call (`/core/api{path}`).
    pub async fn core_api(&self, method: Method, path: &str, body: Option<&Value>) -> Result<CoreReply> {
        let url = format!("{}/core/api{path}", self.base);
        debug!(%method, %url, "core api request");
        let mut builder = self.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        let text = response.text().await?;
        let body = if is_json {
            match serde_json::from_str(&text) {
                Ok(value) => CoreBody::Json(value),
                Err(_) => CoreBody::Text(text),
            }
        } else {
            CoreBody::Text(text)
        };
        Ok(CoreReply { status, body })
    }

    /// `core_api` bounded by `limit`.
    pub async fn core_api_within(
        &self,
        limit: Duration,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<CoreReply> {
        tokio::time::timeout(limit, self.core_api(method, path, body))
            .await
            .map_err(|_| ClientError::Timeout(limit))?
    }

    /// Supervisor GET returning raw bytes (archive downloads).
    pub async fn get_bytes(&self, path: &str) -> Result<Download> {
        let url = format!("{}{path}", self.base);
        let response = self.request(Method::GET, &url).send().await?;
        read_download(url, response).await
    }

    /// Forward an opaque body (multipart uploads) to the supervisor.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        let mut builder = self.request(method, &url).body(body);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| decode_err(&url, err.to_string()))
    }
}

#[async_trait]
impl BackupCatalog for SupervisorClient {
    async fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        let body = self.get_json("/backups").await?;
        parse_backup_list(&body)
            .ok_or_else(|| decode_err(&format!("{}/backups", self.base), "no backups array"))
    }
}

/// Unauthenticated GET of an arbitrary URL (icons, IP lookup).
pub async fn fetch_download(http: &reqwest::Client, url: &str) -> Result<Download> {
    let response = http.get(url).send().await?;
    read_download(url.to_string(), response).await
}

async fn read_download(url: String, response: reqwest::Response) -> Result<Download> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?.to_vec();
    if !status.is_success() {
        return Err(ClientError::Status {
            url,
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    Ok(Download {
        content_type,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wrapped_backup_list() {
        let body = json!({
            "result": "ok",
            "data": { "backups": [
                { "slug": "a1b2c3d4", "name": "Full", "date": "2024-05-01T02:00:00Z" },
                { "slug": "e5f6a7b8" }
            ]}
        });
        let backups = parse_backup_list(&body).expect("list");
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].name.as_deref(), Some("Full"));
        assert_eq!(backups[1].slug, "e5f6a7b8");
    }

    #[test]
    fn parses_bare_backup_list_and_skips_entries_without_slug() {
        let body = json!({ "backups": [ { "name": "broken" }, { "slug": "ok1" } ] });
        let backups = parse_backup_list(&body).expect("list");
        assert_eq!(backups, vec![BackupEntry { slug: "ok1".into(), name: None, date: None }]);
    }

    #[test]
    fn missing_array_is_none() {
        assert!(parse_backup_list(&json!({ "data": {} })).is_none());
        assert!(parse_backup_list(&json!({ "backups": "nope" })).is_none());
    }
}
