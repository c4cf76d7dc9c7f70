//! Relay configuration.
//!
//! # Sources, lowest precedence first
//!
//! ```text
//! built-in defaults  →  relay.yaml (serde_yaml)  →  environment overlay
//! ```
//!
//! Secrets that live in other artifacts (the tunnel client's `client.toml`,
//! the host's `.storage/core.uuid`) are resolved lazily by the accessor that
//! needs them, so a missing secret only fails the call that depends on it.
//!
//! # API pattern
//!
//! - `load_at(path)`: explicit file; `ConfigNotFound` when absent
//! - `load_or_default_at(path)`: same, but a missing file means defaults
//! - `RelayConfig::apply_env(lookup)`: overlay from any key → value source;
//!   tests pass a closure over a map, the CLI passes `std::env::var`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{InstallationId, ARCHIVE_EXTENSION};

const REDACTED: &str = "<redacted>";

// ---------------------------------------------------------------------------
// 1. Settings
// ---------------------------------------------------------------------------

/// Effective relay settings. Every field has a default so a partial (or
/// absent) file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface the HTTP surface binds to.
    pub bind: String,
    pub port: u16,

    /// Directory the host writes backup archives into.
    pub backup_dir: PathBuf,
    pub archive_extension: String,
    /// Seconds between two backend list queries of one pending archive.
    pub poll_interval_secs: u64,

    /// Backend (supervisor) REST base URL and its bearer token.
    pub supervisor_url: String,
    pub supervisor_token: Option<String>,
    /// Subscription channel endpoint on the host's event bus.
    pub event_bus_url: String,
    pub event_type: String,
    /// Seconds between a channel close and the next connection attempt.
    pub reconnect_delay_secs: u64,

    /// External service base URL (`HAPRO_API_URL`).
    pub api_base: Option<String>,
    /// Token endpoint; derived from `api_base` when unset.
    pub token_url: Option<String>,
    pub client_id: String,
    pub scope: String,
    /// Inline client secret; wins over `client_secret_file`.
    pub client_secret: Option<String>,
    pub client_secret_file: PathBuf,

    /// Inline installation id; wins over `installation_id_file`.
    pub installation_id: Option<String>,
    pub installation_id_file: PathBuf,

    /// Host configuration directory (holds `.storage/`).
    pub ha_config_dir: PathBuf,
    /// Base URL used to resolve relative entity pictures.
    pub ha_base_url: String,
    pub ip_lookup_url: String,
    /// Upper bound on an update-install call before answering "in progress".
    pub update_timeout_ms: u64,

    pub debug: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            backup_dir: PathBuf::from("/backup"),
            archive_extension: ARCHIVE_EXTENSION.to_string(),
            poll_interval_secs: 10,
            supervisor_url: "http://supervisor".to_string(),
            supervisor_token: None,
            event_bus_url: "ws://supervisor/core/websocket".to_string(),
            event_type: "hapro_notification".to_string(),
            reconnect_delay_secs: 30,
            api_base: None,
            token_url: None,
            client_id: "hapro_addon".to_string(),
            scope: "hapro_addon".to_string(),
            client_secret: None,
            client_secret_file: PathBuf::from("/usr/bin/client.toml"),
            installation_id: None,
            installation_id_file: PathBuf::from("/homeassistant/.storage/core.uuid"),
            ha_config_dir: PathBuf::from("/homeassistant"),
            ha_base_url: "http://localhost:8123".to_string(),
            ip_lookup_url: "https://ipinfo.io/ip".to_string(),
            update_timeout_ms: 3000,
            debug: false,
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load settings from the YAML file at `path`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<RelayConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(RelayConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `load_at`, treating a missing file as "all defaults".
pub fn load_or_default_at(path: &Path) -> Result<RelayConfig, ConfigError> {
    match load_at(path) {
        Err(ConfigError::ConfigNotFound { .. }) => Ok(RelayConfig::default()),
        other => other,
    }
}

impl RelayConfig {
    /// Overlay environment-style overrides on top of the loaded settings.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("SUPERVISOR_TOKEN") {
            self.supervisor_token = Some(token);
        }
        if let Some(uuid) = get("HAPRO_UUID") {
            self.installation_id = Some(uuid);
        }
        if let Some(url) = get("HAPRO_API_URL") {
            self.api_base = Some(url);
        }
        if let Some(secret) = get("HAPRO_CLIENT_SECRET") {
            self.client_secret = Some(secret);
        }
        if let Some(dir) = get("HAPRO_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(dir);
        }
        if let Some(port) = get("HAPRO_PORT") {
            self.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "HAPRO_PORT",
                message: format!("'{port}' is not a port number"),
            })?;
        }
        if get("DEBUG").as_deref() == Some("*")
            || matches!(get("HAPRO_DEBUG").as_deref(), Some("1") | Some("true"))
        {
            self.debug = true;
        }
        Ok(())
    }

    /// Copy of the settings that is safe to print.
    pub fn redacted(&self) -> RelayConfig {
        let mut copy = self.clone();
        for secret in [&mut copy.supervisor_token, &mut copy.client_secret] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
        copy
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }

    /// External service base URL without a trailing slash.
    pub fn api_base(&self) -> Result<&str, ConfigError> {
        self.api_base
            .as_deref()
            .map(|base| base.trim_end_matches('/'))
            .filter(|base| !base.is_empty())
            .ok_or(ConfigError::Missing("API base URL (HAPRO_API_URL)"))
    }

    pub fn token_url(&self) -> Result<String, ConfigError> {
        match self.token_url.as_deref() {
            Some(url) if !url.is_empty() => Ok(url.to_string()),
            _ => Ok(format!("{}/connect/token", self.api_base()?)),
        }
    }

    /// Client secret for the credentials exchange: inline value, else the
    /// tunnel client's public key from `client_secret_file`.
    pub fn client_secret(&self) -> Result<String, ConfigError> {
        if let Some(secret) = self.client_secret.as_deref().filter(|s| !s.is_empty()) {
            return Ok(secret.to_string());
        }
        read_client_secret(&self.client_secret_file)
    }

    pub fn installation_source(&self) -> InstallationSource {
        InstallationSource {
            fixed: self
                .installation_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(InstallationId::from),
            uuid_file: self.installation_id_file.clone(),
        }
    }

    /// Path of a file under the host's `.storage/` directory.
    pub fn storage_path(&self, name: &str) -> PathBuf {
        self.ha_config_dir.join(".storage").join(name)
    }
}

// ---------------------------------------------------------------------------
// 3. Secrets stored in other artifacts
// ---------------------------------------------------------------------------

/// Read `client.transport.noise.remote_public_key` from a tunnel client TOML.
pub fn read_client_secret(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing("client secret (client_secret_file)"));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let value: toml::Value = toml::from_str(&contents).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    value
        .get("client")
        .and_then(|v| v.get("transport"))
        .and_then(|v| v.get("noise"))
        .and_then(|v| v.get("remote_public_key"))
        .and_then(toml::Value::as_str)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(
            "client.transport.noise.remote_public_key",
        ))
}

/// Where the installation identifier comes from. Resolved on every send so
/// an id written after startup is picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationSource {
    pub fixed: Option<InstallationId>,
    pub uuid_file: PathBuf,
}

#[derive(Deserialize)]
struct CoreUuidFile {
    data: CoreUuidData,
}

#[derive(Deserialize)]
struct CoreUuidData {
    uuid: String,
}

impl InstallationSource {
    pub fn fixed(id: impl Into<InstallationId>) -> Self {
        Self {
            fixed: Some(id.into()),
            uuid_file: PathBuf::new(),
        }
    }

    pub fn resolve(&self) -> Result<InstallationId, ConfigError> {
        if let Some(id) = &self.fixed {
            return Ok(id.clone());
        }
        let path = &self.uuid_file;
        if path.as_os_str().is_empty() || !path.exists() {
            return Err(ConfigError::Missing("installation id (HAPRO_UUID)"));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        parse_core_uuid(&contents, path)
    }
}

/// Parse the host's `core.uuid` storage document (`{"data": {"uuid": …}}`).
pub fn parse_core_uuid(contents: &str, path: &Path) -> Result<InstallationId, ConfigError> {
    let parsed: CoreUuidFile =
        serde_json::from_str(contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    if parsed.data.uuid.trim().is_empty() {
        return Err(ConfigError::Missing("installation id (HAPRO_UUID)"));
    }
    Ok(InstallationId(parsed.data.uuid))
}
