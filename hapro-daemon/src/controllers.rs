//! Controllers behind the route table. Each is a thin pass-through to the
//! supervisor or the host core API.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use axum::body::Bytes;
use axum::http::StatusCode;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use futures::TryFutureExt;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use hapro_client::{fetch_download, BackupCatalog, ClientError, CoreBody, CoreReply};
use hapro_core::BackupSlug;
use hapro_router::{Endpoint, Params};

use crate::error::{io_err, DaemonError};
use crate::server::{ApiReply, AppState};

const ICON_CACHE_CONTROL: &str = "public, max-age=86400";
const DEFAULT_ICON_TYPE: &str = "image/png";
const ARCHIVE_CONTENT_TYPE: &str = "application/x-tar";

const UPDATES_TEMPLATE: &str = r#"
{% set entities = states.update | selectattr('state', 'equalto', 'on') | list %}
{% set skipped = states.update | selectattr('attributes.skipped_version', 'ne', None) | selectattr('state', 'equalto', 'off') | list %}
[
{% for entity in entities + skipped %}
{
"version_current": "{{ entity.attributes.installed_version }}",
"version_latest": "{{ entity.attributes.latest_version }}",
"name": "{{ entity.attributes.friendly_name | replace(' Update', '') }}",
"identifier": "{{ entity.entity_id | replace('update.', '') }}",
"icon": "{{ entity.attributes.entity_picture }}",
"update_running": {{ entity.attributes.in_progress | lower }},
"skipped": {{ entity.attributes.skipped_version is not none | lower }}
}{% if not loop.last %},{% endif %}
{% endfor %}
]
"#;

const PENDING_UPDATES_TEMPLATE: &str =
    "{{ states.update | selectattr('state', 'equalto', 'on') | list | count }}";

const MONITOR_ENTITIES_TEMPLATE: &str = "{{ integration_entities('System Monitor') | tojson }}";

/// Monitor entities whose state is known, i.e. not disabled on the host.
const ENABLED_MONITOR_TEMPLATE: &str = r#"{% set enabled = namespace(entities=[]) %}
{% for entity in integration_entities('System Monitor') %}
{% if states(entity) != "unknown" %}{% set enabled.entities = enabled.entities + [ entity ] %}{% endif %}
{% endfor %}
{{ enabled.entities | tojson }}"#;

/// Statistic names and the sensor-id fragment that identifies each.
const STATISTICS: [(&str, &str); 8] = [
    ("storageUsed", "sensor.system_monitor_disk_use"),
    ("storageFree", "sensor.system_monitor_disk_free"),
    ("storageUsage", "sensor.system_monitor_disk_usage"),
    ("cpuUsage", "sensor.system_monitor_processor_use"),
    ("cpuTemp", "sensor.system_monitor_processor_temperature"),
    ("memoryUsed", "sensor.system_monitor_memory_use"),
    ("memoryFree", "sensor.system_monitor_memory_free"),
    ("memoryUsage", "sensor.system_monitor_memory_usage"),
];

/// Raw request body, for the endpoints that forward one.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub async fn handle(
    state: &AppState,
    endpoint: Endpoint,
    params: &Params,
    upload: Upload,
) -> Result<ApiReply, DaemonError> {
    let update_id = || param(params, "updateId");
    let backup_id = || param(params, "backupId");

    match endpoint {
        Endpoint::Ping => ping(state).await,
        Endpoint::Info => info(state).await,
        Endpoint::Ip => ip(state).await,
        Endpoint::Users => users(state),
        Endpoint::Updates => updates(state).await,
        Endpoint::UpdateIcon => update_icon(state, update_id()?).await,
        Endpoint::UpdateSkip => update_service(state, "skip", update_id()?).await,
        Endpoint::UpdateClear => update_service(state, "clear_skipped", update_id()?).await,
        Endpoint::UpdatePerform => perform_update(state, update_id()?).await,
        Endpoint::StatisticHistory => statistic_history(state, param(params, "entityId")?).await,
        Endpoint::Backups => supervisor_data(state, Method::GET, "/backups".to_string()).await,
        Endpoint::BackupInfo => {
            supervisor_data(state, Method::GET, format!("/backups/{}/info", backup_id()?)).await
        }
        Endpoint::BackupDownload => backup_download(state, backup_id()?).await,
        Endpoint::BackupUpload => backup_upload(state, upload).await,
        Endpoint::BackupDelete => {
            supervisor_data(state, Method::DELETE, format!("/backups/{}", backup_id()?)).await
        }
        Endpoint::BackupRestore => {
            let path = format!("/backups/{}/restore/full", backup_id()?);
            supervisor_data(state, Method::POST, path).await
        }
        Endpoint::BackupStatus => backup_status(state, backup_id()?).await,
        Endpoint::SystemMonitorEnable
        | Endpoint::SystemMonitorEnableEntities
        | Endpoint::FileUpload => Ok(ApiReply::status(StatusCode::NOT_IMPLEMENTED)),
    }
}

fn param<'a>(params: &'a Params, name: &'static str) -> Result<&'a str, DaemonError> {
    params
        .get(name)
        .ok_or_else(|| DaemonError::Protocol(format!("route did not capture {name}")))
}

// ---------------------------------------------------------------------------
// Info
// ---------------------------------------------------------------------------

async fn ping(state: &AppState) -> Result<ApiReply, DaemonError> {
    let body = state.supervisor.get_json("/supervisor/ping").await?;
    Ok(ApiReply::Json {
        status: StatusCode::OK,
        body,
    })
}

async fn info(state: &AppState) -> Result<ApiReply, DaemonError> {
    let (core, updates, host, entities) = tokio::try_join!(
        state.supervisor.get_json("/core/info").err_into::<DaemonError>(),
        render_template(state, PENDING_UPDATES_TEMPLATE).err_into::<DaemonError>(),
        state.supervisor.get_json("/host/info").err_into::<DaemonError>(),
        monitor_entities(state),
    )?;
    let core = &core["data"];
    let updates = match updates {
        CoreBody::Json(value) => value,
        CoreBody::Text(text) => text
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
    };

    let host = &host["data"];
    let fallback = |name: &str| match name {
        "storageUsed" => Some(host["disk_used"].clone()),
        "storageFree" => Some(host["disk_free"].clone()),
        _ => None,
    };
    let mut stats = Statistics::default();
    let mut warnings = Vec::new();

    match entities {
        None => {
            warnings.push("System Monitor Integration is disabled".to_string());
            for (name, _) in STATISTICS {
                let value = match fallback(name) {
                    Some(value) => {
                        warnings.push(format!("Using alternative value for {name}"));
                        value
                    }
                    None => Value::Null,
                };
                stats.insert(name, value);
            }
        }
        Some(entities) => {
            let enabled = entity_list(state, ENABLED_MONITOR_TEMPLATE).await?;
            for (name, fragment) in STATISTICS {
                let sensor = sensor_for(&entities, fragment)
                    .filter(|sensor| enabled.iter().any(|e| e.as_str() == *sensor));
                let value = match (sensor, fallback(name)) {
                    (Some(sensor), _) => sensor_reading(state, sensor).await?,
                    (None, Some(value)) => {
                        warnings.push(format!(
                            "Statistic {name} is not enabled, using alternative value"
                        ));
                        value
                    }
                    (None, None) => {
                        warnings.push(format!(
                            "Statistic {name} is not enabled, and no alternative value is available"
                        ));
                        Value::Null
                    }
                };
                stats.insert(name, value);
            }
        }
    }

    let data = json!({
        "machine": core["machine"],
        "haVersion": core["version"],
        "updates": updates,
        "storage": stats.storage(),
        "cpu": {
            "usage": stats.get("cpuUsage"),
            "temperature": stats.get("cpuTemp"),
        },
        "memory": stats.memory(),
    });
    Ok(ApiReply::Json {
        status: StatusCode::OK,
        body: json!({ "StatusCode": 200, "data": data, "Warnings": warnings }),
    })
}

async fn ip(state: &AppState) -> Result<ApiReply, DaemonError> {
    let download = fetch_download(state.supervisor.http(), &state.config.ip_lookup_url).await?;
    let text = String::from_utf8_lossy(&download.bytes).into_owned();
    Ok(ApiReply::ok(Value::String(text)))
}

#[derive(Deserialize)]
struct AuthStorage {
    data: AuthData,
}

#[derive(Deserialize)]
struct AuthData {
    #[serde(default)]
    users: Vec<AuthUser>,
}

#[derive(Deserialize)]
struct AuthUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_owner: bool,
    #[serde(default)]
    is_active: bool,
    #[serde(default)]
    system_generated: bool,
    #[serde(default)]
    group_ids: Vec<String>,
}

fn users(state: &AppState) -> Result<ApiReply, DaemonError> {
    let path = state.config.storage_path("auth");
    let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let storage: AuthStorage = serde_json::from_str(&contents)?;
    let users: Vec<Value> = storage
        .data
        .users
        .into_iter()
        .filter(|user| !user.system_generated)
        .map(|user| {
            json!({
                "name": user.name,
                "isOwner": user.is_owner,
                "isAdmin": user.group_ids.iter().any(|g| g == "system-admin"),
                "isActivated": user.is_active,
            })
        })
        .collect();
    Ok(ApiReply::ok(Value::Array(users)))
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

async fn render_template(state: &AppState, template: &str) -> Result<CoreBody, ClientError> {
    let reply = state
        .supervisor
        .core_api(Method::POST, "/template", Some(&json!({ "template": template })))
        .await?;
    Ok(reply.body)
}

async fn updates(state: &AppState) -> Result<ApiReply, DaemonError> {
    let list = match render_template(state, UPDATES_TEMPLATE).await? {
        CoreBody::Json(value) => value,
        CoreBody::Text(text) => serde_json::from_str(&text)?,
    };
    Ok(ApiReply::ok(list))
}

async fn update_icon(state: &AppState, update_id: &str) -> Result<ApiReply, DaemonError> {
    let template = format!(
        "{{% set entity = states.update | selectattr('entity_id', 'search', 'update.{update_id}', ignorecase=True) | first %}}\n{{{{ entity.attributes.entity_picture }}}}"
    );
    let picture = match render_template(state, &template).await? {
        CoreBody::Text(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => return Ok(ApiReply::status(StatusCode::NOT_FOUND)),
    };
    let url = if picture.starts_with("http://") || picture.starts_with("https://") {
        picture
    } else {
        format!("{}{picture}", state.config.ha_base_url.trim_end_matches('/'))
    };

    let icon = fetch_download(state.supervisor.http(), &url).await?;
    Ok(ApiReply::Bytes {
        content_type: icon
            .content_type
            .unwrap_or_else(|| DEFAULT_ICON_TYPE.to_string()),
        cache_control: Some(ICON_CACHE_CONTROL),
        disposition: None,
        body: icon.bytes,
    })
}

/// Map a core service reply: an empty body or a 400 is a bad request.
fn service_reply(reply: CoreReply) -> ApiReply {
    let rejected = match &reply.body {
        CoreBody::Text(text) => text.trim().is_empty() || text.contains("400 Bad Request"),
        CoreBody::Json(Value::Null) => true,
        CoreBody::Json(_) => false,
    };
    if rejected || reply.status == StatusCode::BAD_REQUEST.as_u16() {
        return ApiReply::status(StatusCode::BAD_REQUEST);
    }
    if !reply.is_success() {
        warn!(status = reply.status, "core service call failed");
        return ApiReply::status(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let result = match reply.body {
        CoreBody::Json(value) => value,
        CoreBody::Text(text) => Value::String(text),
    };
    ApiReply::Json {
        status: StatusCode::OK,
        body: json!({ "StatusCode": 200, "result": result }),
    }
}

fn update_entity(update_id: &str) -> Value {
    json!({ "entity_id": format!("update.{update_id}") })
}

async fn update_service(
    state: &AppState,
    service: &str,
    update_id: &str,
) -> Result<ApiReply, DaemonError> {
    let reply = state
        .supervisor
        .core_api(
            Method::POST,
            &format!("/services/update/{service}"),
            Some(&update_entity(update_id)),
        )
        .await?;
    Ok(service_reply(reply))
}

/// Installing can outlast the client's patience; past the timeout the
/// install keeps running on the host and the caller is told so.
async fn perform_update(state: &AppState, update_id: &str) -> Result<ApiReply, DaemonError> {
    let limit = state.config.update_timeout();
    let result = state
        .supervisor
        .core_api_within(
            limit,
            Method::POST,
            "/services/update/install",
            Some(&update_entity(update_id)),
        )
        .await;
    match result {
        Ok(reply) => Ok(service_reply(reply)),
        Err(ClientError::Timeout(_)) => {
            info!(update = update_id, "update install still running");
            Ok(ApiReply::message(StatusCode::OK, "Update in progress"))
        }
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ConfigEntries {
    data: ConfigEntriesData,
}

#[derive(Deserialize)]
struct ConfigEntriesData {
    #[serde(default)]
    entries: Vec<ConfigEntry>,
}

#[derive(Deserialize)]
struct ConfigEntry {
    domain: String,
    #[serde(default)]
    disabled_by: Option<Value>,
}

/// Readings keyed by statistic name.
#[derive(Debug, Default)]
struct Statistics(BTreeMap<&'static str, Value>);

impl Statistics {
    fn insert(&mut self, name: &'static str, value: Value) {
        self.0.insert(name, value);
    }

    fn get(&self, name: &str) -> Value {
        self.0.get(name).cloned().unwrap_or(Value::Null)
    }

    fn storage(&self) -> Value {
        let used = self.get("storageUsed");
        let free = self.get("storageFree");
        let total = sum(&used, &free);
        let usage = match self.get("storageUsage") {
            Value::Null => match (used.as_f64(), total.as_f64()) {
                (Some(used), Some(total)) if total > 0.0 => Value::from(used / total * 100.0),
                _ => Value::Null,
            },
            usage => usage,
        };
        json!({ "total": total, "used": used, "free": free, "usage": usage })
    }

    fn memory(&self) -> Value {
        let used = self.get("memoryUsed");
        let free = self.get("memoryFree");
        json!({
            "total": sum(&used, &free),
            "used": used,
            "free": free,
            "usage": self.get("memoryUsage"),
        })
    }
}

fn sum(a: &Value, b: &Value) -> Value {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => Value::from(a + b),
        _ => Value::Null,
    }
}

async fn entity_list(state: &AppState, template: &str) -> Result<Vec<String>, DaemonError> {
    Ok(match render_template(state, template).await? {
        CoreBody::Json(value) => serde_json::from_value(value)?,
        CoreBody::Text(text) => serde_json::from_str(&text)?,
    })
}

/// True when the integration's config entry exists and was switched off. An
/// absent entries file means the host never configured it.
fn monitor_entry_disabled(state: &AppState) -> Result<bool, DaemonError> {
    let path = state.config.storage_path("core.config_entries");
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config entries file");
            return Ok(false);
        }
        Err(err) => return Err(io_err(&path, err)),
    };
    let entries: ConfigEntries = serde_json::from_str(&contents)?;
    Ok(entries
        .data
        .entries
        .iter()
        .any(|entry| entry.domain == "systemmonitor" && entry.disabled_by.is_some()))
}

/// System Monitor entities, or `None` when the integration is disabled or
/// has no entities.
async fn monitor_entities(state: &AppState) -> Result<Option<Vec<String>>, DaemonError> {
    if monitor_entry_disabled(state)? {
        return Ok(None);
    }
    let entities = entity_list(state, MONITOR_ENTITIES_TEMPLATE).await?;
    Ok((!entities.is_empty()).then_some(entities))
}

fn sensor_for<'a>(entities: &'a [String], fragment: &str) -> Option<&'a str> {
    entities
        .iter()
        .find(|entity| entity.contains(fragment))
        .map(String::as_str)
}

/// Current numeric state of a sensor; unreadable states are `null`.
async fn sensor_reading(state: &AppState, sensor: &str) -> Result<Value, DaemonError> {
    let reply = state
        .supervisor
        .core_api(Method::GET, &format!("/states/{sensor}"), None)
        .await?;
    if !reply.is_success() {
        warn!(%sensor, status = reply.status, "sensor state unavailable");
        return Ok(Value::Null);
    }
    let reading = match reply.body {
        CoreBody::Json(body) => body["state"]
            .as_str()
            .and_then(|raw| raw.trim().parse::<f64>().ok()),
        CoreBody::Text(_) => None,
    };
    Ok(reading.map(Value::from).unwrap_or(Value::Null))
}

async fn statistic_history(state: &AppState, statistic: &str) -> Result<ApiReply, DaemonError> {
    let Some(entities) = monitor_entities(state).await? else {
        return Ok(ApiReply::message(
            StatusCode::BAD_REQUEST,
            "System Monitor Integration is disabled",
        ));
    };
    let Some((_, fragment)) = STATISTICS.iter().find(|(name, _)| *name == statistic) else {
        return Ok(ApiReply::message(StatusCode::BAD_REQUEST, "Invalid Statistic"));
    };
    let enabled = entity_list(state, ENABLED_MONITOR_TEMPLATE).await?;
    let Some(entity) =
        sensor_for(&entities, fragment).filter(|e| enabled.iter().any(|x| x.as_str() == *e))
    else {
        return Ok(ApiReply::message(
            StatusCode::BAD_REQUEST,
            "Statistic is not enabled",
        ));
    };

    let since = (Utc::now() - ChronoDuration::hours(1)).to_rfc3339_opts(SecondsFormat::Millis, true);
    let path = format!(
        "/history/period/{since}?filter_entity_id={entity}&minimal_response&no_attributes&significant_changes_only"
    );
    debug!(statistic, %entity, "fetching statistic history");
    let reply = state.supervisor.core_api(Method::GET, &path, None).await?;
    let data = match reply.body {
        CoreBody::Json(value) => value,
        CoreBody::Text(text) => Value::String(text),
    };
    Ok(ApiReply::ok(data))
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

/// Supervisor call answered as `{StatusCode: 200, data}`, unwrapping the
/// supervisor's own `{result, data}` envelope.
async fn supervisor_data(
    state: &AppState,
    method: Method,
    path: String,
) -> Result<ApiReply, DaemonError> {
    let body = state.supervisor.send_json(method, &path, None).await?;
    Ok(ApiReply::ok(unwrap_envelope(body)))
}

fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

async fn backup_download(state: &AppState, slug: &str) -> Result<ApiReply, DaemonError> {
    let archive = state
        .supervisor
        .get_bytes(&format!("/backups/{slug}/download"))
        .await?;
    Ok(ApiReply::Bytes {
        content_type: archive
            .content_type
            .unwrap_or_else(|| ARCHIVE_CONTENT_TYPE.to_string()),
        cache_control: None,
        disposition: Some(format!("attachment; filename=\"{slug}.tar\"")),
        body: archive.bytes,
    })
}

async fn backup_upload(state: &AppState, upload: Upload) -> Result<ApiReply, DaemonError> {
    let body = state
        .supervisor
        .forward(
            Method::POST,
            "/backups/new/upload",
            upload.content_type.as_deref(),
            upload.body.to_vec(),
        )
        .await?;
    Ok(ApiReply::ok(unwrap_envelope(body)))
}

/// Completed means the backend lists the slug, the same check the
/// completion poller runs.
async fn backup_status(state: &AppState, slug: &str) -> Result<ApiReply, DaemonError> {
    let slug = BackupSlug::from(slug);
    let completed = state.supervisor.contains(&slug).await?;
    Ok(ApiReply::ok(json!({ "slug": slug, "completed": completed })))
}
