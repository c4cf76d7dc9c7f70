//! Config loading, environment overlay, and secret-resolution tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use assert_fs::prelude::*;
use hapro_core::{
    config::{self, parse_core_uuid, read_client_secret},
    ConfigError, InstallationId, InstallationSource, RelayConfig,
};
use rstest::rstest;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(&dir.path().join("relay.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("relay.yaml"));
}

#[test]
fn load_or_default_falls_back_to_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let cfg = config::load_or_default_at(&dir.path().join("relay.yaml")).expect("defaults");
    assert_eq!(cfg, RelayConfig::default());
    assert_eq!(cfg.port, 3000);
    assert_eq!(cfg.poll_interval(), Duration::from_secs(10));
    assert_eq!(cfg.reconnect_delay(), Duration::from_secs(30));
    assert_eq!(cfg.update_timeout(), Duration::from_millis(3000));
    assert_eq!(cfg.event_type, "hapro_notification");
}

#[test]
fn partial_yaml_keeps_remaining_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("relay.yaml");
    file.write_str("port: 8099\nbackup_dir: /srv/backups\napi_base: https://relay.example\n")
        .expect("write");

    let cfg = config::load_at(file.path()).expect("load");
    assert_eq!(cfg.port, 8099);
    assert_eq!(cfg.backup_dir, PathBuf::from("/srv/backups"));
    assert_eq!(cfg.archive_extension, ".tar");
    assert_eq!(cfg.listen_addr(), "0.0.0.0:8099");
    assert_eq!(
        cfg.token_url().expect("token url"),
        "https://relay.example/connect/token"
    );
}

#[test]
fn empty_file_is_all_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("relay.yaml");
    file.write_str("   \n").expect("write");
    assert_eq!(config::load_at(file.path()).expect("load"), RelayConfig::default());
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("relay.yaml");
    file.write_str("port: [unclosed").expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("relay.yaml"));
}

// ---------------------------------------------------------------------------
// 2. Environment overlay
// ---------------------------------------------------------------------------

#[test]
fn env_overrides_file_values() {
    let mut cfg = RelayConfig {
        api_base: Some("https://from-file".to_string()),
        ..RelayConfig::default()
    };
    cfg.apply_env(env(&[
        ("SUPERVISOR_TOKEN", "sup-token"),
        ("HAPRO_UUID", "uuid-from-env"),
        ("HAPRO_API_URL", "https://from-env/"),
        ("HAPRO_PORT", "4000"),
    ]))
    .expect("apply env");

    assert_eq!(cfg.supervisor_token.as_deref(), Some("sup-token"));
    assert_eq!(cfg.port, 4000);
    assert_eq!(cfg.api_base().expect("api base"), "https://from-env");
    assert_eq!(
        cfg.installation_source().resolve().expect("id"),
        InstallationId::from("uuid-from-env")
    );
}

#[test]
fn blank_env_values_are_ignored() {
    let mut cfg = RelayConfig::default();
    cfg.apply_env(env(&[("HAPRO_API_URL", "  ")])).expect("apply env");
    assert!(matches!(cfg.api_base(), Err(ConfigError::Missing(_))));
}

#[test]
fn invalid_port_is_rejected() {
    let mut cfg = RelayConfig::default();
    let err = cfg.apply_env(env(&[("HAPRO_PORT", "http")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "HAPRO_PORT", .. }));
}

#[rstest]
#[case(&[("DEBUG", "*")], true)]
#[case(&[("HAPRO_DEBUG", "1")], true)]
#[case(&[("DEBUG", "hapro")], false)]
#[case(&[], false)]
fn debug_flag_from_env(#[case] pairs: &[(&str, &str)], #[case] expected: bool) {
    let mut cfg = RelayConfig::default();
    cfg.apply_env(env(pairs)).expect("apply env");
    assert_eq!(cfg.debug, expected);
}

#[test]
fn redacted_hides_secrets_only() {
    let cfg = RelayConfig {
        supervisor_token: Some("sup".to_string()),
        client_secret: Some("secret".to_string()),
        ..RelayConfig::default()
    };
    let shown = cfg.redacted();
    let yaml = shown.to_yaml().expect("yaml");
    assert!(!yaml.contains("secret\n"));
    assert!(!yaml.contains("sup\n"));
    assert_eq!(shown.port, cfg.port);
    assert_eq!(RelayConfig::default().redacted().supervisor_token, None);
}

// ---------------------------------------------------------------------------
// 3. Secrets in other artifacts
// ---------------------------------------------------------------------------

#[test]
fn client_secret_read_from_tunnel_toml() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("client.toml");
    file.write_str(
        "[client]\nremote_addr = \"relay:2333\"\n\n[client.transport]\ntype = \"noise\"\n\n[client.transport.noise]\nremote_public_key = \"pk-123\"\n",
    )
    .expect("write");

    assert_eq!(read_client_secret(file.path()).expect("secret"), "pk-123");

    let cfg = RelayConfig {
        client_secret_file: file.path().to_path_buf(),
        ..RelayConfig::default()
    };
    assert_eq!(cfg.client_secret().expect("secret"), "pk-123");
}

#[test]
fn inline_client_secret_wins_over_file() {
    let cfg = RelayConfig {
        client_secret: Some("inline".to_string()),
        client_secret_file: PathBuf::from("/nonexistent/client.toml"),
        ..RelayConfig::default()
    };
    assert_eq!(cfg.client_secret().expect("secret"), "inline");
}

#[test]
fn client_toml_without_key_is_missing() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("client.toml");
    file.write_str("[client]\nremote_addr = \"relay:2333\"\n").expect("write");
    assert!(matches!(
        read_client_secret(file.path()),
        Err(ConfigError::Missing(_))
    ));
}

#[test]
fn installation_id_read_from_core_uuid_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("core.uuid");
    file.write_str(r#"{"version":1,"key":"core.uuid","data":{"uuid":"0f1e2d3c"}}"#)
        .expect("write");

    let source = InstallationSource {
        fixed: None,
        uuid_file: file.path().to_path_buf(),
    };
    assert_eq!(source.resolve().expect("id"), InstallationId::from("0f1e2d3c"));
}

#[test]
fn missing_core_uuid_file_is_missing_id() {
    let source = InstallationSource {
        fixed: None,
        uuid_file: PathBuf::from("/nonexistent/core.uuid"),
    };
    assert!(matches!(source.resolve(), Err(ConfigError::Missing(_))));
}

#[test]
fn malformed_core_uuid_is_json_error() {
    let err = parse_core_uuid("{\"data\":{}}", &PathBuf::from("core.uuid")).unwrap_err();
    assert!(matches!(err, ConfigError::Json { .. }), "got: {err}");
}
