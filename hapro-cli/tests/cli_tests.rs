use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

const RELAY_ENV: &[&str] = &[
    "HAPRO_CONFIG",
    "SUPERVISOR_TOKEN",
    "HAPRO_UUID",
    "HAPRO_API_URL",
    "HAPRO_CLIENT_SECRET",
    "HAPRO_BACKUP_DIR",
    "HAPRO_PORT",
    "HAPRO_DEBUG",
    "DEBUG",
];

/// `hapro <subcommand> --config <path>` with a clean relay environment.
fn hapro_cmd(subcommand: &str, config: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("hapro"));
    for key in RELAY_ENV {
        cmd.env_remove(key);
    }
    cmd.env("NO_COLOR", "1");
    cmd.arg(subcommand).arg("--config").arg(config);
    cmd
}

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("relay.yaml");
    std::fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn routes_lists_every_endpoint_in_match_order() {
    let assert = Command::new(assert_cmd::cargo::cargo_bin!("hapro"))
        .arg("routes")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");

    assert!(stdout.contains("20 routes"), "{stdout}");
    for needle in [
        "/updates/:updateId/icon",
        "update_perform",
        "/statistic/history/:entityId",
        "DELETE",
        "backup_status",
    ] {
        assert!(stdout.contains(needle), "missing {needle} in:\n{stdout}");
    }
    let skip = stdout.find("/updates/:updateId/skip").expect("skip row");
    let perform = stdout.find("update_perform").expect("perform row");
    assert!(skip < perform, "specific update routes must precede the install route");
}

#[test]
fn config_prints_redacted_yaml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "port: 4100\nclient_secret: hunter2\nsupervisor_token: sv-token-xyz\n",
    );

    hapro_cmd("config", &path)
        .assert()
        .success()
        .stdout(predicate::str::contains("port: 4100"))
        .stdout(predicate::str::contains("hunter2").not())
        .stdout(predicate::str::contains("sv-token-xyz").not());
}

#[test]
fn environment_overrides_file_settings() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "port: 4100\nbackup_dir: /srv/backup\n");

    let assert = hapro_cmd("config", &path)
        .arg("--json")
        .env("HAPRO_PORT", "4200")
        .env("HAPRO_UUID", "0123abcd")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("config json");

    assert_eq!(value["port"], 4200);
    assert_eq!(value["backup_dir"], "/srv/backup");
    assert_eq!(value["installation_id"], "0123abcd");
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();

    hapro_cmd("config", &dir.path().join("absent.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("port: 3000"));
}

#[test]
fn malformed_config_is_reported_with_its_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "port: [not a number\n");

    hapro_cmd("config", &path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("relay.yaml"));
}

#[test]
fn bad_port_override_fails() {
    let dir = TempDir::new().unwrap();

    hapro_cmd("config", &dir.path().join("absent.yaml"))
        .env("HAPRO_PORT", "ninety")
        .assert()
        .failure()
        .stderr(predicate::str::contains("HAPRO_PORT"));
}

#[test]
fn token_requires_an_api_base() {
    let dir = TempDir::new().unwrap();

    hapro_cmd("token", &dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("no token endpoint configured"));
}
