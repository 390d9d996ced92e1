//! Integration tests for the `obdrelay` binary.
//!
//! Argument parsing, help, completions, config and ledger handling, and
//! `probe` against a mock Home Assistant. Nothing here needs NetworkManager.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Command for the `obdrelay` binary with env isolation: config and data
/// directories point into `home`, and `OBDRELAY_*` overrides are cleared.
fn obdrelay_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("obdrelay");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("OBDRELAY_CONFIG", config_file(home))
        .env_remove("OBDRELAY_PROFILE")
        .env_remove("OBDRELAY_URL")
        .env_remove("OBDRELAY_TOKEN")
        .env_remove("OBDRELAY_LEDGER")
        .env_remove("OBDRELAY_OUTPUT")
        .env_remove("OBDRELAY_INSECURE")
        .env_remove("OBDRELAY_TIMEOUT")
        .env_remove("OBDRELAY_DEFAULT_PROFILE")
        .env_remove("RUST_LOG");
    cmd
}

fn config_file(home: &Path) -> PathBuf {
    home.join("obdrelay.toml")
}

fn write_config(home: &Path, body: &str) {
    std::fs::write(config_file(home), body).unwrap();
}

const CAR_PROFILE: &str = r#"
default_profile = "car"

[profiles.car]
url = "http://ha.local:8123"
token = "super-secret-token"
mode = "ssid_in_range"
target_ssid = "HomeNet"
known_keys = ["ENGINE_RPM", "VEHICLE_SPEED"]
"#;

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let output = obdrelay_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_flag() {
    let home = TempDir::new().unwrap();
    obdrelay_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Home Assistant")
                .and(predicate::str::contains("run"))
                .and(predicate::str::contains("probe"))
                .and(predicate::str::contains("ledger")),
        );
}

#[test]
fn test_version_flag() {
    let home = TempDir::new().unwrap();
    obdrelay_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("obdrelay"));
}

#[test]
fn test_unknown_output_format_is_usage_error() {
    let home = TempDir::new().unwrap();
    obdrelay_cmd(home.path())
        .args(["-o", "xml", "config", "path"])
        .assert()
        .code(2);
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let home = TempDir::new().unwrap();
    obdrelay_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("obdrelay"));
}

#[test]
fn test_completions_zsh() {
    let home = TempDir::new().unwrap();
    obdrelay_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_env() {
    let home = TempDir::new().unwrap();
    obdrelay_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("obdrelay.toml"));
}

#[test]
fn test_config_show_redacts_token() {
    let home = TempDir::new().unwrap();
    write_config(home.path(), CAR_PROFILE);

    obdrelay_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("****")
                .and(predicate::str::contains("HomeNet"))
                .and(predicate::str::contains("super-secret-token").not()),
        );
}

#[test]
fn test_config_show_json() {
    let home = TempDir::new().unwrap();
    write_config(home.path(), CAR_PROFILE);

    let output = obdrelay_cmd(home.path())
        .args(["-o", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["default_profile"], "car");
    assert_eq!(json["profiles"]["car"]["token"], "****");
}

#[test]
fn test_config_use_unknown_profile() {
    let home = TempDir::new().unwrap();
    write_config(home.path(), CAR_PROFILE);

    let output = obdrelay_cmd(home.path())
        .args(["config", "use", "boat"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("car"));
}

#[test]
fn test_config_select_keys_from_flag() {
    let home = TempDir::new().unwrap();
    write_config(home.path(), CAR_PROFILE);

    obdrelay_cmd(home.path())
        .args(["config", "select", "--keys", "VEHICLE_SPEED,ENGINE_RPM"])
        .assert()
        .success();

    let saved = std::fs::read_to_string(config_file(home.path())).unwrap();
    assert!(saved.contains("selected_keys"));
    assert!(saved.contains("VEHICLE_SPEED"));
}

#[test]
fn test_config_profiles_marks_default() {
    let home = TempDir::new().unwrap();
    write_config(home.path(), CAR_PROFILE);

    obdrelay_cmd(home.path())
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("car *"));
}

// ── Probe ───────────────────────────────────────────────────────────

#[test]
fn test_probe_without_config() {
    let home = TempDir::new().unwrap();
    let output = obdrelay_cmd(home.path()).arg("probe").output().unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("config init"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_reports_api_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(header("authorization", "Bearer abc123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "API running."})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let uri = server.uri();
    let home_path = home.path().to_owned();
    let output = tokio::task::spawn_blocking(move || {
        obdrelay_cmd(&home_path)
            .args(["--url", &uri, "--token", "abc123", "-o", "json", "probe"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["message"], "API running.");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_rejected_token_exits_with_auth_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let uri = server.uri();
    let home_path = home.path().to_owned();
    let output = tokio::task::spawn_blocking(move || {
        obdrelay_cmd(&home_path)
            .args(["--url", &uri, "--token", "wrong", "probe"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
}

// ── Ledger ──────────────────────────────────────────────────────────

#[test]
fn test_ledger_stats_on_fresh_ledger() {
    let home = TempDir::new().unwrap();
    let ledger = home.path().join("ledger.db");

    let output = obdrelay_cmd(home.path())
        .args(["--ledger", ledger.to_str().unwrap(), "-o", "json", "ledger", "stats"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["total"], 0);
    assert_eq!(json["unsent"], 0);
}

#[test]
fn test_ledger_clear_requires_yes_when_not_interactive() {
    let home = TempDir::new().unwrap();
    let ledger = home.path().join("ledger.db");

    obdrelay_cmd(home.path())
        .args(["--ledger", ledger.to_str().unwrap(), "ledger", "clear"])
        .write_stdin("")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--yes"));

    obdrelay_cmd(home.path())
        .args(["--ledger", ledger.to_str().unwrap(), "-y", "ledger", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 record(s)"));
}

#[test]
fn test_ledger_range_rejects_bad_timestamp() {
    let home = TempDir::new().unwrap();
    let ledger = home.path().join("ledger.db");

    obdrelay_cmd(home.path())
        .args([
            "--ledger",
            ledger.to_str().unwrap(),
            "ledger",
            "range",
            "--from",
            "last tuesday",
        ])
        .assert()
        .code(2);
}

// ── Run ─────────────────────────────────────────────────────────────

#[test]
fn test_run_counts_input_lines() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("samples.jsonl");
    std::fs::write(
        &input,
        "{\"key\":\"ENGINE_RPM\",\"value\":1800}\n\
         {\"key\":\"VEHICLE_SPEED\",\"value\":\"42\"}\n\
         oops\n",
    )
    .unwrap();

    let output = obdrelay_cmd(home.path())
        .args([
            "--url",
            "http://127.0.0.1:9",
            "--token",
            "t",
            "-o",
            "json",
            "run",
            "--no-ledger",
            "--linger",
            "0",
            "--input",
            input.to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["lines"], 3);
    assert_eq!(json["accepted"], 2);
    assert_eq!(json["invalid"], 1);
    assert_eq!(json["interrupted"], false);
}

#[test]
fn test_run_missing_input_file() {
    let home = TempDir::new().unwrap();
    obdrelay_cmd(home.path())
        .args([
            "--url",
            "http://127.0.0.1:9",
            "--token",
            "t",
            "run",
            "--no-ledger",
            "--input",
            "/nonexistent/samples.jsonl",
        ])
        .assert()
        .code(1);
}
