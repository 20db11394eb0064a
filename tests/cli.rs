//! Integration tests for the npcspawn binary
//!
//! These run the compiled binary with an explicit config file so nothing from
//! the developer's environment leaks in. Backends are local wiremock servers.

use assert_cmd::assert::OutputAssertExt;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn npcspawn_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("npcspawn"));
    cmd.current_dir(dir);
    cmd.env_remove("NPCSPAWN_HOME");
    cmd.env_remove("RUST_LOG");
    cmd.stdin(Stdio::null());
    cmd
}

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, content).unwrap();
    config_path
}

fn config_for_server(server_uri: &str) -> String {
    format!(
        r#"
[defaults]
timeout_secs = 10

[default_backend]
name = "local"
kind = "openai"
base_url = "{server_uri}/v1/chat/completions"
model = "local-model"
"#
    )
}

const ROUTED_CONFIG: &str = r#"
[default_backend]
name = "local"
base_url = "http://localhost:5001/v1/chat/completions"

[[profiles]]
name = "claude-fast"
kind = "anthropic"
model = "claude-haiku"
api_key_env = "ANTHROPIC_API_KEY"

[[profiles]]
name = "router"
model = "mistral-small"

[tiers]
major = ["claude-fast", "router"]
minor = []
"#;

/// Run the binary off the async runtime so the mock server keeps serving.
async fn run_blocking(mut cmd: Command) -> Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

#[test]
fn version_output() {
    let dir = TempDir::new().unwrap();
    npcspawn_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("npcspawn"));
}

#[test]
fn chains_lists_each_tier_in_order() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, ROUTED_CONFIG);

    npcspawn_cmd(dir.path())
        .args(["chains", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("major: claude-fast -> router"))
        .stdout(predicate::str::contains("minor: (default: local)"));
}

#[test]
fn chains_json_output() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, ROUTED_CONFIG);

    let output = npcspawn_cmd(dir.path())
        .args(["chains", "--json", "--config"])
        .arg(&config_path)
        .output()
        .unwrap();

    assert!(output.status.success());
    let parsed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["default_backend"], "local");
    assert_eq!(parsed["tiers"]["major"], json!(["claude-fast", "router"]));
}

#[test]
fn invalid_config_exits_with_config_code() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(
        &dir,
        r#"
[rate_limit]
base_delay_secs = 10
max_delay_secs = 1
"#,
    );

    npcspawn_cmd(dir.path())
        .args(["chains", "--config"])
        .arg(&config_path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_delay_secs"));
}

#[test]
fn missing_config_file_exits_with_config_code() {
    let dir = TempDir::new().unwrap();

    npcspawn_cmd(dir.path())
        .args(["chains", "--config", "does-not-exist.toml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn spawn_without_targets_prints_nothing() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, ROUTED_CONFIG);

    npcspawn_cmd(dir.path())
        .args(["spawn", "The door bursts open", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn spawn_rejects_control_characters_in_names() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, ROUTED_CONFIG);

    npcspawn_cmd(dir.path())
        .args(["spawn", "The door bursts open", "-t", "Ali\nce", "--config"])
        .arg(&config_path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not valid"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_prints_summary_in_input_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "looks up sharply."}}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, &config_for_server(&server.uri()));

    let mut cmd = npcspawn_cmd(dir.path());
    cmd.args(["spawn", "The door bursts open", "-t", "Alice", "-t", "Bob", "--config"])
        .arg(&config_path);
    let output = run_blocking(cmd).await;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).unwrap();
    let alice = stdout.find("Alice: looks up sharply.").unwrap();
    let bob = stdout.find("Bob: looks up sharply.").unwrap();
    assert!(alice < bob);
    assert!(stdout.contains("2/2 succeeded, 0 failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_json_reports_outcomes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "\"Who goes there?\""}}]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, &config_for_server(&server.uri()));

    let mut cmd = npcspawn_cmd(dir.path());
    cmd.args([
        "spawn",
        "Footsteps in the hall",
        "-t",
        "Guard",
        "--format",
        "dialogue",
        "--json",
        "--config",
    ])
    .arg(&config_path);
    let output = run_blocking(cmd).await;

    assert!(output.status.success());
    let parsed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["state"], "completed");
    assert_eq!(parsed["stats"]["success"], 1);
    assert_eq!(parsed["outcomes"][0]["target_name"], "Guard");
    assert_eq!(parsed["outcomes"][0]["outcome"]["status"], "success");
    assert_eq!(parsed["outcomes"][0]["profile_used"], "local");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_exits_all_failed_when_every_target_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "overloaded"}})),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, &config_for_server(&server.uri()));

    let mut cmd = npcspawn_cmd(dir.path());
    cmd.args(["spawn", "The roof caves in", "-t", "Alice", "-t", "Bob", "--config"])
        .arg(&config_path);
    let output = run_blocking(cmd).await;

    assert_eq!(output.status.code(), Some(3));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Alice: failed"));
    assert!(stdout.contains("0/2 succeeded, 2 failed"));
}
