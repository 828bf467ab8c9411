//! End-to-end CLI tests for the harvester binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

/// Binary isolated from the user's config and environment, using a temp database.
fn harvester(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("xdg"))
        .env_remove("HARVESTER_DB_PATH")
        .env_remove("HARVESTER_SEARCH_API_URL")
        .env_remove("HARVESTER_SEARCH_API_KEY")
        .env_remove("HARVESTER_SEARCH_MODEL")
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(dir.path().join("harvester.db"));
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_binary_without_subcommand_prints_help() {
    let dir = TempDir::new().unwrap();
    harvester(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("task"));
}

#[test]
fn test_binary_version_displays_version() {
    Command::cargo_bin("harvester")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvester"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    Command::cargo_bin("harvester")
        .unwrap()
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_task_lifecycle_via_cli() {
    let dir = TempDir::new().unwrap();

    harvester(&dir)
        .args(["task", "add", "solar", "--prompt", "solar news", "--schedule", "daily"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Task:        solar"));

    harvester(&dir)
        .args(["task", "add", "solar", "--prompt", "again"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task already exists: solar"));

    harvester(&dir)
        .args(["task", "disable", "solar"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Active:      no"));

    let active = json_stdout(harvester(&dir).args(["task", "list"]));
    assert_eq!(active, Value::Array(vec![]));

    let all = json_stdout(harvester(&dir).args(["task", "list", "--all"]));
    assert_eq!(all[0]["task_name"], "solar");
    assert_eq!(all[0]["schedule"], "daily");
    assert_eq!(all[0]["is_active"], false);

    let shown = json_stdout(harvester(&dir).args(["task", "enable", "solar"]));
    assert_eq!(shown["is_active"], true);
}

#[test]
fn test_run_inactive_task_fails_without_network() {
    let dir = TempDir::new().unwrap();
    harvester(&dir)
        .args(["task", "add", "paused", "--prompt", "p", "--inactive"])
        .assert()
        .success();

    harvester(&dir)
        .args(["run", "paused"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task is inactive: paused"));

    harvester(&dir)
        .args(["run", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task not found: missing"));
}

#[test]
fn test_stats_stuck_and_process_on_empty_database() {
    let dir = TempDir::new().unwrap();

    let stats = json_stdout(harvester(&dir).arg("stats"));
    assert_eq!(stats["links"]["total"], 0);
    assert_eq!(stats["tasks"]["active"], 0);

    harvester(&dir)
        .arg("stuck")
        .assert()
        .success()
        .stdout(predicate::str::contains("No links."));

    let processed = json_stdout(harvester(&dir).args(["process", "--limit", "5"]));
    assert_eq!(processed["total"], 0);
    assert_eq!(processed["skipped"], 0);
}

#[test]
fn test_show_missing_link_fails() {
    let dir = TempDir::new().unwrap();
    harvester(&dir)
        .args(["show", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Link 42 not found"));
}

#[test]
fn test_explicit_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    harvester(&dir)
        .args(["--config", "/nonexistent/harvester.toml", "stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn test_invalid_config_value_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "[processing]\nconcurrency = 0\n").unwrap();

    harvester(&dir)
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("processing.concurrency"));
}

fn write_provider_config(dir: &Path, api_url: &str) -> std::path::PathBuf {
    let config = dir.join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[discovery]\napi_url = \"{api_url}\"\nmodel = \"test-model\"\nrequest_timeout_secs = 5\n"
        ),
    )
    .unwrap();
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_registers_links_from_provider() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content":
                "[\"http://a.com/1\", \"http://a.com/1?utm_source=x\", \"http://b.com/2\", \"not a url\"]"
            }}]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = write_provider_config(dir.path(), &format!("{}/v1/chat/completions", server.uri()));

    harvester(&dir)
        .arg("--config")
        .arg(&config)
        .args(["task", "add", "demo", "--prompt", "demo links"])
        .assert()
        .success();

    let report = json_stdout(
        harvester(&dir)
            .arg("--config")
            .arg(&config)
            .args(["run", "demo", "--no-process"]),
    );
    assert_eq!(report["total_found"], 4);
    assert_eq!(report["new_links"], 2);
    assert_eq!(report["duplicates"], 1);
    assert_eq!(report["invalid"], 1);
    assert!(report.get("processing").is_none());

    let link_id = report["links"][0]["id"].as_i64().unwrap();
    let detail = json_stdout(harvester(&dir).args(["show", &link_id.to_string()]));
    assert_eq!(detail["link"]["url"], "http://a.com/1");
    assert_eq!(detail["link"]["status"], "pending");
    assert_eq!(detail["link"]["source_task"], "demo");
    assert!(detail["content"].is_null());

    let stats = json_stdout(harvester(&dir).arg("stats"));
    assert_eq!(stats["links"]["pending"], 2);
}
