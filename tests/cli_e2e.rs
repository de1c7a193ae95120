//! End-to-end CLI tests for the recipe-pipeline binary.
#![allow(deprecated)]

mod support;

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use support::mock_http::mock_backend;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn binary(config_home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("recipe-pipeline").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("TELEGRAPH_ACCESS_TOKEN")
        .env_remove("GOOGLE_API_KEY");
    cmd
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

// ==================== Argument Tests ====================

#[test]
fn test_binary_help_displays_usage() {
    let dir = TempDir::new().unwrap();
    binary(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Turn saved Instagram recipe posts"))
        .stdout(predicate::str::contains("--reset-failed"));
}

#[test]
fn test_binary_version_displays_name() {
    let dir = TempDir::new().unwrap();
    binary(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("recipe-pipeline"));
}

#[test]
fn test_binary_rejects_out_of_range_concurrency() {
    let dir = TempDir::new().unwrap();
    binary(dir.path())
        .args(["-c", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_without_extractor_exits_with_failure() {
    let dir = TempDir::new().unwrap();
    binary(dir.path())
        .args(["--input", "posts.json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no extractor backend configured"))
        .stderr(predicate::str::contains("Suggestion"));
}

#[test]
fn test_binary_explicit_missing_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    binary(dir.path())
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nope.toml"));
}

// ==================== Checkpoint Command Tests ====================

#[test]
fn test_status_without_checkpoint_shows_zero_counts() {
    let dir = TempDir::new().unwrap();
    let checkpoint = dir.path().join("progress.json");
    binary(dir.path())
        .arg("--status")
        .arg("--checkpoint")
        .arg(&checkpoint)
        .assert()
        .success()
        .stdout(predicate::str::contains("progress.json"))
        .stdout(predicate::str::contains("total:           0"));
}

#[test]
fn test_reset_unknown_record_fails() {
    let dir = TempDir::new().unwrap();
    binary(dir.path())
        .args(["--reset", "MISSING"])
        .arg("--checkpoint")
        .arg(dir.path().join("progress.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("MISSING"));
}

// ==================== Full Run Tests ====================

const RECIPE_REPLY: &str = r#"{"title": "Tomato Soup", "ingredients": [{"ingredients": [{"name": "Tomatoes", "quantity": "4"}]}], "steps": ["Simmer."]}"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_full_run_publishes_and_logs_failures_then_resumes() {
    let Some(server) = mock_backend().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "role": "assistant", "content": RECIPE_REPLY }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/createPage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "url": "https://telegra.ph/Tomato-Soup-10-17", "path": "Tomato-Soup-10-17" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let input = dir.path().join("posts.json");
    fs::write(
        &input,
        r#"[
            {"url": "https://www.instagram.com/p/SOUP1/", "caption": "Tomato soup\n- 4 tomatoes\nSimmer."},
            {"url": "https://www.instagram.com/p/BARE2/"}
        ]"#,
    )
    .unwrap();
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        format!(
            "extractor = \"ollama\"\nfetcher = \"inline\"\nollama_url = \"{uri}\"\ntelegraph_url = \"{uri}\"\nbase_delay_ms = 0\njitter_ms = 0\n",
            uri = server.uri()
        ),
    )
    .unwrap();
    let checkpoint = dir.path().join("progress.json");
    let output = dir.path().join("recipes.json");
    let failure_log = dir.path().join("failed.json");

    let run = || {
        let mut cmd = binary(dir.path());
        cmd.env("TELEGRAPH_ACCESS_TOKEN", "token")
            .arg("--config")
            .arg(&config)
            .arg("--input")
            .arg(&input)
            .arg("--checkpoint")
            .arg(&checkpoint)
            .arg("--output")
            .arg(&output)
            .arg("--failure-log")
            .arg(&failure_log)
            .arg("-q");
        cmd
    };

    // One record published, one without a caption: partial success.
    run()
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Published 1, failed 1, pending 0"));

    let recipes = read_json(&output);
    assert_eq!(recipes.as_array().unwrap().len(), 1);
    assert_eq!(recipes[0]["id"], "SOUP1");
    assert_eq!(recipes[0]["public_url"], "https://telegra.ph/Tomato-Soup-10-17");
    assert_eq!(recipes[0]["recipe"]["title"], "Tomato Soup");

    let failures = read_json(&failure_log);
    assert_eq!(failures.as_array().unwrap().len(), 1);
    assert_eq!(failures[0]["id"], "BARE2");

    // Rerun: nothing left to do, backends are not called again.
    run()
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Published 1, failed 1, pending 0"));

    binary(dir.path())
        .arg("--status")
        .arg("--checkpoint")
        .arg(&checkpoint)
        .assert()
        .success()
        .stdout(predicate::str::contains("published:       1"))
        .stdout(predicate::str::contains("failed:          1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_extractor_stops_before_processing() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("posts.json");
    fs::write(&input, r#"[{"url": "https://www.instagram.com/p/A1/", "caption": "Soup"}]"#).unwrap();
    let checkpoint = dir.path().join("progress.json");

    binary(dir.path())
        .env("TELEGRAPH_ACCESS_TOKEN", "token")
        .args(["--extractor", "ollama", "--fetcher", "inline"])
        .arg("--input")
        .arg(&input)
        .arg("--checkpoint")
        .arg(&checkpoint)
        .arg("--config")
        .arg({
            let config = dir.path().join("config.toml");
            fs::write(&config, "ollama_url = \"http://127.0.0.1:9\"\n").unwrap();
            config
        })
        .assert()
        .code(2);

    assert!(!checkpoint.exists(), "no record is touched when a backend is down");
}
