//! CLI Tests
//!
//! Runs the built binary against a mocked platform.

mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn config_file(api_base: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
server:
  address: "127.0.0.1:0"
stream:
  account_id: "{account}"
  api_token: "{token}"
  api_base_url: "{api_base}"
  playback_base_url: "{playback}"
upload:
  resumable_threshold_bytes: 1024
reconcile:
  poll_interval_ms: 10
  max_attempts: 3
collections:
  - key: "videos"
metrics:
  enabled: false
logging:
  level: "warn"
"#,
        account = ACCOUNT,
        token = API_TOKEN,
        api_base = api_base,
        playback = PLAYBACK,
    )
    .unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("stream-ingestr")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("upload"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn test_missing_config_fails() {
    Command::cargo_bin("stream-ingestr")
        .unwrap()
        .args(["-c", "/definitely/not/here.yaml", "delete", UID])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_invalid_stream_id_rejected_by_parser() {
    Command::cargo_bin("stream-ingestr")
        .unwrap()
        .args(["delete", "not-a-stream-id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid stream id"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_reports_outcome() {
    let platform = PlatformMock::start().await;
    platform.mount_delete(404).await;
    let file = config_file(&platform.api_base());
    let path = file.path().to_path_buf();

    tokio::task::spawn_blocking(move || {
        Command::cargo_bin("stream-ingestr")
            .unwrap()
            .arg("-c")
            .arg(&path)
            .args(["delete", UID])
            .assert()
            .success()
            .stdout(predicate::str::contains("already absent"));
    })
    .await
    .unwrap();

    assert_eq!(platform.count("DELETE", &platform.video_path(UID)).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_without_waiting_prints_provisional_record() {
    let platform = PlatformMock::start().await;
    platform.mount_direct_upload().await;
    platform.mount_upload_sink(200).await;
    let file = config_file(&platform.api_base());
    let path = file.path().to_path_buf();

    let mut video = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    video.write_all(&payload_bytes(256)).unwrap();
    video.flush().unwrap();
    let video_path = video.path().to_path_buf();

    tokio::task::spawn_blocking(move || {
        Command::cargo_bin("stream-ingestr")
            .unwrap()
            .arg("-c")
            .arg(&path)
            .args(["upload", "--collection", "videos", "--no-wait", "--file"])
            .arg(&video_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\": \"processing\""))
            .stdout(predicate::str::contains(UID));
    })
    .await
    .unwrap();

    assert_eq!(platform.count("POST", "/upload/one-time").await, 1);
}
