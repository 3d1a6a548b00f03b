//! Shared helpers for CLI E2E tests.

#![allow(dead_code)]

use std::process::Command;

use chrono::{Duration, Utc};
use studytrack_core::{Database, SnapshotStore, TimerMode, TimerSnapshot, TimerStatus};
use tempfile::TempDir;

/// Run a CLI command with `STUDYTRACK_DATA_DIR` pointed at `dir`.
pub fn run_cli(dir: &TempDir, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_studytrack-cli"))
        .args(args)
        .env("STUDYTRACK_DATA_DIR", dir.path())
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

pub fn data_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Set a config value, failing the test if the CLI rejects it.
pub fn set_config(dir: &TempDir, key: &str, value: &str) {
    let (code, _, stderr) = run_cli(dir, &["config", "set", key, value]);
    assert_eq!(code, 0, "config set {key} failed: {stderr}");
}

/// Leave a running countdown in the data dir, as a process that exited
/// mid-session would.
pub fn seed_running_countdown(
    dir: &TempDir,
    remote_session_id: i64,
    target_seconds: u64,
    started_secs_ago: i64,
) {
    let mut db = Database::open_at(&dir.path().join("studytrack.db")).expect("open database");
    db.save(&TimerSnapshot {
        mode: TimerMode::Countdown,
        status: TimerStatus::Running,
        remote_session_id,
        start_timestamp: Some(Utc::now() - Duration::seconds(started_secs_ago)),
        accumulated_seconds: 0,
        target_duration_seconds: Some(target_seconds),
        topic_id: None,
        notes: None,
    })
    .expect("seed snapshot");
}

/// Parse a JSON document printed by the CLI.
pub fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).expect("CLI output is JSON")
}
