//! CLI tests for `conductor status` and `conductor signal`.
//!
//! Spawns the binary against saved state files and checks exit codes and the
//! sentinel files it leaves behind.

use std::path::Path;
use std::process::Command;

use conductor::core::types::{RunStatus, TaskStatus};
use conductor::exit_codes;
use conductor::io::config::ConductorConfig;
use conductor::io::state_store::{ConductorState, save_state};
use conductor::test_support::diamond_graph;

fn conductor(state_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_conductor"));
    cmd.current_dir(state_dir)
        .env("CONDUCTOR_STATE_DIR", state_dir)
        .env("RUST_LOG", "off");
    cmd
}

fn paused_state(path: &Path) {
    let mut state = ConductorState::new("20250101000000-abc123", ConductorConfig::default());
    let mut graph = diamond_graph();
    graph.task_mut("T1").expect("T1").status = TaskStatus::Failed;
    state.graph = Some(graph);
    state.status = RunStatus::PausedUserAttention;
    state.attention_task = Some("T1".to_string());
    save_state(path, &state).expect("save state");
}

#[test]
fn status_exits_with_paused_code_and_prints_summary() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("saved.json");
    paused_state(&path);

    let output = conductor(temp.path())
        .args(["status", "--state"])
        .arg(&path)
        .output()
        .expect("conductor status");

    assert_eq!(output.status.code(), Some(exit_codes::PAUSED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Conductor summary: demo"));
    assert!(stdout.contains("Final status: paused_user_attention"));
}

#[test]
fn status_defaults_to_latest_state_in_state_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    paused_state(&temp.path().join("20250101000000-abc123.json"));

    let status = conductor(temp.path())
        .arg("status")
        .status()
        .expect("conductor status");

    assert_eq!(status.code(), Some(exit_codes::PAUSED));
}

#[test]
fn status_without_saved_state_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = conductor(temp.path())
        .arg("status")
        .status()
        .expect("conductor status");

    assert_eq!(status.code(), Some(exit_codes::ERROR));
}

#[test]
fn signal_writes_and_clears_sentinels() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("saved.json");
    paused_state(&path);
    let session_dir = temp.path().join("conductor-20250101000000-abc123");

    let status = conductor(temp.path())
        .args(["signal", "pause", "--state"])
        .arg(&path)
        .status()
        .expect("conductor signal pause");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(session_dir.join("pause").exists());

    let status = conductor(temp.path())
        .args(["signal", "resume", "--state"])
        .arg(&path)
        .status()
        .expect("conductor signal resume");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(!session_dir.join("pause").exists());

    let status = conductor(temp.path())
        .args(["signal", "cancel", "--state"])
        .arg(&path)
        .status()
        .expect("conductor signal cancel");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(session_dir.join("cancel").exists());
}

#[test]
fn run_with_missing_document_exits_with_error() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = conductor(temp.path())
        .args(["run", "missing.md", "-d"])
        .arg(temp.path())
        .status()
        .expect("conductor run");

    assert_eq!(status.code(), Some(exit_codes::ERROR));
}
