//! Run bootstrap: fresh runs and resumes.
//!
//! A run is identified by a `run_id` of the form `<UTC yyyymmddHHMMSS>-<6
//! lowercase alphanumerics>`. Its state file lives in the state directory
//! unless an explicit path is given; sentinels and agent logs live in
//! `conductor-<run_id>/` next to the state file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, warn};

use crate::core::types::{RunStatus, TaskStatus};
use crate::io::checks::ProcessCheckRunner;
use crate::io::codex::CodexBackend;
use crate::io::config::ConductorConfig;
use crate::io::signals::SentinelSignals;
use crate::io::state_store::{
    ConductorState, latest_state_path, load_state, session_dir_for, state_path_for_run,
};
use crate::scheduler::{RunContext, Scheduler};

/// A state ready to hand to the scheduler.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub state: ConductorState,
    pub context: RunContext,
}

/// Final state of a run and where it was saved.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: ConductorState,
    pub state_path: PathBuf,
}

/// Generate a run id from the current time and six random characters.
pub fn new_run_id<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: String = rng
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{suffix}", now.format("%Y%m%d%H%M%S"))
}

/// Create a fresh state or load the one being resumed.
///
/// On resume the current configuration replaces the persisted one, the task
/// that paused the run for attention goes back to PENDING, and with
/// `retry_failed` so does every FAILED task. A stale cancel sentinel is
/// cleared so the resumed run does not stop immediately.
pub fn prepare_run(config: ConductorConfig, state_dir: &Path) -> Result<PreparedRun> {
    let (state, state_path) = if config.resume {
        resume_state(config.clone(), state_dir)?
    } else {
        let run_id = new_run_id(Utc::now(), &mut rand::thread_rng());
        let state_path = config
            .state_path
            .clone()
            .unwrap_or_else(|| state_path_for_run(state_dir, &run_id));
        if state_path.exists() {
            warn!(path = %state_path.display(), "overwriting existing state file");
        }
        info!(run_id = %run_id, "starting new run");
        (ConductorState::new(run_id, config.clone()), state_path)
    };

    let session_dir = session_dir_for(&state_path, &state.run_id);
    fs::create_dir_all(&session_dir)
        .with_context(|| format!("create session dir {}", session_dir.display()))?;
    SentinelSignals::new(&session_dir).clear_cancel()?;

    Ok(PreparedRun {
        state,
        context: RunContext {
            config,
            state_path,
            session_dir,
        },
    })
}

fn resume_state(config: ConductorConfig, state_dir: &Path) -> Result<(ConductorState, PathBuf)> {
    let state_path = match &config.state_path {
        Some(path) => path.clone(),
        None => latest_state_path(state_dir)?.ok_or_else(|| {
            anyhow!(
                "No saved conductor state found to resume. Provide --state or run without --resume."
            )
        })?,
    };
    if !state_path.exists() {
        return Err(anyhow!("State file not found: {}", state_path.display()));
    }

    let mut state = load_state(&state_path)?;
    if !state.status.is_terminal() {
        warn!(run_id = %state.run_id, "previous run was interrupted; resuming from last save");
    }
    state.config = config;
    state.status = RunStatus::Running;
    let retry_failed = state.config.retry_failed;
    let attention = state.attention_task.take();
    if let Some(graph) = state.graph.as_mut() {
        for task in graph.tasks.values_mut() {
            let is_attention = attention.as_deref() == Some(task.id.as_str());
            if task.status == TaskStatus::Failed && (is_attention || retry_failed) {
                info!(task = %task.id, "resetting failed task to pending");
                task.status = TaskStatus::Pending;
                task.error = None;
            }
        }
        if !graph.has_remaining_work() {
            info!("no pending tasks remain; the run will finish without new work");
        }
    }
    info!(run_id = %state.run_id, path = %state_path.display(), "resumed run");
    Ok((state, state_path))
}

/// Prepare and drive a run with the `codex` backend, process checks and
/// filesystem sentinels.
pub fn run_conductor(config: ConductorConfig, state_dir: &Path) -> Result<RunReport> {
    let PreparedRun { mut state, context } = prepare_run(config, state_dir)?;
    let config = &context.config;
    let backend = CodexBackend::new(config, Some(context.session_dir.join("logs")));
    let checks = ProcessCheckRunner::new(
        &config.working_dir,
        Duration::from_secs(config.check_timeout_secs),
        config.output_limit_bytes,
    );
    let signals = SentinelSignals::new(&context.session_dir);

    Scheduler::new(&context, &backend, &checks, &signals)?.run(&mut state)?;
    Ok(RunReport {
        state,
        state_path: context.state_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::state_store::save_state;
    use crate::io::signals::ControlSignals;
    use crate::test_support::diamond_graph;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn run_id_has_timestamp_and_lowercase_suffix() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).single().expect("time");
        let id = new_run_id(now, &mut StdRng::seed_from_u64(7));
        let (stamp, suffix) = id.split_once('-').expect("dash");
        assert_eq!(stamp, "20250304050607");
        assert_eq!(suffix.len(), 6);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn fresh_run_places_state_in_state_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let prepared = prepare_run(ConductorConfig::default(), temp.path()).expect("prepare");
        let run_id = &prepared.state.run_id;
        assert_eq!(
            prepared.context.state_path,
            temp.path().join(format!("{run_id}.json"))
        );
        assert_eq!(
            prepared.context.session_dir,
            temp.path().join(format!("conductor-{run_id}"))
        );
        assert!(prepared.context.session_dir.is_dir());
        assert_eq!(prepared.state.status, RunStatus::Running);
    }

    #[test]
    fn resume_without_saved_state_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ConductorConfig {
            resume: true,
            ..ConductorConfig::default()
        };
        let err = prepare_run(config, temp.path()).unwrap_err();
        assert!(err.to_string().contains("No saved conductor state found"));
    }

    #[test]
    fn resume_resets_attention_task_and_clears_cancel() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run-a.json");
        let mut state = ConductorState::new("run-a", ConductorConfig::default());
        let mut graph = diamond_graph();
        graph.task_mut("T1").expect("T1").status = TaskStatus::Done;
        for id in ["T2", "T3"] {
            let task = graph.task_mut(id).expect("task");
            task.status = TaskStatus::Failed;
            task.error = Some("boom".to_string());
        }
        state.graph = Some(graph);
        state.status = RunStatus::PausedUserAttention;
        state.attention_task = Some("T2".to_string());
        save_state(&path, &state).expect("save");
        let sentinels = SentinelSignals::new(temp.path().join("conductor-run-a"));
        sentinels.request_cancel().expect("cancel");

        let config = ConductorConfig {
            resume: true,
            model: "resumed-model".to_string(),
            ..ConductorConfig::default()
        };
        let prepared = prepare_run(config, temp.path()).expect("prepare");

        let graph = prepared.state.graph.as_ref().expect("graph");
        assert_eq!(graph.task("T2").expect("T2").status, TaskStatus::Pending);
        assert_eq!(graph.task("T2").expect("T2").error, None);
        assert_eq!(graph.task("T3").expect("T3").status, TaskStatus::Failed);
        assert_eq!(prepared.state.attention_task, None);
        assert_eq!(prepared.state.status, RunStatus::Running);
        assert_eq!(prepared.state.config.model, "resumed-model");
        assert_eq!(prepared.context.state_path, path);
        assert!(!sentinels.is_cancelled());
    }

    #[test]
    fn retry_failed_resets_every_failed_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("explicit.json");
        let mut state = ConductorState::new("run-b", ConductorConfig::default());
        let mut graph = diamond_graph();
        graph.task_mut("T1").expect("T1").status = TaskStatus::Failed;
        state.graph = Some(graph);
        save_state(&path, &state).expect("save");

        let config = ConductorConfig {
            resume: true,
            retry_failed: true,
            state_path: Some(path),
            ..ConductorConfig::default()
        };
        let prepared = prepare_run(config, temp.path().join("unused").as_path()).expect("prepare");
        let graph = prepared.state.graph.as_ref().expect("graph");
        assert_eq!(graph.task("T1").expect("T1").status, TaskStatus::Pending);
    }
}
