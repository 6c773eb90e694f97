//! Crash-safe persistence of run state.
//!
//! A state file is pretty-printed JSON written to a temp file in the same
//! directory, synced, and renamed over the target, so readers only ever see a
//! complete snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::graph::TaskGraph;
use crate::core::types::{RunStatus, SessionUsage, TaskUsage};
use crate::io::config::ConductorConfig;

/// Everything needed to resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductorState {
    pub run_id: String,
    pub config: ConductorConfig,
    /// Absent until planning completes.
    #[serde(default)]
    pub graph: Option<TaskGraph>,
    #[serde(default)]
    pub usage: BTreeMap<String, TaskUsage>,
    pub status: RunStatus,
    #[serde(default)]
    pub planner_usage: Option<SessionUsage>,
    /// Task whose worker phase paused the run for operator attention.
    #[serde(default)]
    pub attention_task: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConductorState {
    pub fn new(run_id: impl Into<String>, config: ConductorConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            config,
            graph: None,
            usage: BTreeMap::new(),
            status: RunStatus::Running,
            planner_usage: None,
            attention_task: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Usage accumulator for `task_id`, created on first use.
    pub fn usage_mut(&mut self, task_id: &str) -> &mut TaskUsage {
        self.usage
            .entry(task_id.to_string())
            .or_insert_with(|| TaskUsage::new(task_id))
    }

    /// Total spend across tasks and the planner.
    pub fn total_cost_usd(&self) -> f64 {
        let tasks: f64 = self.usage.values().map(TaskUsage::total_cost_usd).sum();
        tasks + self.planner_usage.map(|u| u.cost_usd).unwrap_or(0.0)
    }
}

/// Atomically write `state` to `path`.
pub fn save_state(path: &Path, state: &ConductorState) -> Result<()> {
    debug!(path = %path.display(), run_id = %state.run_id, status = state.status.as_str(), "saving state");
    let mut buf = serde_json::to_string_pretty(state).context("serialize state")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Load a state file, moving IN_PROGRESS tasks back to PENDING.
pub fn load_state(path: &Path) -> Result<ConductorState> {
    let mut state = read_state(path)?;
    if let Some(graph) = state.graph.as_mut() {
        let reset = graph.reset_in_progress();
        if !reset.is_empty() {
            info!(tasks = ?reset, "reset interrupted tasks to pending");
        }
    }
    Ok(state)
}

/// Parse a state file exactly as saved, for inspection.
pub fn read_state(path: &Path) -> Result<ConductorState> {
    debug!(path = %path.display(), "reading state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse state {}", path.display()))
}

/// Default location for state files: `<config dir>/conductor/runs`.
pub fn default_state_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| anyhow!("cannot determine user config directory"))?;
    Ok(base.join("conductor").join("runs"))
}

pub fn state_path_for_run(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("{run_id}.json"))
}

/// Most recently modified `*.json` file in `dir`, if any.
pub fn latest_state_path(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("stat {}", path.display()))?;
        if latest.as_ref().is_none_or(|(best, _)| modified > *best) {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

/// Directory holding control sentinels and logs for a run.
pub fn session_dir_for(state_path: &Path, run_id: &str) -> PathBuf {
    state_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("conductor-{run_id}"))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("write temp state for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp state for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}
