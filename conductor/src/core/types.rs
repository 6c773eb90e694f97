//! Shared deterministic types for the conductor core.
//!
//! These types define the persisted contract between runs. Serialized names are
//! stable: renaming a variant or field breaks resume of existing state files.

use serde::{Deserialize, Serialize};

/// Lifecycle of a single task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Overall run status. Every value other than `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Error,
    Cancelled,
    PausedUserAttention,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
            RunStatus::PausedUserAttention => "paused_user_attention",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// A single unit of work in the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    /// Last commit made for this task by a worker.
    #[serde(default)]
    pub commit_sha: Option<String>,
    /// Last commit made for this task by the reviewer.
    #[serde(default)]
    pub review_sha: Option<String>,
    /// Continuation document produced by the last worker handoff.
    #[serde(default)]
    pub handoff_doc: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Task {
    /// Create a PENDING task with no history.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: Vec<String>,
        depends_on: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            acceptance_criteria,
            depends_on,
            status: TaskStatus::Pending,
            attempts: 0,
            commit_sha: None,
            review_sha: None,
            handoff_doc: None,
            error: None,
        }
    }

    /// Most recent revision attributable to this task, if any.
    pub fn last_revision(&self) -> Option<&str> {
        self.review_sha.as_deref().or(self.commit_sha.as_deref())
    }
}

/// Shell-level check commands run between worker and reviewer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub test_cmd: Option<String>,
    #[serde(default)]
    pub lint_cmd: Option<String>,
    #[serde(default)]
    pub typecheck_cmd: Option<String>,
}

impl VerificationConfig {
    /// Configured commands in execution order, paired with their labels.
    pub fn commands(&self) -> Vec<(&'static str, &str)> {
        [
            ("test", self.test_cmd.as_deref()),
            ("lint", self.lint_cmd.as_deref()),
            ("typecheck", self.typecheck_cmd.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, cmd)| {
            cmd.map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| (label, c))
        })
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.commands().is_empty()
    }
}

/// Token and cost totals for one agent session (or a sum of sessions).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl SessionUsage {
    pub fn add(&mut self, other: &SessionUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Per-task usage accumulators. Values only ever grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUsage {
    pub task_id: String,
    #[serde(default)]
    pub worker_input_tokens: u64,
    #[serde(default)]
    pub worker_output_tokens: u64,
    #[serde(default)]
    pub worker_cost_usd: f64,
    #[serde(default)]
    pub worker_sessions: u32,
    #[serde(default)]
    pub reviewer_input_tokens: u64,
    #[serde(default)]
    pub reviewer_output_tokens: u64,
    #[serde(default)]
    pub reviewer_cost_usd: f64,
}

impl TaskUsage {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            worker_input_tokens: 0,
            worker_output_tokens: 0,
            worker_cost_usd: 0.0,
            worker_sessions: 0,
            reviewer_input_tokens: 0,
            reviewer_output_tokens: 0,
            reviewer_cost_usd: 0.0,
        }
    }

    /// Record one finished worker session.
    pub fn add_worker_session(&mut self, usage: &SessionUsage) {
        self.worker_input_tokens += usage.input_tokens;
        self.worker_output_tokens += usage.output_tokens;
        self.worker_cost_usd += usage.cost_usd;
        self.worker_sessions += 1;
    }

    pub fn add_reviewer_session(&mut self, usage: &SessionUsage) {
        self.reviewer_input_tokens += usage.input_tokens;
        self.reviewer_output_tokens += usage.output_tokens;
        self.reviewer_cost_usd += usage.cost_usd;
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.worker_cost_usd + self.reviewer_cost_usd
    }
}

/// Truncate `text` to at most `max_chars` characters (never splits a char).
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
