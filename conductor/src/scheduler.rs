//! Task-graph scheduler.
//!
//! Drives a run to a terminal status: plans if needed, then repeatedly claims
//! the next ready task and takes it through the worker phase, the verification
//! gate (with retries), and the optional reviewer. State is persisted after
//! every status change so a killed run can be resumed.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::agents::planner::PlannerAgent;
use crate::agents::reviewer::ReviewerAgent;
use crate::agents::worker::{WorkerAgent, WorkerRequest, WorkerStatus};
use crate::core::graph::TaskGraph;
use crate::core::types::{RunStatus, Task, TaskStatus, truncate_chars};
use crate::io::agent::AgentBackend;
use crate::io::checks::{CheckResult, CheckRunner};
use crate::io::config::ConductorConfig;
use crate::io::git::Git;
use crate::io::prompt::PromptEngine;
use crate::io::signals::ControlSignals;
use crate::io::state_store::{ConductorState, save_state};

/// Check output stored on a failed task is cut to this many characters.
pub const MAX_ERROR_CHARS: usize = 2000;

/// Agent replies are cut to this many characters in log events.
const LOG_REPLY_CHARS: usize = 500;

pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(500);

const RETRY_INCOMPLETE_ERROR: &str = "Retry worker did not signal completion with 'TASK COMPLETE'";

/// Everything the scheduler needs to know about where a run lives.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: ConductorConfig,
    pub state_path: PathBuf,
    /// Holds control sentinels and agent session logs.
    pub session_dir: PathBuf,
}

/// Whether the outer loop keeps claiming tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Stop,
}

pub struct Scheduler<'a, B: ?Sized, C: ?Sized, S: ?Sized> {
    ctx: &'a RunContext,
    backend: &'a B,
    checks: &'a C,
    signals: &'a S,
    git: Git,
    prompts: PromptEngine,
    pause_poll: Duration,
}

impl<'a, B, C, S> Scheduler<'a, B, C, S>
where
    B: AgentBackend + ?Sized,
    C: CheckRunner + ?Sized,
    S: ControlSignals + ?Sized,
{
    pub fn new(ctx: &'a RunContext, backend: &'a B, checks: &'a C, signals: &'a S) -> Result<Self> {
        let config = &ctx.config;
        Ok(Self {
            ctx,
            backend,
            checks,
            signals,
            git: Git::new(&config.working_dir, Duration::from_secs(config.git_timeout_secs)),
            prompts: PromptEngine::new(config.prompt_budget_bytes)?,
            pause_poll: DEFAULT_PAUSE_POLL,
        })
    }

    pub fn with_pause_poll(mut self, pause_poll: Duration) -> Self {
        self.pause_poll = pause_poll;
        self
    }

    /// Drive `state` to a terminal status.
    ///
    /// On error the status becomes `error` and is persisted before the error
    /// is returned; the snapshot stays resumable.
    #[instrument(skip_all, fields(run_id = %state.run_id))]
    pub fn run(&self, state: &mut ConductorState) -> Result<RunStatus> {
        state.status = RunStatus::Running;
        match self.drive(state) {
            Ok(()) => {
                self.persist(state)?;
                info!(status = state.status.as_str(), "run finished");
                Ok(state.status)
            }
            Err(err) => {
                state.status = RunStatus::Error;
                error!(error = %format!("{err:#}"), "run failed");
                if let Err(save_err) = self.persist(state) {
                    warn!(error = %save_err, "failed to persist error status");
                }
                Err(err)
            }
        }
    }

    fn drive(&self, state: &mut ConductorState) -> Result<()> {
        let config = &self.ctx.config;
        let document = fs::read_to_string(&config.document_path).with_context(|| {
            format!(
                "read requirements document {}",
                config.document_path.display()
            )
        })?;

        if state.graph.is_none() {
            self.plan(state, &document)?;
        }
        if let Some(branch) = &config.git_branch {
            self.git.ensure_branch(branch)?;
        }

        loop {
            if self.signals.is_cancelled() {
                info!("run cancelled");
                state.status = RunStatus::Cancelled;
                return Ok(());
            }
            if !self.wait_while_paused() {
                info!("run cancelled while paused");
                state.status = RunStatus::Cancelled;
                return Ok(());
            }
            self.git
                .ensure_clean()
                .context("a clean working tree is required between tasks")?;

            let graph = graph_of(state)?;
            let Some(task_id) = graph.next_ready_task().map(|t| t.id.clone()) else {
                if graph.all_done() {
                    info!("all tasks completed");
                    state.status = RunStatus::Completed;
                } else {
                    let counts = graph.status_counts();
                    warn!(
                        "No ready tasks. {} failed, {} blocked.",
                        counts.failed, counts.pending
                    );
                    state.status = RunStatus::Failed;
                }
                return Ok(());
            };

            if self.run_task(state, &task_id, &document)? == Flow::Stop {
                return Ok(());
            }
        }
    }

    #[instrument(skip_all)]
    fn plan(&self, state: &mut ConductorState, document: &str) -> Result<()> {
        info!(document = %self.ctx.config.document_path.display(), "planning tasks");
        let planner = PlannerAgent::new(&self.prompts)?;
        let outcome = planner.run(self.backend, &self.ctx.config, document)?;
        for task in outcome.graph.tasks.values() {
            info!(task = %task.id, title = %task.title, depends_on = ?task.depends_on, "planned task");
        }
        let mut planner_usage = state.planner_usage.unwrap_or_default();
        planner_usage.add(&outcome.usage);
        state.planner_usage = Some(planner_usage);
        state.graph = Some(outcome.graph);
        self.persist(state)
    }

    #[instrument(skip_all, fields(task = %task_id))]
    fn run_task(&self, state: &mut ConductorState, task_id: &str, document: &str) -> Result<Flow> {
        let config = &self.ctx.config;
        {
            let task = task_mut(state, task_id)?;
            task.status = TaskStatus::InProgress;
            task.attempts += 1;
        }
        self.persist(state)?;
        let base = self.git.head_revision()?;

        // The graph's prompt-facing fields do not change while a task runs.
        let graph = graph_of(state)?.clone();
        let task = graph
            .task(task_id)
            .ok_or_else(|| anyhow!("task {task_id} missing from graph"))?;
        info!(title = %task.title, attempt = task.attempts, "starting task");

        let worker = WorkerAgent::new(&self.prompts, config);
        if !self.worker_phase(state, &worker, &graph, task, document)? {
            if self.signals.is_cancelled() {
                self.persist(state)?;
                return Ok(Flow::Next);
            }
            let task = task_mut(state, task_id)?;
            task.status = TaskStatus::Failed;
            task.error = Some(format!(
                "Worker did not complete task within {} sessions/handoffs. Manual intervention required.",
                config.max_worker_sessions
            ));
            state.status = RunStatus::PausedUserAttention;
            state.attention_task = Some(task_id.to_string());
            self.persist(state)?;
            warn!(
                sessions = config.max_worker_sessions,
                "task requires attention; resume with --resume after fixing it"
            );
            return Ok(Flow::Stop);
        }
        if self.signals.is_cancelled() {
            self.persist(state)?;
            return Ok(Flow::Next);
        }

        if let Some(sha) = self
            .git
            .commit_all(&format!("conductor: {} - {}", task.id, task.title))?
        {
            info!(commit = %short_sha(&sha), "committed worker changes");
            task_mut(state, task_id)?.commit_sha = Some(sha);
        } else {
            info!("no worker changes to commit");
        }
        self.persist(state)?;

        let check = self.checks.run_checks(&graph.verification)?;
        if !check.passed {
            info!("checks failed");
            match self.retry_phase(state, &worker, &graph, task, check)? {
                RetryOutcome::Passed => {}
                RetryOutcome::Cancelled => {
                    self.persist(state)?;
                    return Ok(Flow::Next);
                }
                RetryOutcome::Failed => return Ok(Flow::Next),
            }
        }

        if self.signals.is_cancelled() {
            self.persist(state)?;
            return Ok(Flow::Next);
        }

        let has_commit = task_mut(state, task_id)?.commit_sha.is_some();
        if config.enable_reviewer && has_commit && !self.review_phase(state, &graph, task, &base)? {
            return Ok(Flow::Next);
        }

        let attempts = {
            let task = task_mut(state, task_id)?;
            task.status = TaskStatus::Done;
            task.handoff_doc = None;
            task.attempts
        };
        self.persist(state)?;
        info!("task done");
        if attempts > 1 {
            warn!(attempts, "retry alert: task needed more than one attempt");
        }
        Ok(Flow::Next)
    }

    /// Run worker sessions until one completes, carrying handoff documents
    /// forward. Returns whether the task was completed.
    fn worker_phase(
        &self,
        state: &mut ConductorState,
        worker: &WorkerAgent<'_>,
        graph: &TaskGraph,
        task: &Task,
        document: &str,
    ) -> Result<bool> {
        let mut handoff = stored_handoff(state, &task.id)?;
        for session in 1..=self.ctx.config.max_worker_sessions {
            if self.signals.is_cancelled() {
                return Ok(false);
            }
            info!(session, resumed = handoff.is_some(), "worker session");
            let outcome = worker.run(
                self.backend,
                self.signals,
                WorkerRequest {
                    task,
                    graph,
                    document,
                    handoff: handoff.as_deref(),
                },
            )?;
            state.usage_mut(&task.id).add_worker_session(&outcome.usage);

            match outcome.status {
                WorkerStatus::Completed => {
                    debug!(reply = %truncate_chars(&outcome.text, LOG_REPLY_CHARS), "worker final reply");
                    return Ok(true);
                }
                WorkerStatus::Handoff => {
                    handoff = outcome.handoff_doc.filter(|doc| !doc.trim().is_empty());
                    if handoff.is_none() {
                        warn!("empty handoff document; next session starts from the task brief");
                    }
                    task_mut(state, &task.id)?.handoff_doc = handoff.clone();
                    self.persist(state)?;
                    info!("worker handed off to a fresh session");
                }
                WorkerStatus::Incomplete | WorkerStatus::Cancelled => return Ok(false),
            }
        }
        Ok(false)
    }

    /// Retry failing checks with fresh single-turn workers while attempts remain.
    fn retry_phase(
        &self,
        state: &mut ConductorState,
        worker: &WorkerAgent<'_>,
        graph: &TaskGraph,
        task: &Task,
        mut check: CheckResult,
    ) -> Result<RetryOutcome> {
        let max_attempts = self.ctx.config.max_task_attempts;
        loop {
            let attempts = task_mut(state, &task.id)?.attempts;
            if attempts >= max_attempts {
                break;
            }
            if self.signals.is_cancelled() {
                return Ok(RetryOutcome::Cancelled);
            }
            let attempt = attempts + 1;
            task_mut(state, &task.id)?.attempts = attempt;
            self.persist(state)?;
            info!(attempt, "retrying failed checks");

            let outcome = worker.run_retry(self.backend, task, graph, &check.output)?;
            state.usage_mut(&task.id).add_worker_session(&outcome.usage);
            if outcome.status != WorkerStatus::Completed {
                let failed = task_mut(state, &task.id)?;
                failed.status = TaskStatus::Failed;
                failed.error = Some(RETRY_INCOMPLETE_ERROR.to_string());
                self.persist(state)?;
                warn!("task failed: retry worker did not complete");
                return Ok(RetryOutcome::Failed);
            }

            if let Some(sha) = self.git.commit_all(&format!(
                "conductor: {} - fix checks (attempt {attempt})",
                task.id
            ))? {
                info!(commit = %short_sha(&sha), "committed retry fixes");
                task_mut(state, &task.id)?.commit_sha = Some(sha);
            }
            self.persist(state)?;

            check = self.checks.run_checks(&graph.verification)?;
            if check.passed {
                info!("checks passed after retry");
                return Ok(RetryOutcome::Passed);
            }
        }

        let failed = task_mut(state, &task.id)?;
        failed.status = TaskStatus::Failed;
        failed.error = Some(truncate_chars(&check.output, MAX_ERROR_CHARS));
        let attempts = failed.attempts;
        self.persist(state)?;
        warn!(attempts, "task failed: checks still failing");
        Ok(RetryOutcome::Failed)
    }

    /// Review the task's diff, commit reviewer fixes and re-verify once.
    /// Returns false when the task failed.
    fn review_phase(
        &self,
        state: &mut ConductorState,
        graph: &TaskGraph,
        task: &Task,
        base: &str,
    ) -> Result<bool> {
        let diff = self.git.diff_since(base)?;
        if diff.trim().is_empty() {
            return Ok(true);
        }
        info!("running reviewer");
        let reviewer = ReviewerAgent::new(&self.prompts, &self.ctx.config);
        let review = reviewer.run(self.backend, task, graph, &diff)?;
        state.usage_mut(&task.id).add_reviewer_session(&review.usage);
        info!(summary = %truncate_chars(&review.summary, LOG_REPLY_CHARS), "reviewer finished");

        if let Some(sha) = self
            .git
            .commit_all(&format!("conductor: {} - reviewer fixes", task.id))?
        {
            info!(commit = %short_sha(&sha), "committed reviewer fixes");
            task_mut(state, &task.id)?.review_sha = Some(sha);
        }
        self.persist(state)?;

        let check = self.checks.run_checks(&graph.verification)?;
        if !check.passed {
            let failed = task_mut(state, &task.id)?;
            failed.status = TaskStatus::Failed;
            failed.error = Some(truncate_chars(&check.output, MAX_ERROR_CHARS));
            self.persist(state)?;
            warn!("task failed: checks failed after review");
            return Ok(false);
        }
        Ok(true)
    }

    /// Block while paused. Returns false if a cancel arrives meanwhile.
    fn wait_while_paused(&self) -> bool {
        let mut announced = false;
        while self.signals.is_paused() {
            if self.signals.is_cancelled() {
                return false;
            }
            if !announced {
                info!("paused; waiting for resume");
                announced = true;
            }
            thread::sleep(self.pause_poll);
        }
        if announced {
            info!("resumed");
        }
        true
    }

    fn persist(&self, state: &mut ConductorState) -> Result<()> {
        state.updated_at = Utc::now();
        save_state(&self.ctx.state_path, state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryOutcome {
    Passed,
    Failed,
    Cancelled,
}

fn graph_of(state: &ConductorState) -> Result<&TaskGraph> {
    state
        .graph
        .as_ref()
        .ok_or_else(|| anyhow!("run has no task graph"))
}

fn task_mut<'s>(state: &'s mut ConductorState, task_id: &str) -> Result<&'s mut Task> {
    state
        .graph
        .as_mut()
        .and_then(|graph| graph.task_mut(task_id))
        .ok_or_else(|| anyhow!("task {task_id} missing from graph"))
}

fn stored_handoff(state: &ConductorState, task_id: &str) -> Result<Option<String>> {
    graph_of(state)?
        .task(task_id)
        .map(|task| {
            task.handoff_doc
                .clone()
                .filter(|doc| !doc.trim().is_empty())
        })
        .ok_or_else(|| anyhow!("task {task_id} missing from graph"))
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}
