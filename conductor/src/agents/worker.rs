//! Worker agent: implements one task over a bounded number of turns, handing
//! off to a fresh session when the context budget runs out.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::is_over_budget;
use crate::core::graph::TaskGraph;
use crate::core::marker::is_task_complete;
use crate::core::types::{SessionUsage, Task};
use crate::io::agent::{AgentBackend, Profile, SessionStatus};
use crate::io::config::ConductorConfig;
use crate::io::prompt::{CONTINUE_PROMPT, PromptEngine};
use crate::io::signals::ControlSignals;

use super::{session_options, with_session};

pub const WORKER_SOURCE: &str = "conductor_worker";
pub const WORKER_RETRY_SOURCE: &str = "conductor_worker_retry";

/// How a worker session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// The agent said the completion marker.
    Completed,
    /// The context budget ran out; a handoff document was captured.
    Handoff,
    /// Turns ran out, or a turn did not complete at the transport level.
    Incomplete,
    /// A cancel signal was observed before a turn.
    Cancelled,
}

impl WorkerStatus {
    fn session_status(self) -> SessionStatus {
        match self {
            WorkerStatus::Completed => SessionStatus::Completed,
            WorkerStatus::Handoff => SessionStatus::Handoff,
            WorkerStatus::Incomplete => SessionStatus::Incomplete,
            WorkerStatus::Cancelled => SessionStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome {
    pub status: WorkerStatus,
    /// Text of the last task turn.
    pub text: String,
    /// Set only when `status` is [`WorkerStatus::Handoff`].
    pub handoff_doc: Option<String>,
    pub usage: SessionUsage,
}

/// Inputs for one worker session.
#[derive(Debug, Clone, Copy)]
pub struct WorkerRequest<'r> {
    pub task: &'r Task,
    pub graph: &'r TaskGraph,
    pub document: &'r str,
    /// Handoff document from the previous session of the same task.
    pub handoff: Option<&'r str>,
}

pub struct WorkerAgent<'a> {
    prompts: &'a PromptEngine,
    config: &'a ConductorConfig,
}

impl<'a> WorkerAgent<'a> {
    pub fn new(prompts: &'a PromptEngine, config: &'a ConductorConfig) -> Self {
        Self { prompts, config }
    }

    #[instrument(skip_all, fields(task = %request.task.id, resumed = request.handoff.is_some()))]
    pub fn run<B, S>(&self, backend: &B, signals: &S, request: WorkerRequest<'_>) -> Result<WorkerOutcome>
    where
        B: AgentBackend + ?Sized,
        S: ControlSignals + ?Sized,
    {
        let WorkerRequest {
            task,
            graph,
            document,
            handoff,
        } = request;
        let working_dir = self.config.working_dir.display().to_string();
        let first_prompt = match handoff {
            Some(doc) => self
                .prompts
                .worker_resume(task, graph, &working_dir, document, doc)?,
            None => self.prompts.worker(task, graph, &working_dir, document)?,
        };
        let system = self.prompts.worker_system()?;
        let options = session_options(self.config, Profile::Developer, WORKER_SOURCE, Some(&task.id));
        let max_turns = self.config.max_worker_turns.max(1);

        let ((status, text, handoff_doc), usage) =
            with_session(backend, &system, &options, |session| {
                let mut prompt = first_prompt;
                let mut text = String::new();
                for turn in 1..=max_turns {
                    if signals.is_cancelled() {
                        info!(turn, "cancel observed before worker turn");
                        return Ok(((WorkerStatus::Cancelled, text, None), SessionStatus::Cancelled));
                    }
                    let result = session.submit(&prompt)?;
                    if !result.is_completed() {
                        info!(turn, status = ?result.status, "worker turn did not complete");
                        let status = WorkerStatus::Incomplete;
                        return Ok(((status, result.text, None), status.session_status()));
                    }
                    text = result.text;

                    let context_tokens = session.last_input_tokens();
                    if is_over_budget(
                        context_tokens,
                        self.config.context_window,
                        self.config.budget_threshold,
                    ) {
                        info!(turn, context_tokens, "context budget reached; requesting handoff");
                        let handoff = session.submit(&self.prompts.handoff()?)?;
                        let doc = (handoff.is_completed() && !handoff.text.trim().is_empty())
                            .then_some(handoff.text);
                        if doc.is_none() {
                            warn!(turn, status = ?handoff.status, "handoff turn produced no document");
                        }
                        let status = WorkerStatus::Handoff;
                        return Ok(((status, text, doc), status.session_status()));
                    }
                    if is_task_complete(&text) {
                        let status = WorkerStatus::Completed;
                        return Ok(((status, text, None), status.session_status()));
                    }
                    debug!(turn, "no completion marker");
                    prompt = CONTINUE_PROMPT.to_string();
                }
                let status = WorkerStatus::Incomplete;
                Ok(((status, text, None), status.session_status()))
            })?;

        info!(status = ?status, cost_usd = usage.cost_usd, "worker session finished");
        Ok(WorkerOutcome {
            status,
            text,
            handoff_doc,
            usage,
        })
    }

    /// One-turn session seeded with failing check output.
    #[instrument(skip_all, fields(task = %task.id))]
    pub fn run_retry<B>(
        &self,
        backend: &B,
        task: &Task,
        graph: &TaskGraph,
        failure: &str,
    ) -> Result<WorkerOutcome>
    where
        B: AgentBackend + ?Sized,
    {
        let system = self.prompts.worker_system()?;
        let prompt = self.prompts.worker_retry(task, graph, failure)?;
        let options = session_options(
            self.config,
            Profile::Developer,
            WORKER_RETRY_SOURCE,
            Some(&task.id),
        );

        let ((status, text), usage) = with_session(backend, &system, &options, |session| {
            let result = session.submit(&prompt)?;
            let status = if result.is_completed() && is_task_complete(&result.text) {
                WorkerStatus::Completed
            } else {
                WorkerStatus::Incomplete
            };
            Ok(((status, result.text), status.session_status()))
        })?;

        info!(status = ?status, cost_usd = usage.cost_usd, "retry session finished");
        Ok(WorkerOutcome {
            status,
            text,
            handoff_doc: None,
            usage,
        })
    }
}
