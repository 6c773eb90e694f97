//! Agents driven by the scheduler: planner, worker and reviewer.
//!
//! Each agent opens one session per invocation through an [`AgentBackend`]
//! and always closes it, reporting `error` when a turn fails.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::warn;

use crate::core::types::SessionUsage;
use crate::io::agent::{AgentBackend, AgentSession, Profile, SessionOptions, SessionStatus};
use crate::io::config::ConductorConfig;

pub mod planner;
pub mod reviewer;
pub mod worker;

pub(crate) fn session_options(
    config: &ConductorConfig,
    profile: Profile,
    source: &str,
    task_id: Option<&str>,
) -> SessionOptions {
    let mut telemetry = BTreeMap::new();
    telemetry.insert("source".to_string(), source.to_string());
    if let Some(task_id) = task_id {
        telemetry.insert("task_id".to_string(), task_id.to_string());
    }
    if let Some(project_id) = &config.project_id {
        telemetry.insert("project_id".to_string(), project_id.clone());
    }
    if let Some(team_id) = &config.team_id {
        telemetry.insert("team_id".to_string(), team_id.clone());
    }
    SessionOptions {
        profile,
        model: config.model.clone(),
        service_tier: config.service_tier.clone(),
        working_dir: config.working_dir.clone(),
        auto_approve: true,
        telemetry,
    }
}

/// Open a session, run `body`, and close the session with the status `body`
/// reports (or `error` if it fails). Returns the body's value and the
/// session's total usage.
pub(crate) fn with_session<B, T>(
    backend: &B,
    system_prompt: &str,
    options: &SessionOptions,
    body: impl FnOnce(&mut dyn AgentSession) -> Result<(T, SessionStatus)>,
) -> Result<(T, SessionUsage)>
where
    B: AgentBackend + ?Sized,
{
    let mut session = backend.open(system_prompt, options)?;
    match body(session.as_mut()) {
        Ok((value, status)) => {
            let usage = session.usage();
            session.close(status)?;
            Ok((value, usage))
        }
        Err(err) => {
            if let Err(close_err) = session.close(SessionStatus::Error) {
                warn!(error = %close_err, "failed to close agent session");
            }
            Err(err)
        }
    }
}
