//! Reviewer agent: a fresh session that inspects a task's diff and fixes
//! what it finds in place.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::graph::TaskGraph;
use crate::core::types::{SessionUsage, Task};
use crate::io::agent::{AgentBackend, Profile, SessionStatus};
use crate::io::config::ConductorConfig;
use crate::io::prompt::PromptEngine;

use super::{session_options, with_session};

pub const REVIEWER_SOURCE: &str = "conductor_reviewer";

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    /// Free-text summary from the reviewer.
    pub summary: String,
    pub usage: SessionUsage,
}

pub struct ReviewerAgent<'a> {
    prompts: &'a PromptEngine,
    config: &'a ConductorConfig,
}

impl<'a> ReviewerAgent<'a> {
    pub fn new(prompts: &'a PromptEngine, config: &'a ConductorConfig) -> Self {
        Self { prompts, config }
    }

    #[instrument(skip_all, fields(task = %task.id, diff_bytes = diff.len()))]
    pub fn run<B: AgentBackend + ?Sized>(
        &self,
        backend: &B,
        task: &Task,
        graph: &TaskGraph,
        diff: &str,
    ) -> Result<ReviewOutcome> {
        let system = self.prompts.reviewer_system()?;
        let prompt = self.prompts.reviewer(task, graph, diff)?;
        let options = session_options(
            self.config,
            Profile::Developer,
            REVIEWER_SOURCE,
            Some(&task.id),
        );

        let (summary, usage) = with_session(backend, &system, &options, |session| {
            let turn = session.submit(&prompt)?;
            if !turn.is_completed() {
                warn!(status = ?turn.status, "reviewer turn did not complete");
                return Ok((turn.text, SessionStatus::Incomplete));
            }
            Ok((turn.text, SessionStatus::Completed))
        })?;

        info!(cost_usd = usage.cost_usd, "review finished");
        Ok(ReviewOutcome { summary, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::VerificationConfig;
    use crate::test_support::{ScriptedBackend, ScriptedTurn, diamond_graph};

    #[test]
    fn reviews_diff_in_developer_session() {
        let prompts = PromptEngine::new(100_000).expect("engine");
        let cfg = ConductorConfig {
            project_id: Some("proj-1".to_string()),
            ..ConductorConfig::default()
        };
        let mut graph = diamond_graph();
        graph.verification = VerificationConfig {
            test_cmd: Some("pytest".to_string()),
            ..VerificationConfig::default()
        };
        let task = graph.task("T3").expect("T3").clone();
        let backend = ScriptedBackend::new(vec![
            ScriptedTurn::reply("Renamed a variable; tests pass.").with_cost(0.2),
        ]);

        let outcome = ReviewerAgent::new(&prompts, &cfg)
            .run(&backend, &task, &graph, "+fn added() {}\n")
            .expect("review");

        assert_eq!(outcome.summary, "Renamed a variable; tests pass.");
        assert!((outcome.usage.cost_usd - 0.2).abs() < 1e-9);
        let session = &backend.sessions()[0];
        assert_eq!(session.options.profile, Profile::Developer);
        assert_eq!(session.source(), Some(REVIEWER_SOURCE));
        assert_eq!(session.options.telemetry_value("project_id"), Some("proj-1"));
        assert_eq!(session.options.telemetry_value("team_id"), None);
        assert!(session.prompts[0].contains("+fn added() {}"));
        assert!(session.prompts[0].contains("- Test: `pytest`"));
        assert!(session.prompts[0].contains("- criterion for T3"));
        assert_eq!(session.closed, Some(SessionStatus::Completed));
    }
}
