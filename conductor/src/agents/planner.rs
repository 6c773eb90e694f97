//! Planner agent: turns a requirements document into a validated task graph.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Validator, validator_for};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::core::extract::first_json_object;
use crate::core::graph::TaskGraph;
use crate::core::invariants::build_graph;
use crate::core::types::{SessionUsage, Task, VerificationConfig};
use crate::io::agent::{AgentBackend, Profile, SessionStatus, TurnStatus};
use crate::io::config::ConductorConfig;
use crate::io::project_tree::{DEFAULT_MAX_DEPTH, project_tree};
use crate::io::prompt::PromptEngine;

use super::{session_options, with_session};

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

pub const PLANNER_SOURCE: &str = "conductor_planner";

const UNNAMED_PROJECT: &str = "unnamed";

#[derive(Debug, Deserialize)]
struct RawPlan {
    project_name: Option<String>,
    #[serde(default)]
    verification: VerificationConfig,
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    title: String,
    description: String,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// Graph produced by a planner session plus what the session cost.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub graph: TaskGraph,
    pub usage: SessionUsage,
}

pub struct PlannerAgent<'a> {
    prompts: &'a PromptEngine,
    schema: Validator,
}

impl<'a> PlannerAgent<'a> {
    pub fn new(prompts: &'a PromptEngine) -> Result<Self> {
        let schema_value: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
        let schema =
            validator_for(&schema_value).map_err(|err| anyhow!("invalid plan schema: {}", err))?;
        Ok(Self { prompts, schema })
    }

    #[instrument(skip_all, fields(working_dir = %config.working_dir.display()))]
    pub fn run<B: AgentBackend + ?Sized>(
        &self,
        backend: &B,
        config: &ConductorConfig,
        document: &str,
    ) -> Result<PlanOutcome> {
        let tree = project_tree(&config.working_dir, DEFAULT_MAX_DEPTH)?;
        let system = self.prompts.planner_system()?;
        let prompt = self.prompts.planner(document, &tree)?;
        let options = session_options(config, Profile::Readonly, PLANNER_SOURCE, None);

        let (graph, usage) = with_session(backend, &system, &options, |session| {
            let turn = session.submit(&prompt)?;
            match turn.status {
                TurnStatus::Completed => {}
                TurnStatus::TimedOut => bail!("Planner session timed out."),
                TurnStatus::Failed { message } => bail!("Planner session failed: {message}"),
            }
            let graph = self.parse_plan(&turn.text, config)?;
            Ok((graph, SessionStatus::Completed))
        })?;

        info!(
            project = %graph.project_name,
            tasks = graph.tasks.len(),
            "plan accepted"
        );
        Ok(PlanOutcome { graph, usage })
    }

    /// Extract, schema-check and structurally validate planner output.
    pub fn parse_plan(&self, text: &str, config: &ConductorConfig) -> Result<TaskGraph> {
        let raw = first_json_object(text)
            .ok_or_else(|| anyhow!("No JSON object found in planner output."))?;
        let value = Value::Object(raw);
        if !self.schema.is_valid(&value) {
            let messages = self
                .schema
                .iter_errors(&value)
                .map(|err| err.to_string())
                .collect::<Vec<_>>();
            bail!(
                "planner output failed schema validation: {}",
                messages.join("; ")
            );
        }
        let plan: RawPlan =
            serde_json::from_value(value).context("deserialize planner output")?;

        let overrides = config.verification_overrides();
        let verification = VerificationConfig {
            test_cmd: overrides.test_cmd.or(plan.verification.test_cmd),
            lint_cmd: overrides.lint_cmd.or(plan.verification.lint_cmd),
            typecheck_cmd: overrides.typecheck_cmd.or(plan.verification.typecheck_cmd),
        };
        let tasks = plan
            .tasks
            .into_iter()
            .map(|t| Task::new(t.id, t.title, t.description, t.acceptance_criteria, t.depends_on))
            .collect();
        let project_name = plan
            .project_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNNAMED_PROJECT.to_string());

        Ok(build_graph(project_name, tasks, verification)?)
    }
}
