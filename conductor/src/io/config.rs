//! Conductor configuration.
//!
//! Settings are resolved once, when a run is constructed, from layers in
//! precedence order: CLI flags, TOML file, environment, built-in defaults.
//! The resolved [`ConductorConfig`] is persisted with the run state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::VerificationConfig;

/// File looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "conductor.toml";

pub const DEFAULT_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_CONTEXT_WINDOW: u64 = 400_000;
pub const DEFAULT_BUDGET_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MAX_WORKER_TURNS: u32 = 3;
pub const DEFAULT_MAX_WORKER_SESSIONS: u32 = 3;
pub const DEFAULT_MAX_TASK_ATTEMPTS: u32 = 3;
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 60 * 60;
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;
pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 200_000;
pub const DEFAULT_AGENT_PROGRAM: &str = "codex";

/// Fully resolved configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Requirements document to plan from.
    pub document_path: PathBuf,
    /// Repository the agents work in.
    pub working_dir: PathBuf,
    pub model: String,
    pub service_tier: Option<String>,
    /// Explicit state file; otherwise derived from the run id.
    pub state_path: Option<PathBuf>,
    pub context_window: u64,
    /// Fraction of `context_window` at which a worker hands off, in (0, 1].
    pub budget_threshold: f64,
    pub max_worker_turns: u32,
    pub max_worker_sessions: u32,
    pub max_task_attempts: u32,
    pub test_cmd: Option<String>,
    pub lint_cmd: Option<String>,
    pub typecheck_cmd: Option<String>,
    pub enable_reviewer: bool,
    pub git_branch: Option<String>,
    pub resume: bool,
    /// On resume, move every FAILED task back to PENDING.
    pub retry_failed: bool,
    pub project_id: Option<String>,
    pub team_id: Option<String>,
    pub check_timeout_secs: u64,
    pub turn_timeout_secs: u64,
    pub git_timeout_secs: u64,
    pub output_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
    /// Executable used for agent sessions.
    pub agent_program: String,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            document_path: PathBuf::new(),
            working_dir: PathBuf::from("."),
            model: DEFAULT_MODEL.to_string(),
            service_tier: None,
            state_path: None,
            context_window: DEFAULT_CONTEXT_WINDOW,
            budget_threshold: DEFAULT_BUDGET_THRESHOLD,
            max_worker_turns: DEFAULT_MAX_WORKER_TURNS,
            max_worker_sessions: DEFAULT_MAX_WORKER_SESSIONS,
            max_task_attempts: DEFAULT_MAX_TASK_ATTEMPTS,
            test_cmd: None,
            lint_cmd: None,
            typecheck_cmd: None,
            enable_reviewer: true,
            git_branch: None,
            resume: false,
            retry_failed: false,
            project_id: None,
            team_id: None,
            check_timeout_secs: DEFAULT_CHECK_TIMEOUT_SECS,
            turn_timeout_secs: DEFAULT_TURN_TIMEOUT_SECS,
            git_timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
            agent_program: DEFAULT_AGENT_PROGRAM.to_string(),
            input_cost_per_mtok: 0.0,
            output_cost_per_mtok: 0.0,
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.budget_threshold > 0.0 && self.budget_threshold <= 1.0) {
            return Err(anyhow!(
                "budget_threshold must be in (0, 1], got {}",
                self.budget_threshold
            ));
        }
        if self.context_window == 0 {
            return Err(anyhow!("context_window must be > 0"));
        }
        if self.max_worker_turns == 0 {
            return Err(anyhow!("max_worker_turns must be > 0"));
        }
        if self.max_worker_sessions == 0 {
            return Err(anyhow!("max_worker_sessions must be > 0"));
        }
        if self.max_task_attempts == 0 {
            return Err(anyhow!("max_task_attempts must be > 0"));
        }
        if self.check_timeout_secs == 0 {
            return Err(anyhow!("check_timeout_secs must be > 0"));
        }
        if self.turn_timeout_secs == 0 {
            return Err(anyhow!("turn_timeout_secs must be > 0"));
        }
        if self.git_timeout_secs == 0 {
            return Err(anyhow!("git_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.agent_program.trim().is_empty() {
            return Err(anyhow!("agent_program must not be empty"));
        }
        if self.input_cost_per_mtok < 0.0 || self.output_cost_per_mtok < 0.0 {
            return Err(anyhow!("token prices must be >= 0"));
        }
        Ok(())
    }

    /// Verification commands set explicitly by the operator.
    pub fn verification_overrides(&self) -> VerificationConfig {
        VerificationConfig {
            test_cmd: self.test_cmd.clone(),
            lint_cmd: self.lint_cmd.clone(),
            typecheck_cmd: self.typecheck_cmd.clone(),
        }
    }
}

/// One layer of optional settings. The TOML file deserializes into this
/// shape, and CLI flags and environment defaults are expressed with it too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub model: Option<String>,
    pub service_tier: Option<String>,
    pub context_window: Option<u64>,
    pub budget_threshold: Option<f64>,
    pub max_worker_turns: Option<u32>,
    pub max_worker_sessions: Option<u32>,
    pub max_task_attempts: Option<u32>,
    pub test_cmd: Option<String>,
    pub lint_cmd: Option<String>,
    pub typecheck_cmd: Option<String>,
    pub enable_reviewer: Option<bool>,
    pub git_branch: Option<String>,
    pub project_id: Option<String>,
    pub team_id: Option<String>,
    pub check_timeout_secs: Option<u64>,
    pub turn_timeout_secs: Option<u64>,
    pub git_timeout_secs: Option<u64>,
    pub output_limit_bytes: Option<usize>,
    pub prompt_budget_bytes: Option<usize>,
    pub agent_program: Option<String>,
    pub input_cost_per_mtok: Option<f64>,
    pub output_cost_per_mtok: Option<f64>,
}

impl ConfigLayer {
    /// Fill every unset field of `self` from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            model: self.model.or(lower.model),
            service_tier: self.service_tier.or(lower.service_tier),
            context_window: self.context_window.or(lower.context_window),
            budget_threshold: self.budget_threshold.or(lower.budget_threshold),
            max_worker_turns: self.max_worker_turns.or(lower.max_worker_turns),
            max_worker_sessions: self.max_worker_sessions.or(lower.max_worker_sessions),
            max_task_attempts: self.max_task_attempts.or(lower.max_task_attempts),
            test_cmd: self.test_cmd.or(lower.test_cmd),
            lint_cmd: self.lint_cmd.or(lower.lint_cmd),
            typecheck_cmd: self.typecheck_cmd.or(lower.typecheck_cmd),
            enable_reviewer: self.enable_reviewer.or(lower.enable_reviewer),
            git_branch: self.git_branch.or(lower.git_branch),
            project_id: self.project_id.or(lower.project_id),
            team_id: self.team_id.or(lower.team_id),
            check_timeout_secs: self.check_timeout_secs.or(lower.check_timeout_secs),
            turn_timeout_secs: self.turn_timeout_secs.or(lower.turn_timeout_secs),
            git_timeout_secs: self.git_timeout_secs.or(lower.git_timeout_secs),
            output_limit_bytes: self.output_limit_bytes.or(lower.output_limit_bytes),
            prompt_budget_bytes: self.prompt_budget_bytes.or(lower.prompt_budget_bytes),
            agent_program: self.agent_program.or(lower.agent_program),
            input_cost_per_mtok: self.input_cost_per_mtok.or(lower.input_cost_per_mtok),
            output_cost_per_mtok: self.output_cost_per_mtok.or(lower.output_cost_per_mtok),
        }
    }

    /// Environment-derived defaults (`CONDUCTOR_MODEL`, then `OPENAI_MODEL`;
    /// `CONDUCTOR_SERVICE_TIER`). Empty values are ignored.
    pub fn from_env(env: impl Fn(&str) -> Option<String>) -> ConfigLayer {
        let lookup = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        ConfigLayer {
            model: lookup("CONDUCTOR_MODEL").or_else(|| lookup("OPENAI_MODEL")),
            service_tier: lookup("CONDUCTOR_SERVICE_TIER"),
            ..ConfigLayer::default()
        }
    }
}

/// Per-invocation settings that are not layered.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub document_path: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub resume: bool,
    pub retry_failed: bool,
}

/// Resolve the final configuration from CLI options and flags, the config
/// file, and the injected environment lookup.
pub fn resolve_config(
    options: &RunOptions,
    cli: ConfigLayer,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ConductorConfig> {
    let working_dir = absolute(options.working_dir.as_deref().unwrap_or(Path::new(".")))?;
    let file = match config_file_path(options.config_path.as_deref(), &working_dir)? {
        Some(path) => load_config_layer(&path)?,
        None => ConfigLayer::default(),
    };
    let merged = cli.or(file).or(ConfigLayer::from_env(env));

    let defaults = ConductorConfig::default();
    let config = ConductorConfig {
        document_path: absolute(&options.document_path)?,
        working_dir,
        model: merged.model.unwrap_or(defaults.model),
        service_tier: merged.service_tier,
        state_path: options.state_path.as_deref().map(absolute).transpose()?,
        context_window: merged.context_window.unwrap_or(defaults.context_window),
        budget_threshold: merged.budget_threshold.unwrap_or(defaults.budget_threshold),
        max_worker_turns: merged.max_worker_turns.unwrap_or(defaults.max_worker_turns),
        max_worker_sessions: merged
            .max_worker_sessions
            .unwrap_or(defaults.max_worker_sessions),
        max_task_attempts: merged.max_task_attempts.unwrap_or(defaults.max_task_attempts),
        test_cmd: merged.test_cmd,
        lint_cmd: merged.lint_cmd,
        typecheck_cmd: merged.typecheck_cmd,
        enable_reviewer: merged.enable_reviewer.unwrap_or(defaults.enable_reviewer),
        git_branch: merged.git_branch,
        resume: options.resume,
        retry_failed: options.retry_failed,
        project_id: merged.project_id,
        team_id: merged.team_id,
        check_timeout_secs: merged
            .check_timeout_secs
            .unwrap_or(defaults.check_timeout_secs),
        turn_timeout_secs: merged.turn_timeout_secs.unwrap_or(defaults.turn_timeout_secs),
        git_timeout_secs: merged.git_timeout_secs.unwrap_or(defaults.git_timeout_secs),
        output_limit_bytes: merged
            .output_limit_bytes
            .unwrap_or(defaults.output_limit_bytes),
        prompt_budget_bytes: merged
            .prompt_budget_bytes
            .unwrap_or(defaults.prompt_budget_bytes),
        agent_program: merged.agent_program.unwrap_or(defaults.agent_program),
        input_cost_per_mtok: merged
            .input_cost_per_mtok
            .unwrap_or(defaults.input_cost_per_mtok),
        output_cost_per_mtok: merged
            .output_cost_per_mtok
            .unwrap_or(defaults.output_cost_per_mtok),
    };
    config.validate()?;
    debug!(model = %config.model, working_dir = %config.working_dir.display(), "config resolved");
    Ok(config)
}

/// Explicit config path (must exist), else `<working_dir>/conductor.toml` if present.
pub fn config_file_path(explicit: Option<&Path>, working_dir: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(anyhow!("config file not found: {}", path.display()));
        }
        return Ok(Some(path.to_path_buf()));
    }
    let candidate = working_dir.join(CONFIG_FILE_NAME);
    Ok(candidate.exists().then_some(candidate))
}

/// Load one settings layer from a TOML file.
pub fn load_config_layer(path: &Path) -> Result<ConfigLayer> {
    debug!(path = %path.display(), "loading config file");
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let layer: ConfigLayer =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(layer)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolve path {}", path.display()))
}
