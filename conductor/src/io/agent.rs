//! Agent session abstraction.
//!
//! The [`AgentBackend`] trait decouples the planner, worker and reviewer from
//! the concrete agent runtime (currently `codex exec`). Tests use scripted
//! backends that return predetermined turns without spawning processes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

use crate::core::types::SessionUsage;

/// Tool-permission profile for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// May inspect the repository but not modify it.
    Readonly,
    /// May edit files and run commands in the working directory.
    Developer,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Readonly => "readonly",
            Profile::Developer => "developer",
        }
    }
}

/// Parameters fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub profile: Profile,
    pub model: String,
    pub service_tier: Option<String>,
    pub working_dir: PathBuf,
    /// Approve tool calls without asking.
    pub auto_approve: bool,
    /// Free-form metadata attached to the session (`source`, `task_id`, ...).
    pub telemetry: BTreeMap<String, String>,
}

impl SessionOptions {
    /// Value of a telemetry key, if set.
    pub fn telemetry_value(&self, key: &str) -> Option<&str> {
        self.telemetry.get(key).map(String::as_str)
    }
}

/// How a single turn ended at the transport level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    TimedOut,
    Failed { message: String },
}

/// Result of submitting one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    /// Final assistant text for the turn.
    pub text: String,
    pub status: TurnStatus,
    /// Tokens and cost spent by this turn alone.
    pub usage: SessionUsage,
}

impl TurnResult {
    pub fn is_completed(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}

/// Final status reported when a session is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    Handoff,
    Incomplete,
    Cancelled,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Completed => "completed",
            SessionStatus::Handoff => "handoff",
            SessionStatus::Incomplete => "incomplete",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Error => "error",
        }
    }
}

/// A live conversation with an agent.
pub trait AgentSession {
    /// Submit a prompt and block until the turn ends.
    fn submit(&mut self, prompt: &str) -> Result<TurnResult>;
    /// Cumulative usage across every turn so far.
    fn usage(&self) -> SessionUsage;
    /// Input tokens consumed by the most recent turn (the live context size).
    fn last_input_tokens(&self) -> u64;
    fn close(&mut self, status: SessionStatus) -> Result<()>;
}

/// Factory for agent sessions.
pub trait AgentBackend {
    fn open(&self, system_prompt: &str, options: &SessionOptions) -> Result<Box<dyn AgentSession>>;
}

/// Price a token count with per-million-token rates.
pub fn price_usage(
    input_tokens: u64,
    output_tokens: u64,
    input_cost_per_mtok: f64,
    output_cost_per_mtok: f64,
) -> SessionUsage {
    let cost_usd = input_tokens as f64 / 1_000_000.0 * input_cost_per_mtok
        + output_tokens as f64 / 1_000_000.0 * output_cost_per_mtok;
    SessionUsage {
        input_tokens,
        output_tokens,
        cost_usd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_per_million_tokens() {
        let usage = price_usage(2_000_000, 500_000, 1.25, 10.0);
        assert_eq!(usage.input_tokens, 2_000_000);
        assert!((usage.cost_usd - 7.5).abs() < 1e-9);
        assert_eq!(price_usage(10, 10, 0.0, 0.0).cost_usd, 0.0);
    }
}
