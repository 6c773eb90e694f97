//! Task-graph conductor for autonomous coding agents.
//!
//! A planner session turns a requirements document into a dependency graph of
//! tasks. The scheduler then drives each ready task through a worker session
//! (with context-budget handoffs), a verification gate, an optional reviewer,
//! and a git commit, persisting crash-safe state after every step.
//!
//! - **[`core`]**: Pure, deterministic logic (graph queries and validation,
//!   budget rule, completion marker). No I/O.
//! - **[`io`]**: Side effects (git, processes, agent sessions, state files,
//!   configuration, control sentinels). Behind traits where tests need fakes.
//! - **[`agents`]**: Planner, worker and reviewer sessions.
//!
//! Orchestration lives in [`scheduler`] and [`start`]; [`summary`] renders
//! the operator report.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod scheduler;
pub mod start;
pub mod summary;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
