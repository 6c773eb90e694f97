//! Side-effecting adapters: processes, git, files, agent sessions.

pub mod agent;
pub mod checks;
pub mod codex;
pub mod config;
pub mod git;
pub mod process;
pub mod project_tree;
pub mod prompt;
pub mod signals;
pub mod state_store;
