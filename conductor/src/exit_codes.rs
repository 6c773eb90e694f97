//! Stable exit codes for conductor CLI commands.

use crate::core::types::RunStatus;

/// Run completed, was cancelled, or the command succeeded.
pub const OK: i32 = 0;
/// Structural, environment or I/O error.
pub const ERROR: i32 = 1;
/// No ready tasks remained and some task failed or was blocked.
pub const FAILED: i32 = 2;
/// A task needs operator attention; resume with `--resume`.
pub const PAUSED: i32 = 3;

/// Exit code reported for a run with `status`. A run still in progress
/// reports [`OK`].
pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Running | RunStatus::Completed | RunStatus::Cancelled => OK,
        RunStatus::Failed => FAILED,
        RunStatus::PausedUserAttention => PAUSED,
        RunStatus::Error => ERROR,
    }
}
