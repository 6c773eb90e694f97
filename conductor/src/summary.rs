//! Plain-text summary of a run for operators.

use std::fmt::Write;
use std::path::Path;

use crate::core::types::truncate_chars;
use crate::io::state_store::ConductorState;

const TASK_COLUMN_MAX: usize = 48;
const COMMIT_CHARS: usize = 8;

/// Render the per-task table, total cost, final status and state path.
pub fn render_summary(state: &ConductorState, state_path: &Path) -> String {
    let mut out = String::new();
    if let Some(graph) = &state.graph {
        let rows: Vec<[String; 6]> = graph
            .tasks
            .values()
            .map(|task| {
                let usage = state.usage.get(&task.id);
                [
                    truncate_chars(&format!("{}: {}", task.id, task.title), TASK_COLUMN_MAX),
                    task.status.as_str().to_string(),
                    task.attempts.to_string(),
                    task.last_revision()
                        .map(|sha| truncate_chars(sha, COMMIT_CHARS))
                        .unwrap_or_else(|| "-".to_string()),
                    usage.map_or_else(|| "-".to_string(), |u| format!("${:.4}", u.worker_cost_usd)),
                    usage.map_or_else(
                        || "-".to_string(),
                        |u| format!("${:.4}", u.reviewer_cost_usd),
                    ),
                ]
            })
            .collect();
        let header = ["Task", "Status", "Attempts", "Commit", "Worker $", "Reviewer $"];
        let mut widths = header.map(|h| h.chars().count());
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let _ = writeln!(out, "Conductor summary: {}", graph.project_name);
        push_row(&mut out, &header.map(str::to_string), &widths);
        for row in &rows {
            push_row(&mut out, row, &widths);
        }
    }
    let _ = writeln!(out, "Total cost: ${:.4}", state.total_cost_usd());
    let _ = writeln!(out, "Final status: {}", state.status.as_str());
    let _ = writeln!(out, "State saved to: {}", state_path.display());
    out
}

/// Text columns are left-aligned, numeric columns right-aligned.
fn push_row(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    let line = cells
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(idx, (cell, &width))| match idx {
            0 | 1 | 3 => format!("{cell:<width$}"),
            _ => format!("{cell:>width$}"),
        })
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(out, "{}", line.trim_end());
}
