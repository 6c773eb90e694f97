//! Deterministic selection logic for the task graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{Task, TaskStatus, VerificationConfig};

/// Directed acyclic graph of tasks produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub project_name: String,
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub verification: VerificationConfig,
}

/// Tally of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
}

impl TaskGraph {
    pub fn new(
        project_name: impl Into<String>,
        tasks: impl IntoIterator<Item = Task>,
        verification: VerificationConfig,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            verification,
        }
    }

    /// PENDING tasks whose every dependency exists and is DONE, ordered by id.
    ///
    /// A dependency missing from the graph keeps the task blocked forever.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| {
                task.depends_on.iter().all(|dep| {
                    self.tasks
                        .get(dep)
                        .is_some_and(|d| d.status == TaskStatus::Done)
                })
            })
            .collect()
    }

    /// Lexicographically smallest ready task.
    pub fn next_ready_task(&self) -> Option<&Task> {
        // BTreeMap iteration is already ordered by id.
        self.ready_tasks().into_iter().next()
    }

    /// True iff the graph is non-empty and every task is DONE.
    pub fn all_done(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .values()
                .all(|task| task.status == TaskStatus::Done)
    }

    /// True while any task is PENDING or IN_PROGRESS.
    pub fn has_remaining_work(&self) -> bool {
        self.tasks.values().any(|task| match task.status {
            TaskStatus::Pending | TaskStatus::InProgress => true,
            TaskStatus::Done | TaskStatus::Failed => false,
        })
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Reset every IN_PROGRESS task to PENDING. Returns the ids that changed.
    pub fn reset_in_progress(&mut self) -> Vec<String> {
        let mut reset = Vec::new();
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Pending;
                reset.push(task.id.clone());
            }
        }
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{diamond_graph, task};

    fn ready_ids(graph: &TaskGraph) -> Vec<&str> {
        graph
            .ready_tasks()
            .into_iter()
            .map(|t| t.id.as_str())
            .collect()
    }

    fn set_status(graph: &mut TaskGraph, id: &str, status: TaskStatus) {
        graph.task_mut(id).expect("task").status = status;
    }

    #[test]
    fn initial_ready_set_is_root_only() {
        let graph = diamond_graph();
        assert_eq!(ready_ids(&graph), vec!["T1"]);
        assert_eq!(graph.next_ready_task().map(|t| t.id.as_str()), Some("T1"));
    }

    #[test]
    fn finishing_root_unblocks_both_branches() {
        let mut graph = diamond_graph();
        set_status(&mut graph, "T1", TaskStatus::Done);
        assert_eq!(ready_ids(&graph), vec!["T2", "T3"]);
        assert_eq!(graph.next_ready_task().map(|t| t.id.as_str()), Some("T2"));
    }

    #[test]
    fn join_waits_for_every_dependency() {
        let mut graph = diamond_graph();
        set_status(&mut graph, "T1", TaskStatus::Done);
        set_status(&mut graph, "T2", TaskStatus::Done);
        assert_eq!(ready_ids(&graph), vec!["T3"]);
        set_status(&mut graph, "T3", TaskStatus::Done);
        assert_eq!(ready_ids(&graph), vec!["T4"]);
    }

    #[test]
    fn failed_root_blocks_everything() {
        let mut graph = diamond_graph();
        set_status(&mut graph, "T1", TaskStatus::Failed);
        assert!(ready_ids(&graph).is_empty());
        assert!(graph.next_ready_task().is_none());
        assert!(!graph.all_done());
    }

    #[test]
    fn missing_dependency_is_never_ready() {
        let graph = TaskGraph::new(
            "p",
            vec![
                task("T1", &[]),
                task("T2", &["T1", "T9"]),
            ],
            VerificationConfig::default(),
        );
        let mut graph = graph;
        set_status(&mut graph, "T1", TaskStatus::Done);
        assert!(ready_ids(&graph).is_empty());
        assert!(graph.next_ready_task().is_none());
    }

    #[test]
    fn next_ready_is_lexicographic_not_insertion_order() {
        let graph = TaskGraph::new(
            "p",
            vec![task("b", &[]), task("a2", &[]), task("a10", &[])],
            VerificationConfig::default(),
        );
        assert_eq!(graph.next_ready_task().map(|t| t.id.as_str()), Some("a10"));
    }

    #[test]
    fn all_done_requires_non_empty_graph() {
        let empty = TaskGraph::new("p", Vec::new(), VerificationConfig::default());
        assert!(!empty.all_done());

        let mut graph = diamond_graph();
        assert!(!graph.all_done());
        for id in ["T1", "T2", "T3", "T4"] {
            set_status(&mut graph, id, TaskStatus::Done);
        }
        assert!(graph.all_done());
    }

    #[test]
    fn in_progress_is_not_ready_until_reset() {
        let mut graph = diamond_graph();
        set_status(&mut graph, "T1", TaskStatus::InProgress);
        assert!(ready_ids(&graph).is_empty());

        let reset = graph.reset_in_progress();
        assert_eq!(reset, vec!["T1".to_string()]);
        assert_eq!(ready_ids(&graph), vec!["T1"]);
    }

    #[test]
    fn status_counts_tally_each_status() {
        let mut graph = diamond_graph();
        set_status(&mut graph, "T1", TaskStatus::Done);
        set_status(&mut graph, "T2", TaskStatus::Failed);
        let counts = graph.status_counts();
        assert_eq!(
            counts,
            StatusCounts {
                pending: 2,
                in_progress: 0,
                done: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn remaining_work_covers_pending_and_in_progress_only() {
        let empty = TaskGraph::new("p", Vec::new(), VerificationConfig::default());
        assert!(!empty.has_remaining_work());

        let mut graph = diamond_graph();
        assert!(graph.has_remaining_work());
        for id in ["T1", "T2", "T3"] {
            set_status(&mut graph, id, TaskStatus::Done);
        }
        set_status(&mut graph, "T4", TaskStatus::InProgress);
        assert!(graph.has_remaining_work());
        set_status(&mut graph, "T4", TaskStatus::Failed);
        assert!(!graph.has_remaining_work());
        set_status(&mut graph, "T4", TaskStatus::Done);
        assert!(!graph.has_remaining_work());
    }
}
