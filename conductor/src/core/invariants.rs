//! Structural invariants of a task graph that JSON Schema cannot express.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::core::graph::TaskGraph;
use crate::core::types::{Task, VerificationConfig};

/// Structural defect found in planner output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate task id '{0}' in plan.")]
    DuplicateTask(String),
    #[error("Task '{task}' depends on unknown tasks: {}", missing.join(", "))]
    UnknownDependencies { task: String, missing: Vec<String> },
    #[error("Dependency cycle detected at task '{task}'.")]
    Cycle { task: String },
}

/// Build a graph from planner tasks, rejecting duplicates, unknown
/// dependencies and cycles.
pub fn build_graph(
    project_name: String,
    tasks: Vec<Task>,
    verification: VerificationConfig,
) -> Result<TaskGraph, GraphError> {
    let mut by_id = BTreeMap::new();
    for task in tasks {
        if by_id.contains_key(&task.id) {
            return Err(GraphError::DuplicateTask(task.id));
        }
        by_id.insert(task.id.clone(), task);
    }
    let graph = TaskGraph {
        project_name,
        tasks: by_id,
        verification,
    };
    validate_graph(&graph)?;
    Ok(graph)
}

/// Check dependency references and acyclicity.
///
/// Tasks are visited in id order, so the reported task is deterministic.
pub fn validate_graph(graph: &TaskGraph) -> Result<(), GraphError> {
    for task in graph.tasks.values() {
        let missing: BTreeSet<&str> = task
            .depends_on
            .iter()
            .map(String::as_str)
            .filter(|dep| !graph.tasks.contains_key(*dep))
            .collect();
        if !missing.is_empty() {
            return Err(GraphError::UnknownDependencies {
                task: task.id.clone(),
                missing: missing.into_iter().map(str::to_string).collect(),
            });
        }
    }
    detect_cycle(graph)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Iterative three-colour DFS over an index arena.
fn detect_cycle(graph: &TaskGraph) -> Result<(), GraphError> {
    let ids: Vec<&str> = graph.tasks.keys().map(String::as_str).collect();
    let index: BTreeMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let edges: Vec<Vec<usize>> = graph
        .tasks
        .values()
        .map(|task| {
            task.depends_on
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .collect()
        })
        .collect();

    let mut colour = vec![Colour::White; ids.len()];
    for root in 0..ids.len() {
        if colour[root] != Colour::White {
            continue;
        }
        // Each frame is (node, position of the next edge to follow).
        let mut stack = vec![(root, 0usize)];
        colour[root] = Colour::Grey;
        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            if let Some(&dep) = edges[node].get(next) {
                frame.1 += 1;
                match colour[dep] {
                    Colour::White => {
                        colour[dep] = Colour::Grey;
                        stack.push((dep, 0));
                    }
                    Colour::Grey => {
                        return Err(GraphError::Cycle {
                            task: ids[dep].to_string(),
                        });
                    }
                    Colour::Black => {}
                }
            } else {
                colour[node] = Colour::Black;
                stack.pop();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    fn build(tasks: Vec<Task>) -> Result<TaskGraph, GraphError> {
        build_graph("p".to_string(), tasks, VerificationConfig::default())
    }

    #[test]
    fn accepts_diamond() {
        let graph = build(vec![
            task("T1", &[]),
            task("T2", &["T1"]),
            task("T3", &["T1"]),
            task("T4", &["T2", "T3"]),
        ])
        .expect("valid graph");
        assert_eq!(graph.tasks.len(), 4);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = build(vec![task("T1", &[]), task("T1", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("T1".to_string()));
    }

    #[test]
    fn unknown_dependencies_are_sorted_and_named() {
        let err = build(vec![task("T1", &["T9", "T3", "T1x"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependencies {
                task: "T1".to_string(),
                missing: vec!["T1x".to_string(), "T3".to_string(), "T9".to_string()],
            }
        );
        assert_eq!(
            err.to_string(),
            "Task 'T1' depends on unknown tasks: T1x, T3, T9"
        );
    }

    #[test]
    fn detects_two_node_cycle() {
        let err = build(vec![task("A", &["B"]), task("B", &["A"])]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn detects_self_dependency() {
        let err = build(vec![task("A", &["A"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                task: "A".to_string()
            }
        );
    }

    #[test]
    fn detects_cycle_behind_acyclic_prefix() {
        let err = build(vec![
            task("A", &[]),
            task("B", &["A", "D"]),
            task("C", &["B"]),
            task("D", &["C"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                task: "B".to_string()
            }
        );
    }

    #[test]
    fn long_chain_does_not_overflow() {
        let tasks: Vec<Task> = (0..5000)
            .map(|i| {
                let id = format!("T{i:05}");
                if i == 0 {
                    task(&id, &[])
                } else {
                    let dep = format!("T{:05}", i - 1);
                    task(&id, &[dep.as_str()])
                }
            })
            .collect();
        build(tasks).expect("long chain is valid");
    }
}
