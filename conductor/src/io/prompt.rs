//! Prompt rendering for planner, worker and reviewer sessions.
//!
//! User prompts are minijinja templates split into marked sections. A rendered
//! prompt that exceeds the byte budget loses droppable sections first, then has
//! its longest remaining section truncated.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::graph::TaskGraph;
use crate::core::types::{Task, VerificationConfig};

const TEMPLATES: [(&str, &str); 9] = [
    ("planner_system", include_str!("prompts/planner_system.md")),
    ("planner", include_str!("prompts/planner.md")),
    ("worker_system", include_str!("prompts/worker_system.md")),
    ("worker", include_str!("prompts/worker.md")),
    ("worker_resume", include_str!("prompts/worker_resume.md")),
    ("worker_retry", include_str!("prompts/worker_retry.md")),
    ("handoff", include_str!("prompts/handoff.md")),
    ("reviewer_system", include_str!("prompts/reviewer_system.md")),
    ("reviewer", include_str!("prompts/reviewer.md")),
];

/// Sent when a worker turn ends without the completion marker.
pub const CONTINUE_PROMPT: &str = "You did not explicitly say 'TASK COMPLETE'. Continue working on this same task and say 'TASK COMPLETE' only when fully done.";

/// Droppable sections, least valuable first.
const DROP_ORDER: [&str; 2] = ["tree", "document"];

const TRUNCATION_NOTICE: &str = "\n[truncated]";

const SECTION_MARKER: &str = r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->";

/// Task fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct TaskContext<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    acceptance_criteria: &'a [String],
}

impl<'a> TaskContext<'a> {
    fn from_task(task: &'a Task) -> Self {
        Self {
            id: &task.id,
            title: &task.title,
            description: &task.description,
            acceptance_criteria: &task.acceptance_criteria,
        }
    }
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
    section_re: Regex,
    budget_bytes: usize,
}

impl PromptEngine {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        let section_re = Regex::new(SECTION_MARKER).context("compile section marker regex")?;
        Ok(Self {
            env,
            section_re,
            budget_bytes,
        })
    }

    pub fn planner_system(&self) -> Result<String> {
        self.render_plain("planner_system")
    }

    pub fn planner(&self, document: &str, tree: &str) -> Result<String> {
        self.render_budgeted(
            "planner",
            context! {
                document => document.trim(),
                tree => non_empty(tree),
            },
        )
    }

    pub fn worker_system(&self) -> Result<String> {
        self.render_plain("worker_system")
    }

    /// First-turn brief for a task.
    pub fn worker(
        &self,
        task: &Task,
        graph: &TaskGraph,
        working_dir: &str,
        document: &str,
    ) -> Result<String> {
        self.render_budgeted(
            "worker",
            context! {
                task => TaskContext::from_task(task),
                project_name => graph.project_name.as_str(),
                working_dir => working_dir,
                document => non_empty(document),
                verification => format_verification(&graph.verification),
            },
        )
    }

    /// First-turn brief for a session continuing from a handoff document.
    pub fn worker_resume(
        &self,
        task: &Task,
        graph: &TaskGraph,
        working_dir: &str,
        document: &str,
        handoff: &str,
    ) -> Result<String> {
        self.render_budgeted(
            "worker_resume",
            context! {
                handoff => handoff.trim(),
                task => TaskContext::from_task(task),
                project_name => graph.project_name.as_str(),
                working_dir => working_dir,
                document => non_empty(document),
                verification => format_verification(&graph.verification),
            },
        )
    }

    pub fn worker_retry(&self, task: &Task, graph: &TaskGraph, failure: &str) -> Result<String> {
        self.render_budgeted(
            "worker_retry",
            context! {
                task => TaskContext::from_task(task),
                failure => failure.trim(),
                verification => format_verification(&graph.verification),
            },
        )
    }

    pub fn handoff(&self) -> Result<String> {
        self.render_plain("handoff")
    }

    pub fn reviewer_system(&self) -> Result<String> {
        self.render_plain("reviewer_system")
    }

    pub fn reviewer(&self, task: &Task, graph: &TaskGraph, diff: &str) -> Result<String> {
        self.render_budgeted(
            "reviewer",
            context! {
                task => TaskContext::from_task(task),
                diff => diff.trim_end(),
                verification => format_verification(&graph.verification),
            },
        )
    }

    fn render_plain(&self, name: &str) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(context! {})
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered.trim().to_string())
    }

    fn render_budgeted(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        let mut sections = parse_sections(&self.section_re, &rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

/// Verification commands as a markdown list.
pub fn format_verification(verification: &VerificationConfig) -> String {
    let lines: Vec<String> = verification
        .commands()
        .into_iter()
        .map(|(label, cmd)| format!("- {}: `{cmd}`", capitalize(label)))
        .collect();
    if lines.is_empty() {
        "No verification commands configured.".to_string()
    } else {
        lines.join("\n")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
/// Empty droppable sections are discarded.
fn parse_sections(section_re: &Regex, rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = section_re.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`], then truncate the longest section.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(longest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let excess = total - budget;
    let before_len = longest.content.len();
    let keep = before_len
        .saturating_sub(excess)
        .saturating_sub(TRUNCATION_NOTICE.len());
    let cut = floor_char_boundary(&longest.content, keep);
    longest.content.truncate(cut);
    longest.content.push_str(TRUNCATION_NOTICE);
    debug!(
        section = %longest.key,
        before_len,
        after_len = longest.content.len(),
        "truncated section for budget"
    );
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::diamond_graph;

    fn engine() -> PromptEngine {
        PromptEngine::new(100_000).expect("engine")
    }

    fn graph_with_checks() -> TaskGraph {
        let mut graph = diamond_graph();
        graph.verification = VerificationConfig {
            test_cmd: Some("cargo test".to_string()),
            lint_cmd: None,
            typecheck_cmd: Some("cargo check".to_string()),
        };
        graph
    }

    #[test]
    fn worker_brief_orders_sections() {
        let graph = graph_with_checks();
        let task = graph.task("T2").expect("T2");
        let prompt = engine()
            .worker(task, &graph, "/repo", "Build the thing.")
            .expect("render");

        let task_pos = prompt.find("## Task: T2 - Task T2").expect("task");
        let project_pos = prompt.find("Working directory: /repo").expect("project");
        let doc_pos = prompt.find("Build the thing.").expect("document");
        let verify_pos = prompt.find("- Test: `cargo test`").expect("verification");
        assert!(task_pos < project_pos);
        assert!(project_pos < doc_pos);
        assert!(doc_pos < verify_pos);
        assert!(prompt.contains("- Typecheck: `cargo check`"));
        assert!(!prompt.contains("Lint"));
        assert!(prompt.contains("- criterion for T2"));
        assert!(!prompt.contains("section:"));
    }

    #[test]
    fn resume_prompt_embeds_handoff_before_task() {
        let graph = graph_with_checks();
        let task = graph.task("T1").expect("T1");
        let prompt = engine()
            .worker_resume(task, &graph, "/repo", "", "Progress: half done")
            .expect("render");
        let handoff_pos = prompt.find("Progress: half done").expect("handoff");
        let task_pos = prompt.find("## Task: T1").expect("task");
        assert!(handoff_pos < task_pos);
        assert!(!prompt.contains("<document>"));
    }

    #[test]
    fn budget_drops_document_before_truncating() {
        let graph = graph_with_checks();
        let task = graph.task("T1").expect("T1");
        let engine = PromptEngine::new(600).expect("engine");
        let prompt = engine
            .worker(task, &graph, "/repo", &"requirement ".repeat(200))
            .expect("render");
        assert!(!prompt.contains("<document>"));
        assert!(prompt.contains("## Task: T1"));
        assert!(prompt.contains("Verification commands"));
    }

    #[test]
    fn oversized_diff_is_truncated_within_budget() {
        let graph = graph_with_checks();
        let task = graph.task("T1").expect("T1");
        let engine = PromptEngine::new(2_000).expect("engine");
        let diff = "+ added line é\n".repeat(1_000);
        let prompt = engine.reviewer(task, &graph, &diff).expect("render");
        assert!(prompt.contains("[truncated]"));
        assert!(prompt.contains("## Task: T1"));
        assert!(prompt.len() <= 2_000 + 2 * 4, "len {}", prompt.len());
    }

    #[test]
    fn planner_prompt_includes_tree_and_schema() {
        let prompt = engine()
            .planner("Make a CLI.", "./src/\n./src/main.rs")
            .expect("render");
        assert!(prompt.contains("Make a CLI."));
        assert!(prompt.contains("./src/main.rs"));
        assert!(prompt.contains("\"depends_on\""));
        let without_tree = engine().planner("Make a CLI.", "  ").expect("render");
        assert!(!without_tree.contains("<tree>"));
    }

    #[test]
    fn system_prompts_mention_marker() {
        let engine = engine();
        assert!(engine.worker_system().expect("render").contains("TASK COMPLETE"));
        assert!(engine.planner_system().expect("render").contains("JSON"));
        assert!(engine.reviewer_system().expect("render").contains("diff"));
        assert!(engine.handoff().expect("render").contains("Remaining work"));
    }

    #[test]
    fn verification_without_commands_says_so() {
        assert_eq!(
            format_verification(&VerificationConfig::default()),
            "No verification commands configured."
        );
    }
}
