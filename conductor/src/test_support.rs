//! Test-only helpers: task builders, throwaway git repositories, and scripted
//! agent backends and check runners.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::graph::TaskGraph;
use crate::core::types::{SessionUsage, Task, VerificationConfig};
use crate::io::agent::{
    AgentBackend, AgentSession, SessionOptions, SessionStatus, TurnResult, TurnStatus,
};
use crate::io::checks::{CheckResult, CheckRunner};
use crate::io::git::Git;
use crate::io::signals::FlagSignals;

/// Create a PENDING task with deterministic text fields.
pub fn task(id: &str, deps: &[&str]) -> Task {
    Task::new(
        id,
        format!("Task {id}"),
        format!("Implement {id}"),
        vec![format!("criterion for {id}")],
        deps.iter().map(|d| d.to_string()).collect(),
    )
}

/// T1 <- {T2, T3} <- T4.
pub fn diamond_graph() -> TaskGraph {
    TaskGraph::new(
        "demo",
        [
            task("T1", &[]),
            task("T2", &["T1"]),
            task("T3", &["T1"]),
            task("T4", &["T2", "T3"]),
        ],
        VerificationConfig::default(),
    )
}

/// A git repository in a temp directory with one initial commit on `main`.
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        git(&root, &["init", "-q", "-b", "main"])?;
        git(&root, &["config", "user.email", "conductor@example.com"])?;
        git(&root, &["config", "user.name", "Conductor Tests"])?;
        git(&root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "# demo\n").context("write README")?;
        git(&root, &["add", "-A"])?;
        git(&root, &["commit", "-q", "-m", "initial commit"])?;
        Ok(Self { _temp: temp, root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root, Duration::from_secs(30))
    }

    pub fn current_branch(&self) -> Result<String> {
        git(&self.root, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Subject lines of every commit, newest first.
    pub fn log_subjects(&self) -> Result<Vec<String>> {
        let out = git(&self.root, &["log", "--pretty=%s"])?;
        Ok(out.lines().map(str::to_string).collect())
    }
}

fn git(root: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("spawn git {args:?}"))?;
    if !out.status.success() {
        bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// One scripted agent reply.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub text: String,
    pub status: TurnStatus,
    /// Reported as the session's live context size after this turn.
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// Files written (relative to the session working dir) when the turn runs.
    pub writes: Vec<(PathBuf, String)>,
    /// Flags cancelled when the turn runs.
    pub cancel: Option<FlagSignals>,
    /// Make `submit` return this error instead of a reply.
    pub error: Option<String>,
}

impl ScriptedTurn {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: TurnStatus::Completed,
            input_tokens: 100,
            output_tokens: 10,
            cost_usd: 0.0,
            writes: Vec::new(),
            cancel: None,
            error: None,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: TurnStatus::TimedOut,
            ..Self::reply("")
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::reply("")
        }
    }

    pub fn with_input_tokens(mut self, tokens: u64) -> Self {
        self.input_tokens = tokens;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn writing(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.writes.push((path.into(), contents.into()));
        self
    }

    pub fn cancelling(mut self, signals: &FlagSignals) -> Self {
        self.cancel = Some(signals.clone());
        self
    }
}

/// What a scripted session saw.
#[derive(Debug, Clone)]
pub struct RecordedSession {
    pub system_prompt: String,
    pub options: SessionOptions,
    pub prompts: Vec<String>,
    pub closed: Option<SessionStatus>,
}

impl RecordedSession {
    pub fn source(&self) -> Option<&str> {
        self.options.telemetry_value("source")
    }
}

#[derive(Debug, Default)]
struct Script {
    turns: VecDeque<ScriptedTurn>,
    sessions: Vec<RecordedSession>,
}

/// Backend replaying a fixed queue of turns across every session it opens.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Rc<RefCell<Script>>,
}

impl ScriptedBackend {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Rc::new(RefCell::new(Script {
                turns: turns.into(),
                sessions: Vec::new(),
            })),
        }
    }

    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.script.borrow().sessions.clone()
    }

    pub fn remaining_turns(&self) -> usize {
        self.script.borrow().turns.len()
    }
}

impl AgentBackend for ScriptedBackend {
    fn open(&self, system_prompt: &str, options: &SessionOptions) -> Result<Box<dyn AgentSession>> {
        let mut script = self.script.borrow_mut();
        script.sessions.push(RecordedSession {
            system_prompt: system_prompt.to_string(),
            options: options.clone(),
            prompts: Vec::new(),
            closed: None,
        });
        Ok(Box::new(ScriptedSession {
            script: Rc::clone(&self.script),
            index: script.sessions.len() - 1,
            working_dir: options.working_dir.clone(),
            usage: SessionUsage::default(),
            last_input_tokens: 0,
        }))
    }
}

struct ScriptedSession {
    script: Rc<RefCell<Script>>,
    index: usize,
    working_dir: PathBuf,
    usage: SessionUsage,
    last_input_tokens: u64,
}

impl AgentSession for ScriptedSession {
    fn submit(&mut self, prompt: &str) -> Result<TurnResult> {
        let turn = {
            let mut script = self.script.borrow_mut();
            script.sessions[self.index].prompts.push(prompt.to_string());
            script
                .turns
                .pop_front()
                .ok_or_else(|| anyhow!("scripted backend has no turns left"))?
        };
        if let Some(message) = turn.error {
            bail!(message);
        }
        for (rel, contents) in &turn.writes {
            let path = self.working_dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        if let Some(signals) = &turn.cancel {
            signals.cancel();
        }
        let usage = SessionUsage {
            input_tokens: turn.input_tokens,
            output_tokens: turn.output_tokens,
            cost_usd: turn.cost_usd,
        };
        self.usage.add(&usage);
        self.last_input_tokens = turn.input_tokens;
        Ok(TurnResult {
            text: turn.text,
            status: turn.status,
            usage,
        })
    }

    fn usage(&self) -> SessionUsage {
        self.usage
    }

    fn last_input_tokens(&self) -> u64 {
        self.last_input_tokens
    }

    fn close(&mut self, status: SessionStatus) -> Result<()> {
        self.script.borrow_mut().sessions[self.index].closed = Some(status);
        Ok(())
    }
}

/// Check runner returning queued results in order.
#[derive(Debug, Default)]
pub struct ScriptedCheckRunner {
    results: RefCell<VecDeque<CheckResult>>,
    calls: RefCell<u32>,
}

impl ScriptedCheckRunner {
    pub fn new(results: Vec<CheckResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.borrow()
    }
}

impl CheckRunner for ScriptedCheckRunner {
    fn run_checks(&self, _verification: &VerificationConfig) -> Result<CheckResult> {
        *self.calls.borrow_mut() += 1;
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted check runner has no results left"))
    }
}
