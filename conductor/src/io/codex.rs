//! Agent backend that drives `codex exec --json`.
//!
//! Each turn is one `codex exec` process. The first turn starts a thread (the
//! system prompt is prepended to the user prompt); later turns resume it by id.
//! The JSONL event stream is teed to a per-session log file.

use std::cell::Cell;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::SessionUsage;
use crate::io::agent::{
    AgentBackend, AgentSession, Profile, SessionOptions, SessionStatus, TurnResult, TurnStatus,
    price_usage,
};
use crate::io::config::ConductorConfig;
use crate::io::process::{is_not_found, run_command};

/// Spawns one `codex exec` process per turn.
#[derive(Debug)]
pub struct CodexBackend {
    program: String,
    turn_timeout: Duration,
    output_limit_bytes: usize,
    log_dir: Option<PathBuf>,
    input_cost_per_mtok: f64,
    output_cost_per_mtok: f64,
    opened: Cell<u32>,
}

impl CodexBackend {
    pub fn new(config: &ConductorConfig, log_dir: Option<PathBuf>) -> Self {
        Self {
            program: config.agent_program.clone(),
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            log_dir,
            input_cost_per_mtok: config.input_cost_per_mtok,
            output_cost_per_mtok: config.output_cost_per_mtok,
            opened: Cell::new(0),
        }
    }

    fn log_path(&self, options: &SessionOptions) -> Option<PathBuf> {
        let dir = self.log_dir.as_ref()?;
        let seq = self.opened.get();
        let source = options.telemetry_value("source").unwrap_or("session");
        let name = match options.telemetry_value("task_id") {
            Some(task) => format!("{seq:03}-{source}-{task}.jsonl"),
            None => format!("{seq:03}-{source}.jsonl"),
        };
        Some(dir.join(name))
    }
}

impl AgentBackend for CodexBackend {
    fn open(&self, system_prompt: &str, options: &SessionOptions) -> Result<Box<dyn AgentSession>> {
        self.opened.set(self.opened.get() + 1);
        let log_path = self.log_path(options);
        if let Some(path) = &log_path {
            write_log_line(
                path,
                &serde_json::json!({
                    "conductor.session": "open",
                    "profile": options.profile.as_str(),
                    "model": options.model,
                    "telemetry": options.telemetry,
                }),
            )?;
        }
        info!(
            profile = options.profile.as_str(),
            source = options.telemetry_value("source"),
            "opening codex session"
        );
        Ok(Box::new(CodexSession {
            program: self.program.clone(),
            turn_timeout: self.turn_timeout,
            output_limit_bytes: self.output_limit_bytes,
            input_cost_per_mtok: self.input_cost_per_mtok,
            output_cost_per_mtok: self.output_cost_per_mtok,
            system_prompt: system_prompt.to_string(),
            options: options.clone(),
            log_path,
            thread_id: None,
            usage: SessionUsage::default(),
            last_input_tokens: 0,
        }))
    }
}

struct CodexSession {
    program: String,
    turn_timeout: Duration,
    output_limit_bytes: usize,
    input_cost_per_mtok: f64,
    output_cost_per_mtok: f64,
    system_prompt: String,
    options: SessionOptions,
    log_path: Option<PathBuf>,
    thread_id: Option<String>,
    usage: SessionUsage,
    last_input_tokens: u64,
}

impl CodexSession {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(exec_args(&self.options, self.thread_id.as_deref()));
        cmd.current_dir(&self.options.working_dir);
        cmd
    }
}

impl AgentSession for CodexSession {
    #[instrument(skip_all, fields(thread_id = ?self.thread_id))]
    fn submit(&mut self, prompt: &str) -> Result<TurnResult> {
        let input = match self.thread_id {
            None => format!("{}\n\n{}", self.system_prompt.trim_end(), prompt),
            Some(_) => prompt.to_string(),
        };
        let output = match run_command(
            self.command(),
            Some(input.as_bytes()),
            self.turn_timeout,
            self.output_limit_bytes,
            self.log_path.as_deref(),
        ) {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                return Err(err.context(format!("agent program '{}' not found", self.program)));
            }
            Err(err) => return Err(err.context("run codex exec")),
        };

        let events = parse_exec_events(&output.stdout_text());
        if self.thread_id.is_none() {
            self.thread_id = events.thread_id.clone();
        }
        let turn_usage = price_usage(
            events.input_tokens,
            events.output_tokens,
            self.input_cost_per_mtok,
            self.output_cost_per_mtok,
        );
        self.usage.add(&turn_usage);
        if events.input_tokens > 0 {
            self.last_input_tokens = events.input_tokens;
        }

        let status = if output.timed_out {
            warn!(timeout_secs = self.turn_timeout.as_secs(), "codex turn timed out");
            TurnStatus::TimedOut
        } else if let Some(message) = events.error {
            warn!(%message, "codex turn failed");
            TurnStatus::Failed { message }
        } else if !output.status.success() {
            let stderr = output.stderr_text();
            warn!(exit_code = ?output.status.code(), "codex exec exited non-zero");
            TurnStatus::Failed {
                message: format!(
                    "codex exec exited with {:?}: {}",
                    output.status.code(),
                    stderr.trim()
                ),
            }
        } else {
            TurnStatus::Completed
        };

        debug!(
            input_tokens = events.input_tokens,
            output_tokens = events.output_tokens,
            "codex turn finished"
        );
        Ok(TurnResult {
            text: events.last_message.unwrap_or_default(),
            status,
            usage: turn_usage,
        })
    }

    fn usage(&self) -> SessionUsage {
        self.usage
    }

    fn last_input_tokens(&self) -> u64 {
        self.last_input_tokens
    }

    fn close(&mut self, status: SessionStatus) -> Result<()> {
        info!(status = status.as_str(), thread_id = ?self.thread_id, "closing codex session");
        if let Some(path) = &self.log_path {
            write_log_line(
                path,
                &serde_json::json!({
                    "conductor.session": "close",
                    "status": status.as_str(),
                    "input_tokens": self.usage.input_tokens,
                    "output_tokens": self.usage.output_tokens,
                    "cost_usd": self.usage.cost_usd,
                }),
            )?;
        }
        Ok(())
    }
}

/// Arguments for one `codex exec` turn; the prompt is read from stdin.
fn exec_args(options: &SessionOptions, thread_id: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "exec".into(),
        "--json".into(),
        "--skip-git-repo-check".into(),
        "-C".into(),
        options.working_dir.display().to_string(),
        "-m".into(),
        options.model.clone(),
    ];
    match (options.profile, options.auto_approve) {
        (Profile::Readonly, _) => args.extend(["--sandbox".into(), "read-only".into()]),
        (Profile::Developer, true) => args.push("--full-auto".into()),
        (Profile::Developer, false) => {
            args.extend(["--sandbox".into(), "workspace-write".into()]);
        }
    }
    if let Some(tier) = &options.service_tier {
        args.extend(["-c".into(), format!("service_tier={tier}")]);
    }
    args.push("-".into());
    if let Some(id) = thread_id {
        args.extend(["resume".into(), id.to_string()]);
    }
    args
}

/// Facts extracted from one turn's JSONL event stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExecEvents {
    pub thread_id: Option<String>,
    /// Text of the last completed agent message.
    pub last_message: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ExecEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },
    #[serde(rename = "turn.completed")]
    TurnCompleted { usage: ExecUsage },
    #[serde(rename = "turn.failed")]
    TurnFailed { error: ExecError },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: serde_json::Value },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ExecUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ExecError {
    message: String,
}

/// Parse `codex exec --json` output. Unknown or malformed lines are skipped.
pub fn parse_exec_events(stdout: &str) -> ExecEvents {
    let mut events = ExecEvents::default();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<ExecEvent>(line) else {
            continue;
        };
        match event {
            ExecEvent::ThreadStarted { thread_id } => events.thread_id = Some(thread_id),
            ExecEvent::TurnCompleted { usage } => {
                events.input_tokens += usage.input_tokens;
                events.output_tokens += usage.output_tokens;
            }
            ExecEvent::TurnFailed { error } => events.error = Some(error.message),
            ExecEvent::Error { message } => events.error = Some(message),
            ExecEvent::ItemCompleted { item } => {
                if item.get("type").and_then(|t| t.as_str()) == Some("agent_message")
                    && let Some(text) = item.get("text").and_then(|t| t.as_str())
                {
                    events.last_message = Some(text.to_string());
                }
            }
            ExecEvent::Other => {}
        }
    }
    events
}

fn write_log_line(path: &std::path::Path, value: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open session log {}", path.display()))?;
    let line = serde_json::to_string(value).context("serialize log line")?;
    writeln!(file, "{line}").with_context(|| format!("write session log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn options(profile: Profile, auto_approve: bool) -> SessionOptions {
        SessionOptions {
            profile,
            model: "gpt-5-mini".to_string(),
            service_tier: None,
            working_dir: PathBuf::from("/repo"),
            auto_approve,
            telemetry: BTreeMap::from([
                ("source".to_string(), "conductor_worker".to_string()),
                ("task_id".to_string(), "T1".to_string()),
            ]),
        }
    }

    #[test]
    fn parses_thread_usage_and_last_message() {
        let stdout = r#"{"type":"thread.started","thread_id":"th_1"}
{"type":"turn.started"}
{"type":"item.completed","item":{"id":"i0","type":"reasoning","text":"thinking"}}
{"type":"item.completed","item":{"id":"i1","type":"agent_message","text":"working"}}
not json at all
{"type":"item.completed","item":{"id":"i2","type":"agent_message","text":"Done. TASK COMPLETE"}}
{"type":"turn.completed","usage":{"input_tokens":1200,"cached_input_tokens":800,"output_tokens":90}}
"#;
        let events = parse_exec_events(stdout);
        assert_eq!(
            events,
            ExecEvents {
                thread_id: Some("th_1".to_string()),
                last_message: Some("Done. TASK COMPLETE".to_string()),
                input_tokens: 1200,
                output_tokens: 90,
                error: None,
            }
        );
    }

    #[test]
    fn records_turn_failure_message() {
        let stdout = r#"{"type":"thread.started","thread_id":"th_2"}
{"type":"turn.failed","error":{"message":"rate limited"}}
"#;
        let events = parse_exec_events(stdout);
        assert_eq!(events.error.as_deref(), Some("rate limited"));
        assert_eq!(events.last_message, None);
    }

    #[test]
    fn first_turn_args_map_profiles_to_sandbox() {
        let readonly = exec_args(&options(Profile::Readonly, true), None);
        assert!(readonly.windows(2).any(|w| w == ["--sandbox", "read-only"]));
        assert_eq!(readonly.last().map(String::as_str), Some("-"));

        let auto = exec_args(&options(Profile::Developer, true), None);
        assert!(auto.iter().any(|a| a == "--full-auto"));

        let manual = exec_args(&options(Profile::Developer, false), None);
        assert!(manual.windows(2).any(|w| w == ["--sandbox", "workspace-write"]));
    }

    #[test]
    fn later_turns_resume_thread() {
        let mut opts = options(Profile::Developer, true);
        opts.service_tier = Some("flex".to_string());
        let args = exec_args(&opts, Some("th_9"));
        assert_eq!(&args[args.len() - 3..], ["-", "resume", "th_9"]);
        assert!(args.windows(2).any(|w| w == ["-c", "service_tier=flex"]));
    }

    #[test]
    fn session_runs_scripted_program_and_tracks_usage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("fake-codex.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\n\
             echo '{\"type\":\"thread.started\",\"thread_id\":\"th_x\"}'\n\
             echo '{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"hi\"}}'\n\
             echo '{\"type\":\"turn.completed\",\"usage\":{\"input_tokens\":1000000,\"output_tokens\":10}}'\n",
        )
        .expect("write script");
        make_executable(&script);
        let config = ConductorConfig {
            agent_program: script.display().to_string(),
            input_cost_per_mtok: 2.0,
            ..ConductorConfig::default()
        };
        let backend = CodexBackend::new(&config, Some(temp.path().join("logs")));
        let mut opts = options(Profile::Developer, true);
        opts.working_dir = temp.path().to_path_buf();
        let mut session = backend.open("system", &opts).expect("open");

        let turn = session.submit("do it").expect("submit");
        assert!(turn.is_completed());
        assert_eq!(turn.text, "hi");
        assert_eq!(session.last_input_tokens(), 1_000_000);
        assert!((session.usage().cost_usd - 2.0).abs() < 1e-9);
        session.close(SessionStatus::Completed).expect("close");

        let log_path = temp.path().join("logs").join("001-conductor_worker-T1.jsonl");
        let log = std::fs::read_to_string(log_path).expect("read log");
        assert!(log.contains("thread.started"));
        assert!(log.contains("\"status\":\"completed\""));
    }

    #[cfg(unix)]
    fn make_executable(path: &std::path::Path) {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).expect("chmod");
    }

    #[cfg(not(unix))]
    fn make_executable(_path: &std::path::Path) {}
}
