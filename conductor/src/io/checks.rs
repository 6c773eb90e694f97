//! Verification gate: runs the configured test, lint and typecheck commands.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::VerificationConfig;
use crate::io::process::{is_not_found, run_command};

/// Substrings that would turn a check command into shell composition.
const DISALLOWED_OPERATORS: [&str; 8] = ["&&", "||", ";", "|", ">", "<", "$(", "`"];

/// Outcome of running every configured check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub passed: bool,
    /// Combined output of the failing commands; empty on success.
    pub output: String,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            output: String::new(),
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
        }
    }
}

/// Abstraction over the verification gate so orchestration can be scripted in tests.
pub trait CheckRunner {
    fn run_checks(&self, verification: &VerificationConfig) -> Result<CheckResult>;
}

/// Runs each check as an independent child process in the working directory.
#[derive(Debug, Clone)]
pub struct ProcessCheckRunner {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ProcessCheckRunner {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    /// Run one command. Returns `(passed, output)`.
    #[instrument(skip_all, fields(cmd))]
    fn run_one(&self, cmd: &str) -> Result<(bool, String)> {
        if let Some(reason) = reject_command(cmd) {
            warn!(cmd, "check command rejected");
            return Ok((false, reason));
        }
        let Some(argv) = shlex::split(cmd) else {
            return Ok((false, format!("Unparseable check command: {cmd}")));
        };
        let Some((program, args)) = argv.split_first() else {
            return Ok((false, "Empty check command.".to_string()));
        };

        let mut command = Command::new(program);
        command.args(args).current_dir(&self.workdir);
        let output = match run_command(command, None, self.timeout, self.output_limit_bytes, None)
        {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                return Ok((false, format!("Command not found: {program}")));
            }
            Err(err) => {
                warn!(cmd, error = %format!("{err:#}"), "check command failed to start");
                return Ok((false, format!("Failed to run {program}: {err:#}")));
            }
        };

        let mut text = output.combined_text();
        if output.timed_out {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[timed out after {}s]", self.timeout.as_secs()));
        }
        debug!(cmd, passed = output.success(), "check finished");
        Ok((output.success(), text))
    }
}

impl CheckRunner for ProcessCheckRunner {
    #[instrument(skip_all)]
    fn run_checks(&self, verification: &VerificationConfig) -> Result<CheckResult> {
        let commands = verification.commands();
        if commands.is_empty() {
            debug!("no verification commands configured");
            return Ok(CheckResult::pass());
        }

        let mut failures = Vec::new();
        for (label, cmd) in commands {
            let (passed, output) = self.run_one(cmd)?;
            if !passed {
                failures.push(format_failure(label, cmd, &output));
            }
        }

        if failures.is_empty() {
            info!("checks passed");
            Ok(CheckResult::pass())
        } else {
            info!(failed = failures.len(), "checks failed");
            Ok(CheckResult::fail(failures.join("\n")))
        }
    }
}

/// Reason a command must not be run, if any.
fn reject_command(cmd: &str) -> Option<String> {
    DISALLOWED_OPERATORS
        .iter()
        .any(|op| cmd.contains(op))
        .then(|| format!("Disallowed shell operators in check command: {cmd}"))
}

fn format_failure(label: &str, cmd: &str, output: &str) -> String {
    format!("=== {label}: {cmd} ===\n{output}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn runner(dir: &Path) -> ProcessCheckRunner {
        ProcessCheckRunner::new(dir, Duration::from_secs(10), 64 * 1024)
    }

    fn verification(test: Option<&str>, lint: Option<&str>) -> VerificationConfig {
        VerificationConfig {
            test_cmd: test.map(str::to_string),
            lint_cmd: lint.map(str::to_string),
            typecheck_cmd: None,
        }
    }

    #[test]
    fn no_commands_pass_with_empty_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = runner(temp.path())
            .run_checks(&VerificationConfig::default())
            .expect("checks");
        assert_eq!(result, CheckResult::pass());
    }

    #[test]
    fn rejects_every_shell_operator_without_running() {
        for cmd in [
            "make && rm -rf x",
            "a || b",
            "a; b",
            "a | b",
            "echo > f",
            "cat < f",
            "echo $(id)",
            "echo `id`",
        ] {
            let reason = reject_command(cmd).expect("rejected");
            assert_eq!(
                reason,
                format!("Disallowed shell operators in check command: {cmd}")
            );
        }
        assert!(reject_command("cargo test --all").is_none());
    }

    #[test]
    fn rejected_command_fails_gate_with_labelled_block() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = verification(Some("true && true"), None);
        let result = runner(temp.path()).run_checks(&cfg).expect("checks");
        assert!(!result.passed);
        assert_eq!(
            result.output,
            "=== test: true && true ===\nDisallowed shell operators in check command: true && true"
        );
    }

    #[test]
    fn missing_program_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = verification(Some("conductor-no-such-checker --flag"), None);
        let result = runner(temp.path()).run_checks(&cfg).expect("checks");
        assert!(!result.passed);
        assert!(
            result
                .output
                .ends_with("Command not found: conductor-no-such-checker")
        );
    }

    #[cfg(unix)]
    #[test]
    fn spawn_failure_fails_the_gate_instead_of_erroring() {
        let temp = tempfile::tempdir().expect("tempdir");
        // Written without the executable bit, so spawning is refused.
        std::fs::write(temp.path().join("check.sh"), "#!/bin/sh\nexit 0\n").expect("write");
        let cfg = verification(Some("./check.sh"), Some("true"));
        let result = runner(temp.path()).run_checks(&cfg).expect("checks");
        assert!(!result.passed);
        assert!(
            result
                .output
                .starts_with("=== test: ./check.sh ===\nFailed to run ./check.sh: ")
        );
        assert!(!result.output.contains("=== lint"));
    }

    #[test]
    fn all_commands_must_pass_and_failures_are_joined() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("fail.sh"), "echo broken\nexit 1\n").expect("write");
        let cfg = VerificationConfig {
            test_cmd: Some("sh fail.sh".to_string()),
            lint_cmd: Some("true".to_string()),
            typecheck_cmd: Some("false".to_string()),
        };
        let result = runner(temp.path()).run_checks(&cfg).expect("checks");
        assert!(!result.passed);
        assert_eq!(
            result.output,
            "=== test: sh fail.sh ===\nbroken\n\n=== typecheck: false ===\n"
        );
    }

    #[test]
    fn passing_commands_pass() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = verification(Some("true"), Some("sh -c 'exit 0'"));
        let result = runner(temp.path()).run_checks(&cfg).expect("checks");
        assert!(result.passed);
        assert!(result.output.is_empty());
    }

    #[test]
    fn timeout_fails_with_note() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ProcessCheckRunner::new(temp.path(), Duration::from_millis(200), 1024);
        let cfg = verification(Some("sleep 5"), None);
        let result = runner.run_checks(&cfg).expect("checks");
        assert!(!result.passed);
        assert!(result.output.contains("[timed out after 0s]"));
    }

    #[test]
    fn runs_in_working_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "x").expect("write");
        let cfg = verification(Some("test -f marker.txt"), None);
        let result = runner(temp.path()).run_checks(&cfg).expect("checks");
        assert!(result.passed, "{}", result.output);
    }
}
