//! Git adapter for the scheduler.
//!
//! The scheduler checkpoints every task phase as a commit and refuses to run on
//! a dirty tree, so we keep a small, explicit wrapper around `git` subprocess
//! calls. Every call is bounded by the configured git timeout.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandOutput, run_command};

const GIT_OUTPUT_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes: GIT_OUTPUT_LIMIT_BYTES,
        }
    }

    /// Cap on captured stdout/stderr per git call.
    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Full SHA of the current HEAD.
    pub fn head_revision(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is fully clean, listing offending paths otherwise.
    #[instrument(skip_all)]
    pub fn ensure_clean(&self) -> Result<()> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(dirty_count = entries.len(), "worktree not clean");
        let mut msg = String::from("working tree not clean:\n");
        for entry in entries {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Stage everything and commit. Returns the new revision, or `None` when
    /// there was nothing to commit.
    #[instrument(skip_all)]
    pub fn commit_all(&self, message: &str) -> Result<Option<String>> {
        self.run_checked(&["add", "-A"])?;
        let staged = self.run(&["diff", "--cached", "--quiet"])?;
        if staged.timed_out {
            return Err(anyhow!("git diff --cached timed out"));
        }
        match staged.status.code() {
            Some(0) => {
                debug!("no staged changes, skipping commit");
                return Ok(None);
            }
            Some(1) => {}
            code => {
                return Err(anyhow!(
                    "git diff --cached failed ({code:?}): {}",
                    staged.stderr_text().trim()
                ));
            }
        }
        self.run_checked(&["commit", "-m", message])?;
        let sha = self.head_revision()?;
        debug!(sha = %sha, "committed");
        Ok(Some(sha))
    }

    /// Unified diff between `base` and HEAD. A diff over the output limit
    /// ends with a truncation notice.
    pub fn diff_since(&self, base: &str) -> Result<String> {
        let output = self.run_checked(&["diff", base, "HEAD"])?;
        let mut diff = output.stdout_text();
        if output.stdout_truncated > 0 {
            warn!(dropped = output.stdout_truncated, "diff truncated");
            diff.push_str(&truncation_notice(output.stdout_truncated));
        }
        Ok(diff)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let out = self.run(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])?;
        Ok(out.success())
    }

    /// Create a branch at HEAD without switching to it.
    #[instrument(skip_all, fields(branch))]
    pub fn create_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating branch");
        self.run_checked(&["branch", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Checkout `branch`, creating it at HEAD first if it does not exist.
    pub fn ensure_branch(&self, branch: &str) -> Result<()> {
        if !self.branch_exists(branch)? {
            self.create_branch(branch)?;
        }
        self.checkout_branch(branch)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_checked(args)?.stdout_text())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if output.timed_out {
            return Err(anyhow!(
                "git {} timed out after {}s",
                args.join(" "),
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr_text().trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        run_command(cmd, None, self.timeout, self.output_limit_bytes, None)
            .map_err(|e| e.context(format!("spawn git {}", args.join(" "))))
    }
}

fn truncation_notice(dropped: usize) -> String {
    format!("\n[diff truncated: {dropped} bytes omitted]\n")
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
