//! Conductor CLI.
//!
//! `conductor run` plans a requirements document into a task graph and drives
//! every task through worker, checks, reviewer and commit. `status` and
//! `signal` inspect and steer a saved or running run through its state file.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};

use conductor::exit_codes;
use conductor::io::config::{ConfigLayer, RunOptions, resolve_config};
use conductor::io::signals::SentinelSignals;
use conductor::io::state_store::{default_state_dir, latest_state_path, read_state, session_dir_for};
use conductor::logging;
use conductor::start::run_conductor;
use conductor::summary::render_summary;

/// Overrides the default state directory.
const STATE_DIR_ENV: &str = "CONDUCTOR_STATE_DIR";

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Plan a requirements document into tasks and drive coding agents through them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan (or resume) a run and execute every ready task.
    Run(Box<RunArgs>),
    /// Print the summary of a saved run and exit with its status code.
    Status {
        /// State file; defaults to the most recent run.
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Pause, resume or cancel a running conductor.
    Signal {
        action: SignalAction,
        /// State file; defaults to the most recent run.
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SignalAction {
    Pause,
    Resume,
    Cancel,
}

#[derive(Args)]
struct RunArgs {
    /// Requirements document to plan from.
    document: PathBuf,
    /// Repository the agents work in.
    #[arg(short = 'd', long)]
    working_dir: Option<PathBuf>,
    #[arg(short, long)]
    model: Option<String>,
    #[arg(long)]
    service_tier: Option<String>,
    /// State file to write (or resume from).
    #[arg(long = "state")]
    state_path: Option<PathBuf>,
    /// TOML config file; defaults to `<working dir>/conductor.toml` if present.
    #[arg(long = "config")]
    config_path: Option<PathBuf>,
    #[arg(long)]
    context_window: Option<u64>,
    /// Fraction of the context window at which a worker hands off.
    #[arg(long)]
    budget_threshold: Option<f64>,
    #[arg(long)]
    max_worker_turns: Option<u32>,
    #[arg(long)]
    max_worker_sessions: Option<u32>,
    #[arg(long)]
    max_task_attempts: Option<u32>,
    #[arg(long)]
    test_cmd: Option<String>,
    #[arg(long)]
    lint_cmd: Option<String>,
    #[arg(long)]
    typecheck_cmd: Option<String>,
    /// Skip the reviewer phase.
    #[arg(long)]
    no_reviewer: bool,
    /// Branch to run on; created if missing.
    #[arg(long = "branch")]
    git_branch: Option<String>,
    /// Continue the run in `--state` (or the most recent one).
    #[arg(long)]
    resume: bool,
    /// On resume, move failed tasks back to pending.
    #[arg(long, requires = "resume")]
    retry_failed: bool,
    #[arg(long)]
    project_id: Option<String>,
    #[arg(long)]
    team_id: Option<String>,
    #[arg(long)]
    check_timeout_secs: Option<u64>,
    #[arg(long)]
    turn_timeout_secs: Option<u64>,
    #[arg(long)]
    git_timeout_secs: Option<u64>,
    #[arg(long)]
    output_limit_bytes: Option<usize>,
    #[arg(long)]
    prompt_budget_bytes: Option<usize>,
    /// Agent executable (a `codex`-compatible CLI).
    #[arg(long)]
    agent_program: Option<String>,
    #[arg(long)]
    input_cost_per_mtok: Option<f64>,
    #[arg(long)]
    output_cost_per_mtok: Option<f64>,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            document_path: self.document.clone(),
            working_dir: self.working_dir.clone(),
            state_path: self.state_path.clone(),
            config_path: self.config_path.clone(),
            resume: self.resume,
            retry_failed: self.retry_failed,
        }
    }

    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            model: self.model.clone(),
            service_tier: self.service_tier.clone(),
            context_window: self.context_window,
            budget_threshold: self.budget_threshold,
            max_worker_turns: self.max_worker_turns,
            max_worker_sessions: self.max_worker_sessions,
            max_task_attempts: self.max_task_attempts,
            test_cmd: self.test_cmd.clone(),
            lint_cmd: self.lint_cmd.clone(),
            typecheck_cmd: self.typecheck_cmd.clone(),
            enable_reviewer: self.no_reviewer.then_some(false),
            git_branch: self.git_branch.clone(),
            project_id: self.project_id.clone(),
            team_id: self.team_id.clone(),
            check_timeout_secs: self.check_timeout_secs,
            turn_timeout_secs: self.turn_timeout_secs,
            git_timeout_secs: self.git_timeout_secs,
            output_limit_bytes: self.output_limit_bytes,
            prompt_budget_bytes: self.prompt_budget_bytes,
            agent_program: self.agent_program.clone(),
            input_cost_per_mtok: self.input_cost_per_mtok,
            output_cost_per_mtok: self.output_cost_per_mtok,
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Status { state } => cmd_status(state),
        Command::Signal { action, state } => cmd_signal(action, state),
    }
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let config = resolve_config(&args.options(), args.layer(), |key| std::env::var(key).ok())?;
    let report = run_conductor(config, &state_dir()?)?;
    print!("{}", render_summary(&report.state, &report.state_path));
    Ok(exit_codes::for_status(report.state.status))
}

fn cmd_status(state: Option<PathBuf>) -> Result<i32> {
    let path = resolve_state_path(state)?;
    let state = read_state(&path)?;
    print!("{}", render_summary(&state, &path));
    Ok(exit_codes::for_status(state.status))
}

fn cmd_signal(action: SignalAction, state: Option<PathBuf>) -> Result<i32> {
    let path = resolve_state_path(state)?;
    let state = read_state(&path)?;
    let signals = SentinelSignals::new(session_dir_for(&path, &state.run_id));
    let verb = match action {
        SignalAction::Pause => {
            signals.request_pause()?;
            "pause"
        }
        SignalAction::Resume => {
            signals.clear_pause()?;
            "resume"
        }
        SignalAction::Cancel => {
            signals.request_cancel()?;
            "cancel"
        }
    };
    println!("{verb} signalled for run {}", state.run_id);
    Ok(exit_codes::OK)
}

fn state_dir() -> Result<PathBuf> {
    match std::env::var_os(STATE_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => default_state_dir(),
    }
}

fn resolve_state_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => latest_state_path(&state_dir()?)?
            .ok_or_else(|| anyhow!("No saved conductor state found. Provide --state.")),
    }
}
