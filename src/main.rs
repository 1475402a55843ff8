// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fleet main entry point - CLI and commands.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use agent_fleet::config::{self, BackendMode, CliOptions, ResolvedConfig};
use agent_fleet::fleet::{
    read_snapshot, AgentRun, BatchReport, Orchestrator, OrchestratorCallbacks, RunStatus,
    SessionTracker, TaskFile, TaskSource,
};
use agent_fleet::providers::provider_from_env;
use agent_fleet::telemetry::{init_telemetry, TelemetryConfig};
use agent_fleet::RepoTask;

/// Fleet - run coding agents across many repositories.
#[derive(Parser)]
#[command(name = "fleet")]
#[command(author, version, about = "Run coding agents across many repositories", long_about = None)]
struct Cli {
    /// Directory to load workspace configuration from
    #[arg(short = 'C', long, global = true, env = "FLEET_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Backend selection mode
    #[arg(long, global = true, value_enum, env = "FLEET_MODE")]
    mode: Option<Mode>,

    /// Maximum concurrent runs (0 = unbounded)
    #[arg(long, global = true, env = "FLEET_MAX_CONCURRENT")]
    max_concurrent: Option<u32>,

    /// Retry budget per task (0 = no retries)
    #[arg(long, global = true, env = "FLEET_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Base retry delay in milliseconds
    #[arg(long, global = true, env = "FLEET_RETRY_BASE_DELAY_MS")]
    retry_base_delay_ms: Option<u64>,

    /// Agent CLI executable for the process backend
    #[arg(long, global = true, env = "FLEET_CLI")]
    cli_executable: Option<String>,

    /// Provider for the API backend
    #[arg(long, global = true, env = "FLEET_PROVIDER")]
    provider: Option<String>,

    /// Model for the API backend
    #[arg(short, long, global = true, env = "FLEET_MODEL")]
    model: Option<String>,

    /// Base URL for the API backend
    #[arg(long, global = true, env = "FLEET_BASE_URL")]
    base_url: Option<String>,

    /// Shared session snapshot file
    #[arg(long, global = true, env = "FLEET_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// More log output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print the final summary
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Backend selection mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Auto,
    ProcessOnly,
    ApiOnly,
}

impl From<Mode> for BackendMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => BackendMode::Auto,
            Mode::ProcessOnly => BackendMode::ProcessOnly,
            Mode::ApiOnly => BackendMode::ApiOnly,
        }
    }
}

/// Subcommands for fleet.
#[derive(Subcommand)]
enum Commands {
    /// Run every task in a task file
    Run {
        /// JSON or YAML task list
        #[arg(short, long)]
        tasks: PathBuf,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show active sessions from the shared snapshot
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Clear persisted session state
    Clear,

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show,
    /// Create .fleet.json in the workspace
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let telemetry = if cli.quiet {
        TelemetryConfig::production()
    } else {
        TelemetryConfig::for_verbosity(cli.verbose)
    };
    init_telemetry(&telemetry)?;

    let workspace_root = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let cli_options = CliOptions {
        backend_mode: cli.mode.map(Into::into),
        max_concurrent: cli.max_concurrent,
        max_retries: cli.max_retries,
        retry_base_delay_ms: cli.retry_base_delay_ms,
        cli_executable: cli.cli_executable,
        provider: cli.provider,
        model: cli.model,
        base_url: cli.base_url,
        snapshot_path: cli.snapshot,
    };

    handle_command(cli.command, &workspace_root, cli_options, cli.quiet).await
}

async fn handle_command(
    command: Commands,
    workspace_root: &Path,
    cli_options: CliOptions,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    if let Commands::Config { action: Some(ConfigAction::Init) } = command {
        let path = config::init_config(workspace_root, None)?;
        println!("Created config file: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = config::load_config(workspace_root, cli_options)?;
    match command {
        Commands::Run { tasks, json } => run_tasks(&config, &tasks, json, quiet).await,
        Commands::Status { json } => {
            show_status(&config.snapshot_path, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clear => {
            SessionTracker::new(&config.snapshot_path).clear_stale_sessions();
            println!("Cleared sessions in {}", config.snapshot_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { .. } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_tasks(config: &ResolvedConfig, tasks_file: &Path, json: bool, quiet: bool) -> anyhow::Result<ExitCode> {
    let tasks = TaskFile::new(tasks_file).load()?;
    if tasks.is_empty() {
        println!("{}", "No tasks with an existing repository to run".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    let tracker = Arc::new(SessionTracker::new(&config.snapshot_path));
    // Anything persisted now is left over from a run that did not shut down.
    tracker.clear_stale_sessions();
    tracker.clear_queue();

    let provider = provider_from_env(config)?;
    if provider.is_none() && config.backend_mode == BackendMode::Auto && !quiet {
        println!("{}", "No API key set, every task goes to the process backend".dimmed());
    }

    let callbacks = if quiet || json {
        OrchestratorCallbacks::default()
    } else {
        progress_callbacks()
    };
    let orchestrator = Orchestrator::from_config(config, tracker, provider, callbacks)?;

    let on_interrupt = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling runs...".yellow());
            on_interrupt.cancel_all();
        }
    });

    if !quiet && !json {
        println!(
            "{} Running {} task(s), up to {} at a time",
            "→".cyan(),
            tasks.len(),
            match config.max_concurrent {
                0 => "all".to_string(),
                n => n.to_string(),
            }
        );
    }

    let report = orchestrator.run_batch(tasks).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        print_summary(&report);
    }

    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print a line whenever a run changes state.
fn progress_callbacks() -> OrchestratorCallbacks {
    let seen: Mutex<Vec<(RunStatus, u32)>> = Mutex::new(Vec::new());

    let on_update = move |runs: &[AgentRun]| {
        let mut seen = seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.resize(runs.len(), (RunStatus::Queued, 0));
        for (run, last) in runs.iter().zip(seen.iter_mut()) {
            let current = (run.status, run.retry_count);
            if *last == current {
                continue;
            }
            *last = current;
            print_transition(run);
        }
    };

    let on_output = |task: &RepoTask, chunk: &str| {
        if tracing::enabled!(tracing::Level::DEBUG) {
            println!("  {} {}", format!("[{}]", task.repo_name).dimmed(), chunk.dimmed());
        }
    };

    OrchestratorCallbacks {
        on_update: Some(Arc::new(on_update)),
        on_task_done: None,
        on_output: Some(Arc::new(on_output)),
    }
}

fn print_transition(run: &AgentRun) {
    let label = format!("{} {}", run.task.repo_name, run.task.task_id);
    match run.status {
        RunStatus::Queued if run.retry_count > 0 => println!(
            "{} {} retry {}/{}",
            "↻".yellow(),
            label,
            run.retry_count,
            run.max_retries
        ),
        RunStatus::Queued => {}
        RunStatus::Running => println!("{} {} ({})", "▶".cyan(), label, run.backend),
        RunStatus::Done => println!("{} {}", "✓".green(), label),
        RunStatus::Failed => println!("{} {}", "✗".red(), label),
    }
}

fn print_summary(report: &BatchReport) {
    println!("\n{}", "Summary".bright_blue().bold());
    for run in &report.runs {
        let status = match run.status {
            RunStatus::Done => "done".green(),
            RunStatus::Failed => "failed".red(),
            other => other.to_string().yellow(),
        };
        let duration = run
            .duration()
            .map(|d| format!("{}s", d.num_seconds()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<12} {:<8} {:<7} retries {} tokens {:>8} {}",
            run.task.repo_name,
            run.task.task_id,
            status,
            run.backend.to_string(),
            run.retry_count,
            run.usage.total(),
            duration.dimmed()
        );
    }
    println!(
        "\n{} done, {} failed. Tokens: process {}, api {}",
        report.succeeded().to_string().green(),
        report.failed().to_string().red(),
        report.usage.process.total(),
        report.usage.api.total()
    );
}

fn report_json(report: &BatchReport) -> serde_json::Value {
    serde_json::json!({
        "runs": report.runs,
        "usage": report.usage,
        "done": report.succeeded(),
        "failed": report.failed(),
    })
}

fn show_status(snapshot_path: &Path, json: bool) -> anyhow::Result<()> {
    let snapshot = read_snapshot(snapshot_path);
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    match snapshot {
        Some(snapshot) if !snapshot.sessions.is_empty() => {
            println!(
                "{} ({} active, updated {})",
                "Active sessions".bright_blue().bold(),
                snapshot.sessions.len(),
                snapshot.updated_at.to_rfc3339()
            );
            for session in snapshot.sessions {
                println!(
                    "  {} {} {} {}",
                    session.repo_name.bright_white(),
                    session.task_id,
                    format!("({})", session.backend).dimmed(),
                    session.task_title
                );
            }
        }
        _ => println!("{}", "No active sessions".dimmed()),
    }
    Ok(())
}
