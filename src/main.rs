use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

mod cmd;

#[derive(Parser)]
#[command(name = "forge-context")]
#[command(version, about = "Context budget tracking, compaction and handoff for agent sessions")]
pub struct Cli {
    /// Show debug logs on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Measure a session and show its budget level
    Status {
        /// Session scope (directory name under the artifacts dir)
        scope: String,
    },
    /// Compact a session's artifacts (reversible)
    Compact {
        scope: String,
        /// Report what would be reduced without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Undo a compaction inside the rollback window
    Revert { scope: String, history_id: String },
    /// List past compactions of a session
    History { scope: String },
    /// Create, list, restore or prune snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Produce a lossy summary of a session
    Summarize {
        scope: String,
        /// Skip the Claude CLI and use the structured placeholder only
        #[arg(long)]
        no_generate: bool,
    },
    /// Build a handoff document for resuming in a fresh session
    Handoff {
        scope: String,
        /// Task list to read progress from (defaults to the session's tasks.md)
        #[arg(long)]
        tasks: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SnapshotCommands {
    /// Snapshot the current artifacts
    Create {
        scope: String,
        #[arg(long, default_value = "manual")]
        trigger: String,
    },
    /// List snapshots, oldest first
    List { scope: String },
    /// Restore a snapshot (the current state is snapshotted first)
    Restore { scope: String, snapshot_id: String },
    /// Delete all but the most recent snapshots
    Prune {
        scope: String,
        /// How many to keep (defaults to [snapshots].keep)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default context.toml file
    Init,
}

/// Stderr gets warnings (debug with `-v`); the daily file under `.forge/logs` gets info.
/// `RUST_LOG` overrides both.
fn init_logging(project_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let stderr_default = if verbose { "debug" } else { "warn" };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(stderr_default));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let log_dir = project_dir.join(".forge").join("logs");
    let writable = project_dir.is_dir() && std::fs::create_dir_all(&log_dir).is_ok();
    let (file_layer, guard) = if writable {
        let appender = tracing_appender::rolling::daily(&log_dir, "forge-context.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(file_filter);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Log system initialization failed: {e}");
    }
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // .env is optional; ANTHROPIC_API_KEY and CLAUDE_CMD may come from it.
    let _ = dotenvy::from_path(project_dir.join(".env"));

    let _log_guard = init_logging(&project_dir, cli.verbose);

    match &cli.command {
        Commands::Status { scope } => cmd::cmd_status(&project_dir, scope).await?,
        Commands::Compact { scope, dry_run } => {
            cmd::cmd_compact(&project_dir, scope, *dry_run).await?
        }
        Commands::Revert { scope, history_id } => {
            cmd::cmd_revert(&project_dir, scope, history_id)?
        }
        Commands::History { scope } => cmd::cmd_history(&project_dir, scope)?,
        Commands::Snapshot { command } => cmd::cmd_snapshot(&project_dir, command.clone())?,
        Commands::Summarize { scope, no_generate } => {
            cmd::cmd_summarize(&project_dir, scope, *no_generate).await?
        }
        Commands::Handoff { scope, tasks } => {
            cmd::cmd_handoff(&project_dir, scope, tasks.as_deref()).await?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
