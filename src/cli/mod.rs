//! `drctl` command surface
//!
//! ## Commands
//!
//! - `drctl list [scope]` - list backup sets, newest first
//! - `drctl verify <backup-id> [--cached]` - verify a backup set
//! - `drctl restore <scope> [--backup <id>] [--yes]` - restore one tier or `full`
//! - `drctl health` - probe every tier
//! - `drctl full [--yes]` - shorthand for `restore full`
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |---|---|
//! | 0 | complete / pass |
//! | 1 | usage or configuration error |
//! | 2 | partial restore |
//! | 3 | aborted, denied, not found, conflict or verification failure |
//! | 4 | unknown state, manual intervention required |

pub mod render;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing::warn;

use crate::backup::BackupId;
use crate::config::OrchestratorConfig;
use crate::metrics;
use crate::restore::{RestoreOrchestrator, RestoreOutcome, RestoreResult};
use crate::tier::Scope;
use crate::RecoveryError;

/// Complete restore, passing verification or healthy tiers
pub const EXIT_SUCCESS: i32 = 0;
/// Usage or configuration error
pub const EXIT_USAGE: i32 = 1;
/// Restore stopped after at least one tier succeeded
pub const EXIT_PARTIAL: i32 = 2;
/// Aborted, denied, not found, conflicting or failed verification
pub const EXIT_FAILED: i32 = 3;
/// Rollback could not be confirmed
pub const EXIT_UNKNOWN_STATE: i32 = 4;

/// Disaster-recovery restore orchestrator
#[derive(Debug, Parser)]
#[command(name = "drctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, env = "DRCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding backup sets; overrides the configuration file
    #[arg(long, env = "DRCTL_BACKUP_ROOT")]
    pub backup_root: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Write Prometheus metrics for this invocation to a file on exit, for
    /// a node_exporter textfile collector
    #[arg(long, env = "DRCTL_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List backup sets, newest first
    List(ListArgs),
    /// Verify sizes and checksums of a backup set
    Verify(VerifyArgs),
    /// Restore one tier, or every tier with `full`
    Restore(RestoreArgs),
    /// Probe the health endpoints of every tier
    Health,
    /// Restore every tier in dependency order
    Full(FullArgs),
}

/// Arguments for `list`
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only sets covering this scope (`full` or a tier name)
    pub scope: Option<Scope>,
}

/// Arguments for `verify`
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Backup set identifier, `__YYYYMMDD_HHMMSS`
    pub backup_id: BackupId,

    /// Reuse a verification from inside the freshness window instead of
    /// re-reading every payload
    #[arg(long)]
    pub cached: bool,
}

/// Arguments for `restore`
#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// `full` or a tier name
    pub scope: Scope,

    /// Restore from this backup set instead of the newest verified one
    #[arg(long)]
    pub backup: Option<BackupId>,

    /// Confirm a destructive restore
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Arguments for `full`
#[derive(Debug, Args)]
pub struct FullArgs {
    /// Confirm the restore
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
    /// Tables
    Table,
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn load_config(&self) -> crate::Result<OrchestratorConfig> {
        let config = match &self.config {
            Some(path) => OrchestratorConfig::from_file(path)?,
            None => OrchestratorConfig::default(),
        };

        Ok(match &self.backup_root {
            Some(root) => config.with_backup_root(root),
            None => config,
        })
    }
}

/// Exit code for a restore that produced a result
pub fn exit_code(result: &RestoreResult) -> i32 {
    if result.requires_manual_intervention() {
        return EXIT_UNKNOWN_STATE;
    }
    match result.outcome {
        RestoreOutcome::Complete => EXIT_SUCCESS,
        RestoreOutcome::Partial => EXIT_PARTIAL,
        RestoreOutcome::Aborted => EXIT_FAILED,
    }
}

/// Exit code for an error that stopped a command
pub fn error_exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<RecoveryError>() {
        Some(RecoveryError::UnknownState { .. }) => EXIT_UNKNOWN_STATE,
        Some(RecoveryError::Config(_)) => EXIT_USAGE,
        Some(_) => EXIT_FAILED,
        None => EXIT_USAGE,
    }
}

/// Run a parsed command line and return the process exit code
pub async fn run(cli: Cli) -> i32 {
    let metrics_file = cli.metrics_file.clone();

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            error_exit_code(&e)
        }
    };

    if let Some(path) = metrics_file {
        if let Err(e) = write_metrics(&path).await {
            warn!(path = %path.display(), error = %e, "Failed to write metrics file");
        }
    }
    code
}

/// Replace `path` with the current metrics exposition
///
/// Written to a sibling temp file and renamed so collectors never read a
/// partial file.
pub async fn write_metrics(path: &Path) -> std::io::Result<()> {
    let tmp_path = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp_path, metrics::gather()).await?;
    tokio::fs::rename(&tmp_path, path).await
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.load_config()?;
    let orchestrator = RestoreOrchestrator::from_config(&config)?;
    let format = cli.format;

    match cli.command {
        Commands::List(args) => {
            let sets = orchestrator.catalog().list(args.scope).await.map_err(RecoveryError::from)?;
            println!("{}", render::backup_sets(&sets, format)?);
            Ok(EXIT_SUCCESS)
        }
        Commands::Verify(args) => {
            let report = orchestrator
                .verifier()
                .verify_id(&args.backup_id, !args.cached)
                .await
                .map_err(RecoveryError::from)?;
            println!("{}", render::verification(&report, format)?);
            Ok(if report.ok { EXIT_SUCCESS } else { EXIT_FAILED })
        }
        Commands::Health => {
            let results = orchestrator.probe().check_all(orchestrator.health_timeout()).await;
            println!("{}", render::health(&results, format)?);
            Ok(if results.iter().all(|r| r.healthy) {
                EXIT_SUCCESS
            } else {
                EXIT_FAILED
            })
        }
        Commands::Restore(args) => restore(&orchestrator, args.scope, args.backup, args.yes, format).await,
        Commands::Full(args) => restore(&orchestrator, Scope::Full, None, args.yes, format).await,
    }
}

async fn restore(
    orchestrator: &RestoreOrchestrator,
    scope: Scope,
    backup_id: Option<BackupId>,
    confirm: bool,
    format: OutputFormat,
) -> anyhow::Result<i32> {
    let result = orchestrator.restore(scope, backup_id, confirm).await?;
    println!("{}", render::restore(&result, format)?);

    if let Some(error) = result.error().filter(|e| e.requires_manual_intervention()) {
        eprintln!("{} {}", "MANUAL INTERVENTION REQUIRED:".red().bold(), error);
    }
    Ok(exit_code(&result))
}
