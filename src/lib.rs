//! # Recovery Orchestrator
//!
//! Disaster-recovery orchestration for a tiered infrastructure stack: a
//! genesis/bootstrap tier, a control-plane workflow engine and two data-plane
//! tiers (production and development), each backed by its own Postgres
//! database.
//!
//! The crate catalogs backup sets, verifies their integrity, and restores
//! them tier by tier in dependency order. Destructive operations are gated
//! behind explicit confirmation, each restored tier is health-checked before
//! the next one starts, and a failed tier triggers a rollback through an
//! external recovery agent.
//!
//! ## Quick Start
//!
//! ```no_run
//! use recovery::config::OrchestratorConfig;
//! use recovery::restore::RestoreOrchestrator;
//! use recovery::tier::Scope;
//!
//! # async fn example() -> recovery::Result<()> {
//! let config = OrchestratorConfig::from_file("drctl.json")?;
//! let orchestrator = RestoreOrchestrator::from_config(&config)?;
//!
//! let result = orchestrator.restore(Scope::Full, None, true).await?;
//! println!("restore finished: {:?}", result.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`tier`]: tier dependency graph and restore scopes
//! - [`backup`]: backup storage, catalog and integrity verification
//! - [`restore`]: confirmation gate, exclusivity locks and the orchestrator
//! - [`health`]: post-restore health probing
//! - [`rollback`]: rollback coordination and escalation
//! - [`config`]: orchestrator configuration
//! - [`metrics`]: Prometheus metrics
//! - [`cli`]: the `drctl` command surface

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Main error type for orchestrator operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Requested backup identifier or scope does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// One or more artifacts failed checksum or size validation
    #[error("Integrity failure in backup {backup_id}: {}", format_failures(.failures))]
    IntegrityFailure {
        /// Backup set that failed verification
        backup_id: String,
        /// Per-artifact failures
        failures: Vec<backup::ArtifactFailure>,
    },

    /// Confirmation gate rejected a destructive operation
    #[error("Denied: {reason}")]
    Denied {
        /// Human-readable description of what would be overwritten
        reason: String,
    },

    /// The external data-load step failed
    #[error("Restore of tier {tier} failed: {detail}")]
    RestorePrimitiveFailure {
        /// Tier being restored
        tier: tier::Tier,
        /// Underlying failure detail
        detail: String,
    },

    /// Tier restored data but never reported healthy in time
    #[error("Tier {tier} did not become healthy: {detail}")]
    HealthTimeout {
        /// Tier being restored
        tier: tier::Tier,
        /// Last error reported by the health endpoints
        detail: String,
    },

    /// An overlapping restore is already active
    #[error("Restore in progress: requested {requested:?} overlaps active {active:?}")]
    ConcurrencyConflict {
        /// Tiers requested by the rejected invocation
        requested: Vec<tier::Tier>,
        /// Tiers held by the active invocation(s)
        active: Vec<tier::Tier>,
    },

    /// Rollback could not be confirmed; manual intervention required
    #[error("Unknown state for tier {tier}, manual intervention required: {detail}")]
    UnknownState {
        /// Tier left in an unknown state
        tier: tier::Tier,
        /// Why the rollback could not be confirmed
        detail: String,
    },

    /// A restore job was driven through an illegal outcome transition
    #[error("Invalid job transition for tier {tier}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Tier of the job
        tier: tier::Tier,
        /// Current outcome
        from: restore::JobOutcome,
        /// Rejected outcome
        to: restore::JobOutcome,
    },

    /// Backup storage error
    #[error("Backup error: {0}")]
    Backup(#[from] backup::BackupError),

    /// Tier graph error
    #[error("Tier graph error: {0}")]
    Graph(#[from] tier::TierGraphError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn format_failures(failures: &[backup::ArtifactFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.artifact, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl RecoveryError {
    /// Whether this error means the system may be in an unknown state
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, RecoveryError::UnknownState { .. })
    }
}

/// Tier dependency graph and restore scopes
pub mod tier;

/// Backup storage, catalog and integrity verification
pub mod backup;

/// Restore orchestration
pub mod restore;

/// Post-restore health probing
pub mod health;

/// Rollback coordination
pub mod rollback;

/// Orchestrator configuration
pub mod config;

/// Prometheus metrics
pub mod metrics;

/// Command-line surface
pub mod cli;
