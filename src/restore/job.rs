// Restore Jobs - per-tier job lifecycle and invocation results

use crate::backup::BackupId;
use crate::health::HealthResult;
use crate::rollback::RollbackResult;
use crate::tier::{Scope, Tier};
use crate::{RecoveryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of one tier restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Pending => "pending",
            JobOutcome::Running => "running",
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
            JobOutcome::RolledBack => "rolled_back",
        }
    }

    /// Transitions are monotonic; the only edge out of a terminal-looking
    /// state is `failed -> rolled_back`
    pub fn can_transition_to(&self, next: JobOutcome) -> bool {
        matches!(
            (self, next),
            (JobOutcome::Pending, JobOutcome::Running)
                | (JobOutcome::Running, JobOutcome::Succeeded)
                | (JobOutcome::Running, JobOutcome::Failed)
                | (JobOutcome::Failed, JobOutcome::RolledBack)
        )
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to restore one tier from one backup set
#[derive(Debug, Clone, Serialize)]
pub struct RestoreJob {
    pub tier: Tier,
    pub backup_set_id: BackupId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    outcome: JobOutcome,
    /// Absent when the data load failed before health checking
    pub health_result: Option<HealthResult>,
    /// Restore primitive invocations, including retries
    pub attempts: u32,
    pub detail: Option<String>,
}

impl RestoreJob {
    pub fn new(tier: Tier, backup_set_id: BackupId) -> Self {
        Self {
            tier,
            backup_set_id,
            started_at: Utc::now(),
            finished_at: None,
            outcome: JobOutcome::Pending,
            health_result: None,
            attempts: 0,
            detail: None,
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        self.outcome
    }

    pub fn transition(&mut self, next: JobOutcome) -> Result<()> {
        if !self.outcome.can_transition_to(next) {
            return Err(RecoveryError::InvalidTransition {
                tier: self.tier,
                from: self.outcome,
                to: next,
            });
        }

        match next {
            JobOutcome::Running => self.started_at = Utc::now(),
            JobOutcome::Succeeded | JobOutcome::Failed => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        self.outcome = next;
        Ok(())
    }
}

/// Overall result of one restore invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// Every planned tier succeeded
    Complete,
    /// At least one tier succeeded before a failure
    Partial,
    /// The first tier failed
    Aborted,
}

impl RestoreOutcome {
    pub fn aggregate(jobs: &[RestoreJob], planned: usize) -> Self {
        let succeeded = jobs
            .iter()
            .filter(|job| job.outcome() == JobOutcome::Succeeded)
            .count();

        if succeeded == planned && planned > 0 {
            RestoreOutcome::Complete
        } else if succeeded > 0 {
            RestoreOutcome::Partial
        } else {
            RestoreOutcome::Aborted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreOutcome::Complete => "complete",
            RestoreOutcome::Partial => "partial",
            RestoreOutcome::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RestoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RestorePrimitive,
    HealthTimeout,
}

/// The tier failure that stopped an invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierFailure {
    pub tier: Tier,
    pub kind: FailureKind,
    pub detail: String,
}

/// Returned to the caller of `restore`
#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub invocation_id: Uuid,
    pub scope: Scope,
    /// Jobs in execution order
    pub jobs: Vec<RestoreJob>,
    pub outcome: RestoreOutcome,
    pub failure: Option<TierFailure>,
    pub rollback: Option<RollbackResult>,
}

impl RestoreResult {
    pub fn job(&self, tier: Tier) -> Option<&RestoreJob> {
        self.jobs.iter().find(|job| job.tier == tier)
    }

    pub fn requires_manual_intervention(&self) -> bool {
        self.rollback
            .as_ref()
            .map(|rollback| rollback.unknown_state)
            .unwrap_or(false)
    }

    /// The failure of this invocation as an error, the unknown state first
    pub fn error(&self) -> Option<RecoveryError> {
        if let Some(rollback) = self.rollback.as_ref().filter(|r| r.unknown_state) {
            return Some(RecoveryError::UnknownState {
                tier: rollback.tier,
                detail: rollback.detail.clone(),
            });
        }

        self.failure.as_ref().map(|failure| match failure.kind {
            FailureKind::RestorePrimitive => RecoveryError::RestorePrimitiveFailure {
                tier: failure.tier,
                detail: failure.detail.clone(),
            },
            FailureKind::HealthTimeout => RecoveryError::HealthTimeout {
                tier: failure.tier,
                detail: failure.detail.clone(),
            },
        })
    }
}
