//! Rollback coordination
//!
//! The orchestrator never rolls a tier back itself. It hands the tier and
//! the last backup known to have been healthy to an external recovery
//! capability and interprets the outcome. An unreachable capability leaves
//! the tier in an unknown state, which is escalated through a side channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::backup::BackupId;
use crate::metrics;
use crate::tier::Tier;

pub mod agent;
pub mod ledger;

pub use agent::{CommandRollbackAgent, UnconfiguredRollback};
pub use ledger::{FileHealthyLedger, HealthyBackupLedger, MemoryHealthyLedger};

/// Failure modes of the external rollback capability
#[derive(Error, Debug, Clone)]
pub enum CapabilityError {
    /// The capability could not be reached or did not answer
    #[error("rollback agent unreachable: {0}")]
    Unreachable(String),

    /// The capability answered and reported that the rollback failed
    #[error("rollback rejected: {0}")]
    Rejected(String),
}

/// Something that can roll a tier back to a given backup
#[async_trait]
pub trait RollbackCapability: Send + Sync {
    /// Returns a detail message on success
    async fn rollback(&self, tier: Tier, target: &BackupId) -> Result<String, CapabilityError>;
}

/// Event handed to the escalation side channel
#[derive(Debug, Clone, Serialize)]
pub struct UnknownStateEvent {
    pub tier: Tier,
    pub target_backup_id: Option<BackupId>,
    pub detail: String,
}

/// Side channel for conditions that need an operator
#[async_trait]
pub trait Escalation: Send + Sync {
    async fn escalate(&self, event: &UnknownStateEvent);
}

/// Escalates by emitting an error event through `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingEscalation;

#[async_trait]
impl Escalation for TracingEscalation {
    async fn escalate(&self, event: &UnknownStateEvent) {
        error!(
            tier = %event.tier,
            target_backup_id = ?event.target_backup_id.as_ref().map(|id| id.to_string()),
            detail = %event.detail,
            manual_intervention = true,
            "UNKNOWN STATE: rollback could not be confirmed, manual intervention required"
        );
    }
}

/// Outcome of a rollback request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackResult {
    pub tier: Tier,
    pub target_backup_id: Option<BackupId>,
    /// The capability was actually invoked
    pub attempted: bool,
    pub succeeded: bool,
    pub detail: String,
    /// Fatal: the tier's state could not be confirmed
    pub unknown_state: bool,
}

impl RollbackResult {
    /// No last-known-good backup exists for the tier
    pub fn unavailable(tier: Tier) -> Self {
        Self {
            tier,
            target_backup_id: None,
            attempted: false,
            succeeded: false,
            detail: format!("no backup known to have been healthy for tier {}; rollback unavailable", tier),
            unknown_state: false,
        }
    }
}

/// Invokes the rollback capability and interprets its outcome
#[derive(Clone)]
pub struct RollbackCoordinator {
    capability: Arc<dyn RollbackCapability>,
    escalation: Arc<dyn Escalation>,
    call_timeout: Duration,
}

impl RollbackCoordinator {
    pub fn new(capability: Arc<dyn RollbackCapability>) -> Self {
        Self {
            capability,
            escalation: Arc::new(TracingEscalation),
            call_timeout: Duration::from_secs(1800),
        }
    }

    pub fn with_escalation(mut self, escalation: Arc<dyn Escalation>) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Ask the capability to revert `tier` to `target`
    #[instrument(skip(self), fields(tier = %tier, target = %target))]
    pub async fn rollback(&self, tier: Tier, target: &BackupId) -> RollbackResult {
        info!(tier = %tier, target = %target, "Invoking rollback capability");

        let outcome = match tokio::time::timeout(self.call_timeout, self.capability.rollback(tier, target)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CapabilityError::Unreachable(format!(
                "no answer within {:?}",
                self.call_timeout
            ))),
        };

        match outcome {
            Ok(detail) => {
                info!(tier = %tier, target = %target, detail = %detail, "Rollback succeeded");
                metrics::record_rollback(tier, "succeeded");
                RollbackResult {
                    tier,
                    target_backup_id: Some(target.clone()),
                    attempted: true,
                    succeeded: true,
                    detail,
                    unknown_state: false,
                }
            }
            Err(CapabilityError::Rejected(reason)) => {
                warn!(tier = %tier, target = %target, reason = %reason, "Rollback reported failure");
                metrics::record_rollback(tier, "failed");
                RollbackResult {
                    tier,
                    target_backup_id: Some(target.clone()),
                    attempted: true,
                    succeeded: false,
                    detail: format!("rollback to {} failed: {}", target, reason),
                    unknown_state: false,
                }
            }
            Err(CapabilityError::Unreachable(reason)) => {
                metrics::record_rollback(tier, "unknown_state");
                let detail = format!(
                    "rollback agent unreachable ({}); tier {} is in an unknown state requiring manual intervention",
                    reason, tier
                );
                self.escalation
                    .escalate(&UnknownStateEvent {
                        tier,
                        target_backup_id: Some(target.clone()),
                        detail: detail.clone(),
                    })
                    .await;
                RollbackResult {
                    tier,
                    target_backup_id: Some(target.clone()),
                    attempted: true,
                    succeeded: false,
                    detail,
                    unknown_state: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedCapability(Result<String, CapabilityError>);

    #[async_trait]
    impl RollbackCapability for ScriptedCapability {
        async fn rollback(&self, _tier: Tier, _target: &BackupId) -> Result<String, CapabilityError> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingEscalation(Mutex<Vec<UnknownStateEvent>>);

    #[async_trait]
    impl Escalation for RecordingEscalation {
        async fn escalate(&self, event: &UnknownStateEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn target() -> BackupId {
        BackupId::parse("__20260110_000000").unwrap()
    }

    #[tokio::test]
    async fn test_successful_rollback() {
        let coordinator = RollbackCoordinator::new(Arc::new(ScriptedCapability(Ok("reverted".to_string()))));
        let result = coordinator.rollback(Tier::DataPlaneProd, &target()).await;

        assert!(result.attempted);
        assert!(result.succeeded);
        assert!(!result.unknown_state);
        assert_eq!(result.target_backup_id, Some(target()));
    }

    #[tokio::test]
    async fn test_rejected_rollback_is_not_fatal() {
        let escalation = Arc::new(RecordingEscalation::default());
        let coordinator = RollbackCoordinator::new(Arc::new(ScriptedCapability(Err(
            CapabilityError::Rejected("disk full".to_string()),
        ))))
        .with_escalation(escalation.clone());

        let result = coordinator.rollback(Tier::ControlPlane, &target()).await;

        assert!(!result.succeeded);
        assert!(!result.unknown_state);
        assert!(result.detail.contains("disk full"));
        assert!(escalation.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_agent_escalates_unknown_state() {
        let escalation = Arc::new(RecordingEscalation::default());
        let coordinator = RollbackCoordinator::new(Arc::new(ScriptedCapability(Err(
            CapabilityError::Unreachable("connection refused".to_string()),
        ))))
        .with_escalation(escalation.clone());

        let result = coordinator.rollback(Tier::ControlPlane, &target()).await;

        assert!(!result.succeeded);
        assert!(result.unknown_state);
        assert!(result.detail.contains("manual intervention"));

        let events = escalation.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tier, Tier::ControlPlane);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_agent_counts_as_unreachable() {
        struct Silent;

        #[async_trait]
        impl RollbackCapability for Silent {
            async fn rollback(&self, _tier: Tier, _target: &BackupId) -> Result<String, CapabilityError> {
                futures::future::pending::<()>().await;
                Ok(String::new())
            }
        }

        let coordinator = RollbackCoordinator::new(Arc::new(Silent)).with_call_timeout(Duration::from_secs(5));
        let result = coordinator.rollback(Tier::Genesis, &target()).await;

        assert!(result.unknown_state);
    }

    #[test]
    fn test_unavailable_is_not_attempted() {
        let result = RollbackResult::unavailable(Tier::DataPlaneDev);
        assert!(!result.attempted);
        assert!(!result.unknown_state);
        assert!(result.target_backup_id.is_none());
    }
}
