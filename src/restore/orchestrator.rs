// Restore Orchestrator - dependency-ordered, health-gated tier restores

use super::gate::{ConfirmationGate, GateDecision};
use super::job::{FailureKind, JobOutcome, RestoreJob, RestoreOutcome, RestoreResult, TierFailure};
use super::lock::RestoreLocks;
use super::primitive::{PgRestorePrimitive, RestorePrimitive, TierRestore};
use super::retry::RetryPolicy;
use crate::backup::{
    BackupCatalog, BackupError, BackupId, BackupStorage, FileBackupStorage, IntegrityVerifier,
    ResolvedBackup,
};
use crate::config::OrchestratorConfig;
use crate::health::{HealthProbe, ServiceRegistry};
use crate::metrics;
use crate::rollback::{
    CommandRollbackAgent, Escalation, FileHealthyLedger, HealthyBackupLedger, MemoryHealthyLedger,
    RollbackCapability, RollbackCoordinator, RollbackResult, UnconfiguredRollback,
};
use crate::tier::{Scope, Tier, TIER_GRAPH};
use crate::{RecoveryError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A restore request as issued by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreRequest {
    pub scope: Scope,
    pub backup_id: Option<BackupId>,
    pub confirm: bool,
}

impl RestoreRequest {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            backup_id: None,
            confirm: false,
        }
    }

    pub fn with_backup(mut self, backup_id: BackupId) -> Self {
        self.backup_id = Some(backup_id);
        self
    }

    pub fn confirmed(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }
}

/// One tier of the plan, with the verified set it restores from
#[derive(Debug, Clone)]
struct PlannedTier {
    tier: Tier,
    request: TierRestore,
}

/// Sequences tier restores along the dependency graph
pub struct RestoreOrchestrator {
    catalog: BackupCatalog,
    verifier: IntegrityVerifier,
    gate: ConfirmationGate,
    primitive: Arc<dyn RestorePrimitive>,
    probe: HealthProbe,
    rollback: RollbackCoordinator,
    ledger: Arc<dyn HealthyBackupLedger>,
    locks: RestoreLocks,
    health_timeout: Duration,
    restore_ceiling: Duration,
    retry: RetryPolicy,
}

impl RestoreOrchestrator {
    pub fn new(
        storage: Arc<dyn BackupStorage>,
        primitive: Arc<dyn RestorePrimitive>,
        registry: Arc<dyn ServiceRegistry>,
        capability: Arc<dyn RollbackCapability>,
    ) -> Self {
        Self {
            catalog: BackupCatalog::new(Arc::clone(&storage)),
            verifier: IntegrityVerifier::new(storage),
            gate: ConfirmationGate::new(),
            primitive,
            probe: HealthProbe::new(registry),
            rollback: RollbackCoordinator::new(capability),
            ledger: Arc::new(MemoryHealthyLedger::new()),
            locks: RestoreLocks::new(),
            health_timeout: Duration::from_secs(120),
            restore_ceiling: Duration::from_secs(1800),
            retry: RetryPolicy::default(),
        }
    }

    /// Wire the file-backed storage, `pg_restore` primitive, configured
    /// endpoints and recovery agent together
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        config.validate()?;

        let storage: Arc<dyn BackupStorage> = Arc::new(FileBackupStorage::new(&config.backup_root));

        let primitive = config.tiers.iter().fold(
            PgRestorePrimitive::new(Arc::clone(&storage)),
            |primitive, (tier, tier_config)| primitive.with_tier(*tier, tier_config.clone()),
        );

        let capability: Arc<dyn RollbackCapability> = match &config.rollback_command {
            Some(argv) => Arc::new(CommandRollbackAgent::new(argv.clone())),
            None => {
                warn!("No rollback_command configured; failed tiers will be left in an unknown state");
                Arc::new(UnconfiguredRollback)
            }
        };

        let ledger: Arc<dyn HealthyBackupLedger> = match &config.healthy_ledger_path {
            Some(path) => Arc::new(FileHealthyLedger::new(path)),
            None => Arc::new(MemoryHealthyLedger::new()),
        };

        let orchestrator = Self::new(
            Arc::clone(&storage),
            Arc::new(primitive),
            Arc::new(config.service_registry()),
            capability,
        )
        .with_ledger(ledger)
        .with_health_timeout(config.health_timeout())
        .with_poll_interval(config.health_poll_interval())
        .with_restore_ceiling(config.restore_ceiling())
        .with_retry(config.restore_retry.clone())
        .with_verification_freshness(config.verification_freshness())
        .with_rollback_timeout(config.rollback_timeout());

        Ok(orchestrator)
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn HealthyBackupLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.probe = self.probe.with_poll_interval(interval);
        self
    }

    pub fn with_restore_ceiling(mut self, ceiling: Duration) -> Self {
        self.restore_ceiling = ceiling;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Freshness window for standalone verification; restores always rescan
    pub fn with_verification_freshness(mut self, freshness: Duration) -> Self {
        self.verifier = self.verifier.with_freshness(freshness);
        self
    }

    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback = self.rollback.with_call_timeout(timeout);
        self
    }

    pub fn with_escalation(mut self, escalation: Arc<dyn Escalation>) -> Self {
        self.rollback = self.rollback.with_escalation(escalation);
        self
    }

    /// Share exclusivity tokens with other orchestrators in the process
    pub fn with_locks(mut self, locks: RestoreLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    pub fn verifier(&self) -> &IntegrityVerifier {
        &self.verifier
    }

    pub fn probe(&self) -> &HealthProbe {
        &self.probe
    }

    pub fn health_timeout(&self) -> Duration {
        self.health_timeout
    }

    pub fn locks(&self) -> &RestoreLocks {
        &self.locks
    }

    /// Restore `scope`, optionally from an explicit backup set
    ///
    /// Pre-flight failures (denied, conflicting, unknown or corrupt backup)
    /// are returned as errors and create no jobs. Once the first job exists,
    /// every failure is captured in the returned [`RestoreResult`].
    pub async fn restore(&self, scope: Scope, backup_id: Option<BackupId>, confirm: bool) -> Result<RestoreResult> {
        self.execute(RestoreRequest {
            scope,
            backup_id,
            confirm,
        })
        .await
    }

    pub async fn execute(&self, request: RestoreRequest) -> Result<RestoreResult> {
        let invocation_id = Uuid::new_v4();
        let scope = request.scope;

        let result = self.run(invocation_id, request).await;
        match &result {
            Ok(result) => metrics::record_restore(&scope.to_string(), result.outcome.as_str()),
            Err(e) => {
                warn!(invocation_id = %invocation_id, scope = %scope, error = %e, "Restore rejected");
                metrics::record_restore(&scope.to_string(), rejection_label(e));
            }
        }
        result
    }

    #[instrument(skip(self, request), fields(invocation_id = %invocation_id, scope = %request.scope))]
    async fn run(&self, invocation_id: Uuid, request: RestoreRequest) -> Result<RestoreResult> {
        let scope = request.scope;

        if let GateDecision::Denied(reason) = self.gate.check(scope, request.confirm) {
            return Err(RecoveryError::Denied { reason });
        }

        let tiers = TIER_GRAPH.expand(scope);
        if tiers.is_empty() {
            return Err(RecoveryError::NotFound(format!("scope {} has no tiers", scope)));
        }

        let _guard = self.locks.try_acquire(&tiers)?;
        let plan = self
            .plan(scope, request.backup_id.as_ref(), request.confirm, &tiers)
            .await?;

        info!(
            invocation_id = %invocation_id,
            tiers = ?tiers,
            "Restore plan verified, starting tier jobs"
        );

        let mut jobs: Vec<RestoreJob> = Vec::with_capacity(plan.len());
        let mut failure = None;
        let mut rollback = None;

        for planned in &plan {
            let (job, tier_failure) = self.restore_tier(planned).await?;

            if let Some(tier_failure) = tier_failure {
                let (job, result) = self.roll_back(job).await?;
                jobs.push(job);
                failure = Some(tier_failure);
                rollback = Some(result);
                break;
            }
            jobs.push(job);
        }

        let outcome = RestoreOutcome::aggregate(&jobs, plan.len());
        let result = RestoreResult {
            invocation_id,
            scope,
            jobs,
            outcome,
            failure,
            rollback,
        };

        for job in &result.jobs {
            info!(
                invocation_id = %invocation_id,
                tier = %job.tier,
                backup_id = %job.backup_set_id,
                outcome = %job.outcome(),
                attempts = job.attempts,
                healthy = ?job.health_result.as_ref().map(|h| h.healthy),
                "Restore job finished"
            );
        }

        if result.requires_manual_intervention() {
            error!(invocation_id = %invocation_id, scope = %scope, "Restore ended in an UNKNOWN STATE");
        } else {
            info!(invocation_id = %invocation_id, scope = %scope, outcome = %outcome, "Restore finished");
        }

        Ok(result)
    }

    /// Resolve and verify every backup set the restore will read, before
    /// any job exists
    async fn plan(
        &self,
        scope: Scope,
        explicit: Option<&BackupId>,
        confirm: bool,
        tiers: &[Tier],
    ) -> Result<Vec<PlannedTier>> {
        let mut sources: Vec<(Vec<Tier>, ResolvedBackup)> = Vec::new();

        match (scope, explicit) {
            (Scope::Full, None) => match self.catalog.resolve(Scope::Full, None).await {
                Ok(resolved) => sources.push((tiers.to_vec(), resolved)),
                Err(BackupError::NotFound(_)) => {
                    info!("No full-scope backup set, resolving each tier independently");
                    for tier in tiers {
                        let resolved = self
                            .catalog
                            .resolve(Scope::Tier(*tier), None)
                            .await
                            .map_err(lookup_error)?;
                        sources.push((vec![*tier], resolved));
                    }
                }
                Err(e) => return Err(e.into()),
            },
            (scope, explicit) => {
                let resolved = self.catalog.resolve(scope, explicit).await.map_err(lookup_error)?;
                sources.push((tiers.to_vec(), resolved));
            }
        }

        let mut verified: BTreeSet<BackupId> = BTreeSet::new();
        let mut plan = Vec::with_capacity(tiers.len());

        for (source_tiers, resolved) in sources {
            let set = resolved.set;

            if !verified.contains(&set.id) {
                if resolved.unverified && explicit.is_none() {
                    let source_scope = match source_tiers.as_slice() {
                        [tier] => Scope::Tier(*tier),
                        _ => scope,
                    };
                    if let GateDecision::Denied(reason) =
                        self.gate.check_unverified(&set.id, source_scope, confirm)
                    {
                        return Err(RecoveryError::Denied { reason });
                    }
                }

                // Payloads may have changed since the last verification; a
                // destructive restore always re-reads them
                let report = self.verifier.verify_fresh(&set).await?;
                if !report.ok {
                    return Err(RecoveryError::IntegrityFailure {
                        backup_id: set.id.to_string(),
                        failures: report.failures,
                    });
                }
                verified.insert(set.id.clone());
            }

            for tier in source_tiers {
                let artifacts = set.artifacts_for(tier);
                if artifacts.is_empty() {
                    return Err(RecoveryError::NotFound(format!(
                        "backup set {} has no artifacts for tier {}",
                        set.id, tier
                    )));
                }
                plan.push(PlannedTier {
                    tier,
                    request: TierRestore {
                        tier,
                        backup_id: set.id.clone(),
                        artifacts,
                    },
                });
            }
        }

        Ok(plan)
    }

    /// Data load plus health probe for one tier
    async fn restore_tier(&self, planned: &PlannedTier) -> Result<(RestoreJob, Option<TierFailure>)> {
        let tier = planned.tier;
        let mut job = RestoreJob::new(tier, planned.request.backup_id.clone());
        job.transition(JobOutcome::Running)?;
        info!(tier = %tier, backup_id = %job.backup_set_id, artifacts = planned.request.artifacts.len(), "Restoring tier");

        let started = Instant::now();
        let (load, attempts) = self.load(&planned.request).await;
        job.attempts = attempts;

        let failure = match load {
            Err(detail) => {
                warn!(tier = %tier, attempts, detail = %detail, "Restore primitive failed");
                job.detail = Some(detail.clone());
                job.transition(JobOutcome::Failed)?;
                Some(TierFailure {
                    tier,
                    kind: FailureKind::RestorePrimitive,
                    detail,
                })
            }
            Ok(detail) => {
                job.detail = Some(detail);
                let health = self.probe.check(tier, self.health_timeout).await;
                let healthy = health.healthy;
                let last_error = health.last_error.clone();
                job.health_result = Some(health);

                if healthy {
                    job.transition(JobOutcome::Succeeded)?;
                    if let Err(e) = self.ledger.record_healthy(tier, &job.backup_set_id).await {
                        warn!(tier = %tier, error = %e, "Failed to record healthy backup");
                    }
                    None
                } else {
                    job.transition(JobOutcome::Failed)?;
                    Some(TierFailure {
                        tier,
                        kind: FailureKind::HealthTimeout,
                        detail: last_error.unwrap_or_else(|| {
                            format!("not healthy within {:?}", self.health_timeout)
                        }),
                    })
                }
            }
        };

        metrics::record_tier_job(tier, job.outcome().as_str(), started.elapsed().as_secs_f64());
        Ok((job, failure))
    }

    /// Invoke the primitive under the ceiling, retried per policy
    async fn load(&self, request: &TierRestore) -> (std::result::Result<String, String>, u32) {
        let primitive = &self.primitive;
        let ceiling = self.restore_ceiling;

        self.retry
            .execute(move || async move {
                match tokio::time::timeout(ceiling, primitive.restore(request)).await {
                    Ok(Ok(detail)) => Ok(detail),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("restore primitive did not finish within {:?}", ceiling)),
                }
            })
            .await
    }

    /// Roll a failed tier back to its last healthy backup, if one is known
    async fn roll_back(&self, mut job: RestoreJob) -> Result<(RestoreJob, RollbackResult)> {
        let tier = job.tier;
        let result = match self.ledger.last_healthy(tier).await {
            Some(target) => self.rollback.rollback(tier, &target).await,
            None => {
                warn!(tier = %tier, "No healthy backup recorded for tier, rollback unavailable");
                RollbackResult::unavailable(tier)
            }
        };

        if result.succeeded {
            job.transition(JobOutcome::RolledBack)?;
        }
        Ok((job, result))
    }
}

/// Catalog misses surface as `NotFound` at the orchestrator boundary
fn lookup_error(e: BackupError) -> RecoveryError {
    match e {
        BackupError::NotFound(message) => RecoveryError::NotFound(message),
        other => RecoveryError::Backup(other),
    }
}

fn rejection_label(e: &RecoveryError) -> &'static str {
    match e {
        RecoveryError::Denied { .. } => "denied",
        RecoveryError::ConcurrencyConflict { .. } => "conflict",
        RecoveryError::NotFound(_) => "not_found",
        RecoveryError::IntegrityFailure { .. } => "integrity_failure",
        _ => "error",
    }
}
