// Shared fixtures and fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use recovery::backup::{checksum, Artifact, BackupId, BackupSet, BackupStorage, MemoryBackupStorage};
use recovery::health::{HealthEndpoint, StaticServiceRegistry};
use recovery::restore::{PrimitiveError, RestoreOrchestrator, RestorePrimitive, TierRestore};
use recovery::rollback::{CapabilityError, Escalation, RollbackCapability, UnknownStateEvent};
use recovery::tier::{Scope, Tier};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const BACKUP_ID: &str = "__20260116_053456";
pub const PREVIOUS_ID: &str = "__20260110_000000";

pub fn id(raw: &str) -> BackupId {
    BackupId::parse(raw).expect("valid backup id")
}

pub fn payload(tier: Tier) -> Vec<u8> {
    format!("-- pg dump of {}\n", tier).into_bytes()
}

pub fn artifact(tier: Tier) -> Artifact {
    let data = payload(tier);
    Artifact {
        name: format!("{}-db", tier),
        tier,
        file: format!("{}.dump", tier),
        size_bytes: data.len() as u64,
        checksum: checksum(&data),
    }
}

/// Publish a full-scope set with one valid artifact per tier
pub async fn publish_full_set(storage: &dyn BackupStorage, raw_id: &str, verified: bool) -> BackupSet {
    publish_set(storage, raw_id, Scope::Full, &Tier::ALL, verified).await
}

pub async fn publish_set(
    storage: &dyn BackupStorage,
    raw_id: &str,
    scope: Scope,
    tiers: &[Tier],
    verified: bool,
) -> BackupSet {
    let mut set = BackupSet::new(id(raw_id), scope, tiers.iter().map(|t| artifact(*t)).collect());
    if verified {
        set.verified_at = Some(chrono::Utc::now());
    }
    let payloads: HashMap<String, Vec<u8>> = tiers
        .iter()
        .map(|t| (artifact(*t).name, payload(*t)))
        .collect();
    storage
        .store_backup(&set, payloads)
        .await
        .expect("Failed to publish backup set");
    set
}

/// Restore primitive that records every invocation
#[derive(Default)]
pub struct RecordingPrimitive {
    calls: Mutex<Vec<(Tier, BackupId)>>,
    failing: HashSet<Tier>,
    block: Option<(Tier, Arc<Notify>, Arc<Notify>)>,
}

impl RecordingPrimitive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, tier: Tier) -> Self {
        self.failing.insert(tier);
        self
    }

    /// Signal `entered` on reaching `tier`, then wait for `release`
    pub fn blocking(mut self, tier: Tier, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.block = Some((tier, entered, release));
        self
    }

    pub fn calls(&self) -> Vec<Tier> {
        self.calls.lock().iter().map(|(tier, _)| *tier).collect()
    }

    pub fn backups(&self) -> Vec<BackupId> {
        self.calls.lock().iter().map(|(_, id)| id.clone()).collect()
    }
}

#[async_trait]
impl RestorePrimitive for RecordingPrimitive {
    async fn restore(&self, request: &TierRestore) -> Result<String, PrimitiveError> {
        self.calls.lock().push((request.tier, request.backup_id.clone()));

        if let Some((tier, entered, release)) = &self.block {
            if *tier == request.tier {
                entered.notify_one();
                release.notified().await;
            }
        }

        if self.failing.contains(&request.tier) {
            return Err(PrimitiveError::Failed {
                program: "pg_restore".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("could not connect to {} database", request.tier),
            });
        }
        Ok(format!("loaded {} artifact(s)", request.artifacts.len()))
    }
}

/// Rollback capability with a fixed answer
pub struct ScriptedRollback {
    answer: Result<String, CapabilityError>,
    calls: Mutex<Vec<(Tier, BackupId)>>,
}

impl ScriptedRollback {
    pub fn succeeding() -> Self {
        Self::answering(Ok("reverted".to_string()))
    }

    pub fn rejecting() -> Self {
        Self::answering(Err(CapabilityError::Rejected("restore of previous dump failed".to_string())))
    }

    pub fn unreachable() -> Self {
        Self::answering(Err(CapabilityError::Unreachable("connection refused".to_string())))
    }

    fn answering(answer: Result<String, CapabilityError>) -> Self {
        Self {
            answer,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Tier, BackupId)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RollbackCapability for ScriptedRollback {
    async fn rollback(&self, tier: Tier, target: &BackupId) -> Result<String, CapabilityError> {
        self.calls.lock().push((tier, target.clone()));
        self.answer.clone()
    }
}

#[derive(Default)]
pub struct RecordingEscalation {
    events: Mutex<Vec<UnknownStateEvent>>,
}

impl RecordingEscalation {
    pub fn events(&self) -> Vec<UnknownStateEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Escalation for RecordingEscalation {
    async fn escalate(&self, event: &UnknownStateEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Health endpoint with a fixed answer
pub struct FixedEndpoint {
    name: String,
    healthy: bool,
}

impl FixedEndpoint {
    pub fn healthy(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            healthy: true,
        })
    }

    pub fn unhealthy(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            healthy: false,
        })
    }
}

#[async_trait]
impl HealthEndpoint for FixedEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<(), String> {
        if self.healthy {
            Ok(())
        } else {
            Err("connection refused".to_string())
        }
    }
}

/// Every tier healthy except the given ones
pub fn registry_with_unhealthy(unhealthy: &[Tier]) -> StaticServiceRegistry {
    Tier::ALL.iter().fold(StaticServiceRegistry::new(), |registry, tier| {
        let endpoint: Arc<dyn HealthEndpoint> = if unhealthy.contains(tier) {
            FixedEndpoint::unhealthy(&format!("{}-api", tier))
        } else {
            FixedEndpoint::healthy(&format!("{}-api", tier))
        };
        registry.with_endpoint(*tier, endpoint)
    })
}

pub fn orchestrator(
    storage: Arc<dyn BackupStorage>,
    primitive: Arc<RecordingPrimitive>,
    registry: StaticServiceRegistry,
    capability: Arc<dyn RollbackCapability>,
) -> RestoreOrchestrator {
    RestoreOrchestrator::new(storage, primitive, Arc::new(registry), capability)
        .with_health_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_secs(1))
}

pub fn memory_storage() -> Arc<MemoryBackupStorage> {
    Arc::new(MemoryBackupStorage::new())
}
