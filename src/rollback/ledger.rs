//! Last-known-good backup per tier
//!
//! The orchestrator records a tier's backup id once the tier has passed its
//! health probe; rollback targets are read back from here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::backup::{BackupError, BackupId};
use crate::tier::Tier;

#[async_trait]
pub trait HealthyBackupLedger: Send + Sync {
    async fn last_healthy(&self, tier: Tier) -> Option<BackupId>;
    async fn record_healthy(&self, tier: Tier, backup_id: &BackupId) -> Result<(), BackupError>;
}

#[derive(Debug, Default)]
pub struct MemoryHealthyLedger {
    entries: DashMap<Tier, BackupId>,
}

impl MemoryHealthyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry, e.g. from an external inventory
    pub fn with_entry(self, tier: Tier, backup_id: BackupId) -> Self {
        self.entries.insert(tier, backup_id);
        self
    }
}

#[async_trait]
impl HealthyBackupLedger for MemoryHealthyLedger {
    async fn last_healthy(&self, tier: Tier) -> Option<BackupId> {
        self.entries.get(&tier).map(|entry| entry.value().clone())
    }

    async fn record_healthy(&self, tier: Tier, backup_id: &BackupId) -> Result<(), BackupError> {
        self.entries.insert(tier, backup_id.clone());
        Ok(())
    }
}

/// JSON file mapping tier name to backup id
pub struct FileHealthyLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileHealthyLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<Tier, BackupId>, BackupError> {
        match fs::read_to_string(&self.path).await {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| BackupError::SerializationError(format!("Failed to parse ledger: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(BackupError::IoError(format!("Failed to read ledger: {}", e))),
        }
    }
}

#[async_trait]
impl HealthyBackupLedger for FileHealthyLedger {
    async fn last_healthy(&self, tier: Tier) -> Option<BackupId> {
        match self.load().await {
            Ok(entries) => entries.get(&tier).cloned(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Healthy-backup ledger unreadable");
                None
            }
        }
    }

    async fn record_healthy(&self, tier: Tier, backup_id: &BackupId) -> Result<(), BackupError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(tier, backup_id.clone());

        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| BackupError::SerializationError(format!("Failed to serialize ledger: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::IoError(format!("Failed to create ledger directory: {}", e)))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to write ledger: {}", e)))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to replace ledger: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_ledger_tracks_latest_entry() {
        let ledger = MemoryHealthyLedger::new();
        assert!(ledger.last_healthy(Tier::Genesis).await.is_none());

        let first = BackupId::parse("__20260110_000000").unwrap();
        let second = BackupId::parse("__20260116_053456").unwrap();
        ledger.record_healthy(Tier::Genesis, &first).await.unwrap();
        ledger.record_healthy(Tier::Genesis, &second).await.unwrap();

        assert_eq!(ledger.last_healthy(Tier::Genesis).await, Some(second));
        assert!(ledger.last_healthy(Tier::ControlPlane).await.is_none());
    }

    #[tokio::test]
    async fn test_file_ledger_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/healthy.json");
        let id = BackupId::parse("__20260116_053456").unwrap();

        FileHealthyLedger::new(&path)
            .record_healthy(Tier::DataPlaneProd, &id)
            .await
            .unwrap();

        let reopened = FileHealthyLedger::new(&path);
        assert_eq!(reopened.last_healthy(Tier::DataPlaneProd).await, Some(id));
        assert!(reopened.last_healthy(Tier::DataPlaneDev).await.is_none());

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"data-plane-prod\": \"__20260116_053456\""));
    }
}
