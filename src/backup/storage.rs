// Backup Storage Backends - directory layout on disk and an in-memory store

use super::types::{Artifact, BackupError, BackupId, BackupSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Streaming reader over one artifact payload
pub type PayloadReader = Pin<Box<dyn AsyncRead + Send>>;

const MANIFEST_FILE: &str = "manifest.json";

/// Read-mostly access to backup sets
///
/// `mark_verified` is the only mutation the orchestrator performs;
/// `store_backup` exists for the backup producer and for tests.
#[async_trait]
pub trait BackupStorage: Send + Sync {
    async fn list_sets(&self) -> Result<Vec<BackupSet>, BackupError>;
    async fn get_set(&self, backup_id: &BackupId) -> Result<BackupSet, BackupError>;
    async fn open_payload(
        &self,
        backup_id: &BackupId,
        artifact: &Artifact,
    ) -> Result<PayloadReader, BackupError>;
    async fn mark_verified(&self, backup_id: &BackupId, at: DateTime<Utc>) -> Result<(), BackupError>;
    async fn store_backup(
        &self,
        set: &BackupSet,
        payloads: HashMap<String, Vec<u8>>,
    ) -> Result<(), BackupError>;
}

/// One directory per backup set, named by its id, holding `manifest.json`
/// and the artifact payload files
pub struct FileBackupStorage {
    backup_directory: PathBuf,
    manifest_lock: Mutex<()>,
}

impl FileBackupStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            backup_directory: directory.into(),
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.backup_directory
    }

    fn set_path(&self, backup_id: &BackupId) -> PathBuf {
        self.backup_directory.join(backup_id.as_str())
    }

    fn manifest_path(&self, backup_id: &BackupId) -> PathBuf {
        self.set_path(backup_id).join(MANIFEST_FILE)
    }

    fn payload_path(&self, backup_id: &BackupId, artifact: &Artifact) -> Result<PathBuf, BackupError> {
        // Payload names come from the manifest; never let them escape the set directory
        if artifact.file.is_empty()
            || artifact.file.contains('/')
            || artifact.file.contains('\\')
            || artifact.file == ".."
        {
            return Err(BackupError::InvalidManifest {
                id: backup_id.to_string(),
                reason: format!("artifact {} has an invalid file name", artifact.name),
            });
        }
        Ok(self.set_path(backup_id).join(&artifact.file))
    }

    async fn read_manifest(&self, backup_id: &BackupId) -> Result<BackupSet, BackupError> {
        let path = self.manifest_path(backup_id);
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(backup_id.to_string()));
            }
            Err(e) => {
                return Err(BackupError::IoError(format!("Failed to read manifest: {}", e)));
            }
        };

        let set: BackupSet = serde_json::from_str(&json).map_err(|e| BackupError::InvalidManifest {
            id: backup_id.to_string(),
            reason: e.to_string(),
        })?;

        if &set.id != backup_id {
            return Err(BackupError::InvalidManifest {
                id: backup_id.to_string(),
                reason: format!("manifest declares id {}", set.id),
            });
        }

        Ok(set)
    }

    async fn write_manifest(&self, set: &BackupSet) -> Result<(), BackupError> {
        let path = self.manifest_path(&set.id);
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(set)
            .map_err(|e| BackupError::SerializationError(format!("Failed to serialize manifest: {}", e)))?;

        fs::write(&tmp_path, json)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to write manifest: {}", e)))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to replace manifest: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl BackupStorage for FileBackupStorage {
    async fn list_sets(&self) -> Result<Vec<BackupSet>, BackupError> {
        let mut entries = match fs::read_dir(&self.backup_directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::IoError(format!("Failed to read backup directory: {}", e)));
            }
        };

        let mut sets = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to read directory entry: {}", e)))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let backup_id = match BackupId::parse(&name) {
                Ok(id) => id,
                Err(_) => {
                    warn!(entry = %name, "Skipping directory with non-conforming backup id");
                    continue;
                }
            };

            match self.read_manifest(&backup_id).await {
                Ok(set) => sets.push(set),
                Err(e) => warn!(backup_id = %backup_id, error = %e, "Skipping unreadable backup set"),
            }
        }

        sets.sort_by(|a, b| b.id.cmp(&a.id));
        debug!(count = sets.len(), root = %self.backup_directory.display(), "Listed backup sets");

        Ok(sets)
    }

    async fn get_set(&self, backup_id: &BackupId) -> Result<BackupSet, BackupError> {
        self.read_manifest(backup_id).await
    }

    async fn open_payload(
        &self,
        backup_id: &BackupId,
        artifact: &Artifact,
    ) -> Result<PayloadReader, BackupError> {
        let path = self.payload_path(backup_id, artifact)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackupError::NotFound(format!(
                "{}/{}",
                backup_id, artifact.file
            ))),
            Err(e) => Err(BackupError::IoError(format!(
                "Failed to open payload {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn mark_verified(&self, backup_id: &BackupId, at: DateTime<Utc>) -> Result<(), BackupError> {
        let _guard = self.manifest_lock.lock().await;
        let mut set = self.read_manifest(backup_id).await?;
        set.verified_at = Some(at);
        self.write_manifest(&set).await
    }

    async fn store_backup(
        &self,
        set: &BackupSet,
        payloads: HashMap<String, Vec<u8>>,
    ) -> Result<(), BackupError> {
        let set_path = self.set_path(&set.id);
        fs::create_dir_all(&set_path)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to create backup directory: {}", e)))?;

        for artifact in &set.artifacts {
            let Some(data) = payloads.get(&artifact.name) else {
                continue;
            };
            let path = self.payload_path(&set.id, artifact)?;
            let mut file = fs::File::create(&path)
                .await
                .map_err(|e| BackupError::IoError(format!("Failed to create payload file: {}", e)))?;
            file.write_all(data)
                .await
                .map_err(|e| BackupError::IoError(format!("Failed to write payload: {}", e)))?;
            file.flush()
                .await
                .map_err(|e| BackupError::IoError(format!("Failed to flush payload: {}", e)))?;
        }

        let _guard = self.manifest_lock.lock().await;
        self.write_manifest(set).await
    }
}

/// In-memory backup storage
#[derive(Default)]
pub struct MemoryBackupStorage {
    sets: DashMap<BackupId, BackupSet>,
    payloads: DashMap<(BackupId, String), Vec<u8>>,
}

impl MemoryBackupStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw payload bytes of an artifact, keyed by artifact file name
    pub fn payload(&self, backup_id: &BackupId, file: &str) -> Option<Vec<u8>> {
        self.payloads
            .get(&(backup_id.clone(), file.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Overwrite a payload in place, bypassing the manifest
    pub fn replace_payload(&self, backup_id: &BackupId, file: &str, data: Vec<u8>) {
        self.payloads.insert((backup_id.clone(), file.to_string()), data);
    }
}

#[async_trait]
impl BackupStorage for MemoryBackupStorage {
    async fn list_sets(&self) -> Result<Vec<BackupSet>, BackupError> {
        let mut sets: Vec<BackupSet> = self.sets.iter().map(|entry| entry.value().clone()).collect();
        sets.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sets)
    }

    async fn get_set(&self, backup_id: &BackupId) -> Result<BackupSet, BackupError> {
        self.sets
            .get(backup_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackupError::NotFound(backup_id.to_string()))
    }

    async fn open_payload(
        &self,
        backup_id: &BackupId,
        artifact: &Artifact,
    ) -> Result<PayloadReader, BackupError> {
        let data = self
            .payload(backup_id, &artifact.file)
            .ok_or_else(|| BackupError::NotFound(format!("{}/{}", backup_id, artifact.file)))?;
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn mark_verified(&self, backup_id: &BackupId, at: DateTime<Utc>) -> Result<(), BackupError> {
        let mut entry = self
            .sets
            .get_mut(backup_id)
            .ok_or_else(|| BackupError::NotFound(backup_id.to_string()))?;
        entry.verified_at = Some(at);
        Ok(())
    }

    async fn store_backup(
        &self,
        set: &BackupSet,
        payloads: HashMap<String, Vec<u8>>,
    ) -> Result<(), BackupError> {
        for artifact in &set.artifacts {
            if let Some(data) = payloads.get(&artifact.name) {
                self.payloads
                    .insert((set.id.clone(), artifact.file.clone()), data.clone());
            }
        }
        self.sets.insert(set.id.clone(), set.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::{Scope, Tier};
    use tokio::io::AsyncReadExt;

    fn sample_set(id: &str) -> (BackupSet, HashMap<String, Vec<u8>>) {
        let set = BackupSet::new(
            BackupId::parse(id).unwrap(),
            Scope::Tier(Tier::Genesis),
            vec![Artifact {
                name: "genesis-db".to_string(),
                tier: Tier::Genesis,
                file: "genesis.dump".to_string(),
                size_bytes: 5,
                checksum: "unused".to_string(),
            }],
        );
        let payloads = HashMap::from([("genesis-db".to_string(), b"hello".to_vec())]);
        (set, payloads)
    }

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileBackupStorage::new(dir.path());
        let (set, payloads) = sample_set("__20260110_000000");

        storage.store_backup(&set, payloads).await.unwrap();

        let loaded = storage.get_set(&set.id).await.unwrap();
        assert_eq!(loaded, set);

        let mut reader = storage.open_payload(&set.id, &set.artifacts[0]).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn test_file_storage_skips_malformed_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileBackupStorage::new(dir.path());

        let (older, payloads) = sample_set("__20260110_000000");
        storage.store_backup(&older, payloads.clone()).await.unwrap();
        let (newer, _) = sample_set("__20260116_053456");
        storage.store_backup(&newer, payloads).await.unwrap();

        std::fs::create_dir(dir.path().join("latest")).unwrap();
        std::fs::create_dir(dir.path().join("__20260199_000000")).unwrap();
        std::fs::create_dir(dir.path().join("__20260120_000000")).unwrap();

        let ids: Vec<String> = storage
            .list_sets()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["__20260116_053456", "__20260110_000000"]);
    }

    #[tokio::test]
    async fn test_file_storage_mark_verified_only_touches_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileBackupStorage::new(dir.path());
        let (set, payloads) = sample_set("__20260110_000000");
        storage.store_backup(&set, payloads).await.unwrap();

        let at = Utc::now();
        storage.mark_verified(&set.id, at).await.unwrap();

        let loaded = storage.get_set(&set.id).await.unwrap();
        assert_eq!(loaded.verified_at, Some(at));
        assert_eq!(loaded.artifacts, set.artifacts);
        let payload = std::fs::read(dir.path().join("__20260110_000000/genesis.dump")).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileBackupStorage::new(dir.path().join("not-created-yet"));

        assert!(storage.list_sets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backups");
        std::fs::write(&file, b"not a directory").unwrap();

        let storage = FileBackupStorage::new(&file);
        assert!(matches!(storage.list_sets().await, Err(BackupError::IoError(_))));
    }

    #[tokio::test]
    async fn test_missing_set_and_payload_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileBackupStorage::new(dir.path());
        let (set, _) = sample_set("__20260110_000000");

        assert!(matches!(storage.get_set(&set.id).await, Err(BackupError::NotFound(_))));

        storage.store_backup(&set, HashMap::new()).await.unwrap();
        assert!(matches!(
            storage.open_payload(&set.id, &set.artifacts[0]).await,
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_payload_names_cannot_escape_set_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileBackupStorage::new(dir.path());
        let (mut set, payloads) = sample_set("__20260110_000000");
        set.artifacts[0].file = "../../etc/passwd".to_string();

        assert!(matches!(
            storage.store_backup(&set, payloads).await,
            Err(BackupError::InvalidManifest { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_storage_lists_newest_first() {
        let storage = MemoryBackupStorage::new();
        for id in ["__20260110_000000", "__20260117_010000", "__20260116_053456"] {
            let (set, payloads) = sample_set(id);
            storage.store_backup(&set, payloads).await.unwrap();
        }

        let ids: Vec<String> = storage
            .list_sets()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(
            ids,
            vec!["__20260117_010000", "__20260116_053456", "__20260110_000000"]
        );
    }
}
