// Integrity Verifier - size and checksum validation of backup sets

use super::storage::{BackupStorage, PayloadReader};
use super::types::{Artifact, ArtifactFailure, BackupError, BackupId, BackupSet};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Outcome of verifying one backup set
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub backup_id: BackupId,
    pub ok: bool,
    pub failures: Vec<ArtifactFailure>,
    pub verified_at: Option<DateTime<Utc>>,
    /// Payloads were not re-read because a verification inside the
    /// freshness window already exists
    pub cached: bool,
}

/// Validates backup sets against their manifests; never mutates payloads
#[derive(Clone)]
pub struct IntegrityVerifier {
    storage: Arc<dyn BackupStorage>,
    freshness: Duration,
}

impl IntegrityVerifier {
    pub fn new(storage: Arc<dyn BackupStorage>) -> Self {
        Self {
            storage,
            freshness: Duration::from_secs(3600),
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Verify, skipping the payload scan when the set was verified within
    /// the freshness window
    pub async fn verify(&self, set: &BackupSet) -> Result<VerificationReport, BackupError> {
        if let Some(verified_at) = set.verified_at {
            let age = Utc::now().signed_duration_since(verified_at);
            let fresh = age
                .to_std()
                .map(|age| age < self.freshness)
                .unwrap_or(false);
            if fresh && set.is_selectable() {
                debug!(backup_id = %set.id, %verified_at, "Verification still fresh, skipping payload scan");
                return Ok(VerificationReport {
                    backup_id: set.id.clone(),
                    ok: true,
                    failures: Vec::new(),
                    verified_at: Some(verified_at),
                    cached: true,
                });
            }
        }

        self.verify_fresh(set).await
    }

    /// Recompute every digest regardless of any prior verification
    #[instrument(skip(self, set), fields(backup_id = %set.id))]
    pub async fn verify_fresh(&self, set: &BackupSet) -> Result<VerificationReport, BackupError> {
        let mut failures = Vec::new();

        if set.artifacts.is_empty() {
            failures.push(ArtifactFailure {
                artifact: "*".to_string(),
                reason: "backup set has no artifacts".to_string(),
            });
        }

        for artifact in &set.artifacts {
            if let Some(reason) = self.check_artifact(&set.id, artifact).await? {
                warn!(backup_id = %set.id, artifact = %artifact.name, reason = %reason, "Artifact failed verification");
                failures.push(ArtifactFailure {
                    artifact: artifact.name.clone(),
                    reason,
                });
            }
        }

        if !failures.is_empty() {
            metrics::record_verification(false);
            return Ok(VerificationReport {
                backup_id: set.id.clone(),
                ok: false,
                failures,
                verified_at: None,
                cached: false,
            });
        }

        let now = Utc::now();
        self.storage.mark_verified(&set.id, now).await?;
        metrics::record_verification(true);
        info!(backup_id = %set.id, artifacts = set.artifacts.len(), "Backup set verified");

        Ok(VerificationReport {
            backup_id: set.id.clone(),
            ok: true,
            failures,
            verified_at: Some(now),
            cached: false,
        })
    }

    /// Look up a set by id and verify it; `force` bypasses the freshness window
    pub async fn verify_id(&self, backup_id: &BackupId, force: bool) -> Result<VerificationReport, BackupError> {
        let set = self.storage.get_set(backup_id).await?;
        if force {
            self.verify_fresh(&set).await
        } else {
            self.verify(&set).await
        }
    }

    /// Returns the failure reason, or `None` when the artifact checks out
    async fn check_artifact(
        &self,
        backup_id: &BackupId,
        artifact: &Artifact,
    ) -> Result<Option<String>, BackupError> {
        let reader = match self.storage.open_payload(backup_id, artifact).await {
            Ok(reader) => reader,
            Err(BackupError::NotFound(_)) => return Ok(Some("missing payload".to_string())),
            Err(BackupError::InvalidManifest { reason, .. }) => return Ok(Some(reason)),
            Err(e) => return Err(e),
        };

        let (size, checksum) = digest_payload(reader)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to read payload {}: {}", artifact.file, e)))?;

        if size != artifact.size_bytes {
            return Ok(Some(format!(
                "size mismatch (declared {}, actual {})",
                artifact.size_bytes, size
            )));
        }

        if !checksum.eq_ignore_ascii_case(artifact.checksum.trim()) {
            return Ok(Some("checksum mismatch".to_string()));
        }

        Ok(None)
    }
}

/// Stream a payload, returning its byte length and hex SHA-256
pub async fn digest_payload(mut reader: PayloadReader) -> std::io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Hex SHA-256 of an in-memory payload
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
