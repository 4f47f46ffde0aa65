// Backup Set Types - identifiers, artifacts and manifests

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tier::{Scope, Tier};

lazy_static! {
    static ref BACKUP_ID_PATTERN: Regex = Regex::new(r"^__\d{8}_\d{6}$").unwrap();
}

const BACKUP_ID_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Timestamp-derived backup identifier: `__YYYYMMDD_HHMMSS`
///
/// String order equals chronological order, which the catalog relies on for
/// "most recent" resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupId {
    raw: String,
    created_at: DateTime<Utc>,
}

impl BackupId {
    pub fn parse(value: &str) -> Result<Self, BackupError> {
        if !BACKUP_ID_PATTERN.is_match(value) {
            return Err(BackupError::InvalidId(value.to_string()));
        }

        let naive = NaiveDateTime::parse_from_str(&value[2..], BACKUP_ID_TIME_FORMAT)
            .map_err(|_| BackupError::InvalidId(value.to_string()))?;

        Ok(Self {
            raw: value.to_string(),
            created_at: Utc.from_utc_datetime(&naive),
        })
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        // Sub-second precision is not representable in the id
        let created_at = at.with_nanosecond(0).unwrap_or(at);
        Self {
            raw: format!("__{}", created_at.format(BACKUP_ID_TIME_FORMAT)),
            created_at,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for BackupId {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BackupId {
    type Error = BackupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BackupId> for String {
    fn from(id: BackupId) -> Self {
        id.raw
    }
}

/// One named payload within a backup set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical store name, e.g. `control-plane-db`
    pub name: String,
    /// Tier this payload restores
    pub tier: Tier,
    /// Payload file name relative to the backup set
    pub file: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the payload
    pub checksum: String,
}

/// One coherent point-in-time snapshot; serialized as `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSet {
    pub id: BackupId,
    pub scope: Scope,
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
    /// Present once the integrity verifier has confirmed the set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl BackupSet {
    pub fn new(id: BackupId, scope: Scope, artifacts: Vec<Artifact>) -> Self {
        Self {
            created_at: id.created_at(),
            id,
            scope,
            artifacts,
            verified_at: None,
        }
    }

    /// A set without artifacts is never selectable by "most recent" resolution
    pub fn is_selectable(&self) -> bool {
        !self.artifacts.is_empty()
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    pub fn covers(&self, scope: Scope) -> bool {
        self.scope.covers(scope)
    }

    /// Artifacts restoring the given tier, in manifest order
    pub fn artifacts_for(&self, tier: Tier) -> Vec<Artifact> {
        self.artifacts
            .iter()
            .filter(|a| a.tier == tier)
            .cloned()
            .collect()
    }

    pub fn has_artifacts_for(&self, tier: Tier) -> bool {
        self.artifacts.iter().any(|a| a.tier == tier)
    }

    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size_bytes).sum()
    }
}

/// One artifact that failed verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFailure {
    pub artifact: String,
    pub reason: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackupError {
    #[error("Backup not found: {0}")]
    NotFound(String),
    #[error("Invalid backup id '{0}': expected __YYYYMMDD_HHMMSS")]
    InvalidId(String),
    #[error("Invalid manifest for {id}: {reason}")]
    InvalidManifest { id: String, reason: String },
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
