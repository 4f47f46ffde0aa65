// Restore Primitive - the external data-load step for one tier

use crate::backup::{Artifact, BackupError, BackupId, BackupStorage};
use crate::config::TierConfig;
use crate::tier::Tier;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Everything a primitive needs to load one tier
#[derive(Debug, Clone)]
pub struct TierRestore {
    pub tier: Tier,
    pub backup_id: BackupId,
    /// Artifacts for this tier in manifest order
    pub artifacts: Vec<Artifact>,
}

#[derive(Error, Debug)]
pub enum PrimitiveError {
    #[error("no restore target configured for tier {0}")]
    Unconfigured(Tier),
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("payload unavailable: {0}")]
    Payload(#[from] BackupError),
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("IO error while streaming {artifact}: {reason}")]
    Io { artifact: String, reason: String },
}

/// The database's own dump-restore operation, seen as a capability
#[async_trait]
pub trait RestorePrimitive: Send + Sync {
    /// Load every artifact of the tier; returns a detail message on success
    async fn restore(&self, request: &TierRestore) -> Result<String, PrimitiveError>;
}

/// Streams artifacts into `pg_restore` (custom-format dumps) or `psql`
/// (plain `.sql` files) on the tier's database
///
/// A per-tier `restore_command` replaces both. It receives the payload on
/// stdin and `DR_TIER`, `DR_BACKUP_ID`, `DR_ARTIFACT` and `DR_DATABASE_URL`
/// in its environment.
pub struct PgRestorePrimitive {
    storage: Arc<dyn BackupStorage>,
    tiers: HashMap<Tier, TierConfig>,
}

impl PgRestorePrimitive {
    pub fn new(storage: Arc<dyn BackupStorage>) -> Self {
        Self {
            storage,
            tiers: HashMap::new(),
        }
    }

    pub fn with_tier(mut self, tier: Tier, config: TierConfig) -> Self {
        self.tiers.insert(tier, config);
        self
    }

    fn command_for(&self, tier: Tier, backup_id: &BackupId, artifact: &Artifact) -> Result<Command, PrimitiveError> {
        let config = self.tiers.get(&tier).ok_or(PrimitiveError::Unconfigured(tier))?;
        let database_url = config.database_url.clone().unwrap_or_default();

        let mut command = match config.restore_command.as_deref() {
            Some([program, args @ ..]) => {
                let mut command = Command::new(program);
                command
                    .args(args)
                    .env("DR_TIER", tier.name())
                    .env("DR_BACKUP_ID", backup_id.as_str())
                    .env("DR_ARTIFACT", &artifact.name)
                    .env("DR_DATABASE_URL", &database_url);
                command
            }
            _ if database_url.is_empty() => return Err(PrimitiveError::Unconfigured(tier)),
            _ if artifact.file.ends_with(".sql") => {
                let mut command = Command::new("psql");
                command
                    .arg("--dbname")
                    .arg(&database_url)
                    .args(["--quiet", "--single-transaction", "--set", "ON_ERROR_STOP=1", "--file", "-"]);
                command
            }
            _ => {
                let mut command = Command::new("pg_restore");
                command
                    .arg("--dbname")
                    .arg(&database_url)
                    .args(["--clean", "--if-exists", "--no-owner", "--single-transaction"]);
                command
            }
        };

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }

    async fn load_artifact(
        &self,
        tier: Tier,
        backup_id: &BackupId,
        artifact: &Artifact,
    ) -> Result<(), PrimitiveError> {
        let mut command = self.command_for(tier, backup_id, artifact)?;
        let program = command.as_std().get_program().to_string_lossy().into_owned();

        let mut reader = self.storage.open_payload(backup_id, artifact).await?;
        let mut child = command.spawn().map_err(|e| PrimitiveError::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        let mut stdin = child.stdin.take().ok_or_else(|| PrimitiveError::Spawn {
            program: program.clone(),
            reason: "stdin not captured".to_string(),
        })?;

        debug!(tier = %tier, artifact = %artifact.name, program = %program, "Streaming artifact");

        let feed = async move {
            let copied = tokio::io::copy(&mut reader, &mut stdin).await;
            drop(stdin);
            copied
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| PrimitiveError::Io {
            artifact: artifact.name.clone(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(PrimitiveError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        fed.map(|_| ()).map_err(|e| PrimitiveError::Io {
            artifact: artifact.name.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl RestorePrimitive for PgRestorePrimitive {
    #[instrument(skip(self, request), fields(tier = %request.tier, backup_id = %request.backup_id))]
    async fn restore(&self, request: &TierRestore) -> Result<String, PrimitiveError> {
        for artifact in &request.artifacts {
            self.load_artifact(request.tier, &request.backup_id, artifact).await?;
            info!(tier = %request.tier, artifact = %artifact.name, bytes = artifact.size_bytes, "Artifact loaded");
        }

        Ok(format!(
            "loaded {} artifact(s) from {}",
            request.artifacts.len(),
            request.backup_id
        ))
    }
}
