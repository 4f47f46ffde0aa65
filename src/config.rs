//! Orchestrator configuration
//!
//! Loaded from a JSON file. Every field has a default so a partial file (or
//! none at all) yields a usable configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::{HealthEndpoint, PostgresEndpoint, StaticServiceRegistry, TcpEndpoint};
use crate::restore::RetryPolicy;
use crate::tier::Tier;
use crate::{RecoveryError, Result};

/// Health endpoint declaration for a tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// Healthy once a TCP connection is accepted
    Tcp {
        /// `host:port`
        address: String,
    },
    /// Healthy once `SELECT 1` succeeds
    Postgres {
        /// Connection URL
        url: String,
    },
}

impl EndpointConfig {
    /// Build the endpoint this declaration describes
    pub fn build(&self, tier: Tier) -> Arc<dyn HealthEndpoint> {
        match self {
            EndpointConfig::Tcp { address } => {
                Arc::new(TcpEndpoint::new(format!("{}/tcp/{}", tier, address), address.clone()))
            }
            EndpointConfig::Postgres { url } => {
                Arc::new(PostgresEndpoint::new(format!("{}/postgres", tier), url.clone()))
            }
        }
    }
}

/// Per-tier restore target and health endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Database the restore primitive loads into
    pub database_url: Option<String>,
    /// Replaces `pg_restore`/`psql` when set
    pub restore_command: Option<Vec<String>>,
    /// Endpoints polled after the data load
    pub health_endpoints: Vec<EndpointConfig>,
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory holding one sub-directory per backup set
    pub backup_root: PathBuf,
    /// Bounded wait for a tier to report healthy
    pub health_timeout_secs: u64,
    /// Delay between health polling rounds
    pub health_poll_interval_ms: u64,
    /// Ceiling on one restore primitive invocation
    pub restore_ceiling_secs: u64,
    /// Window during which a prior verification is trusted
    pub verification_freshness_secs: u64,
    /// Ceiling on one rollback agent invocation
    pub rollback_timeout_secs: u64,
    /// Retry policy for the restore primitive
    pub restore_retry: RetryPolicy,
    /// Per-tier settings
    pub tiers: BTreeMap<Tier, TierConfig>,
    /// Argv of the external recovery agent; tier and backup id are appended
    pub rollback_command: Option<Vec<String>>,
    /// JSON file tracking the last healthy backup per tier
    pub healthy_ledger_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from("./backups"),
            health_timeout_secs: 120,
            health_poll_interval_ms: 2_000,
            restore_ceiling_secs: 1_800,
            verification_freshness_secs: 3_600,
            rollback_timeout_secs: 1_800,
            restore_retry: RetryPolicy::default(),
            tiers: BTreeMap::new(),
            rollback_command: None,
            healthy_ledger_path: None,
        }
    }
}

impl OrchestratorConfig {
    /// Read and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RecoveryError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| RecoveryError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the orchestrator hang or misbehave
    pub fn validate(&self) -> Result<()> {
        if self.health_timeout_secs == 0 {
            return Err(RecoveryError::Config("health_timeout_secs must be positive".to_string()));
        }
        if self.health_poll_interval_ms == 0 {
            return Err(RecoveryError::Config("health_poll_interval_ms must be positive".to_string()));
        }
        if self.restore_ceiling_secs == 0 {
            return Err(RecoveryError::Config("restore_ceiling_secs must be positive".to_string()));
        }
        if self.restore_retry.max_attempts == 0 {
            return Err(RecoveryError::Config("restore_retry.max_attempts must be at least 1".to_string()));
        }
        if matches!(self.rollback_command.as_deref(), Some([])) {
            return Err(RecoveryError::Config("rollback_command must not be empty".to_string()));
        }
        for (tier, config) in &self.tiers {
            if matches!(config.restore_command.as_deref(), Some([])) {
                return Err(RecoveryError::Config(format!("tiers.{}.restore_command must not be empty", tier)));
            }
        }
        Ok(())
    }

    pub fn with_backup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.backup_root = root.into();
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_tier(mut self, tier: Tier, config: TierConfig) -> Self {
        self.tiers.insert(tier, config);
        self
    }

    pub fn with_rollback_command(mut self, argv: Vec<String>) -> Self {
        self.rollback_command = Some(argv);
        self
    }

    pub fn with_healthy_ledger(mut self, path: impl Into<PathBuf>) -> Self {
        self.healthy_ledger_path = Some(path.into());
        self
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    pub fn restore_ceiling(&self) -> Duration {
        Duration::from_secs(self.restore_ceiling_secs)
    }

    pub fn verification_freshness(&self) -> Duration {
        Duration::from_secs(self.verification_freshness_secs)
    }

    pub fn rollback_timeout(&self) -> Duration {
        Duration::from_secs(self.rollback_timeout_secs)
    }

    /// Service registry holding the configured health endpoints
    pub fn service_registry(&self) -> StaticServiceRegistry {
        let mut registry = StaticServiceRegistry::new();
        for (tier, config) in &self.tiers {
            for endpoint in &config.health_endpoints {
                registry.register(*tier, endpoint.build(*tier));
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ServiceRegistry;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drctl.json");
        std::fs::write(
            &path,
            r#"{
                "backup_root": "/var/backups/dr",
                "tiers": {
                    "control-plane": {
                        "database_url": "postgres://localhost/control",
                        "health_endpoints": [
                            { "kind": "tcp", "address": "127.0.0.1:8080" },
                            { "kind": "postgres", "url": "postgres://localhost/control" }
                        ]
                    }
                },
                "restore_retry": { "max_attempts": 3 }
            }"#,
        )
        .unwrap();

        let config = OrchestratorConfig::from_file(&path).unwrap();

        assert_eq!(config.backup_root, PathBuf::from("/var/backups/dr"));
        assert_eq!(config.health_timeout(), Duration::from_secs(120));
        assert_eq!(config.restore_retry.max_attempts, 3);
        assert_eq!(config.restore_retry.backoff_multiplier, 2.0);

        let registry = config.service_registry();
        assert_eq!(registry.endpoints(Tier::ControlPlane).len(), 2);
        assert!(registry.endpoints(Tier::Genesis).is_empty());
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drctl.json");
        std::fs::write(&path, r#"{ "tiers": { "staging": {} } }"#).unwrap();

        assert!(matches!(OrchestratorConfig::from_file(&path), Err(RecoveryError::Config(_))));
    }

    #[test]
    fn test_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());

        let empty_agent = OrchestratorConfig::default().with_rollback_command(Vec::new());
        assert!(empty_agent.validate().is_err());

        let mut zero_timeout = OrchestratorConfig::default();
        zero_timeout.health_timeout_secs = 0;
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = OrchestratorConfig::from_file("/nonexistent/drctl.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
