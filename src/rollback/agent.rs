//! Concrete rollback capabilities

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CapabilityError, RollbackCapability};
use crate::backup::BackupId;
use crate::tier::Tier;

/// Runs an external recovery agent as `<argv...> <tier> <backup-id>`
///
/// A zero exit status is success; any other status is a rejection. Failing
/// to spawn the agent at all means it is unreachable.
#[derive(Debug, Clone)]
pub struct CommandRollbackAgent {
    argv: Vec<String>,
}

impl CommandRollbackAgent {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl RollbackCapability for CommandRollbackAgent {
    async fn rollback(&self, tier: Tier, target: &BackupId) -> Result<String, CapabilityError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| CapabilityError::Unreachable("empty rollback command".to_string()))?;

        debug!(program = %program, tier = %tier, target = %target, "Spawning rollback agent");

        let output = Command::new(program)
            .args(args)
            .arg(tier.name())
            .arg(target.as_str())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CapabilityError::Unreachable(format!("failed to run {}: {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            Ok(if stdout.is_empty() {
                format!("{} rolled back to {}", tier, target)
            } else {
                stdout
            })
        } else {
            Err(CapabilityError::Rejected(format!(
                "{} exited with {}: {}",
                program, output.status, stderr
            )))
        }
    }
}

/// Stand-in used when no recovery agent is configured
///
/// Every request reports the agent as unreachable, so a failed restore
/// without an agent always surfaces as an unknown state.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredRollback;

#[async_trait]
impl RollbackCapability for UnconfiguredRollback {
    async fn rollback(&self, _tier: Tier, _target: &BackupId) -> Result<String, CapabilityError> {
        Err(CapabilityError::Unreachable(
            "no rollback agent configured".to_string(),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn target() -> BackupId {
        BackupId::parse("__20260110_000000").unwrap()
    }

    #[tokio::test]
    async fn test_agent_receives_tier_and_target() {
        let agent = CommandRollbackAgent::new(vec!["echo".to_string(), "reverting".to_string()]);
        let detail = agent.rollback(Tier::DataPlaneProd, &target()).await.unwrap();

        assert_eq!(detail, "reverting data-plane-prod __20260110_000000");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_rejection() {
        let agent = CommandRollbackAgent::new(vec!["false".to_string()]);
        let err = agent.rollback(Tier::Genesis, &target()).await.unwrap_err();

        assert!(matches!(err, CapabilityError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unreachable() {
        let agent = CommandRollbackAgent::new(vec!["/nonexistent/recovery-agent".to_string()]);
        let err = agent.rollback(Tier::Genesis, &target()).await.unwrap_err();

        assert!(matches!(err, CapabilityError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_is_unreachable() {
        let err = UnconfiguredRollback.rollback(Tier::Genesis, &target()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Unreachable(_)));
    }
}
