// Backup Catalog - listing and resolution of backup sets

use super::storage::BackupStorage;
use super::types::{BackupError, BackupId, BackupSet};
use crate::tier::{Scope, TIER_GRAPH};
use std::sync::Arc;
use tracing::{debug, warn};

/// A backup set picked by [`BackupCatalog::resolve`]
#[derive(Debug, Clone)]
pub struct ResolvedBackup {
    pub set: BackupSet,
    /// Resolution fell back to (or was pointed at) a set nobody has verified yet
    pub unverified: bool,
}

/// Pure read view over the backup storage location
#[derive(Clone)]
pub struct BackupCatalog {
    storage: Arc<dyn BackupStorage>,
}

impl BackupCatalog {
    pub fn new(storage: Arc<dyn BackupStorage>) -> Self {
        Self { storage }
    }

    /// Backup sets covering `scope` (all sets when `None`), newest first
    pub async fn list(&self, scope: Option<Scope>) -> Result<Vec<BackupSet>, BackupError> {
        let mut sets = self.storage.list_sets().await?;
        if let Some(scope) = scope {
            sets.retain(|set| set.covers(scope));
        }
        sets.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sets)
    }

    pub async fn get(&self, backup_id: &BackupId) -> Result<BackupSet, BackupError> {
        self.storage.get_set(backup_id).await
    }

    /// Resolve a scope plus optional explicit id to a concrete backup set
    ///
    /// An explicit id must exist and cover the scope. Without one, the newest
    /// verified set wins; failing that the newest unverified set is returned
    /// and flagged.
    pub async fn resolve(
        &self,
        scope: Scope,
        explicit_id: Option<&BackupId>,
    ) -> Result<ResolvedBackup, BackupError> {
        if let Some(backup_id) = explicit_id {
            let set = self.storage.get_set(backup_id).await?;
            if !set.covers(scope) {
                return Err(BackupError::NotFound(format!(
                    "{} covers scope {}, not {}",
                    backup_id, set.scope, scope
                )));
            }
            let unverified = !set.is_verified();
            debug!(backup_id = %backup_id, scope = %scope, unverified, "Resolved explicit backup set");
            return Ok(ResolvedBackup { set, unverified });
        }

        let candidates: Vec<BackupSet> = self
            .list(Some(scope))
            .await?
            .into_iter()
            .filter(|set| set.is_selectable() && Self::serves(set, scope))
            .collect();

        if let Some(set) = candidates.iter().find(|set| set.is_verified()) {
            debug!(backup_id = %set.id, scope = %scope, "Resolved newest verified backup set");
            return Ok(ResolvedBackup {
                set: set.clone(),
                unverified: false,
            });
        }

        match candidates.into_iter().next() {
            Some(set) => {
                warn!(
                    backup_id = %set.id,
                    scope = %scope,
                    "No verified backup set available, falling back to newest unverified"
                );
                Ok(ResolvedBackup { set, unverified: true })
            }
            None => Err(BackupError::NotFound(format!("no backup set for scope {}", scope))),
        }
    }

    /// A set only serves the tiers it carries artifacts for; a full restore
    /// needs every tier
    fn serves(set: &BackupSet, scope: Scope) -> bool {
        match scope {
            Scope::Full => {
                set.scope == Scope::Full
                    && TIER_GRAPH.order().iter().all(|tier| set.has_artifacts_for(*tier))
            }
            Scope::Tier(tier) => set.has_artifacts_for(tier),
        }
    }
}
