// Restore Locks - in-process exclusivity per tier set

use crate::metrics;
use crate::tier::Tier;
use crate::{RecoveryError, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Tiers held by in-flight restore invocations
#[derive(Debug, Clone, Default)]
pub struct RestoreLocks {
    active: Arc<Mutex<BTreeSet<Tier>>>,
}

impl RestoreLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every tier in `tiers`, or none of them
    ///
    /// Overlap with an active invocation is rejected immediately; requests
    /// are never queued.
    pub fn try_acquire(&self, tiers: &[Tier]) -> Result<TierSetGuard> {
        let mut active = self.active.lock();

        if tiers.iter().any(|tier| active.contains(tier)) {
            return Err(RecoveryError::ConcurrencyConflict {
                requested: tiers.to_vec(),
                active: active.iter().copied().collect(),
            });
        }

        active.extend(tiers.iter().copied());
        metrics::restore_started();
        debug!(tiers = ?tiers, "Acquired restore locks");

        Ok(TierSetGuard {
            active: Arc::clone(&self.active),
            tiers: tiers.to_vec(),
        })
    }

    /// Snapshot of the currently held tiers
    pub fn active(&self) -> BTreeSet<Tier> {
        self.active.lock().clone()
    }
}

/// Exclusivity token; the tiers are released when it is dropped
#[derive(Debug)]
pub struct TierSetGuard {
    active: Arc<Mutex<BTreeSet<Tier>>>,
    tiers: Vec<Tier>,
}

impl TierSetGuard {
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }
}

impl Drop for TierSetGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        for tier in &self.tiers {
            active.remove(tier);
        }
        metrics::restore_finished();
        debug!(tiers = ?self.tiers, "Released restore locks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlapping_sets_conflict() {
        let locks = RestoreLocks::new();
        let _guard = locks.try_acquire(&[Tier::Genesis, Tier::ControlPlane]).unwrap();

        let err = locks.try_acquire(&[Tier::ControlPlane]).unwrap_err();
        match err {
            RecoveryError::ConcurrencyConflict { requested, active } => {
                assert_eq!(requested, vec![Tier::ControlPlane]);
                assert_eq!(active, vec![Tier::Genesis, Tier::ControlPlane]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_disjoint_sets_proceed() {
        let locks = RestoreLocks::new();
        let _prod = locks.try_acquire(&[Tier::DataPlaneProd]).unwrap();
        let _dev = locks.try_acquire(&[Tier::DataPlaneDev]).unwrap();

        assert_eq!(locks.active().len(), 2);
    }

    #[test]
    fn test_release_on_drop() {
        let locks = RestoreLocks::new();
        {
            let guard = locks.try_acquire(&Tier::ALL).unwrap();
            assert_eq!(guard.tiers().len(), 4);
        }

        assert!(locks.active().is_empty());
        assert!(locks.try_acquire(&Tier::ALL).is_ok());
    }

    #[test]
    fn test_rejected_acquire_takes_nothing() {
        let locks = RestoreLocks::new();
        let _prod = locks.try_acquire(&[Tier::DataPlaneProd]).unwrap();

        assert!(locks.try_acquire(&[Tier::DataPlaneDev, Tier::DataPlaneProd]).is_err());
        let expected: BTreeSet<Tier> = [Tier::DataPlaneProd].into();
        assert_eq!(locks.active(), expected);
    }
}
