// Confirmation Gate - guards destructive restores behind explicit acknowledgment

use crate::backup::BackupId;
use crate::tier::{Scope, Tier, TierGraph, TIER_GRAPH};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    /// Carries what would be overwritten
    Denied(String),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

/// Stateless guard; every call is evaluated from scratch
#[derive(Debug, Clone)]
pub struct ConfirmationGate {
    graph: TierGraph,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self {
            graph: TIER_GRAPH.clone(),
        }
    }
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph(graph: TierGraph) -> Self {
        Self { graph }
    }

    pub fn check(&self, scope: Scope, confirm: bool) -> GateDecision {
        let decision = match self.impact(scope) {
            Some(impact) if !confirm => GateDecision::Denied(format!(
                "{}; re-run with confirmation to proceed",
                impact
            )),
            _ => GateDecision::Allowed,
        };
        debug!(scope = %scope, confirm, allowed = decision.is_allowed(), "Confirmation gate evaluated");
        decision
    }

    /// Extra confirmation for a set that resolution fell back to
    pub fn check_unverified(&self, backup_id: &BackupId, scope: Scope, confirm: bool) -> GateDecision {
        if confirm {
            return GateDecision::Allowed;
        }
        GateDecision::Denied(format!(
            "no verified backup set exists for scope {}; the newest candidate {} has never been verified; \
             re-run with confirmation to verify and restore it",
            scope, backup_id
        ))
    }

    /// Human-readable description of what `scope` overwrites, or `None` when
    /// the restore is not destructive
    pub fn impact(&self, scope: Scope) -> Option<String> {
        match scope {
            Scope::Full => Some(format!(
                "full restore overwrites the databases of every tier: {}",
                join(self.graph.order().iter())
            )),
            Scope::Tier(tier) => {
                let restored: BTreeSet<Tier> = self.graph.expand(scope).into_iter().collect();
                let stranded: BTreeSet<Tier> = self
                    .graph
                    .transitive_dependents(tier)
                    .difference(&restored)
                    .copied()
                    .collect();

                if stranded.is_empty() {
                    None
                } else {
                    Some(format!(
                        "restoring {} overwrites the {} database while dependent tiers {} \
                         are not being restored and may be left inconsistent",
                        tier,
                        tier,
                        join(stranded.iter())
                    ))
                }
            }
        }
    }
}

fn join<'a>(tiers: impl Iterator<Item = &'a Tier>) -> String {
    tiers.map(|t| t.name()).collect::<Vec<_>>().join(", ")
}
