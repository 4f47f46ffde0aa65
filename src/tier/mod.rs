//! Tier dependency graph
//!
//! Tiers and their prerequisites are static data: a tagged enumeration plus
//! an adjacency list. The graph is built once into a petgraph `DiGraph`
//! (edges run prerequisite -> dependent) and its topological order is
//! computed at construction and cached.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to the tier graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TierGraphError {
    #[error("Cycle detected in tier graph")]
    CycleDetected,

    #[error("Tier {tier} declares prerequisite {prerequisite} which is not part of the graph")]
    UnknownPrerequisite { tier: Tier, prerequisite: Tier },

    #[error("Unknown tier or scope: {0}")]
    UnknownName(String),
}

/// A named restore unit
///
/// The declaration order is the canonical tie-break for the topological
/// sort, which places production ahead of development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Bootstrap tier, restorable with nothing else running
    Genesis,
    /// Control-plane workflow engine
    ControlPlane,
    /// Production data plane
    DataPlaneProd,
    /// Development data plane
    DataPlaneDev,
}

impl Tier {
    /// Every known tier in declaration order
    pub const ALL: [Tier; 4] = [
        Tier::Genesis,
        Tier::ControlPlane,
        Tier::DataPlaneProd,
        Tier::DataPlaneDev,
    ];

    /// Canonical name used in manifests, configuration and the CLI
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Genesis => "genesis",
            Tier::ControlPlane => "control-plane",
            Tier::DataPlaneProd => "data-plane-prod",
            Tier::DataPlaneDev => "data-plane-dev",
        }
    }

    /// Declared prerequisites of this tier
    pub fn prerequisites(&self) -> &'static [Tier] {
        match self {
            Tier::Genesis => &[],
            Tier::ControlPlane => &[Tier::Genesis],
            Tier::DataPlaneProd | Tier::DataPlaneDev => &[Tier::ControlPlane],
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = TierGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "genesis" => Ok(Tier::Genesis),
            "control-plane" => Ok(Tier::ControlPlane),
            "data-plane-prod" | "prod" => Ok(Tier::DataPlaneProd),
            "data-plane-dev" | "dev" => Ok(Tier::DataPlaneDev),
            other => Err(TierGraphError::UnknownName(other.to_string())),
        }
    }
}

/// Target of a restore request, or the coverage of a backup set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// All tiers in dependency order
    Full,
    /// A single tier
    Tier(Tier),
}

impl Scope {
    /// Whether a backup set of this scope can serve a request for `requested`
    pub fn covers(&self, requested: Scope) -> bool {
        match (self, requested) {
            (Scope::Full, _) => true,
            (Scope::Tier(own), Scope::Tier(other)) => *own == other,
            (Scope::Tier(_), Scope::Full) => false,
        }
    }

    /// Whether this scope includes the given tier
    pub fn includes(&self, tier: Tier) -> bool {
        self.covers(Scope::Tier(tier))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Full => f.write_str("full"),
            Scope::Tier(tier) => tier.fmt(f),
        }
    }
}

impl FromStr for Scope {
    type Err = TierGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "full" {
            Ok(Scope::Full)
        } else {
            s.parse().map(Scope::Tier)
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = TierGraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl From<Tier> for Scope {
    fn from(tier: Tier) -> Self {
        Scope::Tier(tier)
    }
}

/// Directed acyclic graph of tiers with a cached topological order
#[derive(Debug, Clone)]
pub struct TierGraph {
    graph: DiGraph<Tier, ()>,
    index: HashMap<Tier, NodeIndex>,
    order: Vec<Tier>,
}

lazy_static! {
    /// The process-wide tier graph built from [`Tier::prerequisites`]
    pub static ref TIER_GRAPH: TierGraph =
        TierGraph::standard().expect("built-in tier graph is acyclic");
}

impl TierGraph {
    /// Build a graph from an adjacency list of `(tier, prerequisites)`
    pub fn new(adjacency: &[(Tier, &[Tier])]) -> Result<Self, TierGraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for (tier, _) in adjacency {
            index.entry(*tier).or_insert_with(|| graph.add_node(*tier));
        }

        for (tier, prerequisites) in adjacency {
            for prerequisite in prerequisites.iter() {
                let from = index.get(prerequisite).ok_or(TierGraphError::UnknownPrerequisite {
                    tier: *tier,
                    prerequisite: *prerequisite,
                })?;
                graph.add_edge(*from, index[tier], ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(TierGraphError::CycleDetected);
        }

        let order = Self::topological_order(&graph);
        Ok(Self { graph, index, order })
    }

    /// Build the graph of the known tiers
    pub fn standard() -> Result<Self, TierGraphError> {
        let adjacency: Vec<(Tier, &[Tier])> =
            Tier::ALL.iter().map(|t| (*t, t.prerequisites())).collect();
        Self::new(&adjacency)
    }

    /// Kahn's algorithm, ties broken by `Tier` ordering
    fn topological_order(graph: &DiGraph<Tier, ()>) -> Vec<Tier> {
        let mut in_degree: HashMap<NodeIndex, usize> = graph
            .node_indices()
            .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut ready: BTreeSet<(Tier, NodeIndex)> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| (graph[*idx], *idx))
            .collect();

        let mut order = Vec::with_capacity(graph.node_count());
        while let Some(next) = ready.pop_first() {
            let (tier, idx) = next;
            order.push(tier);

            for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((graph[dependent], dependent));
                    }
                }
            }
        }

        order
    }

    /// The cached topological order
    pub fn order(&self) -> &[Tier] {
        &self.order
    }

    /// Whether the tier is part of this graph
    pub fn contains(&self, tier: Tier) -> bool {
        self.index.contains_key(&tier)
    }

    /// Direct prerequisites of a tier
    pub fn prerequisites(&self, tier: Tier) -> BTreeSet<Tier> {
        self.neighbors(tier, Direction::Incoming)
    }

    /// Direct dependents of a tier
    pub fn dependents(&self, tier: Tier) -> BTreeSet<Tier> {
        self.neighbors(tier, Direction::Outgoing)
    }

    /// Every tier that depends on `tier`, directly or transitively
    pub fn transitive_dependents(&self, tier: Tier) -> BTreeSet<Tier> {
        let mut result = BTreeSet::new();
        if let Some(&start) = self.index.get(&tier) {
            let mut dfs = Dfs::new(&self.graph, start);
            while let Some(idx) = dfs.next(&self.graph) {
                if idx != start {
                    result.insert(self.graph[idx]);
                }
            }
        }
        result
    }

    /// Expand a scope into the ordered tiers a restore will touch
    ///
    /// A single-tier scope does not pull in its prerequisites.
    pub fn expand(&self, scope: Scope) -> Vec<Tier> {
        match scope {
            Scope::Full => self.order.clone(),
            Scope::Tier(tier) if self.contains(tier) => vec![tier],
            Scope::Tier(_) => Vec::new(),
        }
    }

    fn neighbors(&self, tier: Tier, direction: Direction) -> BTreeSet<Tier> {
        self.index
            .get(&tier)
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, direction)
                    .map(|n| self.graph[n])
                    .collect()
            })
            .unwrap_or_default()
    }
}
