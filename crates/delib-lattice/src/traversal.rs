//! Bounded typed-edge traversal
//!
//! Breadth-first from a seed set over a fixed list of edge kinds. Every
//! traversal ends with a [`HaltReason`]; hitting either ceiling is reported,
//! never silently continued past.

use crate::edge::{Direction, EdgeKind};
use crate::graph::EvidenceLattice;
use crate::node::NodeId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Hop and node ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalBudget {
    pub max_hops: usize,
    pub max_nodes: usize,
}

impl Default for TraversalBudget {
    fn default() -> Self {
        Self {
            max_hops: 2,
            max_nodes: 64,
        }
    }
}

/// What to walk and how far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalSpec {
    pub budget: TraversalBudget,
    pub edge_kinds: Vec<EdgeKind>,
    pub direction: Direction,
}

impl Default for TraversalSpec {
    fn default() -> Self {
        Self {
            budget: TraversalBudget::default(),
            edge_kinds: vec![
                EdgeKind::Mentions,
                EdgeKind::Intersects,
                EdgeKind::Supports,
                EdgeKind::Contradicts,
                EdgeKind::Cites,
                EdgeKind::PartOf,
            ],
            direction: Direction::Both,
        }
    }
}

/// Why a traversal stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Nothing left to visit
    FrontierExhausted,
    /// Unvisited neighbours remained past `max_hops`
    HopBudget,
    /// `max_nodes` reached with work remaining
    NodeBudget,
    /// The caller's coverage predicate was satisfied
    CoverageAchieved,
}

/// Visited nodes in visit order, with the hop each was reached at
#[derive(Debug, Clone, PartialEq)]
pub struct Traversal {
    pub visited: IndexMap<NodeId, usize>,
    pub halt: HaltReason,
    pub hops_reached: usize,
}

impl Traversal {
    /// Stopped on a ceiling rather than running out of graph
    #[must_use]
    pub fn budget_exhausted(&self) -> bool {
        matches!(self.halt, HaltReason::HopBudget | HaltReason::NodeBudget)
    }
}

/// Walk the lattice from `seeds`
///
/// Seeds missing from the lattice are skipped. `covered` is evaluated after
/// the seeds and after each completed hop.
pub fn traverse<F>(
    lattice: &EvidenceLattice,
    seeds: &[NodeId],
    spec: &TraversalSpec,
    mut covered: F,
) -> Traversal
where
    F: FnMut(&IndexMap<NodeId, usize>) -> bool,
{
    let budget = spec.budget;
    let mut visited: IndexMap<NodeId, usize> = IndexMap::new();
    let finish = |visited: IndexMap<NodeId, usize>, halt: HaltReason, hops_reached: usize| Traversal {
        visited,
        halt,
        hops_reached,
    };

    for seed in seeds {
        if !lattice.contains(seed) || visited.contains_key(seed) {
            continue;
        }
        if visited.len() == budget.max_nodes {
            return finish(visited, HaltReason::NodeBudget, 0);
        }
        visited.insert(seed.clone(), 0);
    }
    if !visited.is_empty() && covered(&visited) {
        return finish(visited, HaltReason::CoverageAchieved, 0);
    }

    let mut frontier: Vec<NodeId> = visited.keys().cloned().collect();
    let mut hop = 0;
    loop {
        let mut next: Vec<NodeId> = Vec::new();
        for node in &frontier {
            for neighbour in lattice.neighbors_multi(node, &spec.edge_kinds, spec.direction) {
                if !visited.contains_key(&neighbour) && !next.contains(&neighbour) {
                    next.push(neighbour);
                }
            }
        }
        if next.is_empty() {
            return finish(visited, HaltReason::FrontierExhausted, hop);
        }
        if hop == budget.max_hops {
            return finish(visited, HaltReason::HopBudget, hop);
        }

        hop += 1;
        frontier.clear();
        for neighbour in next {
            if visited.len() == budget.max_nodes {
                return finish(visited, HaltReason::NodeBudget, hop);
            }
            visited.insert(neighbour.clone(), hop);
            frontier.push(neighbour);
        }
        if covered(&visited) {
            return finish(visited, HaltReason::CoverageAchieved, hop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::node::{Node, NodeKind};
    use delib_ledger::{EvidenceRef, InMemoryLedger};
    use std::sync::Arc;

    /// A chain p0 - p1 - ... - p{n-1} over MENTIONS edges
    fn chain(n: usize) -> (EvidenceLattice, Vec<NodeId>) {
        let lattice = EvidenceLattice::new(Arc::new(InMemoryLedger::default()));
        let mut ids = Vec::new();
        for i in 0..n {
            let r = EvidenceRef::new("doc", "plan", format!("p{i}")).unwrap();
            ids.push(lattice.add_node(Node::atom(NodeKind::Chunk, r, format!("p{i}"))).unwrap());
        }
        for pair in ids.windows(2) {
            let prov = lattice.node(&pair[0]).unwrap().provenance;
            lattice
                .add_edge(Edge::new(pair[0].clone(), pair[1].clone(), EdgeKind::Mentions, prov))
                .unwrap();
        }
        (lattice, ids)
    }

    #[test]
    fn walks_whole_small_graph() {
        let (lattice, ids) = chain(3);
        let t = traverse(&lattice, &ids[..1], &TraversalSpec::default(), |_| false);
        assert_eq!(t.halt, HaltReason::FrontierExhausted);
        assert_eq!(t.visited.len(), 3);
        assert_eq!(t.visited[&ids[2]], 2);
        assert!(!t.budget_exhausted());
    }

    #[test]
    fn stops_at_hop_ceiling() {
        let (lattice, ids) = chain(6);
        let spec = TraversalSpec {
            budget: TraversalBudget { max_hops: 2, max_nodes: 100 },
            ..TraversalSpec::default()
        };
        let t = traverse(&lattice, &ids[..1], &spec, |_| false);
        assert_eq!(t.halt, HaltReason::HopBudget);
        assert_eq!(t.visited.len(), 3);
        assert!(t.budget_exhausted());
    }

    #[test]
    fn stops_at_node_ceiling() {
        let (lattice, ids) = chain(10);
        let spec = TraversalSpec {
            budget: TraversalBudget { max_hops: 50, max_nodes: 4 },
            ..TraversalSpec::default()
        };
        let t = traverse(&lattice, &ids[..1], &spec, |_| false);
        assert_eq!(t.halt, HaltReason::NodeBudget);
        assert_eq!(t.visited.len(), 4);
    }

    #[test]
    fn zero_hops_keeps_only_seeds() {
        let (lattice, ids) = chain(3);
        let spec = TraversalSpec {
            budget: TraversalBudget { max_hops: 0, max_nodes: 10 },
            ..TraversalSpec::default()
        };
        let t = traverse(&lattice, &ids[..1], &spec, |_| false);
        assert_eq!(t.visited.len(), 1);
        assert_eq!(t.halt, HaltReason::HopBudget);
    }

    #[test]
    fn coverage_halts_early() {
        let (lattice, ids) = chain(8);
        let target = ids[1].clone();
        let t = traverse(&lattice, &ids[..1], &TraversalSpec::default(), |v| v.contains_key(&target));
        assert_eq!(t.halt, HaltReason::CoverageAchieved);
        assert_eq!(t.visited.len(), 2);
    }

    #[test]
    fn unknown_seeds_are_skipped() {
        let (lattice, _) = chain(2);
        let t = traverse(&lattice, &[NodeId::new("missing")], &TraversalSpec::default(), |_| false);
        assert!(t.visited.is_empty());
        assert_eq!(t.halt, HaltReason::FrontierExhausted);
    }
}
