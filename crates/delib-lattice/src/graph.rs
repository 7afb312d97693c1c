//! Arena-backed evidence graph
//!
//! Writes are checked against the provenance ledger before they land; a node
//! or edge that cites neither an evidence ref nor a recorded tool run is
//! rejected outright.

use crate::edge::{Direction, Edge, EdgeKind};
use crate::error::LatticeError;
use crate::node::{Node, NodeId, NodeKind};
use delib_ledger::{Provenance, ProvenanceLedger};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<Node>,
    by_id: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    outgoing: HashMap<(usize, EdgeKind), Vec<usize>>,
    incoming: HashMap<(usize, EdgeKind), Vec<usize>>,
}

impl Arena {
    fn insert_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        let position = self.nodes.len();
        self.by_id.insert(id.clone(), position);
        self.nodes.push(node);
        id
    }

    fn insert_edge(&mut self, edge: Edge) -> Result<(), LatticeError> {
        let src = *self
            .by_id
            .get(&edge.src)
            .ok_or_else(|| LatticeError::UnknownNode(edge.src.clone()))?;
        let dst = *self
            .by_id
            .get(&edge.dst)
            .ok_or_else(|| LatticeError::UnknownNode(edge.dst.clone()))?;
        if self.edge_between(src, dst, edge.kind).is_some() {
            return Ok(());
        }

        let kind = edge.kind;
        let position = self.edges.len();
        self.edges.push(edge);
        self.outgoing.entry((src, kind)).or_default().push(position);
        self.incoming.entry((dst, kind)).or_default().push(position);
        Ok(())
    }

    fn edge_between(&self, src: usize, dst: usize, kind: EdgeKind) -> Option<usize> {
        self.outgoing.get(&(src, kind)).and_then(|edges| {
            edges
                .iter()
                .copied()
                .find(|&e| self.by_id.get(&self.edges[e].dst) == Some(&dst))
        })
    }
}

/// Serializable copy of the whole graph (the property-graph store layout)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Nodes and edges that land together or not at all
///
/// Edges may point at nodes staged in the same batch.
#[derive(Debug, Clone, Default)]
pub struct LatticeBatch {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl LatticeBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

fn edge_target(edge: &Edge) -> String {
    format!("{} -[{:?}]-> {}", edge.src, edge.kind, edge.dst)
}

/// The persistent typed evidence graph
#[derive(Debug)]
pub struct EvidenceLattice {
    ledger: Arc<dyn ProvenanceLedger>,
    inner: RwLock<Arena>,
}

impl EvidenceLattice {
    pub fn new(ledger: Arc<dyn ProvenanceLedger>) -> Self {
        Self {
            ledger,
            inner: RwLock::new(Arena::default()),
        }
    }

    /// Rebuild from a snapshot, re-validating every write
    pub fn from_snapshot(
        ledger: Arc<dyn ProvenanceLedger>,
        snapshot: LatticeSnapshot,
    ) -> Result<Self, LatticeError> {
        let lattice = Self::new(ledger);
        for node in snapshot.nodes {
            lattice.add_node(node)?;
        }
        for edge in snapshot.edges {
            lattice.add_edge(edge)?;
        }
        Ok(lattice)
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn ProvenanceLedger> {
        &self.ledger
    }

    /// Insert a new node
    ///
    /// # Errors
    /// `DuplicateNode` if the id exists; `ProvenanceViolation` if the node
    /// has no resolvable provenance or is an evidence atom without its own ref
    pub fn add_node(&self, node: Node) -> Result<NodeId, LatticeError> {
        self.check_node(&node)?;
        let mut arena = self.inner.write();
        if arena.by_id.contains_key(&node.id) {
            return Err(LatticeError::DuplicateNode(node.id));
        }
        Ok(arena.insert_node(node))
    }

    /// Insert the node unless a node with the same id already exists
    ///
    /// Existing nodes are never modified.
    pub fn ensure_node(&self, node: Node) -> Result<NodeId, LatticeError> {
        if self.contains(&node.id) {
            return Ok(node.id);
        }
        match self.add_node(node) {
            Err(LatticeError::DuplicateNode(id)) => Ok(id),
            other => other,
        }
    }

    /// Insert an edge; identical `(src, dst, kind)` triples are stored once
    pub fn add_edge(&self, edge: Edge) -> Result<(), LatticeError> {
        self.check_provenance(&edge.provenance, &edge_target(&edge))?;
        self.inner.write().insert_edge(edge)
    }

    /// Write a batch atomically; returns the number of nodes added
    ///
    /// Every node and edge is checked before anything lands, so on error
    /// the lattice is unchanged.
    ///
    /// # Errors
    /// `DuplicateNode` if a staged id exists already or twice in the batch;
    /// `UnknownNode` for an edge endpoint found in neither; provenance
    /// errors as for single writes
    pub fn apply(&self, batch: LatticeBatch) -> Result<usize, LatticeError> {
        for node in &batch.nodes {
            self.check_node(node)?;
        }
        for edge in &batch.edges {
            self.check_provenance(&edge.provenance, &edge_target(edge))?;
        }

        let mut arena = self.inner.write();
        {
            let mut staged: HashSet<&NodeId> = HashSet::with_capacity(batch.nodes.len());
            for node in &batch.nodes {
                if arena.by_id.contains_key(&node.id) || !staged.insert(&node.id) {
                    return Err(LatticeError::DuplicateNode(node.id.clone()));
                }
            }
            for edge in &batch.edges {
                for end in [&edge.src, &edge.dst] {
                    if !arena.by_id.contains_key(end) && !staged.contains(end) {
                        return Err(LatticeError::UnknownNode(end.clone()));
                    }
                }
            }
        }

        let added = batch.nodes.len();
        for node in batch.nodes {
            arena.insert_node(node);
        }
        for edge in batch.edges {
            arena.insert_edge(edge)?;
        }
        Ok(added)
    }

    fn check_node(&self, node: &Node) -> Result<(), LatticeError> {
        self.check_provenance(&node.provenance, node.id.as_str())?;
        if node.kind.is_evidence_atom() && node.provenance.evidence_ref.is_none() {
            return Err(LatticeError::provenance(
                node.id.as_str(),
                format!("{} atoms must carry an evidence ref", node.kind.as_str()),
            ));
        }
        Ok(())
    }

    fn check_provenance(&self, provenance: &Provenance, target: &str) -> Result<(), LatticeError> {
        if provenance.is_empty() {
            return Err(LatticeError::provenance(
                target,
                "no evidence ref or tool run reference",
            ));
        }
        if let Some(tool_run_id) = provenance.tool_run_id {
            if !self.ledger.contains(tool_run_id) {
                return Err(LatticeError::provenance(
                    target,
                    format!("tool run {tool_run_id} is not in the ledger"),
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.inner.read().by_id.contains_key(id)
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<Node> {
        let arena = self.inner.read();
        arena.by_id.get(id).map(|&i| arena.nodes[i].clone())
    }

    /// Neighbours over one edge kind, in edge insertion order
    #[must_use]
    pub fn neighbors(&self, id: &NodeId, kind: EdgeKind, direction: Direction) -> Vec<NodeId> {
        self.neighbors_multi(id, &[kind], direction)
    }

    /// Neighbours over several edge kinds, de-duplicated, in `kinds` order
    #[must_use]
    pub fn neighbors_multi(&self, id: &NodeId, kinds: &[EdgeKind], direction: Direction) -> Vec<NodeId> {
        let arena = self.inner.read();
        let Some(&position) = arena.by_id.get(id) else {
            return Vec::new();
        };

        let mut out: Vec<NodeId> = Vec::new();
        for &kind in kinds {
            if matches!(direction, Direction::Outgoing | Direction::Both) {
                if let Some(edges) = arena.outgoing.get(&(position, kind)) {
                    for &e in edges {
                        let dst = &arena.edges[e].dst;
                        if !out.contains(dst) {
                            out.push(dst.clone());
                        }
                    }
                }
            }
            if matches!(direction, Direction::Incoming | Direction::Both) {
                if let Some(edges) = arena.incoming.get(&(position, kind)) {
                    for &e in edges {
                        let src = &arena.edges[e].src;
                        if !out.contains(src) {
                            out.push(src.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// Edges leaving a node, any kind
    #[must_use]
    pub fn edges_from(&self, id: &NodeId) -> Vec<Edge> {
        let arena = self.inner.read();
        arena
            .edges
            .iter()
            .filter(|e| &e.src == id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<Node> {
        self.inner
            .read()
            .nodes
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.read().edges.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> LatticeSnapshot {
        let arena = self.inner.read();
        LatticeSnapshot {
            nodes: arena.nodes.clone(),
            edges: arena.edges.clone(),
        }
    }
}
