//! Run-scoped working view over the lattice

use crate::graph::EvidenceLattice;
use crate::node::NodeId;
use crate::traversal::{traverse, Traversal, TraversalSpec};
use delib_ledger::RunId;
use indexmap::{IndexMap, IndexSet};

/// The slice of the lattice a run has pulled in so far
///
/// Only ever grows. Holds ids, not nodes; reads go through the lattice.
#[derive(Debug, Clone)]
pub struct RunGraph {
    run_id: RunId,
    anchors: Vec<NodeId>,
    members: IndexSet<NodeId>,
}

impl RunGraph {
    pub fn new(run_id: RunId, anchors: Vec<NodeId>) -> Self {
        let members = anchors.iter().cloned().collect();
        Self {
            run_id,
            anchors,
            members,
        }
    }

    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    #[must_use]
    pub fn anchors(&self) -> &[NodeId] {
        &self.anchors
    }

    /// Add a node to the view; returns true if it was new
    pub fn include(&mut self, id: NodeId) -> bool {
        self.members.insert(id)
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.contains(id)
    }

    pub fn members(&self) -> impl Iterator<Item = &NodeId> {
        self.members.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Expand from the anchor nodes; everything visited joins the view
    pub fn expand<F>(&mut self, lattice: &EvidenceLattice, spec: &TraversalSpec, covered: F) -> Traversal
    where
        F: FnMut(&IndexMap<NodeId, usize>) -> bool,
    {
        let traversal = traverse(lattice, &self.anchors, spec, covered);
        for id in traversal.visited.keys() {
            self.members.insert(id.clone());
        }
        tracing::debug!(
            run = %self.run_id,
            visited = traversal.visited.len(),
            halt = ?traversal.halt,
            "run graph expanded"
        );
        traversal
    }
}
