//! Typed edges

use crate::node::NodeId;
use delib_ledger::Provenance;
use serde::{Deserialize, Serialize};

/// Relation carried by an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Cites,
    Mentions,
    Intersects,
    Supports,
    Contradicts,
    AssumedIn,
    ProducedBy,
    PartOfMove,
    PartOf,
    Supersedes,
    Addresses,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 11] = [
        EdgeKind::Cites,
        EdgeKind::Mentions,
        EdgeKind::Intersects,
        EdgeKind::Supports,
        EdgeKind::Contradicts,
        EdgeKind::AssumedIn,
        EdgeKind::ProducedBy,
        EdgeKind::PartOfMove,
        EdgeKind::PartOf,
        EdgeKind::Supersedes,
        EdgeKind::Addresses,
    ];
}

/// Traversal direction relative to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A typed, provenance-carrying edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: EdgeKind,
    pub provenance: Provenance,
}

impl Edge {
    pub fn new(src: NodeId, dst: NodeId, kind: EdgeKind, provenance: Provenance) -> Self {
        Self {
            src,
            dst,
            kind,
            provenance,
        }
    }
}
