//! Lattice nodes

use delib_ledger::{EvidenceRef, Provenance};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stable node identifier; nodes are always looked up by id, never by pointer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Evidence atoms are keyed by their evidence ref
    #[must_use]
    pub fn evidence(evidence_ref: &EvidenceRef) -> Self {
        Self(evidence_ref.to_string())
    }

    /// Derived artifacts are keyed `{kind}:{local id}`
    #[must_use]
    pub fn derived(kind: NodeKind, local: impl fmt::Display) -> Self {
        Self(format!("{}:{local}", kind.as_str()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Document,
    Chunk,
    Clause,
    Table,
    SpatialFeature,
    VisualAsset,
    InstrumentOutput,
    Precedent,
    Anchor,
    Issue,
    Interpretation,
    Assumption,
    Consideration,
    WeighingRecord,
    NegotiationMove,
    Trajectory,
    MoveEvent,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Chunk => "chunk",
            NodeKind::Clause => "clause",
            NodeKind::Table => "table",
            NodeKind::SpatialFeature => "spatial_feature",
            NodeKind::VisualAsset => "visual_asset",
            NodeKind::InstrumentOutput => "instrument_output",
            NodeKind::Precedent => "precedent",
            NodeKind::Anchor => "anchor",
            NodeKind::Issue => "issue",
            NodeKind::Interpretation => "interpretation",
            NodeKind::Assumption => "assumption",
            NodeKind::Consideration => "consideration",
            NodeKind::WeighingRecord => "weighing",
            NodeKind::NegotiationMove => "negotiation",
            NodeKind::Trajectory => "trajectory",
            NodeKind::MoveEvent => "move",
        }
    }

    /// Sourced facts that must carry their own evidence ref
    #[must_use]
    pub fn is_evidence_atom(self) -> bool {
        matches!(
            self,
            NodeKind::Chunk
                | NodeKind::Clause
                | NodeKind::Table
                | NodeKind::SpatialFeature
                | NodeKind::VisualAsset
                | NodeKind::InstrumentOutput
                | NodeKind::Precedent
        )
    }
}

/// A lattice node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    #[serde(default)]
    pub properties: Value,
    pub provenance: Provenance,
}

impl Node {
    /// An evidence atom keyed by its own evidence ref
    pub fn atom(kind: NodeKind, evidence_ref: EvidenceRef, label: impl Into<String>) -> Self {
        Self {
            id: NodeId::evidence(&evidence_ref),
            kind,
            label: label.into(),
            properties: Value::Null,
            provenance: Provenance::evidence(evidence_ref),
        }
    }

    /// A derived node with explicit provenance
    pub fn derived(id: NodeId, kind: NodeKind, label: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            id,
            kind,
            label: label.into(),
            properties: Value::Null,
            provenance,
        }
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Issue ids this node is tagged with (`properties.issues`)
    #[must_use]
    pub fn issue_tags(&self) -> Vec<String> {
        self.properties
            .get("issues")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
