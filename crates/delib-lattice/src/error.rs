//! Error types for the evidence lattice

use crate::node::NodeId;
use delib_ledger::LedgerError;

/// Errors from graph writes and context assembly
#[derive(Debug, thiserror::Error)]
pub enum LatticeError {
    /// A write lacked a usable evidence ref or tool run
    #[error("provenance violation on {target}: {reason}")]
    ProvenanceViolation { target: String, reason: String },

    /// Referenced node does not exist
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Node ids are immutable once written
    #[error("node already exists: {0}")]
    DuplicateNode(NodeId),

    /// Assembly was cancelled while tool calls were outstanding
    #[error("context assembly cancelled for {purpose}")]
    Cancelled { purpose: String },

    /// Ledger write failed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl LatticeError {
    pub fn provenance(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProvenanceViolation {
            target: target.into(),
            reason: reason.into(),
        }
    }
}
