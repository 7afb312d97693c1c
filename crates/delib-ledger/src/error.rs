//! Error types for the provenance ledger

use crate::ids::ToolRunId;

/// Errors raised by ledger reads and writes
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// No tool run with this id was ever recorded
    #[error("tool run not found: {0}")]
    NotFound(ToolRunId),

    /// Hash chain broken at the given entry
    #[error("ledger integrity violation at entry {index}")]
    IntegrityViolation { index: usize },

    /// Record rejected before it was appended
    #[error("invalid tool run: {0}")]
    InvalidRecord(String),

    /// Duplicate id on import
    #[error("duplicate tool run id: {0}")]
    DuplicateId(ToolRunId),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO failure during export/import
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors parsing or building an evidence reference
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvidenceRefError {
    /// One of the three components is blank
    #[error("evidence ref component '{0}' is empty")]
    EmptyComponent(&'static str),

    /// Separator structure is wrong
    #[error("malformed evidence ref '{0}': expected source_type::source_id::fragment")]
    Malformed(String),
}

/// Errors parsing a content hash
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
