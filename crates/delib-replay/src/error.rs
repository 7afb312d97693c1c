//! Error types for replay

use delib_grammar::{MoveEventId, StoreError};
use delib_ledger::{LedgerError, ToolRunId};

/// Replay failures
///
/// Replay reads stored records only; every failure here means the stored
/// history is incomplete or unreadable, never that a provider misbehaved.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// An event names a tool run the ledger has never seen
    #[error("event {event} references unknown tool run {tool_run}")]
    UnresolvedToolRun { event: MoveEventId, tool_run: ToolRunId },

    #[error("render failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
