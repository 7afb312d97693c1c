//! Error types for the grammar layer

use crate::event::MoveEventId;
use crate::moves::{BacktrackReason, MoveType};
use crate::truth::TruthStatus;
use delib_ledger::RunId;

/// Top-level grammar error
#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    TruthStatus(#[from] TruthStatusError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A move was requested in a state that does not allow it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot execute {move_type} in run {run_id}: {failure}")]
pub struct PreconditionError {
    pub run_id: RunId,
    pub move_type: MoveType,
    pub failure: PreconditionFailure,
}

/// Why a precondition failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionFailure {
    #[error("no committed {0} output")]
    MissingOutput(MoveType),

    #[error("issue surfacing produced no issues")]
    NoIssues,

    #[error("the curated pack is empty")]
    EmptyPack,

    #[error("no considerations were formed")]
    NoConsiderations,

    #[error("moves cannot be skipped (furthest committed: {})", .furthest.map_or("none", MoveType::as_str))]
    SkipsAhead { furthest: Option<MoveType> },

    #[error("returning from {furthest} needs a backtrack reason")]
    BacktrackWithoutReason { furthest: MoveType },

    #[error("{0} given for a move that is not a backtrack")]
    ReasonOnForwardMove(BacktrackReason),

    #[error("run is closed")]
    RunClosed,
}

/// A statement could not be given exactly one truth status
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TruthStatusError {
    #[error("statement {id} draws an inference without citing evidence or an assumption")]
    Uncited { id: String },

    #[error("statement {id} fits no truth status: {reason}")]
    Unclassifiable { id: String, reason: String },

    #[error("statement {id} fits more than one truth status: {shapes:?}")]
    Ambiguous { id: String, shapes: Vec<TruthStatus> },
}

impl TruthStatusError {
    /// Id of the rejected statement
    #[must_use]
    pub fn statement_id(&self) -> &str {
        match self {
            Self::Uncited { id } | Self::Unclassifiable { id, .. } | Self::Ambiguous { id, .. } => id,
        }
    }
}

/// Event store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    UnknownRun(RunId),

    #[error("run already exists: {0}")]
    DuplicateRun(RunId),

    #[error("event {event} in run {run_id} has sequence {got}, expected {expected}")]
    SequenceViolation {
        run_id: RunId,
        event: MoveEventId,
        expected: u64,
        got: u64,
    },

    #[error("event {0} already stored")]
    DuplicateEvent(MoveEventId),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
