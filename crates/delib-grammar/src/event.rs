//! Move events: the immutable record of each executed move

use crate::moves::{BacktrackReason, MoveStatus, MoveType};
use crate::outputs::{MoveOutput, SCHEMA_VERSION};
use delib_ledger::{EvidenceRef, RunId, Timestamp, ToolRunId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique move event identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MoveEventId(pub Ulid);

impl MoveEventId {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MoveEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MoveEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MoveEventId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// What a move consumed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveInputs {
    #[serde(default)]
    pub pack_id: Option<String>,
    /// Committed events whose outputs fed this move
    #[serde(default)]
    pub prior_events: Vec<MoveEventId>,
}

/// One executed move
///
/// Immutable once appended to a store. Corrections and backtracks are new
/// events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveEvent {
    pub id: MoveEventId,
    pub run_id: RunId,
    pub move_type: MoveType,
    /// Strictly increasing per run, starting at 1
    pub sequence: u64,
    pub status: MoveStatus,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    /// Latest committed event of the furthest move when this backtrack began
    #[serde(default)]
    pub backtracked_from: Option<MoveEventId>,
    #[serde(default)]
    pub backtrack_reason: Option<BacktrackReason>,
    #[serde(default)]
    pub inputs: MoveInputs,
    #[serde(default)]
    pub outputs: Option<MoveOutput>,
    pub schema_version: u32,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    /// Open uncertainty in plain words (fallback, partial packs, caveats)
    #[serde(default)]
    pub uncertainty: Vec<String>,
    #[serde(default)]
    pub tool_run_ids: Vec<ToolRunId>,
    /// Soft governance findings attached at commit
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MoveEvent {
    /// A pending event; the orchestrator fills it in as the move runs
    pub fn pending(run_id: RunId, move_type: MoveType, sequence: u64) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: MoveEventId::new(),
            run_id,
            move_type,
            sequence,
            status: MoveStatus::Pending,
            started_at: now,
            ended_at: now,
            backtracked_from: None,
            backtrack_reason: None,
            inputs: MoveInputs::default(),
            outputs: None,
            schema_version: SCHEMA_VERSION,
            evidence_refs: Vec::new(),
            assumptions: Vec::new(),
            uncertainty: Vec::new(),
            tool_run_ids: Vec::new(),
            annotations: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn backtracking(mut self, from: MoveEventId, reason: BacktrackReason) -> Self {
        self.backtracked_from = Some(from);
        self.backtrack_reason = Some(reason);
        self
    }

    /// Attach outputs; cited refs and assumptions are derived from them
    #[must_use]
    pub fn with_outputs(mut self, status: MoveStatus, outputs: MoveOutput) -> Self {
        self.evidence_refs = outputs.cited_refs();
        self.assumptions = outputs.assumption_ids();
        self.outputs = Some(outputs);
        self.status = status;
        self
    }

    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = MoveStatus::Error;
        self.error = Some(error.into());
        self
    }

    /// Counts toward preconditions and rendering
    #[inline]
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.status.is_committable() && self.outputs.is_some()
    }

    #[inline]
    #[must_use]
    pub fn is_backtrack(&self) -> bool {
        self.backtrack_reason.is_some()
    }
}
