//! Delib Grammar
//!
//! The eight-move deliberation grammar: move and backtrack vocabularies,
//! versioned per-move output schemas, the truth-status model, transition
//! rules, and the append-only move event store.
//!
//! ```text
//! framing → issue_surfacing → evidence_curation → evidence_interpretation
//!   → considerations_formation → weighing_and_balance
//!   → negotiation_and_alteration → positioning_and_narration
//! ```
//!
//! Any later move may return to an earlier one with a [`BacktrackReason`];
//! the return is recorded as a new [`MoveEvent`], history is never edited.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod event;
pub mod moves;
pub mod outputs;
pub mod rules;
pub mod run;
pub mod store;
pub mod truth;

pub use error::{GrammarError, PreconditionError, PreconditionFailure, StoreError, TruthStatusError};
pub use event::{MoveEvent, MoveEventId, MoveInputs};
pub use moves::{BacktrackReason, MoveStatus, MoveType};
pub use outputs::{
    ConsiderationLedgerEntry, ConsiderationsOutput, CurationOutput, Framing, FramingOutput,
    InterpretationDraft, InterpretationOutput, Issue, IssuesOutput, Leaning, MoveOutput, NegotiationMove,
    NegotiationOutput, PositioningOutput, Scenario, ScenarioFramingPair, Trajectory, WeighingOutput,
    WeighingRecord, SCHEMA_VERSION,
};
pub use rules::{allowed_transitions, check_transition, Transition};
pub use run::{GovernanceOverride, Run, RunContext, RunStatus, RunStatusMark};
pub use store::{EventStore, InMemoryEventStore, StoredRecord};
pub use truth::{Assumption, ClaimDraft, EvidenceStatement, Interpretation, Statement, TruthStatus};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
