//! Delib Replay
//!
//! Rebuilds the decision artifact and trace graph of a run from stored move
//! events and tool runs alone. Replay is re-projection, never re-invocation:
//! nothing here holds a provider.
//!
//! # Example
//!
//! ```no_run
//! use delib_replay::ReplayEngine;
//! # fn demo(engine: ReplayEngine, run_id: delib_ledger::RunId) -> Result<(), delib_replay::ReplayError> {
//! let first = engine.replay(run_id)?;
//! assert!(engine.verify(run_id, &first.hash)?);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod artifact;
pub mod diff;
pub mod engine;
pub mod error;
pub mod invariants;
pub mod trace;

pub use artifact::{render, CommittedOutput, DecisionArtifact, HistoryEntry, Rendered, ToolRunSummary};
pub use diff::{diff_runs, RunDiff, TrajectoryChange};
pub use engine::ReplayEngine;
pub use error::ReplayError;
pub use invariants::{check_invariants, InvariantReport, Violation};
pub use trace::{ArtifactKind, TraceEdge, TraceEdgeKind, TraceGraph, TraceNode, TraceNodeKind};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
