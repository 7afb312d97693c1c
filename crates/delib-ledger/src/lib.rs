//! Delib Provenance Ledger
//!
//! The leaf of the workspace. Everything derived elsewhere must resolve to
//! either an [`EvidenceRef`] or a [`ToolRunId`] recorded here.
//!
//! # Core Concepts
//!
//! - [`ToolRun`]: immutable logging envelope for one external call
//! - [`ProvenanceLedger`]: `record` / `resolve` contract over an append-only log
//! - [`EvidenceRef`]: stable `{source_type}::{source_id}::{fragment_selector}` pointer
//! - [`Provenance`]: the "evidence ref or tool run" pair every graph write carries
//! - [`CaptureLevel`]: how much of each tool payload the ledger retains
//!
//! # Example
//!
//! ```rust,ignore
//! use delib_ledger::{InMemoryLedger, ProvenanceLedger, ToolInvocation, ToolStatus};
//!
//! let ledger = InMemoryLedger::default();
//! let id = ledger.record(
//!     ToolInvocation::new("retrieval.text", serde_json::json!({"query": "flood risk"}))
//!         .with_outputs(serde_json::json!({"hits": 3}))
//!         .with_status(ToolStatus::Success),
//! )?;
//! let run = ledger.resolve(id)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod evidence_ref;
mod hash;
mod ids;
mod ledger;
mod tool_run;

pub use error::{EvidenceRefError, HashError, LedgerError};
pub use evidence_ref::{EvidenceRef, Provenance};
pub use hash::ContentHash;
pub use ids::{RunId, Timestamp, ToolRunId};
pub use ledger::{InMemoryLedger, ProvenanceLedger};
pub use tool_run::{CaptureLevel, LoggedPayload, PromptRef, ToolInvocation, ToolRun, ToolStatus};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
