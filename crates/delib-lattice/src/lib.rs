//! Delib Evidence Lattice
//!
//! A typed property graph of evidence atoms and derived artifacts, plus the
//! five-step procedure that turns it into a bounded, per-move [`ContextPack`].
//!
//! # Architecture
//!
//! ```text
//! RetrievalFrame ─► candidate generation (concurrent, one ToolRun per call)
//!                          │
//!   RunGraph ─► bounded typed-edge traversal ──┤
//!                                              ▼
//!                           deterministic selection (omissions recorded)
//!                                              ▼
//!                               move-specific shaping ─► ContextPack
//! ```
//!
//! The graph is an arena of nodes with typed-edge indexes keyed by
//! `(src, kind)` and `(dst, kind)`. Nodes and edges are append-only and every
//! write must cite an evidence ref or a tool run resolvable in the ledger.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod assembly;
pub mod edge;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod node;
pub mod pack;
pub mod retrieval;
pub mod run_graph;
pub mod selection;
pub mod traversal;

pub use assembly::{ContextAssembler, IssueTarget, RetrievalFrame};
pub use edge::{Direction, Edge, EdgeKind};
pub use error::LatticeError;
pub use graph::{EvidenceLattice, LatticeBatch, LatticeSnapshot};
pub use ingest::{ingest_document, IngestReport, ParsedChunk, ParsedDocument, ParsedPage, ParsedTable};
pub use node::{Node, NodeId, NodeKind};
pub use pack::{
    AssemblyStage, AssemblyStep, ContextPack, Omission, OmissionReason, PackAtom, PackBudget,
    PackBudgets, PackProfile,
};
pub use retrieval::{
    Candidate, CandidateSource, Modality, ProviderError, RetrievalProvider, SearchHit,
    SearchRequest, SearchStrategy,
};
pub use run_graph::RunGraph;
pub use selection::{select, Selection};
pub use traversal::{traverse, HaltReason, Traversal, TraversalBudget, TraversalSpec};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
