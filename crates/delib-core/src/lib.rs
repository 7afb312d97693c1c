//! Delib Core
//!
//! The grammar orchestrator. Wires the ledger, lattice, grammar, governance
//! and replay crates together behind [`Orchestrator`] and talks to external
//! providers only through [`ToolRunner`], so every call lands in the ledger.
//!
//! # Example
//!
//! ```rust,ignore
//! use delib_core::{EngineConfig, MoveRequest, Orchestrator};
//! use delib_grammar::{MoveType, Run};
//!
//! let orchestrator = Orchestrator::builder(EngineConfig::default())
//!     .with_language(language)
//!     .with_source(text_source)
//!     .build()?;
//! let run_id = orchestrator.start_run(Run::new("40 homes at Mill Lane"))?;
//! for move_type in MoveType::ALL {
//!     orchestrator.execute(run_id, MoveRequest::new(move_type)).await?;
//! }
//! let report = orchestrator.complete(run_id).await?;
//! assert!(report.is_complete());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
mod lineage;
pub mod orchestrator;
pub mod prompts;
pub mod provider;
pub mod tools;

pub use config::{CaptureConfig, EngineConfig, LogFormat, LoggingConfig, MoveConfig, TraversalConfig};
pub use error::{ConfigError, CoreError};
pub use orchestrator::{CompletionReport, MoveRequest, Orchestrator, OrchestratorBuilder, RasterAnalysis};
pub use provider::{
    ChatMessage, ChatRole, DocParseProvider, DocumentSource, GenerationOptions, LanguageProvider, Mask,
    ProviderError, RasterRef, RetrievalProvider, SegmentationProvider, StructuredRequest, StructuredResponse,
    VectorFeature, VectorizationProvider,
};
pub use tools::{ToolOutcome, ToolRunner};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
