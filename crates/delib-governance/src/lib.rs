//! Delib Governance
//!
//! Reasonableness linting for deliberation runs. Hard checks block a move
//! from committing and a run from completing until the finding is corrected
//! or explicitly overridden; soft checks annotate the committed event.
//!
//! | Code | Severity |
//! |------|----------|
//! | `UNCITED_NORMATIVE_CLAIM` | hard |
//! | `OUTSIDE_PACK_RELIANCE` | hard |
//! | `INTERNAL_ID_LEAK` | hard |
//! | `POLICY_CLAIM_WITHOUT_CLAUSE` | hard |
//! | `NEGOTIATION_NOT_REWEIGHED` | hard |
//! | `LOW_CONFIDENCE_WITHOUT_CAVEAT` | soft |
//! | `MATERIAL_ISSUE_UNSUPPORTED` | soft |
//! | `SINGLE_SOURCE_CONSIDERATION` | soft |
//! | `FALLBACK_NOT_DISCLOSED` | soft |

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod finding;
pub mod linter;

pub use error::GovernanceError;
pub use finding::{CheckCode, Finding, GateDecision, GovernanceReport, Severity};
pub use linter::{GovernanceConfig, Linter};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
