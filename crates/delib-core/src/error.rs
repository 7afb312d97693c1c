//! Error types for the orchestrator
//!
//! Tool failures degrade packs and never reach this type unless a move
//! cannot proceed without the tool. Precondition and provenance violations
//! always surface to the caller.

use delib_governance::{Finding, GovernanceError};
use delib_grammar::{MoveType, PreconditionError, StoreError, TruthStatusError};
use delib_lattice::LatticeError;
use delib_ledger::{EvidenceRefError, LedgerError, RunId, ToolRunId};
use delib_replay::ReplayError;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A move ran without its required prior output
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// A write lacked a required evidence or tool-run reference
    #[error("provenance violation on {target}: {reason}")]
    ProvenanceViolation { target: String, reason: String },

    /// A tool the move depends on failed
    #[error("tool {tool} failed: {reason}")]
    ToolFailure {
        tool: String,
        tool_run_id: Option<ToolRunId>,
        reason: String,
    },

    /// A candidate output introduced unresolved hard findings
    #[error("governance blocked {move_type} in run {run_id}: {}", summarize(.findings))]
    GovernanceHardFailure {
        run_id: RunId,
        move_type: MoveType,
        findings: Vec<Finding>,
    },

    /// A draft statement failed truth-status classification
    #[error(transparent)]
    TruthStatus(#[from] TruthStatusError),

    /// Model output did not match the move's output schema
    #[error("{move_type} output does not match its schema: {reason}")]
    MalformedOutput { move_type: MoveType, reason: String },

    #[error("move {move_type} cancelled in run {run_id}")]
    Cancelled { run_id: RunId, move_type: MoveType },

    /// The run was marked complete; start a superseding run instead
    #[error("run {run_id} is complete")]
    RunClosed { run_id: RunId },

    #[error(transparent)]
    EvidenceRef(#[from] EvidenceRefError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("lattice error: {0}")]
    Lattice(LatticeError),
}

fn summarize(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| format!("{} on {}", f.code, f.target))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<LatticeError> for CoreError {
    fn from(err: LatticeError) -> Self {
        match err {
            LatticeError::ProvenanceViolation { target, reason } => Self::ProvenanceViolation { target, reason },
            other => Self::Lattice(other),
        }
    }
}

impl CoreError {
    pub fn tool_failure(tool: impl Into<String>, tool_run_id: Option<ToolRunId>, reason: impl Into<String>) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            tool_run_id,
            reason: reason.into(),
        }
    }

    /// Whether the caller can fix this by running further moves, without
    /// changing code, data or providers
    #[inline]
    #[must_use]
    pub fn is_recoverable_locally(&self) -> bool {
        matches!(
            self,
            Self::GovernanceHardFailure { .. }
                | Self::TruthStatus(_)
                | Self::MalformedOutput { .. }
                | Self::ToolFailure { .. }
                | Self::Cancelled { .. }
        )
    }

    /// Artifact ids the error is about
    #[must_use]
    pub fn artifact_ids(&self) -> Vec<String> {
        match self {
            Self::Precondition(e) => vec![e.run_id.to_string()],
            Self::ProvenanceViolation { target, .. } => vec![target.clone()],
            Self::ToolFailure { tool, tool_run_id, .. } => match tool_run_id {
                Some(id) => vec![id.to_string()],
                None => vec![tool.clone()],
            },
            Self::GovernanceHardFailure { findings, .. } => findings.iter().map(|f| f.target.clone()).collect(),
            Self::TruthStatus(e) => vec![e.statement_id().to_string()],
            Self::MalformedOutput { move_type, .. } => vec![move_type.as_str().to_string()],
            Self::Cancelled { run_id, .. } | Self::RunClosed { run_id } => vec![run_id.to_string()],
            Self::Store(StoreError::UnknownRun(id)) => vec![id.to_string()],
            Self::Ledger(LedgerError::NotFound(id)) => vec![id.to_string()],
            Self::Replay(ReplayError::UnresolvedToolRun { event, tool_run }) => {
                vec![event.to_string(), tool_run.to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// Configuration failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use delib_governance::CheckCode;

    #[test]
    fn lattice_provenance_errors_keep_their_target() {
        let err: CoreError = LatticeError::provenance("interpretation:i1", "no evidence ref or tool run reference").into();
        assert_eq!(err.artifact_ids(), vec!["interpretation:i1".to_string()]);
        assert!(!err.is_recoverable_locally());
    }

    #[test]
    fn governance_failures_name_targets() {
        let err = CoreError::GovernanceHardFailure {
            run_id: RunId::new(),
            move_type: MoveType::PositioningAndNarration,
            findings: vec![Finding::new(
                MoveType::PositioningAndNarration,
                CheckCode::NegotiationNotReweighed,
                "n1",
                "not re-weighed",
            )],
        };
        assert_eq!(err.artifact_ids(), vec!["n1".to_string()]);
        assert!(err.is_recoverable_locally());
        assert!(err.to_string().contains("NEGOTIATION_NOT_REWEIGHED on n1"));
    }
}
