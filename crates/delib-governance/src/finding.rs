//! Findings and reports

use delib_grammar::MoveType;
use delib_ledger::RunId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hard findings block commit and completion; soft findings annotate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hard,
    Soft,
}

/// Linter check codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckCode {
    UncitedNormativeClaim,
    OutsidePackReliance,
    InternalIdLeak,
    PolicyClaimWithoutClause,
    NegotiationNotReweighed,
    LowConfidenceWithoutCaveat,
    MaterialIssueUnsupported,
    SingleSourceConsideration,
    FallbackNotDisclosed,
}

impl CheckCode {
    pub const ALL: [CheckCode; 9] = [
        CheckCode::UncitedNormativeClaim,
        CheckCode::OutsidePackReliance,
        CheckCode::InternalIdLeak,
        CheckCode::PolicyClaimWithoutClause,
        CheckCode::NegotiationNotReweighed,
        CheckCode::LowConfidenceWithoutCaveat,
        CheckCode::MaterialIssueUnsupported,
        CheckCode::SingleSourceConsideration,
        CheckCode::FallbackNotDisclosed,
    ];

    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            CheckCode::UncitedNormativeClaim
            | CheckCode::OutsidePackReliance
            | CheckCode::InternalIdLeak
            | CheckCode::PolicyClaimWithoutClause
            | CheckCode::NegotiationNotReweighed => Severity::Hard,
            CheckCode::LowConfidenceWithoutCaveat
            | CheckCode::MaterialIssueUnsupported
            | CheckCode::SingleSourceConsideration
            | CheckCode::FallbackNotDisclosed => Severity::Soft,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CheckCode::UncitedNormativeClaim => "UNCITED_NORMATIVE_CLAIM",
            CheckCode::OutsidePackReliance => "OUTSIDE_PACK_RELIANCE",
            CheckCode::InternalIdLeak => "INTERNAL_ID_LEAK",
            CheckCode::PolicyClaimWithoutClause => "POLICY_CLAIM_WITHOUT_CLAUSE",
            CheckCode::NegotiationNotReweighed => "NEGOTIATION_NOT_REWEIGHED",
            CheckCode::LowConfidenceWithoutCaveat => "LOW_CONFIDENCE_WITHOUT_CAVEAT",
            CheckCode::MaterialIssueUnsupported => "MATERIAL_ISSUE_UNSUPPORTED",
            CheckCode::SingleSourceConsideration => "SINGLE_SOURCE_CONSIDERATION",
            CheckCode::FallbackNotDisclosed => "FALLBACK_NOT_DISCLOSED",
        }
    }
}

impl fmt::Display for CheckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown check code: {s}"))
    }
}

/// One linter finding
///
/// `move_type` is the move whose output the finding is about; the commit
/// gate only blocks a candidate on findings about its own move.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub move_type: MoveType,
    pub code: CheckCode,
    /// Artifact id the finding targets
    pub target: String,
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn new(move_type: MoveType, code: CheckCode, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            move_type,
            code,
            target: target.into(),
            severity: code.severity(),
            message: message.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_hard(&self) -> bool {
        self.severity == Severity::Hard
    }

    /// Short form used for event annotations
    #[must_use]
    pub fn annotation(&self) -> String {
        format!("{} on {}: {}", self.code, self.target, self.message)
    }
}

/// Everything the linter found on a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceReport {
    pub run_id: RunId,
    /// Active findings, sorted
    pub findings: Vec<Finding>,
    /// Hard findings explicitly accepted by an override
    #[serde(default)]
    pub overridden: Vec<Finding>,
}

impl GovernanceReport {
    pub fn hard(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_hard())
    }

    pub fn soft(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.is_hard())
    }

    /// No unresolved hard findings
    #[must_use]
    pub fn passes(&self) -> bool {
        self.hard().next().is_none()
    }

    #[must_use]
    pub fn has(&self, code: CheckCode) -> bool {
        self.findings.iter().any(|f| f.code == code)
    }
}

/// Gate verdict for a candidate move event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateDecision {
    /// New hard findings about the candidate's own move
    pub blocking: Vec<Finding>,
    /// New soft findings to attach to the committed event
    pub annotations: Vec<Finding>,
}

impl GateDecision {
    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.blocking.is_empty()
    }
}
