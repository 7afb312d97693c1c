//! The eight deliberation moves and the backtrack vocabulary

use delib_lattice::PackProfile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deliberation move, in grammar order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    Framing,
    IssueSurfacing,
    EvidenceCuration,
    EvidenceInterpretation,
    ConsiderationsFormation,
    WeighingAndBalance,
    NegotiationAndAlteration,
    PositioningAndNarration,
}

impl MoveType {
    pub const ALL: [MoveType; 8] = [
        MoveType::Framing,
        MoveType::IssueSurfacing,
        MoveType::EvidenceCuration,
        MoveType::EvidenceInterpretation,
        MoveType::ConsiderationsFormation,
        MoveType::WeighingAndBalance,
        MoveType::NegotiationAndAlteration,
        MoveType::PositioningAndNarration,
    ];

    /// 1-based position in the grammar
    #[inline]
    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            MoveType::Framing => 1,
            MoveType::IssueSurfacing => 2,
            MoveType::EvidenceCuration => 3,
            MoveType::EvidenceInterpretation => 4,
            MoveType::ConsiderationsFormation => 5,
            MoveType::WeighingAndBalance => 6,
            MoveType::NegotiationAndAlteration => 7,
            MoveType::PositioningAndNarration => 8,
        }
    }

    #[must_use]
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(usize::from(ordinal).checked_sub(1)?).copied()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MoveType::Framing => "framing",
            MoveType::IssueSurfacing => "issue_surfacing",
            MoveType::EvidenceCuration => "evidence_curation",
            MoveType::EvidenceInterpretation => "evidence_interpretation",
            MoveType::ConsiderationsFormation => "considerations_formation",
            MoveType::WeighingAndBalance => "weighing_and_balance",
            MoveType::NegotiationAndAlteration => "negotiation_and_alteration",
            MoveType::PositioningAndNarration => "positioning_and_narration",
        }
    }

    /// Heading used in rendered artifacts
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            MoveType::Framing => "Framing",
            MoveType::IssueSurfacing => "Issue surfacing",
            MoveType::EvidenceCuration => "Evidence curation",
            MoveType::EvidenceInterpretation => "Evidence interpretation",
            MoveType::ConsiderationsFormation => "Considerations",
            MoveType::WeighingAndBalance => "Weighing and balance",
            MoveType::NegotiationAndAlteration => "Negotiation and alteration",
            MoveType::PositioningAndNarration => "Positioning and narration",
        }
    }

    /// Pack shape requested from the lattice; framing runs without a pack
    #[must_use]
    pub fn pack_profile(self) -> Option<PackProfile> {
        match self {
            MoveType::Framing => None,
            MoveType::IssueSurfacing => Some(PackProfile::Broad),
            MoveType::EvidenceInterpretation => Some(PackProfile::Tight),
            _ => Some(PackProfile::Balanced),
        }
    }

    /// The move after this one, if any
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::from_ordinal(self.ordinal() + 1)
    }
}

impl fmt::Display for MoveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u8>() {
            return Self::from_ordinal(n).ok_or_else(|| format!("no move with ordinal {n}"));
        }
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown move type: {s}"))
    }
}

/// Closed vocabulary of reasons for revisiting an earlier move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BacktrackReason {
    MissingEvidence,
    ConflictFound,
    PolicyMisapplied,
    SiteFactIncorrect,
    ConsulteeContradiction,
    UncertaintyTooHigh,
    FramingShift,
    DraftClaimUncited,
}

impl BacktrackReason {
    pub const ALL: [BacktrackReason; 8] = [
        BacktrackReason::MissingEvidence,
        BacktrackReason::ConflictFound,
        BacktrackReason::PolicyMisapplied,
        BacktrackReason::SiteFactIncorrect,
        BacktrackReason::ConsulteeContradiction,
        BacktrackReason::UncertaintyTooHigh,
        BacktrackReason::FramingShift,
        BacktrackReason::DraftClaimUncited,
    ];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            BacktrackReason::MissingEvidence => "MISSING_EVIDENCE",
            BacktrackReason::ConflictFound => "CONFLICT_FOUND",
            BacktrackReason::PolicyMisapplied => "POLICY_MISAPPLIED",
            BacktrackReason::SiteFactIncorrect => "SITE_FACT_INCORRECT",
            BacktrackReason::ConsulteeContradiction => "CONSULTEE_CONTRADICTION",
            BacktrackReason::UncertaintyTooHigh => "UNCERTAINTY_TOO_HIGH",
            BacktrackReason::FramingShift => "FRAMING_SHIFT",
            BacktrackReason::DraftClaimUncited => "DRAFT_CLAIM_UNCITED",
        }
    }
}

impl fmt::Display for BacktrackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for BacktrackReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown backtrack reason: {s}"))
    }
}

/// Lifecycle status of a move event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    Pending,
    Success,
    Error,
    /// Ran out of time or evidence budget; outputs are usable but incomplete
    Partial,
}

impl MoveStatus {
    /// Success and partial events with outputs count as committed
    #[inline]
    #[must_use]
    pub fn is_committable(self) -> bool {
        matches!(self, MoveStatus::Success | MoveStatus::Partial)
    }
}
