//! Runs and the explicit per-call run context

use crate::event::MoveEvent;
use crate::moves::MoveType;
use crate::outputs::{
    ConsiderationsOutput, CurationOutput, FramingOutput, InterpretationOutput, IssuesOutput, MoveOutput,
    NegotiationOutput, PositioningOutput, WeighingOutput,
};
use delib_lattice::NodeId;
use delib_ledger::{RunId, Timestamp};
use serde::{Deserialize, Serialize};

/// One deliberation over a subject; never deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    /// Informational only
    #[serde(default)]
    pub profile_tag: Option<String>,
    /// Subject-matter scope (site, application, plan area)
    #[serde(default)]
    pub anchors: Vec<NodeId>,
    /// Initial framing brief given by the caller
    #[serde(default)]
    pub brief: String,
    pub created_at: Timestamp,
    /// Earlier run this one revisits, for diffs
    #[serde(default)]
    pub supersedes: Option<RunId>,
}

impl Run {
    pub fn new(brief: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            profile_tag: None,
            anchors: Vec::new(),
            brief: brief.into(),
            created_at: chrono::Utc::now(),
            supersedes: None,
        }
    }

    #[must_use]
    pub fn with_anchors(mut self, anchors: Vec<NodeId>) -> Self {
        self.anchors = anchors;
        self
    }

    #[must_use]
    pub fn with_profile_tag(mut self, tag: impl Into<String>) -> Self {
        self.profile_tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn superseding(mut self, earlier: RunId) -> Self {
        self.supersedes = Some(earlier);
        self
    }
}

/// Explicit acceptance of a hard governance finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceOverride {
    pub run_id: RunId,
    /// Check code, e.g. `UNCITED_NORMATIVE_CLAIM`
    pub check: String,
    /// Artifact id the finding targets
    pub target: String,
    pub justification: String,
    pub at: Timestamp,
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Open,
    Complete,
    /// Completion was attempted but the run does not conform
    NonConformant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusMark {
    pub run_id: RunId,
    pub status: RunStatus,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub at: Timestamp,
}

/// Everything a move needs to know about its run, passed explicitly
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run: Run,
    pub events: Vec<MoveEvent>,
    pub overrides: Vec<GovernanceOverride>,
}

impl RunContext {
    pub fn new(run: Run, events: Vec<MoveEvent>, overrides: Vec<GovernanceOverride>) -> Self {
        Self { run, events, overrides }
    }

    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run.run_id
    }

    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.events.last().map_or(1, |e| e.sequence + 1)
    }

    /// Latest committed event of a move type
    #[must_use]
    pub fn committed(&self, move_type: MoveType) -> Option<&MoveEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.move_type == move_type && e.is_committed())
    }

    /// Furthest move with any committed event
    #[must_use]
    pub fn furthest_committed(&self) -> Option<MoveType> {
        self.events
            .iter()
            .filter(|e| e.is_committed())
            .map(|e| e.move_type)
            .max()
    }

    fn output(&self, move_type: MoveType) -> Option<&MoveOutput> {
        self.committed(move_type).and_then(|e| e.outputs.as_ref())
    }

    #[must_use]
    pub fn framing(&self) -> Option<&FramingOutput> {
        match self.output(MoveType::Framing)? {
            MoveOutput::Framing(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn issues(&self) -> Option<&IssuesOutput> {
        match self.output(MoveType::IssueSurfacing)? {
            MoveOutput::IssueSurfacing(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn curation(&self) -> Option<&CurationOutput> {
        match self.output(MoveType::EvidenceCuration)? {
            MoveOutput::EvidenceCuration(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn interpretation(&self) -> Option<&InterpretationOutput> {
        match self.output(MoveType::EvidenceInterpretation)? {
            MoveOutput::EvidenceInterpretation(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn considerations(&self) -> Option<&ConsiderationsOutput> {
        match self.output(MoveType::ConsiderationsFormation)? {
            MoveOutput::ConsiderationsFormation(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn weighing(&self) -> Option<&WeighingOutput> {
        match self.output(MoveType::WeighingAndBalance)? {
            MoveOutput::WeighingAndBalance(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn negotiation(&self) -> Option<&NegotiationOutput> {
        match self.output(MoveType::NegotiationAndAlteration)? {
            MoveOutput::NegotiationAndAlteration(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn positioning(&self) -> Option<&PositioningOutput> {
        match self.output(MoveType::PositioningAndNarration)? {
            MoveOutput::PositioningAndNarration(o) => Some(o),
            _ => None,
        }
    }
}
