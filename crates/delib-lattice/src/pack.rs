//! Context packs: the bounded evidence slice handed to a move

use crate::retrieval::Modality;
use crate::traversal::HaltReason;
use delib_ledger::{EvidenceRef, ToolRunId};
use serde::{Deserialize, Serialize};

/// Shape of a pack, chosen per move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackProfile {
    /// High recall (issue surfacing)
    Broad,
    Balanced,
    /// High precision (interpretation)
    Tight,
}

/// Selection limits for one profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackBudget {
    pub max_atoms: usize,
    pub per_source_cap: usize,
    pub per_modality_cap: usize,
    pub score_floor: f32,
    /// `top_k` passed to each provider query
    pub top_k: usize,
}

/// Budgets for every profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackBudgets {
    pub broad: PackBudget,
    pub balanced: PackBudget,
    pub tight: PackBudget,
}

impl PackBudgets {
    #[must_use]
    pub fn for_profile(&self, profile: PackProfile) -> PackBudget {
        match profile {
            PackProfile::Broad => self.broad,
            PackProfile::Balanced => self.balanced,
            PackProfile::Tight => self.tight,
        }
    }
}

impl Default for PackBudgets {
    fn default() -> Self {
        Self {
            broad: PackBudget {
                max_atoms: 24,
                per_source_cap: 4,
                per_modality_cap: 12,
                score_floor: 0.0,
                top_k: 10,
            },
            balanced: PackBudget {
                max_atoms: 12,
                per_source_cap: 3,
                per_modality_cap: 6,
                score_floor: 0.2,
                top_k: 6,
            },
            tight: PackBudget {
                max_atoms: 6,
                per_source_cap: 2,
                per_modality_cap: 4,
                score_floor: 0.4,
                top_k: 4,
            },
        }
    }
}

/// A selected evidence atom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackAtom {
    pub evidence_ref: EvidenceRef,
    pub modality: Modality,
    pub score: f32,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_run_id: Option<ToolRunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Why a candidate was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmissionReason {
    NearDuplicate,
    SourceCapReached,
    ModalityCapReached,
    BudgetExhausted,
    BelowScoreFloor,
    /// Not tagged with any declared issue (tight packs only)
    OffIssue,
    /// Deliberately excluded by the curator
    CuratorExcluded,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Omission {
    pub evidence_ref: EvidenceRef,
    pub reason: OmissionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Omission {
    pub fn new(evidence_ref: EvidenceRef, reason: OmissionReason) -> Self {
        Self {
            evidence_ref,
            reason,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// The five assembly stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStage {
    Frame,
    Generate,
    Traverse,
    Select,
    Shape,
}

/// Log line for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyStep {
    pub stage: AssemblyStage,
    pub count: usize,
    pub detail: String,
}

/// A bounded, logged, move-specific slice of evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub pack_id: String,
    pub purpose: String,
    pub profile: PackProfile,
    pub atoms: Vec<PackAtom>,
    #[serde(default)]
    pub omissions: Vec<Omission>,
    #[serde(default)]
    pub uncovered_issues: Vec<String>,
    #[serde(default)]
    pub fallback_mode: bool,
    #[serde(default)]
    pub fallback_reasons: Vec<String>,
    /// Traversal hit a ceiling; the pack is partial
    #[serde(default)]
    pub partial: bool,
    pub halt: HaltReason,
    #[serde(default)]
    pub steps: Vec<AssemblyStep>,
    #[serde(default)]
    pub tool_run_ids: Vec<ToolRunId>,
}

impl ContextPack {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    #[must_use]
    pub fn contains(&self, evidence_ref: &EvidenceRef) -> bool {
        self.atoms.iter().any(|a| &a.evidence_ref == evidence_ref)
    }

    pub fn evidence_refs(&self) -> impl Iterator<Item = &EvidenceRef> {
        self.atoms.iter().map(|a| &a.evidence_ref)
    }

    /// Atoms tagged with the given issue
    pub fn atoms_for_issue<'a>(&'a self, issue: &'a str) -> impl Iterator<Item = &'a PackAtom> {
        self.atoms.iter().filter(move |a| a.issues.iter().any(|i| i == issue))
    }

    /// Limitation sentences that must travel with anything built on this pack
    #[must_use]
    pub fn limitations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for reason in &self.fallback_reasons {
            out.push(format!("Evidence gathered in fallback mode: {reason}."));
        }
        if self.partial {
            out.push(format!(
                "Evidence search stopped early ({}); the pack may be incomplete.",
                match self.halt {
                    HaltReason::HopBudget => "hop budget reached",
                    HaltReason::NodeBudget => "node budget reached",
                    HaltReason::CoverageAchieved | HaltReason::FrontierExhausted => "budget reached",
                }
            ));
        }
        if !self.uncovered_issues.is_empty() {
            out.push(format!(
                "No evidence was found for: {}.",
                self.uncovered_issues.join(", ")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack() -> ContextPack {
        ContextPack {
            pack_id: "p".into(),
            purpose: "evidence_curation".into(),
            profile: PackProfile::Balanced,
            atoms: Vec::new(),
            omissions: Vec::new(),
            uncovered_issues: Vec::new(),
            fallback_mode: false,
            fallback_reasons: Vec::new(),
            partial: false,
            halt: HaltReason::FrontierExhausted,
            steps: Vec::new(),
            tool_run_ids: Vec::new(),
        }
    }

    #[test]
    fn clean_pack_has_no_limitations() {
        assert!(pack().limitations().is_empty());
    }

    #[test]
    fn fallback_and_partial_surface_as_limitations() {
        let mut p = pack();
        p.fallback_mode = true;
        p.fallback_reasons.push("visual retrieval unavailable".into());
        p.partial = true;
        p.halt = HaltReason::NodeBudget;
        p.uncovered_issues.push("heritage".into());
        let lims = p.limitations();
        assert_eq!(lims.len(), 3);
        assert!(lims[0].contains("visual retrieval unavailable"));
        assert!(lims[1].contains("node budget"));
        assert!(lims[2].contains("heritage"));
    }

    #[test]
    fn omission_serializes_reason_and_detail() {
        let o = Omission::new("doc::a::b".parse().unwrap(), OmissionReason::CuratorExcluded)
            .with_detail("superseded plan");
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["reason"], "curator_excluded");
        assert_eq!(json["detail"], "superseded plan");
    }
}
