//! Per-move output payloads
//!
//! Schemas are versioned by [`SCHEMA_VERSION`] and only ever grow: a field
//! added after version 1 must carry `#[serde(default)]` so older events keep
//! loading.

use crate::moves::MoveType;
use crate::truth::{Assumption, ClaimDraft, EvidenceStatement, Interpretation};
use delib_lattice::ContextPack;
use delib_ledger::EvidenceRef;
use serde::{Deserialize, Serialize};

/// Current output schema version
pub const SCHEMA_VERSION: u32 = 1;

/// A way of framing the decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Framing {
    pub id: String,
    pub title: String,
    pub goal: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// A future the decision is tested against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A (scenario, framing) combination that needs its own trajectory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScenarioFramingPair {
    pub scenario_id: String,
    pub framing_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramingOutput {
    pub framings: Vec<Framing>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub requested_pairs: Vec<ScenarioFramingPair>,
}

/// A planning issue raised for deliberation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Material issues must end up with supporting evidence
    #[serde(default)]
    pub material: bool,
    /// Search text used when curating evidence for this issue
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuesOutput {
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurationOutput {
    pub pack: ContextPack,
}

/// Move 4 output after truth-status classification
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterpretationOutput {
    #[serde(default)]
    pub evidence: Vec<EvidenceStatement>,
    #[serde(default)]
    pub interpretations: Vec<Interpretation>,
    #[serde(default)]
    pub assumptions: Vec<Assumption>,
    /// Limitations carried forward from the pack
    #[serde(default)]
    pub limitations: Vec<String>,
}

/// What a language provider returns for Move 4, before classification
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterpretationDraft {
    #[serde(default)]
    pub claims: Vec<ClaimDraft>,
}

/// Whether a consideration pulls toward or against the proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leaning {
    For,
    Against,
    #[default]
    Neutral,
}

/// A material consideration bound to an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsiderationLedgerEntry {
    pub id: String,
    pub issue_id: String,
    pub statement: String,
    #[serde(default)]
    pub interpretation_ids: Vec<String>,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
    /// Policy clauses this consideration relies on
    #[serde(default)]
    pub policy_clauses: Vec<EvidenceRef>,
    /// Says what ought to happen rather than what is the case
    #[serde(default)]
    pub normative: bool,
    #[serde(default)]
    pub leaning: Leaning,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub caveat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsiderationsOutput {
    pub entries: Vec<ConsiderationLedgerEntry>,
}

/// The balance struck under one framing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeighingRecord {
    pub id: String,
    pub framing_id: String,
    pub consideration_ids: Vec<String>,
    pub balance: String,
    /// Earlier weighing record this one replaces
    #[serde(default)]
    pub supersedes: Option<String>,
    /// Negotiation moves this weighing takes into account
    #[serde(default)]
    pub responds_to_negotiation: Vec<String>,
    /// Policy clauses the balance is struck against
    #[serde(default)]
    pub policy_clauses: Vec<EvidenceRef>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub caveat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeighingOutput {
    pub records: Vec<WeighingRecord>,
}

/// A proposed alteration (condition, amendment, mitigation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationMove {
    pub id: String,
    pub proposal: String,
    #[serde(default)]
    pub affected_consideration_ids: Vec<String>,
    /// The alteration changes the balance and must be re-weighed
    #[serde(default)]
    pub alters_balance: bool,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
    #[serde(default)]
    pub policy_clauses: Vec<EvidenceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationOutput {
    pub moves: Vec<NegotiationMove>,
}

/// A narrated position for one (scenario, framing) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: String,
    pub scenario_id: String,
    pub framing_id: String,
    pub position: String,
    pub narrative: String,
    #[serde(default)]
    pub weighing_ids: Vec<String>,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
    /// Policy clauses the position is taken under
    #[serde(default)]
    pub policy_clauses: Vec<EvidenceRef>,
    #[serde(default)]
    pub assumption_ids: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub caveat: Option<String>,
}

impl Trajectory {
    #[must_use]
    pub fn pair(&self) -> ScenarioFramingPair {
        ScenarioFramingPair {
            scenario_id: self.scenario_id.clone(),
            framing_id: self.framing_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositioningOutput {
    pub trajectories: Vec<Trajectory>,
}

/// Closed sum of move outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "move", rename_all = "snake_case")]
pub enum MoveOutput {
    Framing(FramingOutput),
    IssueSurfacing(IssuesOutput),
    EvidenceCuration(CurationOutput),
    EvidenceInterpretation(InterpretationOutput),
    ConsiderationsFormation(ConsiderationsOutput),
    WeighingAndBalance(WeighingOutput),
    NegotiationAndAlteration(NegotiationOutput),
    PositioningAndNarration(PositioningOutput),
}

impl MoveOutput {
    #[must_use]
    pub fn move_type(&self) -> MoveType {
        match self {
            MoveOutput::Framing(_) => MoveType::Framing,
            MoveOutput::IssueSurfacing(_) => MoveType::IssueSurfacing,
            MoveOutput::EvidenceCuration(_) => MoveType::EvidenceCuration,
            MoveOutput::EvidenceInterpretation(_) => MoveType::EvidenceInterpretation,
            MoveOutput::ConsiderationsFormation(_) => MoveType::ConsiderationsFormation,
            MoveOutput::WeighingAndBalance(_) => MoveType::WeighingAndBalance,
            MoveOutput::NegotiationAndAlteration(_) => MoveType::NegotiationAndAlteration,
            MoveOutput::PositioningAndNarration(_) => MoveType::PositioningAndNarration,
        }
    }

    /// Every evidence ref the output cites, in output order
    #[must_use]
    pub fn cited_refs(&self) -> Vec<EvidenceRef> {
        let mut out: Vec<EvidenceRef> = Vec::new();
        match self {
            MoveOutput::Framing(_) | MoveOutput::IssueSurfacing(_) => {}
            MoveOutput::EvidenceCuration(c) => out.extend(c.pack.evidence_refs().cloned()),
            MoveOutput::EvidenceInterpretation(i) => {
                out.extend(i.evidence.iter().map(|e| e.evidence_ref.clone()));
                for x in &i.interpretations {
                    out.extend(x.evidence_refs.iter().cloned());
                    out.extend(x.policy_clauses.iter().cloned());
                }
            }
            MoveOutput::ConsiderationsFormation(c) => {
                for e in &c.entries {
                    out.extend(e.evidence_refs.iter().cloned());
                    out.extend(e.policy_clauses.iter().cloned());
                }
            }
            MoveOutput::WeighingAndBalance(w) => {
                out.extend(w.records.iter().flat_map(|r| r.policy_clauses.iter().cloned()));
            }
            MoveOutput::NegotiationAndAlteration(n) => {
                for m in &n.moves {
                    out.extend(m.evidence_refs.iter().cloned());
                    out.extend(m.policy_clauses.iter().cloned());
                }
            }
            MoveOutput::PositioningAndNarration(p) => {
                for t in &p.trajectories {
                    out.extend(t.evidence_refs.iter().cloned());
                    out.extend(t.policy_clauses.iter().cloned());
                }
            }
        }
        let mut seen = std::collections::HashSet::new();
        out.retain(|r| seen.insert(r.clone()));
        out
    }

    /// First artifact id that appears twice within one artifact list
    ///
    /// Framings and scenarios, issues, evidence statements, interpretations,
    /// assumptions, entries, records, moves and trajectories each form
    /// their own id space.
    #[must_use]
    pub fn duplicate_id(&self) -> Option<&str> {
        fn first_repeat<'a>(ids: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
            let mut seen = std::collections::HashSet::new();
            ids.into_iter().find(|id| !seen.insert(*id))
        }

        match self {
            MoveOutput::Framing(f) => first_repeat(f.framings.iter().map(|x| x.id.as_str()))
                .or_else(|| first_repeat(f.scenarios.iter().map(|x| x.id.as_str()))),
            MoveOutput::IssueSurfacing(i) => first_repeat(i.issues.iter().map(|x| x.id.as_str())),
            MoveOutput::EvidenceCuration(_) => None,
            MoveOutput::EvidenceInterpretation(i) => first_repeat(i.evidence.iter().map(|x| x.id.as_str()))
                .or_else(|| first_repeat(i.interpretations.iter().map(|x| x.id.as_str())))
                .or_else(|| first_repeat(i.assumptions.iter().map(|x| x.id.as_str()))),
            MoveOutput::ConsiderationsFormation(c) => first_repeat(c.entries.iter().map(|x| x.id.as_str())),
            MoveOutput::WeighingAndBalance(w) => first_repeat(w.records.iter().map(|x| x.id.as_str())),
            MoveOutput::NegotiationAndAlteration(n) => first_repeat(n.moves.iter().map(|x| x.id.as_str())),
            MoveOutput::PositioningAndNarration(p) => first_repeat(p.trajectories.iter().map(|x| x.id.as_str())),
        }
    }

    /// Assumption ids the output introduces or relies on
    #[must_use]
    pub fn assumption_ids(&self) -> Vec<String> {
        match self {
            MoveOutput::EvidenceInterpretation(i) => i.assumptions.iter().map(|a| a.id.clone()).collect(),
            MoveOutput::PositioningAndNarration(p) => {
                p.trajectories.iter().flat_map(|t| t.assumption_ids.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Parse a provider's JSON as the payload for `move_type`
    pub fn from_json(move_type: MoveType, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match move_type {
            MoveType::Framing => MoveOutput::Framing(serde_json::from_value(value)?),
            MoveType::IssueSurfacing => MoveOutput::IssueSurfacing(serde_json::from_value(value)?),
            MoveType::EvidenceCuration => MoveOutput::EvidenceCuration(serde_json::from_value(value)?),
            MoveType::EvidenceInterpretation => MoveOutput::EvidenceInterpretation(serde_json::from_value(value)?),
            MoveType::ConsiderationsFormation => {
                MoveOutput::ConsiderationsFormation(serde_json::from_value(value)?)
            }
            MoveType::WeighingAndBalance => MoveOutput::WeighingAndBalance(serde_json::from_value(value)?),
            MoveType::NegotiationAndAlteration => {
                MoveOutput::NegotiationAndAlteration(serde_json::from_value(value)?)
            }
            MoveType::PositioningAndNarration => {
                MoveOutput::PositioningAndNarration(serde_json::from_value(value)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_is_tagged_by_move() {
        let out = MoveOutput::IssueSurfacing(IssuesOutput {
            issues: vec![Issue {
                id: "A".into(),
                title: "Flood risk".into(),
                description: String::new(),
                material: true,
                query: None,
            }],
        });
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["move"], "issue_surfacing");
        let back: MoveOutput = serde_json::from_value(json).unwrap();
        assert_eq!(back.move_type(), MoveType::IssueSurfacing);
    }

    #[test]
    fn repeated_ids_are_found_per_artifact_list() {
        let issue = |id: &str| Issue {
            id: id.into(),
            title: "Flood risk".into(),
            description: String::new(),
            material: true,
            query: None,
        };
        let clean = MoveOutput::IssueSurfacing(IssuesOutput { issues: vec![issue("A"), issue("B")] });
        assert_eq!(clean.duplicate_id(), None);

        let repeated = MoveOutput::IssueSurfacing(IssuesOutput {
            issues: vec![issue("A"), issue("B"), issue("A")],
        });
        assert_eq!(repeated.duplicate_id(), Some("A"));

        let framing = |id: &str| Framing {
            id: id.into(),
            title: "Growth".into(),
            goal: "Deliver homes".into(),
            constraints: vec![],
        };
        let shared_across_lists = MoveOutput::Framing(FramingOutput {
            framings: vec![framing("x")],
            scenarios: vec![Scenario { id: "x".into(), title: "Baseline".into(), description: String::new() }],
            requested_pairs: vec![],
        });
        assert_eq!(shared_across_lists.duplicate_id(), None);
    }

    #[test]
    fn older_payloads_load_with_defaults() {
        let v1 = json!({
            "records": [{
                "id": "w1",
                "framing_id": "f1",
                "consideration_ids": ["c1"],
                "balance": "harm outweighs benefit"
            }]
        });
        let out = MoveOutput::from_json(MoveType::WeighingAndBalance, v1).unwrap();
        match out {
            MoveOutput::WeighingAndBalance(w) => {
                assert!(w.records[0].responds_to_negotiation.is_empty());
                assert_eq!(w.records[0].supersedes, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cited_refs_are_deduplicated() {
        let r: EvidenceRef = "doc::plan::policy-7".parse().unwrap();
        let out = MoveOutput::ConsiderationsFormation(ConsiderationsOutput {
            entries: vec![ConsiderationLedgerEntry {
                id: "c1".into(),
                issue_id: "A".into(),
                statement: "Policy 7 applies".into(),
                interpretation_ids: vec![],
                evidence_refs: vec![r.clone()],
                policy_clauses: vec![r.clone()],
                normative: true,
                leaning: Leaning::Against,
                confidence: None,
                caveat: None,
            }],
        });
        assert_eq!(out.cited_refs(), vec![r]);
    }
}
