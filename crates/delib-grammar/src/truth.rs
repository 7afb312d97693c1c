//! Truth-status model
//!
//! Every statement a move produces is exactly one of evidence, interpretation
//! or assumption. Drafts are classified by shape; a draft that fits no shape,
//! or more than one, is rejected rather than coerced into the nearest fit.

use crate::error::TruthStatusError;
use delib_ledger::EvidenceRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three statement kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthStatus {
    Evidence,
    Interpretation,
    Assumption,
}

impl fmt::Display for TruthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TruthStatus::Evidence => "evidence",
            TruthStatus::Interpretation => "interpretation",
            TruthStatus::Assumption => "assumption",
        })
    }
}

/// A sourced fact restated without inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceStatement {
    pub id: String,
    pub text: String,
    pub evidence_ref: EvidenceRef,
}

/// An inference drawn from evidence or assumptions
///
/// Always cites at least one evidence ref or assumption; deserialization
/// enforces this too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "InterpretationFields")]
pub struct Interpretation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    pub text: String,
    pub evidence_refs: Vec<EvidenceRef>,
    pub assumption_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_clauses: Vec<EvidenceRef>,
    pub limitations: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveat: Option<String>,
}

#[derive(Deserialize)]
struct InterpretationFields {
    id: String,
    #[serde(default)]
    issue_id: Option<String>,
    text: String,
    #[serde(default)]
    evidence_refs: Vec<EvidenceRef>,
    #[serde(default)]
    assumption_ids: Vec<String>,
    #[serde(default)]
    policy_clauses: Vec<EvidenceRef>,
    #[serde(default)]
    limitations: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    caveat: Option<String>,
}

impl TryFrom<InterpretationFields> for Interpretation {
    type Error = TruthStatusError;

    fn try_from(f: InterpretationFields) -> Result<Self, Self::Error> {
        if f.evidence_refs.is_empty() && f.assumption_ids.is_empty() {
            return Err(TruthStatusError::Uncited { id: f.id });
        }
        Ok(Self {
            id: f.id,
            issue_id: f.issue_id,
            text: f.text,
            evidence_refs: f.evidence_refs,
            assumption_ids: f.assumption_ids,
            policy_clauses: f.policy_clauses,
            limitations: f.limitations,
            confidence: f.confidence,
            caveat: f.caveat,
        })
    }
}

/// A premise adopted without an evidence pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumption {
    pub id: String,
    pub text: String,
    pub scope: String,
    pub justification: String,
}

/// A classified statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Statement {
    Evidence(EvidenceStatement),
    Interpretation(Interpretation),
    Assumption(Assumption),
}

impl Statement {
    #[must_use]
    pub fn status(&self) -> TruthStatus {
        match self {
            Statement::Evidence(_) => TruthStatus::Evidence,
            Statement::Interpretation(_) => TruthStatus::Interpretation,
            Statement::Assumption(_) => TruthStatus::Assumption,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Statement::Evidence(s) => &s.id,
            Statement::Interpretation(s) => &s.id,
            Statement::Assumption(s) => &s.id,
        }
    }
}

/// An unclassified claim as a model or author produced it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimDraft {
    pub id: String,
    pub issue_id: Option<String>,
    pub text: String,
    /// The claim goes beyond what its sources literally say
    pub inference: bool,
    pub evidence_refs: Vec<EvidenceRef>,
    pub assumption_ids: Vec<String>,
    /// Policy clauses an inference reads the evidence against
    pub policy_clauses: Vec<EvidenceRef>,
    pub limitations: Option<String>,
    pub scope: Option<String>,
    pub justification: Option<String>,
    pub confidence: Option<f32>,
    pub caveat: Option<String>,
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl ClaimDraft {
    fn is_evidence_shaped(&self) -> bool {
        !self.inference
            && self.evidence_refs.len() == 1
            && self.assumption_ids.is_empty()
            && self.policy_clauses.is_empty()
            && !present(&self.limitations)
            && !present(&self.scope)
            && !present(&self.justification)
    }

    fn is_interpretation_shaped(&self) -> bool {
        self.inference
            && (!self.evidence_refs.is_empty() || !self.assumption_ids.is_empty())
            && present(&self.limitations)
    }

    fn is_assumption_shaped(&self) -> bool {
        self.evidence_refs.is_empty()
            && self.policy_clauses.is_empty()
            && present(&self.scope)
            && present(&self.justification)
    }

    /// Classify into exactly one truth status
    ///
    /// # Errors
    /// `Uncited` for an inference with no citation, `Unclassifiable` for any
    /// other shapeless draft, `Ambiguous` when more than one shape fits.
    pub fn classify(self) -> Result<Statement, TruthStatusError> {
        if self.text.trim().is_empty() {
            return Err(TruthStatusError::Unclassifiable {
                id: self.id,
                reason: "statement text is empty".into(),
            });
        }
        let mut shapes = Vec::new();
        if self.is_evidence_shaped() {
            shapes.push(TruthStatus::Evidence);
        }
        if self.is_interpretation_shaped() {
            shapes.push(TruthStatus::Interpretation);
        }
        if self.is_assumption_shaped() {
            shapes.push(TruthStatus::Assumption);
        }

        match shapes.as_slice() {
            [TruthStatus::Evidence] => {
                let mut refs = self.evidence_refs;
                match refs.pop() {
                    Some(evidence_ref) => Ok(Statement::Evidence(EvidenceStatement {
                        id: self.id,
                        text: self.text,
                        evidence_ref,
                    })),
                    None => Err(TruthStatusError::Uncited { id: self.id }),
                }
            }
            [TruthStatus::Interpretation] => Ok(Statement::Interpretation(Interpretation {
                id: self.id,
                issue_id: self.issue_id,
                text: self.text,
                evidence_refs: self.evidence_refs,
                assumption_ids: self.assumption_ids,
                policy_clauses: self.policy_clauses,
                limitations: self.limitations.unwrap_or_default(),
                confidence: self.confidence,
                caveat: self.caveat,
            })),
            [TruthStatus::Assumption] => Ok(Statement::Assumption(Assumption {
                id: self.id,
                text: self.text,
                scope: self.scope.unwrap_or_default(),
                justification: self.justification.unwrap_or_default(),
            })),
            [] if self.inference && self.evidence_refs.is_empty() && self.assumption_ids.is_empty() => {
                Err(TruthStatusError::Uncited { id: self.id })
            }
            [] => Err(TruthStatusError::Unclassifiable {
                reason: self.missing_shape_reason(),
                id: self.id,
            }),
            _ => Err(TruthStatusError::Ambiguous {
                id: self.id,
                shapes: shapes.clone(),
            }),
        }
    }

    fn missing_shape_reason(&self) -> String {
        if self.inference {
            "inference without stated limitations".into()
        } else if self.evidence_refs.len() > 1 {
            "a non-inferential claim must point at exactly one source".into()
        } else if self.evidence_refs.is_empty() {
            "assumptions need both a scope and a justification".into()
        } else {
            "evidence restatements carry no limitations, scope, justification or policy clauses".into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn r(s: &str) -> EvidenceRef {
        s.parse().unwrap()
    }

    fn draft(text: &str) -> ClaimDraft {
        ClaimDraft {
            id: "c1".into(),
            text: text.into(),
            ..ClaimDraft::default()
        }
    }

    #[test]
    fn plain_sourced_fact_is_evidence() {
        let d = ClaimDraft {
            evidence_refs: vec![r("doc::sfra::para-3")],
            ..draft("The site lies in flood zone 3")
        };
        assert_eq!(d.classify().unwrap().status(), TruthStatus::Evidence);
    }

    #[test]
    fn cited_inference_with_limitations_is_interpretation() {
        let d = ClaimDraft {
            inference: true,
            evidence_refs: vec![r("doc::sfra::para-3")],
            limitations: Some("modelling predates the 2024 flood defences".into()),
            ..draft("Residential use would face material flood risk")
        };
        match d.classify().unwrap() {
            Statement::Interpretation(i) => assert_eq!(i.evidence_refs.len(), 1),
            other => panic!("expected interpretation, got {other:?}"),
        }
    }

    #[test]
    fn uncited_inference_is_rejected() {
        let d = ClaimDraft {
            inference: true,
            limitations: Some("none stated".into()),
            ..draft("The scheme is clearly acceptable")
        };
        assert_eq!(d.classify(), Err(TruthStatusError::Uncited { id: "c1".into() }));
    }

    #[test]
    fn scoped_premise_is_assumption() {
        let d = ClaimDraft {
            scope: Some("site 12 only".into()),
            justification: Some("the applicant has confirmed access rights".into()),
            ..draft("Access can be taken from the north")
        };
        assert_eq!(d.classify().unwrap().status(), TruthStatus::Assumption);
    }

    #[test]
    fn draft_fitting_two_shapes_is_ambiguous() {
        let d = ClaimDraft {
            inference: true,
            assumption_ids: vec!["a1".into()],
            limitations: Some("depends on a1".into()),
            scope: Some("site 12".into()),
            justification: Some("officer view".into()),
            ..draft("Parking demand will be modest")
        };
        assert!(matches!(d.classify(), Err(TruthStatusError::Ambiguous { .. })));
    }

    #[test]
    fn multi_source_restatement_is_not_coerced() {
        let d = ClaimDraft {
            evidence_refs: vec![r("doc::a::1"), r("doc::b::1")],
            ..draft("Both reports agree")
        };
        assert!(matches!(d.classify(), Err(TruthStatusError::Unclassifiable { .. })));
    }

    #[test]
    fn interpretation_without_refs_fails_to_deserialize() {
        let json = r#"{"id":"i1","text":"x","evidence_refs":[],"assumption_ids":[],"limitations":"y"}"#;
        assert!(serde_json::from_str::<Interpretation>(json).is_err());
        let ok = r#"{"id":"i1","text":"x","evidence_refs":["doc::a::1"],"assumption_ids":[],"limitations":"y"}"#;
        assert!(serde_json::from_str::<Interpretation>(ok).is_ok());
    }

    #[test]
    fn policy_clauses_travel_with_interpretations_only() {
        let read = ClaimDraft {
            inference: true,
            evidence_refs: vec![r("doc::sfra::para-3")],
            policy_clauses: vec![r("doc::local-plan::policy-7")],
            limitations: Some("zone boundary from 2019 mapping".into()),
            ..draft("The site fails the sequential test")
        };
        match read.classify().unwrap() {
            Statement::Interpretation(i) => assert_eq!(i.policy_clauses, vec![r("doc::local-plan::policy-7")]),
            other => panic!("expected interpretation, got {other:?}"),
        }

        let restated = ClaimDraft {
            evidence_refs: vec![r("doc::sfra::para-3")],
            policy_clauses: vec![r("doc::local-plan::policy-7")],
            ..draft("The site lies in flood zone 3")
        };
        assert!(matches!(restated.classify(), Err(TruthStatusError::Unclassifiable { .. })));
    }

    proptest! {
        #[test]
        fn classification_is_exclusive(
            inference in any::<bool>(),
            refs in 0usize..3,
            assumptions in 0usize..2,
            limitations in any::<bool>(),
            scope in any::<bool>(),
            justification in any::<bool>(),
        ) {
            let d = ClaimDraft {
                inference,
                evidence_refs: (0..refs).map(|i| r(&format!("doc::s::{i}"))).collect(),
                assumption_ids: (0..assumptions).map(|i| format!("a{i}")).collect(),
                limitations: limitations.then(|| "lim".to_string()),
                scope: scope.then(|| "scope".to_string()),
                justification: justification.then(|| "why".to_string()),
                ..draft("claim")
            };
            if let Ok(Statement::Interpretation(i)) = d.classify() {
                prop_assert!(!i.evidence_refs.is_empty() || !i.assumption_ids.is_empty());
            }
        }
    }
}
