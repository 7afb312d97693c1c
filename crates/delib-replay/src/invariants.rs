//! Structural invariants of a finished run
//!
//! Two runs over the same inputs need not produce the same text, but both
//! must satisfy these.

use crate::trace::{TraceEdge, TraceGraph};
use delib_governance::{CheckCode, GovernanceReport, Linter};
use delib_grammar::{MoveType, RunContext, ScenarioFramingPair};
use delib_ledger::RunId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    MissingMove { move_type: MoveType },
    UncitedInterpretation { interpretation_id: String },
    /// A requested (scenario, framing) pair has no trajectory
    UnansweredPair { pair: ScenarioFramingPair },
    UnresolvedHardFinding { code: CheckCode, target: String },
    DanglingReference { from: String, to: String },
    SequenceGap { expected: u64, got: u64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingMove { move_type } => write!(f, "no committed {move_type} move"),
            Violation::UncitedInterpretation { interpretation_id } => {
                write!(f, "interpretation {interpretation_id} cites nothing")
            }
            Violation::UnansweredPair { pair } => write!(
                f,
                "no trajectory for scenario {} under framing {}",
                pair.scenario_id, pair.framing_id
            ),
            Violation::UnresolvedHardFinding { code, target } => write!(f, "unresolved {code} on {target}"),
            Violation::DanglingReference { from, to } => write!(f, "{from} references missing {to}"),
            Violation::SequenceGap { expected, got } => write!(f, "sequence {got} where {expected} expected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantReport {
    pub run_id: RunId,
    pub violations: Vec<Violation>,
    pub governance: GovernanceReport,
}

impl InvariantReport {
    #[must_use]
    pub fn holds(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable reasons, one per violation
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

/// Check a run against the structural invariants
#[must_use]
pub fn check_invariants(ctx: &RunContext, trace: &TraceGraph, linter: &Linter) -> InvariantReport {
    let mut violations = Vec::new();

    for (i, event) in ctx.events.iter().enumerate() {
        let expected = i as u64 + 1;
        if event.sequence != expected {
            violations.push(Violation::SequenceGap {
                expected,
                got: event.sequence,
            });
            break;
        }
    }

    violations.extend(
        MoveType::ALL
            .into_iter()
            .filter(|m| ctx.committed(*m).is_none())
            .map(|move_type| Violation::MissingMove { move_type }),
    );

    if let Some(interp) = ctx.interpretation() {
        violations.extend(
            interp
                .interpretations
                .iter()
                .filter(|i| i.evidence_refs.is_empty() && i.assumption_ids.is_empty())
                .map(|i| Violation::UncitedInterpretation {
                    interpretation_id: i.id.clone(),
                }),
        );
    }

    if let (Some(framing), Some(positioning)) = (ctx.framing(), ctx.positioning()) {
        let answered: BTreeSet<ScenarioFramingPair> = positioning.trajectories.iter().map(|t| t.pair()).collect();
        let requested: BTreeSet<&ScenarioFramingPair> = framing.requested_pairs.iter().collect();
        violations.extend(
            requested
                .into_iter()
                .filter(|p| !answered.contains(*p))
                .map(|p| Violation::UnansweredPair { pair: p.clone() }),
        );
    }

    let governance = linter.lint(ctx);
    violations.extend(governance.hard().map(|f| Violation::UnresolvedHardFinding {
        code: f.code,
        target: f.target.clone(),
    }));

    violations.extend(
        trace
            .dangling
            .iter()
            .map(|TraceEdge { from, to, .. }| Violation::DanglingReference {
                from: from.clone(),
                to: to.clone(),
            }),
    );

    InvariantReport {
        run_id: ctx.run_id(),
        violations,
        governance,
    }
}
