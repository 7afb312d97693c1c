//! Differences between two rendered runs, typically a run and the run it
//! supersedes

use crate::artifact::DecisionArtifact;
use delib_grammar::{MoveType, ScenarioFramingPair};
use delib_ledger::{EvidenceRef, RunId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryChange {
    pub pair: ScenarioFramingPair,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDiff {
    pub from: RunId,
    pub to: RunId,
    pub moves_added: Vec<MoveType>,
    pub moves_removed: Vec<MoveType>,
    pub trajectories_added: Vec<ScenarioFramingPair>,
    pub trajectories_removed: Vec<ScenarioFramingPair>,
    /// Pairs whose position or narrative changed
    pub trajectories_changed: Vec<TrajectoryChange>,
    pub evidence_added: Vec<EvidenceRef>,
    pub evidence_removed: Vec<EvidenceRef>,
}

impl RunDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.moves_added.is_empty()
            && self.moves_removed.is_empty()
            && self.trajectories_added.is_empty()
            && self.trajectories_removed.is_empty()
            && self.trajectories_changed.is_empty()
            && self.evidence_added.is_empty()
            && self.evidence_removed.is_empty()
    }
}

/// Compare two artifacts. Trajectories are matched by (scenario, framing).
#[must_use]
pub fn diff_runs(from: &DecisionArtifact, to: &DecisionArtifact) -> RunDiff {
    let moves_a: BTreeSet<MoveType> = from.outputs.keys().copied().collect();
    let moves_b: BTreeSet<MoveType> = to.outputs.keys().copied().collect();

    let ta = from.trajectories();
    let tb = to.trajectories();
    let trajectories_changed = ta
        .iter()
        .filter_map(|(pair, a)| {
            let b = tb.get(pair)?;
            (a.position != b.position || a.narrative != b.narrative).then(|| TrajectoryChange {
                pair: pair.clone(),
                before: a.position.clone(),
                after: b.position.clone(),
            })
        })
        .collect();

    let ea = from.evidence_refs();
    let eb = to.evidence_refs();

    RunDiff {
        from: from.run_id,
        to: to.run_id,
        moves_added: moves_b.difference(&moves_a).copied().collect(),
        moves_removed: moves_a.difference(&moves_b).copied().collect(),
        trajectories_added: tb.keys().filter(|p| !ta.contains_key(*p)).cloned().collect(),
        trajectories_removed: ta.keys().filter(|p| !tb.contains_key(*p)).cloned().collect(),
        trajectories_changed,
        evidence_added: eb.difference(&ea).cloned().collect(),
        evidence_removed: ea.difference(&eb).cloned().collect(),
    }
}
