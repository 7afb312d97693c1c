//! Decision artifact rendering
//!
//! Rendering is a pure function of stored records. The same events and tool
//! runs always produce the same bytes, so a replay is checked by comparing
//! content hashes.

use crate::error::ReplayError;
use crate::trace::TraceGraph;
use delib_grammar::{
    BacktrackReason, MoveEventId, MoveOutput, MoveStatus, MoveType, RunContext, ScenarioFramingPair,
};
use delib_ledger::{ContentHash, EvidenceRef, ProvenanceLedger, RunId, ToolRun, ToolRunId, ToolStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One line of the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event_id: MoveEventId,
    pub sequence: u64,
    pub move_type: MoveType,
    pub status: MoveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtracked_from: Option<MoveEventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrack_reason: Option<BacktrackReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ledger facts about a tool run named by the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRunSummary {
    pub id: ToolRunId,
    pub tool_name: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl From<&ToolRun> for ToolRunSummary {
    fn from(run: &ToolRun) -> Self {
        Self {
            id: run.id,
            tool_name: run.tool_name.clone(),
            status: run.status,
            model_id: run.model_id.clone(),
            prompt: run.prompt.as_ref().map(|p| format!("{}@{}", p.id, p.version)),
        }
    }
}

/// Latest committed output of a move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedOutput {
    pub event_id: MoveEventId,
    pub sequence: u64,
    pub output: MoveOutput,
}

/// The rendered decision artifact of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionArtifact {
    pub run_id: RunId,
    pub brief: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<RunId>,
    pub history: Vec<HistoryEntry>,
    pub outputs: BTreeMap<MoveType, CommittedOutput>,
    /// Uncertainty carried by the committed events, in first-seen order
    pub limitations: Vec<String>,
    pub annotations: Vec<String>,
    pub tool_runs: Vec<ToolRunSummary>,
    /// Plain-text narrative of the trajectories
    pub narrative: String,
}

impl DecisionArtifact {
    pub fn output(&self, move_type: MoveType) -> Option<&MoveOutput> {
        self.outputs.get(&move_type).map(|c| &c.output)
    }

    /// Every evidence ref cited by a committed output, sorted
    #[must_use]
    pub fn evidence_refs(&self) -> BTreeSet<EvidenceRef> {
        self.outputs.values().flat_map(|c| c.output.cited_refs()).collect()
    }

    /// Committed trajectories keyed by their (scenario, framing) pair
    #[must_use]
    pub fn trajectories(&self) -> BTreeMap<ScenarioFramingPair, &delib_grammar::Trajectory> {
        match self.output(MoveType::PositioningAndNarration) {
            Some(MoveOutput::PositioningAndNarration(p)) => p.trajectories.iter().map(|t| (t.pair(), t)).collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Artifact, trace and the canonical bytes they were rendered to
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub artifact: DecisionArtifact,
    pub trace: TraceGraph,
    pub bytes: Vec<u8>,
    pub hash: ContentHash,
}

#[derive(Serialize)]
struct Canonical<'a> {
    artifact: &'a DecisionArtifact,
    trace: &'a TraceGraph,
}

/// Render a run from its context and the ledger
///
/// Reads tool runs from the ledger by id and never invokes a provider.
///
/// # Errors
/// `UnresolvedToolRun` if an event names a tool run the ledger lacks
pub fn render(ctx: &RunContext, ledger: &dyn ProvenanceLedger) -> Result<Rendered, ReplayError> {
    let mut tool_runs = BTreeMap::new();
    for event in &ctx.events {
        for &id in &event.tool_run_ids {
            if !ledger.contains(id) {
                return Err(ReplayError::UnresolvedToolRun {
                    event: event.id,
                    tool_run: id,
                });
            }
            tool_runs.insert(id, ledger.resolve(id)?);
        }
    }

    let artifact = build_artifact(ctx, &tool_runs);
    let trace = TraceGraph::project(ctx, &tool_runs);
    let bytes = serde_json::to_vec_pretty(&Canonical {
        artifact: &artifact,
        trace: &trace,
    })?;
    let hash = ContentHash::compute(&bytes);
    tracing::debug!(run_id = %ctx.run_id(), hash = %hash.short(), nodes = trace.nodes.len(), "rendered run");
    Ok(Rendered {
        artifact,
        trace,
        bytes,
        hash,
    })
}

fn build_artifact(ctx: &RunContext, tool_runs: &BTreeMap<ToolRunId, ToolRun>) -> DecisionArtifact {
    let history = ctx
        .events
        .iter()
        .map(|e| HistoryEntry {
            event_id: e.id,
            sequence: e.sequence,
            move_type: e.move_type,
            status: e.status,
            backtracked_from: e.backtracked_from,
            backtrack_reason: e.backtrack_reason,
            error: e.error.clone(),
        })
        .collect();

    let mut outputs = BTreeMap::new();
    let mut limitations: Vec<String> = Vec::new();
    let mut annotations: Vec<String> = Vec::new();
    for move_type in MoveType::ALL {
        let Some(event) = ctx.committed(move_type) else { continue };
        for u in &event.uncertainty {
            if !limitations.contains(u) {
                limitations.push(u.clone());
            }
        }
        annotations.extend(event.annotations.iter().cloned());
        if let Some(output) = &event.outputs {
            outputs.insert(
                move_type,
                CommittedOutput {
                    event_id: event.id,
                    sequence: event.sequence,
                    output: output.clone(),
                },
            );
        }
    }

    DecisionArtifact {
        run_id: ctx.run_id(),
        brief: ctx.run.brief.clone(),
        supersedes: ctx.run.supersedes,
        history,
        narrative: narrative(ctx, &limitations),
        outputs,
        limitations,
        annotations,
        tool_runs: tool_runs.values().map(ToolRunSummary::from).collect(),
    }
}

fn narrative(ctx: &RunContext, limitations: &[String]) -> String {
    let mut out = String::new();
    let Some(positioning) = ctx.positioning() else {
        return out;
    };
    let framings: BTreeMap<&str, &str> = ctx
        .framing()
        .map(|f| f.framings.iter().map(|x| (x.id.as_str(), x.title.as_str())).collect())
        .unwrap_or_default();
    let scenarios: BTreeMap<&str, &str> = ctx
        .framing()
        .map(|f| f.scenarios.iter().map(|x| (x.id.as_str(), x.title.as_str())).collect())
        .unwrap_or_default();

    let mut trajectories: Vec<_> = positioning.trajectories.iter().collect();
    trajectories.sort_by(|a, b| a.pair().cmp(&b.pair()).then_with(|| a.id.cmp(&b.id)));
    for t in trajectories {
        let scenario = scenarios.get(t.scenario_id.as_str()).copied().unwrap_or("Scenario");
        let framing = framings.get(t.framing_id.as_str()).copied().unwrap_or("Framing");
        out.push_str(&format!("## {scenario} / {framing}\n"));
        out.push_str(&format!("\nPosition: {}\n\n", t.position));
        out.push_str(&t.narrative);
        out.push('\n');
        if let Some(caveat) = &t.caveat {
            out.push_str(&format!("\nCaveat: {caveat}\n"));
        }
        out.push('\n');
    }
    if !limitations.is_empty() {
        out.push_str("## Limitations\n\n");
        for l in limitations {
            out.push_str(&format!("- {l}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use delib_grammar::{
        Framing, FramingOutput, MoveEvent, PositioningOutput, Run, Scenario, Trajectory,
    };
    use delib_ledger::{CaptureLevel, InMemoryLedger, ToolInvocation};

    fn run_with_tool(ledger: &InMemoryLedger) -> RunContext {
        let mut ctx = RunContext::new(Run::new("Erect 40 homes at Mill Lane"), Vec::new(), Vec::new());
        let tool = ledger
            .record(ToolInvocation::new("llm.generate", serde_json::json!({"move": "framing"})))
            .unwrap();
        let mut framing = MoveEvent::pending(ctx.run_id(), MoveType::Framing, 1).with_outputs(
            MoveStatus::Success,
            MoveOutput::Framing(FramingOutput {
                framings: vec![Framing {
                    id: "f1".into(),
                    title: "Housing need".into(),
                    goal: "Deliver homes".into(),
                    constraints: Vec::new(),
                }],
                scenarios: vec![Scenario {
                    id: "s1".into(),
                    title: "As submitted".into(),
                    description: String::new(),
                }],
                requested_pairs: Vec::new(),
            }),
        );
        framing.tool_run_ids.push(tool);
        ctx.events.push(framing);
        let mut positioning = MoveEvent::pending(ctx.run_id(), MoveType::PositioningAndNarration, 2).with_outputs(
            MoveStatus::Success,
            MoveOutput::PositioningAndNarration(PositioningOutput {
                trajectories: vec![Trajectory {
                    id: "t1".into(),
                    scenario_id: "s1".into(),
                    framing_id: "f1".into(),
                    position: "Approve with conditions".into(),
                    narrative: "Housing need carries substantial weight.".into(),
                    weighing_ids: Vec::new(),
                    evidence_refs: vec!["doc::shma::table-4".parse().unwrap()],
                    policy_clauses: Vec::new(),
                    assumption_ids: Vec::new(),
                    confidence: None,
                    caveat: None,
                }],
            }),
        );
        positioning.uncertainty.push("Visual retrieval unavailable; fallback pack".into());
        ctx.events.push(positioning);
        ctx
    }

    #[test]
    fn same_records_same_bytes() {
        let ledger = InMemoryLedger::new(CaptureLevel::Summary);
        let ctx = run_with_tool(&ledger);
        let a = render(&ctx, &ledger).unwrap();
        let b = render(&ctx, &ledger).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.artifact.tool_runs.len(), 1);
        assert_eq!(a.artifact.tool_runs[0].tool_name, "llm.generate");
    }

    #[test]
    fn narrative_uses_titles_and_limitations() {
        let ledger = InMemoryLedger::new(CaptureLevel::Summary);
        let rendered = render(&run_with_tool(&ledger), &ledger).unwrap();
        let text = &rendered.artifact.narrative;
        assert!(text.starts_with("## As submitted / Housing need"));
        assert!(text.contains("Position: Approve with conditions"));
        assert!(text.contains("- Visual retrieval unavailable; fallback pack"));
    }

    #[test]
    fn unknown_tool_run_fails() {
        let ledger = InMemoryLedger::new(CaptureLevel::Summary);
        let ctx = run_with_tool(&ledger);
        let empty = InMemoryLedger::new(CaptureLevel::Summary);
        assert!(matches!(
            render(&ctx, &empty),
            Err(ReplayError::UnresolvedToolRun { .. })
        ));
    }
}
