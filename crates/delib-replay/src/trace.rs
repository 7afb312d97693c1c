//! Trace graph projection
//!
//! A deterministic graph of a run: move events, the tool runs they invoked,
//! the artifacts their latest committed outputs contain, and the evidence
//! those artifacts cite. Edges point from a dependent to what it depends on,
//! so everything reachable from a trajectory is its support.

use delib_grammar::{MoveEvent, MoveOutput, MoveType, RunContext};
use delib_ledger::{EvidenceRef, ToolRun};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of artifact a trace node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Framing,
    Scenario,
    Issue,
    Pack,
    EvidenceStatement,
    Interpretation,
    Assumption,
    Consideration,
    Weighing,
    Negotiation,
    Trajectory,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Framing => "framing",
            ArtifactKind::Scenario => "scenario",
            ArtifactKind::Issue => "issue",
            ArtifactKind::Pack => "pack",
            ArtifactKind::EvidenceStatement => "evidence",
            ArtifactKind::Interpretation => "interpretation",
            ArtifactKind::Assumption => "assumption",
            ArtifactKind::Consideration => "consideration",
            ArtifactKind::Weighing => "weighing",
            ArtifactKind::Negotiation => "negotiation",
            ArtifactKind::Trajectory => "trajectory",
        }
    }

    /// Stable node key for an artifact id
    #[must_use]
    pub fn key(self, id: &str) -> String {
        format!("{}:{id}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceNodeKind {
    Event { move_type: MoveType, sequence: u64 },
    ToolRun { tool_name: String },
    Evidence { evidence_ref: EvidenceRef },
    Artifact { artifact: ArtifactKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceNode {
    pub key: String,
    #[serde(flatten)]
    pub kind: TraceNodeKind,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEdgeKind {
    /// event -> artifact in its output
    Produced,
    /// event -> tool run it logged
    Invoked,
    /// backtrack event -> event it backtracked from
    Backtracked,
    /// event -> committed event whose output it consumed
    FedBy,
    /// artifact -> evidence atom
    Cites,
    /// artifact -> assumption it rests on
    Assumes,
    /// artifact -> issue
    Addresses,
    /// artifact -> artifact it reasons from
    DrawsOn,
    /// weighing -> negotiation move it answers
    Responds,
    Supersedes,
    /// weighing or trajectory -> framing or scenario
    Frames,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceEdge {
    pub from: String,
    pub to: String,
    pub kind: TraceEdgeKind,
}

/// Sorted, serializable trace projection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceGraph {
    pub nodes: Vec<TraceNode>,
    pub edges: Vec<TraceEdge>,
    /// References to artifacts that do not exist in the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dangling: Vec<TraceEdge>,
}

impl TraceGraph {
    /// Project a run. `tool_runs` must hold every tool run the events name.
    #[must_use]
    pub fn project(ctx: &RunContext, tool_runs: &BTreeMap<delib_ledger::ToolRunId, ToolRun>) -> Self {
        let mut b = Builder::default();
        for event in &ctx.events {
            b.event(event);
            for id in &event.tool_run_ids {
                let key = format!("tool:{id}");
                let name = tool_runs.get(id).map_or_else(|| "unknown".to_string(), |t| t.tool_name.clone());
                let label = tool_runs
                    .get(id)
                    .map_or_else(|| name.clone(), |t| format!("{} ({})", t.tool_name, t.status.as_str()));
                b.node(key.clone(), TraceNodeKind::ToolRun { tool_name: name }, label);
                b.edge(event_key(event), key, TraceEdgeKind::Invoked);
            }
            if let Some(from) = event.backtracked_from {
                b.edge(event_key(event), format!("event:{from}"), TraceEdgeKind::Backtracked);
            }
            for prior in &event.inputs.prior_events {
                b.edge(event_key(event), format!("event:{prior}"), TraceEdgeKind::FedBy);
            }
        }
        for move_type in MoveType::ALL {
            if let Some(event) = ctx.committed(move_type) {
                if let Some(output) = &event.outputs {
                    b.output(&event_key(event), output);
                }
            }
        }
        b.finish()
    }

    #[must_use]
    pub fn node(&self, key: &str) -> Option<&TraceNode> {
        self.nodes
            .binary_search_by(|n| n.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.nodes[i])
    }

    fn to_petgraph(&self) -> (DiGraph<&str, TraceEdgeKind>, BTreeMap<&str, NodeIndex>) {
        let mut g = DiGraph::new();
        let index: BTreeMap<&str, NodeIndex> = self
            .nodes
            .iter()
            .map(|n| (n.key.as_str(), g.add_node(n.key.as_str())))
            .collect();
        for e in &self.edges {
            if let (Some(&a), Some(&b)) = (index.get(e.from.as_str()), index.get(e.to.as_str())) {
                g.add_edge(a, b, e.kind);
            }
        }
        (g, index)
    }

    /// Whether dependencies form a DAG
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        let (g, _) = self.to_petgraph();
        !petgraph::algo::is_cyclic_directed(&g)
    }

    /// Every evidence atom reachable from `key`, sorted
    #[must_use]
    pub fn support_of(&self, key: &str) -> Vec<EvidenceRef> {
        let (g, index) = self.to_petgraph();
        let Some(&start) = index.get(key) else { return Vec::new() };
        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(&g, start);
        while let Some(ix) = dfs.next(&g) {
            if let Some(TraceNode {
                kind: TraceNodeKind::Evidence { evidence_ref },
                ..
            }) = self.node(g[ix])
            {
                found.insert(evidence_ref.clone());
            }
        }
        found.into_iter().collect()
    }
}

fn event_key(event: &MoveEvent) -> String {
    format!("event:{}", event.id)
}

#[derive(Default)]
struct Builder {
    nodes: BTreeMap<String, TraceNode>,
    edges: BTreeSet<TraceEdge>,
}

impl Builder {
    fn node(&mut self, key: String, kind: TraceNodeKind, label: impl Into<String>) {
        let label = label.into();
        self.nodes
            .entry(key.clone())
            .or_insert(TraceNode { key, kind, label });
    }

    fn edge(&mut self, from: String, to: String, kind: TraceEdgeKind) {
        self.edges.insert(TraceEdge { from, to, kind });
    }

    fn event(&mut self, event: &MoveEvent) {
        let label = match event.backtrack_reason {
            Some(reason) => format!("{} #{} [{}]", event.move_type.label(), event.sequence, reason.code()),
            None => format!("{} #{}", event.move_type.label(), event.sequence),
        };
        self.node(
            event_key(event),
            TraceNodeKind::Event {
                move_type: event.move_type,
                sequence: event.sequence,
            },
            label,
        );
    }

    fn artifact(&mut self, producer: &str, kind: ArtifactKind, id: &str, label: &str) -> String {
        let key = kind.key(id);
        self.node(key.clone(), TraceNodeKind::Artifact { artifact: kind }, label);
        self.edge(producer.to_string(), key.clone(), TraceEdgeKind::Produced);
        key
    }

    fn cites<'a>(&mut self, from: &str, refs: impl IntoIterator<Item = &'a EvidenceRef>) {
        for r in refs {
            let key = format!("atom:{r}");
            self.node(
                key.clone(),
                TraceNodeKind::Evidence {
                    evidence_ref: r.clone(),
                },
                r.to_string(),
            );
            self.edge(from.to_string(), key, TraceEdgeKind::Cites);
        }
    }

    fn links<'a>(&mut self, from: &str, kind: ArtifactKind, ids: impl IntoIterator<Item = &'a String>, edge: TraceEdgeKind) {
        for id in ids {
            self.edge(from.to_string(), kind.key(id), edge);
        }
    }

    fn output(&mut self, producer: &str, output: &MoveOutput) {
        match output {
            MoveOutput::Framing(f) => {
                for x in &f.framings {
                    self.artifact(producer, ArtifactKind::Framing, &x.id, &x.title);
                }
                for s in &f.scenarios {
                    self.artifact(producer, ArtifactKind::Scenario, &s.id, &s.title);
                }
            }
            MoveOutput::IssueSurfacing(i) => {
                for issue in &i.issues {
                    self.artifact(producer, ArtifactKind::Issue, &issue.id, &issue.title);
                }
            }
            MoveOutput::EvidenceCuration(c) => {
                let key = self.artifact(producer, ArtifactKind::Pack, &c.pack.pack_id, &c.pack.purpose);
                self.cites(&key, c.pack.evidence_refs());
            }
            MoveOutput::EvidenceInterpretation(i) => {
                for e in &i.evidence {
                    let key = self.artifact(producer, ArtifactKind::EvidenceStatement, &e.id, &e.text);
                    self.cites(&key, std::iter::once(&e.evidence_ref));
                }
                for a in &i.assumptions {
                    self.artifact(producer, ArtifactKind::Assumption, &a.id, &a.text);
                }
                for x in &i.interpretations {
                    let key = self.artifact(producer, ArtifactKind::Interpretation, &x.id, &x.text);
                    self.cites(&key, &x.evidence_refs);
                    self.links(&key, ArtifactKind::Assumption, &x.assumption_ids, TraceEdgeKind::Assumes);
                    self.links(&key, ArtifactKind::Issue, &x.issue_id, TraceEdgeKind::Addresses);
                }
            }
            MoveOutput::ConsiderationsFormation(c) => {
                for e in &c.entries {
                    let key = self.artifact(producer, ArtifactKind::Consideration, &e.id, &e.statement);
                    self.cites(&key, e.evidence_refs.iter().chain(&e.policy_clauses));
                    self.links(&key, ArtifactKind::Interpretation, &e.interpretation_ids, TraceEdgeKind::DrawsOn);
                    self.links(&key, ArtifactKind::Issue, std::iter::once(&e.issue_id), TraceEdgeKind::Addresses);
                }
            }
            MoveOutput::WeighingAndBalance(w) => {
                for r in &w.records {
                    let key = self.artifact(producer, ArtifactKind::Weighing, &r.id, &r.balance);
                    self.links(&key, ArtifactKind::Consideration, &r.consideration_ids, TraceEdgeKind::DrawsOn);
                    self.links(&key, ArtifactKind::Negotiation, &r.responds_to_negotiation, TraceEdgeKind::Responds);
                    self.links(&key, ArtifactKind::Framing, std::iter::once(&r.framing_id), TraceEdgeKind::Frames);
                    self.links(&key, ArtifactKind::Weighing, &r.supersedes, TraceEdgeKind::Supersedes);
                }
            }
            MoveOutput::NegotiationAndAlteration(n) => {
                for m in &n.moves {
                    let key = self.artifact(producer, ArtifactKind::Negotiation, &m.id, &m.proposal);
                    self.cites(&key, &m.evidence_refs);
                    self.links(&key, ArtifactKind::Consideration, &m.affected_consideration_ids, TraceEdgeKind::DrawsOn);
                }
            }
            MoveOutput::PositioningAndNarration(p) => {
                for t in &p.trajectories {
                    let key = self.artifact(producer, ArtifactKind::Trajectory, &t.id, &t.position);
                    self.cites(&key, &t.evidence_refs);
                    self.links(&key, ArtifactKind::Weighing, &t.weighing_ids, TraceEdgeKind::DrawsOn);
                    self.links(&key, ArtifactKind::Assumption, &t.assumption_ids, TraceEdgeKind::Assumes);
                    self.links(&key, ArtifactKind::Framing, std::iter::once(&t.framing_id), TraceEdgeKind::Frames);
                    self.links(&key, ArtifactKind::Scenario, std::iter::once(&t.scenario_id), TraceEdgeKind::Frames);
                }
            }
        }
    }

    fn finish(self) -> TraceGraph {
        let Builder { nodes, edges: all } = self;
        let mut edges = Vec::new();
        let mut dangling = Vec::new();
        for edge in all {
            if nodes.contains_key(&edge.to) {
                edges.push(edge);
            } else if edge.kind != TraceEdgeKind::Supersedes {
                // superseded weighings live in earlier events, not the current output
                dangling.push(edge);
            }
        }
        TraceGraph {
            nodes: nodes.into_values().collect(),
            edges,
            dangling,
        }
    }
}
