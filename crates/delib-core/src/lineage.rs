//! Writes committed move outputs into the lattice as derived nodes
//!
//! Node ids are scoped by the producing event (`{kind}:{event id}/{local id}`)
//! so a backtrack never collides with the artifacts it replaces. Every node
//! and edge written here carries the move's last tool run as provenance;
//! edges to nodes the lattice does not hold are skipped. A move's writes are
//! staged in one batch and land together or not at all.

use delib_grammar::{MoveEvent, MoveOutput, MoveType, RunContext};
use delib_lattice::{Edge, EdgeKind, EvidenceLattice, LatticeBatch, LatticeError, Node, NodeId, NodeKind};
use delib_ledger::{EvidenceRef, Provenance};
use serde_json::{json, Value};

struct Writer<'a> {
    lattice: &'a EvidenceLattice,
    ctx: &'a RunContext,
    provenance: Provenance,
    event: &'a MoveEvent,
    move_node: NodeId,
    batch: LatticeBatch,
}

impl Writer<'_> {
    fn local(&self, kind: NodeKind, id: &str) -> NodeId {
        NodeId::derived(kind, format!("{}/{id}", self.event.id))
    }

    /// Node written by the committed event of an earlier move
    fn earlier(&self, move_type: MoveType, kind: NodeKind, id: &str) -> Option<NodeId> {
        self.ctx
            .committed(move_type)
            .map(|e| NodeId::derived(kind, format!("{}/{id}", e.id)))
    }

    fn node(&mut self, kind: NodeKind, id: &str, label: &str, properties: Value) -> Result<NodeId, LatticeError> {
        let node_id = self.batch.add_node(
            Node::derived(self.local(kind, id), kind, label, self.provenance.clone()).with_properties(properties),
        );
        let move_node = self.move_node.clone();
        self.link(&node_id, &move_node, EdgeKind::PartOfMove)?;
        Ok(node_id)
    }

    fn known(&self, id: &NodeId) -> bool {
        self.lattice.contains(id) || self.batch.contains(id)
    }

    fn link(&mut self, src: &NodeId, dst: &NodeId, kind: EdgeKind) -> Result<(), LatticeError> {
        if !self.known(src) || !self.known(dst) {
            tracing::debug!(%src, %dst, ?kind, "lineage edge skipped");
            return Ok(());
        }
        self.batch
            .add_edge(Edge::new(src.clone(), dst.clone(), kind, self.provenance.clone()));
        Ok(())
    }

    fn link_earlier(
        &mut self,
        src: &NodeId,
        move_type: MoveType,
        kind: NodeKind,
        id: &str,
        edge: EdgeKind,
        outgoing: bool,
    ) -> Result<(), LatticeError> {
        match self.earlier(move_type, kind, id) {
            Some(other) if outgoing => self.link(src, &other, edge),
            Some(other) => self.link(&other, src, edge),
            None => Ok(()),
        }
    }

    fn cite<'r>(&mut self, src: &NodeId, refs: impl IntoIterator<Item = &'r EvidenceRef>) -> Result<(), LatticeError> {
        for r in refs {
            self.link(src, &NodeId::evidence(r), EdgeKind::Cites)?;
        }
        Ok(())
    }
}

/// Write the event's artifacts; returns the number of nodes added
///
/// Events without tool runs write nothing.
pub(crate) fn record_move(
    lattice: &EvidenceLattice,
    ctx: &RunContext,
    event: &MoveEvent,
) -> Result<usize, LatticeError> {
    let (Some(tool_run), Some(output)) = (event.tool_run_ids.last(), event.outputs.as_ref()) else {
        return Ok(0);
    };
    let provenance = Provenance::tool_run(*tool_run);
    let mut batch = LatticeBatch::new();
    let move_node = batch.add_node(
        Node::derived(
            NodeId::derived(NodeKind::MoveEvent, event.id),
            NodeKind::MoveEvent,
            format!("{} #{}", event.move_type.label(), event.sequence),
            provenance.clone(),
        )
        .with_properties(json!({
            "run_id": event.run_id,
            "move_type": event.move_type,
            "sequence": event.sequence,
            "status": event.status,
        })),
    );
    let mut w = Writer {
        lattice,
        ctx,
        provenance,
        event,
        move_node,
        batch,
    };

    match output {
        MoveOutput::Framing(_) | MoveOutput::EvidenceCuration(_) => {}
        MoveOutput::IssueSurfacing(out) => {
            for issue in &out.issues {
                w.node(
                    NodeKind::Issue,
                    &issue.id,
                    &issue.title,
                    json!({ "issues": [issue.id], "material": issue.material }),
                )?;
            }
        }
        MoveOutput::EvidenceInterpretation(out) => {
            for a in &out.assumptions {
                w.node(NodeKind::Assumption, &a.id, &a.text, json!({ "scope": a.scope }))?;
            }
            for i in &out.interpretations {
                let tags: Vec<&String> = i.issue_id.iter().collect();
                let id = w.node(NodeKind::Interpretation, &i.id, &i.text, json!({ "issues": tags }))?;
                w.cite(&id, i.evidence_refs.iter().chain(&i.policy_clauses))?;
                for a in &i.assumption_ids {
                    let assumption = w.local(NodeKind::Assumption, a);
                    w.link(&assumption, &id, EdgeKind::AssumedIn)?;
                }
                if let Some(issue) = &i.issue_id {
                    w.link_earlier(&id, MoveType::IssueSurfacing, NodeKind::Issue, issue, EdgeKind::Addresses, true)?;
                }
            }
        }
        MoveOutput::ConsiderationsFormation(out) => {
            for c in &out.entries {
                let id = w.node(
                    NodeKind::Consideration,
                    &c.id,
                    &c.statement,
                    json!({ "issues": [c.issue_id], "leaning": c.leaning, "normative": c.normative }),
                )?;
                w.cite(&id, c.evidence_refs.iter().chain(&c.policy_clauses))?;
                w.link_earlier(&id, MoveType::IssueSurfacing, NodeKind::Issue, &c.issue_id, EdgeKind::Addresses, true)?;
                for i in &c.interpretation_ids {
                    w.link_earlier(
                        &id,
                        MoveType::EvidenceInterpretation,
                        NodeKind::Interpretation,
                        i,
                        EdgeKind::Supports,
                        false,
                    )?;
                }
            }
        }
        MoveOutput::WeighingAndBalance(out) => {
            for r in &out.records {
                let id = w.node(
                    NodeKind::WeighingRecord,
                    &r.id,
                    &r.balance,
                    json!({ "framing_id": r.framing_id }),
                )?;
                w.cite(&id, &r.policy_clauses)?;
                for c in &r.consideration_ids {
                    w.link_earlier(
                        &id,
                        MoveType::ConsiderationsFormation,
                        NodeKind::Consideration,
                        c,
                        EdgeKind::Supports,
                        false,
                    )?;
                }
                for n in &r.responds_to_negotiation {
                    w.link_earlier(
                        &id,
                        MoveType::NegotiationAndAlteration,
                        NodeKind::NegotiationMove,
                        n,
                        EdgeKind::Addresses,
                        true,
                    )?;
                }
                if let Some(old) = &r.supersedes {
                    w.link_earlier(
                        &id,
                        MoveType::WeighingAndBalance,
                        NodeKind::WeighingRecord,
                        old,
                        EdgeKind::Supersedes,
                        true,
                    )?;
                }
            }
        }
        MoveOutput::NegotiationAndAlteration(out) => {
            for m in &out.moves {
                let id = w.node(
                    NodeKind::NegotiationMove,
                    &m.id,
                    &m.proposal,
                    json!({ "alters_balance": m.alters_balance }),
                )?;
                w.cite(&id, m.evidence_refs.iter().chain(&m.policy_clauses))?;
                for c in &m.affected_consideration_ids {
                    w.link_earlier(
                        &id,
                        MoveType::ConsiderationsFormation,
                        NodeKind::Consideration,
                        c,
                        EdgeKind::Addresses,
                        true,
                    )?;
                }
            }
        }
        MoveOutput::PositioningAndNarration(out) => {
            for t in &out.trajectories {
                let id = w.node(
                    NodeKind::Trajectory,
                    &t.id,
                    &t.position,
                    json!({ "scenario_id": t.scenario_id, "framing_id": t.framing_id }),
                )?;
                w.cite(&id, t.evidence_refs.iter().chain(&t.policy_clauses))?;
                for r in &t.weighing_ids {
                    w.link_earlier(
                        &id,
                        MoveType::WeighingAndBalance,
                        NodeKind::WeighingRecord,
                        r,
                        EdgeKind::Supports,
                        false,
                    )?;
                }
                for a in &t.assumption_ids {
                    w.link_earlier(
                        &id,
                        MoveType::EvidenceInterpretation,
                        NodeKind::Assumption,
                        a,
                        EdgeKind::AssumedIn,
                        false,
                    )?;
                }
            }
        }
    }

    let written = lattice.apply(w.batch)?;
    tracing::debug!(event = %event.id, nodes = written, "lineage recorded");
    Ok(written)
}
