//! Context assembly over a populated lattice.
//!
//! Core guarantees exercised here:
//! - A traversal that hits its node ceiling yields a pack marked partial, and
//!   the pack's limitations say so.
//! - Assembly never writes a node or edge without provenance.
//! - Selection is reproducible for the same candidate set.

use async_trait::async_trait;
use delib_lattice::{
    ingest_document, CandidateSource, ContextAssembler, Edge, EdgeKind, EvidenceLattice, HaltReason,
    IssueTarget, Modality, NodeId, PackProfile, ParsedChunk, ParsedDocument, ParsedPage, ProviderError,
    RetrievalFrame, RetrievalProvider, RunGraph, SearchHit, SearchRequest, TraversalBudget, TraversalSpec,
};
use delib_ledger::{InMemoryLedger, Provenance, RunId};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Empty;

#[async_trait]
impl RetrievalProvider for Empty {
    fn name(&self) -> &str {
        "empty"
    }

    async fn search(&self, _request: SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Ingest a forty-paragraph document whose paragraphs mention each other in
/// a chain, anchored at the first paragraph.
fn chained_plan(lattice: &EvidenceLattice) -> Vec<NodeId> {
    let doc = ParsedDocument {
        source_type: "doc".into(),
        source_id: "design-code".into(),
        title: "Design Code".into(),
        pages: vec![ParsedPage {
            number: 1,
            chunks: (0..40)
                .map(|i| ParsedChunk {
                    selector: format!("para-{i}"),
                    text: format!("paragraph {i}"),
                    issues: if i == 39 { vec!["heritage".into()] } else { Vec::new() },
                })
                .collect(),
            tables: Vec::new(),
        }],
        tool_run_id: None,
    };
    ingest_document(lattice, &doc).unwrap();
    let ids: Vec<NodeId> = (0..40)
        .map(|i| NodeId::new(format!("doc::design-code::para-{i}")))
        .collect();
    for pair in ids.windows(2) {
        let prov = lattice.node(&pair[0]).unwrap().provenance;
        lattice
            .add_edge(Edge::new(pair[0].clone(), pair[1].clone(), EdgeKind::Mentions, prov))
            .unwrap();
    }
    ids
}

/// Tenet: hitting the traversal ceiling is reported, never silent.
///
/// The only heritage evidence sits 39 hops from the anchor. With a node
/// ceiling of ten, the walk must stop early, the pack must be partial, and
/// the limitation must travel with it.
#[tokio::test]
async fn node_ceiling_yields_partial_pack() {
    let lattice = Arc::new(EvidenceLattice::new(Arc::new(InMemoryLedger::default())));
    let ids = chained_plan(&lattice);
    let traversal = TraversalSpec {
        budget: TraversalBudget { max_hops: 100, max_nodes: 10 },
        edge_kinds: vec![EdgeKind::Mentions],
        ..TraversalSpec::default()
    };
    let assembler = ContextAssembler::new(lattice.clone())
        .with_source(CandidateSource::new(Modality::Text, "docs", Arc::new(Empty)))
        .with_traversal(traversal);
    let mut graph = RunGraph::new(RunId::new(), vec![ids[0].clone()]);
    let frame = RetrievalFrame::new("issue_surfacing", PackProfile::Broad)
        .with_issue(IssueTarget::new("heritage", "listed buildings"));

    let pack = assembler
        .assemble(&frame, &mut graph, &CancellationToken::new())
        .await
        .unwrap();

    assert!(pack.partial);
    assert_eq!(pack.halt, HaltReason::NodeBudget);
    assert_eq!(pack.uncovered_issues, vec!["heritage".to_string()]);
    let limitations = pack.limitations();
    assert!(limitations.iter().any(|l| l.contains("node budget")));
    assert!(limitations.iter().any(|l| l.contains("heritage")));
    assert_eq!(graph.len(), 10);
}

/// Tenet: a generous ceiling reaches the far evidence and is not partial.
#[tokio::test]
async fn generous_ceiling_reaches_coverage() {
    let lattice = Arc::new(EvidenceLattice::new(Arc::new(InMemoryLedger::default())));
    let ids = chained_plan(&lattice);
    let traversal = TraversalSpec {
        budget: TraversalBudget { max_hops: 100, max_nodes: 100 },
        edge_kinds: vec![EdgeKind::Mentions],
        ..TraversalSpec::default()
    };
    let assembler = ContextAssembler::new(lattice.clone()).with_traversal(traversal);
    let mut graph = RunGraph::new(RunId::new(), vec![ids[0].clone()]);
    let frame = RetrievalFrame::new("issue_surfacing", PackProfile::Broad)
        .with_issue(IssueTarget::new("heritage", "listed buildings"));

    let pack = assembler
        .assemble(&frame, &mut graph, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!pack.partial);
    assert_eq!(pack.halt, HaltReason::CoverageAchieved);
    assert!(pack.uncovered_issues.is_empty());
    assert!(pack
        .atoms_for_issue("heritage")
        .any(|a| a.evidence_ref.to_string() == "doc::design-code::para-39"));
}

/// Tenet: every edge in the lattice carries provenance.
#[tokio::test]
async fn lattice_edges_all_carry_provenance() {
    let lattice = Arc::new(EvidenceLattice::new(Arc::new(InMemoryLedger::default())));
    let ids = chained_plan(&lattice);
    let bare = Edge::new(ids[0].clone(), ids[5].clone(), EdgeKind::Supports, Provenance::default());
    assert!(lattice.add_edge(bare).is_err());

    let snapshot = lattice.snapshot();
    assert!(!snapshot.edges.is_empty());
    assert!(snapshot.edges.iter().all(|e| !e.provenance.is_empty()));
    assert!(snapshot.nodes.iter().all(|n| !n.provenance.is_empty()));
}

/// Tenet: a snapshot round-trips through JSON and re-validates on load.
#[test]
fn snapshot_round_trips() {
    let ledger = Arc::new(InMemoryLedger::default());
    let lattice = EvidenceLattice::new(ledger.clone());
    chained_plan(&lattice);
    let json = serde_json::to_string(&lattice.snapshot()).unwrap();
    let restored = EvidenceLattice::from_snapshot(ledger, serde_json::from_str(&json).unwrap()).unwrap();
    assert_eq!(restored.node_count(), lattice.node_count());
    assert_eq!(restored.edge_count(), lattice.edge_count());
}
