//! Loading parsed documents into the lattice
//!
//! Parsing itself (OCR, layout, segmentation) happens upstream; this takes
//! its output and writes a document node, one atom per chunk or table, and
//! `PART_OF` edges back to the document.

use crate::edge::{Edge, EdgeKind};
use crate::error::LatticeError;
use crate::graph::EvidenceLattice;
use crate::node::{Node, NodeKind};
use delib_ledger::{EvidenceRef, Provenance, ToolRunId};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedChunk {
    /// Fragment selector, e.g. `para-12`
    pub selector: String,
    pub text: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTable {
    pub selector: String,
    #[serde(default)]
    pub caption: Option<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPage {
    pub number: u32,
    #[serde(default)]
    pub chunks: Vec<ParsedChunk>,
    #[serde(default)]
    pub tables: Vec<ParsedTable>,
}

/// Output of a document parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub source_type: String,
    pub source_id: String,
    pub title: String,
    pub pages: Vec<ParsedPage>,
    /// Parser run that produced this document, if it was recorded
    #[serde(default)]
    pub tool_run_id: Option<ToolRunId>,
}

/// Counts of what an ingest wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub nodes_added: usize,
    pub edges_added: usize,
}

/// Write a parsed document into the lattice
///
/// Re-ingesting the same document adds nothing; existing nodes are kept as
/// they are.
pub fn ingest_document(lattice: &EvidenceLattice, doc: &ParsedDocument) -> Result<IngestReport, LatticeError> {
    let nodes_before = lattice.node_count();
    let edges_before = lattice.edge_count();
    let with_run = |p: Provenance| match doc.tool_run_id {
        Some(run) => p.with_tool_run(run),
        None => p,
    };

    let doc_ref = EvidenceRef::new(&doc.source_type, &doc.source_id, "document")
        .map_err(|e| LatticeError::provenance(&doc.source_id, e.to_string()))?;
    let mut doc_node = Node::atom(NodeKind::Document, doc_ref, &doc.title)
        .with_properties(json!({ "pages": doc.pages.len() }));
    doc_node.provenance = with_run(doc_node.provenance);
    let doc_id = lattice.ensure_node(doc_node)?;

    for page in &doc.pages {
        let chunks = page.chunks.iter().map(|c| {
            (
                NodeKind::Chunk,
                &c.selector,
                c.text.clone(),
                json!({ "page": page.number, "issues": c.issues }),
            )
        });
        let tables = page.tables.iter().map(|t| {
            (
                NodeKind::Table,
                &t.selector,
                t.caption.clone().unwrap_or_else(|| t.selector.clone()),
                json!({ "page": page.number, "rows": t.rows }),
            )
        });
        for (kind, selector, label, properties) in chunks.chain(tables) {
            let r = EvidenceRef::new(&doc.source_type, &doc.source_id, selector.as_str())
                .map_err(|e| LatticeError::provenance(selector.as_str(), e.to_string()))?;
            let mut node = Node::atom(kind, r.clone(), label).with_properties(properties);
            node.provenance = with_run(node.provenance);
            let id = lattice.ensure_node(node)?;
            lattice.add_edge(Edge::new(id, doc_id.clone(), EdgeKind::PartOf, with_run(Provenance::evidence(r))))?;
        }
    }

    let report = IngestReport {
        nodes_added: lattice.node_count() - nodes_before,
        edges_added: lattice.edge_count() - edges_before,
    };
    tracing::info!(
        source = %doc.source_id,
        nodes = report.nodes_added,
        edges = report.edges_added,
        "document ingested"
    );
    Ok(report)
}
