//! Five-stage context assembly
//!
//! frame → generate → traverse → select → shape. Every provider call is
//! recorded in the ledger whether it succeeds or not; failed modalities put
//! the pack in fallback mode instead of failing the assembly.

use crate::error::LatticeError;
use crate::graph::EvidenceLattice;
use crate::node::{Node, NodeId, NodeKind};
use crate::pack::{
    AssemblyStage, AssemblyStep, ContextPack, Omission, OmissionReason, PackAtom, PackBudgets, PackProfile,
};
use crate::retrieval::{Candidate, CandidateSource, Modality, ProviderError, SearchHit, SearchRequest};
use crate::run_graph::RunGraph;
use crate::selection::select;
use crate::traversal::TraversalSpec;
use chrono::Utc;
use delib_ledger::{EvidenceRef, ToolInvocation, ToolRunId, ToolStatus};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

/// An issue the pack should cover, with its own query text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueTarget {
    pub id: String,
    pub query: String,
}

impl IssueTarget {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
        }
    }
}

/// What a move is asking the lattice for
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalFrame {
    pub purpose: String,
    pub profile: PackProfile,
    pub query: String,
    pub issues: Vec<IssueTarget>,
    /// Curator exclusions with their stated reason
    pub exclusions: Vec<(EvidenceRef, String)>,
}

impl RetrievalFrame {
    pub fn new(purpose: impl Into<String>, profile: PackProfile) -> Self {
        Self {
            purpose: purpose.into(),
            profile,
            query: String::new(),
            issues: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn with_issue(mut self, issue: IssueTarget) -> Self {
        self.issues.push(issue);
        self
    }

    #[must_use]
    pub fn with_exclusion(mut self, evidence_ref: EvidenceRef, reason: impl Into<String>) -> Self {
        self.exclusions.push((evidence_ref, reason.into()));
        self
    }

    fn issue_ids(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.id.clone()).collect()
    }
}

struct Query<'a> {
    source: &'a CandidateSource,
    issue: Option<&'a str>,
    request: SearchRequest,
}

/// Builds context packs over a lattice
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    lattice: Arc<EvidenceLattice>,
    sources: Vec<CandidateSource>,
    traversal: TraversalSpec,
    budgets: PackBudgets,
}

impl ContextAssembler {
    pub fn new(lattice: Arc<EvidenceLattice>) -> Self {
        Self {
            lattice,
            sources: Vec::new(),
            traversal: TraversalSpec::default(),
            budgets: PackBudgets::default(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: CandidateSource) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn with_traversal(mut self, traversal: TraversalSpec) -> Self {
        self.traversal = traversal;
        self
    }

    #[must_use]
    pub fn with_budgets(mut self, budgets: PackBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    #[must_use]
    pub fn lattice(&self) -> &Arc<EvidenceLattice> {
        &self.lattice
    }

    #[must_use]
    pub fn budgets(&self) -> &PackBudgets {
        &self.budgets
    }

    /// Assemble a pack for `frame`, growing `run_graph` with whatever it pulls in
    ///
    /// # Errors
    /// `Cancelled` if `cancel` fires while provider calls are outstanding
    /// (the calls are still recorded); `Ledger` or `ProvenanceViolation` if
    /// recording fails.
    pub async fn assemble(
        &self,
        frame: &RetrievalFrame,
        run_graph: &mut RunGraph,
        cancel: &CancellationToken,
    ) -> Result<ContextPack, LatticeError> {
        let budget = self.budgets.for_profile(frame.profile);
        let issue_ids = frame.issue_ids();
        let mut steps = vec![AssemblyStep {
            stage: AssemblyStage::Frame,
            count: frame.issues.len(),
            detail: format!("{:?} pack for {}", frame.profile, frame.purpose),
        }];

        // Generate
        let queries = self.queries(frame, budget.top_k);
        let calls = queries.iter().map(|q| async move {
            let started = Utc::now();
            let result = q.source.provider.search(q.request.clone()).await;
            (started, Utc::now(), result)
        });
        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for q in &queries {
                    self.lattice.ledger().record(
                        ToolInvocation::new(q.source.tool_name(), to_json(&q.request))
                            .failed(ToolStatus::Cancelled, "context assembly cancelled"),
                    )?;
                }
                tracing::warn!(purpose = %frame.purpose, calls = queries.len(), "context assembly cancelled");
                return Err(LatticeError::Cancelled { purpose: frame.purpose.clone() });
            }
            outcomes = join_all(calls) => outcomes,
        };

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut tool_run_ids: Vec<ToolRunId> = Vec::new();
        let mut fallback_reasons: Vec<String> = Vec::new();
        let mut failed = 0;
        for (q, (started, ended, result)) in queries.iter().zip(outcomes) {
            let invocation = ToolInvocation::new(q.source.tool_name(), to_json(&q.request)).timed(started, ended);
            match result {
                Ok(hits) => {
                    let hits: Vec<SearchHit> = hits.into_iter().take(budget.top_k).collect();
                    let run = self.lattice.ledger().record(invocation.with_outputs(to_json(&hits)))?;
                    tool_run_ids.push(run);
                    candidates.extend(
                        hits.into_iter()
                            .map(|hit| Candidate::from_hit(hit, q.source.modality, q.issue, run)),
                    );
                }
                Err(err) => {
                    let run = self
                        .lattice
                        .ledger()
                        .record(invocation.failed(err.tool_status(), err.to_string()))?;
                    tool_run_ids.push(run);
                    failed += 1;
                    tracing::warn!(tool = %q.source.tool_name(), error = %err, "retrieval call failed");
                    let reason = format!("{} retrieval unavailable ({err})", q.source.modality.as_str());
                    if !fallback_reasons.contains(&reason) {
                        fallback_reasons.push(reason);
                    }
                }
            }
        }
        steps.push(AssemblyStep {
            stage: AssemblyStage::Generate,
            count: candidates.len(),
            detail: format!("{} calls, {failed} failed", queries.len()),
        });

        // Traverse
        let lattice = &self.lattice;
        let retrieved_issues: Vec<String> = candidates.iter().flat_map(|c| c.issues.clone()).collect();
        let traversal = run_graph.expand(lattice, &self.traversal, |visited| {
            !issue_ids.is_empty()
                && issue_ids.iter().all(|issue| {
                    retrieved_issues.contains(issue)
                        || visited
                            .keys()
                            .any(|id| lattice.node(id).is_some_and(|n| n.issue_tags().contains(issue)))
                })
        });
        let mut reached = 0;
        for (id, hop) in &traversal.visited {
            if run_graph.anchors().contains(id) {
                continue;
            }
            let Some(node) = lattice.node(id) else { continue };
            let Some(evidence_ref) = node.provenance.evidence_ref.clone() else { continue };
            if !node.kind.is_evidence_atom() {
                continue;
            }
            reached += 1;
            candidates.push(Candidate {
                evidence_ref,
                record_id: id.to_string(),
                score: 0.8 / (*hop).max(1) as f32,
                modality: Modality::Graph,
                issues: node.issue_tags(),
                tool_run_id: None,
                excerpt: Some(node.label.clone()),
            });
        }
        steps.push(AssemblyStep {
            stage: AssemblyStage::Traverse,
            count: reached,
            detail: format!("halt {:?} after {} hops", traversal.halt, traversal.hops_reached),
        });

        // Select
        let selection = select(&candidates, &issue_ids, &budget, &frame.exclusions);
        steps.push(AssemblyStep {
            stage: AssemblyStage::Select,
            count: selection.atoms.len(),
            detail: format!("{} omitted", selection.omissions.len()),
        });

        // Shape
        let mut omissions = selection.omissions;
        let atoms: Vec<PackAtom> = if frame.profile == PackProfile::Tight && !issue_ids.is_empty() {
            let (on_issue, off_issue): (Vec<_>, Vec<_>) = selection
                .atoms
                .into_iter()
                .partition(|a| a.issues.iter().any(|i| issue_ids.contains(i)));
            omissions.extend(
                off_issue
                    .into_iter()
                    .map(|a| Omission::new(a.evidence_ref, OmissionReason::OffIssue)),
            );
            on_issue
        } else {
            selection.atoms
        };
        for atom in &atoms {
            let id = self.ensure_atom(atom)?;
            run_graph.include(id);
        }
        let uncovered_issues: Vec<String> = issue_ids
            .iter()
            .filter(|i| !atoms.iter().any(|a| a.issues.contains(i)))
            .cloned()
            .collect();
        steps.push(AssemblyStep {
            stage: AssemblyStage::Shape,
            count: atoms.len(),
            detail: format!("{} issues uncovered", uncovered_issues.len()),
        });

        let pack = ContextPack {
            pack_id: format!("pack:{}", Ulid::new()),
            purpose: frame.purpose.clone(),
            profile: frame.profile,
            atoms,
            omissions,
            uncovered_issues,
            fallback_mode: !fallback_reasons.is_empty(),
            fallback_reasons,
            partial: traversal.budget_exhausted(),
            halt: traversal.halt,
            steps,
            tool_run_ids,
        };
        tracing::info!(
            pack = %pack.pack_id,
            purpose = %pack.purpose,
            atoms = pack.atoms.len(),
            omissions = pack.omissions.len(),
            fallback = pack.fallback_mode,
            partial = pack.partial,
            "context pack assembled"
        );
        Ok(pack)
    }

    fn queries<'a>(&'a self, frame: &'a RetrievalFrame, top_k: usize) -> Vec<Query<'a>> {
        let mut out = Vec::new();
        for source in &self.sources {
            let request = |query: String| SearchRequest {
                index: source.index.clone(),
                query,
                filters: BTreeMap::new(),
                top_k,
                strategy: source.strategy,
            };
            if frame.issues.is_empty() {
                out.push(Query {
                    source,
                    issue: None,
                    request: request(frame.query.clone()),
                });
            }
            for issue in &frame.issues {
                let text = format!("{} {}", frame.query, issue.query).trim().to_string();
                out.push(Query {
                    source,
                    issue: Some(issue.id.as_str()),
                    request: request(text),
                });
            }
        }
        out
    }

    fn ensure_atom(&self, atom: &PackAtom) -> Result<NodeId, LatticeError> {
        let kind = match atom.modality {
            Modality::Text => NodeKind::Chunk,
            Modality::Spatial => NodeKind::SpatialFeature,
            Modality::Visual => NodeKind::VisualAsset,
            Modality::Precedent => NodeKind::Precedent,
            Modality::Graph => return Ok(NodeId::evidence(&atom.evidence_ref)),
        };
        let label = atom
            .excerpt
            .clone()
            .unwrap_or_else(|| atom.evidence_ref.to_string());
        let node = Node::atom(kind, atom.evidence_ref.clone(), label).with_properties(json!({
            "issues": atom.issues,
            "modality": atom.modality.as_str(),
        }));
        self.lattice.ensure_node(node)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}
