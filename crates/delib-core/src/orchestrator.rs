//! The grammar orchestrator
//!
//! Drives a run through the eight moves. Each call to
//! [`Orchestrator::execute`]:
//!
//! 1. takes the run's single-writer lock
//! 2. rebuilds the [`RunContext`] from the event store and checks the
//!    transition (precondition failures return before anything is written)
//! 3. runs the move body under the move's time budget, recording every
//!    provider call in the ledger
//! 4. gates the candidate output through the governance linter
//! 5. writes the output's lineage into the lattice and appends the event
//!
//! Failures after step 2 are appended as `error` events so the history shows
//! every attempt. Nothing is retried here.

use crate::config::EngineConfig;
use crate::error::{ConfigError, CoreError};
use crate::lineage;
use crate::prompts;
use crate::provider::{
    DocParseProvider, DocumentSource, LanguageProvider, RasterRef, SegmentationProvider, VectorizationProvider,
};
use crate::tools::ToolRunner;
use chrono::Utc;
use dashmap::DashMap;
use delib_governance::{CheckCode, Finding, GovernanceReport, Linter};
use delib_grammar::{
    check_transition, CurationOutput, EventStore, FramingOutput, GovernanceOverride, InMemoryEventStore,
    InterpretationDraft, InterpretationOutput, IssuesOutput, MoveEvent, MoveOutput, MoveStatus, MoveType, Run,
    RunContext, RunStatus, RunStatusMark, Scenario, ScenarioFramingPair, Statement, Transition, TruthStatusError,
    BacktrackReason,
};
use delib_lattice::{
    ingest_document, select, AssemblyStage, AssemblyStep, Candidate, CandidateSource, ContextAssembler, ContextPack,
    Edge, EdgeKind, EvidenceLattice, IngestReport, IssueTarget, Node, NodeId, NodeKind, PackProfile, RetrievalFrame,
    RunGraph,
};
use delib_ledger::{ContentHash, EvidenceRef, InMemoryLedger, Provenance, ProvenanceLedger, RunId, ToolRunId};
use delib_replay::{check_invariants, diff_runs, render, InvariantReport, Rendered, ReplayEngine, RunDiff};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One requested move
#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub move_type: MoveType,
    /// Required when returning to an earlier move, rejected otherwise
    pub backtrack: Option<BacktrackReason>,
    /// Free-text steer passed to the model
    pub guidance: Option<String>,
    /// Curator exclusions; only evidence curation reads these
    pub exclusions: Vec<(EvidenceRef, String)>,
    pub cancel: CancellationToken,
}

impl MoveRequest {
    #[must_use]
    pub fn new(move_type: MoveType) -> Self {
        Self {
            move_type,
            backtrack: None,
            guidance: None,
            exclusions: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn backtracking(mut self, reason: BacktrackReason) -> Self {
        self.backtrack = Some(reason);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn excluding(mut self, evidence_ref: EvidenceRef, reason: impl Into<String>) -> Self {
        self.exclusions.push((evidence_ref, reason.into()));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of [`Orchestrator::complete`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub mark: RunStatusMark,
    pub invariants: InvariantReport,
    /// Hash of the rendered artifact the verdict was reached on
    pub artifact_hash: ContentHash,
}

impl CompletionReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.mark.status == RunStatus::Complete
    }
}

/// Lattice nodes written by [`Orchestrator::analyse_raster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterAnalysis {
    pub mask: NodeId,
    pub features: Vec<NodeId>,
    pub tool_run_ids: Vec<ToolRunId>,
}

/// What a move body accumulates; survives the body being dropped on timeout
#[derive(Debug, Default)]
struct MoveScope {
    tool_run_ids: Vec<ToolRunId>,
    uncertainty: Vec<String>,
    pack_id: Option<String>,
}

impl MoveScope {
    fn adopt(&mut self, pack: &ContextPack) {
        self.pack_id = Some(pack.pack_id.clone());
        for line in pack.limitations() {
            if !self.uncertainty.contains(&line) {
                self.uncertainty.push(line);
            }
        }
    }
}

fn pack_status(pack: &ContextPack) -> MoveStatus {
    if pack.partial {
        MoveStatus::Partial
    } else {
        MoveStatus::Success
    }
}

fn parse<T: DeserializeOwned>(move_type: MoveType, json: Value) -> Result<T, CoreError> {
    serde_json::from_value(json).map_err(|e| CoreError::MalformedOutput {
        move_type,
        reason: e.to_string(),
    })
}

/// Requested pairs default to every scenario under every framing, and a run
/// with no scenarios assesses the proposal as submitted
fn settle_framing(mut out: FramingOutput) -> Result<FramingOutput, CoreError> {
    let malformed = |reason: String| CoreError::MalformedOutput {
        move_type: MoveType::Framing,
        reason,
    };
    if out.framings.is_empty() {
        return Err(malformed("no framing proposed".into()));
    }
    if out.scenarios.is_empty() {
        out.scenarios.push(Scenario {
            id: "as-submitted".into(),
            title: "Proposal as submitted".into(),
            description: String::new(),
        });
    }
    if out.requested_pairs.is_empty() {
        out.requested_pairs = out
            .scenarios
            .iter()
            .flat_map(|s| {
                out.framings.iter().map(|f| ScenarioFramingPair {
                    scenario_id: s.id.clone(),
                    framing_id: f.id.clone(),
                })
            })
            .collect();
    }
    for pair in &out.requested_pairs {
        if !out.scenarios.iter().any(|s| s.id == pair.scenario_id)
            || !out.framings.iter().any(|f| f.id == pair.framing_id)
        {
            return Err(malformed(format!(
                "requested pair ({}, {}) names an unknown scenario or framing",
                pair.scenario_id, pair.framing_id
            )));
        }
    }
    Ok(out)
}

/// Classify every drafted claim; one bad claim rejects the draft
fn classify(draft: InterpretationDraft) -> Result<InterpretationOutput, TruthStatusError> {
    let mut out = InterpretationOutput::default();
    for claim in draft.claims {
        match claim.classify()? {
            Statement::Evidence(e) => out.evidence.push(e),
            Statement::Interpretation(i) => out.interpretations.push(i),
            Statement::Assumption(a) => out.assumptions.push(a),
        }
    }
    Ok(out)
}

/// Builds an [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: EngineConfig,
    language: Option<Arc<dyn LanguageProvider>>,
    sources: Vec<CandidateSource>,
    store: Option<Arc<dyn EventStore>>,
    ledger: Option<Arc<dyn ProvenanceLedger>>,
    lattice: Option<Arc<EvidenceLattice>>,
    segmentation: Option<Arc<dyn SegmentationProvider>>,
    vectorization: Option<Arc<dyn VectorizationProvider>>,
    doc_parser: Option<Arc<dyn DocParseProvider>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            language: None,
            sources: Vec::new(),
            store: None,
            ledger: None,
            lattice: None,
            segmentation: None,
            vectorization: None,
            doc_parser: None,
        }
    }

    #[must_use]
    pub fn with_language(mut self, provider: Arc<dyn LanguageProvider>) -> Self {
        self.language = Some(provider);
        self
    }

    /// Add a modality generator used by context assembly
    #[must_use]
    pub fn with_source(mut self, source: CandidateSource) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Ignored when a lattice is supplied; the lattice's ledger wins
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn ProvenanceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[must_use]
    pub fn with_lattice(mut self, lattice: Arc<EvidenceLattice>) -> Self {
        self.lattice = Some(lattice);
        self
    }

    #[must_use]
    pub fn with_segmentation(mut self, provider: Arc<dyn SegmentationProvider>) -> Self {
        self.segmentation = Some(provider);
        self
    }

    #[must_use]
    pub fn with_vectorization(mut self, provider: Arc<dyn VectorizationProvider>) -> Self {
        self.vectorization = Some(provider);
        self
    }

    #[must_use]
    pub fn with_doc_parser(mut self, provider: Arc<dyn DocParseProvider>) -> Self {
        self.doc_parser = Some(provider);
        self
    }

    /// # Errors
    /// `Config` if the configuration is invalid or no language provider was
    /// given; `Governance` if a configured identifier pattern does not compile
    pub fn build(self) -> Result<Orchestrator, CoreError> {
        self.config.validate()?;
        let language = self
            .language
            .ok_or_else(|| ConfigError::Invalid("a language provider is required".into()))?;
        let lattice = match (self.lattice, self.ledger) {
            (Some(lattice), _) => lattice,
            (None, Some(ledger)) => Arc::new(EvidenceLattice::new(ledger)),
            (None, None) => Arc::new(EvidenceLattice::new(Arc::new(InMemoryLedger::new(
                self.config.capture.level,
            )))),
        };
        let ledger = lattice.ledger().clone();
        let assembler = self.sources.into_iter().fold(
            ContextAssembler::new(lattice.clone())
                .with_traversal(self.config.traversal.to_spec())
                .with_budgets(self.config.packs.clone()),
            ContextAssembler::with_source,
        );

        Ok(Orchestrator {
            linter: Linter::new(self.config.governance.clone())?,
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryEventStore::new())),
            tools: ToolRunner::new(ledger.clone()),
            ledger,
            lattice,
            assembler,
            language,
            segmentation: self.segmentation,
            vectorization: self.vectorization,
            doc_parser: self.doc_parser,
            runs: DashMap::new(),
            config: self.config,
        })
    }
}

/// Drives runs through the grammar
pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<dyn EventStore>,
    ledger: Arc<dyn ProvenanceLedger>,
    lattice: Arc<EvidenceLattice>,
    assembler: ContextAssembler,
    tools: ToolRunner,
    linter: Linter,
    language: Arc<dyn LanguageProvider>,
    segmentation: Option<Arc<dyn SegmentationProvider>>,
    vectorization: Option<Arc<dyn VectorizationProvider>>,
    doc_parser: Option<Arc<dyn DocParseProvider>>,
    /// Per-run single-writer lock guarding the run's working subgraph
    runs: DashMap<RunId, Arc<Mutex<RunGraph>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("language", &self.language.name())
            .field("assembler", &self.assembler)
            .field("store", &self.store)
            .field("active_runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[inline]
    #[must_use]
    pub fn builder(config: EngineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn ProvenanceLedger> {
        &self.ledger
    }

    #[inline]
    #[must_use]
    pub fn lattice(&self) -> &Arc<EvidenceLattice> {
        &self.lattice
    }

    #[inline]
    #[must_use]
    pub fn linter(&self) -> &Linter {
        &self.linter
    }

    /// A replay engine over the same records, with no providers attached
    #[must_use]
    pub fn replay_engine(&self) -> ReplayEngine {
        ReplayEngine::new(self.store.clone(), self.ledger.clone())
    }

    fn slot(&self, run_id: RunId) -> Result<Arc<Mutex<RunGraph>>, CoreError> {
        if let Some(slot) = self.runs.get(&run_id) {
            return Ok(slot.value().clone());
        }
        let run = self.store.run(run_id)?;
        Ok(self
            .runs
            .entry(run_id)
            .or_insert_with(|| Arc::new(Mutex::new(RunGraph::new(run_id, run.anchors))))
            .value()
            .clone())
    }

    /// Register a new run
    ///
    /// # Errors
    /// `Store` if a run with the same id exists
    #[tracing::instrument(skip(self, run), fields(run_id = %run.run_id))]
    pub fn start_run(&self, run: Run) -> Result<RunId, CoreError> {
        let run_id = run.run_id;
        self.store.create_run(run)?;
        tracing::info!("run started");
        Ok(run_id)
    }

    pub fn context(&self, run_id: RunId) -> Result<RunContext, CoreError> {
        Ok(self.store.context(run_id)?)
    }

    /// Execute one move
    ///
    /// Returns the appended event. A move that runs out of time is appended
    /// as `partial` without outputs and returned as `Ok`.
    ///
    /// # Errors
    /// - `Precondition` when the grammar does not allow the move; nothing is
    ///   appended
    /// - `RunClosed` once the run has been marked complete
    /// - `GovernanceHardFailure`, `TruthStatus`, `MalformedOutput`,
    ///   `ToolFailure`, `Cancelled` and `ProvenanceViolation` after an
    ///   `error` event has been appended
    #[tracing::instrument(skip(self, run_id, request), fields(%run_id, move_type = %request.move_type))]
    pub async fn execute(&self, run_id: RunId, request: MoveRequest) -> Result<MoveEvent, CoreError> {
        let slot = self.slot(run_id)?;
        let mut run_graph = slot.lock().await;

        if let Some(mark) = self.store.status(run_id)? {
            if mark.status == RunStatus::Complete {
                return Err(CoreError::RunClosed { run_id });
            }
        }
        let ctx = self.store.context(run_id)?;
        let move_type = request.move_type;
        let transition = check_transition(&ctx, move_type, request.backtrack)?;

        let mut event = MoveEvent::pending(run_id, move_type, ctx.next_sequence());
        if let Transition::Backtrack { from, reason } = transition {
            tracing::info!(%from, %reason, "backtracking");
            event = event.backtracking(from, reason);
        }
        event.inputs.prior_events = MoveType::ALL
            .into_iter()
            .filter(|m| *m < move_type)
            .filter_map(|m| ctx.committed(m))
            .map(|e| e.id)
            .collect();

        let cancel = request.cancel.child_token();
        let budget = self.config.moves.timeout_for(move_type);
        let mut scope = MoveScope::default();
        let outcome = {
            let body = self.run_move(&ctx, &request, &mut run_graph, &mut scope, &cancel);
            tokio::pin!(body);
            match tokio::time::timeout(budget, &mut body).await {
                Ok(result) => Some(result),
                Err(_) => {
                    cancel.cancel();
                    if let Err(err) = body.await {
                        tracing::debug!(error = %err, "timed-out move unwound");
                    }
                    None
                }
            }
        };

        event.tool_run_ids = std::mem::take(&mut scope.tool_run_ids);
        event.inputs.pack_id = scope.pack_id.take();
        event.uncertainty = std::mem::take(&mut scope.uncertainty);

        let Some(result) = outcome else {
            tracing::warn!(budget_secs = budget.as_secs(), "move timed out");
            event.status = MoveStatus::Partial;
            event.uncertainty.push(format!(
                "{} did not finish within {}s; no output was committed.",
                move_type.label(),
                budget.as_secs()
            ));
            return self.append(event);
        };

        let (output, status) = match result {
            Ok(done) => done,
            Err(err) => {
                let err = match err {
                    CoreError::ToolFailure { .. } | CoreError::Lattice(_) if cancel.is_cancelled() => {
                        CoreError::Cancelled { run_id, move_type }
                    }
                    other => other,
                };
                return self.reject(event, err);
            }
        };
        if let Some(id) = output.duplicate_id() {
            let reason = format!("artifact id {id} appears more than once");
            return self.reject(event, CoreError::MalformedOutput { move_type, reason });
        }
        let mut event = event.with_outputs(status, output);

        let decision = self.linter.gate(&ctx, &event);
        if decision.is_blocked() {
            return self.reject(
                event,
                CoreError::GovernanceHardFailure {
                    run_id,
                    move_type,
                    findings: decision.blocking,
                },
            );
        }
        event.annotations = decision.annotations.iter().map(Finding::annotation).collect();

        if let Err(err) = lineage::record_move(&self.lattice, &ctx, &event) {
            return self.reject(event, err.into());
        }
        self.append(event)
    }

    fn append(&self, mut event: MoveEvent) -> Result<MoveEvent, CoreError> {
        event.ended_at = Utc::now();
        self.store.append(event.clone())?;
        tracing::info!(
            sequence = event.sequence,
            status = ?event.status,
            tool_runs = event.tool_run_ids.len(),
            "move event appended"
        );
        Ok(event)
    }

    fn reject(&self, event: MoveEvent, err: CoreError) -> Result<MoveEvent, CoreError> {
        tracing::warn!(error = %err, "move failed");
        self.append(event.failed(err.to_string()))?;
        Err(err)
    }

    async fn run_move(
        &self,
        ctx: &RunContext,
        request: &MoveRequest,
        run_graph: &mut RunGraph,
        scope: &mut MoveScope,
        cancel: &CancellationToken,
    ) -> Result<(MoveOutput, MoveStatus), CoreError> {
        let move_type = request.move_type;
        match move_type {
            MoveType::Framing => {
                let json = self.generate(ctx, request, None, scope, cancel).await?;
                let out = settle_framing(parse(move_type, json)?)?;
                Ok((MoveOutput::Framing(out), MoveStatus::Success))
            }
            MoveType::IssueSurfacing => {
                let pack = self.assemble(self.issue_frame(ctx), run_graph, scope, cancel).await?;
                let json = self.generate(ctx, request, Some(&pack), scope, cancel).await?;
                let out: IssuesOutput = parse(move_type, json)?;
                Ok((MoveOutput::IssueSurfacing(out), pack_status(&pack)))
            }
            MoveType::EvidenceCuration => {
                let frame = self.curation_frame(ctx, request);
                let pack = self.assemble(frame, run_graph, scope, cancel).await?;
                let status = pack_status(&pack);
                Ok((MoveOutput::EvidenceCuration(CurationOutput { pack }), status))
            }
            MoveType::EvidenceInterpretation => {
                let tight = self.narrow(ctx)?;
                scope.adopt(&tight);
                let json = self.generate(ctx, request, Some(&tight), scope, cancel).await?;
                let mut out = classify(parse(move_type, json)?)?;
                out.limitations = tight.limitations();
                Ok((MoveOutput::EvidenceInterpretation(out), pack_status(&tight)))
            }
            _ => {
                let pack = curated(ctx, move_type)?.clone();
                scope.adopt(&pack);
                let json = self.generate(ctx, request, Some(&pack), scope, cancel).await?;
                let out = MoveOutput::from_json(move_type, json).map_err(|e| CoreError::MalformedOutput {
                    move_type,
                    reason: e.to_string(),
                })?;
                Ok((out, pack_status(&pack)))
            }
        }
    }

    async fn generate(
        &self,
        ctx: &RunContext,
        request: &MoveRequest,
        pack: Option<&ContextPack>,
        scope: &mut MoveScope,
        cancel: &CancellationToken,
    ) -> Result<Value, CoreError> {
        let structured = prompts::build_request(ctx, request.move_type, pack, request.guidance.as_deref());
        let outcome = self.tools.generate(self.language.as_ref(), structured, cancel).await?;
        scope.tool_run_ids.push(outcome.tool_run_id);
        Ok(outcome.into_result()?.json)
    }

    async fn assemble(
        &self,
        frame: RetrievalFrame,
        run_graph: &mut RunGraph,
        scope: &mut MoveScope,
        cancel: &CancellationToken,
    ) -> Result<ContextPack, CoreError> {
        let pack = self.assembler.assemble(&frame, run_graph, cancel).await?;
        scope.tool_run_ids.extend(pack.tool_run_ids.iter().copied());
        scope.adopt(&pack);
        if pack.fallback_mode {
            tracing::warn!(pack = %pack.pack_id, reasons = ?pack.fallback_reasons, "pack assembled in fallback mode");
        }
        Ok(pack)
    }

    fn issue_frame(&self, ctx: &RunContext) -> RetrievalFrame {
        let mut query = ctx.run.brief.clone();
        for framing in ctx.framing().map(|f| f.framings.as_slice()).unwrap_or_default() {
            query.push(' ');
            query.push_str(&framing.goal);
        }
        RetrievalFrame::new(MoveType::IssueSurfacing.as_str(), PackProfile::Broad).with_query(query)
    }

    fn curation_frame(&self, ctx: &RunContext, request: &MoveRequest) -> RetrievalFrame {
        let issues = ctx.issues().map(|i| i.issues.as_slice()).unwrap_or_default();
        let frame = issues.iter().fold(
            RetrievalFrame::new(MoveType::EvidenceCuration.as_str(), PackProfile::Balanced)
                .with_query(ctx.run.brief.clone()),
            |frame, issue| {
                let query = issue.query.clone().unwrap_or_else(|| issue.title.clone());
                frame.with_issue(IssueTarget::new(issue.id.clone(), query))
            },
        );
        request
            .exclusions
            .iter()
            .cloned()
            .fold(frame, |frame, (r, why)| frame.with_exclusion(r, why))
    }

    /// Tight pack for interpretation: the curated atoms re-selected under
    /// the tight budget, keeping the curated pack's record of what was left out
    fn narrow(&self, ctx: &RunContext) -> Result<ContextPack, CoreError> {
        let curated = curated(ctx, MoveType::EvidenceInterpretation)?;
        let issues: Vec<String> = ctx
            .issues()
            .map(|out| out.issues.iter().map(|i| i.id.clone()).collect())
            .unwrap_or_default();
        let candidates: Vec<Candidate> = curated
            .atoms
            .iter()
            .map(|a| Candidate {
                evidence_ref: a.evidence_ref.clone(),
                record_id: a.evidence_ref.to_string(),
                score: a.score,
                modality: a.modality,
                issues: a.issues.clone(),
                tool_run_id: a.tool_run_id,
                excerpt: a.excerpt.clone(),
            })
            .collect();
        let selection = select(&candidates, &issues, &self.config.packs.tight, &[]);

        let mut steps = curated.steps.clone();
        steps.push(AssemblyStep {
            stage: AssemblyStage::Shape,
            count: selection.atoms.len(),
            detail: format!("tight pack narrowed from {} curated atoms", curated.atoms.len()),
        });
        let mut omissions = curated.omissions.clone();
        omissions.extend(selection.omissions);
        Ok(ContextPack {
            pack_id: format!("{}/tight", curated.pack_id),
            purpose: MoveType::EvidenceInterpretation.as_str().to_string(),
            profile: PackProfile::Tight,
            atoms: selection.atoms,
            omissions,
            uncovered_issues: selection.uncovered_issues,
            fallback_mode: curated.fallback_mode,
            fallback_reasons: curated.fallback_reasons.clone(),
            partial: curated.partial,
            halt: curated.halt,
            steps,
            tool_run_ids: curated.tool_run_ids.clone(),
        })
    }

    /// Lint the run as it stands
    pub fn report(&self, run_id: RunId) -> Result<GovernanceReport, CoreError> {
        Ok(self.linter.lint(&self.store.context(run_id)?))
    }

    /// Accept a hard finding explicitly
    ///
    /// The finding stays in later reports, listed as overridden.
    ///
    /// # Errors
    /// `Store` for an unknown run or a blank justification
    #[tracing::instrument(skip(self, justification))]
    pub fn override_finding(
        &self,
        run_id: RunId,
        check: CheckCode,
        target: &str,
        justification: &str,
    ) -> Result<GovernanceOverride, CoreError> {
        let record = GovernanceOverride {
            run_id,
            check: check.as_str().to_string(),
            target: target.to_string(),
            justification: justification.to_string(),
            at: Utc::now(),
        };
        self.store.record_override(record.clone())?;
        tracing::warn!("governance finding overridden");
        Ok(record)
    }

    /// Evaluate the run's terminal condition and mark it
    ///
    /// A non-conformant run stays open for further moves.
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, run_id: RunId) -> Result<CompletionReport, CoreError> {
        let slot = self.slot(run_id)?;
        let _guard = slot.lock().await;

        let ctx = self.store.context(run_id)?;
        let rendered = render(&ctx, self.ledger.as_ref())?;
        let invariants = check_invariants(&ctx, &rendered.trace, &self.linter);
        let mark = RunStatusMark {
            run_id,
            status: if invariants.holds() {
                RunStatus::Complete
            } else {
                RunStatus::NonConformant
            },
            reasons: invariants.reasons(),
            at: Utc::now(),
        };
        self.store.mark_status(mark.clone())?;
        if mark.status == RunStatus::Complete {
            tracing::info!(hash = %rendered.hash.short(), "run complete");
        } else {
            tracing::warn!(reasons = ?mark.reasons, "run does not conform");
        }
        Ok(CompletionReport {
            mark,
            invariants,
            artifact_hash: rendered.hash,
        })
    }

    pub fn render(&self, run_id: RunId) -> Result<Rendered, CoreError> {
        Ok(render(&self.store.context(run_id)?, self.ledger.as_ref())?)
    }

    /// Compare a run with another, usually the one it supersedes
    pub fn diff(&self, from: RunId, to: RunId) -> Result<RunDiff, CoreError> {
        let a = self.render(from)?;
        let b = self.render(to)?;
        Ok(diff_runs(&a.artifact, &b.artifact))
    }

    /// Parse a document and write its chunks and tables into the lattice
    #[tracing::instrument(skip(self, source, cancel), fields(source = %source.source_id))]
    pub async fn ingest(&self, source: DocumentSource, cancel: &CancellationToken) -> Result<IngestReport, CoreError> {
        let parser = self
            .doc_parser
            .as_ref()
            .ok_or_else(|| CoreError::tool_failure("docparse", None, "no document parser configured"))?;
        let outcome = self.tools.parse(parser.as_ref(), source, cancel).await?;
        let tool_run_id = outcome.tool_run_id;
        let mut doc = outcome.into_result()?;
        doc.tool_run_id = Some(tool_run_id);
        Ok(ingest_document(&self.lattice, &doc)?)
    }

    /// Segment a raster, trace its features and add both to the lattice
    ///
    /// The mask and each feature become evidence atoms under the raster's
    /// source, with fragments `{fragment}#mask` and `{fragment}#feature/{id}`.
    #[tracing::instrument(skip(self, raster, cancel), fields(raster = %raster.evidence_ref))]
    pub async fn analyse_raster(
        &self,
        raster: RasterRef,
        cancel: &CancellationToken,
    ) -> Result<RasterAnalysis, CoreError> {
        let segmenter = self
            .segmentation
            .as_ref()
            .ok_or_else(|| CoreError::tool_failure("segmentation", None, "no segmentation provider configured"))?;
        let vectorizer = self
            .vectorization
            .as_ref()
            .ok_or_else(|| CoreError::tool_failure("vectorization", None, "no vectorization provider configured"))?;

        let segmented = self.tools.segment(segmenter.as_ref(), raster.clone(), cancel).await?;
        let mask_run = segmented.tool_run_id;
        let mask = segmented.into_result()?;
        let traced = self
            .tools
            .vectorize(vectorizer.as_ref(), raster.clone(), Some(mask.clone()), cancel)
            .await?;
        let features_run = traced.tool_run_id;
        let features = traced.into_result()?;

        let source = &raster.evidence_ref;
        let asset = self
            .lattice
            .ensure_node(Node::atom(NodeKind::VisualAsset, source.clone(), raster.uri.clone()))?;

        let mask_ref = EvidenceRef::new(source.source_type(), source.source_id(), format!("{}#mask", source.fragment()))?;
        let mut mask_node = Node::atom(NodeKind::InstrumentOutput, mask_ref.clone(), format!("{} mask", mask.label))
            .with_properties(json!({
                "width": mask.width,
                "height": mask.height,
                "confidence": mask.confidence,
            }));
        mask_node.provenance = mask_node.provenance.with_tool_run(mask_run);
        let mask_id = self.lattice.ensure_node(mask_node)?;
        self.lattice.add_edge(Edge::new(
            mask_id.clone(),
            asset,
            EdgeKind::ProducedBy,
            Provenance::evidence(mask_ref).with_tool_run(mask_run),
        ))?;

        let mut feature_ids = Vec::with_capacity(features.len());
        for feature in features {
            let feature_ref = EvidenceRef::new(
                source.source_type(),
                source.source_id(),
                format!("{}#feature/{}", source.fragment(), feature.id),
            )?;
            let mut properties = match feature.properties {
                Value::Object(map) => Value::Object(map),
                _ => json!({}),
            };
            properties["geometry"] = feature.geometry;
            let mut node = Node::atom(NodeKind::SpatialFeature, feature_ref.clone(), feature.label)
                .with_properties(properties);
            node.provenance = node.provenance.with_tool_run(features_run);
            let id = self.lattice.ensure_node(node)?;
            self.lattice.add_edge(Edge::new(
                id.clone(),
                mask_id.clone(),
                EdgeKind::ProducedBy,
                Provenance::evidence(feature_ref).with_tool_run(features_run),
            ))?;
            feature_ids.push(id);
        }
        tracing::info!(features = feature_ids.len(), "raster analysed");

        Ok(RasterAnalysis {
            mask: mask_id,
            features: feature_ids,
            tool_run_ids: vec![mask_run, features_run],
        })
    }
}

fn curated(ctx: &RunContext, move_type: MoveType) -> Result<&ContextPack, CoreError> {
    ctx.curation()
        .map(|c| &c.pack)
        .ok_or_else(|| CoreError::MalformedOutput {
            move_type,
            reason: "no committed evidence curation".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use delib_grammar::{ClaimDraft, Framing};

    fn framing(id: &str) -> Framing {
        Framing {
            id: id.into(),
            title: id.into(),
            goal: "meet housing need".into(),
            constraints: vec![],
        }
    }

    #[test]
    fn framing_without_scenarios_assesses_the_submission() {
        let out = settle_framing(FramingOutput {
            framings: vec![framing("f1"), framing("f2")],
            scenarios: vec![],
            requested_pairs: vec![],
        })
        .unwrap();
        assert_eq!(out.scenarios[0].id, "as-submitted");
        assert_eq!(out.requested_pairs.len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn default_pairs_cover_every_combination(n in 1usize..5, m in 0usize..5) {
            let scenarios = (0..m)
                .map(|i| Scenario {
                    id: format!("s{i}"),
                    title: format!("scenario {i}"),
                    description: String::new(),
                })
                .collect();
            let out = settle_framing(FramingOutput {
                framings: (0..n).map(|i| framing(&format!("f{i}"))).collect(),
                scenarios,
                requested_pairs: vec![],
            })
            .unwrap();
            proptest::prop_assert_eq!(out.requested_pairs.len(), n * m.max(1));
            let mut unique = out.requested_pairs.clone();
            unique.sort();
            unique.dedup();
            proptest::prop_assert_eq!(unique.len(), out.requested_pairs.len());
        }
    }

    #[test]
    fn framing_pairs_must_name_known_ids() {
        let err = settle_framing(FramingOutput {
            framings: vec![framing("f1")],
            scenarios: vec![],
            requested_pairs: vec![ScenarioFramingPair {
                scenario_id: "s9".into(),
                framing_id: "f1".into(),
            }],
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::MalformedOutput { move_type: MoveType::Framing, .. }));
        assert!(settle_framing(FramingOutput {
            framings: vec![],
            scenarios: vec![],
            requested_pairs: vec![],
        })
        .is_err());
    }

    #[test]
    fn one_unclassifiable_claim_rejects_the_draft() {
        let r: EvidenceRef = "doc::sfra::zone-3".parse().unwrap();
        let good = ClaimDraft {
            id: "e1".into(),
            text: "The site is in flood zone 3".into(),
            evidence_refs: vec![r],
            ..ClaimDraft::default()
        };
        let uncited = ClaimDraft {
            id: "i1".into(),
            text: "Flooding rules the scheme out".into(),
            inference: true,
            limitations: Some("none stated".into()),
            ..ClaimDraft::default()
        };
        let ok = classify(InterpretationDraft {
            claims: vec![good.clone()],
        })
        .unwrap();
        assert_eq!(ok.evidence.len(), 1);

        let err = classify(InterpretationDraft {
            claims: vec![good, uncited],
        })
        .unwrap_err();
        assert_eq!(err.statement_id(), "i1");
    }

    #[test]
    fn move_requests_build_up() {
        let r: EvidenceRef = "doc::appeal::para-4".parse().unwrap();
        let request = MoveRequest::new(MoveType::EvidenceCuration)
            .backtracking(BacktrackReason::MissingEvidence)
            .excluding(r.clone(), "superseded appeal")
            .with_guidance("prefer recent decisions");
        assert_eq!(request.backtrack, Some(BacktrackReason::MissingEvidence));
        assert_eq!(request.exclusions, vec![(r, "superseded appeal".to_string())]);
        assert!(!request.cancel.is_cancelled());
    }
}
