//! Testing utilities for the Delib workspace
//!
//! Scripted providers, the Mill Lane fixture (a 40-home scheme with a flood
//! issue and a heritage issue) and helpers for wiring an orchestrator.

#![allow(missing_docs)]

use async_trait::async_trait;
use delib_core::{
    DocParseProvider, DocumentSource, EngineConfig, LanguageProvider, Mask, MoveRequest, Orchestrator,
    ProviderError, RasterRef, RetrievalProvider, SegmentationProvider, StructuredRequest, StructuredResponse,
    VectorFeature, VectorizationProvider,
};
use delib_grammar::{MoveEvent, MoveType, Run};
use delib_lattice::{
    CandidateSource, EvidenceLattice, Modality, ParsedChunk, ParsedDocument, ParsedPage, SearchHit, SearchRequest,
};
use delib_ledger::{EvidenceRef, RunId};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BRIEF: &str = "Is a scheme of 40 homes at Mill Lane acceptable?";

pub const SFRA: &str = "doc::sfra::para-3";
pub const FLOOD_POLICY: &str = "doc::local-plan::policy-7";
pub const APPEAL: &str = "doc::appeal-2019::para-14";
pub const APPRAISAL: &str = "doc::conservation::appraisal-2";
pub const HERITAGE_POLICY: &str = "doc::local-plan::policy-12";
pub const SITE_NOTE: &str = "doc::site-visit::note-1";

pub fn r(s: &str) -> EvidenceRef {
    s.parse().unwrap()
}

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Replays canned JSON keyed by prompt id
///
/// Responses for a prompt are served in order; the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedLanguage {
    scripts: Mutex<HashMap<String, VecDeque<Value>>>,
    requests: Mutex<Vec<StructuredRequest>>,
    calls: AtomicUsize,
}

impl ScriptedLanguage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `move_type`
    pub fn respond(&self, move_type: MoveType, json: Value) -> &Self {
        self.scripts
            .lock()
            .entry(prompt_id(move_type))
            .or_default()
            .push_back(json);
        self
    }

    /// Drop anything queued for `move_type` and serve `json` instead
    pub fn replace(&self, move_type: MoveType, json: Value) -> &Self {
        self.scripts.lock().insert(prompt_id(move_type), VecDeque::from([json]));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<StructuredRequest> {
        self.requests.lock().clone()
    }
}

fn prompt_id(move_type: MoveType) -> String {
    format!("move.{}", move_type.as_str())
}

#[async_trait]
impl LanguageProvider for ScriptedLanguage {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_structured(&self, request: StructuredRequest) -> Result<StructuredResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let json = {
            let mut scripts = self.scripts.lock();
            let queue = scripts
                .get_mut(&request.prompt.id)
                .ok_or_else(|| ProviderError::Failed(format!("no script for {}", request.prompt.id)))?;
            match queue.len() {
                0 => return Err(ProviderError::Failed(format!("script for {} is empty", request.prompt.id))),
                1 => queue[0].clone(),
                _ => queue.pop_front().unwrap(),
            }
        };
        Ok(StructuredResponse {
            json,
            model_id: "scripted-1".into(),
            prompt: request.prompt,
        })
    }
}

/// Always fails with the given error
#[derive(Debug, Clone)]
pub struct FailingLanguage(pub ProviderError);

#[async_trait]
impl LanguageProvider for FailingLanguage {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate_structured(&self, _request: StructuredRequest) -> Result<StructuredResponse, ProviderError> {
        Err(self.0.clone())
    }
}

/// Sleeps before every call, then delegates
pub struct SlowLanguage<L> {
    pub inner: L,
    pub delay: Duration,
}

#[async_trait]
impl<L: LanguageProvider> LanguageProvider for SlowLanguage<L> {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate_structured(&self, request: StructuredRequest) -> Result<StructuredResponse, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.generate_structured(request).await
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub evidence_ref: EvidenceRef,
    pub text: String,
    pub keywords: Vec<String>,
    pub score: f32,
}

/// Returns every record with a keyword the query contains
#[derive(Debug, Default)]
pub struct KeywordIndex {
    records: Vec<IndexedRecord>,
    calls: AtomicUsize,
    unavailable: bool,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_record(mut self, evidence_ref: &str, text: &str, keywords: &[&str], score: f32) -> Self {
        self.records.push(IndexedRecord {
            evidence_ref: r(evidence_ref),
            text: text.to_string(),
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            score,
        });
        self
    }

    /// Every search fails as if the index were down
    #[must_use]
    pub fn offline(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalProvider for KeywordIndex {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(ProviderError::Unavailable(format!("index {} is offline", request.index)));
        }
        let query = request.query.to_lowercase();
        let mut hits: Vec<SearchHit> = self
            .records
            .iter()
            .filter(|rec| rec.keywords.iter().any(|k| query.contains(k.as_str())))
            .map(|rec| SearchHit {
                record_id: rec.evidence_ref.to_string(),
                score: rec.score,
                evidence_ref: rec.evidence_ref.clone(),
                metadata: json!({ "text": rec.text }),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(request.top_k);
        Ok(hits)
    }
}

/// Planning documents for the Mill Lane site
pub fn mill_lane_index() -> KeywordIndex {
    KeywordIndex::new()
        .with_record(
            SFRA,
            "The site lies within flood zone 3 according to the strategic flood risk assessment.",
            &["flood"],
            0.9,
        )
        .with_record(
            FLOOD_POLICY,
            "Policy 7 requires a sequential test for housing in flood zone 3.",
            &["flood"],
            0.85,
        )
        .with_record(
            APPEAL,
            "An appeal for 60 homes on the site was dismissed in 2019 on flood grounds.",
            &["flood"],
            0.7,
        )
        .with_record(
            APPRAISAL,
            "The conservation area appraisal names the view across the mill pond as a key view.",
            &["heritage"],
            0.9,
        )
        .with_record(
            HERITAGE_POLICY,
            "Policy 12 resists development that harms the setting of heritage assets.",
            &["heritage"],
            0.8,
        )
        .with_record(
            SITE_NOTE,
            "Site visit: the field slopes towards the mill pond and floods in winter.",
            &["housing need"],
            0.6,
        )
}

pub fn text_source(index: Arc<KeywordIndex>) -> CandidateSource {
    CandidateSource::new(Modality::Text, "planning-docs", index)
}

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct StubSegmenter;

#[async_trait]
impl SegmentationProvider for StubSegmenter {
    fn name(&self) -> &str {
        "stub-seg"
    }

    async fn segment(&self, _raster: RasterRef) -> Result<Mask, ProviderError> {
        Ok(Mask {
            label: "water".into(),
            width: 4,
            height: 4,
            rle: vec![6, 4, 6],
            confidence: Some(0.8),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StubVectorizer;

#[async_trait]
impl VectorizationProvider for StubVectorizer {
    fn name(&self) -> &str {
        "stub-vec"
    }

    async fn vectorize(&self, _raster: RasterRef, mask: Option<Mask>) -> Result<Vec<VectorFeature>, ProviderError> {
        let label = mask.map_or_else(|| "feature".to_string(), |m| m.label);
        Ok(vec![VectorFeature {
            id: "pond".into(),
            label: format!("{label} body"),
            geometry: json!({
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
            }),
            properties: json!({ "area_m2": 420.0 }),
        }])
    }
}

/// Parses any source into a fixed two-chunk document
#[derive(Debug, Clone, Copy, Default)]
pub struct StubDocParser;

#[async_trait]
impl DocParseProvider for StubDocParser {
    fn name(&self) -> &str {
        "stub-parse"
    }

    async fn parse(&self, source: DocumentSource) -> Result<ParsedDocument, ProviderError> {
        Ok(ParsedDocument {
            source_type: source.source_type,
            source_id: source.source_id.clone(),
            title: source.title.unwrap_or(source.source_id),
            pages: vec![ParsedPage {
                number: 1,
                chunks: vec![
                    ParsedChunk {
                        selector: "para-1".into(),
                        text: "The site lies within flood zone 3.".into(),
                        issues: vec!["A".into()],
                    },
                    ParsedChunk {
                        selector: "para-2".into(),
                        text: "The mill pond view is a key view.".into(),
                        issues: vec!["B".into()],
                    },
                ],
                tables: vec![],
            }],
            tool_run_id: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixture outputs
// ---------------------------------------------------------------------------

/// Model output for each move of a clean Mill Lane run
pub fn fixture(move_type: MoveType) -> Value {
    match move_type {
        MoveType::Framing => json!({
            "framings": [
                {
                    "id": "f1",
                    "title": "Housing delivery",
                    "goal": "Meet local housing need",
                    "constraints": ["Keep new homes safe from flooding"]
                },
                {
                    "id": "f2",
                    "title": "Heritage protection",
                    "goal": "Protect the setting of the old mill",
                    "constraints": []
                }
            ],
            "scenarios": [
                { "id": "s1", "title": "Scheme as submitted", "description": "40 homes, up to three storeys" }
            ]
        }),
        MoveType::IssueSurfacing => json!({
            "issues": [
                { "id": "A", "title": "Flood risk", "material": true, "query": "flood" },
                { "id": "B", "title": "Heritage setting", "material": true, "query": "heritage" }
            ]
        }),
        MoveType::EvidenceCuration => json!({}),
        MoveType::EvidenceInterpretation => json!({
            "claims": [
                {
                    "id": "e1",
                    "issue_id": "A",
                    "text": "The site lies within flood zone 3.",
                    "evidence_refs": [SFRA]
                },
                {
                    "id": "e2",
                    "issue_id": "B",
                    "text": "The view across the mill pond is a key view.",
                    "evidence_refs": [APPRAISAL]
                },
                {
                    "id": "a1",
                    "text": "Buildings on the north edge will be up to three storeys.",
                    "scope": "north edge of the site",
                    "justification": "Indicative parameter plan submitted with the application"
                },
                {
                    "id": "i1",
                    "issue_id": "A",
                    "text": "Housing here must pass the sequential test and needs a site-specific flood assessment.",
                    "inference": true,
                    "evidence_refs": [SFRA, FLOOD_POLICY],
                    "limitations": "No site-specific flood model was available.",
                    "confidence": 0.7
                },
                {
                    "id": "i2",
                    "issue_id": "B",
                    "text": "Three-storey blocks on the north edge would interrupt the key view.",
                    "inference": true,
                    "evidence_refs": [APPRAISAL, HERITAGE_POLICY],
                    "assumption_ids": ["a1"],
                    "limitations": "Based on indicative heights only.",
                    "confidence": 0.6
                }
            ]
        }),
        MoveType::ConsiderationsFormation => json!({
            "entries": [
                {
                    "id": "c1",
                    "issue_id": "A",
                    "statement": "Flood risk weighs against the scheme unless the sequential test is passed.",
                    "interpretation_ids": ["i1"],
                    "evidence_refs": [SFRA],
                    "policy_clauses": [FLOOD_POLICY],
                    "normative": true,
                    "leaning": "against",
                    "confidence": 0.7
                },
                {
                    "id": "c2",
                    "issue_id": "B",
                    "statement": "Harm to the key view weighs against the scheme.",
                    "interpretation_ids": ["i2"],
                    "evidence_refs": [APPRAISAL],
                    "policy_clauses": [HERITAGE_POLICY],
                    "normative": true,
                    "leaning": "against",
                    "confidence": 0.6
                }
            ]
        }),
        MoveType::WeighingAndBalance => json!({
            "records": [
                {
                    "id": "w1",
                    "framing_id": "f1",
                    "consideration_ids": ["c1", "c2"],
                    "balance": "Flood harm can be managed, so the balance favours approval with conditions.",
                    "confidence": 0.6
                },
                {
                    "id": "w2",
                    "framing_id": "f2",
                    "consideration_ids": ["c2"],
                    "balance": "Harm to the key view outweighs the housing benefit.",
                    "confidence": 0.4,
                    "caveat": "Building heights are indicative."
                }
            ]
        }),
        MoveType::NegotiationAndAlteration => json!({
            "moves": [
                {
                    "id": "n1",
                    "proposal": "Limit the north edge to two storeys.",
                    "affected_consideration_ids": ["c2"],
                    "alters_balance": false,
                    "evidence_refs": [APPRAISAL]
                }
            ]
        }),
        MoveType::PositioningAndNarration => json!({
            "trajectories": [
                {
                    "id": "t1",
                    "scenario_id": "s1",
                    "framing_id": "f1",
                    "position": "Approve with conditions",
                    "narrative": "The homes meet a local need. Flooding can be managed if the sequential test is met.",
                    "weighing_ids": ["w1"],
                    "evidence_refs": [SFRA],
                    "confidence": 0.7
                },
                {
                    "id": "t2",
                    "scenario_id": "s1",
                    "framing_id": "f2",
                    "position": "Refuse",
                    "narrative": "Taller buildings on the north edge would spoil the view across the mill pond.",
                    "weighing_ids": ["w2"],
                    "assumption_ids": ["a1"],
                    "evidence_refs": [APPRAISAL],
                    "confidence": 0.6
                }
            ]
        }),
    }
}

/// A negotiation whose alteration shifts the heritage balance
pub fn altering_negotiation() -> Value {
    let mut out = fixture(MoveType::NegotiationAndAlteration);
    out["moves"][0]["alters_balance"] = json!(true);
    out
}

/// Weighing redone after [`altering_negotiation`]
pub fn reweighing() -> Value {
    let mut out = fixture(MoveType::WeighingAndBalance);
    out["records"][1]["balance"] = json!("With two storeys on the north edge the harm to the view is limited.");
    out["records"][1]["responds_to_negotiation"] = json!(["n1"]);
    out["records"][1]["confidence"] = json!(0.6);
    out
}

/// Interpretation draft with an inference that cites nothing
pub fn uncited_interpretation() -> Value {
    json!({
        "claims": [
            {
                "id": "i9",
                "issue_id": "A",
                "text": "The scheme is plainly unacceptable on flood grounds.",
                "inference": true,
                "limitations": "None stated."
            }
        ]
    })
}

/// A scripted provider loaded with the clean run
pub fn mill_lane_language() -> ScriptedLanguage {
    let language = ScriptedLanguage::new();
    for move_type in MoveType::ALL {
        if move_type != MoveType::EvidenceCuration {
            language.respond(move_type, fixture(move_type));
        }
    }
    language
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// An orchestrator with its scripted providers kept at hand
pub struct TestRig {
    pub orchestrator: Orchestrator,
    pub language: Arc<ScriptedLanguage>,
    pub index: Arc<KeywordIndex>,
}

impl TestRig {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(config, mill_lane_language(), mill_lane_index(), None)
    }

    pub fn with_parts(
        config: EngineConfig,
        language: ScriptedLanguage,
        index: KeywordIndex,
        lattice: Option<Arc<EvidenceLattice>>,
    ) -> Self {
        let language = Arc::new(language);
        let index = Arc::new(index);
        let mut builder = Orchestrator::builder(config)
            .with_language(language.clone())
            .with_source(text_source(index.clone()))
            .with_segmentation(Arc::new(StubSegmenter))
            .with_vectorization(Arc::new(StubVectorizer))
            .with_doc_parser(Arc::new(StubDocParser));
        if let Some(lattice) = lattice {
            builder = builder.with_lattice(lattice);
        }
        Self {
            orchestrator: builder.build().unwrap(),
            language,
            index,
        }
    }

    pub fn start(&self) -> RunId {
        self.orchestrator.start_run(Run::new(BRIEF)).unwrap()
    }

    pub async fn step(&self, run_id: RunId, move_type: MoveType) -> MoveEvent {
        self.orchestrator
            .execute(run_id, MoveRequest::new(move_type))
            .await
            .unwrap()
    }

    /// Run `moves` in order, unwrapping each
    pub async fn run_through(&self, run_id: RunId, moves: &[MoveType]) -> Vec<MoveEvent> {
        let mut events = Vec::with_capacity(moves.len());
        for move_type in moves {
            events.push(self.step(run_id, *move_type).await);
        }
        events
    }

    /// A new run taken through all eight moves
    pub async fn full_run(&self) -> RunId {
        let run_id = self.start();
        self.run_through(run_id, &MoveType::ALL).await;
        run_id
    }
}

pub fn setup_rig() -> TestRig {
    TestRig::new(EngineConfig::default())
}
