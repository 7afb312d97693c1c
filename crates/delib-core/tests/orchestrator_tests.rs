//! End-to-end runs through the grammar orchestrator.
//!
//! Core guarantees exercised here:
//! - A run taken through all eight moves completes and satisfies every invariant.
//! - Refused moves write nothing; failed moves are appended as `error` events.
//! - Curator exclusions and search ceilings are recorded in the pack, not hidden.
//! - Governance blocks a position that ignores a balance-changing alteration
//!   until it is re-weighed or explicitly overridden.
//! - Backtracking appends; history is never rewritten.

use delib_core::{CoreError, EngineConfig, MoveRequest, Orchestrator};
use delib_governance::CheckCode;
use delib_grammar::{
    BacktrackReason, EventStore, MoveOutput, MoveStatus, MoveType, PreconditionFailure, Run, TruthStatusError,
};
use delib_lattice::{ingest_document, EvidenceLattice, NodeKind, OmissionReason, ParsedChunk, ParsedDocument, ParsedPage};
use delib_ledger::{CaptureLevel, InMemoryLedger, ProvenanceLedger};
use delib_test_utils::{
    altering_negotiation, fixture, mill_lane_index, mill_lane_language, r, reweighing, setup_rig, text_source,
    uncited_interpretation, KeywordIndex, TestRig, APPEAL, BRIEF, FLOOD_POLICY, SFRA,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

const UP_TO_CURATION: [MoveType; 3] = [
    MoveType::Framing,
    MoveType::IssueSurfacing,
    MoveType::EvidenceCuration,
];

const UP_TO_NEGOTIATION: [MoveType; 7] = [
    MoveType::Framing,
    MoveType::IssueSurfacing,
    MoveType::EvidenceCuration,
    MoveType::EvidenceInterpretation,
    MoveType::ConsiderationsFormation,
    MoveType::WeighingAndBalance,
    MoveType::NegotiationAndAlteration,
];

/// Tenet: a clean run reaches a complete, conformant artifact.
#[tokio::test]
async fn full_run_completes() {
    let rig = setup_rig();
    let run_id = rig.full_run().await;

    let ctx = rig.orchestrator.context(run_id).unwrap();
    assert_eq!(ctx.events.len(), 8);
    assert!(ctx.events.iter().all(|e| e.status == MoveStatus::Success));
    assert!(ctx.events.iter().all(|e| !e.tool_run_ids.is_empty()));

    let report = rig.orchestrator.complete(run_id).await.unwrap();
    assert!(report.is_complete(), "violations: {:?}", report.invariants.reasons());
    assert!(report.invariants.governance.passes());

    let framing = ctx.framing().unwrap();
    assert_eq!(framing.scenarios.len(), 1);
    assert_eq!(framing.requested_pairs.len(), 2);
}

/// Tenet: both issues are covered and the curator's exclusion is on record.
#[tokio::test]
async fn curation_covers_issues_and_records_exclusions() {
    let rig = setup_rig();
    let run_id = rig.start();
    rig.run_through(run_id, &UP_TO_CURATION[..2]).await;

    let event = rig
        .orchestrator
        .execute(
            run_id,
            MoveRequest::new(MoveType::EvidenceCuration).excluding(r(APPEAL), "superseded by 2023 flood data"),
        )
        .await
        .unwrap();

    let Some(MoveOutput::EvidenceCuration(curation)) = &event.outputs else {
        panic!("expected a curation output, got {:?}", event.outputs);
    };
    let pack = &curation.pack;
    assert!(pack.atoms_for_issue("A").next().is_some());
    assert!(pack.atoms_for_issue("B").next().is_some());
    assert!(pack.uncovered_issues.is_empty());
    assert!(!pack.contains(&r(APPEAL)));

    let omission = pack
        .omissions
        .iter()
        .find(|o| o.evidence_ref == r(APPEAL))
        .expect("excluded appeal is listed as omitted");
    assert_eq!(omission.reason, OmissionReason::CuratorExcluded);
    assert_eq!(omission.detail.as_deref(), Some("superseded by 2023 flood data"));
    assert_eq!(event.inputs.pack_id.as_deref(), Some(pack.pack_id.as_str()));
}

/// Tenet: an inference with no citation is rejected, and the attempt is kept.
#[tokio::test]
async fn uncited_interpretation_is_rejected() {
    let rig = setup_rig();
    let run_id = rig.start();
    rig.run_through(run_id, &UP_TO_CURATION).await;

    rig.language
        .replace(MoveType::EvidenceInterpretation, uncited_interpretation());
    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::EvidenceInterpretation))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, CoreError::TruthStatus(TruthStatusError::Uncited { id }) if id == "i9"),
        "unexpected {err:?}"
    );
    assert!(err.is_recoverable_locally());

    let ctx = rig.orchestrator.context(run_id).unwrap();
    let last = ctx.events.last().unwrap();
    assert_eq!(last.move_type, MoveType::EvidenceInterpretation);
    assert_eq!(last.status, MoveStatus::Error);
    assert!(last.error.as_deref().unwrap().contains("i9"));
    assert!(ctx.interpretation().is_none());

    rig.language.replace(
        MoveType::EvidenceInterpretation,
        delib_test_utils::fixture(MoveType::EvidenceInterpretation),
    );
    let retried = rig.step(run_id, MoveType::EvidenceInterpretation).await;
    assert!(!retried.is_backtrack());
    let Some(MoveOutput::EvidenceInterpretation(out)) = &retried.outputs else {
        panic!("expected interpretation output");
    };
    assert_eq!(out.evidence.len(), 2);
    assert_eq!(out.interpretations.len(), 2);
    assert_eq!(out.assumptions.len(), 1);
}

/// Tenet: an output that reuses an artifact id is malformed, and a rejected
/// move leaves the lattice exactly as it found it.
#[tokio::test]
async fn duplicate_artifact_ids_are_rejected_without_lattice_writes() {
    let rig = setup_rig();
    let run_id = rig.start();
    rig.run_through(run_id, &UP_TO_CURATION).await;

    let mut draft = fixture(MoveType::EvidenceInterpretation);
    let repeated = draft["claims"][3].clone();
    assert_eq!(repeated["id"], "i1");
    draft["claims"].as_array_mut().unwrap().push(repeated);
    rig.language.replace(MoveType::EvidenceInterpretation, draft);

    let lattice = rig.orchestrator.lattice();
    let (nodes, edges) = (lattice.node_count(), lattice.edge_count());
    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::EvidenceInterpretation))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, CoreError::MalformedOutput { move_type: MoveType::EvidenceInterpretation, reason } if reason.contains("i1")),
        "unexpected {err:?}"
    );
    assert_eq!(lattice.node_count(), nodes);
    assert_eq!(lattice.edge_count(), edges);

    let ctx = rig.orchestrator.context(run_id).unwrap();
    let last = ctx.events.last().unwrap();
    assert_eq!(last.status, MoveStatus::Error);
    assert!(ctx.interpretation().is_none());

    rig.language
        .replace(MoveType::EvidenceInterpretation, fixture(MoveType::EvidenceInterpretation));
    rig.step(run_id, MoveType::EvidenceInterpretation).await;
    assert!(lattice.node_count() > nodes);
}

/// Tenet: a compliance claim in a balance or a position needs clause
/// references of its own; citing the flood assessment is not enough.
#[tokio::test]
async fn compliance_claims_without_clauses_are_blocked() {
    let rig = setup_rig();
    let run_id = rig.start();
    rig.run_through(run_id, &UP_TO_NEGOTIATION[..5]).await;

    let mut weighing = fixture(MoveType::WeighingAndBalance);
    weighing["records"][0]["balance"] = json!("The scheme complies with the local plan, so approve.");
    rig.language.replace(MoveType::WeighingAndBalance, weighing.clone());
    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::WeighingAndBalance))
        .await
        .unwrap_err();
    let CoreError::GovernanceHardFailure { findings, .. } = &err else {
        panic!("expected a governance block, got {err:?}");
    };
    assert_eq!(
        findings.iter().map(|f| (f.code, f.target.as_str())).collect::<Vec<_>>(),
        vec![(CheckCode::PolicyClaimWithoutClause, "w1")]
    );

    weighing["records"][0]["policy_clauses"] = json!([FLOOD_POLICY]);
    rig.language.replace(MoveType::WeighingAndBalance, weighing);
    rig.run_through(run_id, &[MoveType::WeighingAndBalance, MoveType::NegotiationAndAlteration])
        .await;

    let mut positioning = fixture(MoveType::PositioningAndNarration);
    positioning["trajectories"][0]["position"] = json!("Approve: the scheme complies with policy");
    rig.language.replace(MoveType::PositioningAndNarration, positioning);
    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::PositioningAndNarration))
        .await
        .unwrap_err();
    let CoreError::GovernanceHardFailure { move_type, findings, .. } = &err else {
        panic!("expected a governance block, got {err:?}");
    };
    assert_eq!(*move_type, MoveType::PositioningAndNarration);
    assert_eq!(
        findings.iter().map(|f| (f.code, f.target.as_str())).collect::<Vec<_>>(),
        vec![(CheckCode::PolicyClaimWithoutClause, "t1")]
    );
    assert!(rig.orchestrator.context(run_id).unwrap().positioning().is_none());
}

/// Tenet: a balance-changing alteration must be re-weighed before positioning.
#[tokio::test]
async fn altered_balance_is_reweighed_before_positioning() {
    let rig = setup_rig();
    rig.language
        .replace(MoveType::NegotiationAndAlteration, altering_negotiation());
    let run_id = rig.start();
    rig.run_through(run_id, &UP_TO_NEGOTIATION).await;

    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::PositioningAndNarration))
        .await
        .unwrap_err();
    let CoreError::GovernanceHardFailure { move_type, findings, .. } = &err else {
        panic!("expected a governance block, got {err:?}");
    };
    assert_eq!(*move_type, MoveType::PositioningAndNarration);
    assert!(findings
        .iter()
        .any(|f| f.code == CheckCode::NegotiationNotReweighed && f.target == "n1"));
    assert!(rig.orchestrator.context(run_id).unwrap().positioning().is_none());

    rig.language.replace(MoveType::WeighingAndBalance, reweighing());
    let reweigh = rig
        .orchestrator
        .execute(
            run_id,
            MoveRequest::new(MoveType::WeighingAndBalance).backtracking(BacktrackReason::FramingShift),
        )
        .await
        .unwrap();
    assert_eq!(reweigh.backtrack_reason, Some(BacktrackReason::FramingShift));

    rig.step(run_id, MoveType::PositioningAndNarration).await;
    let report = rig.orchestrator.complete(run_id).await.unwrap();
    assert!(report.is_complete(), "violations: {:?}", report.invariants.reasons());
}

/// Tenet: an override accepts a hard finding without hiding it.
#[tokio::test]
async fn override_unblocks_but_stays_visible() {
    let rig = setup_rig();
    rig.language
        .replace(MoveType::NegotiationAndAlteration, altering_negotiation());
    let run_id = rig.start();
    rig.run_through(run_id, &UP_TO_NEGOTIATION).await;
    assert_err!(
        rig.orchestrator
            .execute(run_id, MoveRequest::new(MoveType::PositioningAndNarration))
            .await
    );

    assert!(rig
        .orchestrator
        .override_finding(run_id, CheckCode::NegotiationNotReweighed, "n1", "   ")
        .is_err());
    assert_ok!(rig.orchestrator.override_finding(
        run_id,
        CheckCode::NegotiationNotReweighed,
        "n1",
        "Applicant has confirmed in writing that heights stay as submitted",
    ));

    rig.step(run_id, MoveType::PositioningAndNarration).await;
    let report = rig.orchestrator.report(run_id).unwrap();
    assert!(report.passes());
    assert!(report
        .overridden
        .iter()
        .any(|f| f.code == CheckCode::NegotiationNotReweighed && f.target == "n1"));
    assert!(rig.orchestrator.complete(run_id).await.unwrap().is_complete());
}

/// Tenet: a backtrack appends a new event and leaves earlier ones untouched.
#[tokio::test]
async fn backtracking_appends_without_rewriting() {
    let rig = setup_rig();
    let run_id = rig.full_run().await;
    let before = rig.orchestrator.context(run_id).unwrap().events;
    let positioning_id = before.last().unwrap().id;

    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::EvidenceCuration))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Precondition(ref e) if matches!(e.failure, PreconditionFailure::BacktrackWithoutReason { .. })
    ));
    assert_eq!(rig.orchestrator.context(run_id).unwrap().events.len(), 8);

    let event = rig
        .orchestrator
        .execute(
            run_id,
            MoveRequest::new(MoveType::EvidenceCuration)
                .backtracking(BacktrackReason::MissingEvidence)
                .excluding(r(APPEAL), "superseded"),
        )
        .await
        .unwrap();
    assert_eq!(event.sequence, 9);
    assert_eq!(event.backtracked_from, Some(positioning_id));

    let after = rig.orchestrator.context(run_id).unwrap();
    assert_eq!(&after.events[..8], &before[..]);
    assert_eq!(after.committed(MoveType::EvidenceCuration).unwrap().id, event.id);
    assert_eq!(after.furthest_committed(), Some(MoveType::PositioningAndNarration));
}

/// Tenet: a refused move leaves no trace in the store or the ledger.
#[tokio::test]
async fn skipping_ahead_writes_nothing() {
    let rig = setup_rig();
    let run_id = rig.start();

    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::WeighingAndBalance))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)));
    assert_eq!(err.artifact_ids(), vec![run_id.to_string()]);

    let err = rig
        .orchestrator
        .execute(
            run_id,
            MoveRequest::new(MoveType::Framing).backtracking(BacktrackReason::FramingShift),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)));

    assert!(rig.orchestrator.context(run_id).unwrap().events.is_empty());
    assert!(rig.orchestrator.ledger().is_empty());
    assert_eq!(rig.language.calls(), 0);
}

/// Tenet: a completed run is closed to further moves.
#[tokio::test]
async fn completed_run_is_closed() {
    let rig = setup_rig();
    let run_id = rig.full_run().await;
    assert!(rig.orchestrator.complete(run_id).await.unwrap().is_complete());

    let err = rig
        .orchestrator
        .execute(
            run_id,
            MoveRequest::new(MoveType::Framing).backtracking(BacktrackReason::FramingShift),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RunClosed { run_id: id } if id == run_id));
}

/// Tenet: an unfinished run is marked non-conformant and stays open.
#[tokio::test]
async fn unfinished_run_is_non_conformant() {
    let rig = setup_rig();
    let run_id = rig.start();
    rig.run_through(run_id, &UP_TO_CURATION).await;

    let report = rig.orchestrator.complete(run_id).await.unwrap();
    assert!(!report.is_complete());
    assert!(report
        .mark
        .reasons
        .iter()
        .any(|r| r.contains("positioning")));

    rig.step(run_id, MoveType::EvidenceInterpretation).await;
}

/// Tenet: runs are independent; two runs over the same evidence agree.
#[tokio::test]
async fn concurrent_runs_are_independent() {
    let rig = setup_rig();
    let (a, b) = tokio::join!(rig.full_run(), rig.full_run());
    assert_ne!(a, b);

    for run_id in [a, b] {
        let report = rig.orchestrator.complete(run_id).await.unwrap();
        assert!(report.is_complete(), "violations: {:?}", report.invariants.reasons());
        let ctx = rig.orchestrator.context(run_id).unwrap();
        assert!(ctx.events.iter().all(|e| e.run_id == run_id));
    }
    assert!(rig.orchestrator.diff(a, b).unwrap().is_empty());
}

/// Tenet: a move that outlives its budget is recorded as partial, uncommitted.
#[tokio::test(start_paused = true)]
async fn timed_out_move_is_partial() {
    let config = EngineConfig::default().with_move_timeout(MoveType::Framing, std::time::Duration::from_secs(1));
    let language = delib_test_utils::SlowLanguage {
        inner: mill_lane_language(),
        delay: std::time::Duration::from_secs(60),
    };
    let orchestrator = Orchestrator::builder(config)
        .with_language(Arc::new(language))
        .with_source(text_source(Arc::new(mill_lane_index())))
        .build()
        .unwrap();
    let run_id = orchestrator.start_run(Run::new(BRIEF)).unwrap();

    let event = orchestrator
        .execute(run_id, MoveRequest::new(MoveType::Framing))
        .await
        .unwrap();
    assert_eq!(event.status, MoveStatus::Partial);
    assert!(event.outputs.is_none());
    assert!(event.uncertainty.iter().any(|u| u.contains("did not finish")));

    let ctx = orchestrator.context(run_id).unwrap();
    assert_eq!(ctx.furthest_committed(), None);
    let run = orchestrator.ledger().resolve(event.tool_run_ids[0]).unwrap();
    assert_eq!(run.status, delib_ledger::ToolStatus::Cancelled);
}

/// Tenet: cancellation reaches outstanding calls and is recorded as an error.
#[tokio::test]
async fn cancelled_move_is_an_error_event() {
    let rig = setup_rig();
    let run_id = rig.start();
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::Framing).with_cancel(cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Cancelled { move_type: MoveType::Framing, .. }));

    let ctx = rig.orchestrator.context(run_id).unwrap();
    let event = ctx.events.last().unwrap();
    assert_eq!(event.status, MoveStatus::Error);
    let run = rig.orchestrator.ledger().resolve(event.tool_run_ids[0]).unwrap();
    assert_eq!(run.status, delib_ledger::ToolStatus::Cancelled);
    assert_eq!(rig.language.calls(), 0);
}

/// Tenet: a search that hits its ceiling yields a partial pack that says so.
#[tokio::test]
async fn traversal_ceiling_yields_partial_pack() {
    let lattice = Arc::new(EvidenceLattice::new(Arc::new(InMemoryLedger::new(CaptureLevel::Inspect))));
    let doc = ParsedDocument {
        source_type: "doc".into(),
        source_id: "site-allocations".into(),
        title: "Site Allocations Plan".into(),
        pages: vec![ParsedPage {
            number: 3,
            chunks: ["para-1", "para-2", "para-3"]
                .into_iter()
                .map(|selector| ParsedChunk {
                    selector: selector.into(),
                    text: format!("Mill Lane allocation, {selector}"),
                    issues: vec![],
                })
                .collect(),
            tables: vec![],
        }],
        tool_run_id: None,
    };
    ingest_document(&lattice, &doc).unwrap();
    let anchor = lattice.nodes_of_kind(NodeKind::Document)[0].id.clone();

    let rig = TestRig::with_parts(
        EngineConfig::default().with_traversal_budget(1, 2),
        mill_lane_language(),
        mill_lane_index(),
        Some(lattice),
    );
    let run_id = rig
        .orchestrator
        .start_run(Run::new(BRIEF).with_anchors(vec![anchor]))
        .unwrap();
    rig.step(run_id, MoveType::Framing).await;
    let event = rig.step(run_id, MoveType::IssueSurfacing).await;

    assert_eq!(event.status, MoveStatus::Partial);
    assert!(event.is_committed());
    assert!(event.uncertainty.iter().any(|u| u.contains("stopped early")));
}

/// Tenet: unavailable retrieval degrades the pack instead of failing the move.
#[tokio::test]
async fn offline_retrieval_falls_back_and_discloses() {
    let rig = TestRig::with_parts(
        EngineConfig::default(),
        mill_lane_language(),
        KeywordIndex::new().offline(),
        None,
    );
    let run_id = rig.start();
    let events = rig.run_through(run_id, &UP_TO_CURATION).await;
    let curation = &events[2];

    let Some(MoveOutput::EvidenceCuration(out)) = &curation.outputs else {
        panic!("expected curation output");
    };
    assert!(out.pack.fallback_mode);
    assert!(curation.uncertainty.iter().any(|u| u.contains("fallback")));
    assert!(curation
        .annotations
        .iter()
        .any(|a| a.starts_with(CheckCode::MaterialIssueUnsupported.as_str())));

    let failed = curation
        .tool_run_ids
        .iter()
        .map(|id| rig.orchestrator.ledger().resolve(*id).unwrap())
        .filter(|run| run.status == delib_ledger::ToolStatus::Unavailable)
        .count();
    assert_eq!(failed, 2);
    assert_eq!(rig.index.calls(), 3);

    let err = rig
        .orchestrator
        .execute(run_id, MoveRequest::new(MoveType::EvidenceInterpretation))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Precondition(ref e) if e.failure == PreconditionFailure::EmptyPack
    ));
}

/// Tenet: the model sees the evidence it may cite and nothing outside the pack.
#[tokio::test]
async fn interpretation_prompt_carries_the_tight_pack() {
    let rig = setup_rig();
    let run_id = rig.start();
    rig.run_through(run_id, &UP_TO_CURATION).await;
    let event = rig.step(run_id, MoveType::EvidenceInterpretation).await;

    let request = rig
        .language
        .requests()
        .into_iter()
        .rev()
        .find(|q| q.prompt.id == "move.evidence_interpretation")
        .unwrap();
    let user: serde_json::Value = serde_json::from_str(&request.messages[1].content).unwrap();
    let cited: Vec<&str> = user["evidence"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["ref"].as_str().unwrap())
        .collect();
    assert!(cited.contains(&SFRA));
    assert!(!cited.contains(&APPEAL));
    assert!(event.inputs.pack_id.as_deref().unwrap().ends_with("/tight"));
    assert!(rig.orchestrator.store().run(run_id).is_ok());
}
