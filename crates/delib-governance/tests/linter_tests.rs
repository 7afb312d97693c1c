//! Governance checks over hand-built run histories.
//!
//! Core guarantees exercised here:
//! - Each hard check fires on the artifact it names and only there.
//! - The gate blocks a candidate only on new hard findings about its own move.
//! - Overrides move a hard finding out of the blocking set but keep it visible.

use delib_grammar::{
    ConsiderationLedgerEntry, ConsiderationsOutput, CurationOutput, EvidenceStatement, FramingOutput,
    GovernanceOverride, Interpretation, InterpretationOutput, Issue, IssuesOutput, Leaning, MoveEvent, MoveOutput,
    MoveStatus, MoveType, NegotiationMove, NegotiationOutput, PositioningOutput, Run, RunContext, Trajectory,
    WeighingOutput, WeighingRecord,
};
use delib_governance::{CheckCode, GovernanceConfig, Linter, Severity};
use delib_lattice::{ContextPack, HaltReason, Modality, PackAtom, PackProfile};
use delib_ledger::EvidenceRef;
use pretty_assertions::assert_eq;

fn r(s: &str) -> EvidenceRef {
    s.parse().unwrap()
}

fn linter() -> Linter {
    Linter::new(GovernanceConfig::default()).unwrap()
}

fn ctx() -> RunContext {
    RunContext::new(Run::new("site 12"), Vec::new(), Vec::new())
}

fn candidate(ctx: &RunContext, out: MoveOutput) -> MoveEvent {
    MoveEvent::pending(ctx.run_id(), out.move_type(), ctx.next_sequence()).with_outputs(MoveStatus::Success, out)
}

fn commit(ctx: &mut RunContext, out: MoveOutput) -> MoveEvent {
    let e = candidate(ctx, out);
    ctx.events.push(e.clone());
    e
}

fn pack(atoms: &[(&str, &str)], fallback: bool) -> ContextPack {
    ContextPack {
        pack_id: "pack-1".into(),
        purpose: "evidence_curation".into(),
        profile: PackProfile::Balanced,
        atoms: atoms
            .iter()
            .map(|(reference, issue)| PackAtom {
                evidence_ref: r(reference),
                modality: Modality::Text,
                score: 0.8,
                issues: vec![issue.to_string()],
                tool_run_id: None,
                excerpt: None,
            })
            .collect(),
        omissions: Vec::new(),
        uncovered_issues: Vec::new(),
        fallback_mode: fallback,
        fallback_reasons: if fallback { vec!["visual retrieval unavailable".into()] } else { Vec::new() },
        partial: false,
        halt: HaltReason::FrontierExhausted,
        steps: Vec::new(),
        tool_run_ids: Vec::new(),
    }
}

fn through_curation(fallback: bool) -> RunContext {
    let mut c = ctx();
    commit(
        &mut c,
        MoveOutput::Framing(FramingOutput {
            framings: Vec::new(),
            scenarios: Vec::new(),
            requested_pairs: Vec::new(),
        }),
    );
    commit(
        &mut c,
        MoveOutput::IssueSurfacing(IssuesOutput {
            issues: vec![
                Issue {
                    id: "A".into(),
                    title: "Flood risk".into(),
                    description: String::new(),
                    material: true,
                    query: None,
                },
                Issue {
                    id: "B".into(),
                    title: "Heritage".into(),
                    description: String::new(),
                    material: true,
                    query: None,
                },
            ],
        }),
    );
    commit(
        &mut c,
        MoveOutput::EvidenceCuration(CurationOutput {
            pack: pack(&[("doc::sfra::para-3", "A"), ("doc::plan::policy-7", "A")], fallback),
        }),
    );
    c
}

fn interpretation(id: &str, refs: &[&str]) -> Interpretation {
    Interpretation {
        id: id.into(),
        issue_id: Some("A".into()),
        text: "Residential use faces material flood risk".into(),
        evidence_refs: refs.iter().map(|s| r(s)).collect(),
        assumption_ids: Vec::new(),
        policy_clauses: Vec::new(),
        limitations: "pre-2024 modelling".into(),
        confidence: Some(0.8),
        caveat: None,
    }
}

fn consideration(id: &str, statement: &str, refs: &[&str], clauses: &[&str]) -> ConsiderationLedgerEntry {
    ConsiderationLedgerEntry {
        id: id.into(),
        issue_id: "A".into(),
        statement: statement.into(),
        interpretation_ids: vec!["i1".into()],
        evidence_refs: refs.iter().map(|s| r(s)).collect(),
        policy_clauses: clauses.iter().map(|s| r(s)).collect(),
        normative: true,
        leaning: Leaning::Against,
        confidence: None,
        caveat: None,
    }
}

fn trajectory(id: &str, narrative: &str) -> Trajectory {
    Trajectory {
        id: id.into(),
        scenario_id: "s1".into(),
        framing_id: "f1".into(),
        position: "Refuse".into(),
        narrative: narrative.into(),
        weighing_ids: vec!["w1".into()],
        evidence_refs: vec![r("doc::sfra::para-3")],
        policy_clauses: Vec::new(),
        assumption_ids: Vec::new(),
        confidence: None,
        caveat: None,
    }
}

/// Tenet: an interpretation may only rest on evidence the curator admitted.
#[test]
fn interpretation_outside_pack_is_hard() {
    let mut c = through_curation(false);
    commit(
        &mut c,
        MoveOutput::EvidenceInterpretation(InterpretationOutput {
            interpretations: vec![interpretation("i1", &["doc::sfra::para-3"]), interpretation("i2", &["doc::blog::post-1"])],
            evidence: vec![EvidenceStatement {
                id: "e1".into(),
                text: "Zone 3".into(),
                evidence_ref: r("doc::sfra::para-3"),
            }],
            ..InterpretationOutput::default()
        }),
    );
    let report = linter().lint(&c);
    let outside: Vec<_> = report
        .findings
        .iter()
        .filter(|f| f.code == CheckCode::OutsidePackReliance)
        .map(|f| f.target.as_str())
        .collect();
    assert_eq!(outside, vec!["i2"]);
    assert!(!report.passes());
}

/// Tenet: normative and compliance claims need their hooks.
#[test]
fn uncited_and_unhooked_considerations_are_hard() {
    let mut c = through_curation(false);
    commit(
        &mut c,
        MoveOutput::EvidenceInterpretation(InterpretationOutput {
            interpretations: vec![interpretation("i1", &["doc::sfra::para-3"])],
            ..InterpretationOutput::default()
        }),
    );
    commit(
        &mut c,
        MoveOutput::ConsiderationsFormation(ConsiderationsOutput {
            entries: vec![
                consideration("c1", "Flood harm should weigh heavily", &[], &[]),
                consideration("c2", "The scheme complies with the flood policy", &["doc::sfra::para-3"], &[]),
                consideration(
                    "c3",
                    "The scheme is in accordance with Policy 7",
                    &["doc::sfra::para-3"],
                    &["doc::plan::policy-7"],
                ),
            ],
        }),
    );
    let report = linter().lint(&c);
    let hard: Vec<_> = report.hard().map(|f| (f.code, f.target.as_str())).collect();
    assert_eq!(
        hard,
        vec![
            (CheckCode::UncitedNormativeClaim, "c1"),
            (CheckCode::PolicyClaimWithoutClause, "c2"),
        ]
    );
    assert!(report
        .soft()
        .any(|f| f.code == CheckCode::SingleSourceConsideration && f.target == "c2"));
}

/// Tenet: a compliance claim needs clause references wherever it is
/// written, and evidence that is not a clause does not count.
#[test]
fn compliance_claims_in_any_record_need_their_own_clauses() {
    let mut c = through_curation(false);
    let mut claimed = interpretation("i1", &["doc::sfra::para-3"]);
    claimed.text = "Drainage conforms to the flood policy".into();
    let mut hooked = interpretation("i2", &["doc::sfra::para-3"]);
    hooked.text = "Drainage conforms to the flood policy".into();
    hooked.policy_clauses = vec![r("doc::plan::policy-7")];
    commit(
        &mut c,
        MoveOutput::EvidenceInterpretation(InterpretationOutput {
            interpretations: vec![claimed, hooked],
            ..InterpretationOutput::default()
        }),
    );
    commit(
        &mut c,
        MoveOutput::ConsiderationsFormation(ConsiderationsOutput {
            entries: vec![consideration(
                "c1",
                "Flood harm should weigh heavily",
                &["doc::sfra::para-3"],
                &["doc::plan::policy-7"],
            )],
        }),
    );

    let MoveOutput::WeighingAndBalance(mut weighed) = weighing("w1", &[], None) else { unreachable!() };
    weighed.records[0].balance = "The scheme complies with the local plan, so approve.".into();
    commit(&mut c, MoveOutput::WeighingAndBalance(weighed));

    let MoveOutput::NegotiationAndAlteration(mut negotiated) = negotiation(false) else { unreachable!() };
    negotiated.moves[0].proposal = "A smaller layout would be in accordance with Policy 7".into();
    negotiated.moves[0].evidence_refs = vec![r("doc::sfra::para-3")];
    commit(&mut c, MoveOutput::NegotiationAndAlteration(negotiated));

    let mut approve = trajectory("t1", "The benefits are decisive.");
    approve.position = "Approve: the scheme complies with policy".into();
    commit(
        &mut c,
        MoveOutput::PositioningAndNarration(PositioningOutput { trajectories: vec![approve] }),
    );

    let report = linter().lint(&c);
    let unhooked: Vec<_> = report
        .hard()
        .filter(|f| f.code == CheckCode::PolicyClaimWithoutClause)
        .map(|f| (f.move_type, f.target.as_str()))
        .collect();
    assert_eq!(
        unhooked,
        vec![
            (MoveType::EvidenceInterpretation, "i1"),
            (MoveType::WeighingAndBalance, "w1"),
            (MoveType::NegotiationAndAlteration, "n1"),
            (MoveType::PositioningAndNarration, "t1"),
        ]
    );
    assert!(!report.passes());
}

/// Tenet: the gate blocks a balance that asserts compliance unhooked.
#[test]
fn unhooked_balance_is_blocked_at_the_gate() {
    let lint = linter();
    let c = ctx();
    let MoveOutput::WeighingAndBalance(mut weighed) = weighing("w1", &[], None) else { unreachable!() };
    weighed.records[0].balance = "Approve: the layout meets the requirements of Policy 7".into();

    let blocked = lint.gate(&c, &candidate(&c, MoveOutput::WeighingAndBalance(weighed.clone())));
    assert_eq!(blocked.blocking.len(), 1);
    assert_eq!(blocked.blocking[0].code, CheckCode::PolicyClaimWithoutClause);

    weighed.records[0].policy_clauses = vec![r("doc::plan::policy-7")];
    assert!(!lint.gate(&c, &candidate(&c, MoveOutput::WeighingAndBalance(weighed))).is_blocked());
}

/// Tenet: internal identifiers never reach narrative text.
#[test]
fn leaked_identifiers_are_hard() {
    let mut c = ctx();
    commit(
        &mut c,
        MoveOutput::PositioningAndNarration(PositioningOutput {
            trajectories: vec![
                trajectory("t1", "Flood risk (see doc::sfra::para-3) outweighs the benefits."),
                trajectory("t2", "Decision recorded as 01HZX3QG5N8Y2W7K4V6T9R0M1P."),
                trajectory("t3", "Flood risk outweighs the housing benefits."),
            ],
        }),
    );
    let leaks: Vec<_> = linter()
        .lint(&c)
        .findings
        .into_iter()
        .filter(|f| f.code == CheckCode::InternalIdLeak)
        .map(|f| f.target)
        .collect();
    assert_eq!(leaks, vec!["t1".to_string(), "t2".to_string()]);
}

fn negotiation(altering: bool) -> MoveOutput {
    MoveOutput::NegotiationAndAlteration(NegotiationOutput {
        moves: vec![NegotiationMove {
            id: "n1".into(),
            proposal: "Pull the red line back from the flood zone".into(),
            affected_consideration_ids: vec!["c1".into()],
            alters_balance: altering,
            evidence_refs: Vec::new(),
            policy_clauses: Vec::new(),
        }],
    })
}

fn weighing(id: &str, responds: &[&str], supersedes: Option<&str>) -> MoveOutput {
    MoveOutput::WeighingAndBalance(WeighingOutput {
        records: vec![WeighingRecord {
            id: id.into(),
            framing_id: "f1".into(),
            consideration_ids: vec!["c1".into()],
            balance: "Harm to flood safety outweighs housing delivery".into(),
            supersedes: supersedes.map(String::from),
            responds_to_negotiation: responds.iter().map(|s| s.to_string()).collect(),
            policy_clauses: Vec::new(),
            confidence: None,
            caveat: None,
        }],
    })
}

fn positioning() -> MoveOutput {
    MoveOutput::PositioningAndNarration(PositioningOutput {
        trajectories: vec![trajectory("t1", "Flood risk outweighs the housing benefits.")],
    })
}

/// Tenet: an alteration that changes the balance must be re-weighed
/// before positioning.
#[test]
fn positioning_blocked_until_alteration_is_reweighed() {
    let lint = linter();
    let mut c = ctx();
    commit(&mut c, weighing("w1", &[], None));
    commit(&mut c, negotiation(true));

    let blocked = lint.gate(&c, &candidate(&c, positioning()));
    assert!(blocked.is_blocked());
    assert_eq!(blocked.blocking[0].code, CheckCode::NegotiationNotReweighed);
    assert_eq!(blocked.blocking[0].target, "n1");

    commit(&mut c, weighing("w2", &["n1"], Some("w1")));
    let cleared = lint.gate(&c, &candidate(&c, positioning()));
    assert!(!cleared.is_blocked(), "{:?}", cleared.blocking);
}

/// Tenet: alterations that leave the balance alone need no re-weighing.
#[test]
fn non_altering_negotiation_does_not_block() {
    let mut c = ctx();
    commit(&mut c, weighing("w1", &[], None));
    commit(&mut c, negotiation(false));
    assert!(!linter().gate(&c, &candidate(&c, positioning())).is_blocked());
}

/// Tenet: an override accepts a hard finding without hiding it.
#[test]
fn override_unblocks_but_is_reported() {
    let lint = linter();
    let mut c = ctx();
    commit(&mut c, weighing("w1", &[], None));
    commit(&mut c, negotiation(true));
    c.overrides.push(GovernanceOverride {
        run_id: c.run_id(),
        check: CheckCode::NegotiationNotReweighed.as_str().into(),
        target: "n1".into(),
        justification: "boundary change agreed at committee; balance unaffected".into(),
        at: chrono::Utc::now(),
    });

    assert!(!lint.gate(&c, &candidate(&c, positioning())).is_blocked());
    commit(&mut c, positioning());
    let report = lint.lint(&c);
    assert!(report.passes());
    assert_eq!(report.overridden.len(), 1);
    assert_eq!(report.overridden[0].severity, Severity::Hard);
}

/// Tenet: the gate ignores findings about other moves.
#[test]
fn gate_only_blocks_on_own_move() {
    let lint = linter();
    let mut c = ctx();
    commit(
        &mut c,
        MoveOutput::ConsiderationsFormation(ConsiderationsOutput {
            entries: vec![consideration("c1", "Harm should weigh heavily", &[], &[])],
        }),
    );
    // c1 is already uncited; a weighing candidate is not blamed for it
    let decision = lint.gate(&c, &candidate(&c, weighing("w1", &[], None)));
    assert!(!decision.is_blocked());
}

/// Tenet: soft findings annotate rather than block.
#[test]
fn soft_findings_annotate() {
    let lint = linter();
    let c = through_curation(true);
    let mut low = interpretation("i1", &["doc::sfra::para-3"]);
    low.confidence = Some(0.2);
    let cand = candidate(
        &c,
        MoveOutput::EvidenceInterpretation(InterpretationOutput {
            interpretations: vec![low],
            ..InterpretationOutput::default()
        }),
    );
    let decision = lint.gate(&c, &cand);
    assert!(!decision.is_blocked());
    let codes: Vec<_> = decision.annotations.iter().map(|f| f.code).collect();
    assert!(codes.contains(&CheckCode::LowConfidenceWithoutCaveat));
    assert!(codes.contains(&CheckCode::FallbackNotDisclosed));

    // material issue B has nothing in the pack
    let report = lint.lint(&c);
    assert!(report
        .findings
        .iter()
        .any(|f| f.code == CheckCode::MaterialIssueUnsupported && f.target == "B"));
}

/// Tenet: disclosed fallback satisfies the disclosure check.
#[test]
fn disclosed_fallback_is_clean() {
    let c = through_curation(true);
    let mut cand = candidate(
        &c,
        MoveOutput::EvidenceInterpretation(InterpretationOutput {
            interpretations: vec![interpretation("i1", &["doc::sfra::para-3"])],
            ..InterpretationOutput::default()
        }),
    );
    cand.uncertainty
        .push("Evidence gathered in fallback mode: visual retrieval unavailable.".into());
    let decision = linter().gate(&c, &cand);
    assert!(decision
        .annotations
        .iter()
        .all(|f| f.code != CheckCode::FallbackNotDisclosed));
}
