//! Event history is append-only and survives persistence.
//!
//! Core guarantees exercised here:
//! - Appending (including backtrack events) never alters earlier events.
//! - Sequence numbers are strictly increasing per run.
//! - A JSON Lines export re-imports to an identical history.

use delib_grammar::{
    BacktrackReason, EventStore, FramingOutput, InMemoryEventStore, Issue, IssuesOutput, MoveEvent, MoveOutput,
    MoveStatus, MoveType, Run, RunStatus, RunStatusMark,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::io::{BufReader, Seek, SeekFrom};

fn output_for(move_type: MoveType) -> Option<MoveOutput> {
    match move_type {
        MoveType::Framing => Some(MoveOutput::Framing(FramingOutput {
            framings: Vec::new(),
            scenarios: Vec::new(),
            requested_pairs: Vec::new(),
        })),
        MoveType::IssueSurfacing => Some(MoveOutput::IssueSurfacing(IssuesOutput {
            issues: vec![Issue {
                id: "A".into(),
                title: "Flood risk".into(),
                description: String::new(),
                material: true,
                query: None,
            }],
        })),
        _ => None,
    }
}

fn event(run: &Run, sequence: u64, move_type: MoveType, backtrack: bool, previous: Option<&MoveEvent>) -> MoveEvent {
    let mut e = MoveEvent::pending(run.run_id, move_type, sequence);
    if let Some(out) = output_for(move_type) {
        e = e.with_outputs(MoveStatus::Success, out);
    } else {
        e = e.failed("not scripted");
    }
    if let (true, Some(prev)) = (backtrack, previous) {
        e = e.backtracking(prev.id, BacktrackReason::FramingShift);
    }
    e
}

proptest! {
    /// Tenet: history is a log, not a table.
    ///
    /// Whatever mix of forward and backtrack events is appended, every event
    /// already stored reads back byte-for-byte unchanged.
    #[test]
    fn appends_never_rewrite_history(steps in prop::collection::vec((0u8..2, any::<bool>()), 1..24)) {
        let store = InMemoryEventStore::new();
        let run = Run::new("site 12 redevelopment");
        store.create_run(run.clone()).unwrap();

        let mut seen: Vec<MoveEvent> = Vec::new();
        for (i, (which, backtrack)) in steps.into_iter().enumerate() {
            let move_type = MoveType::ALL[usize::from(which)];
            let e = event(&run, i as u64 + 1, move_type, backtrack, seen.last());
            store.append(e.clone()).unwrap();
            seen.push(e);

            let stored = store.events(run.run_id).unwrap();
            prop_assert_eq!(&stored, &seen);
            prop_assert!(stored.windows(2).all(|w| w[0].sequence < w[1].sequence));
        }
    }
}

/// Tenet: export and re-import reproduce the store exactly.
#[test]
fn jsonl_round_trip_preserves_runs_and_status() {
    let store = InMemoryEventStore::new();
    let run = Run::new("brief").with_profile_tag("officer-report");
    store.create_run(run.clone()).unwrap();
    let first = event(&run, 1, MoveType::Framing, false, None);
    let second = event(&run, 2, MoveType::IssueSurfacing, false, None);
    let third = event(&run, 3, MoveType::Framing, true, Some(&second));
    for e in [&first, &second, &third] {
        store.append(e.clone()).unwrap();
    }
    store
        .mark_status(RunStatusMark {
            run_id: run.run_id,
            status: RunStatus::NonConformant,
            reasons: vec!["no trajectories".into()],
            at: chrono::Utc::now(),
        })
        .unwrap();

    let mut file = tempfile::tempfile().unwrap();
    store.export_jsonl(&mut file).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let restored = InMemoryEventStore::import_jsonl(BufReader::new(file)).unwrap();

    assert_eq!(restored.run_ids(), vec![run.run_id]);
    assert_eq!(restored.run(run.run_id).unwrap(), run);
    assert_eq!(restored.events(run.run_id).unwrap(), vec![first, second, third]);
    assert_eq!(
        restored.status(run.run_id).unwrap().map(|m| m.status),
        Some(RunStatus::NonConformant)
    );
}

/// Tenet: a tampered export with a gap in sequence numbers is refused.
#[test]
fn import_rejects_sequence_gaps() {
    let run = Run::new("brief");
    let lines = [
        serde_json::to_string(&delib_grammar::StoredRecord::Run(run.clone())).unwrap(),
        serde_json::to_string(&delib_grammar::StoredRecord::Event(Box::new(event(
            &run,
            2,
            MoveType::Framing,
            false,
            None,
        ))))
        .unwrap(),
    ];
    let data = lines.join("\n");
    assert!(InMemoryEventStore::import_jsonl(data.as_bytes()).is_err());
}
