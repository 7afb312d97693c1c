//! Append-only move event store

use crate::error::StoreError;
use crate::event::MoveEvent;
use crate::run::{GovernanceOverride, Run, RunContext, RunStatusMark};
use delib_ledger::RunId;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

/// Persistent record of runs and their move events
///
/// Events are only ever appended. Sequence numbers are strictly increasing
/// per run, starting at 1.
pub trait EventStore: Send + Sync + std::fmt::Debug {
    fn create_run(&self, run: Run) -> Result<(), StoreError>;

    fn run(&self, run_id: RunId) -> Result<Run, StoreError>;

    /// Run ids in creation order
    fn run_ids(&self) -> Vec<RunId>;

    fn append(&self, event: MoveEvent) -> Result<(), StoreError>;

    fn events(&self, run_id: RunId) -> Result<Vec<MoveEvent>, StoreError>;

    fn record_override(&self, record: GovernanceOverride) -> Result<(), StoreError>;

    fn overrides(&self, run_id: RunId) -> Result<Vec<GovernanceOverride>, StoreError>;

    fn mark_status(&self, mark: RunStatusMark) -> Result<(), StoreError>;

    /// Latest status mark, if any
    fn status(&self, run_id: RunId) -> Result<Option<RunStatusMark>, StoreError>;

    /// Snapshot of everything a move needs about its run
    fn context(&self, run_id: RunId) -> Result<RunContext, StoreError> {
        Ok(RunContext::new(
            self.run(run_id)?,
            self.events(run_id)?,
            self.overrides(run_id)?,
        ))
    }
}

/// One line of the JSON Lines export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum StoredRecord {
    Run(Run),
    Event(Box<MoveEvent>),
    Override(GovernanceOverride),
    Status(RunStatusMark),
}

#[derive(Debug)]
struct RunRecord {
    run: Run,
    events: Vec<MoveEvent>,
    overrides: Vec<GovernanceOverride>,
    marks: Vec<RunStatusMark>,
}

/// In-memory event store with JSON Lines persistence
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    runs: RwLock<IndexMap<RunId, RunRecord>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every run and its records, in append order
    pub fn export_jsonl<W: Write>(&self, mut writer: W) -> Result<(), StoreError> {
        let runs = self.runs.read();
        for record in runs.values() {
            let mut lines = vec![StoredRecord::Run(record.run.clone())];
            lines.extend(record.events.iter().cloned().map(|e| StoredRecord::Event(Box::new(e))));
            lines.extend(record.overrides.iter().cloned().map(StoredRecord::Override));
            lines.extend(record.marks.iter().cloned().map(StoredRecord::Status));
            for line in lines {
                serde_json::to_writer(&mut writer, &line)?;
                writer.write_all(b"\n")?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Rebuild a store; every event goes back through `append` validation
    pub fn import_jsonl<R: BufRead>(reader: R) -> Result<Self, StoreError> {
        let store = Self::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredRecord>(&line)? {
                StoredRecord::Run(run) => store.create_run(run)?,
                StoredRecord::Event(event) => store.append(*event)?,
                StoredRecord::Override(o) => store.record_override(o)?,
                StoredRecord::Status(mark) => store.mark_status(mark)?,
            }
        }
        Ok(store)
    }

    fn with_run<T>(&self, run_id: RunId, f: impl FnOnce(&RunRecord) -> T) -> Result<T, StoreError> {
        self.runs
            .read()
            .get(&run_id)
            .map(f)
            .ok_or(StoreError::UnknownRun(run_id))
    }

    fn with_run_mut<T>(
        &self,
        run_id: RunId,
        f: impl FnOnce(&mut RunRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut runs = self.runs.write();
        let record = runs.get_mut(&run_id).ok_or(StoreError::UnknownRun(run_id))?;
        f(record)
    }
}

impl EventStore for InMemoryEventStore {
    fn create_run(&self, run: Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        if runs.contains_key(&run.run_id) {
            return Err(StoreError::DuplicateRun(run.run_id));
        }
        tracing::info!(run = %run.run_id, anchors = run.anchors.len(), "run created");
        runs.insert(
            run.run_id,
            RunRecord {
                run,
                events: Vec::new(),
                overrides: Vec::new(),
                marks: Vec::new(),
            },
        );
        Ok(())
    }

    fn run(&self, run_id: RunId) -> Result<Run, StoreError> {
        self.with_run(run_id, |r| r.run.clone())
    }

    fn run_ids(&self) -> Vec<RunId> {
        self.runs.read().keys().copied().collect()
    }

    fn append(&self, event: MoveEvent) -> Result<(), StoreError> {
        self.with_run_mut(event.run_id, |record| {
            let expected = record.events.last().map_or(1, |e| e.sequence + 1);
            if event.sequence != expected {
                return Err(StoreError::SequenceViolation {
                    run_id: event.run_id,
                    event: event.id,
                    expected,
                    got: event.sequence,
                });
            }
            if record.events.iter().any(|e| e.id == event.id) {
                return Err(StoreError::DuplicateEvent(event.id));
            }
            if event.ended_at < event.started_at {
                return Err(StoreError::InvalidRecord(format!("event {} ended before it started", event.id)));
            }
            tracing::debug!(
                run = %event.run_id,
                sequence = event.sequence,
                r#move = %event.move_type,
                status = ?event.status,
                "move event appended"
            );
            record.events.push(event);
            Ok(())
        })
    }

    fn events(&self, run_id: RunId) -> Result<Vec<MoveEvent>, StoreError> {
        self.with_run(run_id, |r| r.events.clone())
    }

    fn record_override(&self, record: GovernanceOverride) -> Result<(), StoreError> {
        if record.justification.trim().is_empty() {
            return Err(StoreError::InvalidRecord("override needs a justification".into()));
        }
        self.with_run_mut(record.run_id, |r| {
            r.overrides.push(record);
            Ok(())
        })
    }

    fn overrides(&self, run_id: RunId) -> Result<Vec<GovernanceOverride>, StoreError> {
        self.with_run(run_id, |r| r.overrides.clone())
    }

    fn mark_status(&self, mark: RunStatusMark) -> Result<(), StoreError> {
        self.with_run_mut(mark.run_id, |r| {
            r.marks.push(mark);
            Ok(())
        })
    }

    fn status(&self, run_id: RunId) -> Result<Option<RunStatusMark>, StoreError> {
        self.with_run(run_id, |r| r.marks.last().cloned())
    }
}
