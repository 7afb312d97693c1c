//! Append-only tool run log
//!
//! Entries are hash-chained: each [`ToolRun`] stores the hash of its
//! predecessor, so any in-place edit is caught by [`InMemoryLedger::verify_integrity`].

use crate::error::LedgerError;
use crate::ids::ToolRunId;
use crate::tool_run::{CaptureLevel, LoggedPayload, ToolInvocation, ToolRun};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::io::{BufRead, Write};

/// Record / resolve contract over the provenance log
pub trait ProvenanceLedger: Send + Sync + std::fmt::Debug {
    /// Append a tool run and return its id
    fn record(&self, invocation: ToolInvocation) -> Result<ToolRunId, LedgerError>;

    /// Look up a previously recorded tool run
    fn resolve(&self, id: ToolRunId) -> Result<ToolRun, LedgerError>;

    /// Whether the id was ever recorded
    fn contains(&self, id: ToolRunId) -> bool;

    /// Number of recorded tool runs
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local ledger
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    capture: CaptureLevel,
    inner: Mutex<Vec<ToolRun>>,
    index: DashMap<ToolRunId, usize>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new(capture: CaptureLevel) -> Self {
        Self {
            capture,
            inner: Mutex::new(Vec::new()),
            index: DashMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn capture_level(&self) -> CaptureLevel {
        self.capture
    }

    /// Snapshot of every entry in append order
    pub fn runs(&self) -> Vec<ToolRun> {
        self.inner.lock().clone()
    }

    /// Walk the hash chain from the genesis entry
    pub fn verify_integrity(&self) -> Result<(), LedgerError> {
        verify_chain(&self.inner.lock())
    }

    /// Write entries as JSON Lines
    pub fn export_jsonl<W: Write>(&self, mut writer: W) -> Result<(), LedgerError> {
        for run in self.inner.lock().iter() {
            serde_json::to_writer(&mut writer, run)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Rebuild a ledger from JSON Lines, re-verifying the chain
    pub fn import_jsonl<R: BufRead>(reader: R, capture: CaptureLevel) -> Result<Self, LedgerError> {
        let ledger = Self::new(capture);
        {
            let mut guard = ledger.inner.lock();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let run: ToolRun = serde_json::from_str(&line)?;
                if ledger.index.contains_key(&run.id) {
                    return Err(LedgerError::DuplicateId(run.id));
                }
                ledger.index.insert(run.id, guard.len());
                guard.push(run);
            }
            verify_chain(&guard)?;
        }
        Ok(ledger)
    }
}

impl ProvenanceLedger for InMemoryLedger {
    fn record(&self, invocation: ToolInvocation) -> Result<ToolRunId, LedgerError> {
        if invocation.tool_name.trim().is_empty() {
            return Err(LedgerError::InvalidRecord("tool name is empty".into()));
        }
        if invocation.ended_at < invocation.started_at {
            return Err(LedgerError::InvalidRecord(format!(
                "{} ended before it started",
                invocation.tool_name
            )));
        }

        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map(|r| r.hash).unwrap_or([0u8; 32]);
        let mut run = ToolRun {
            id: ToolRunId::new(),
            sequence: guard.len() as u64,
            tool_name: invocation.tool_name,
            inputs: LoggedPayload::capture(invocation.inputs, self.capture.keeps_inputs()),
            outputs: LoggedPayload::capture(invocation.outputs, self.capture.keeps_outputs()),
            status: invocation.status,
            started_at: invocation.started_at,
            ended_at: invocation.ended_at,
            confidence: invocation.confidence,
            prompt: invocation.prompt,
            model_id: invocation.model_id,
            error: invocation.error,
            capture: self.capture,
            prev_hash,
            hash: [0u8; 32],
        };
        run.hash = compute_hash(&run);

        let id = run.id;
        tracing::debug!(tool = %run.tool_name, status = run.status.as_str(), %id, "tool run recorded");
        self.index.insert(id, guard.len());
        guard.push(run);
        Ok(id)
    }

    fn resolve(&self, id: ToolRunId) -> Result<ToolRun, LedgerError> {
        let position = *self.index.get(&id).ok_or(LedgerError::NotFound(id))?;
        self.inner
            .lock()
            .get(position)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    fn contains(&self, id: ToolRunId) -> bool {
        self.index.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

fn verify_chain(runs: &[ToolRun]) -> Result<(), LedgerError> {
    let mut prev = [0u8; 32];
    for (index, run) in runs.iter().enumerate() {
        if run.prev_hash != prev || run.sequence != index as u64 || run.hash != compute_hash(run) {
            return Err(LedgerError::IntegrityViolation { index });
        }
        prev = run.hash;
    }
    Ok(())
}

fn compute_hash(run: &ToolRun) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(run.id.0.to_bytes());
    hasher.update(run.sequence.to_le_bytes());
    hasher.update(run.tool_name.as_bytes());
    hasher.update([0]);
    hasher.update(run.inputs.digest().as_bytes());
    hasher.update(run.outputs.digest().as_bytes());
    hasher.update(run.status.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(run.started_at.timestamp_micros().to_le_bytes());
    hasher.update(run.ended_at.timestamp_micros().to_le_bytes());
    if let Some(confidence) = run.confidence {
        hasher.update(confidence.to_le_bytes());
    }
    if let Some(prompt) = &run.prompt {
        hasher.update(prompt.to_string().as_bytes());
    }
    hasher.update([0]);
    if let Some(model) = &run.model_id {
        hasher.update(model.as_bytes());
    }
    hasher.update([0]);
    if let Some(error) = &run.error {
        hasher.update(error.as_bytes());
    }
    hasher.update([0]);
    hasher.update(run.prev_hash);
    hasher.finalize().into()
}
