//! Replay from persisted records

use crate::artifact::{render, Rendered};
use crate::error::ReplayError;
use delib_grammar::EventStore;
use delib_ledger::{ContentHash, ProvenanceLedger, RunId};
use std::sync::Arc;

/// Re-projects stored runs. Holds no providers, so a replay cannot call one.
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    store: Arc<dyn EventStore>,
    ledger: Arc<dyn ProvenanceLedger>,
}

impl ReplayEngine {
    pub fn new(store: Arc<dyn EventStore>, ledger: Arc<dyn ProvenanceLedger>) -> Self {
        Self { store, ledger }
    }

    /// Render a stored run
    ///
    /// # Errors
    /// Store lookups and unresolved tool runs
    #[tracing::instrument(skip(self))]
    pub fn replay(&self, run_id: RunId) -> Result<Rendered, ReplayError> {
        let ctx = self.store.context(run_id)?;
        let rendered = render(&ctx, self.ledger.as_ref())?;
        tracing::info!(events = ctx.events.len(), hash = %rendered.hash.short(), "replayed run");
        Ok(rendered)
    }

    /// Whether a stored run still renders to `expected`
    ///
    /// # Errors
    /// Same as [`ReplayEngine::replay`]
    pub fn verify(&self, run_id: RunId, expected: &ContentHash) -> Result<bool, ReplayError> {
        let rendered = self.replay(run_id)?;
        if &rendered.hash != expected {
            tracing::warn!(%run_id, expected = %expected.short(), got = %rendered.hash.short(), "replay hash mismatch");
            return Ok(false);
        }
        Ok(true)
    }
}
