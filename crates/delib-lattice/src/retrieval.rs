//! Retrieval provider contract and candidate shape
//!
//! Ranking happens inside providers. The lattice only needs each hit to carry
//! a score and a resolvable evidence ref.

use delib_ledger::{EvidenceRef, ToolRunId, ToolStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Evidence modality a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Spatial,
    Visual,
    Precedent,
    /// Reached by traversing the run graph rather than by search
    Graph,
}

impl Modality {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Spatial => "spatial",
            Modality::Visual => "visual",
            Modality::Precedent => "precedent",
            Modality::Graph => "graph",
        }
    }
}

/// How a provider should combine lexical and dense retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Keyword,
    Vector,
    /// Keyword and vector results merged by the provider
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub index: String,
    pub query: String,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    pub top_k: usize,
    pub strategy: SearchStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub record_id: String,
    pub score: f32,
    pub evidence_ref: EvidenceRef,
    #[serde(default)]
    pub metadata: Value,
}

/// Failures reported by any external provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider call failed: {0}")]
    Failed(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider call timed out")]
    Timeout,

    #[error("provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Ledger status recorded for a call that failed this way
    #[must_use]
    pub fn tool_status(&self) -> ToolStatus {
        match self {
            ProviderError::Unavailable(_) => ToolStatus::Unavailable,
            ProviderError::Timeout => ToolStatus::TimedOut,
            ProviderError::Cancelled => ToolStatus::Cancelled,
            ProviderError::Failed(_) | ProviderError::MalformedResponse(_) => ToolStatus::Error,
        }
    }
}

/// Search over an external index
#[async_trait::async_trait]
pub trait RetrievalProvider: Send + Sync {
    /// Name used in tool run records
    fn name(&self) -> &str;

    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, ProviderError>;
}

/// One modality generator: a provider bound to an index
#[derive(Clone)]
pub struct CandidateSource {
    pub modality: Modality,
    pub index: String,
    pub strategy: SearchStrategy,
    pub provider: Arc<dyn RetrievalProvider>,
}

impl CandidateSource {
    pub fn new(modality: Modality, index: impl Into<String>, provider: Arc<dyn RetrievalProvider>) -> Self {
        Self {
            modality,
            index: index.into(),
            strategy: SearchStrategy::default(),
            provider,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Tool name recorded in the ledger for calls through this source
    #[must_use]
    pub fn tool_name(&self) -> String {
        format!("retrieval.{}.{}", self.modality.as_str(), self.provider.name())
    }
}

impl std::fmt::Debug for CandidateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateSource")
            .field("modality", &self.modality)
            .field("index", &self.index)
            .field("strategy", &self.strategy)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// A scored evidence candidate awaiting selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub evidence_ref: EvidenceRef,
    pub record_id: String,
    pub score: f32,
    pub modality: Modality,
    /// Issue ids this candidate was retrieved for
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_run_id: Option<ToolRunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl Candidate {
    /// Build from a search hit, keeping `metadata.text` as the excerpt
    pub fn from_hit(hit: SearchHit, modality: Modality, issue: Option<&str>, tool_run_id: ToolRunId) -> Self {
        let excerpt = hit
            .metadata
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            evidence_ref: hit.evidence_ref,
            record_id: hit.record_id,
            score: hit.score,
            modality,
            issues: issue.map(|i| vec![i.to_string()]).unwrap_or_default(),
            tool_run_id: Some(tool_run_id),
            excerpt,
        }
    }
}
