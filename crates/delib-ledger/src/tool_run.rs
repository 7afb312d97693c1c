//! Tool run envelopes
//!
//! A [`ToolInvocation`] is what a caller hands to the ledger; a [`ToolRun`] is
//! what the ledger stores after applying the [`CaptureLevel`] retention rule
//! and sealing the record into the hash chain.

use crate::hash::ContentHash;
use crate::ids::{Timestamp, ToolRunId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of an external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    /// Provider not reachable or not configured
    Unavailable,
    TimedOut,
    Cancelled,
}

impl ToolStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
            ToolStatus::Unavailable => "unavailable",
            ToolStatus::TimedOut => "timed_out",
            ToolStatus::Cancelled => "cancelled",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, ToolStatus::Success)
    }
}

/// Trace retention policy
///
/// - `Summary`: inputs and outputs are reduced to digests
/// - `Inspect`: outputs kept in full, inputs reduced to digests
/// - `Forensic`: everything kept in full
///
/// Identity fields (tool name, status, timing, prompt ref, model id, error
/// text) are retained at every level. Replay never reads tool payloads, so
/// every level stays replayable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureLevel {
    Summary,
    #[default]
    Inspect,
    Forensic,
}

impl CaptureLevel {
    #[must_use]
    pub fn keeps_inputs(self) -> bool {
        matches!(self, CaptureLevel::Forensic)
    }

    #[must_use]
    pub fn keeps_outputs(self) -> bool {
        !matches!(self, CaptureLevel::Summary)
    }
}

/// A tool payload as retained by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "retained", rename_all = "snake_case")]
pub enum LoggedPayload {
    Full { value: Value },
    Digest { hash: ContentHash, bytes: usize },
}

impl LoggedPayload {
    /// Apply the retention rule to a payload
    #[must_use]
    pub fn capture(value: Value, keep: bool) -> Self {
        if keep {
            return LoggedPayload::Full { value };
        }
        let encoded = value.to_string();
        LoggedPayload::Digest {
            hash: ContentHash::compute(encoded.as_bytes()),
            bytes: encoded.len(),
        }
    }

    /// Digest of the payload regardless of retention
    #[must_use]
    pub fn digest(&self) -> ContentHash {
        match self {
            LoggedPayload::Full { value } => ContentHash::compute(value.to_string().as_bytes()),
            LoggedPayload::Digest { hash, .. } => *hash,
        }
    }

    #[must_use]
    pub fn as_full(&self) -> Option<&Value> {
        match self {
            LoggedPayload::Full { value } => Some(value),
            LoggedPayload::Digest { .. } => None,
        }
    }
}

/// Stable prompt identity echoed back by language providers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptRef {
    pub id: String,
    pub version: String,
}

impl PromptRef {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for PromptRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// An external call as reported by its wrapper, before retention is applied
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub inputs: Value,
    pub outputs: Value,
    pub status: ToolStatus,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub confidence: Option<f32>,
    pub prompt: Option<PromptRef>,
    pub model_id: Option<String>,
    pub error: Option<String>,
}

impl ToolInvocation {
    /// Start describing a call; timing defaults to "now" for both ends
    pub fn new(tool_name: impl Into<String>, inputs: Value) -> Self {
        let now = chrono::Utc::now();
        Self {
            tool_name: tool_name.into(),
            inputs,
            outputs: Value::Null,
            status: ToolStatus::Success,
            started_at: now,
            ended_at: now,
            confidence: None,
            prompt: None,
            model_id: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ToolStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn timed(mut self, started_at: Timestamp, ended_at: Timestamp) -> Self {
        self.started_at = started_at;
        self.ended_at = ended_at;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptRef) -> Self {
        self.prompt = Some(prompt);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Mark the call failed with a reason
    #[must_use]
    pub fn failed(mut self, status: ToolStatus, error: impl Into<String>) -> Self {
        self.status = status;
        self.error = Some(error.into());
        self
    }
}

/// Immutable ledger entry for one external call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub id: ToolRunId,
    /// Position in the ledger
    pub sequence: u64,
    pub tool_name: String,
    pub inputs: LoggedPayload,
    pub outputs: LoggedPayload,
    pub status: ToolStatus,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub capture: CaptureLevel,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

impl ToolRun {
    /// Duration of the call in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}
