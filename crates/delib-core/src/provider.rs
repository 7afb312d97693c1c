//! External provider interfaces
//!
//! Language, segmentation, vectorization and document-parse providers sit
//! behind these traits. Retrieval lives in the lattice crate and is
//! re-exported here. Every call goes through [`crate::tools::ToolRunner`],
//! which records it in the ledger.

use async_trait::async_trait;
use delib_lattice::ParsedDocument;
use delib_ledger::{EvidenceRef, PromptRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use delib_lattice::{ProviderError, RetrievalProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

/// A request for JSON output conforming to `schema`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRequest {
    pub messages: Vec<ChatMessage>,
    pub schema: Value,
    pub prompt: PromptRef,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub json: Value,
    pub model_id: String,
    /// Must echo the request's prompt ref
    pub prompt: PromptRef,
}

/// Structured text generation
#[async_trait]
pub trait LanguageProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_structured(&self, request: StructuredRequest) -> Result<StructuredResponse, ProviderError>;
}

/// A raster image held as evidence (site photo, plan drawing, aerial tile)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterRef {
    pub evidence_ref: EvidenceRef,
    pub uri: String,
}

/// Segmentation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Run-length encoded pixels
    pub rle: Vec<u32>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// A vector feature traced from a raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorFeature {
    pub id: String,
    pub label: String,
    /// GeoJSON geometry
    pub geometry: Value,
    #[serde(default)]
    pub properties: Value,
}

#[async_trait]
pub trait SegmentationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn segment(&self, raster: RasterRef) -> Result<Mask, ProviderError>;
}

#[async_trait]
pub trait VectorizationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn vectorize(&self, raster: RasterRef, mask: Option<Mask>) -> Result<Vec<VectorFeature>, ProviderError>;
}

/// A document to be parsed into pages, chunks and tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSource {
    pub source_type: String,
    pub source_id: String,
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[async_trait]
pub trait DocParseProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn parse(&self, source: DocumentSource) -> Result<ParsedDocument, ProviderError>;
}
