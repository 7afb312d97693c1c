//! Error types for governance

/// Linter construction failures
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("invalid identifier pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
