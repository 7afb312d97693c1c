//! Engine configuration
//!
//! Loaded from TOML. Every section and field has a default, so an empty file
//! is a valid configuration.

use crate::error::ConfigError;
use delib_governance::GovernanceConfig;
use delib_grammar::MoveType;
use delib_lattice::{EdgeKind, PackBudgets, TraversalBudget, TraversalSpec};
use delib_ledger::CaptureLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub moves: MoveConfig,
    pub traversal: TraversalConfig,
    pub packs: PackBudgets,
    pub governance: GovernanceConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    ///
    /// # Errors
    /// `Parse` if the document is not valid TOML for this shape
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `Io` if the file cannot be read, otherwise as [`EngineConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `Serialize` if a value cannot be represented in TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values no run could work with
    ///
    /// # Errors
    /// `Invalid` naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.moves.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid("moves.default_timeout_secs must be positive".into()));
        }
        if let Some((name, _)) = self.moves.timeouts.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::Invalid(format!("moves.timeouts.{name} must be positive")));
        }
        if let Some(name) = self
            .moves
            .timeouts
            .keys()
            .find(|k| !MoveType::ALL.iter().any(|m| m.as_str() == k.as_str()))
        {
            return Err(ConfigError::Invalid(format!("moves.timeouts.{name} is not a move")));
        }
        if self.traversal.max_nodes == 0 {
            return Err(ConfigError::Invalid("traversal.max_nodes must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.governance.low_confidence_threshold) {
            return Err(ConfigError::Invalid(
                "governance.low_confidence_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// With capture level
    #[inline]
    #[must_use]
    pub fn with_capture(mut self, level: CaptureLevel) -> Self {
        self.capture.level = level;
        self
    }

    /// With a timeout for one move
    #[inline]
    #[must_use]
    pub fn with_move_timeout(mut self, move_type: MoveType, timeout: Duration) -> Self {
        self.moves
            .timeouts
            .insert(move_type.as_str().to_string(), timeout.as_secs().max(1));
        self
    }

    /// With traversal ceilings
    #[inline]
    #[must_use]
    pub fn with_traversal_budget(mut self, max_hops: usize, max_nodes: usize) -> Self {
        self.traversal.max_hops = max_hops;
        self.traversal.max_nodes = max_nodes;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_packs(mut self, packs: PackBudgets) -> Self {
        self.packs = packs;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_governance(mut self, governance: GovernanceConfig) -> Self {
        self.governance = governance;
        self
    }
}

/// Trace retention
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub level: CaptureLevel,
}

/// Per-move time budgets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveConfig {
    pub default_timeout_secs: u64,
    /// Overrides keyed by move name, e.g. `evidence_curation = 120`
    pub timeouts: BTreeMap<String, u64>,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300,
            timeouts: BTreeMap::new(),
        }
    }
}

impl MoveConfig {
    #[must_use]
    pub fn timeout_for(&self, move_type: MoveType) -> Duration {
        let secs = self
            .timeouts
            .get(move_type.as_str())
            .copied()
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }
}

/// Traversal ceilings and the edge kinds walked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub max_hops: usize,
    pub max_nodes: usize,
    pub edge_kinds: Vec<EdgeKind>,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        let spec = TraversalSpec::default();
        Self {
            max_hops: spec.budget.max_hops,
            max_nodes: spec.budget.max_nodes,
            edge_kinds: spec.edge_kinds,
        }
    }
}

impl TraversalConfig {
    #[must_use]
    pub fn to_spec(&self) -> TraversalSpec {
        TraversalSpec {
            budget: TraversalBudget {
                max_hops: self.max_hops,
                max_nodes: self.max_nodes,
            },
            edge_kinds: self.edge_kinds.clone(),
            ..TraversalSpec::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "info".into(),
        }
    }
}
