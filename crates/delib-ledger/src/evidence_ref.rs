//! Stable evidence pointers
//!
//! An [`EvidenceRef`] has the textual form
//! `{source_type}::{source_id}::{fragment_selector}`. The first two components
//! never contain the separator; the fragment may (selectors such as
//! `page::4` are common), so parsing splits on the first two separators only.

use crate::error::EvidenceRefError;
use crate::ids::ToolRunId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SEPARATOR: &str = "::";

/// Pointer to an atomic sourced fact
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EvidenceRef {
    source_type: String,
    source_id: String,
    fragment: String,
}

impl EvidenceRef {
    /// Build a reference from its three components
    ///
    /// # Errors
    /// Returns error if a component is blank or a leading component contains `::`
    pub fn new(
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Result<Self, EvidenceRefError> {
        let source_type = source_type.into();
        let source_id = source_id.into();
        let fragment = fragment.into();

        for (name, value) in [
            ("source_type", &source_type),
            ("source_id", &source_id),
            ("fragment", &fragment),
        ] {
            if value.trim().is_empty() {
                return Err(EvidenceRefError::EmptyComponent(name));
            }
        }
        if source_type.contains(SEPARATOR) || source_id.contains(SEPARATOR) {
            return Err(EvidenceRefError::Malformed(format!(
                "{source_type}{SEPARATOR}{source_id}{SEPARATOR}{fragment}"
            )));
        }

        Ok(Self {
            source_type,
            source_id,
            fragment,
        })
    }

    #[inline]
    #[must_use]
    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    #[inline]
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    #[inline]
    #[must_use]
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// `source_type::source_id`, the document-level identity of the atom
    #[must_use]
    pub fn source_key(&self) -> String {
        format!("{}{SEPARATOR}{}", self.source_type, self.source_id)
    }

    /// Whether two atoms come from the same underlying source
    #[inline]
    #[must_use]
    pub fn same_source(&self, other: &Self) -> bool {
        self.source_type == other.source_type && self.source_id == other.source_id
    }
}

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.source_type, self.source_id, self.fragment
        )
    }
}

impl FromStr for EvidenceRef {
    type Err = EvidenceRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(source_type), Some(source_id), Some(fragment)) => {
                Self::new(source_type, source_id, fragment)
            }
            _ => Err(EvidenceRefError::Malformed(s.to_string())),
        }
    }
}

impl Serialize for EvidenceRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EvidenceRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Provenance carried by every derived node and edge
///
/// At least one side must be present for a lattice write to be accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_ref: Option<EvidenceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_run_id: Option<ToolRunId>,
}

impl Provenance {
    #[must_use]
    pub fn evidence(evidence_ref: EvidenceRef) -> Self {
        Self {
            evidence_ref: Some(evidence_ref),
            tool_run_id: None,
        }
    }

    #[must_use]
    pub fn tool_run(tool_run_id: ToolRunId) -> Self {
        Self {
            evidence_ref: None,
            tool_run_id: Some(tool_run_id),
        }
    }

    #[must_use]
    pub fn with_tool_run(mut self, tool_run_id: ToolRunId) -> Self {
        self.tool_run_id = Some(tool_run_id);
        self
    }

    /// Neither an evidence ref nor a tool run
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evidence_ref.is_none() && self.tool_run_id.is_none()
    }
}
