//! Suppression store: persistent patterns that silence specific stitched
//! edges. Patterns are globs over node ids (`*` wildcard only) and may be
//! scoped to an edge type or a rule.

use crate::error::ConfigError;
use crate::types::{Edge, RelationshipType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub source_pattern: String,
    pub target_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<RelationshipType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SuppressionEntry {
    pub fn new(source_pattern: impl Into<String>, target_pattern: impl Into<String>) -> Self {
        SuppressionEntry {
            source_pattern: source_pattern.into(),
            target_pattern: target_pattern.into(),
            edge_type: None,
            rule: None,
            reason: None,
        }
    }

    /// Parse the `"source -> target"` shorthand used in config files.
    pub fn parse(pattern: &str) -> Option<Self> {
        let (source, target) = pattern.split_once("->")?;
        let source = source.trim();
        let target = target.trim();
        if source.is_empty() || target.is_empty() {
            return None;
        }
        Some(SuppressionEntry::new(source, target))
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_edge_type(mut self, edge_type: RelationshipType) -> Self {
        self.edge_type = Some(edge_type);
        self
    }

    pub fn matches(&self, source_id: &str, target_id: &str, edge_type: RelationshipType) -> bool {
        if let Some(scoped) = self.edge_type {
            if scoped != edge_type {
                return false;
            }
        }
        glob_match(&self.source_pattern, source_id) && glob_match(&self.target_pattern, target_id)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct SuppressionStore {
    entries: Vec<SuppressionEntry>,
    path: Option<PathBuf>,
}

impl SuppressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard location: `<root>/.jnkn/suppressions.yaml`.
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(".jnkn").join("suppressions.yaml")
    }

    /// Load from disk; a missing file is an empty store, not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(SuppressionStore { entries: Vec::new(), path: Some(path.to_path_buf()) });
        }
        let text = std::fs::read_to_string(path)?;
        let entries: Vec<SuppressionEntry> = serde_yaml::from_str(&text)?;
        Ok(SuppressionStore { entries, path: Some(path.to_path_buf()) })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Err(ConfigError::Invalid("suppression store has no backing file".to_string()));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(&self.entries)?)?;
        Ok(())
    }

    pub fn add(&mut self, entry: SuppressionEntry) {
        self.entries.push(entry);
    }

    /// Orientation-agnostic: a pattern written `env:USER_* -> infra:*`
    /// shadows the stitched `infra → env` edge as well. Users think in
    /// terms of the pair, not the arrow.
    pub fn is_suppressed(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: RelationshipType,
    ) -> bool {
        self.entries.iter().any(|e| {
            e.matches(source_id, target_id, edge_type) || e.matches(target_id, source_id, edge_type)
        })
    }

    pub fn is_edge_suppressed(&self, edge: &Edge) -> bool {
        self.is_suppressed(&edge.source_id, &edge.target_id, edge.edge_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SuppressionEntry> {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// Glob matching
// ---------------------------------------------------------------------------

/// `*`-only glob match. The literal prefix is checked first so the common
/// `env:USER_*` shape costs one comparison.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let mut segments = pattern.split('*');
    let first = segments.next().unwrap_or("");
    if !value.starts_with(first) {
        return false;
    }
    let segments: Vec<&str> = segments.collect();
    if segments.is_empty() {
        // No wildcard at all: exact match.
        return value == first;
    }

    let mut position = first.len();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        let is_last = i == segments.len() - 1;
        if is_last && pattern.ends_with(*segment) {
            // Final literal segment must anchor to the end.
            return value.len() >= position + segment.len() && value.ends_with(segment);
        }
        match value[position..].find(segment) {
            Some(found) => position += found + segment.len(),
            None => return false,
        }
    }
    true
}
