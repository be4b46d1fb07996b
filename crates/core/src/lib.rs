//! jnkn core — cross-domain dependency graph of a repository.
//!
//! Parses application source, infrastructure-as-code, container manifests,
//! data-pipeline manifests, and runtime lineage events into one node/edge
//! model, stitches semantically related nodes across domains, and answers
//! impact queries from a persistent SQLite graph.

pub mod analysis;
pub mod config;
pub mod confidence;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod parsing;
pub mod stitching;
pub mod storage;
pub mod suppression;
pub mod tokens;
pub mod types;
pub mod watch;

pub use analysis::{BlastRadiusAnalyzer, BlastRadiusReport, CheckEngine, CheckReport, CheckResult};
pub use config::{ProjectConfig, ScanConfig};
pub use confidence::{ConfidenceCalculator, ConfidenceResult, RULE_SET_VERSION};
pub use error::{CheckError, ConfigError, ManifestError, StoreError, WatchError};
pub use graph::DependencyGraph;
pub use manifest::{DependencyResolver, ProjectManifest};
pub use parsing::{ParserEngine, ScanSummary};
pub use stitching::{StitchConfig, Stitcher};
pub use storage::SqliteStore;
pub use suppression::{SuppressionEntry, SuppressionStore};
pub use types::{Edge, Node, NodeType, ParseResult, RelationshipType, ScanMetadata};
pub use watch::WatchService;

use std::path::{Path, PathBuf};

/// Standard state directory under a project root.
pub fn jnkn_dir(root: &Path) -> PathBuf {
    root.join(".jnkn")
}

/// Standard database location under a project root.
pub fn db_path(root: &Path) -> PathBuf {
    jnkn_dir(root).join("jnkn.db")
}
