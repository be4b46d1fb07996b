//! Core node/edge model shared by every subsystem.
//!
//! Nodes are named artifacts in some domain (a file, an env var, a Terraform
//! resource, a dbt model). Edges are directed typed relations between them.
//! Relationships live only in the edge table; nodes own no pointers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Free-form metadata envelope. `BTreeMap` keeps serialization stable so
/// repeated scans of unchanged inputs produce byte-identical rows.
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Node and relationship types (closed sets)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    File,
    EnvVar,
    ConfigKey,
    Secret,
    InfraResource,
    DataAsset,
    Job,
    Column,
    CodeEntity,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::File => "file",
            NodeType::EnvVar => "env_var",
            NodeType::ConfigKey => "config_key",
            NodeType::Secret => "secret",
            NodeType::InfraResource => "infra_resource",
            NodeType::DataAsset => "data_asset",
            NodeType::Job => "job",
            NodeType::Column => "column",
            NodeType::CodeEntity => "code_entity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(NodeType::File),
            "env_var" => Some(NodeType::EnvVar),
            "config_key" => Some(NodeType::ConfigKey),
            "secret" => Some(NodeType::Secret),
            "infra_resource" => Some(NodeType::InfraResource),
            "data_asset" => Some(NodeType::DataAsset),
            "job" => Some(NodeType::Job),
            "column" => Some(NodeType::Column),
            "code_entity" => Some(NodeType::CodeEntity),
            _ => None,
        }
    }

    /// Id scheme prefix for this node type.
    pub fn scheme(&self) -> &'static str {
        match self {
            NodeType::File => "file",
            NodeType::EnvVar => "env",
            NodeType::ConfigKey => "config",
            NodeType::Secret => "secret",
            NodeType::InfraResource => "infra",
            NodeType::DataAsset => "data",
            NodeType::Job => "job",
            NodeType::Column => "column",
            NodeType::CodeEntity => "code",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Reads,
    Writes,
    Provides,
    /// Reserved. Unified under [`RelationshipType::Provides`]; nothing emits it.
    Provisions,
    Configures,
    DependsOn,
    Transforms,
    Defines,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Reads => "reads",
            RelationshipType::Writes => "writes",
            RelationshipType::Provides => "provides",
            RelationshipType::Provisions => "provisions",
            RelationshipType::Configures => "configures",
            RelationshipType::DependsOn => "depends_on",
            RelationshipType::Transforms => "transforms",
            RelationshipType::Defines => "defines",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reads" => Some(RelationshipType::Reads),
            "writes" => Some(RelationshipType::Writes),
            "provides" => Some(RelationshipType::Provides),
            "provisions" => Some(RelationshipType::Provisions),
            "configures" => Some(RelationshipType::Configures),
            "depends_on" => Some(RelationshipType::DependsOn),
            "transforms" => Some(RelationshipType::Transforms),
            "defines" => Some(RelationshipType::Defines),
            _ => None,
        }
    }

    /// Consumer-class edges express "source depends on target", so impact
    /// travels target → source. Everything else carries impact source → target.
    pub fn is_consumer(&self) -> bool {
        matches!(self, RelationshipType::Reads | RelationshipType::DependsOn)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A named artifact in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Canonical id: `<scheme>:<path-or-address>`, forward slashes only.
    pub id: String,
    /// Display name, tokenised for stitching.
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Absolute source location, when the artifact came from a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Node {
            id: id.into(),
            name: name.into(),
            node_type,
            path: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach a 1-indexed source line (required for orphan diagnostics).
    pub fn with_line(mut self, line: usize) -> Self {
        self.metadata.insert("line".to_string(), serde_json::json!(line));
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn line(&self) -> Option<usize> {
        self.metadata.get("line").and_then(|v| v.as_u64()).map(|l| l as usize)
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A directed typed relation. `(source_id, target_id, type)` is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub edge_type: RelationshipType,
    /// 1.0 for directly parsed edges; stitched edges carry a calculated value.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Edge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: RelationshipType,
    ) -> Self {
        Edge {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type,
            confidence: 1.0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Primary-key triple, used for dedup and upsert identity.
    pub fn key(&self) -> (String, String, &'static str) {
        (self.source_id.clone(), self.target_id.clone(), self.edge_type.as_str())
    }

    /// True for edges produced by the stitcher rather than an extractor.
    pub fn is_stitched(&self) -> bool {
        self.metadata.get("stitched").and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Per-file scan bookkeeping
// ---------------------------------------------------------------------------

/// Per-file record used for incremental change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// Absolute path, forward slashes.
    pub path: String,
    /// sha256 of the file contents at last successful parse.
    pub hash: String,
    pub node_count: usize,
    pub edge_count: usize,
    /// Seconds since the epoch at last parse.
    pub parsed_at: u64,
}

impl ScanMetadata {
    pub fn new(
        path: impl Into<String>,
        hash: impl Into<String>,
        node_count: usize,
        edge_count: usize,
    ) -> Self {
        ScanMetadata {
            path: path.into(),
            hash: hash.into(),
            node_count,
            edge_count,
            parsed_at: epoch_seconds(),
        }
    }

    /// sha256 hex digest of raw file bytes.
    pub fn compute_hash(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Parse output
// ---------------------------------------------------------------------------

/// Everything one file contributed to the graph, or why it could not.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub path: String,
    pub hash: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub success: bool,
    pub errors: Vec<String>,
}

impl ParseResult {
    pub fn ok(
        path: impl Into<String>,
        hash: impl Into<String>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Self {
        ParseResult {
            path: path.into(),
            hash: hash.into(),
            nodes,
            edges,
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(path: impl Into<String>, errors: Vec<String>) -> Self {
        ParseResult {
            path: path.into(),
            hash: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            success: false,
            errors,
        }
    }
}

/// Normalize a path to the canonical forward-slash form used in ids and
/// `ScanMetadata` keys.
pub fn canonical_path(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Build a file-node id from a canonical path.
pub fn file_id(path: &str) -> String {
    format!("file:{path}")
}
