//! In-memory dependency graph with forward and reverse adjacency.
//!
//! The graph is an indexed read-only snapshot hydrated from the store. The
//! stitcher and analyser never mutate it; all writes go through the store and
//! a reload. A token index over node names makes the stitcher's candidate
//! join O(shared-token) instead of O(n²).

use crate::tokens;
use crate::types::{Edge, Node, NodeType, RelationshipType};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, Node>,
    out_edges: HashMap<String, Vec<Edge>>,
    in_edges: HashMap<String, Vec<Edge>>,
    edge_keys: HashSet<(String, String, RelationshipType)>,
    /// significant token -> node ids (ordered for deterministic iteration)
    token_index: HashMap<String, BTreeSet<String>>,
    by_type: HashMap<NodeType, Vec<String>>,
    edge_count: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node, updating the token and type indexes.
    pub fn add_node(&mut self, node: Node) {
        if let Some(previous) = self.nodes.get(&node.id) {
            // Replacing: drop stale index entries before re-indexing.
            for token in tokens::tokenize(&previous.name) {
                if let Some(ids) = self.token_index.get_mut(&token) {
                    ids.remove(&node.id);
                }
            }
            if let Some(ids) = self.by_type.get_mut(&previous.node_type) {
                ids.retain(|id| id != &node.id);
            }
        }
        for token in tokens::tokenize(&node.name) {
            if token.len() >= tokens::MIN_SIGNIFICANT_LEN {
                self.token_index.entry(token).or_default().insert(node.id.clone());
            }
        }
        self.by_type.entry(node.node_type).or_default().push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Insert an edge. Both endpoints must already exist; dangling edges are
    /// rejected so every edge in the snapshot references live nodes.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if !self.nodes.contains_key(&edge.source_id) || !self.nodes.contains_key(&edge.target_id) {
            return false;
        }
        let key = (edge.source_id.clone(), edge.target_id.clone(), edge.edge_type);
        if !self.edge_keys.insert(key) {
            return false;
        }
        self.out_edges.entry(edge.source_id.clone()).or_default().push(edge.clone());
        self.in_edges.entry(edge.target_id.clone()).or_default().push(edge);
        self.edge_count += 1;
        true
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn has_edge(&self, source_id: &str, target_id: &str, edge_type: RelationshipType) -> bool {
        self.edge_keys
            .contains(&(source_id.to_string(), target_id.to_string(), edge_type))
    }

    pub fn out_edges(&self, id: &str) -> &[Edge] {
        self.out_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_edges(&self, id: &str) -> &[Edge] {
        self.in_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nodes_by_type(&self, node_type: NodeType) -> Vec<&Node> {
        self.by_type
            .get(&node_type)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Node ids whose names share the given significant token.
    pub fn nodes_by_token(&self, token: &str) -> impl Iterator<Item = &str> {
        self.token_index
            .get(token)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = &Edge> {
        self.out_edges.values().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    // -----------------------------------------------------------------------
    // Query surface used by external collaborators (TUI, LSP, AI bridge)
    // -----------------------------------------------------------------------

    /// Case-insensitive substring search over node ids and names.
    pub fn search_artifacts(&self, query: &str, limit: usize) -> Vec<&Node> {
        let needle = query.to_lowercase();
        let mut hits: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| {
                n.id.to_lowercase().contains(&needle) || n.name.to_lowercase().contains(&needle)
            })
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits.truncate(limit);
        hits
    }

    /// Connected nodes in both edge directions, labelled from the viewpoint
    /// of `id`: outgoing edges lead downstream, incoming edges come from
    /// upstream.
    pub fn get_neighbors(&self, id: &str) -> Vec<Neighbor<'_>> {
        let mut neighbors = Vec::new();
        for edge in self.out_edges(id) {
            if let Some(node) = self.nodes.get(&edge.target_id) {
                neighbors.push(Neighbor {
                    node,
                    relationship: edge.edge_type,
                    direction: Direction::Downstream,
                });
            }
        }
        for edge in self.in_edges(id) {
            if let Some(node) = self.nodes.get(&edge.source_id) {
                neighbors.push(Neighbor {
                    node,
                    relationship: edge.edge_type,
                    direction: Direction::Upstream,
                });
            }
        }
        neighbors.sort_by(|a, b| a.node.id.cmp(&b.node.id));
        neighbors
    }

    /// What a file consumes from elsewhere, what it provides, and what it
    /// defines internally.
    pub fn get_file_dependencies(&self, path: &str) -> FileDependencies<'_> {
        let id = crate::types::file_id(path);
        let mut deps = FileDependencies::default();
        for edge in self.out_edges(&id) {
            let Some(node) = self.nodes.get(&edge.target_id) else { continue };
            if edge.edge_type.is_consumer() {
                deps.consumes.push(node);
            } else if edge.edge_type == RelationshipType::Defines {
                deps.internal.push(node);
            } else {
                deps.provides.push(node);
            }
        }
        deps.consumes.sort_by(|a, b| a.id.cmp(&b.id));
        deps.provides.sort_by(|a, b| a.id.cmp(&b.id));
        deps.internal.sort_by(|a, b| a.id.cmp(&b.id));
        deps
    }

    /// Consumer nodes (env vars, config keys) with no incoming `provides`
    /// edge. `reads` edges from code do not count as providers.
    pub fn orphans(&self) -> Vec<&Node> {
        let mut result: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| matches!(n.node_type, NodeType::EnvVar | NodeType::ConfigKey))
            .filter(|n| {
                !self
                    .in_edges(&n.id)
                    .iter()
                    .any(|e| e.edge_type == RelationshipType::Provides)
            })
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }
}

// ---------------------------------------------------------------------------
// Query result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upstream,
    Downstream,
}

#[derive(Debug, Clone, Serialize)]
pub struct Neighbor<'a> {
    pub node: &'a Node,
    pub relationship: RelationshipType,
    pub direction: Direction,
}

#[derive(Debug, Default, Serialize)]
pub struct FileDependencies<'a> {
    pub consumes: Vec<&'a Node>,
    pub provides: Vec<&'a Node>,
    pub internal: Vec<&'a Node>,
}

/// Stable serializable summary, handy for JSON output.
#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub by_type: BTreeMap<String, usize>,
}

impl DependencyGraph {
    pub fn stats(&self) -> GraphStats {
        let mut by_type = BTreeMap::new();
        for node in self.nodes.values() {
            *by_type.entry(node.node_type.as_str().to_string()).or_insert(0) += 1;
        }
        GraphStats { nodes: self.node_count(), edges: self.edge_count(), by_type }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, name: &str, node_type: NodeType) -> Node {
        Node::new(id, name, node_type)
    }

    fn sample() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_node(node("file:/app/src/main.py", "main.py", NodeType::File));
        g.add_node(node("env:PAYMENT_DB_HOST", "PAYMENT_DB_HOST", NodeType::EnvVar));
        g.add_node(node("infra:output.payment_db_host", "payment_db_host", NodeType::InfraResource));
        g.add_edge(Edge::new(
            "file:/app/src/main.py",
            "env:PAYMENT_DB_HOST",
            RelationshipType::Reads,
        ));
        g.add_edge(Edge::new(
            "infra:output.payment_db_host",
            "env:PAYMENT_DB_HOST",
            RelationshipType::Provides,
        ));
        g
    }

    #[test]
    fn test_adjacency_both_directions() {
        let g = sample();
        assert_eq!(g.out_edges("file:/app/src/main.py").len(), 1);
        assert_eq!(g.in_edges("env:PAYMENT_DB_HOST").len(), 2);
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn test_dangling_edges_rejected() {
        let mut g = sample();
        assert!(!g.add_edge(Edge::new("env:PAYMENT_DB_HOST", "env:MISSING", RelationshipType::Provides)));
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn test_duplicate_edges_rejected() {
        let mut g = sample();
        assert!(!g.add_edge(Edge::new(
            "infra:output.payment_db_host",
            "env:PAYMENT_DB_HOST",
            RelationshipType::Provides,
        )));
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn test_token_index() {
        let g = sample();
        let with_payment: Vec<&str> = g.nodes_by_token("payment").collect();
        assert!(with_payment.contains(&"env:PAYMENT_DB_HOST"));
        assert!(with_payment.contains(&"infra:output.payment_db_host"));
        assert!(!with_payment.contains(&"file:/app/src/main.py"));
    }

    #[test]
    fn test_node_replacement_reindexes() {
        let mut g = sample();
        g.add_node(node("env:PAYMENT_DB_HOST", "BILLING_DB_HOST", NodeType::EnvVar));
        assert_eq!(g.node_count(), 3);
        let with_payment: Vec<&str> = g.nodes_by_token("billing").collect();
        assert!(with_payment.contains(&"env:PAYMENT_DB_HOST"));
        assert_eq!(g.nodes_by_type(NodeType::EnvVar).len(), 1);
    }

    #[test]
    fn test_search_artifacts() {
        let g = sample();
        let hits = g.search_artifacts("payment", 10);
        assert_eq!(hits.len(), 2);
        let limited = g.search_artifacts("payment", 1);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_neighbors_labelled_by_direction() {
        let g = sample();
        let neighbors = g.get_neighbors("env:PAYMENT_DB_HOST");
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.iter().all(|n| n.direction == Direction::Upstream));

        let from_file = g.get_neighbors("file:/app/src/main.py");
        assert_eq!(from_file.len(), 1);
        assert_eq!(from_file[0].direction, Direction::Downstream);
        assert_eq!(from_file[0].relationship, RelationshipType::Reads);
    }

    #[test]
    fn test_file_dependencies_buckets() {
        let mut g = sample();
        g.add_node(node("code:/app/src/main.py#connect", "connect", NodeType::CodeEntity));
        g.add_edge(Edge::new(
            "file:/app/src/main.py",
            "code:/app/src/main.py#connect",
            RelationshipType::Defines,
        ));

        let deps = g.get_file_dependencies("/app/src/main.py");
        assert_eq!(deps.consumes.len(), 1);
        assert_eq!(deps.internal.len(), 1);
        assert!(deps.provides.is_empty());
    }

    #[test]
    fn test_orphans_require_missing_provides() {
        let mut g = DependencyGraph::new();
        g.add_node(node("file:/app/a.py", "a.py", NodeType::File));
        g.add_node(node("env:PROVIDED", "PROVIDED", NodeType::EnvVar));
        g.add_node(node("env:ORPHANED", "ORPHANED", NodeType::EnvVar));
        g.add_node(node("infra:output.provided", "provided", NodeType::InfraResource));
        g.add_edge(Edge::new("infra:output.provided", "env:PROVIDED", RelationshipType::Provides));
        // A reads edge is not a provider
        g.add_edge(Edge::new("file:/app/a.py", "env:ORPHANED", RelationshipType::Reads));

        let orphans = g.orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "env:ORPHANED");
    }
}
