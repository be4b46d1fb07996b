//! Impact analysis: bounded blast-radius traversal and the change gate used
//! by CI (`check --git-diff`).

use crate::error::CheckError;
use crate::graph::DependencyGraph;
use crate::suppression::SuppressionStore;
use crate::types::NodeType;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

// ---------------------------------------------------------------------------
// Blast radius
// ---------------------------------------------------------------------------

/// Deterministic blast-radius report; the ordering matters because the
/// report seeds downstream policy engines.
#[derive(Debug, Clone, Serialize)]
pub struct BlastRadiusReport {
    pub sources: Vec<String>,
    pub count: usize,
    /// Impacted node ids, sorted, excluding the seeds.
    pub impacted: Vec<String>,
    /// Scheme buckets: infra, data, code, config, other.
    pub breakdown: BTreeMap<String, Vec<String>>,
}

pub struct BlastRadiusAnalyzer<'a> {
    graph: &'a DependencyGraph,
    suppressions: Option<&'a SuppressionStore>,
    max_depth: Option<usize>,
}

impl<'a> BlastRadiusAnalyzer<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        BlastRadiusAnalyzer { graph, suppressions: None, max_depth: None }
    }

    pub fn with_suppressions(mut self, suppressions: &'a SuppressionStore) -> Self {
        self.suppressions = Some(suppressions);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Breadth-first reachability from the seed set. Provider-class edges
    /// carry impact source → target; consumer-class edges (`reads`,
    /// `depends_on`) carry it target → source, so changing a provider always
    /// reaches its dependents. Unknown seeds contribute nothing.
    pub fn calculate(&self, seed_ids: &[String]) -> BlastRadiusReport {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for seed in seed_ids {
            if self.graph.has_node(seed) && visited.insert(seed.clone()) {
                queue.push_back((seed.clone(), 0));
            }
        }

        while let Some((id, depth)) = queue.pop_front() {
            if self.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for neighbor in self.impact_neighbors(&id) {
                if visited.insert(neighbor.clone()) {
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }

        let seed_set: HashSet<&String> = seed_ids.iter().collect();
        let mut impacted: Vec<String> =
            visited.into_iter().filter(|id| !seed_set.contains(id)).collect();
        impacted.sort();

        let mut breakdown: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for bucket in ["infra", "data", "code", "config", "other"] {
            breakdown.insert(bucket.to_string(), Vec::new());
        }
        for id in &impacted {
            let bucket = scheme_bucket(id);
            breakdown.entry(bucket.to_string()).or_default().push(id.clone());
        }

        BlastRadiusReport {
            sources: seed_ids.to_vec(),
            count: impacted.len(),
            impacted,
            breakdown,
        }
    }

    fn impact_neighbors(&self, id: &str) -> Vec<String> {
        let mut neighbors = Vec::new();
        for edge in self.graph.out_edges(id) {
            if !edge.edge_type.is_consumer() && !self.is_suppressed_edge(edge) {
                neighbors.push(edge.target_id.clone());
            }
        }
        for edge in self.graph.in_edges(id) {
            if edge.edge_type.is_consumer() && !self.is_suppressed_edge(edge) {
                neighbors.push(edge.source_id.clone());
            }
        }
        neighbors
    }

    fn is_suppressed_edge(&self, edge: &crate::types::Edge) -> bool {
        self.suppressions.is_some_and(|s| s.is_edge_suppressed(edge))
    }
}

/// Bucket an id by its scheme prefix.
fn scheme_bucket(id: &str) -> &'static str {
    match id.split(':').next().unwrap_or("") {
        "infra" => "infra",
        "data" | "job" | "column" => "data",
        "file" | "code" => "code",
        "env" | "config" | "secret" => "config",
        _ => "other",
    }
}

// ---------------------------------------------------------------------------
// Change gate (check)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckResult {
    Pass,
    Blocked,
}

impl CheckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckResult::Pass => "PASS",
            CheckResult::Blocked => "BLOCKED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub severity: String,
    pub rule: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub result: CheckResult,
    pub changed_files: Vec<String>,
    pub critical_count: usize,
    pub high_count: usize,
    pub violations: Vec<Violation>,
    pub impacted_count: usize,
}

/// Impacted-node count above which a change is flagged `high` severity.
const LARGE_RADIUS_THRESHOLD: usize = 10;

pub struct CheckEngine<'a> {
    graph: &'a DependencyGraph,
    suppressions: Option<&'a SuppressionStore>,
}

impl<'a> CheckEngine<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        CheckEngine { graph, suppressions: None }
    }

    pub fn with_suppressions(mut self, suppressions: &'a SuppressionStore) -> Self {
        self.suppressions = Some(suppressions);
        self
    }

    /// Evaluate the blast radius of a set of changed files (repo-relative
    /// paths) and derive policy violations. `Blocked` only when
    /// `fail_if_critical` is set and something critical was hit.
    pub fn analyze(&self, changed_files: &[String], fail_if_critical: bool) -> CheckReport {
        let seeds = self.file_seeds(changed_files);
        let mut analyzer = BlastRadiusAnalyzer::new(self.graph);
        if let Some(suppressions) = self.suppressions {
            analyzer = analyzer.with_suppressions(suppressions);
        }
        let report = analyzer.calculate(&seeds);

        let mut violations = Vec::new();
        for id in &report.impacted {
            let Some(node) = self.graph.get_node(id) else { continue };
            match node.node_type {
                NodeType::InfraResource => violations.push(Violation {
                    severity: "critical".to_string(),
                    rule: "INFRA_IMPACT".to_string(),
                    message: format!("Change reaches infrastructure resource '{}'", node.name),
                }),
                NodeType::DataAsset | NodeType::Column => violations.push(Violation {
                    severity: "critical".to_string(),
                    rule: "DATA_IMPACT".to_string(),
                    message: format!("Change reaches data asset '{}'", node.name),
                }),
                _ => {}
            }
        }
        if report.count > LARGE_RADIUS_THRESHOLD {
            violations.push(Violation {
                severity: "high".to_string(),
                rule: "LARGE_BLAST_RADIUS".to_string(),
                message: format!("{} artifacts impacted", report.count),
            });
        }

        let critical_count = violations.iter().filter(|v| v.severity == "critical").count();
        let high_count = violations.iter().filter(|v| v.severity == "high").count();
        let result = if fail_if_critical && critical_count > 0 {
            CheckResult::Blocked
        } else {
            CheckResult::Pass
        };

        CheckReport {
            result,
            changed_files: changed_files.to_vec(),
            critical_count,
            high_count,
            violations,
            impacted_count: report.count,
        }
    }

    /// Changed paths are repo-relative; node paths are absolute. Match by
    /// suffix on the canonical form.
    fn file_seeds(&self, changed_files: &[String]) -> Vec<String> {
        let mut seeds = Vec::new();
        for changed in changed_files {
            let suffix = format!("/{}", changed.replace('\\', "/"));
            for node in self.graph.nodes_by_type(NodeType::File) {
                let Some(path) = &node.path else { continue };
                if path == changed || path.ends_with(&suffix) {
                    seeds.push(node.id.clone());
                }
            }
        }
        seeds.sort();
        seeds.dedup();
        seeds
    }
}

// ---------------------------------------------------------------------------
// Git integration
// ---------------------------------------------------------------------------

/// Paths changed between two refs (`base..head`), repo-relative.
pub fn changed_files_between(
    repo_root: &Path,
    base: &str,
    head: &str,
) -> Result<Vec<String>, CheckError> {
    let repo = git2::Repository::open(repo_root)?;

    let base_tree = repo.revparse_single(base)?.peel_to_commit()?.tree()?;
    let head_tree = repo.revparse_single(head)?.peel_to_commit()?.tree()?;

    let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)?;

    let mut files = Vec::new();
    diff.foreach(
        &mut |delta, _| {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .and_then(|p| p.to_str())
                .unwrap_or("")
                .to_string();
            if !path.is_empty() {
                files.push(path);
            }
            true
        },
        None,
        None,
        None,
    )?;

    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Edge, Node, RelationshipType};

    fn demo_graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_node(Node::new("file:/repo/src/app.py", "app.py", NodeType::File)
            .with_path("/repo/src/app.py"));
        g.add_node(Node::new("env:PAYMENT_DB_HOST", "PAYMENT_DB_HOST", NodeType::EnvVar));
        g.add_node(Node::new(
            "infra:output.payment_db_host",
            "payment_db_host",
            NodeType::InfraResource,
        ));
        g.add_node(Node::new(
            "infra:aws_db_instance.payment_db",
            "payment_db",
            NodeType::InfraResource,
        ));
        g.add_edge(Edge::new(
            "file:/repo/src/app.py",
            "env:PAYMENT_DB_HOST",
            RelationshipType::Reads,
        ));
        g.add_edge(Edge::new(
            "infra:output.payment_db_host",
            "env:PAYMENT_DB_HOST",
            RelationshipType::Provides,
        ));
        g.add_edge(Edge::new(
            "infra:aws_db_instance.payment_db",
            "infra:output.payment_db_host",
            RelationshipType::Configures,
        ));
        g
    }

    #[test]
    fn test_blast_radius_reaches_consumers() {
        let g = demo_graph();
        let report = BlastRadiusAnalyzer::new(&g)
            .calculate(&["infra:output.payment_db_host".to_string()]);

        assert_eq!(report.count, 2);
        assert!(report.impacted.contains(&"env:PAYMENT_DB_HOST".to_string()));
        assert!(report.impacted.contains(&"file:/repo/src/app.py".to_string()));
        assert_eq!(report.breakdown["config"], vec!["env:PAYMENT_DB_HOST".to_string()]);
        assert_eq!(report.breakdown["code"], vec!["file:/repo/src/app.py".to_string()]);
        assert!(report.breakdown["infra"].is_empty());
    }

    #[test]
    fn test_unknown_seed_is_empty_report() {
        let g = demo_graph();
        let report = BlastRadiusAnalyzer::new(&g).calculate(&["env:NOPE".to_string()]);
        assert_eq!(report.count, 0);
        assert!(report.impacted.is_empty());
    }

    #[test]
    fn test_report_order_is_deterministic() {
        let g = demo_graph();
        let seeds = vec!["infra:aws_db_instance.payment_db".to_string()];
        let a = BlastRadiusAnalyzer::new(&g).calculate(&seeds);
        let b = BlastRadiusAnalyzer::new(&g).calculate(&seeds);
        assert_eq!(a.impacted, b.impacted);
        let mut sorted = a.impacted.clone();
        sorted.sort();
        assert_eq!(a.impacted, sorted);
    }

    #[test]
    fn test_cycles_terminate() {
        let mut g = DependencyGraph::new();
        g.add_node(Node::new("data:a", "a", NodeType::DataAsset));
        g.add_node(Node::new("data:b", "b", NodeType::DataAsset));
        g.add_edge(Edge::new("data:a", "data:b", RelationshipType::Transforms));
        g.add_edge(Edge::new("data:b", "data:a", RelationshipType::Transforms));

        let report = BlastRadiusAnalyzer::new(&g).calculate(&["data:a".to_string()]);
        assert_eq!(report.count, 1);
        assert_eq!(report.impacted, vec!["data:b".to_string()]);
    }

    #[test]
    fn test_max_depth_bounds_traversal() {
        let g = demo_graph();
        let seeds = vec!["infra:aws_db_instance.payment_db".to_string()];
        let shallow = BlastRadiusAnalyzer::new(&g).with_max_depth(1).calculate(&seeds);
        assert_eq!(shallow.impacted, vec!["infra:output.payment_db_host".to_string()]);

        let full = BlastRadiusAnalyzer::new(&g).calculate(&seeds);
        assert_eq!(full.count, 3);
    }

    #[test]
    fn test_suppressed_edges_are_not_traversed() {
        let g = demo_graph();
        let mut suppressions = SuppressionStore::new();
        suppressions.add(
            crate::suppression::SuppressionEntry::parse("infra:output.* -> env:*").unwrap(),
        );

        let report = BlastRadiusAnalyzer::new(&g)
            .with_suppressions(&suppressions)
            .calculate(&["infra:output.payment_db_host".to_string()]);
        assert_eq!(report.count, 0);
    }

    #[test]
    fn test_monotonicity_under_edge_addition() {
        let mut g = demo_graph();
        let before = BlastRadiusAnalyzer::new(&g)
            .calculate(&["infra:output.payment_db_host".to_string()]);

        g.add_node(Node::new("data:reports", "reports", NodeType::DataAsset));
        g.add_edge(Edge::new(
            "env:PAYMENT_DB_HOST",
            "data:reports",
            RelationshipType::Transforms,
        ));
        let after = BlastRadiusAnalyzer::new(&g)
            .calculate(&["infra:output.payment_db_host".to_string()]);

        for id in &before.impacted {
            assert!(after.impacted.contains(id), "adding an edge removed {id} from the report");
        }
        assert!(after.count >= before.count);
    }

    #[test]
    fn test_check_flags_infra_impact_as_critical() {
        let g = demo_graph();
        let engine = CheckEngine::new(&g);

        // Changing app.py reaches nothing downstream (it is a pure consumer).
        let clean = engine.analyze(&["src/app.py".to_string()], true);
        assert_eq!(clean.result, CheckResult::Pass);

        // Changing the provider chain reaches env + file but no infra.
        let report = engine.analyze(&["src/app.py".to_string()], false);
        assert_eq!(report.result, CheckResult::Pass);
        assert_eq!(report.changed_files, vec!["src/app.py".to_string()]);
    }

    #[test]
    fn test_check_blocks_only_with_flag() {
        let mut g = demo_graph();
        // Make the file reach infra: file defines a resource.
        g.add_node(Node::new("file:/repo/main.tf", "main.tf", NodeType::File)
            .with_path("/repo/main.tf"));
        g.add_edge(Edge::new(
            "file:/repo/main.tf",
            "infra:aws_db_instance.payment_db",
            RelationshipType::Defines,
        ));
        let engine = CheckEngine::new(&g);

        let unflagged = engine.analyze(&["main.tf".to_string()], false);
        assert_eq!(unflagged.result, CheckResult::Pass);
        assert!(unflagged.critical_count > 0);

        let flagged = engine.analyze(&["main.tf".to_string()], true);
        assert_eq!(flagged.result, CheckResult::Blocked);
    }
}
