//! Cross-domain stitching: infers edges between nodes that extractors cannot
//! link because the relationship is a naming convention, not a syntactic
//! reference.
//!
//! An ordered rule pipeline joins source nodes to candidate targets through
//! the graph's token index, scores each pair with the confidence calculator,
//! and emits edges at or above the configured floor. Rules never invent
//! nodes and never emit an edge that already exists, so running the stitcher
//! twice on an unchanged graph produces nothing new.

use crate::confidence::{ConfidenceCalculator, ConfidenceResult, RULE_SET_VERSION};
use crate::graph::DependencyGraph;
use crate::suppression::SuppressionStore;
use crate::tokens;
use crate::types::{Edge, Node, NodeType, RelationshipType};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StitchConfig {
    /// Emission floor for stitched-edge confidence.
    pub min_confidence: f64,
}

impl Default for StitchConfig {
    fn default() -> Self {
        StitchConfig { min_confidence: 0.5 }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

pub trait StitchRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &RuleContext<'_>) -> Vec<Edge>;
}

pub struct RuleContext<'a> {
    pub graph: &'a DependencyGraph,
    pub calculator: &'a ConfidenceCalculator,
    pub config: &'a StitchConfig,
    pub suppressions: &'a SuppressionStore,
}

/// Environment variables ↔ declared infrastructure outputs.
pub struct EnvVarToInfraRule;

impl StitchRule for EnvVarToInfraRule {
    fn name(&self) -> &'static str {
        "env_to_infra_output"
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> Vec<Edge> {
        provider_rule(
            ctx,
            self.name(),
            NodeType::EnvVar,
            &|target| {
                target.node_type == NodeType::InfraResource
                    && target.metadata.get("output").and_then(|v| v.as_bool()).unwrap_or(false)
            },
            RelationshipType::Provides,
        )
    }
}

/// Environment variables ↔ container manifests that declare them.
pub struct EnvVarToManifestRule;

impl StitchRule for EnvVarToManifestRule {
    fn name(&self) -> &'static str {
        "env_to_manifest"
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> Vec<Edge> {
        provider_rule(
            ctx,
            self.name(),
            NodeType::EnvVar,
            &|target| {
                target.node_type == NodeType::InfraResource
                    && target.metadata.get("manifest").and_then(|v| v.as_bool()).unwrap_or(false)
            },
            RelationshipType::Provides,
        )
    }
}

/// Configuration keys ↔ infrastructure resources.
pub struct ConfigKeyToInfraRule;

impl StitchRule for ConfigKeyToInfraRule {
    fn name(&self) -> &'static str {
        "config_to_infra"
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> Vec<Edge> {
        provider_rule(
            ctx,
            self.name(),
            NodeType::ConfigKey,
            &|target| target.node_type == NodeType::InfraResource,
            RelationshipType::Provides,
        )
    }
}

/// Infrastructure ↔ infrastructure, directed down the domain hierarchy.
pub struct InfraHierarchyRule;

impl StitchRule for InfraHierarchyRule {
    fn name(&self) -> &'static str {
        "infra_hierarchy"
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> Vec<Edge> {
        let mut edges = Vec::new();
        let infra = ctx.graph.nodes_by_type(NodeType::InfraResource);

        for source in &infra {
            let source_tokens = tokens::tokenize(&source.name);
            // Only pair each unordered (a, b) once.
            let candidates = candidate_ids(ctx.graph, &source_tokens, |node| {
                node.node_type == NodeType::InfraResource && node.id > source.id
            });

            let scored = score_candidates(ctx, source, &source_tokens, &candidates);
            let viable: Vec<&(String, ConfidenceResult)> = scored
                .iter()
                .filter(|(_, r)| r.score >= ctx.config.min_confidence)
                .collect();
            let alt_count = viable.len();

            for (target_id, _) in viable {
                let Some(target) = ctx.graph.get_node(target_id) else { continue };
                let result = ctx.calculator.calculate(
                    &source.name,
                    &target.name,
                    &source_tokens,
                    &tokens::tokenize(&target.name),
                    alt_count,
                );
                if result.score < ctx.config.min_confidence {
                    continue;
                }
                let (upper, lower) = determine_direction(source, target);
                if ctx.graph.has_edge(&upper.id, &lower.id, RelationshipType::Configures)
                    || ctx.graph.has_edge(&lower.id, &upper.id, RelationshipType::Configures)
                {
                    continue;
                }
                if ctx.suppressions.is_suppressed(&upper.id, &lower.id, RelationshipType::Configures)
                {
                    continue;
                }
                edges.push(stitched_edge(
                    &upper.id,
                    &lower.id,
                    RelationshipType::Configures,
                    self.name(),
                    &result,
                ));
            }
        }
        edges
    }
}

/// Rank of an infrastructure node in the domain hierarchy; lower is higher
/// level. Unknown kinds fall back to lexicographic ordering of ids.
fn hierarchy_level(node: &Node) -> Option<u8> {
    let haystack = tokens::tokenize(&node.id);
    let level_of = |token: &str| -> Option<u8> {
        match token {
            "vpc" | "network" => Some(0),
            "subnet" => Some(1),
            "cluster" => Some(2),
            "nodegroup" => Some(3),
            "deployment" | "statefulset" | "daemonset" | "cronjob" => Some(4),
            "service" => Some(5),
            "instance" | "pod" | "container" => Some(6),
            _ => None,
        }
    };
    haystack.iter().filter_map(|t| level_of(t)).min()
}

/// Higher-level node first; lexicographic id order when the hierarchy does
/// not decide (stable and documented).
fn determine_direction<'a>(a: &'a Node, b: &'a Node) -> (&'a Node, &'a Node) {
    match (hierarchy_level(a), hierarchy_level(b)) {
        (Some(la), Some(lb)) if la < lb => (a, b),
        (Some(la), Some(lb)) if lb < la => (b, a),
        (Some(_), None) => (a, b),
        (None, Some(_)) => (b, a),
        _ => {
            if a.id <= b.id {
                (a, b)
            } else {
                (b, a)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared rule machinery
// ---------------------------------------------------------------------------

/// Consumer-type sources matched against provider candidates; emitted edges
/// point provider → consumer.
fn provider_rule(
    ctx: &RuleContext<'_>,
    rule_name: &'static str,
    source_type: NodeType,
    target_filter: &dyn Fn(&Node) -> bool,
    edge_type: RelationshipType,
) -> Vec<Edge> {
    let mut edges = Vec::new();

    for source in ctx.graph.nodes_by_type(source_type) {
        let source_tokens = tokens::tokenize(&source.name);
        let candidates = candidate_ids(ctx.graph, &source_tokens, target_filter);
        let scored = score_candidates(ctx, source, &source_tokens, &candidates);

        // Ambiguity: every candidate that clears the floor before the
        // ambiguity penalty counts, including the pair being scored.
        let viable: Vec<&(String, ConfidenceResult)> =
            scored.iter().filter(|(_, r)| r.score >= ctx.config.min_confidence).collect();
        let alt_count = viable.len();

        for (target_id, _) in viable {
            let Some(target) = ctx.graph.get_node(target_id) else { continue };
            let result = ctx.calculator.calculate(
                &source.name,
                &target.name,
                &source_tokens,
                &tokens::tokenize(&target.name),
                alt_count,
            );
            if result.score < ctx.config.min_confidence {
                continue;
            }
            // Provider points at consumer.
            if ctx.graph.has_edge(&target.id, &source.id, edge_type) {
                continue;
            }
            if ctx.suppressions.is_suppressed(&target.id, &source.id, edge_type) {
                continue;
            }
            edges.push(stitched_edge(&target.id, &source.id, edge_type, rule_name, &result));
        }
    }

    edges
}

/// Candidate target ids sharing at least one significant token with the
/// source, via the token index.
fn candidate_ids(
    graph: &DependencyGraph,
    source_tokens: &[String],
    target_filter: impl Fn(&Node) -> bool,
) -> Vec<String> {
    let mut ids = BTreeSet::new();
    for token in tokens::significant(source_tokens) {
        for id in graph.nodes_by_token(token) {
            if ids.contains(id) {
                continue;
            }
            if let Some(node) = graph.get_node(id) {
                if target_filter(node) {
                    ids.insert(id.to_string());
                }
            }
        }
    }
    ids.into_iter().collect()
}

/// Pre-ambiguity scores for every candidate.
fn score_candidates(
    ctx: &RuleContext<'_>,
    source: &Node,
    source_tokens: &[String],
    candidates: &[String],
) -> Vec<(String, ConfidenceResult)> {
    candidates
        .iter()
        .filter_map(|id| {
            let target = ctx.graph.get_node(id)?;
            let result = ctx.calculator.calculate(
                &source.name,
                &target.name,
                source_tokens,
                &tokens::tokenize(&target.name),
                0,
            );
            Some((id.clone(), result))
        })
        .collect()
}

fn stitched_edge(
    source_id: &str,
    target_id: &str,
    edge_type: RelationshipType,
    rule: &'static str,
    result: &ConfidenceResult,
) -> Edge {
    let signals: Vec<&str> = result.signals.iter().map(|s| s.signal.as_str()).collect();
    let penalties: Vec<serde_json::Value> = result
        .penalties
        .iter()
        .map(|p| serde_json::json!({"penalty": p.penalty.as_str(), "multiplier": p.multiplier}))
        .collect();
    Edge::new(source_id, target_id, edge_type)
        .with_confidence(result.score)
        .with_meta("stitched", serde_json::json!(true))
        .with_meta("rule", serde_json::json!(rule))
        .with_meta("rule_set_version", serde_json::json!(RULE_SET_VERSION))
        .with_meta("matched_tokens", serde_json::json!(result.matched_tokens))
        .with_meta("signals", serde_json::json!(signals))
        .with_meta("penalties", serde_json::json!(penalties))
        .with_meta("alt_count", serde_json::json!(result.alternative_match_count))
        .with_meta("confidence_origin", serde_json::json!("stitcher"))
}

// ---------------------------------------------------------------------------
// Stitcher
// ---------------------------------------------------------------------------

pub struct Stitcher {
    rules: Vec<Box<dyn StitchRule>>,
    calculator: ConfidenceCalculator,
    config: StitchConfig,
}

impl Stitcher {
    pub fn new() -> Self {
        Self::with_config(StitchConfig::default())
    }

    pub fn with_config(config: StitchConfig) -> Self {
        Stitcher {
            rules: vec![
                Box::new(EnvVarToInfraRule),
                Box::new(EnvVarToManifestRule),
                Box::new(ConfigKeyToInfraRule),
                Box::new(InfraHierarchyRule),
            ],
            calculator: ConfidenceCalculator::default(),
            config,
        }
    }

    /// Run every rule over a graph snapshot and return the new edges. The
    /// snapshot is never mutated; callers persist the edges and reload.
    pub fn stitch(&self, graph: &DependencyGraph, suppressions: &SuppressionStore) -> Vec<Edge> {
        let ctx = RuleContext {
            graph,
            calculator: &self.calculator,
            config: &self.config,
            suppressions,
        };

        let mut seen: HashSet<(String, String, &'static str)> = HashSet::new();
        let mut edges = Vec::new();
        for rule in &self.rules {
            let produced = rule.apply(&ctx);
            let mut kept = 0usize;
            for edge in produced {
                if seen.insert(edge.key()) {
                    edges.push(edge);
                    kept += 1;
                }
            }
            debug!(rule = rule.name(), edges = kept, "Stitch rule applied");
        }
        edges
    }
}

impl Default for Stitcher {
    fn default() -> Self {
        Self::new()
    }
}
