//! dbt manifest extractor: models and sources become data assets, with
//! `transforms` edges from each referenced upstream.

use super::{ExtractionContext, Extractor, Record};
use crate::types::{Edge, Node, NodeType, RelationshipType};
use serde_json::Value;

const MODEL_RESOURCE_TYPES: &[&str] = &["model", "seed", "snapshot"];

pub struct DbtExtractor;

impl DbtExtractor {
    pub fn new() -> Self {
        DbtExtractor
    }
}

impl Default for DbtExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for DbtExtractor {
    fn name(&self) -> &'static str {
        "dbt"
    }

    fn can_extract(&self, ctx: &ExtractionContext<'_>) -> bool {
        ctx.file_name() == "manifest.json"
            && (ctx.text.contains("dbt_schema_version") || ctx.text.contains("dbt_version"))
    }

    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<Vec<Record>, String> {
        let manifest: Value = serde_json::from_str(ctx.text).map_err(|e| e.to_string())?;
        let file_id = ctx.file_id();
        let mut records = vec![Record::Node(ctx.file_node())];

        if let Some(nodes) = manifest.get("nodes").and_then(Value::as_object) {
            let mut keys: Vec<&String> = nodes.keys().collect();
            keys.sort_unstable();
            for key in keys {
                let node = &nodes[key];
                let resource_type = node.get("resource_type").and_then(Value::as_str).unwrap_or("");
                if !MODEL_RESOURCE_TYPES.contains(&resource_type) {
                    continue;
                }
                let name = node
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| key.rsplit('.').next().unwrap_or(key));
                let id = format!("data:{name}");
                records.push(Record::Node(
                    Node::new(&id, name, NodeType::DataAsset)
                        .with_path(ctx.path.clone())
                        .with_meta("resource_type", serde_json::json!(resource_type)),
                ));
                records.push(Record::Edge(Edge::new(&file_id, &id, RelationshipType::Defines)));

                // dbt node ids look like `model.project.name`; the last
                // segment is the match-friendly name.
                let upstreams = node
                    .get("depends_on")
                    .and_then(|d| d.get("nodes"))
                    .and_then(Value::as_array);
                if let Some(upstreams) = upstreams {
                    for upstream_id in upstreams.iter().filter_map(Value::as_str) {
                        let upstream = upstream_id.rsplit('.').next().unwrap_or(upstream_id);
                        records.push(Record::Edge(Edge::new(
                            format!("data:{upstream}"),
                            &id,
                            RelationshipType::Transforms,
                        )));
                    }
                }
            }
        }

        if let Some(sources) = manifest.get("sources").and_then(Value::as_object) {
            let mut keys: Vec<&String> = sources.keys().collect();
            keys.sort_unstable();
            for key in keys {
                let source = &sources[key];
                let name = source
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| key.rsplit('.').next().unwrap_or(key));
                let id = format!("data:{name}");
                records.push(Record::Node(
                    Node::new(&id, name, NodeType::DataAsset)
                        .with_path(ctx.path.clone())
                        .with_meta("resource_type", serde_json::json!("source")),
                ));
                records.push(Record::Edge(Edge::new(&file_id, &id, RelationshipType::Defines)));
            }
        }

        Ok(records)
    }
}
