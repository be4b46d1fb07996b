//! OpenLineage run-event extractor: jobs, datasets, and column-level lineage
//! from runtime events emitted by orchestrators and Spark listeners.

use super::{ExtractionContext, Extractor, Record};
use crate::types::{Edge, Node, NodeType, RelationshipType};
use serde_json::Value;

pub struct OpenLineageExtractor;

impl OpenLineageExtractor {
    pub fn new() -> Self {
        OpenLineageExtractor
    }
}

impl Default for OpenLineageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for OpenLineageExtractor {
    fn name(&self) -> &'static str {
        "openlineage"
    }

    fn can_extract(&self, ctx: &ExtractionContext<'_>) -> bool {
        ctx.extension() == "json" && ctx.text.contains("\"eventType\"")
    }

    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<Vec<Record>, String> {
        let parsed: Value = serde_json::from_str(ctx.text).map_err(|e| e.to_string())?;
        let mut records = vec![Record::Node(ctx.file_node())];

        match &parsed {
            Value::Array(events) => {
                for event in events {
                    extract_event(ctx, event, &mut records);
                }
            }
            event => extract_event(ctx, event, &mut records),
        }

        Ok(records)
    }
}

fn extract_event(ctx: &ExtractionContext<'_>, event: &Value, records: &mut Vec<Record>) {
    // Only terminal events carry settled lineage; START and RUNNING are noise.
    let event_type = event.get("eventType").and_then(Value::as_str).unwrap_or("");
    if matches!(event_type, "START" | "RUNNING") {
        return;
    }

    let job_id = event.get("job").and_then(|job| {
        let namespace = job.get("namespace")?.as_str()?;
        let name = job.get("name")?.as_str()?;
        Some((format!("job:{namespace}/{name}"), name.to_string()))
    });

    if let Some((job_id, job_name)) = &job_id {
        let mut node = Node::new(job_id, job_name, NodeType::Job).with_path(ctx.path.clone());
        if let Some(run_id) = event.get("run").and_then(|r| r.get("runId")).and_then(Value::as_str)
        {
            node = node.with_meta("run_id", serde_json::json!(run_id));
        }
        if !event_type.is_empty() {
            node = node.with_meta("event_type", serde_json::json!(event_type));
        }
        records.push(Record::Node(node));
        records.push(Record::Edge(Edge::new(ctx.file_id(), job_id, RelationshipType::Defines)));
    }

    for (field, edge_type) in
        [("inputs", RelationshipType::Reads), ("outputs", RelationshipType::Writes)]
    {
        let Some(datasets) = event.get(field).and_then(Value::as_array) else { continue };
        for dataset in datasets {
            let Some(dataset_id) = dataset_node(ctx, dataset, records) else { continue };
            if let Some((job_id, _)) = &job_id {
                records.push(Record::Edge(Edge::new(job_id, &dataset_id, edge_type)));
            }
            if field == "outputs" {
                extract_column_facets(ctx, dataset, records);
            }
        }
    }
}

fn dataset_node(
    ctx: &ExtractionContext<'_>,
    dataset: &Value,
    records: &mut Vec<Record>,
) -> Option<String> {
    let namespace = dataset.get("namespace")?.as_str()?;
    let name = dataset.get("name")?.as_str()?;
    let id = format!("data:{namespace}/{name}");
    records.push(Record::Node(
        Node::new(&id, name, NodeType::DataAsset)
            .with_path(ctx.path.clone())
            .with_meta("namespace", serde_json::json!(namespace)),
    ));
    Some(id)
}

/// Schema and columnLineage facets on an output dataset.
fn extract_column_facets(ctx: &ExtractionContext<'_>, dataset: &Value, records: &mut Vec<Record>) {
    let (Some(namespace), Some(name)) = (
        dataset.get("namespace").and_then(Value::as_str),
        dataset.get("name").and_then(Value::as_str),
    ) else {
        return;
    };
    let Some(facets) = dataset.get("facets") else { return };

    if let Some(fields) =
        facets.get("schema").and_then(|s| s.get("fields")).and_then(Value::as_array)
    {
        for field in fields {
            let Some(field_name) = field.get("name").and_then(Value::as_str) else { continue };
            let id = format!("column:{namespace}/{name}/{field_name}");
            let mut node =
                Node::new(&id, field_name, NodeType::Column).with_path(ctx.path.clone());
            if let Some(data_type) = field.get("type").and_then(Value::as_str) {
                node = node.with_meta("data_type", serde_json::json!(data_type));
            }
            records.push(Record::Node(node));
        }
    }

    let Some(lineage_fields) = facets
        .get("columnLineage")
        .and_then(|c| c.get("fields"))
        .and_then(Value::as_object)
    else {
        return;
    };
    let mut output_fields: Vec<&String> = lineage_fields.keys().collect();
    output_fields.sort_unstable();
    for output_field in output_fields {
        let target_id = format!("column:{namespace}/{name}/{output_field}");
        let Some(input_fields) = lineage_fields[output_field]
            .get("inputFields")
            .and_then(Value::as_array)
        else {
            continue;
        };
        for input in input_fields {
            let (Some(in_ns), Some(in_name), Some(in_field)) = (
                input.get("namespace").and_then(Value::as_str),
                input.get("name").and_then(Value::as_str),
                input.get("field").and_then(Value::as_str),
            ) else {
                continue;
            };
            let source_id = format!("column:{in_ns}/{in_name}/{in_field}");
            records.push(Record::Node(
                Node::new(&source_id, in_field, NodeType::Column).with_path(ctx.path.clone()),
            ));
            records.push(Record::Edge(Edge::new(
                &source_id,
                &target_id,
                RelationshipType::Transforms,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<Record> {
        let ctx = ExtractionContext::new("/repo/lineage/event.json", text);
        let extractor = OpenLineageExtractor::new();
        assert!(extractor.can_extract(&ctx));
        extractor.extract(&ctx).unwrap()
    }

    fn find_node<'a>(records: &'a [Record], id: &str) -> Option<&'a Node> {
        records.iter().find_map(|r| match r {
            Record::Node(n) if n.id == id => Some(n),
            _ => None,
        })
    }

    fn edges_of(records: &[Record], edge_type: RelationshipType) -> Vec<Edge> {
        records
            .iter()
            .filter_map(|r| match r {
                Record::Edge(e) if e.edge_type == edge_type => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_complete_event_yields_job_and_datasets() {
        let text = r#"{
            "eventType": "COMPLETE",
            "eventTime": "2024-01-01T00:00:00Z",
            "job": {"namespace": "spark", "name": "daily_etl"},
            "run": {"runId": "123"},
            "inputs": [{"namespace": "db", "name": "users"}],
            "outputs": [{"namespace": "s3", "name": "bucket/data"}]
        }"#;
        let records = extract(text);

        let job = find_node(&records, "job:spark/daily_etl").unwrap();
        assert_eq!(job.node_type, NodeType::Job);
        assert_eq!(job.metadata.get("run_id"), Some(&serde_json::json!("123")));

        assert!(find_node(&records, "data:db/users").is_some());
        assert!(find_node(&records, "data:s3/bucket/data").is_some());

        let reads = edges_of(&records, RelationshipType::Reads);
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].source_id, "job:spark/daily_etl");
        assert_eq!(reads[0].target_id, "data:db/users");

        let writes = edges_of(&records, RelationshipType::Writes);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].target_id, "data:s3/bucket/data");
    }

    #[test]
    fn test_start_events_are_ignored() {
        let text = r#"{"eventType": "START", "job": {"namespace": "a", "name": "b"}}"#;
        let records = extract(text);
        assert!(find_node(&records, "job:a/b").is_none());
        assert_eq!(records.len(), 1); // just the file node
    }

    #[test]
    fn test_column_lineage_facet() {
        let text = r#"{
            "eventType": "COMPLETE",
            "job": {"namespace": "ns", "name": "job1"},
            "outputs": [{
                "namespace": "db", "name": "target_table",
                "facets": {
                    "schema": {"fields": [{"name": "id", "type": "INT"}]},
                    "columnLineage": {
                        "fields": {
                            "id": {
                                "inputFields": [
                                    {"namespace": "db", "name": "src_table", "field": "user_id"}
                                ]
                            }
                        }
                    }
                }
            }]
        }"#;
        let records = extract(text);

        let column = find_node(&records, "column:db/target_table/id").unwrap();
        assert_eq!(column.metadata.get("data_type"), Some(&serde_json::json!("INT")));

        let transforms = edges_of(&records, RelationshipType::Transforms);
        assert_eq!(transforms.len(), 1);
        assert_eq!(transforms[0].source_id, "column:db/src_table/user_id");
        assert_eq!(transforms[0].target_id, "column:db/target_table/id");
    }

    #[test]
    fn test_event_batches() {
        let text = r#"[
            {"eventType": "COMPLETE", "job": {"namespace": "ns", "name": "first"}},
            {"eventType": "FAIL", "job": {"namespace": "ns", "name": "second"}}
        ]"#;
        let records = extract(text);
        assert!(find_node(&records, "job:ns/first").is_some());
        assert!(find_node(&records, "job:ns/second").is_some());
    }
}
