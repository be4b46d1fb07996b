//! Terraform extractor: resource, output, and module declarations from HCL
//! text, plus `configures` edges for explicit and implicit references.
//!
//! Line-oriented with a brace counter — enough to attribute references to
//! their enclosing block without a full HCL parser.

use super::{ExtractionContext, Extractor, Record};
use crate::types::{Edge, Node, NodeType, RelationshipType};
use regex::Regex;
use std::collections::HashSet;

pub struct TerraformExtractor {
    resource: Regex,
    output: Regex,
    module: Regex,
    /// `<provider>_<resource>.<local_name>` style references.
    reference: Regex,
}

impl TerraformExtractor {
    pub fn new() -> Self {
        TerraformExtractor {
            resource: Regex::new(r#"^resource\s+"([^"]+)"\s+"([^"]+)""#).unwrap(),
            output: Regex::new(r#"^output\s+"([^"]+)""#).unwrap(),
            module: Regex::new(r#"^module\s+"([^"]+)""#).unwrap(),
            reference: Regex::new(r"\b([a-z][a-z0-9]*_[a-z0-9_]+\.[a-z][a-z0-9_]*)\b").unwrap(),
        }
    }
}

impl Default for TerraformExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for TerraformExtractor {
    fn name(&self) -> &'static str {
        "terraform"
    }

    fn can_extract(&self, ctx: &ExtractionContext<'_>) -> bool {
        ctx.extension() == "tf"
    }

    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<Vec<Record>, String> {
        let file_id = ctx.file_id();
        let mut records = vec![Record::Node(ctx.file_node())];

        // Current block: (node id, address for self-reference filtering)
        let mut current: Option<(String, String)> = None;
        let mut depth: i32 = 0;
        let mut seen_edges: HashSet<(String, String)> = HashSet::new();

        for (idx, line) in ctx.text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim_start();

            if depth == 0 {
                if let Some(caps) = self.resource.captures(trimmed) {
                    let (res_type, local_name) = (&caps[1], &caps[2]);
                    let address = format!("{res_type}.{local_name}");
                    let id = format!("infra:{address}");
                    records.push(Record::Node(
                        Node::new(&id, local_name, NodeType::InfraResource)
                            .with_path(ctx.path.clone())
                            .with_line(line_no)
                            .with_meta("resource_type", serde_json::json!(res_type)),
                    ));
                    records.push(Record::Edge(Edge::new(&file_id, &id, RelationshipType::Defines)));
                    current = Some((id, address));
                } else if let Some(caps) = self.output.captures(trimmed) {
                    let name = &caps[1];
                    let id = format!("infra:output.{name}");
                    records.push(Record::Node(
                        Node::new(&id, name, NodeType::InfraResource)
                            .with_path(ctx.path.clone())
                            .with_line(line_no)
                            .with_meta("output", serde_json::json!(true)),
                    ));
                    records.push(Record::Edge(Edge::new(&file_id, &id, RelationshipType::Defines)));
                    current = Some((id, format!("output.{name}")));
                } else if let Some(caps) = self.module.captures(trimmed) {
                    let name = &caps[1];
                    let id = format!("infra:module.{name}");
                    records.push(Record::Node(
                        Node::new(&id, name, NodeType::InfraResource)
                            .with_path(ctx.path.clone())
                            .with_line(line_no)
                            .with_meta("module", serde_json::json!(true)),
                    ));
                    records.push(Record::Edge(Edge::new(&file_id, &id, RelationshipType::Defines)));
                    current = Some((id, format!("module.{name}")));
                }
            } else if let Some((block_id, self_address)) = &current {
                // References inside a block body configure the block.
                for caps in self.reference.captures_iter(line) {
                    let address = &caps[1];
                    if address == self_address {
                        continue;
                    }
                    let source = format!("infra:{address}");
                    if seen_edges.insert((source.clone(), block_id.clone())) {
                        records.push(Record::Edge(
                            Edge::new(&source, block_id, RelationshipType::Configures)
                                .with_meta("line", serde_json::json!(line_no)),
                        ));
                    }
                }
            }

            depth += brace_delta(line);
            if depth <= 0 {
                depth = 0;
                current = None;
            }
        }

        Ok(records)
    }
}

/// Net brace count on a line, ignoring braces inside string literals.
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    let mut in_string = false;
    let mut prev = '\0';
    for c in line.chars() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '{' if !in_string => delta += 1,
            '}' if !in_string => delta -= 1,
            _ => {}
        }
        prev = c;
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN_TF: &str = r#"
resource "aws_db_instance" "payment_db" {
  identifier = "payment-db-prod"
  instance_class = "db.t3.micro"
  engine = "postgres"
}

output "payment_db_host" {
  value = aws_db_instance.payment_db.address
  description = "The endpoint for the payment database"
}

output "payment_db_port" {
  value = aws_db_instance.payment_db.port
}
"#;

    fn extract(text: &str) -> Vec<Record> {
        let ctx = ExtractionContext::new("/repo/terraform/main.tf", text);
        let extractor = TerraformExtractor::new();
        assert!(extractor.can_extract(&ctx));
        extractor.extract(&ctx).unwrap()
    }

    fn nodes(records: &[Record]) -> Vec<&Node> {
        records
            .iter()
            .filter_map(|r| match r {
                Record::Node(n) => Some(n),
                Record::Edge(_) => None,
            })
            .collect()
    }

    fn edges(records: &[Record]) -> Vec<&Edge> {
        records
            .iter()
            .filter_map(|r| match r {
                Record::Edge(e) => Some(e),
                Record::Node(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_resources_and_outputs_become_infra_nodes() {
        let records = extract(MAIN_TF);
        let nodes = nodes(&records);

        let resource = nodes.iter().find(|n| n.id == "infra:aws_db_instance.payment_db").unwrap();
        assert_eq!(resource.name, "payment_db");
        assert_eq!(resource.node_type, NodeType::InfraResource);
        assert_eq!(resource.metadata.get("resource_type"), Some(&serde_json::json!("aws_db_instance")));

        let output = nodes.iter().find(|n| n.id == "infra:output.payment_db_host").unwrap();
        assert_eq!(output.name, "payment_db_host");
        assert_eq!(output.metadata.get("output"), Some(&serde_json::json!(true)));
        assert!(output.line().is_some());
    }

    #[test]
    fn test_implicit_references_configure_the_block() {
        let records = extract(MAIN_TF);
        let all_edges = edges(&records);
        let configures: Vec<&&Edge> = all_edges
            .iter()
            .filter(|e| e.edge_type == RelationshipType::Configures)
            .collect();

        assert!(configures.iter().any(|e| e.source_id == "infra:aws_db_instance.payment_db"
            && e.target_id == "infra:output.payment_db_host"));
        assert!(configures.iter().any(|e| e.source_id == "infra:aws_db_instance.payment_db"
            && e.target_id == "infra:output.payment_db_port"));
    }

    #[test]
    fn test_explicit_depends_on() {
        let text = r#"
resource "aws_security_group" "db_sg" {
  name = "db-sg"
}

resource "aws_db_instance" "payment_db" {
  depends_on = [aws_security_group.db_sg]
}
"#;
        let records = extract(text);
        assert!(edges(&records).iter().any(|e| {
            e.edge_type == RelationshipType::Configures
                && e.source_id == "infra:aws_security_group.db_sg"
                && e.target_id == "infra:aws_db_instance.payment_db"
        }));
    }

    #[test]
    fn test_self_references_are_ignored() {
        let text = r#"
resource "aws_s3_bucket" "logs" {
  bucket = "logs"
  tags = { Name = "aws_s3_bucket.logs" }
}
"#;
        let records = extract(text);
        assert!(!edges(&records).iter().any(|e| e.edge_type == RelationshipType::Configures));
    }

    #[test]
    fn test_var_references_are_not_resources() {
        let text = r#"
resource "aws_db_instance" "db" {
  identifier = var.db_name
}
"#;
        let records = extract(text);
        assert!(!edges(&records)
            .iter()
            .any(|e| e.edge_type == RelationshipType::Configures));
    }

    #[test]
    fn test_file_defines_declarations() {
        let records = extract(MAIN_TF);
        let defines = edges(&records)
            .iter()
            .filter(|e| e.edge_type == RelationshipType::Defines)
            .count();
        assert_eq!(defines, 3);
    }
}
