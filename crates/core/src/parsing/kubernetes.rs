//! Kubernetes manifest extractor: workloads become infra nodes, container
//! env entries become `provides` edges, ConfigMap data becomes config keys.

use super::{find_line, ExtractionContext, Extractor, Record};
use crate::types::{Edge, Node, NodeType, RelationshipType};
use serde::Deserialize;
use serde_yaml::Value;

const WORKLOAD_KINDS: &[&str] =
    &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet", "Job", "CronJob", "Pod"];
const PLAIN_KINDS: &[&str] = &["Service", "Ingress"];

pub struct KubernetesExtractor;

impl KubernetesExtractor {
    pub fn new() -> Self {
        KubernetesExtractor
    }
}

impl Default for KubernetesExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for KubernetesExtractor {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn can_extract(&self, ctx: &ExtractionContext<'_>) -> bool {
        matches!(ctx.extension(), "yaml" | "yml") && ctx.text.contains("apiVersion")
    }

    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<Vec<Record>, String> {
        let file_id = ctx.file_id();
        let mut records = vec![Record::Node(ctx.file_node())];

        for document in serde_yaml::Deserializer::from_str(ctx.text) {
            let value = Value::deserialize(document).map_err(|e| e.to_string())?;
            extract_document(ctx, &file_id, &value, &mut records);
        }

        Ok(records)
    }
}

fn extract_document(
    ctx: &ExtractionContext<'_>,
    file_id: &str,
    doc: &Value,
    records: &mut Vec<Record>,
) {
    let Some(kind) = doc.get("kind").and_then(Value::as_str) else { return };
    let Some(name) = doc.get("metadata").and_then(|m| m.get("name")).and_then(Value::as_str)
    else {
        return;
    };

    if WORKLOAD_KINDS.contains(&kind) {
        let id = manifest_node(ctx, file_id, kind, name, records);
        for container in containers(doc) {
            extract_container_env(ctx, &id, container, records);
        }
    } else if PLAIN_KINDS.contains(&kind) {
        manifest_node(ctx, file_id, kind, name, records);
    } else if kind == "ConfigMap" {
        let id = manifest_node(ctx, file_id, kind, name, records);
        if let Some(data) = doc.get("data").and_then(Value::as_mapping) {
            let mut keys: Vec<&str> = data.keys().filter_map(Value::as_str).collect();
            keys.sort_unstable();
            for key in keys {
                let config_id = format!("config:{name}/{key}");
                let mut node = Node::new(&config_id, key, NodeType::ConfigKey)
                    .with_path(ctx.path.clone());
                if let Some(line) = find_line(ctx.text, key) {
                    node = node.with_line(line);
                }
                records.push(Record::Node(node));
                records.push(Record::Edge(Edge::new(&id, &config_id, RelationshipType::Provides)));
            }
        }
    } else if kind == "Secret" {
        let secret_id = format!("secret:{name}");
        let mut node =
            Node::new(&secret_id, name, NodeType::Secret).with_path(ctx.path.clone());
        if let Some(line) = find_line(ctx.text, name) {
            node = node.with_line(line);
        }
        records.push(Record::Node(node));
        records.push(Record::Edge(Edge::new(file_id, &secret_id, RelationshipType::Defines)));
    }
}

/// Emit the infra node for a manifest object and the file's `defines` edge.
fn manifest_node(
    ctx: &ExtractionContext<'_>,
    file_id: &str,
    kind: &str,
    name: &str,
    records: &mut Vec<Record>,
) -> String {
    let id = format!("infra:{}.{name}", kind.to_lowercase());
    let mut node = Node::new(&id, name, NodeType::InfraResource)
        .with_path(ctx.path.clone())
        .with_meta("kind", serde_json::json!(kind))
        .with_meta("manifest", serde_json::json!(true));
    if let Some(line) = find_line(ctx.text, name) {
        node = node.with_line(line);
    }
    records.push(Record::Node(node));
    records.push(Record::Edge(Edge::new(file_id, &id, RelationshipType::Defines)));
    id
}

/// Container specs live at different depths depending on the workload kind.
fn containers(doc: &Value) -> Vec<&Value> {
    let spec = doc.get("spec");
    let candidates = [
        spec.and_then(|s| s.get("template")).and_then(|t| t.get("spec")),
        spec.and_then(|s| s.get("jobTemplate"))
            .and_then(|j| j.get("spec"))
            .and_then(|s| s.get("template"))
            .and_then(|t| t.get("spec")),
        spec,
    ];
    for pod_spec in candidates.into_iter().flatten() {
        if let Some(list) = pod_spec.get("containers").and_then(Value::as_sequence) {
            return list.iter().collect();
        }
    }
    Vec::new()
}

fn extract_container_env(
    ctx: &ExtractionContext<'_>,
    manifest_id: &str,
    container: &Value,
    records: &mut Vec<Record>,
) {
    let Some(env) = container.get("env").and_then(Value::as_sequence) else { return };
    for entry in env {
        let Some(name) = entry.get("name").and_then(Value::as_str) else { continue };
        let env_id = format!("env:{name}");
        let mut node = Node::new(&env_id, name, NodeType::EnvVar).with_path(ctx.path.clone());
        if let Some(line) = find_line(ctx.text, name) {
            node = node.with_line(line);
        }
        records.push(Record::Node(node));
        records.push(Record::Edge(Edge::new(manifest_id, &env_id, RelationshipType::Provides)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: payment-service
spec:
  template:
    spec:
      containers:
        - name: app
          image: my-app:latest
          env:
            - name: PAYMENT_DB_HOST
              valueFrom:
                secretKeyRef:
                  name: db-secrets
                  key: host
"#;

    fn extract(text: &str) -> Vec<Record> {
        let ctx = ExtractionContext::new("/repo/k8s/deployment.yaml", text);
        let extractor = KubernetesExtractor::new();
        assert!(extractor.can_extract(&ctx));
        extractor.extract(&ctx).unwrap()
    }

    fn find_node<'a>(records: &'a [Record], id: &str) -> Option<&'a Node> {
        records.iter().find_map(|r| match r {
            Record::Node(n) if n.id == id => Some(n),
            _ => None,
        })
    }

    #[test]
    fn test_deployment_provides_env_var() {
        let records = extract(DEPLOYMENT);

        let deployment = find_node(&records, "infra:deployment.payment-service").unwrap();
        assert_eq!(deployment.metadata.get("kind"), Some(&serde_json::json!("Deployment")));
        assert_eq!(deployment.metadata.get("manifest"), Some(&serde_json::json!(true)));

        assert!(find_node(&records, "env:PAYMENT_DB_HOST").is_some());
        assert!(records.iter().any(|r| matches!(r, Record::Edge(e)
            if e.edge_type == RelationshipType::Provides
                && e.source_id == "infra:deployment.payment-service"
                && e.target_id == "env:PAYMENT_DB_HOST"
                && e.confidence == 1.0)));
    }

    #[test]
    fn test_multi_document_manifests() {
        let text = format!(
            "{}---\napiVersion: v1\nkind: Service\nmetadata:\n  name: payment-svc\n",
            DEPLOYMENT.trim_start()
        );
        let records = extract(&text);
        assert!(find_node(&records, "infra:deployment.payment-service").is_some());
        assert!(find_node(&records, "infra:service.payment-svc").is_some());
    }

    #[test]
    fn test_configmap_data_keys() {
        let text = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-settings
data:
  log_level: debug
  feature_flags: "a,b"
"#;
        let records = extract(text);
        assert!(find_node(&records, "infra:configmap.app-settings").is_some());
        let key = find_node(&records, "config:app-settings/log_level").unwrap();
        assert_eq!(key.node_type, NodeType::ConfigKey);
        assert!(records.iter().any(|r| matches!(r, Record::Edge(e)
            if e.edge_type == RelationshipType::Provides
                && e.source_id == "infra:configmap.app-settings"
                && e.target_id == "config:app-settings/log_level")));
    }

    #[test]
    fn test_secret_node() {
        let text = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: db-secrets\n";
        let records = extract(text);
        let secret = find_node(&records, "secret:db-secrets").unwrap();
        assert_eq!(secret.node_type, NodeType::Secret);
    }

    #[test]
    fn test_cronjob_nested_containers() {
        let text = r#"
apiVersion: batch/v1
kind: CronJob
metadata:
  name: nightly-sync
spec:
  jobTemplate:
    spec:
      template:
        spec:
          containers:
            - name: sync
              env:
                - name: SYNC_TOKEN
"#;
        let records = extract(text);
        assert!(records.iter().any(|r| matches!(r, Record::Edge(e)
            if e.edge_type == RelationshipType::Provides
                && e.source_id == "infra:cronjob.nightly-sync"
                && e.target_id == "env:SYNC_TOKEN")));
    }

    #[test]
    fn test_invalid_yaml_is_an_extractor_error() {
        let ctx = ExtractionContext::new("/repo/bad.yaml", "apiVersion: v1\nkind: [unclosed\n");
        let extractor = KubernetesExtractor::new();
        assert!(extractor.can_extract(&ctx));
        assert!(extractor.extract(&ctx).is_err());
    }
}
