//! Application-source extractor: environment-variable reads and in-file
//! symbol definitions, detected with per-language regex tables.

use super::{ExtractionContext, Extractor, Record};
use crate::types::{Edge, Node, NodeType, RelationshipType};
use regex::Regex;
use std::collections::HashSet;

const SOURCE_EXTENSIONS: &[&str] =
    &["py", "js", "jsx", "ts", "tsx", "mjs", "cjs", "go", "rs", "rb", "java", "kt"];

pub struct SourceExtractor {
    env_patterns: Vec<Regex>,
    py_def: Regex,
    py_class: Regex,
    js_function: Regex,
    js_class: Regex,
    go_func: Regex,
    rust_fn: Regex,
    rust_type: Regex,
}

impl SourceExtractor {
    pub fn new() -> Self {
        SourceExtractor {
            env_patterns: vec![
                // Python: os.getenv("X"), os.environ["X"], os.environ.get("X")
                Regex::new(r#"os\.getenv\(\s*["']([A-Za-z_][A-Za-z0-9_]*)["']"#).unwrap(),
                Regex::new(r#"os\.environ(?:\.get\(\s*|\[\s*)["']([A-Za-z_][A-Za-z0-9_]*)["']"#)
                    .unwrap(),
                // Node: process.env.X, process.env["X"]
                Regex::new(r#"process\.env\.([A-Za-z_][A-Za-z0-9_]*)"#).unwrap(),
                Regex::new(r#"process\.env\[\s*["']([A-Za-z_][A-Za-z0-9_]*)["']\s*\]"#).unwrap(),
                // Go: os.Getenv("X"), os.LookupEnv("X")
                Regex::new(r#"os\.(?:Getenv|LookupEnv)\(\s*"([A-Za-z_][A-Za-z0-9_]*)""#).unwrap(),
                // Rust: env::var("X"), std::env::var_os("X")
                Regex::new(r#"env::var(?:_os)?\(\s*"([A-Za-z_][A-Za-z0-9_]*)""#).unwrap(),
                // Ruby: ENV["X"], ENV.fetch("X")
                Regex::new(r#"ENV(?:\.fetch\(\s*|\[\s*)["']([A-Za-z_][A-Za-z0-9_]*)["']"#).unwrap(),
            ],
            py_def: Regex::new(r"^(?:async\s+)?def\s+(\w+)").unwrap(),
            py_class: Regex::new(r"^class\s+(\w+)").unwrap(),
            js_function: Regex::new(r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+(\w+)")
                .unwrap(),
            js_class: Regex::new(r"^(?:export\s+)?(?:abstract\s+)?class\s+(\w+)").unwrap(),
            go_func: Regex::new(r"^func\s+(?:\([^)]*\)\s*)?(\w+)").unwrap(),
            rust_fn: Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+(\w+)").unwrap(),
            rust_type: Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+(\w+)")
                .unwrap(),
        }
    }

    fn symbols_on_line(&self, ext: &str, line: &str) -> Vec<String> {
        let patterns: &[&Regex] = match ext {
            "py" => &[&self.py_def, &self.py_class],
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => &[&self.js_function, &self.js_class],
            "go" => &[&self.go_func],
            "rs" => &[&self.rust_fn, &self.rust_type],
            _ => &[],
        };
        patterns
            .iter()
            .filter_map(|re| re.captures(line).map(|c| c[1].to_string()))
            .collect()
    }
}

impl Default for SourceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for SourceExtractor {
    fn name(&self) -> &'static str {
        "source"
    }

    fn can_extract(&self, ctx: &ExtractionContext<'_>) -> bool {
        SOURCE_EXTENSIONS.contains(&ctx.extension())
    }

    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<Vec<Record>, String> {
        let file_id = ctx.file_id();
        let ext = ctx.extension().to_string();
        let mut records = vec![Record::Node(ctx.file_node())];

        let mut seen_envs: HashSet<String> = HashSet::new();
        let mut seen_symbols: HashSet<String> = HashSet::new();

        for (idx, line) in ctx.text.lines().enumerate() {
            let line_no = idx + 1;

            for pattern in &self.env_patterns {
                for captures in pattern.captures_iter(line) {
                    let name = captures[1].to_string();
                    if !seen_envs.insert(name.clone()) {
                        continue;
                    }
                    let env_id = format!("env:{name}");
                    records.push(Record::Node(
                        Node::new(&env_id, &name, NodeType::EnvVar)
                            .with_path(ctx.path.clone())
                            .with_line(line_no),
                    ));
                    records.push(Record::Edge(
                        Edge::new(&file_id, &env_id, RelationshipType::Reads)
                            .with_meta("line", serde_json::json!(line_no)),
                    ));
                }
            }

            for symbol in self.symbols_on_line(&ext, line) {
                if !seen_symbols.insert(symbol.clone()) {
                    continue;
                }
                let code_id = format!("code:{}#{symbol}", ctx.path);
                records.push(Record::Node(
                    Node::new(&code_id, &symbol, NodeType::CodeEntity)
                        .with_path(ctx.path.clone())
                        .with_line(line_no),
                ));
                records.push(Record::Edge(Edge::new(&file_id, &code_id, RelationshipType::Defines)));
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(path: &str, text: &str) -> Vec<Record> {
        let ctx = ExtractionContext::new(path, text);
        let extractor = SourceExtractor::new();
        assert!(extractor.can_extract(&ctx));
        extractor.extract(&ctx).unwrap()
    }

    fn node_ids(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .filter_map(|r| match r {
                Record::Node(n) => Some(n.id.clone()),
                Record::Edge(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_python_env_reads() {
        let text = r#"
import os

DB_HOST = os.getenv("PAYMENT_DB_HOST")
DB_PORT = os.environ.get("PAYMENT_DB_PORT", "5432")
TOKEN = os.environ["API_TOKEN"]
"#;
        let records = extract("/repo/src/app.py", text);
        let ids = node_ids(&records);
        assert!(ids.contains(&"env:PAYMENT_DB_HOST".to_string()));
        assert!(ids.contains(&"env:PAYMENT_DB_PORT".to_string()));
        assert!(ids.contains(&"env:API_TOKEN".to_string()));

        let reads: Vec<&Edge> = records
            .iter()
            .filter_map(|r| match r {
                Record::Edge(e) if e.edge_type == RelationshipType::Reads => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(reads.len(), 3);
        assert!(reads.iter().all(|e| e.source_id == "file:/repo/src/app.py"));
        assert!(reads.iter().all(|e| e.confidence == 1.0));
    }

    #[test]
    fn test_env_nodes_carry_lines() {
        let text = "import os\nX = os.getenv(\"ONLY_ONE\")\n";
        let records = extract("/repo/app.py", text);
        let env = records
            .iter()
            .find_map(|r| match r {
                Record::Node(n) if n.id == "env:ONLY_ONE" => Some(n),
                _ => None,
            })
            .unwrap();
        assert_eq!(env.line(), Some(2));
    }

    #[test]
    fn test_node_and_go_env_forms() {
        let js = extract("/repo/index.js", "const host = process.env.REDIS_HOST;\n");
        assert!(node_ids(&js).contains(&"env:REDIS_HOST".to_string()));

        let go = extract("/repo/main.go", "port := os.Getenv(\"HTTP_PORT\")\n");
        assert!(node_ids(&go).contains(&"env:HTTP_PORT".to_string()));
    }

    #[test]
    fn test_duplicate_reads_collapse() {
        let text = "import os\na = os.getenv(\"X_VAR\")\nb = os.getenv(\"X_VAR\")\n";
        let records = extract("/repo/app.py", text);
        let env_count = node_ids(&records).iter().filter(|id| id.starts_with("env:")).count();
        assert_eq!(env_count, 1);
    }

    #[test]
    fn test_symbol_definitions() {
        let text = "import os\n\ndef connect():\n    pass\n\nclass PaymentService:\n    pass\n";
        let records = extract("/repo/svc.py", text);
        let ids = node_ids(&records);
        assert!(ids.contains(&"code:/repo/svc.py#connect".to_string()));
        assert!(ids.contains(&"code:/repo/svc.py#PaymentService".to_string()));

        let defines = records
            .iter()
            .filter(|r| matches!(r, Record::Edge(e) if e.edge_type == RelationshipType::Defines))
            .count();
        assert_eq!(defines, 2);
    }

    #[test]
    fn test_indented_python_defs_are_not_top_level() {
        let text = "class A:\n    def method(self):\n        pass\n";
        let records = extract("/repo/m.py", text);
        let ids = node_ids(&records);
        assert!(ids.contains(&"code:/repo/m.py#A".to_string()));
        assert!(!ids.iter().any(|id| id.ends_with("#method")));
    }
}
