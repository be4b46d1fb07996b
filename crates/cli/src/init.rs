//! `jnkn init` — bootstrap a project with a configuration tailored to the
//! detected technology stack, and optionally scaffold the demo tree.

use jnkn_core::ProjectConfig;
use std::collections::BTreeSet;
use std::path::Path;

// Demo files showcase one cross-domain chain: Python reads an env var,
// Terraform declares the matching output, Kubernetes injects it.
const DEMO_APP_PY: &str = r#"import os

DB_HOST = os.getenv("PAYMENT_DB_HOST")
DB_PORT = os.getenv("PAYMENT_DB_PORT", "5432")


def connect():
    if not DB_HOST:
        raise ValueError("Database host not configured!")
    print(f"Connecting to {DB_HOST}:{DB_PORT}...")
"#;

const DEMO_MAIN_TF: &str = r#"resource "aws_db_instance" "payment_db" {
  identifier        = "payment-db-prod"
  instance_class    = "db.t3.micro"
  allocated_storage = 20
  engine            = "postgres"
}

output "payment_db_host" {
  value       = aws_db_instance.payment_db.address
  description = "The endpoint for the payment database"
}

output "payment_db_port" {
  value = aws_db_instance.payment_db.port
}
"#;

const DEMO_DEPLOYMENT_YAML: &str = r#"apiVersion: apps/v1
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

/// Initialize a project. Returns the process exit code.
pub fn run_init(root: &Path, demo: bool, force: bool) -> i32 {
    if demo {
        let demo_dir = root.join("jnkn-demo");
        if let Err(e) = scaffold_demo(&demo_dir) {
            eprintln!("Failed to create demo project: {e}");
            return 2;
        }
        eprintln!("Created demo project at {}", demo_dir.display());
        let code = init_project(&demo_dir, true);
        if code == 0 {
            eprintln!();
            eprintln!("Ready to go! Try:");
            eprintln!("  cd jnkn-demo");
            eprintln!("  jnkn scan");
            eprintln!("  jnkn blast-radius env:PAYMENT_DB_HOST");
        }
        return code;
    }

    let config_path = ProjectConfig::path_for(root);
    if config_path.exists() && !force {
        eprintln!("Configuration already exists at {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return 2;
    }
    init_project(root, force)
}

fn init_project(root: &Path, force: bool) -> i32 {
    let config_path = ProjectConfig::path_for(root);
    if config_path.exists() && !force {
        eprintln!("Configuration already exists at {}", config_path.display());
        return 2;
    }

    let stack = detect_stack(root);
    if stack.is_empty() {
        eprintln!("No specific technologies detected. Using defaults.");
    } else {
        eprintln!("Detected: {}", stack.iter().cloned().collect::<Vec<_>>().join(", "));
    }

    let name = root.file_name().and_then(|n| n.to_str()).unwrap_or("my-project");
    let mut config = ProjectConfig::new(name);
    config.scan.include = includes_for(&stack);

    if let Err(e) = config.save(&config_path) {
        eprintln!("Failed to write configuration: {e}");
        return 2;
    }
    if let Err(e) = ensure_gitignore(root) {
        eprintln!("Warning: could not update .gitignore: {e}");
    }

    eprintln!("Initialized. Config created at {}", config_path.display());
    0
}

/// Heuristic technology detection by marker files and extensions near the
/// root. Depth-limited: this runs before any configuration exists.
fn detect_stack(root: &Path) -> BTreeSet<&'static str> {
    let mut stack = BTreeSet::new();
    if root.join("pyproject.toml").exists() || root.join("requirements.txt").exists() {
        stack.insert("python");
    }
    if root.join("package.json").exists() {
        stack.insert("javascript");
    }
    if root.join("dbt_project.yml").exists() {
        stack.insert("dbt");
    }
    scan_extensions(root, 0, &mut stack);
    stack
}

fn scan_extensions(dir: &Path, depth: usize, stack: &mut BTreeSet<&'static str>) {
    if depth > 3 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if !name.starts_with('.') && name != "node_modules" && name != "target" {
                scan_extensions(&path, depth + 1, stack);
            }
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => {
                stack.insert("python");
            }
            Some("tf") => {
                stack.insert("terraform");
            }
            Some("yaml") | Some("yml") => {
                stack.insert("kubernetes");
            }
            Some("js") | Some("ts") => {
                stack.insert("javascript");
            }
            _ => {}
        }
    }
}

fn includes_for(stack: &BTreeSet<&'static str>) -> Vec<String> {
    let mut includes = Vec::new();
    if stack.contains("python") {
        includes.push("**/*.py".to_string());
    }
    if stack.contains("terraform") {
        includes.push("**/*.tf".to_string());
    }
    if stack.contains("javascript") {
        includes.extend(["**/*.js".to_string(), "**/*.ts".to_string(), "**/*.tsx".to_string()]);
    }
    if stack.contains("kubernetes") {
        includes.extend(["**/*.yaml".to_string(), "**/*.yml".to_string()]);
    }
    if includes.is_empty() {
        includes.push("**/*".to_string());
    }
    includes
}

/// Keep jnkn state out of version control.
fn ensure_gitignore(root: &Path) -> std::io::Result<()> {
    let gitignore = root.join(".gitignore");
    let entry = "\n# jnkn\n.jnkn/\n";
    if !gitignore.exists() {
        return std::fs::write(&gitignore, entry);
    }
    let content = std::fs::read_to_string(&gitignore)?;
    if !content.contains(".jnkn") {
        std::fs::write(&gitignore, format!("{content}{entry}"))?;
    }
    Ok(())
}

fn scaffold_demo(demo_dir: &Path) -> std::io::Result<()> {
    let src = demo_dir.join("src");
    let terraform = demo_dir.join("terraform");
    let k8s = demo_dir.join("k8s");
    std::fs::create_dir_all(&src)?;
    std::fs::create_dir_all(&terraform)?;
    std::fs::create_dir_all(&k8s)?;
    std::fs::write(src.join("app.py"), DEMO_APP_PY)?;
    std::fs::write(terraform.join("main.tf"), DEMO_MAIN_TF)?;
    std::fs::write(k8s.join("deployment.yaml"), DEMO_DEPLOYMENT_YAML)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_config_and_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "import os\n").unwrap();

        let code = run_init(dir.path(), false, false);
        assert_eq!(code, 0);

        let config = ProjectConfig::load(&ProjectConfig::path_for(dir.path())).unwrap();
        assert!(config.scan.include.contains(&"**/*.py".to_string()));
        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(gitignore.contains(".jnkn/"));
    }

    #[test]
    fn test_init_refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run_init(dir.path(), false, false), 0);
        assert_eq!(run_init(dir.path(), false, false), 2);
        assert_eq!(run_init(dir.path(), false, true), 0);
    }

    #[test]
    fn test_demo_scaffolds_cross_domain_tree() {
        let dir = tempfile::tempdir().unwrap();
        let code = run_init(dir.path(), true, false);
        assert_eq!(code, 0);

        let demo = dir.path().join("jnkn-demo");
        assert!(demo.join("src/app.py").exists());
        assert!(demo.join("terraform/main.tf").exists());
        assert!(demo.join("k8s/deployment.yaml").exists());
        assert!(ProjectConfig::path_for(&demo).exists());

        let app = std::fs::read_to_string(demo.join("src/app.py")).unwrap();
        assert!(app.contains("PAYMENT_DB_HOST"));
    }
}
