//! Project manifest (`jnkn.toml`) and dependency resolution.
//!
//! A manifest declares sibling repositories whose artifacts should be
//! scanned together with this one (an app depending on its infrastructure
//! repo, for example). Local path sources resolve now; git sources are a
//! declared forward extension.

use crate::error::ManifestError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "jnkn.toml";

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Where a dependency may come from. Either `path` or `git` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencySpec {
    pub path: Option<String>,
    pub git: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProjectManifest {
    pub name: String,
    pub version: String,
    pub dependencies: BTreeMap<String, DependencySpec>,
    /// `[tool.jnkn.sources]` — local overrides that beat the declared source.
    pub source_overrides: BTreeMap<String, DependencySpec>,
}

impl ProjectManifest {
    /// Load a manifest. A missing file yields defaults (directory name,
    /// version 0.0.0, no dependencies) rather than an error.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let fallback_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("project")
            .to_string();

        if !path.exists() {
            return Ok(ProjectManifest {
                name: fallback_name,
                version: "0.0.0".to_string(),
                dependencies: BTreeMap::new(),
                source_overrides: BTreeMap::new(),
            });
        }

        let text = std::fs::read_to_string(path)?;
        let value: toml::Value = toml::from_str(&text).map_err(|e| ManifestError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let project = value.get("project");
        let name = project
            .and_then(|p| p.get("name"))
            .and_then(toml::Value::as_str)
            .unwrap_or(&fallback_name)
            .to_string();
        let version = project
            .and_then(|p| p.get("version"))
            .and_then(toml::Value::as_str)
            .unwrap_or("0.0.0")
            .to_string();

        let dependencies = parse_dependency_table(value.get("dependencies"));
        let source_overrides = parse_dependency_table(
            value.get("tool").and_then(|t| t.get("jnkn")).and_then(|j| j.get("sources")),
        );

        Ok(ProjectManifest { name, version, dependencies, source_overrides })
    }
}

/// Accepts both the table form `{ path = ".." }` / `{ git = "..", branch = ".." }`
/// and the bare-string path shorthand.
fn parse_dependency_table(table: Option<&toml::Value>) -> BTreeMap<String, DependencySpec> {
    let mut out = BTreeMap::new();
    let Some(table) = table.and_then(toml::Value::as_table) else { return out };
    for (name, value) in table {
        let spec = match value {
            toml::Value::String(path) => {
                DependencySpec { path: Some(path.clone()), ..Default::default() }
            }
            toml::Value::Table(fields) => DependencySpec {
                path: fields.get("path").and_then(toml::Value::as_str).map(String::from),
                git: fields.get("git").and_then(toml::Value::as_str).map(String::from),
                branch: fields.get("branch").and_then(toml::Value::as_str).map(String::from),
            },
            _ => continue,
        };
        out.insert(name.clone(), spec);
    }
    out
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySource {
    Local,
    LocalOverride,
}

#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub name: String,
    pub path: PathBuf,
    pub source: DependencySource,
}

pub struct DependencyResolver {
    project_dir: PathBuf,
}

impl DependencyResolver {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        DependencyResolver { project_dir: project_dir.into() }
    }

    /// Resolve every declared dependency to an existing local directory.
    /// Overrides take precedence over the declared source; git sources
    /// without an override are a distinct not-implemented error.
    pub fn resolve(&self) -> Result<Vec<ResolvedDependency>, ManifestError> {
        let manifest = ProjectManifest::load(&self.project_dir.join(MANIFEST_FILE))?;
        let mut resolved = Vec::new();

        for (name, spec) in &manifest.dependencies {
            let (effective, source) = match manifest.source_overrides.get(name) {
                Some(override_spec) => (override_spec, DependencySource::LocalOverride),
                None => (spec, DependencySource::Local),
            };

            if let Some(rel) = &effective.path {
                let path = self.project_dir.join(rel);
                if !path.exists() {
                    return Err(ManifestError::DependencyNotFound(name.clone()));
                }
                resolved.push(ResolvedDependency { name: name.clone(), path, source });
            } else if effective.git.is_some() {
                return Err(ManifestError::GitNotImplemented(name.clone()));
            } else {
                return Err(ManifestError::DependencyNotFound(name.clone()));
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_manifest_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ProjectManifest::load(&dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.version, "0.0.0");
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn test_load_full_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(
            &path,
            r#"
[project]
name = "test-project"
version = "1.2.3"

[dependencies]
infra = { path = "../infra" }
shared = { git = "https://github.com/org/shared.git", branch = "main" }
legacy = "../legacy"

[tool.jnkn.sources]
shared = { path = "../local-shared" }
"#,
        )
        .unwrap();

        let manifest = ProjectManifest::load(&path).unwrap();
        assert_eq!(manifest.name, "test-project");
        assert_eq!(manifest.version, "1.2.3");
        assert_eq!(manifest.dependencies["infra"].path.as_deref(), Some("../infra"));
        assert_eq!(
            manifest.dependencies["shared"].git.as_deref(),
            Some("https://github.com/org/shared.git")
        );
        assert_eq!(manifest.dependencies["shared"].branch.as_deref(), Some("main"));
        assert_eq!(manifest.dependencies["legacy"].path.as_deref(), Some("../legacy"));
        assert_eq!(manifest.source_overrides["shared"].path.as_deref(), Some("../local-shared"));
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, "invalid [ toml").unwrap();

        let err = ProjectManifest::load(&path).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_resolve_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        let infra = dir.path().join("infra");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(&infra).unwrap();
        fs::write(project.join(MANIFEST_FILE), "[dependencies]\ninfra = { path = \"../infra\" }\n")
            .unwrap();

        let resolved = DependencyResolver::new(&project).resolve().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "infra");
        assert_eq!(resolved[0].source, DependencySource::Local);
        assert_eq!(resolved[0].path.canonicalize().unwrap(), infra.canonicalize().unwrap());
    }

    #[test]
    fn test_resolve_missing_path_names_the_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        fs::create_dir_all(&project).unwrap();
        fs::write(
            project.join(MANIFEST_FILE),
            "[dependencies]\nmissing = { path = \"../does_not_exist\" }\n",
        )
        .unwrap();

        let err = DependencyResolver::new(&project).resolve().unwrap_err();
        assert_eq!(err.to_string(), "Dependency 'missing' not found");
    }

    #[test]
    fn test_override_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        let local = dir.path().join("shared-local");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(&local).unwrap();
        fs::write(
            project.join(MANIFEST_FILE),
            r#"
[dependencies]
shared = { git = "https://example.com/repo.git" }

[tool.jnkn.sources]
shared = { path = "../shared-local" }
"#,
        )
        .unwrap();

        let resolved = DependencyResolver::new(&project).resolve().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].source, DependencySource::LocalOverride);
        assert_eq!(resolved[0].path.canonicalize().unwrap(), local.canonicalize().unwrap());
    }

    #[test]
    fn test_git_source_is_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        fs::create_dir_all(&project).unwrap();
        fs::write(
            project.join(MANIFEST_FILE),
            "[dependencies]\nremote = { git = \"https://github.com/org/repo.git\" }\n",
        )
        .unwrap();

        let err = DependencyResolver::new(&project).resolve().unwrap_err();
        assert!(matches!(err, ManifestError::GitNotImplemented(_)));
        assert!(err.to_string().contains("not yet implemented"));
    }
}
