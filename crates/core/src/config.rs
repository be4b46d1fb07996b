//! Scan configuration and safety defaults.
//!
//! The compiled-in limits protect the parsing engine from binary files,
//! generated code, and runaway directory recursion. Project-level overrides
//! live in `.jnkn/config.yaml`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Safety limits
// ---------------------------------------------------------------------------

/// Files larger than this are skipped to prevent memory exhaustion.
pub const MAX_FILE_SIZE_BYTES: u64 = 500 * 1024;

/// Lines longer than this are almost always minified or generated code.
pub const MAX_LINE_LENGTH: usize = 10_000;

/// Maximum directory depth during the walk.
pub const MAX_DIRECTORY_DEPTH: usize = 15;

/// Directory names skipped entirely during traversal.
const IGNORE_DIRECTORIES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".venv",
    "venv",
    "env",
    ".env",
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "site-packages",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".terraform",
    ".idea",
    ".vscode",
    "__snapshots__",
    "__mocks__",
    "coverage",
    "htmlcov",
    ".jnkn",
];

/// Extensions that look like text but are binaries or data dumps.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "svg", "mp4", "mov", "webp", "zip", "tar", "gz", "pyc",
    "pyo", "so", "dll", "exe", "bin", "whl", "deb", "rpm", "pdf", "inv", "pkl", "parquet", "npy",
    "h5", "onnx", "pb", "tfstate", "tfplan", "map",
];

/// Exact file names that are lock or generated artifacts.
const IGNORE_FILE_NAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "Cargo.lock",
    "Gemfile.lock",
];

/// File name suffixes for minified/lock/log artifacts.
const IGNORE_FILE_SUFFIXES: &[&str] = &[".lock", ".min.js", ".min.css", ".log", ".snap"];

// ---------------------------------------------------------------------------
// Scan configuration
// ---------------------------------------------------------------------------

/// Runtime configuration for the parsing engine and watcher.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub root: PathBuf,
    /// Directory names to skip during the walk.
    pub ignore_dirs: HashSet<String>,
    /// Stitched-edge emission floor.
    pub min_confidence: f64,
    pub max_file_size: u64,
    pub max_line_length: usize,
    pub max_depth: usize,
}

impl ScanConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ScanConfig {
            root: root.into(),
            ignore_dirs: IGNORE_DIRECTORIES.iter().map(|s| s.to_string()).collect(),
            min_confidence: 0.5,
            max_file_size: MAX_FILE_SIZE_BYTES,
            max_line_length: MAX_LINE_LENGTH,
            max_depth: MAX_DIRECTORY_DEPTH,
        }
    }

    pub fn should_skip_dir(&self, name: &str) -> bool {
        self.ignore_dirs.contains(name)
    }

    /// Extension/name gate: binary, lock, minified, and map artifacts.
    pub fn should_skip_file(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return true,
        };
        if IGNORE_FILE_NAMES.contains(&name) {
            return true;
        }
        if IGNORE_FILE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return true;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    }

    /// Combined directory + file gate for a path relative to the root.
    /// Used by the watcher, which sees single paths rather than a walk.
    pub fn is_ignored(&self, rel_path: &Path) -> bool {
        for part in rel_path.iter().take(rel_path.iter().count().saturating_sub(1)) {
            if let Some(name) = part.to_str() {
                if self.should_skip_dir(name) {
                    return true;
                }
            }
        }
        self.should_skip_file(rel_path)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("."))
    }
}

// ---------------------------------------------------------------------------
// Project configuration (.jnkn/config.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSection {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSection {
    #[serde(default = "default_rules_version")]
    pub version: u32,
}

fn default_rules_version() -> u32 {
    crate::confidence::RULE_SET_VERSION
}

/// On-disk project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub version: String,
    pub project_name: String,
    pub scan: ScanSection,
    /// Inline suppression patterns, `"source -> target"` shorthand.
    #[serde(default)]
    pub suppressions: Vec<String>,
    #[serde(default = "default_rules")]
    pub rules: RulesSection,
}

fn default_rules() -> RulesSection {
    RulesSection { version: default_rules_version() }
}

impl ProjectConfig {
    pub fn new(project_name: impl Into<String>) -> Self {
        ProjectConfig {
            version: "1.0".to_string(),
            project_name: project_name.into(),
            scan: ScanSection {
                include: Vec::new(),
                exclude: vec![
                    "**/node_modules/**".to_string(),
                    "**/venv/**".to_string(),
                    "**/.terraform/**".to_string(),
                    "**/__pycache__/**".to_string(),
                    "**/dist/**".to_string(),
                    "**/build/**".to_string(),
                ],
                min_confidence: 0.5,
            },
            suppressions: Vec::new(),
            rules: default_rules(),
        }
    }

    /// Standard location: `<root>/.jnkn/config.yaml`.
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(".jnkn").join("config.yaml")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Merge the on-disk settings onto the compiled-in defaults.
    pub fn to_scan_config(&self, root: impl Into<PathBuf>) -> ScanConfig {
        let mut config = ScanConfig::new(root);
        config.min_confidence = self.scan.min_confidence;
        for pattern in &self.scan.exclude {
            // `**/name/**` glob excludes become walk-time directory skips.
            if let Some(name) = dir_name_of_glob(pattern) {
                config.ignore_dirs.insert(name.to_string());
            }
        }
        config
    }
}

fn dir_name_of_glob(pattern: &str) -> Option<&str> {
    let inner = pattern.strip_prefix("**/")?.strip_suffix("/**")?;
    (!inner.is_empty() && !inner.contains('/') && !inner.contains('*')).then_some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ignores() {
        let config = ScanConfig::new(".");
        assert!(config.should_skip_dir("node_modules"));
        assert!(config.should_skip_dir(".git"));
        assert!(config.should_skip_dir(".jnkn"));
        assert!(!config.should_skip_dir("src"));
    }

    #[test]
    fn test_file_gates() {
        let config = ScanConfig::new(".");
        assert!(config.should_skip_file(Path::new("image.png")));
        assert!(config.should_skip_file(Path::new("bundle.min.js")));
        assert!(config.should_skip_file(Path::new("package-lock.json")));
        assert!(config.should_skip_file(Path::new("app.js.map")));
        assert!(!config.should_skip_file(Path::new("app.py")));
        assert!(!config.should_skip_file(Path::new("main.tf")));
    }

    #[test]
    fn test_is_ignored_checks_parent_dirs() {
        let config = ScanConfig::new(".");
        assert!(config.is_ignored(Path::new("node_modules/pkg/index.js")));
        assert!(!config.is_ignored(Path::new("src/app.py")));
    }

    #[test]
    fn test_project_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = ProjectConfig::path_for(dir.path());

        let config = ProjectConfig::new("demo");
        config.save(&path).unwrap();

        let loaded = ProjectConfig::load(&path).unwrap();
        assert_eq!(loaded.project_name, "demo");
        assert_eq!(loaded.scan.min_confidence, 0.5);
        assert!(loaded.scan.exclude.iter().any(|e| e.contains("node_modules")));
    }

    #[test]
    fn test_missing_config_is_a_config_error() {
        let err = ProjectConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_exclude_globs_become_dir_skips() {
        let mut config = ProjectConfig::new("demo");
        config.scan.exclude.push("**/generated/**".to_string());
        config.scan.min_confidence = 0.7;

        let scan = config.to_scan_config(".");
        assert!(scan.should_skip_dir("generated"));
        assert_eq!(scan.min_confidence, 0.7);
    }
}
