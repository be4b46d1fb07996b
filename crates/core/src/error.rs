//! Per-subsystem error enums. Errors are values: extractor failures stay in
//! the `ParseResult`, store failures abort the transaction, manifest failures
//! surface immediately.

use thiserror::Error;

/// Project configuration problems. No partial work happens after one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration not found at {0}")]
    NotFound(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Persistent store failures. The enclosing transaction is rolled back.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("metadata serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Project-manifest (`jnkn.toml`) and dependency-resolution failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("Dependency '{0}' not found")]
    DependencyNotFound(String),
    /// Declared extension point that is not wired yet. Callers present this
    /// as a limitation, not a bug.
    #[error("Git support is not yet implemented (dependency '{0}')")]
    GitNotImplemented(String),
    #[error("could not read manifest: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures from the change-gate analysis (`check --git-diff`).
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures starting or running the filesystem watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}
