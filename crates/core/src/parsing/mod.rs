//! Parsing engine: walks the tree, applies safety gates, and dispatches
//! files to domain extractors.
//!
//! Extractors are pure functions of `(path, text)` — they never read other
//! files or query the store. That purity is what makes incremental per-file
//! replacement correct: identical bytes always produce identical records.

pub mod dbt;
pub mod kubernetes;
pub mod openlineage;
pub mod source;
pub mod terraform;

use crate::config::ScanConfig;
use crate::error::StoreError;
use crate::storage::SqliteStore;
use crate::types::{canonical_path, Edge, Node, ParseResult, ScanMetadata};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Extractor contract
// ---------------------------------------------------------------------------

/// One record emitted by an extractor.
#[derive(Debug, Clone)]
pub enum Record {
    Node(Node),
    Edge(Edge),
}

/// Everything an extractor may look at for one file.
pub struct ExtractionContext<'a> {
    /// Canonical forward-slash path, as stored in ids and scan metadata.
    pub path: String,
    pub text: &'a str,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(path: impl Into<String>, text: &'a str) -> Self {
        ExtractionContext { path: path.into(), text }
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn extension(&self) -> &str {
        self.file_name().rsplit_once('.').map(|(_, e)| e).unwrap_or("")
    }

    pub fn file_id(&self) -> String {
        crate::types::file_id(&self.path)
    }

    /// The file node every extractor anchors its records to.
    pub fn file_node(&self) -> Node {
        Node::new(self.file_id(), self.file_name(), crate::types::NodeType::File)
            .with_path(self.path.clone())
    }
}

/// A domain extractor. The registry is ordered; the first extractor whose
/// `can_extract` returns true wins.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_extract(&self, ctx: &ExtractionContext<'_>) -> bool;
    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<Vec<Record>, String>;
}

/// The extractors registered at startup, most specific first.
pub fn default_registry() -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(dbt::DbtExtractor::new()),
        Box::new(openlineage::OpenLineageExtractor::new()),
        Box::new(terraform::TerraformExtractor::new()),
        Box::new(kubernetes::KubernetesExtractor::new()),
        Box::new(source::SourceExtractor::new()),
    ]
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ParserEngine {
    config: ScanConfig,
    extractors: Vec<Box<dyn Extractor>>,
}

/// Counters reported after a full scan.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanSummary {
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_deleted: usize,
    pub nodes: usize,
    pub edges: usize,
}

impl ParserEngine {
    pub fn new(config: ScanConfig) -> Self {
        ParserEngine { config, extractors: default_registry() }
    }

    pub fn with_extractors(config: ScanConfig, extractors: Vec<Box<dyn Extractor>>) -> Self {
        ParserEngine { config, extractors }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Parse a single file, applying the size and line-length gates.
    /// A failure stays local: the caller gets a failed `ParseResult`, never
    /// an error that would abort a walk.
    pub fn parse_file(&self, path: &Path) -> ParseResult {
        let canonical = canonical_path(path);

        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => return ParseResult::failed(canonical, vec![format!("stat failed: {e}")]),
        };
        if size > self.config.max_file_size {
            return ParseResult::failed(
                canonical,
                vec![format!("skipped_large: {size} bytes exceeds {} byte cap", self.config.max_file_size)],
            );
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => return ParseResult::failed(canonical, vec![format!("read failed: {e}")]),
        };
        let hash = ScanMetadata::compute_hash(&bytes);
        let text = String::from_utf8_lossy(&bytes);

        if text.lines().any(|l| l.len() > self.config.max_line_length) {
            return ParseResult::failed(
                canonical,
                vec![format!("skipped_long_line: a line exceeds {} bytes", self.config.max_line_length)],
            );
        }

        let ctx = ExtractionContext::new(canonical.clone(), &text);
        let extractor = self.extractors.iter().find(|e| e.can_extract(&ctx));
        let records = match extractor {
            Some(extractor) => match extractor.extract(&ctx) {
                Ok(records) => records,
                Err(message) => {
                    return ParseResult::failed(canonical, vec![format!("{}: {message}", extractor.name())]);
                }
            },
            // No extractor claims the file; still record the successful
            // (empty) parse so incremental change detection covers it.
            None => Vec::new(),
        };

        let (mut nodes, mut edges) = split_records(records);
        dedupe_nodes(&mut nodes);
        dedupe_edges(&mut edges);
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        edges.sort_by(|a, b| a.key().cmp(&b.key()));

        ParseResult::ok(canonical, hash, nodes, edges)
    }

    /// Walk the configured root and parse every file that passes the gates.
    /// Results come back sorted by path.
    pub fn scan(&self) -> Vec<ParseResult> {
        let files = self.collect_files();
        debug!(files = files.len(), root = %self.config.root.display(), "Walk complete");

        let mut results: Vec<ParseResult> =
            files.par_iter().map(|path| self.parse_file(path)).collect();
        results.sort_by(|a, b| a.path.cmp(&b.path));
        results
    }

    /// Walk additional roots (resolved manifest dependencies) with the same
    /// gates and parse them too.
    pub fn scan_roots(&self, roots: &[PathBuf]) -> Vec<ParseResult> {
        let mut files = self.collect_files();
        for root in roots {
            files.extend(self.collect_files_in(root));
        }
        let mut results: Vec<ParseResult> =
            files.par_iter().map(|path| self.parse_file(path)).collect();
        results.sort_by(|a, b| a.path.cmp(&b.path));
        results
    }

    fn collect_files(&self) -> Vec<PathBuf> {
        self.collect_files_in(&self.config.root)
    }

    fn collect_files_in(&self, root: &Path) -> Vec<PathBuf> {
        let skip = self.config.ignore_dirs.clone();
        let mut files = Vec::new();
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .max_depth(Some(self.config.max_depth))
            .filter_entry(move |entry| {
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    let name = entry.file_name().to_string_lossy();
                    return !skip.contains(name.as_ref());
                }
                true
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            if self.config.should_skip_file(entry.path()) {
                continue;
            }
            files.push(entry.path().to_path_buf());
        }
        files
    }

    /// Full scan + store sync: unchanged files (by content hash) are left
    /// untouched, changed files are atomically replaced, and files that
    /// disappeared from disk are purged.
    pub fn scan_and_store(&self, store: &SqliteStore) -> Result<ScanSummary, StoreError> {
        self.sync_results(store, self.scan())
    }

    /// Like [`ParserEngine::scan_and_store`] but over extra roots as well.
    pub fn scan_and_store_with_deps(
        &self,
        store: &SqliteStore,
        dep_roots: &[PathBuf],
    ) -> Result<ScanSummary, StoreError> {
        self.sync_results(store, self.scan_roots(dep_roots))
    }

    fn sync_results(
        &self,
        store: &SqliteStore,
        results: Vec<ParseResult>,
    ) -> Result<ScanSummary, StoreError> {
        let mut summary = ScanSummary::default();
        let seen: HashSet<String> = results.iter().map(|r| r.path.clone()).collect();

        for result in &results {
            if !result.success {
                summary.files_failed += 1;
                warn!(path = result.path.as_str(), errors = ?result.errors, "Parse failed");
                continue;
            }
            let unchanged = store
                .get_scan_metadata(&result.path)?
                .is_some_and(|meta| meta.hash == result.hash);
            if unchanged {
                summary.files_skipped += 1;
                continue;
            }
            store.replace_file(result)?;
            summary.files_parsed += 1;
            summary.nodes += result.nodes.len();
            summary.edges += result.edges.len();
        }

        // Purge records for files that no longer exist on disk.
        for meta in store.all_scan_metadata()? {
            if !seen.contains(&meta.path) {
                store.delete_nodes_by_file(&meta.path)?;
                summary.files_deleted += 1;
            }
        }

        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Record plumbing
// ---------------------------------------------------------------------------

fn split_records(records: Vec<Record>) -> (Vec<Node>, Vec<Edge>) {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for record in records {
        match record {
            Record::Node(n) => nodes.push(n),
            Record::Edge(e) => edges.push(e),
        }
    }
    (nodes, edges)
}

fn dedupe_nodes(nodes: &mut Vec<Node>) {
    let mut seen = HashSet::new();
    nodes.retain(|n| seen.insert(n.id.clone()));
}

fn dedupe_edges(edges: &mut Vec<Edge>) {
    let mut seen = HashSet::new();
    edges.retain(|e| seen.insert(e.key()));
}

/// 1-indexed line of the first occurrence of `needle`, for formats where the
/// deserializer loses positions.
pub(crate) fn find_line(text: &str, needle: &str) -> Option<usize> {
    text.lines().position(|l| l.contains(needle)).map(|i| i + 1)
}
