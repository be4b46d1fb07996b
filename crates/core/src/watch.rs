//! File watcher for incremental graph maintenance.
//!
//! Events flow notify → mpsc channel → debounce loop. Each settled path gets
//! the same gates as the full scan, then an atomic per-file replacement in
//! the store. Stitching is deferred behind a cooldown so a burst of saves
//! yields one stitch.

use crate::config::ScanConfig;
use crate::error::WatchError;
use crate::parsing::ParserEngine;
use crate::stitching::Stitcher;
use crate::storage::SqliteStore;
use crate::suppression::SuppressionStore;
use crate::types::canonical_path;
use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Debounce window: wait this long after the last event before processing.
const DEBOUNCE_MS: u64 = 500;

/// Minimum gap between stitcher runs.
const STITCH_COOLDOWN: Duration = Duration::from_millis(500);

/// Tracking state for every path the watcher has seen. A path absent from
/// the map is unseen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Parsed successfully; records live in the store.
    Tracked,
    /// Rejected by the ignore rules.
    Ignored,
    /// Last parse failed; the error is retained and previous records are
    /// left in place.
    Failed,
}

pub struct WatchService {
    root: PathBuf,
    config: ScanConfig,
    engine: ParserEngine,
    store: SqliteStore,
    stitcher: Stitcher,
    suppressions: SuppressionStore,
    states: DashMap<PathBuf, FileState>,
    dirty: AtomicBool,
    last_stitch: Mutex<Option<Instant>>,
    stitch_count: AtomicUsize,
}

impl WatchService {
    pub fn new(
        config: ScanConfig,
        store: SqliteStore,
        stitcher: Stitcher,
        suppressions: SuppressionStore,
    ) -> Self {
        let root = config.root.clone();
        let engine = ParserEngine::new(config.clone());
        WatchService {
            root,
            config,
            engine,
            store,
            stitcher,
            suppressions,
            states: DashMap::new(),
            dirty: AtomicBool::new(false),
            last_stitch: Mutex::new(None),
            stitch_count: AtomicUsize::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Event handling (public so tests can drive it without a real watcher)
    // -----------------------------------------------------------------------

    /// Handle a created or modified file.
    pub fn handle_change(&self, path: &Path) {
        if self.should_ignore(path) {
            self.states.insert(path.to_path_buf(), FileState::Ignored);
            return;
        }

        let result = self.engine.parse_file(path);
        if !result.success {
            // Previous nodes stay; a broken intermediate save must not wipe
            // the graph.
            warn!(path = %path.display(), errors = ?result.errors, "Parse failed");
            self.states.insert(path.to_path_buf(), FileState::Failed);
            return;
        }

        match self.store.replace_file(&result) {
            Ok(()) => {
                info!(
                    path = %path.display(),
                    nodes = result.nodes.len(),
                    edges = result.edges.len(),
                    "Change applied"
                );
                self.states.insert(path.to_path_buf(), FileState::Tracked);
                self.dirty.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Store update failed");
                self.states.insert(path.to_path_buf(), FileState::Failed);
            }
        }
    }

    /// Handle a deleted file.
    pub fn handle_remove(&self, path: &Path) {
        let canonical = canonical_path(path);
        match self.store.delete_nodes_by_file(&canonical) {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(path = %path.display(), nodes = deleted, "File records removed");
                    self.dirty.store(true, Ordering::SeqCst);
                }
                if let Err(e) = self.store.delete_scan_metadata(&canonical) {
                    warn!(path = %path.display(), error = %e, "Metadata cleanup failed");
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Delete failed"),
        }
        self.states.remove(path);
    }

    /// A move is a delete of the old path and a create of the new one.
    pub fn handle_rename(&self, from: &Path, to: &Path) {
        self.handle_remove(from);
        self.handle_change(to);
    }

    /// Run the stitcher if anything changed and the cooldown has elapsed.
    /// Returns true when a stitch actually ran.
    pub fn stitch_if_due(&self) -> bool {
        if !self.dirty.load(Ordering::SeqCst) {
            return false;
        }
        {
            let last = self.last_stitch.lock().unwrap();
            if let Some(at) = *last {
                if at.elapsed() < STITCH_COOLDOWN {
                    return false;
                }
            }
        }

        match self.run_stitch() {
            Ok(new_edges) => {
                debug!(edges = new_edges, "Stitch complete");
                true
            }
            Err(e) => {
                warn!(error = %e, "Stitch failed");
                false
            }
        }
    }

    fn run_stitch(&self) -> Result<usize, WatchError> {
        let graph = self.store.load_graph()?;
        let edges = self.stitcher.stitch(&graph, &self.suppressions);
        if !edges.is_empty() {
            self.store.upsert_edges(&edges)?;
        }
        self.dirty.store(false, Ordering::SeqCst);
        *self.last_stitch.lock().unwrap() = Some(Instant::now());
        self.stitch_count.fetch_add(1, Ordering::SeqCst);
        Ok(edges.len())
    }

    pub fn stitch_count(&self) -> usize {
        self.stitch_count.load(Ordering::SeqCst)
    }

    pub fn file_state(&self, path: &Path) -> Option<FileState> {
        self.states.get(path).map(|s| *s)
    }

    fn should_ignore(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        self.config.is_ignored(rel)
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Watch the root until the event source disconnects. Parsing runs on
    /// this loop's thread; the notify callback only forwards events, so the
    /// event source is never blocked.
    pub fn run(&self) -> Result<(), WatchError> {
        let (tx, rx) = mpsc::channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        info!(root = %self.root.display(), "Watching for changes");

        self.debounce_loop(rx);
        Ok(())
    }

    /// Collect events and process paths once they have been quiet for the
    /// debounce window.
    fn debounce_loop(&self, rx: mpsc::Receiver<Event>) {
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

        loop {
            match rx.recv_timeout(Duration::from_millis(DEBOUNCE_MS)) {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    );
                    if relevant {
                        let now = Instant::now();
                        for path in event.paths {
                            pending.insert(path, now);
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if !pending.is_empty() {
                        let cutoff = Instant::now() - Duration::from_millis(DEBOUNCE_MS);
                        let ready: Vec<PathBuf> = pending
                            .iter()
                            .filter(|(_, t)| **t <= cutoff)
                            .map(|(p, _)| p.clone())
                            .collect();
                        for path in &ready {
                            pending.remove(path);
                            self.dispatch(path);
                        }
                    }
                    self.stitch_if_due();
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Route a settled path: directories are rejected, existing files are
    /// (re)parsed, missing files are removals.
    fn dispatch(&self, path: &Path) {
        if path.is_dir() {
            return;
        }
        if path.exists() {
            self.handle_change(path);
        } else {
            self.handle_remove(path);
        }
        self.stitch_if_due();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn service(root: &Path) -> WatchService {
        WatchService::new(
            ScanConfig::new(root),
            SqliteStore::in_memory().unwrap(),
            Stitcher::new(),
            SuppressionStore::new(),
        )
    }

    #[test]
    fn test_change_parses_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.py");
        fs::write(&path, "import os\nX = os.getenv(\"DB_HOST\")\n").unwrap();

        let svc = service(dir.path());
        svc.handle_change(&path);

        assert_eq!(svc.file_state(&path), Some(FileState::Tracked));
        assert!(svc.store.node_count().unwrap() >= 2);
        assert!(svc.store.get_scan_metadata(&canonical_path(&path)).unwrap().is_some());
    }

    #[test]
    fn test_ignored_paths_are_not_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let ignored = dir.path().join("node_modules").join("dep.py");
        fs::create_dir_all(ignored.parent().unwrap()).unwrap();
        fs::write(&ignored, "import os\nos.getenv(\"X\")\n").unwrap();

        let svc = service(dir.path());
        svc.handle_change(&ignored);

        assert_eq!(svc.file_state(&ignored), Some(FileState::Ignored));
        assert_eq!(svc.store.node_count().unwrap(), 0);
    }

    #[test]
    fn test_failed_parse_keeps_previous_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        fs::write(&path, "apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n").unwrap();

        let svc = service(dir.path());
        svc.handle_change(&path);
        let nodes_before = svc.store.node_count().unwrap();
        assert!(nodes_before > 0);

        // Broken intermediate save
        fs::write(&path, "apiVersion: v1\nkind: [unclosed\n").unwrap();
        svc.handle_change(&path);

        assert_eq!(svc.file_state(&path), Some(FileState::Failed));
        assert_eq!(svc.store.node_count().unwrap(), nodes_before);
    }

    #[test]
    fn test_remove_deletes_records_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.py");
        fs::write(&path, "import os\nos.getenv(\"DB\")\n").unwrap();

        let svc = service(dir.path());
        svc.handle_change(&path);
        assert!(svc.store.node_count().unwrap() > 0);

        fs::remove_file(&path).unwrap();
        svc.handle_remove(&path);
        assert_eq!(svc.store.node_count().unwrap(), 0);
        assert!(svc.store.get_scan_metadata(&canonical_path(&path)).unwrap().is_none());
        assert!(svc.file_state(&path).is_none());
    }

    #[test]
    fn test_rename_moves_records() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.py");
        let new = dir.path().join("new.py");
        fs::write(&old, "import os\nos.getenv(\"DB\")\n").unwrap();

        let svc = service(dir.path());
        svc.handle_change(&old);

        fs::rename(&old, &new).unwrap();
        svc.handle_rename(&old, &new);

        assert!(svc.file_state(&old).is_none());
        assert_eq!(svc.file_state(&new), Some(FileState::Tracked));
        let graph = svc.store.load_graph().unwrap();
        assert!(graph.has_node(&crate::types::file_id(&canonical_path(&new))));
        assert!(!graph.has_node(&crate::types::file_id(&canonical_path(&old))));
    }

    #[test]
    fn test_burst_of_saves_yields_one_stitch() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app.py");
        let tf = dir.path().join("main.tf");
        fs::write(&app, "import os\nos.getenv(\"PAYMENT_DB_HOST\")\n").unwrap();
        fs::write(&tf, "output \"payment_db_host\" {\n  value = 1\n}\n").unwrap();

        let svc = service(dir.path());
        svc.handle_change(&app);
        svc.handle_change(&tf);

        assert!(svc.stitch_if_due());
        assert_eq!(svc.stitch_count(), 1);
        // Within the cooldown, even though dirty was cleared, nothing runs.
        svc.dirty.store(true, Ordering::SeqCst);
        assert!(!svc.stitch_if_due());
        assert_eq!(svc.stitch_count(), 1);

        let graph = svc.store.load_graph().unwrap();
        assert!(graph.has_edge(
            "infra:output.payment_db_host",
            "env:PAYMENT_DB_HOST",
            crate::types::RelationshipType::Provides,
        ));
    }

    #[test]
    fn test_incremental_delete_removes_only_that_providers_edge() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app.py");
        let tf = dir.path().join("main.tf");
        let k8s = dir.path().join("deploy.yaml");
        fs::write(&app, "import os\nos.getenv(\"PAYMENT_DB_HOST\")\n").unwrap();
        fs::write(&tf, "output \"payment_db_host\" {\n  value = 1\n}\n").unwrap();
        fs::write(
            &k8s,
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: app\nspec:\n  template:\n    spec:\n      containers:\n        - name: app\n          env:\n            - name: PAYMENT_DB_HOST\n",
        )
        .unwrap();

        let svc = service(dir.path());
        svc.handle_change(&app);
        svc.handle_change(&tf);
        svc.handle_change(&k8s);
        assert!(svc.stitch_if_due());
        let stitches_before = svc.stitch_count();

        let graph = svc.store.load_graph().unwrap();
        assert!(graph.has_edge(
            "infra:output.payment_db_host",
            "env:PAYMENT_DB_HOST",
            crate::types::RelationshipType::Provides,
        ));
        assert!(graph.has_edge(
            "infra:deployment.app",
            "env:PAYMENT_DB_HOST",
            crate::types::RelationshipType::Provides,
        ));

        // Delete the Terraform file; wait out the cooldown so the stitch runs.
        fs::remove_file(&tf).unwrap();
        svc.handle_remove(&tf);
        std::thread::sleep(STITCH_COOLDOWN + Duration::from_millis(50));
        assert!(svc.stitch_if_due());

        let graph = svc.store.load_graph().unwrap();
        assert!(!graph.has_node("infra:output.payment_db_host"));
        assert!(graph.has_edge(
            "infra:deployment.app",
            "env:PAYMENT_DB_HOST",
            crate::types::RelationshipType::Provides,
        ));
        assert_eq!(svc.stitch_count(), stitches_before + 1);
    }
}
