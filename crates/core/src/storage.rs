//! Durable graph store on SQLite.
//!
//! Three tables: nodes, edges, scan_metadata. WAL mode so readers see a
//! consistent snapshot while the single writer advances; per-file replacement
//! is one transaction so partial states are never visible.

use crate::error::StoreError;
use crate::graph::DependencyGraph;
use crate::types::{Edge, Metadata, Node, NodeType, ParseResult, RelationshipType, ScanMetadata};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) a store at the given path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        // Readers time out instead of blocking indefinitely on the writer.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = SqliteStore { conn: Arc::new(Mutex::new(conn)) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                path TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS edges (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                type TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 1.0,
                metadata TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (source_id, target_id, type)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS scan_metadata (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                node_count INTEGER NOT NULL,
                edge_count INTEGER NOT NULL,
                parsed_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id)", [])?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Batch writes (idempotent by primary key)
    // -----------------------------------------------------------------------

    pub fn upsert_nodes(&self, nodes: &[Node]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        insert_nodes(&tx, nodes)?;
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_edges(&self, edges: &[Edge]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        insert_edges(&tx, edges)?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Per-file lifecycle
    // -----------------------------------------------------------------------

    /// Atomically replace everything a file previously contributed with a
    /// fresh parse result. Readers see the old state or the new state, never
    /// a mix.
    pub fn replace_file(&self, result: &ParseResult) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        delete_file_records(&tx, &result.path)?;
        insert_nodes(&tx, &result.nodes)?;
        insert_edges(&tx, &result.edges)?;
        tx.execute(
            "INSERT OR REPLACE INTO scan_metadata (path, hash, node_count, edge_count, parsed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &result.path,
                &result.hash,
                result.nodes.len(),
                result.edges.len(),
                now_epoch(),
            ],
        )?;

        tx.commit()?;
        debug!(
            path = result.path.as_str(),
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            "Replaced file records"
        );
        Ok(())
    }

    /// Delete all nodes contributed by a file, cascading to every edge
    /// incident to those nodes.
    pub fn delete_nodes_by_file(&self, path: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let deleted = delete_file_records(&tx, path)?;
        tx.commit()?;
        Ok(deleted)
    }

    pub fn delete_scan_metadata(&self, path: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM scan_metadata WHERE path = ?1", params![path])?;
        Ok(())
    }

    pub fn save_scan_metadata(&self, meta: &ScanMetadata) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO scan_metadata (path, hash, node_count, edge_count, parsed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&meta.path, &meta.hash, meta.node_count, meta.edge_count, meta.parsed_at],
        )?;
        Ok(())
    }

    pub fn get_scan_metadata(&self, path: &str) -> Result<Option<ScanMetadata>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT path, hash, node_count, edge_count, parsed_at
                 FROM scan_metadata WHERE path = ?1",
                params![path],
                |row| {
                    Ok(ScanMetadata {
                        path: row.get(0)?,
                        hash: row.get(1)?,
                        node_count: row.get::<_, i64>(2)? as usize,
                        edge_count: row.get::<_, i64>(3)? as usize,
                        parsed_at: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn all_scan_metadata(&self) -> Result<Vec<ScanMetadata>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, hash, node_count, edge_count, parsed_at FROM scan_metadata ORDER BY path",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ScanMetadata {
                    path: row.get(0)?,
                    hash: row.get(1)?,
                    node_count: row.get::<_, i64>(2)? as usize,
                    edge_count: row.get::<_, i64>(3)? as usize,
                    parsed_at: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Stitched-edge maintenance
    // -----------------------------------------------------------------------

    /// Remove every edge the stitcher wrote. Used when suppression rules
    /// change so the next stitch starts from extractor truth.
    pub fn clear_stitched_edges(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM edges WHERE json_extract(metadata, '$.stitched') = 1",
            [],
        )?;
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Hydration
    // -----------------------------------------------------------------------

    /// Load the full graph snapshot. Edges referencing missing nodes are
    /// dropped here, which is what keeps the in-memory invariant that every
    /// edge connects two live nodes.
    pub fn load_graph(&self) -> Result<DependencyGraph, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut graph = DependencyGraph::new();

        let mut stmt =
            conn.prepare("SELECT id, name, type, path, metadata FROM nodes ORDER BY id")?;
        let nodes = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (id, name, type_str, path, meta_json) in nodes {
            let Some(node_type) = NodeType::parse(&type_str) else {
                debug!(id = id.as_str(), node_type = type_str.as_str(), "Skipping unknown node type");
                continue;
            };
            let metadata: Metadata = serde_json::from_str(&meta_json).unwrap_or_default();
            let mut node = Node::new(id, name, node_type);
            node.path = path;
            node.metadata = metadata;
            graph.add_node(node);
        }

        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, type, confidence, metadata
             FROM edges ORDER BY source_id, target_id, type",
        )?;
        let edges = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (source_id, target_id, type_str, confidence, meta_json) in edges {
            let Some(edge_type) = RelationshipType::parse(&type_str) else { continue };
            let metadata: Metadata = serde_json::from_str(&meta_json).unwrap_or_default();
            let mut edge = Edge::new(source_id, target_id, edge_type).with_confidence(confidence);
            edge.metadata = metadata;
            graph.add_edge(edge);
        }

        debug!(nodes = graph.node_count(), edges = graph.edge_count(), "Graph hydrated");
        Ok(graph)
    }

    pub fn node_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn edge_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Stable dump of all rows, for determinism checks and debugging.
    pub fn dump(&self) -> Result<String, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut out = String::new();

        let mut stmt =
            conn.prepare("SELECT id, name, type, path, metadata FROM nodes ORDER BY id")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let (id, name, ty, path, meta): (String, String, String, Option<String>, String) =
                (row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?);
            out.push_str(&format!("node|{id}|{name}|{ty}|{}|{meta}\n", path.unwrap_or_default()));
        }

        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, type, confidence, metadata
             FROM edges ORDER BY source_id, target_id, type",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let (s, t, ty, c, meta): (String, String, String, f64, String) =
                (row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?);
            out.push_str(&format!("edge|{s}|{t}|{ty}|{c}|{meta}\n"));
        }

        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

fn insert_nodes(tx: &rusqlite::Transaction<'_>, nodes: &[Node]) -> Result<(), StoreError> {
    let mut stmt = tx.prepare_cached(
        "INSERT OR REPLACE INTO nodes (id, name, type, path, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for node in nodes {
        stmt.execute(params![
            &node.id,
            &node.name,
            node.node_type.as_str(),
            &node.path,
            serde_json::to_string(&node.metadata)?,
        ])?;
    }
    Ok(())
}

fn insert_edges(tx: &rusqlite::Transaction<'_>, edges: &[Edge]) -> Result<(), StoreError> {
    let mut stmt = tx.prepare_cached(
        "INSERT OR REPLACE INTO edges (source_id, target_id, type, confidence, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for edge in edges {
        stmt.execute(params![
            &edge.source_id,
            &edge.target_id,
            edge.edge_type.as_str(),
            edge.confidence,
            serde_json::to_string(&edge.metadata)?,
        ])?;
    }
    Ok(())
}

/// Delete a file's nodes, edges incident to them, and its scan metadata.
fn delete_file_records(tx: &rusqlite::Transaction<'_>, path: &str) -> Result<usize, StoreError> {
    tx.execute(
        "DELETE FROM edges WHERE source_id IN (SELECT id FROM nodes WHERE path = ?1)
             OR target_id IN (SELECT id FROM nodes WHERE path = ?1)",
        params![path],
    )?;
    let deleted = tx.execute("DELETE FROM nodes WHERE path = ?1", params![path])?;
    tx.execute("DELETE FROM scan_metadata WHERE path = ?1", params![path])?;
    Ok(deleted)
}

fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
