//! Persistent Graph Store
//!
//! SQLite-backed storage for knowledge nodes, their tags and links, weighted
//! edges, and a full-text index over titles and bodies.
//!
//! # Layout
//!
//! ```text
//! nodes ──┬── node_tags     (tag associations)
//!         ├── node_links    (outgoing links, in document order)
//!         ├── edges         (weighted, kind-typed, both endpoints must exist)
//!         └── nodes_fts     (FTS5 external-content index, kept in sync by triggers)
//! store_metadata            (version)
//! ```
//!
//! All mutations are serialized through one connection mutex and every
//! multi-step mutation runs in a single transaction. Incoming links are never
//! written; they are derived from other nodes' outgoing links on every read.

pub mod schema;
pub mod search;

use crate::error::StoreError;
use crate::graph::{
    count_words, EdgeKind, GraphEdge, GraphSnapshot, KnowledgeNode, LinkKind, NodeLink,
    NodeStatus, NodeType,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OptionalExtension, Params, Result as SqliteResult, Row, Transaction,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub use schema::STORE_SCHEMA_VERSION;
pub use search::sanitize_fts_query;

/// Busy timeout applied to every connection unless overridden
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Number of entries reported in [`GraphStats::most_connected`]
const MOST_CONNECTED_LIMIT: usize = 10;

const NODE_COLUMNS: &str = "n.id, n.path, n.filename, n.title, n.content, n.word_count, \
     n.node_type, n.status, n.frontmatter_json, n.modified_at";

/// A node with its total edge count, as reported by [`GraphStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedNode {
    pub id: String,
    pub title: String,
    pub degree: usize,
}

/// Aggregate counts over the whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub nodes_by_type: BTreeMap<NodeType, usize>,
    pub nodes_by_status: BTreeMap<NodeStatus, usize>,
    /// Nodes with no incoming and no outgoing edges
    pub orphan_count: usize,
    /// Edges divided by nodes; 0 for an empty store
    pub avg_links_per_node: f64,
    /// Highest total degree first, ties by id
    pub most_connected: Vec<ConnectedNode>,
}

/// SQLite-backed knowledge graph store
pub struct GraphStore {
    conn: Mutex<Connection>,
    /// Database file, `None` for in-memory stores
    path: Option<PathBuf>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").field("path", &self.path).finish()
    }
}

impl GraphStore {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open an existing store.
    ///
    /// Fails with [`StoreError::NotFound`] if the file does not exist and with
    /// [`StoreError::SchemaVersionMismatch`] if it was written by an
    /// incompatible version.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }

        let conn = Connection::open(path)?;
        // Version first: a refused file must be left exactly as found
        Self::check_version(&conn)
            .inspect_err(|e| warn!("Refusing to open {}: {}", path.display(), e))?;
        Self::configure_connection(&conn)?;

        info!("Opened graph store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Create a new store, creating parent directories as needed
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::initialize(&conn)?;

        info!("Created graph store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the store at `path`, creating it if it does not exist
    pub fn open_or_create(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;
        Self::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Configure connection with optimal settings
    fn configure_connection(conn: &Connection) -> SqliteResult<()> {
        // WAL lets readers proceed while a write is in flight
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Negative value = KB
        conn.pragma_update(None, "cache_size", -16000)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Ok(())
    }

    /// Create the schema and stamp the version
    fn initialize(conn: &Connection) -> Result<(), StoreError> {
        for sql in schema::create_statements() {
            conn.execute_batch(sql)?;
        }

        match Self::read_metadata(conn, "version")? {
            None => Self::write_metadata(conn, "version", STORE_SCHEMA_VERSION),
            Some(found) if found == STORE_SCHEMA_VERSION => Ok(()),
            Some(found) => Err(StoreError::SchemaVersionMismatch {
                expected: STORE_SCHEMA_VERSION.to_string(),
                found,
            }),
        }
    }

    fn check_version(conn: &Connection) -> Result<(), StoreError> {
        let has_metadata: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'store_metadata')",
            [],
            |row| row.get(0),
        )?;
        let found = if has_metadata {
            Self::read_metadata(conn, "version")?
        } else {
            None
        };

        match found {
            Some(v) if v == STORE_SCHEMA_VERSION => Ok(()),
            other => Err(StoreError::SchemaVersionMismatch {
                expected: STORE_SCHEMA_VERSION.to_string(),
                found: other.unwrap_or_else(|| "none".to_string()),
            }),
        }
    }

    /// Run `f` inside one transaction, committing only if it succeeds
    fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Change how long a statement waits on a locked database
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
        self.conn.lock().busy_timeout(timeout)?;
        Ok(())
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // =========================================================================
    // Metadata Operations
    // =========================================================================

    /// Get a metadata value
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::read_metadata(&self.conn.lock(), key)
    }

    /// Set a metadata value
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        logged("set_metadata", Self::write_metadata(&self.conn.lock(), key, value))
    }

    fn read_metadata(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
        let value = conn
            .query_row(
                "SELECT value FROM store_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_metadata(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO store_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // =========================================================================
    // Node Operations
    // =========================================================================

    /// Insert a node, or replace the stored node with the same id.
    ///
    /// Tags and outgoing links are rewritten; edges touching the node are kept.
    pub fn upsert_node(&self, node: &KnowledgeNode) -> Result<(), StoreError> {
        let result = self.with_transaction(|tx| Self::write_node(tx, node));
        debug!("Upserted node {}", node.id);
        logged("upsert_node", result)
    }

    /// Upsert several nodes in one transaction; nothing is written if any fails
    pub fn upsert_nodes(&self, nodes: &[KnowledgeNode]) -> Result<(), StoreError> {
        let result = self.with_transaction(|tx| {
            nodes.iter().try_for_each(|node| Self::write_node(tx, node))
        });
        debug!("Upserted {} nodes", nodes.len());
        logged("upsert_nodes", result)
    }

    fn validate_node(node: &KnowledgeNode) -> Result<(), StoreError> {
        if node.id.is_empty() {
            return Err(StoreError::Validation("node id is empty".to_string()));
        }
        if node.id.chars().any(char::is_control) {
            return Err(StoreError::Validation(format!(
                "node id {:?} contains control characters",
                node.id
            )));
        }
        if node.path.is_empty() {
            return Err(StoreError::Validation(format!("node {} has an empty path", node.id)));
        }
        Ok(())
    }

    fn write_node(conn: &Connection, node: &KnowledgeNode) -> Result<(), StoreError> {
        Self::validate_node(node)?;

        let owner: Option<String> = conn
            .query_row(
                "SELECT id FROM nodes WHERE path = ?1 AND id != ?2",
                params![node.path, node.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(owner) = owner {
            return Err(StoreError::Validation(format!(
                "path {} already belongs to node {}",
                node.path, owner
            )));
        }

        let frontmatter_json = if node.frontmatter.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&node.frontmatter)?)
        };

        conn.execute(
            "INSERT INTO nodes (id, path, filename, title, content, word_count, node_type, status,
                                frontmatter_json, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                filename = excluded.filename,
                title = excluded.title,
                content = excluded.content,
                word_count = excluded.word_count,
                node_type = excluded.node_type,
                status = excluded.status,
                frontmatter_json = excluded.frontmatter_json,
                modified_at = excluded.modified_at",
            params![
                node.id,
                node.path,
                node.filename,
                node.title,
                node.content,
                count_words(&node.content) as i64,
                node.node_type.as_str(),
                node.status.as_str(),
                frontmatter_json,
                node.modified_at.to_rfc3339(),
            ],
        )?;

        conn.execute("DELETE FROM node_tags WHERE node_id = ?1", [&node.id])?;
        let mut tag_stmt =
            conn.prepare_cached("INSERT INTO node_tags (node_id, tag) VALUES (?1, ?2)")?;
        for tag in &node.tags {
            tag_stmt.execute(params![node.id, tag])?;
        }

        conn.execute("DELETE FROM node_links WHERE node_id = ?1", [&node.id])?;
        let mut link_stmt = conn.prepare_cached(
            "INSERT INTO node_links (node_id, position, target, kind, text, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        // Backlinks are derived on read, never stored
        let stored = node
            .outgoing_links
            .iter()
            .filter(|link| link.kind != LinkKind::Backlink);
        for (position, link) in stored.enumerate() {
            link_stmt.execute(params![
                node.id,
                position as i64,
                link.target,
                link.kind.as_str(),
                link.text,
                link.context,
            ])?;
        }

        Ok(())
    }

    /// Get a node by id, with tags and links attached
    pub fn get_node(&self, id: &str) -> Result<Option<KnowledgeNode>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.id = ?1");
        Ok(Self::query_nodes(&conn, &sql, [id])?.into_iter().next())
    }

    /// Get a node by its storage path
    pub fn get_node_by_path(&self, path: &str) -> Result<Option<KnowledgeNode>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.path = ?1");
        Ok(Self::query_nodes(&conn, &sql, [path])?.into_iter().next())
    }

    /// All nodes, ordered by id
    pub fn get_all_nodes(&self) -> Result<Vec<KnowledgeNode>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes n ORDER BY n.id");
        Self::query_nodes(&conn, &sql, [])
    }

    pub fn get_nodes_by_type(&self, node_type: NodeType) -> Result<Vec<KnowledgeNode>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.node_type = ?1 ORDER BY n.id");
        Self::query_nodes(&conn, &sql, [node_type.as_str()])
    }

    pub fn get_nodes_by_status(
        &self,
        status: NodeStatus,
    ) -> Result<Vec<KnowledgeNode>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.status = ?1 ORDER BY n.id");
        Self::query_nodes(&conn, &sql, [status.as_str()])
    }

    pub fn get_nodes_by_tag(&self, tag: &str) -> Result<Vec<KnowledgeNode>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes n
             JOIN node_tags t ON t.node_id = n.id
             WHERE t.tag = ?1 ORDER BY n.id"
        );
        Self::query_nodes(&conn, &sql, [tag])
    }

    /// Full-text search over titles and bodies, best match first.
    ///
    /// The query is sanitized with [`sanitize_fts_query`]; input with no
    /// searchable words, or a `limit` of 0, yields an empty result.
    pub fn search_nodes(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeNode>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(fts_query) = sanitize_fts_query(query) else {
            debug!("Search query {:?} has no searchable terms", query);
            return Ok(Vec::new());
        };

        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes_fts
             JOIN nodes n ON n.seq = nodes_fts.rowid
             WHERE nodes_fts MATCH ?1
             ORDER BY bm25(nodes_fts), n.id
             LIMIT ?2"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Self::query_nodes(&conn, &sql, params![fts_query, limit])
    }

    /// Delete a node together with its edges, tags and links.
    ///
    /// Returns whether the node existed.
    pub fn delete_node(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.with_transaction(|tx| {
            let edges = tx.execute("DELETE FROM edges WHERE source = ?1 OR target = ?1", [id])?;
            tx.execute("DELETE FROM node_tags WHERE node_id = ?1", [id])?;
            tx.execute("DELETE FROM node_links WHERE node_id = ?1", [id])?;
            let removed = tx.execute("DELETE FROM nodes WHERE id = ?1", [id])?;
            debug!("Deleted node {} ({} edges)", id, edges);
            Ok(removed > 0)
        });
        logged("delete_node", result)
    }

    pub fn node_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn query_nodes<P: Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<KnowledgeNode>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::row_to_node)?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut nodes = Vec::with_capacity(rows.len());
        for mut node in rows {
            Self::attach_relations(conn, &mut node)?;
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Load tags, outgoing links and derived backlinks into `node`
    fn attach_relations(conn: &Connection, node: &mut KnowledgeNode) -> Result<(), StoreError> {
        let mut stmt =
            conn.prepare_cached("SELECT tag FROM node_tags WHERE node_id = ?1 ORDER BY tag")?;
        node.tags = stmt
            .query_map([&node.id], |row| row.get(0))?
            .collect::<SqliteResult<BTreeSet<String>>>()?;

        let mut stmt = conn.prepare_cached(
            "SELECT target, kind, text, context FROM node_links
             WHERE node_id = ?1 ORDER BY position",
        )?;
        node.outgoing_links = stmt
            .query_map([&node.id], |row| {
                let kind: String = row.get(1)?;
                Ok(NodeLink {
                    target: row.get(0)?,
                    kind: LinkKind::parse(&kind)
                        .ok_or_else(|| conversion_error(1, format!("unknown link kind {kind}")))?,
                    text: row.get(2)?,
                    context: row.get(3)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        // One backlink per referencing node, carrying the context of its first link
        let mut stmt = conn.prepare_cached(
            "SELECT node_id, context, MIN(position) FROM node_links
             WHERE target = ?1 GROUP BY node_id ORDER BY node_id",
        )?;
        node.incoming_links = stmt
            .query_map([&node.id], |row| {
                Ok(NodeLink::backlink(row.get::<_, String>(0)?, row.get(1)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(())
    }

    fn row_to_node(row: &Row<'_>) -> SqliteResult<KnowledgeNode> {
        let word_count: i64 = row.get(5)?;
        let node_type: String = row.get(6)?;
        let status: String = row.get(7)?;
        let frontmatter_json: Option<String> = row.get(8)?;
        let modified_at: String = row.get(9)?;

        let frontmatter = match frontmatter_json {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e))
            })?,
            None => BTreeMap::new(),
        };
        let modified_at = DateTime::parse_from_rfc3339(&modified_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

        Ok(KnowledgeNode {
            id: row.get(0)?,
            path: row.get(1)?,
            filename: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            word_count: word_count.max(0) as usize,
            node_type: NodeType::parse(&node_type)
                .ok_or_else(|| conversion_error(6, format!("unknown node type {node_type}")))?,
            status: NodeStatus::parse(&status)
                .ok_or_else(|| conversion_error(7, format!("unknown node status {status}")))?,
            tags: BTreeSet::new(),
            frontmatter,
            outgoing_links: Vec::new(),
            incoming_links: Vec::new(),
            modified_at,
        })
    }

    // =========================================================================
    // Edge Operations
    // =========================================================================

    /// Add an edge between two stored nodes.
    ///
    /// Re-adding the same `(source, target, kind)` updates weight and context.
    pub fn add_edge(&self, edge: &GraphEdge) -> Result<(), StoreError> {
        if !edge.has_valid_weight() {
            return Err(StoreError::Validation(format!(
                "edge {} -> {} has invalid weight {}",
                edge.source, edge.target, edge.weight
            )));
        }

        let result = self.with_transaction(|tx| {
            for endpoint in [&edge.source, &edge.target] {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM nodes WHERE id = ?1)",
                    [endpoint],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(StoreError::NotFound(format!("node {endpoint}")));
                }
            }
            tx.execute(
                "INSERT INTO edges (source, target, kind, weight, context)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(source, target, kind) DO UPDATE SET
                    weight = excluded.weight,
                    context = excluded.context",
                params![
                    edge.source,
                    edge.target,
                    edge.kind.as_str(),
                    edge.weight,
                    edge.context
                ],
            )?;
            Ok(())
        });
        debug!("Added edge {} -> {} ({})", edge.source, edge.target, edge.kind.as_str());
        logged("add_edge", result)
    }

    pub fn get_outgoing_edges(&self, id: &str) -> Result<Vec<GraphEdge>, StoreError> {
        Self::query_edges(
            &self.conn.lock(),
            "SELECT source, target, kind, weight, context FROM edges
             WHERE source = ?1 ORDER BY target, kind",
            [id],
        )
    }

    pub fn get_incoming_edges(&self, id: &str) -> Result<Vec<GraphEdge>, StoreError> {
        Self::query_edges(
            &self.conn.lock(),
            "SELECT source, target, kind, weight, context FROM edges
             WHERE target = ?1 ORDER BY source, kind",
            [id],
        )
    }

    /// All edges, ordered by source, target, kind
    pub fn get_all_edges(&self) -> Result<Vec<GraphEdge>, StoreError> {
        Self::query_edges(
            &self.conn.lock(),
            "SELECT source, target, kind, weight, context FROM edges
             ORDER BY source, target, kind",
            [],
        )
    }

    /// Delete every edge touching a node; returns the number removed
    pub fn delete_node_edges(&self, id: &str) -> Result<usize, StoreError> {
        let result = self
            .conn
            .lock()
            .execute("DELETE FROM edges WHERE source = ?1 OR target = ?1", [id])
            .map_err(StoreError::from);
        logged("delete_node_edges", result)
    }

    pub fn edge_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn query_edges<P: Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<GraphEdge>, StoreError> {
        let mut stmt = conn.prepare_cached(sql)?;
        let edges = stmt
            .query_map(params, Self::row_to_edge)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(edges)
    }

    fn row_to_edge(row: &Row<'_>) -> SqliteResult<GraphEdge> {
        let kind: String = row.get(2)?;
        Ok(GraphEdge {
            source: row.get(0)?,
            target: row.get(1)?,
            kind: EdgeKind::parse(&kind)
                .ok_or_else(|| conversion_error(2, format!("unknown edge kind {kind}")))?,
            weight: row.get(3)?,
            context: row.get(4)?,
        })
    }

    // =========================================================================
    // Whole-graph Operations
    // =========================================================================

    /// Every node and edge, read in one transaction
    pub fn snapshot(&self) -> Result<GraphSnapshot, StoreError> {
        self.with_transaction(|tx| {
            let sql = format!("SELECT {NODE_COLUMNS} FROM nodes n ORDER BY n.id");
            let nodes = Self::query_nodes(tx, &sql, [])?;
            let edges = Self::query_edges(
                tx,
                "SELECT source, target, kind, weight, context FROM edges
                 ORDER BY source, target, kind",
                [],
            )?;
            Ok(GraphSnapshot::new(nodes, edges))
        })
    }

    /// Aggregate counts over the store
    pub fn stats(&self) -> Result<GraphStats, StoreError> {
        let conn = self.conn.lock();

        let total_nodes: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        let total_edges: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;

        let mut nodes_by_type = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT node_type, COUNT(*) FROM nodes GROUP BY node_type")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (name, count) = row?;
            if let Some(node_type) = NodeType::parse(&name) {
                nodes_by_type.insert(node_type, count as usize);
            }
        }

        let mut nodes_by_status = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM nodes GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (name, count) = row?;
            if let Some(status) = NodeStatus::parse(&name) {
                nodes_by_status.insert(status, count as usize);
            }
        }

        let orphan_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes n
             WHERE NOT EXISTS (SELECT 1 FROM edges e WHERE e.source = n.id OR e.target = n.id)",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, title, degree FROM (
                SELECT n.id AS id, n.title AS title,
                       (SELECT COUNT(*) FROM edges e WHERE e.source = n.id)
                     + (SELECT COUNT(*) FROM edges e WHERE e.target = n.id) AS degree
                FROM nodes n
             )
             WHERE degree > 0
             ORDER BY degree DESC, id ASC
             LIMIT ?1",
        )?;
        let most_connected = stmt
            .query_map([MOST_CONNECTED_LIMIT as i64], |row| {
                Ok(ConnectedNode {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    degree: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let avg_links_per_node = if total_nodes == 0 {
            0.0
        } else {
            total_edges as f64 / total_nodes as f64
        };

        Ok(GraphStats {
            total_nodes: total_nodes as usize,
            total_edges: total_edges as usize,
            nodes_by_type,
            nodes_by_status,
            orphan_count: orphan_count as usize,
            avg_links_per_node,
            most_connected,
        })
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

/// Log storage faults before handing them back unchanged
fn logged<T>(operation: &str, result: Result<T, StoreError>) -> Result<T, StoreError> {
    if let Err(ref err) = result {
        if err.is_fatal() {
            error!("{} failed: {}", operation, err);
        } else if err.is_transient() {
            warn!("{} hit a locked database: {}", operation, err);
        } else {
            debug!("{} failed: {}", operation, err);
        }
    }
    result
}
