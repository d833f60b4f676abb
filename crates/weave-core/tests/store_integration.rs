//! On-disk store integration tests for weave-core.
//!
//! These tests exercise the SQLite store against real files:
//! - Create, close and reopen with data intact
//! - Schema version checks on open
//! - Engine bootstrap from an existing database
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package weave-core --test store_integration
//! ```

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use weave_config::WeaveConfig;
use weave_core::{
    EdgeKind, GraphEdge, GraphStore, KnowledgeEngine, KnowledgeNode, NodeLink, NodeType,
    StoreError, STORE_SCHEMA_VERSION,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn create_test_node(id: &str) -> KnowledgeNode {
    KnowledgeNode::new(id, format!("notes/{id}.md"), format!("Note {id}"))
        .with_content(format!("Body text for {id}"))
}

fn populate(store: &GraphStore) {
    store
        .upsert_node(
            &create_test_node("index")
                .with_type(NodeType::Guide)
                .with_tags(["hub"])
                .with_link(NodeLink::wikilink("rust")),
        )
        .unwrap();
    store
        .upsert_node(&create_test_node("rust").with_content("Ownership and borrowing"))
        .unwrap();
    store
        .add_edge(&GraphEdge::link("index", "rust").with_context("see also"))
        .unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_create_close_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("graph.db");

    {
        let store = GraphStore::create(&db_path).unwrap();
        populate(&store);
        assert_eq!(store.path(), Some(db_path.as_path()));
    }

    let store = GraphStore::open(&db_path).unwrap();
    assert_eq!(store.node_count().unwrap(), 2);
    assert_eq!(store.edge_count().unwrap(), 1);

    let index = store.get_node("index").unwrap().unwrap();
    assert_eq!(index.node_type, NodeType::Guide);
    assert!(index.has_tag("hub"));

    let rust = store.get_node("rust").unwrap().unwrap();
    assert_eq!(rust.incoming_links.len(), 1);
    assert_eq!(rust.incoming_links[0].target, "index");

    let hits = store.search_nodes("borrowing", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "rust");
}

#[test]
fn test_open_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = GraphStore::open(&temp_dir.path().join("absent.db"));
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[test]
fn test_open_or_create() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("graph.db");

    {
        let store = GraphStore::open_or_create(&db_path).unwrap();
        populate(&store);
    }
    let store = GraphStore::open_or_create(&db_path).unwrap();
    assert_eq!(store.node_count().unwrap(), 2);
}

#[test]
fn test_version_mismatch_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("graph.db");

    {
        let store = GraphStore::create(&db_path).unwrap();
        assert_eq!(
            store.get_metadata("version").unwrap().as_deref(),
            Some(STORE_SCHEMA_VERSION)
        );
        store.set_metadata("version", "0.1").unwrap();
    }

    match GraphStore::open(&db_path) {
        Err(StoreError::SchemaVersionMismatch { expected, found }) => {
            assert_eq!(expected, STORE_SCHEMA_VERSION);
            assert_eq!(found, "0.1");
        }
        other => panic!("expected version mismatch, got {other:?}"),
    }
}

#[test]
fn test_foreign_database_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("other.db");
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute("CREATE TABLE unrelated (x INTEGER)", []).unwrap();
    }

    match GraphStore::open(&db_path) {
        Err(StoreError::SchemaVersionMismatch { found, .. }) => assert_eq!(found, "none"),
        other => panic!("expected version mismatch, got {other:?}"),
    }

    // The refused file keeps its journal mode
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "delete");
    assert!(!temp_dir.path().join("other.db-wal").exists());
}

#[test]
fn test_delete_persists() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("graph.db");

    {
        let store = GraphStore::create(&db_path).unwrap();
        populate(&store);
        assert!(store.delete_node("rust").unwrap());
    }

    let store = GraphStore::open(&db_path).unwrap();
    assert_eq!(store.node_count().unwrap(), 1);
    assert_eq!(store.edge_count().unwrap(), 0);
    assert!(store.get_outgoing_edges("index").unwrap().is_empty());
    assert!(store.search_nodes("borrowing", 10).unwrap().is_empty());
}

// ============================================================================
// Engine
// ============================================================================

#[test]
fn test_engine_opens_under_data_dir() {
    let temp_dir = TempDir::new().unwrap();
    let config = WeaveConfig::default();

    {
        let engine = KnowledgeEngine::open(temp_dir.path(), &config).unwrap();
        engine.upsert_node(create_test_node("a")).unwrap();
        engine.upsert_node(create_test_node("b")).unwrap();
        engine
            .add_edge(&GraphEdge::new("a", "b", EdgeKind::Reference).with_weight(2.0))
            .unwrap();
    }

    assert!(config.database_path(temp_dir.path()).exists());

    let engine = KnowledgeEngine::open(temp_dir.path(), &config).unwrap();
    let graph = engine.graph();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    let edges = graph.outgoing_edges("a");
    assert_eq!(edges[0].kind, EdgeKind::Reference);
    assert_eq!(edges[0].weight, 2.0);
}
