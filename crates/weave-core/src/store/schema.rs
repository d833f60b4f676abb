//! SQLite Schema Definitions for the Graph Store
//!
//! One database holds every node, its tags and outgoing links, the weighted
//! edges between nodes, and an FTS5 index over titles and bodies.

/// Schema version written to `store_metadata` under the `version` key
pub const STORE_SCHEMA_VERSION: &str = "1.0";

/// SQL to create the nodes table
///
/// `seq` is the stable rowid the FTS index points at; `id` is the public key.
pub const SCHEMA_CREATE_NODES: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,

    title TEXT NOT NULL,
    content TEXT NOT NULL,
    word_count INTEGER NOT NULL DEFAULT 0,

    -- concept, technical, feature, ...
    node_type TEXT NOT NULL,
    -- draft, active, deprecated, archived
    status TEXT NOT NULL,

    -- Frontmatter as a JSON object
    frontmatter_json TEXT,

    -- RFC 3339
    modified_at TEXT NOT NULL
)
"#;

/// SQL to create the tag association table
pub const SCHEMA_CREATE_TAGS: &str = r#"
CREATE TABLE IF NOT EXISTS node_tags (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (node_id, tag)
)
"#;

/// SQL to create the outgoing link table
///
/// Targets are not foreign keys: a document may link to a node that does not
/// exist yet. Incoming links are never stored.
pub const SCHEMA_CREATE_LINKS: &str = r#"
CREATE TABLE IF NOT EXISTS node_links (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    target TEXT NOT NULL,
    kind TEXT NOT NULL,
    text TEXT,
    context TEXT,
    PRIMARY KEY (node_id, position)
)
"#;

/// SQL to create the edges table
pub const SCHEMA_CREATE_EDGES: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,

    source TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,

    -- link, reference, parent, related
    kind TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0 CHECK (weight >= 0),
    context TEXT,

    UNIQUE (source, target, kind)
)
"#;

/// SQL to create the metadata table
pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS store_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// SQL to create the full-text index and the triggers that keep it in sync
pub const SCHEMA_CREATE_FTS: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
    title, content,
    content='nodes',
    content_rowid='seq'
);

CREATE TRIGGER IF NOT EXISTS nodes_ai AFTER INSERT ON nodes BEGIN
    INSERT INTO nodes_fts(rowid, title, content)
    VALUES (NEW.seq, NEW.title, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS nodes_ad AFTER DELETE ON nodes BEGIN
    INSERT INTO nodes_fts(nodes_fts, rowid, title, content)
    VALUES ('delete', OLD.seq, OLD.title, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS nodes_au AFTER UPDATE OF title, content ON nodes BEGIN
    INSERT INTO nodes_fts(nodes_fts, rowid, title, content)
    VALUES ('delete', OLD.seq, OLD.title, OLD.content);
    INSERT INTO nodes_fts(rowid, title, content)
    VALUES (NEW.seq, NEW.title, NEW.content);
END;
"#;

/// SQL to create indexes for efficient queries
pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status);
CREATE INDEX IF NOT EXISTS idx_tags_tag ON node_tags(tag);
CREATE INDEX IF NOT EXISTS idx_links_target ON node_links(target);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
"#;

/// All schema statements in creation order
pub fn create_statements() -> [&'static str; 7] {
    [
        SCHEMA_CREATE_NODES,
        SCHEMA_CREATE_TAGS,
        SCHEMA_CREATE_LINKS,
        SCHEMA_CREATE_EDGES,
        SCHEMA_CREATE_METADATA,
        SCHEMA_CREATE_FTS,
        SCHEMA_CREATE_INDEXES,
    ]
}
