//! Knowledge Graph Model
//!
//! Node, link and edge types shared by the store, the in-memory manager and
//! the optimizer.
//!
//! Schema Version: 1.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Schema version constant
pub const GRAPH_SCHEMA_VERSION: &str = "1.0";

// ============================================================================
// Node Classification
// ============================================================================

/// Kind of knowledge a node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Concept,
    Technical,
    Feature,
    Primitive,
    Service,
    Guide,
    Standard,
    Integration,
}

impl NodeType {
    /// All node types, in declaration order
    pub const ALL: [NodeType; 8] = [
        NodeType::Concept,
        NodeType::Technical,
        NodeType::Feature,
        NodeType::Primitive,
        NodeType::Service,
        NodeType::Guide,
        NodeType::Standard,
        NodeType::Integration,
    ];

    /// Get the stored string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Concept => "concept",
            NodeType::Technical => "technical",
            NodeType::Feature => "feature",
            NodeType::Primitive => "primitive",
            NodeType::Service => "service",
            NodeType::Guide => "guide",
            NodeType::Standard => "standard",
            NodeType::Integration => "integration",
        }
    }

    /// Parse the stored string representation
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Editorial lifecycle of a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Draft,
    Active,
    Deprecated,
    Archived,
}

impl NodeStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [NodeStatus; 4] = [
        NodeStatus::Draft,
        NodeStatus::Active,
        NodeStatus::Deprecated,
        NodeStatus::Archived,
    ];

    /// Get the stored string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Draft => "draft",
            NodeStatus::Active => "active",
            NodeStatus::Deprecated => "deprecated",
            NodeStatus::Archived => "archived",
        }
    }

    /// Parse the stored string representation
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

// ============================================================================
// Links
// ============================================================================

/// How a link was expressed in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Direct `[[reference]]`
    Wikilink,
    /// Rendered markup reference `[text](target)`
    Markdown,
    /// Computed from another node's outgoing link
    Backlink,
}

impl LinkKind {
    /// Get the stored string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Wikilink => "wikilink",
            LinkKind::Markdown => "markdown",
            LinkKind::Backlink => "backlink",
        }
    }

    /// Parse the stored string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wikilink" => Some(LinkKind::Wikilink),
            "markdown" => Some(LinkKind::Markdown),
            "backlink" => Some(LinkKind::Backlink),
            _ => None,
        }
    }
}

/// A link from one node to another.
///
/// For incoming links `target` holds the id of the node the link comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink {
    pub target: String,
    pub kind: LinkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl NodeLink {
    /// Create a `[[wikilink]]` to `target`
    pub fn wikilink(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: LinkKind::Wikilink,
            text: None,
            context: None,
        }
    }

    /// Create a markdown link to `target` with display text
    pub fn markdown(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: LinkKind::Markdown,
            text: Some(text.into()),
            context: None,
        }
    }

    /// Create a computed backlink pointing at `source`
    pub fn backlink(source: impl Into<String>, context: Option<String>) -> Self {
        Self {
            target: source.into(),
            kind: LinkKind::Backlink,
            text: None,
            context,
        }
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// A knowledge document in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    /// Stable identifier
    pub id: String,
    /// Storage path, unique across nodes
    pub path: String,
    /// File name component of `path`
    pub filename: String,

    pub title: String,
    pub content: String,
    pub word_count: usize,

    pub node_type: NodeType,
    pub status: NodeStatus,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Arbitrary frontmatter key/value pairs
    #[serde(default)]
    pub frontmatter: BTreeMap<String, serde_json::Value>,

    /// Links this node makes, in document order
    #[serde(default)]
    pub outgoing_links: Vec<NodeLink>,

    /// Links other nodes make to this one. Derived; the store recomputes it on read.
    #[serde(default)]
    pub incoming_links: Vec<NodeLink>,

    pub modified_at: DateTime<Utc>,
}

impl KnowledgeNode {
    /// Create an empty concept node in draft status.
    pub fn new(id: impl Into<String>, path: impl Into<String>, title: impl Into<String>) -> Self {
        let path = path.into();
        let filename = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path.as_str())
            .to_string();
        Self {
            id: id.into(),
            path,
            filename,
            title: title.into(),
            content: String::new(),
            word_count: 0,
            node_type: NodeType::Concept,
            status: NodeStatus::default(),
            tags: BTreeSet::new(),
            frontmatter: BTreeMap::new(),
            outgoing_links: Vec::new(),
            incoming_links: Vec::new(),
            modified_at: Utc::now(),
        }
    }

    /// Replace the body and recompute the word count
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self.word_count = count_words(&self.content);
        self
    }

    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_link(mut self, link: NodeLink) -> Self {
        self.outgoing_links.push(link);
        self
    }

    pub fn with_frontmatter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.frontmatter.insert(key.into(), value);
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Count whitespace-separated words
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

// ============================================================================
// Edges
// ============================================================================

/// Relationship type between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Link,
    Reference,
    Parent,
    Related,
}

impl EdgeKind {
    /// Get the stored string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Link => "link",
            EdgeKind::Reference => "reference",
            EdgeKind::Parent => "parent",
            EdgeKind::Related => "related",
        }
    }

    /// Parse the stored string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "link" => Some(EdgeKind::Link),
            "reference" => Some(EdgeKind::Reference),
            "parent" => Some(EdgeKind::Parent),
            "related" => Some(EdgeKind::Related),
            _ => None,
        }
    }
}

/// Default edge weight
pub const DEFAULT_EDGE_WEIGHT: f64 = 1.0;

fn default_weight() -> f64 {
    DEFAULT_EDGE_WEIGHT
}

/// A directed, weighted relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl GraphEdge {
    /// Create an edge with the default weight
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            weight: DEFAULT_EDGE_WEIGHT,
            context: None,
        }
    }

    /// Create a plain `link` edge
    pub fn link(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, target, EdgeKind::Link)
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Weight is finite and non-negative
    pub fn has_valid_weight(&self) -> bool {
        self.weight.is_finite() && self.weight >= 0.0
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Every node and edge of a graph at one point in time.
///
/// Used to rebuild the in-memory manager from the store and as the JSON
/// export format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: String,
    pub nodes: Vec<KnowledgeNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphSnapshot {
    pub fn new(nodes: Vec<KnowledgeNode>, edges: Vec<GraphEdge>) -> Self {
        Self {
            version: GRAPH_SCHEMA_VERSION.to_string(),
            nodes,
            edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_roundtrip_strings() {
        for t in NodeType::ALL {
            assert_eq!(NodeType::parse(t.as_str()), Some(t));
        }
        assert_eq!(NodeType::parse("unknown"), None);
    }

    #[test]
    fn test_node_status_roundtrip_strings() {
        for s in NodeStatus::ALL {
            assert_eq!(NodeStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(NodeStatus::default(), NodeStatus::Draft);
    }

    #[test]
    fn test_new_node_derives_filename() {
        let node = KnowledgeNode::new("n1", "concepts/graph/weave.md", "Weave");
        assert_eq!(node.filename, "weave.md");

        let flat = KnowledgeNode::new("n2", "index.md", "Index");
        assert_eq!(flat.filename, "index.md");
    }

    #[test]
    fn test_with_content_counts_words() {
        let node = KnowledgeNode::new("n1", "a.md", "A").with_content("one two\nthree  four");
        assert_eq!(node.word_count, 4);
    }

    #[test]
    fn test_edge_weight_validation() {
        assert!(GraphEdge::link("a", "b").has_valid_weight());
        assert!(GraphEdge::link("a", "b").with_weight(0.0).has_valid_weight());
        assert!(!GraphEdge::link("a", "b").with_weight(-1.0).has_valid_weight());
        assert!(!GraphEdge::link("a", "b").with_weight(f64::NAN).has_valid_weight());
    }

    #[test]
    fn test_edge_default_weight_on_deserialize() {
        let edge: GraphEdge =
            serde_json::from_str(r#"{"source":"a","target":"b","kind":"related"}"#).unwrap();
        assert_eq!(edge.weight, DEFAULT_EDGE_WEIGHT);
        assert_eq!(edge.kind, EdgeKind::Related);
    }

    #[test]
    fn test_node_serializes_lowercase_enums() {
        let node = KnowledgeNode::new("n1", "a.md", "A")
            .with_type(NodeType::Guide)
            .with_status(NodeStatus::Active);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["node_type"], "guide");
        assert_eq!(json["status"], "active");
    }
}
