//! In-Memory Graph Manager
//!
//! An indexed adjacency structure over the knowledge graph, built from store
//! snapshots. Nodes and edges live in a `petgraph::StableGraph` and are
//! addressed by stable indices; an id map and a tag index sit beside it.
//!
//! [`SharedGraph`] publishes immutable manager snapshots behind an `Arc`, so
//! readers never observe a half-applied rebuild.

use crate::error::StoreError;
use crate::graph::{EdgeKind, GraphEdge, GraphSnapshot, KnowledgeNode, GRAPH_SCHEMA_VERSION};
use crate::store::GraphStore;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Edge payload stored in the graph
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeData {
    pub kind: EdgeKind,
    pub weight: f64,
    pub context: Option<String>,
}

impl From<&GraphEdge> for EdgeData {
    fn from(edge: &GraphEdge) -> Self {
        Self {
            kind: edge.kind,
            weight: edge.weight,
            context: edge.context.clone(),
        }
    }
}

/// Knowledge graph held in memory for traversal and ranking.
#[derive(Debug, Clone, Default)]
pub struct GraphManager {
    graph: StableGraph<KnowledgeNode, EdgeData>,

    /// Map from node id to graph index for O(1) lookup
    node_index_map: HashMap<String, NodeIndex>,

    /// tag -> ids of nodes carrying it
    tag_index: HashMap<String, BTreeSet<String>>,
}

impl GraphManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager holding every node and edge of a snapshot
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut manager = Self::new();
        for node in snapshot.nodes {
            manager.add_node(node);
        }
        let mut skipped = 0;
        for edge in &snapshot.edges {
            if !manager.add_edge(edge) {
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!("Skipped {} edges with unknown endpoints", skipped);
        }
        manager
    }

    /// Full rebuild from the persistent store
    pub fn from_store(store: &GraphStore) -> Result<Self, StoreError> {
        let manager = Self::from_snapshot(store.snapshot()?);
        info!(
            "Loaded graph with {} nodes and {} edges",
            manager.node_count(),
            manager.edge_count()
        );
        Ok(manager)
    }

    // ------------------------------------------------------------------------
    // Node Operations
    // ------------------------------------------------------------------------

    /// Add a node, or replace the node with the same id in place.
    ///
    /// Edges of a replaced node are kept. Returns `true` if the node is new.
    pub fn add_node(&mut self, node: KnowledgeNode) -> bool {
        if self.node_index_map.contains_key(&node.id) {
            self.update_node(node);
            return false;
        }

        self.index_tags(&node);
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.node_index_map.insert(id, idx);
        true
    }

    /// Replace an existing node's data. Missing ids are a no-op returning `false`.
    pub fn update_node(&mut self, node: KnowledgeNode) -> bool {
        let Some(&idx) = self.node_index_map.get(&node.id) else {
            return false;
        };
        if let Some(old) = self.graph.node_weight(idx).cloned() {
            self.unindex_tags(&old);
        }
        self.index_tags(&node);
        if let Some(slot) = self.graph.node_weight_mut(idx) {
            *slot = node;
        }
        true
    }

    /// Remove a node and all its incident edges
    pub fn remove_node(&mut self, id: &str) -> Option<KnowledgeNode> {
        let idx = self.node_index_map.remove(id)?;
        let node = self.graph.remove_node(idx)?;
        self.unindex_tags(&node);
        Some(node)
    }

    pub fn get_node(&self, id: &str) -> Option<&KnowledgeNode> {
        self.node_index_map
            .get(id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_index_map.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// All nodes, ordered by id
    pub fn nodes(&self) -> Vec<&KnowledgeNode> {
        let mut nodes: Vec<&KnowledgeNode> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Nodes carrying `tag`, ordered by id
    pub fn nodes_by_tag(&self, tag: &str) -> Vec<&KnowledgeNode> {
        self.tag_index
            .get(tag)
            .map(|ids| ids.iter().filter_map(|id| self.get_node(id)).collect())
            .unwrap_or_default()
    }

    fn index_tags(&mut self, node: &KnowledgeNode) {
        for tag in &node.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(node.id.clone());
        }
    }

    fn unindex_tags(&mut self, node: &KnowledgeNode) {
        for tag in &node.tags {
            if let Some(ids) = self.tag_index.get_mut(tag) {
                ids.remove(&node.id);
                if ids.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Edge Operations
    // ------------------------------------------------------------------------

    /// Add an edge between two held nodes.
    ///
    /// An edge with the same source, target and kind is updated in place.
    /// Returns `false` (and changes nothing) if either endpoint is unknown.
    pub fn add_edge(&mut self, edge: &GraphEdge) -> bool {
        let (Some(&source), Some(&target)) = (
            self.node_index_map.get(&edge.source),
            self.node_index_map.get(&edge.target),
        ) else {
            debug!(
                "Ignoring edge {} -> {} with unknown endpoint",
                edge.source, edge.target
            );
            return false;
        };

        let existing = self
            .graph
            .edges_connecting(source, target)
            .find(|e| e.weight().kind == edge.kind)
            .map(|e| e.id());
        match existing {
            Some(id) => {
                if let Some(data) = self.graph.edge_weight_mut(id) {
                    *data = EdgeData::from(edge);
                }
            }
            None => {
                self.graph.add_edge(source, target, EdgeData::from(edge));
            }
        }
        true
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All edges, ordered by source, target and kind
    pub fn edges(&self) -> Vec<GraphEdge> {
        let mut edges: Vec<GraphEdge> = self
            .graph
            .edge_references()
            .filter_map(|e| self.to_graph_edge(e.source(), e.target(), e.weight()))
            .collect();
        edges.sort_by(|a, b| {
            (&a.source, &a.target, a.kind).cmp(&(&b.source, &b.target, b.kind))
        });
        edges
    }

    /// Edges leaving `id`
    pub fn outgoing_edges(&self, id: &str) -> Vec<GraphEdge> {
        self.directed_edges(id, Direction::Outgoing)
    }

    /// Edges arriving at `id`
    pub fn incoming_edges(&self, id: &str) -> Vec<GraphEdge> {
        self.directed_edges(id, Direction::Incoming)
    }

    fn directed_edges(&self, id: &str, direction: Direction) -> Vec<GraphEdge> {
        let Some(&idx) = self.node_index_map.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, direction)
            .filter_map(|e| self.to_graph_edge(e.source(), e.target(), e.weight()))
            .collect()
    }

    fn to_graph_edge(
        &self,
        source: NodeIndex,
        target: NodeIndex,
        data: &EdgeData,
    ) -> Option<GraphEdge> {
        Some(GraphEdge {
            source: self.graph.node_weight(source)?.id.clone(),
            target: self.graph.node_weight(target)?.id.clone(),
            kind: data.kind,
            weight: data.weight,
            context: data.context.clone(),
        })
    }

    /// Incoming plus outgoing edge count; 0 for unknown ids
    pub fn degree(&self, id: &str) -> usize {
        self.node_index_map
            .get(id)
            .map(|&idx| self.degree_of(idx))
            .unwrap_or(0)
    }

    fn degree_of(&self, idx: NodeIndex) -> usize {
        self.graph.edges_directed(idx, Direction::Outgoing).count()
            + self.graph.edges_directed(idx, Direction::Incoming).count()
    }

    fn id_of(&self, idx: NodeIndex) -> &str {
        self.graph
            .node_weight(idx)
            .map(|n| n.id.as_str())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------------

    /// Nodes with no incoming and no outgoing edges, ordered by id
    pub fn find_orphan_nodes(&self) -> Vec<&KnowledgeNode> {
        let mut orphans: Vec<&KnowledgeNode> = self
            .graph
            .node_indices()
            .filter(|&idx| self.degree_of(idx) == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect();
        orphans.sort_by(|a, b| a.id.cmp(&b.id));
        orphans
    }

    /// The `limit` nodes with the highest total degree, ties broken by id
    pub fn find_most_connected(&self, limit: usize) -> Vec<(&KnowledgeNode, usize)> {
        let mut ranked: Vec<(&KnowledgeNode, usize)> = self
            .graph
            .node_indices()
            .filter_map(|idx| Some((self.graph.node_weight(idx)?, self.degree_of(idx))))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        ranked.truncate(limit);
        ranked
    }

    /// Shortest directed path from `source` to `target`, by edge count.
    ///
    /// Returns the ids along the path, both ends included, or `None` when
    /// either id is unknown or `target` is unreachable.
    pub fn find_path(&self, source: &str, target: &str) -> Option<Vec<String>> {
        let start = *self.node_index_map.get(source)?;
        let goal = *self.node_index_map.get(target)?;

        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = vec![self.id_of(goal).to_string()];
                let mut step = goal;
                while let Some(&prev) = previous.get(&step) {
                    path.push(self.id_of(prev).to_string());
                    step = prev;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.sorted_neighbors(current, Some(Direction::Outgoing)) {
                if visited.insert(next) {
                    previous.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Nodes within `max_hops` of `id` following edges in either direction.
    ///
    /// The origin is excluded; each node appears once at its nearest hop
    /// distance. Ordered by hop count, then id.
    pub fn find_related(&self, id: &str, max_hops: usize) -> Vec<(&KnowledgeNode, usize)> {
        let Some(&start) = self.node_index_map.get(id) else {
            return Vec::new();
        };

        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut frontier = vec![start];
        let mut related = Vec::new();

        for hop in 1..=max_hops {
            let mut next_frontier = Vec::new();
            for &current in &frontier {
                for next in self.sorted_neighbors(current, None) {
                    if visited.insert(next) {
                        next_frontier.push(next);
                        if let Some(node) = self.graph.node_weight(next) {
                            related.push((node, hop));
                        }
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        related.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        related
    }

    /// Distinct neighbours ordered by id; `None` means both directions
    fn sorted_neighbors(&self, idx: NodeIndex, direction: Option<Direction>) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = match direction {
            Some(direction) => self.graph.neighbors_directed(idx, direction).collect(),
            None => self.graph.neighbors_undirected(idx).collect(),
        };
        neighbors.sort_by(|a, b| self.id_of(*a).cmp(self.id_of(*b)));
        neighbors.dedup();
        neighbors
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// Every node and edge, ordered by id
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::new(self.nodes().into_iter().cloned().collect(), self.edges())
    }

    /// Serialize the whole graph as a [`GraphSnapshot`]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Rebuild a manager from [`GraphManager::to_json`] output
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let snapshot: GraphSnapshot = serde_json::from_str(json)?;
        if snapshot.version != GRAPH_SCHEMA_VERSION {
            warn!(
                "Loading graph snapshot version {} (expected {})",
                snapshot.version, GRAPH_SCHEMA_VERSION
            );
        }
        Ok(Self::from_snapshot(snapshot))
    }
}

// ============================================================================
// Shared snapshots
// ============================================================================

/// A [`GraphManager`] shared between readers and a writer.
///
/// Readers clone an `Arc` and keep a consistent view for as long as they hold
/// it. Writers build a replacement manager and swap it in atomically.
#[derive(Debug, Default)]
pub struct SharedGraph {
    current: RwLock<Arc<GraphManager>>,
}

impl SharedGraph {
    pub fn new(manager: GraphManager) -> Self {
        Self {
            current: RwLock::new(Arc::new(manager)),
        }
    }

    /// The currently published manager
    pub fn snapshot(&self) -> Arc<GraphManager> {
        self.current.read().clone()
    }

    /// Publish a new manager
    pub fn replace(&self, manager: GraphManager) {
        *self.current.write() = Arc::new(manager);
    }

    /// Rebuild from the store and publish the result
    pub fn refresh_from_store(&self, store: &GraphStore) -> Result<(), StoreError> {
        let manager = GraphManager::from_store(store)?;
        self.replace(manager);
        Ok(())
    }

    /// Apply `f` to a copy of the current manager and publish the copy.
    ///
    /// Updates are serialized with each other; readers keep running against
    /// the previous snapshot until the swap.
    pub fn update<R>(&self, f: impl FnOnce(&mut GraphManager) -> R) -> R {
        let guard = self.current.upgradable_read();
        let mut next = GraphManager::clone(&guard);
        let result = f(&mut next);
        let mut writer = RwLockUpgradableReadGuard::upgrade(guard);
        *writer = Arc::new(next);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node(id: &str) -> KnowledgeNode {
        KnowledgeNode::new(id, format!("{id}.md"), id.to_uppercase())
    }

    fn ids(nodes: &[&KnowledgeNode]) -> Vec<String> {
        nodes.iter().map(|n| n.id.clone()).collect()
    }

    fn graph_with(node_ids: &[&str], edges: &[(&str, &str)]) -> GraphManager {
        let mut manager = GraphManager::new();
        for id in node_ids {
            manager.add_node(node(id));
        }
        for (source, target) in edges {
            assert!(manager.add_edge(&GraphEdge::link(*source, *target)));
        }
        manager
    }

    #[test]
    fn test_add_and_get_node() {
        let mut manager = GraphManager::new();
        assert!(manager.add_node(node("a")));
        assert!(!manager.add_node(node("a")));
        assert_eq!(manager.node_count(), 1);
        assert_eq!(manager.get_node("a").unwrap().title, "A");
        assert!(manager.get_node("b").is_none());
    }

    #[test]
    fn test_update_node_keeps_edges_and_reindexes_tags() {
        let mut manager = GraphManager::new();
        manager.add_node(node("a").with_tags(["old"]));
        manager.add_node(node("b"));
        manager.add_edge(&GraphEdge::link("a", "b"));

        assert!(manager.update_node(node("a").with_tags(["new"])));
        assert_eq!(manager.edge_count(), 1);
        assert!(manager.nodes_by_tag("old").is_empty());
        assert_eq!(ids(&manager.nodes_by_tag("new")), vec!["a"]);

        assert!(!manager.update_node(node("missing")));
        assert!(!manager.contains_node("missing"));
    }

    #[test]
    fn test_remove_node_drops_edges_and_tags() {
        let mut manager = graph_with(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        manager.update_node(node("b").with_tags(["t"]));

        let removed = manager.remove_node("b").unwrap();
        assert_eq!(removed.id, "b");
        assert_eq!(manager.edge_count(), 0);
        assert!(manager.nodes_by_tag("t").is_empty());
        assert!(manager.remove_node("b").is_none());

        // Indices of the survivors stay valid
        assert_eq!(manager.get_node("c").unwrap().id, "c");
    }

    #[test]
    fn test_add_edge_unknown_endpoint_is_noop() {
        let mut manager = graph_with(&["a"], &[]);
        assert!(!manager.add_edge(&GraphEdge::link("a", "ghost")));
        assert!(!manager.add_edge(&GraphEdge::link("ghost", "a")));
        assert_eq!(manager.edge_count(), 0);
    }

    #[test]
    fn test_add_edge_same_kind_updates() {
        let mut manager = graph_with(&["a", "b"], &[("a", "b")]);
        manager.add_edge(&GraphEdge::link("a", "b").with_weight(3.0));
        assert_eq!(manager.edge_count(), 1);
        assert_eq!(manager.outgoing_edges("a")[0].weight, 3.0);

        manager.add_edge(&GraphEdge::new("a", "b", EdgeKind::Parent));
        assert_eq!(manager.edge_count(), 2);
        assert_eq!(manager.incoming_edges("b").len(), 2);
    }

    #[test]
    fn test_orphans_and_most_connected() {
        let manager = graph_with(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("a", "c")],
        );
        assert_eq!(ids(&manager.find_orphan_nodes()), vec!["d"]);

        let top: Vec<(String, usize)> = manager
            .find_most_connected(3)
            .into_iter()
            .map(|(n, d)| (n.id.clone(), d))
            .collect();
        assert_eq!(
            top,
            vec![("a".to_string(), 2), ("b".to_string(), 2), ("c".to_string(), 2)]
        );
        assert_eq!(manager.degree("d"), 0);
        assert_eq!(manager.degree("ghost"), 0);
    }

    #[test]
    fn test_find_path_is_shortest() {
        let manager = graph_with(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("a", "e"), ("e", "d")],
        );
        assert_eq!(
            manager.find_path("a", "d").unwrap(),
            vec!["a", "e", "d"]
        );
        assert_eq!(manager.find_path("a", "a").unwrap(), vec!["a"]);
    }

    #[test]
    fn test_find_path_absent() {
        let manager = graph_with(&["a", "b", "c"], &[("a", "b")]);
        assert!(manager.find_path("a", "c").is_none());
        // Direction matters
        assert!(manager.find_path("b", "a").is_none());
        assert!(manager.find_path("a", "ghost").is_none());
    }

    #[test]
    fn test_find_related_by_hops() {
        let manager = graph_with(
            &["a", "b", "c", "d", "x"],
            &[("a", "b"), ("c", "a"), ("b", "d")],
        );
        let related: Vec<(String, usize)> = manager
            .find_related("a", 2)
            .into_iter()
            .map(|(n, h)| (n.id.clone(), h))
            .collect();
        assert_eq!(
            related,
            vec![("b".to_string(), 1), ("c".to_string(), 1), ("d".to_string(), 2)]
        );

        assert_eq!(manager.find_related("a", 1).len(), 2);
        assert!(manager.find_related("a", 0).is_empty());
        assert!(manager.find_related("ghost", 3).is_empty());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut manager = graph_with(&["b", "a"], &[("a", "b")]);
        manager.update_node(node("a").with_tags(["x"]));

        let json = manager.to_json().unwrap();
        let restored = GraphManager::from_json(&json).unwrap();
        assert_eq!(restored.snapshot(), manager.snapshot());
        assert_eq!(ids(&restored.nodes_by_tag("x")), vec!["a"]);
    }

    #[test]
    fn test_from_snapshot_skips_dangling_edges() {
        let snapshot = GraphSnapshot::new(
            vec![node("a"), node("b")],
            vec![GraphEdge::link("a", "b"), GraphEdge::link("a", "ghost")],
        );
        let manager = GraphManager::from_snapshot(snapshot);
        assert_eq!(manager.edge_count(), 1);
    }

    #[test]
    fn test_from_store() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_node(&node("a")).unwrap();
        store.upsert_node(&node("b")).unwrap();
        store.add_edge(&GraphEdge::link("a", "b")).unwrap();

        let manager = GraphManager::from_store(&store).unwrap();
        assert_eq!(manager.node_count(), 2);
        assert_eq!(manager.find_path("a", "b").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_shared_graph_snapshots_are_isolated() {
        let shared = SharedGraph::new(graph_with(&["a"], &[]));
        let before = shared.snapshot();

        let added = shared.update(|g| g.add_node(node("b")));
        assert!(added);

        assert_eq!(before.node_count(), 1);
        assert_eq!(shared.snapshot().node_count(), 2);
    }

    #[test]
    fn test_shared_graph_refresh() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_node(&node("a")).unwrap();

        let shared = SharedGraph::default();
        assert_eq!(shared.snapshot().node_count(), 0);
        shared.refresh_from_store(&store).unwrap();
        assert!(shared.snapshot().contains_node("a"));
    }
}
