//! Knowledge engine.
//!
//! Ties the durable store, the shared in-memory graph, the optimizer and the
//! result caches together behind one handle. Writes go to the store first,
//! then to the in-memory graph, then drop the cached reads they affect.
//!
//! Nodes enter the graph as the store reads them back, so derived fields
//! (incoming links, word counts) match the store. A read computed while a
//! write was in flight is returned but not cached.

use crate::cache::{cache_key, Cache, CacheStats, SetOptions};
use crate::error::EngineError;
use crate::graph::{GraphEdge, KnowledgeNode};
use crate::manager::{GraphManager, SharedGraph};
use crate::optimizer::{
    by_importance_desc, EquilibriumOptimizer, NodeScore, OptimizationResult, OptimizerConfig,
};
use crate::store::{GraphStats, GraphStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use weave_config::WeaveConfig;

/// Cached full-text search results
const TAG_SEARCH: &str = "search";
/// Cached aggregate statistics
const TAG_STATS: &str = "stats";
/// Cached node listings
const TAG_NODES: &str = "nodes";
/// Cached optimizer runs
const TAG_RANKING: &str = "ranking";

/// Value type of the query cache
#[derive(Debug, Clone, Serialize)]
enum CachedRead {
    Nodes(Vec<KnowledgeNode>),
    Stats(GraphStats),
}

/// Store, graph, optimizer and caches for one knowledge base
#[derive(Debug)]
pub struct KnowledgeEngine {
    store: GraphStore,
    graph: SharedGraph,
    optimizer: EquilibriumOptimizer,
    queries: Cache<CachedRead>,
    rankings: Cache<OptimizationResult>,
    /// Write generation. Held for the whole of each write so store and graph
    /// updates stay in the same order.
    writes: Mutex<u64>,
}

impl KnowledgeEngine {
    /// Open (or create) the knowledge base under `root`.
    ///
    /// The database lives at `root/<storage.data_dir>/<storage.database_file>`
    /// unless `data_dir` is absolute.
    pub fn open(root: &Path, config: &WeaveConfig) -> Result<Self, EngineError> {
        let db_path = config.database_path(root);
        let store = GraphStore::open_or_create(&db_path)?;
        store.set_busy_timeout(Duration::from_millis(config.storage.busy_timeout_ms))?;
        Self::with_store(store, config)
    }

    /// Engine over a fresh in-memory store
    pub fn in_memory(config: &WeaveConfig) -> Result<Self, EngineError> {
        Self::with_store(GraphStore::in_memory()?, config)
    }

    /// Engine over an already opened store
    pub fn with_store(store: GraphStore, config: &WeaveConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let optimizer = EquilibriumOptimizer::new(OptimizerConfig::from(&config.optimizer))?;
        let manager = GraphManager::from_store(&store)?;
        info!(
            nodes = manager.node_count(),
            edges = manager.edge_count(),
            cache_policy = %config.cache.policy,
            "Knowledge engine ready"
        );

        Ok(Self {
            store,
            graph: SharedGraph::new(manager),
            optimizer,
            queries: Cache::new(&config.cache),
            rankings: Cache::new(&config.cache),
            writes: Mutex::new(0),
        })
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Current in-memory graph; stays valid while later writes proceed
    pub fn graph(&self) -> Arc<GraphManager> {
        self.graph.snapshot()
    }

    pub fn optimizer(&self) -> &EquilibriumOptimizer {
        &self.optimizer
    }

    pub fn query_cache_stats(&self) -> CacheStats {
        self.queries.stats()
    }

    pub fn ranking_cache_stats(&self) -> CacheStats {
        self.rankings.stats()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace a node.
    ///
    /// The node and every node whose backlinks it changes are re-read from
    /// the store before they reach the graph.
    pub fn upsert_node(&self, node: KnowledgeNode) -> Result<(), EngineError> {
        let mut generation = self.writes.lock();
        self.store.upsert_node(&node)?;

        let mut affected = link_targets(&node);
        if let Some(previous) = self.graph.snapshot().get_node(&node.id) {
            affected.extend(link_targets(previous));
        }
        affected.insert(node.id);
        let synced = self.sync_from_store(&affected);

        // The store write committed, so cached reads are stale either way
        *generation += 1;
        self.invalidate(&[TAG_SEARCH, TAG_STATS, TAG_NODES]);
        synced
    }

    /// Delete a node and its edges, returning whether it existed
    pub fn delete_node(&self, id: &str) -> Result<bool, EngineError> {
        let mut generation = self.writes.lock();
        let removed = self.store.delete_node(id)?;
        if removed {
            let mut affected = self
                .graph
                .update(|graph| graph.remove_node(id))
                .map(|node| link_targets(&node))
                .unwrap_or_default();
            affected.remove(id);
            let synced = self.sync_from_store(&affected);

            *generation += 1;
            self.invalidate(&[TAG_SEARCH, TAG_STATS, TAG_NODES]);
            synced?;
        }
        Ok(removed)
    }

    /// Insert or update an edge; both endpoints must exist
    pub fn add_edge(&self, edge: &GraphEdge) -> Result<(), EngineError> {
        let mut generation = self.writes.lock();
        self.store.add_edge(edge)?;
        self.graph.update(|graph| graph.add_edge(edge));
        *generation += 1;
        self.invalidate(&[TAG_STATS]);
        Ok(())
    }

    /// Rebuild the in-memory graph from the store and drop every cached read.
    ///
    /// Needed after another process wrote to the same database.
    pub fn refresh(&self) -> Result<(), EngineError> {
        let mut generation = self.writes.lock();
        self.graph.refresh_from_store(&self.store)?;
        *generation += 1;
        self.queries.clear();
        self.rankings.clear();
        Ok(())
    }

    /// Drop expired cache entries from both caches
    pub fn prune_caches(&self) -> usize {
        self.queries.prune() + self.rankings.prune()
    }

    /// Replace the graph's copies of `ids` with the store's. Ids the store
    /// does not hold are skipped.
    fn sync_from_store(&self, ids: &BTreeSet<String>) -> Result<(), EngineError> {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.store.get_node(id)? {
                nodes.push(node);
            }
        }
        self.graph.update(|graph| {
            for node in nodes {
                graph.add_node(node);
            }
        });
        Ok(())
    }

    fn invalidate(&self, tags: &[&str]) {
        let mut dropped = 0;
        for tag in tags {
            dropped += self.queries.delete_by_tag(tag);
        }
        // Any graph change can move every importance score
        dropped += self.rankings.delete_by_tag(TAG_RANKING);
        debug!(dropped, ?tags, "Invalidated cached reads");
    }

    fn generation(&self) -> u64 {
        *self.writes.lock()
    }

    /// Cache `value` unless a write committed since generation `seen`
    fn cache_if_current<V: Clone + Serialize>(
        &self,
        cache: &Cache<V>,
        seen: u64,
        key: String,
        value: V,
        options: SetOptions,
    ) {
        let generation = self.writes.lock();
        if *generation == seen {
            cache.set(key, value, options);
        } else {
            debug!(%key, seen, current = *generation, "Skipped caching a superseded read");
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Full-text search, best match first
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeNode>, EngineError> {
        let key = cache_key(TAG_SEARCH, &(query, limit));
        if let Some(CachedRead::Nodes(nodes)) = self.queries.get(&key) {
            return Ok(nodes);
        }
        let seen = self.generation();
        let nodes = self.store.search_nodes(query, limit)?;
        self.cache_if_current(
            &self.queries,
            seen,
            key,
            CachedRead::Nodes(nodes.clone()),
            SetOptions::new().with_tags([TAG_SEARCH, TAG_NODES]),
        );
        Ok(nodes)
    }

    pub fn stats(&self) -> Result<GraphStats, EngineError> {
        let key = cache_key(TAG_STATS, &());
        if let Some(CachedRead::Stats(stats)) = self.queries.get(&key) {
            return Ok(stats);
        }
        let seen = self.generation();
        let stats = self.store.stats()?;
        self.cache_if_current(
            &self.queries,
            seen,
            key,
            CachedRead::Stats(stats.clone()),
            SetOptions::new().with_tags([TAG_STATS]),
        );
        Ok(stats)
    }

    /// Nodes carrying `tag`, ordered by id
    pub fn nodes_by_tag(&self, tag: &str) -> Result<Vec<KnowledgeNode>, EngineError> {
        let key = cache_key("tag", tag);
        if let Some(CachedRead::Nodes(nodes)) = self.queries.get(&key) {
            return Ok(nodes);
        }
        let seen = self.generation();
        let nodes = self.store.get_nodes_by_tag(tag)?;
        self.cache_if_current(
            &self.queries,
            seen,
            key,
            CachedRead::Nodes(nodes.clone()),
            SetOptions::new().with_tags([TAG_NODES]),
        );
        Ok(nodes)
    }

    // =========================================================================
    // Ranking
    // =========================================================================

    /// Optimizer run over the current graph, optionally biased to a query
    pub fn rank(&self, query: Option<&str>) -> OptimizationResult {
        let key = cache_key(TAG_RANKING, &query);
        if let Some(result) = self.rankings.get(&key) {
            return result;
        }
        let seen = self.generation();
        let graph = self.graph.snapshot();
        let result = self.optimizer.optimize_manager(&graph, query);
        self.cache_if_current(
            &self.rankings,
            seen,
            key,
            result.clone(),
            SetOptions::new().with_tags([TAG_RANKING]),
        );
        result
    }

    /// Nodes below the configured importance floor, least important first
    pub fn prune_candidates(&self) -> Vec<NodeScore> {
        self.rank(None).prune_candidates
    }

    /// The `limit` most important nodes, ties by id
    pub fn top_nodes(&self, limit: usize) -> Vec<NodeScore> {
        let result = self.rank(None);
        let mut all: Vec<NodeScore> = result
            .ranked
            .into_iter()
            .chain(result.prune_candidates)
            .collect();
        all.sort_by(by_importance_desc);
        all.truncate(limit);
        all
    }
}

/// Ids of the nodes `node` links to
fn link_targets(node: &KnowledgeNode) -> BTreeSet<String> {
    node.outgoing_links
        .iter()
        .map(|link| link.target.clone())
        .collect()
}
