//! End-to-end behaviour of the knowledge graph core.
//!
//! Each test drives the public API the way a caller would and checks one
//! observable guarantee: cleanup on delete, safe search input, cache bounds,
//! ranking of edgeless and small graphs, and shortest paths.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use weave_config::{CacheConfig, WeaveConfig};
use weave_core::{
    Cache, EquilibriumOptimizer, EvictionPolicy, GraphEdge, GraphManager, GraphStore,
    KnowledgeEngine, KnowledgeNode, ManualClock, OptimizerConfig, SetOptions,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn node(id: &str) -> KnowledgeNode {
    KnowledgeNode::new(id, format!("notes/{id}.md"), id.to_uppercase())
        .with_content("shared body text for every node")
}

fn triangle() -> (Vec<KnowledgeNode>, Vec<GraphEdge>) {
    let nodes = vec![node("a"), node("b"), node("c")];
    let edges = vec![
        GraphEdge::link("a", "b").with_weight(1.0),
        GraphEdge::link("b", "c").with_weight(1.0),
        GraphEdge::link("a", "c").with_weight(1.0),
    ];
    (nodes, edges)
}

// ============================================================================
// Store
// ============================================================================

#[test]
fn test_deleted_node_leaves_no_edges_or_tags() {
    let store = GraphStore::in_memory().unwrap();
    for id in ["a", "b", "c"] {
        store.upsert_node(&node(id).with_tags(["shared", id])).unwrap();
    }
    store.add_edge(&GraphEdge::link("a", "b")).unwrap();
    store.add_edge(&GraphEdge::link("b", "c")).unwrap();
    store.add_edge(&GraphEdge::link("c", "b")).unwrap();

    assert!(store.delete_node("b").unwrap());

    for edge in store.get_all_edges().unwrap() {
        assert_ne!(edge.source, "b");
        assert_ne!(edge.target, "b");
    }
    assert!(store.get_nodes_by_tag("b").unwrap().is_empty());
    let shared: Vec<String> = store
        .get_nodes_by_tag("shared")
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(shared, vec!["a".to_string(), "c".to_string()]);
}

#[test]
fn test_empty_and_operator_only_searches() {
    let store = GraphStore::in_memory().unwrap();
    store.upsert_node(&node("a")).unwrap();

    for query in ["", "   ", "AND", "OR NOT", "NEAR", "\"\"", "*", "(", "- + ^ :"] {
        let hits = store.search_nodes(query, 10).unwrap();
        assert!(hits.is_empty(), "query {query:?} returned {} hits", hits.len());
    }
}

#[test]
fn test_upsert_is_idempotent_for_counts() {
    let store = GraphStore::in_memory().unwrap();
    let (nodes, edges) = triangle();
    for n in &nodes {
        store.upsert_node(n).unwrap();
    }
    for e in &edges {
        store.add_edge(e).unwrap();
    }
    let before = store.stats().unwrap();

    store.upsert_node(&nodes[0]).unwrap();
    store.upsert_node(&nodes[0]).unwrap();

    let after = store.stats().unwrap();
    assert_eq!(before.total_nodes, after.total_nodes);
    assert_eq!(before.total_edges, after.total_edges);
}

// ============================================================================
// Graph manager
// ============================================================================

#[test]
fn test_find_path_minimal_or_absent() {
    let mut graph = GraphManager::new();
    for id in ["a", "b", "c", "d", "e"] {
        graph.add_node(node(id));
    }
    // a -> b -> c -> d and a shortcut a -> d; e is isolated
    graph.add_edge(&GraphEdge::link("a", "b"));
    graph.add_edge(&GraphEdge::link("b", "c"));
    graph.add_edge(&GraphEdge::link("c", "d"));
    graph.add_edge(&GraphEdge::link("a", "d"));

    assert_eq!(
        graph.find_path("a", "d"),
        Some(vec!["a".to_string(), "d".to_string()])
    );
    assert_eq!(
        graph.find_path("b", "d"),
        Some(vec!["b".to_string(), "c".to_string(), "d".to_string()])
    );
    assert_eq!(graph.find_path("a", "e"), None);
    assert_eq!(graph.find_path("d", "a"), None);
}

#[test]
fn test_triangle_scenario() {
    let store = GraphStore::in_memory().unwrap();
    let (nodes, edges) = triangle();
    store.upsert_nodes(&nodes).unwrap();
    for e in &edges {
        store.add_edge(e).unwrap();
    }
    let graph = GraphManager::from_store(&store).unwrap();

    // All three have degree 2; the id breaks the tie
    let most = graph.find_most_connected(1);
    assert_eq!(most.len(), 1);
    assert_eq!(most[0].0.id, "a");
    assert_eq!(most[0].1, 2);
    assert!(graph.find_orphan_nodes().is_empty());

    let optimizer = EquilibriumOptimizer::new(OptimizerConfig::default()).unwrap();
    let result = optimizer.optimize_manager(&graph, None);
    assert!(result.converged);

    let a = result.importance_of("a").unwrap();
    let b = result.importance_of("b").unwrap();
    let c = result.importance_of("c").unwrap();
    assert!(a >= b - 1e-9, "a={a} b={b}");
    assert!(c >= b - 1e-9, "c={c} b={b}");
}

// ============================================================================
// Optimizer
// ============================================================================

#[test]
fn test_edgeless_graph_ranks_uniformly() {
    let optimizer = EquilibriumOptimizer::new(OptimizerConfig::default()).unwrap();
    for n in [1usize, 2, 5, 17] {
        let nodes: Vec<KnowledgeNode> = (0..n).map(|i| node(&format!("n{i:02}"))).collect();
        let result = optimizer.optimize_with_details(&nodes, &[], None);

        assert!(result.converged);
        assert!(result.iterations <= 1, "{} iterations for {n} nodes", result.iterations);
        for (id, importance) in result.importance_map() {
            assert!(
                (importance - 1.0 / n as f64).abs() < 1e-9,
                "{id} has {importance} in a graph of {n}"
            );
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

#[test]
fn test_lru_cache_scenario() {
    let cache: Cache<String> = Cache::new(&CacheConfig {
        policy: EvictionPolicy::Lru,
        max_entries: 2,
        ..CacheConfig::default()
    });
    cache.set("k1", "v1".to_string(), SetOptions::default());
    cache.set("k2", "v2".to_string(), SetOptions::default());
    assert_eq!(cache.get("k1"), Some("v1".to_string()));
    cache.set("k3", "v3".to_string(), SetOptions::default());

    assert!(cache.has("k1"));
    assert!(!cache.has("k2"));
    assert!(cache.has("k3"));
}

#[test]
fn test_cache_bounds_under_every_policy() {
    for policy in [
        EvictionPolicy::Lru,
        EvictionPolicy::Lfu,
        EvictionPolicy::Fifo,
        EvictionPolicy::Ttl,
    ] {
        let clock = Arc::new(ManualClock::new());
        let cache: Cache<Vec<u32>> = Cache::with_clock(
            &CacheConfig {
                policy,
                max_entries: 8,
                max_size_bytes: 256,
                default_ttl_secs: 0,
            },
            clock.clone(),
        );
        for i in 0..200u32 {
            let value: Vec<u32> = (0..(i % 12)).collect();
            let options = if i % 4 == 0 {
                SetOptions::new().with_ttl(Duration::from_secs(u64::from(i % 7) + 1))
            } else {
                SetOptions::default()
            };
            cache.set(format!("k{}", i % 30), value, options);
            cache.get(&format!("k{}", (i * 7) % 30));
            if i % 10 == 0 {
                clock.advance(Duration::from_secs(1));
            }

            let stats = cache.stats();
            assert!(stats.entries <= 8, "{policy}: {} entries", stats.entries);
            assert!(stats.size_bytes <= 256, "{policy}: {} bytes", stats.size_bytes);
        }
    }
}

#[test]
fn test_ttl_expiry_get_then_has() {
    let clock = Arc::new(ManualClock::new());
    let cache: Cache<String> = Cache::with_clock(&CacheConfig::default(), clock.clone());
    cache.set(
        "session",
        "data".to_string(),
        SetOptions::new().with_ttl(Duration::from_millis(500)),
    );
    assert!(cache.has("session"));

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get("session"), None);
    assert!(!cache.has("session"));
}

// ============================================================================
// Engine
// ============================================================================

#[test]
fn test_engine_end_to_end() {
    let engine = KnowledgeEngine::in_memory(&WeaveConfig::default()).unwrap();
    let (nodes, edges) = triangle();
    for n in nodes {
        engine.upsert_node(n).unwrap();
    }
    for e in &edges {
        engine.add_edge(e).unwrap();
    }

    let stats = engine.stats().unwrap();
    assert_eq!(stats.total_nodes, 3);
    assert_eq!(stats.total_edges, 3);
    assert_eq!(stats.orphan_count, 0);
    assert_eq!(stats.most_connected[0].id, "a");

    assert_eq!(engine.search("shared body", 10).unwrap().len(), 3);

    let top = engine.top_nodes(3);
    assert_eq!(top.len(), 3);
    let total: f64 = top.iter().map(|s| s.importance).sum();
    assert!((total - 1.0).abs() < 1e-6);

    assert!(engine.delete_node("b").unwrap());
    let stats = engine.stats().unwrap();
    assert_eq!(stats.total_nodes, 2);
    assert_eq!(stats.total_edges, 1);
    assert_eq!(engine.rank(None).participation.len(), 2);
}
