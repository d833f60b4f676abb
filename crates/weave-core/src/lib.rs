//! Weave Core - Knowledge graph storage, traversal, ranking and caching
//!
//! This crate provides the core functionality for a personal knowledge base:
//! - SQLite-backed graph store with full-text search over node bodies
//! - In-memory graph manager for traversal and structural queries
//! - Equilibrium optimizer that ranks nodes by importance
//! - Bounded result cache with LRU, LFU, FIFO and TTL-first eviction
//! - An engine facade that keeps all of the above consistent

pub mod cache;
pub mod engine;
pub mod error;
pub mod graph;
pub mod manager;
pub mod optimizer;
pub mod store;

// Graph model re-exports
pub use graph::{
    EdgeKind, GraphEdge, GraphSnapshot, KnowledgeNode, LinkKind, NodeLink, NodeStatus, NodeType,
    DEFAULT_EDGE_WEIGHT, GRAPH_SCHEMA_VERSION,
};

// Error re-exports
pub use error::{EngineError, OptimizerError, StorageError, StorageFault, StoreError};

// Store re-exports
pub use store::{ConnectedNode, GraphStats, GraphStore, STORE_SCHEMA_VERSION};

// Manager re-exports
pub use manager::{EdgeData, GraphManager, SharedGraph};

// Optimizer re-exports
pub use optimizer::{
    EquilibriumOptimizer, LexicalScoring, NodeCluster, NodeImpact, NodeScore, OptimizationResult,
    OptimizerConfig, RemovalImpact, ScoringStrategy,
};

// Cache re-exports
pub use cache::{cache_key, Cache, CacheStats, Clock, EvictionPolicy, ManualClock, SetOptions};

// Engine re-exports
pub use engine::KnowledgeEngine;
