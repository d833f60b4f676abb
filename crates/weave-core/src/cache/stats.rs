//! Cache counters.

use serde::Serialize;

/// Running counters kept under the cache lock
#[derive(Debug, Clone, Default)]
pub(crate) struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheMetrics {
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }
}

/// Point-in-time view of a cache
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hits over lookups (0.0 - 1.0)
    pub hit_rate: f64,
    /// Physically stored entries, including expired ones not yet swept
    pub entries: usize,
    pub size_bytes: usize,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub(crate) fn from_metrics(metrics: &CacheMetrics, entries: usize, size_bytes: usize) -> Self {
        let lookups = metrics.hits + metrics.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            metrics.hits as f64 / lookups as f64
        };
        Self {
            hits: metrics.hits,
            misses: metrics.misses,
            hit_rate,
            entries,
            size_bytes,
            evictions: metrics.evictions,
            expirations: metrics.expirations,
        }
    }
}
