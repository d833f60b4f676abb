//! Bounded Result Cache
//!
//! Caches query and ranking results keyed by string, bounded both by entry
//! count and by estimated encoded size. A write that would break either bound
//! evicts one entry at a time, chosen by the configured [`EvictionPolicy`],
//! until the new value fits.
//!
//! Expired entries are invisible as soon as their TTL elapses; they are
//! physically removed on the next access, when room is needed, or by
//! [`Cache::prune`].
//!
//! Thread-safe via interior mutability using parking_lot::Mutex.

mod clock;
mod entry;
mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, SetOptions};
pub use stats::CacheStats;
pub use weave_config::{CacheConfig, EvictionPolicy};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use stats::CacheMetrics;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Size charged for a value that cannot be encoded
pub const FALLBACK_ENTRY_SIZE: usize = 1024;

/// Estimated footprint of a value: its JSON encoded length
pub fn estimate_size<V: Serialize + ?Sized>(value: &V) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(FALLBACK_ENTRY_SIZE)
}

/// Build a cache key from a namespace and query parameters.
///
/// Parameters are JSON encoded, so structs, tuples and `BTreeMap`s give the
/// same key for the same values. `HashMap` iteration order is not stable and
/// should not be used here.
pub fn cache_key<P: Serialize + ?Sized>(namespace: &str, params: &P) -> String {
    match serde_json::to_string(params) {
        Ok(encoded) => format!("{namespace}:{encoded}"),
        Err(e) => {
            warn!(namespace, error = %e, "Cache key parameters could not be encoded");
            format!("{namespace}:!")
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Inner state for [`Cache`] (protected by Mutex)
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,

    /// Recency order, most recently used at the front
    recency: LruCache<String, ()>,

    /// (access count, last touch, key): LFU order
    frequency: BTreeSet<(u64, u64, String)>,

    /// (write seq, key): FIFO order
    insertion: BTreeSet<(u64, String)>,

    /// (expires at, write seq, key) for entries with a TTL
    expiry: BTreeSet<(Instant, u64, String)>,

    tag_index: HashMap<String, BTreeSet<String>>,

    size_bytes: usize,
    next_seq: u64,

    /// Entry stored over the size budget; it goes first on the next write
    oversized: Option<String>,

    metrics: CacheMetrics,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: LruCache::unbounded(),
            frequency: BTreeSet::new(),
            insertion: BTreeSet::new(),
            expiry: BTreeSet::new(),
            tag_index: HashMap::new(),
            size_bytes: 0,
            next_seq: 0,
            oversized: None,
            metrics: CacheMetrics::default(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        self.recency.put(entry.key.clone(), ());
        self.frequency.insert(entry.frequency_key());
        self.insertion.insert(entry.insertion_key());
        if let Some(expiry) = entry.expiry_key() {
            self.expiry.insert(expiry);
        }
        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        self.size_bytes += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.pop(key);
        self.frequency.remove(&entry.frequency_key());
        self.insertion.remove(&entry.insertion_key());
        if let Some(expiry) = entry.expiry_key() {
            self.expiry.remove(&expiry);
        }
        for tag in &entry.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        self.size_bytes = self.size_bytes.saturating_sub(entry.size_bytes);
        if self.oversized.as_deref() == Some(key) {
            self.oversized = None;
        }
        Some(entry)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.frequency.clear();
        self.insertion.clear();
        self.expiry.clear();
        self.tag_index.clear();
        self.size_bytes = 0;
        self.oversized = None;
    }

    /// Whether `key` is stored and unexpired; an expired entry is dropped
    fn is_live(&mut self, key: &str, now: Instant) -> bool {
        match self.entries.get(key).map(|entry| entry.is_expired(now)) {
            None => false,
            Some(false) => true,
            Some(true) => {
                self.remove(key);
                self.metrics.record_expiration();
                false
            }
        }
    }

    /// Drop every entry whose TTL has elapsed
    fn expire_due(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((expires_at, _, key)) = self.expiry.first().cloned() {
            if expires_at > now {
                break;
            }
            self.remove(&key);
            self.metrics.record_expiration();
            removed += 1;
        }
        removed
    }

    fn touch(&mut self, key: &str, now: Instant) -> Option<&CacheEntry<V>> {
        let seq = self.next_seq();
        let entry = self.entries.get_mut(key)?;
        self.frequency.remove(&entry.frequency_key());
        entry.access_count += 1;
        entry.last_accessed = now;
        entry.touched_seq = seq;
        self.frequency.insert(entry.frequency_key());
        self.recency.promote(key);
        self.entries.get(key)
    }

    fn victim(&self, policy: EvictionPolicy) -> Option<String> {
        if let Some(key) = &self.oversized {
            return Some(key.clone());
        }
        match policy {
            EvictionPolicy::Lru => self.least_recent(),
            EvictionPolicy::Lfu => self.frequency.first().map(|(_, _, key)| key.clone()),
            EvictionPolicy::Fifo => self.insertion.first().map(|(_, key)| key.clone()),
            EvictionPolicy::Ttl => self
                .expiry
                .first()
                .map(|(_, _, key)| key.clone())
                .or_else(|| self.least_recent()),
        }
    }

    fn least_recent(&self) -> Option<String> {
        self.recency.peek_lru().map(|(key, _)| key.clone())
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Bounded key-value cache with LRU, LFU, FIFO or TTL-first eviction.
///
/// All methods take `&self`; a single mutex guards the entries and every
/// ordering index, so each call observes and leaves a consistent state.
pub struct Cache<V> {
    policy: EvictionPolicy,
    max_entries: usize,
    max_size_bytes: usize,
    default_ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone + Serialize> Cache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache that reads time from `clock`
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let default_ttl =
            (config.default_ttl_secs > 0).then(|| Duration::from_secs(config.default_ttl_secs));
        Self {
            policy: config.policy,
            max_entries: config.max_entries.max(1),
            max_size_bytes: config.max_size_bytes,
            default_ttl,
            clock,
            state: Mutex::new(CacheState::new()),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Look up a live entry, counting a hit or a miss
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if !state.is_live(key, now) {
            state.metrics.record_miss();
            return None;
        }
        state.metrics.record_hit();
        state.touch(key, now).map(|entry| entry.value.clone())
    }

    /// Store `value` under `key`, evicting as needed to stay within bounds.
    ///
    /// A value larger than the whole size budget is still stored, alone, and
    /// is the first entry evicted by the next write.
    pub fn set(&self, key: impl Into<String>, value: V, options: SetOptions) {
        let key = key.into();
        let now = self.clock.now();
        let size_bytes = estimate_size(&value);
        let ttl = options.ttl.or(self.default_ttl);

        let mut state = self.state.lock();
        state.remove(&key);
        state.expire_due(now);

        while !state.entries.is_empty()
            && (state.entries.len() >= self.max_entries
                || state.size_bytes + size_bytes > self.max_size_bytes)
        {
            let Some(victim) = state.victim(self.policy) else {
                break;
            };
            state.remove(&victim);
            state.metrics.record_eviction();
            debug!(key = %victim, policy = %self.policy, "Evicted cache entry");
        }

        if size_bytes > self.max_size_bytes {
            warn!(
                key = %key,
                size_bytes,
                max_size_bytes = self.max_size_bytes,
                "Cache entry larger than the size budget"
            );
            state.oversized = Some(key.clone());
        }

        let seq = state.next_seq();
        state.insert(CacheEntry {
            key,
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
            size_bytes,
            tags: options.tags,
            inserted_seq: seq,
            touched_seq: seq,
        });
    }

    /// Whether a live entry exists; does not count as an access
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.state.lock().is_live(key, now)
    }

    /// Remove an entry, returning whether one was stored
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Remove every entry; counters are kept
    pub fn clear(&self) {
        self.state.lock().clear();
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let removed = self.state.lock().expire_due(now);
        if removed > 0 {
            debug!(removed, "Pruned expired cache entries");
        }
        removed
    }

    /// Live entries carrying `tag`, ordered by key
    pub fn get_by_tag(&self, tag: &str) -> Vec<(String, V)> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let keys = state.tag_index.get(tag).cloned().unwrap_or_default();

        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if !state.is_live(&key, now) {
                continue;
            }
            if let Some(entry) = state.entries.get(&key) {
                found.push((key, entry.value.clone()));
            }
        }
        found
    }

    /// Remove every entry carrying `tag`, returning how many were removed
    pub fn delete_by_tag(&self, tag: &str) -> usize {
        let mut state = self.state.lock();
        let keys = state.tag_index.get(tag).cloned().unwrap_or_default();
        keys.iter().filter(|key| state.remove(key).is_some()).count()
    }

    /// Keys of live entries, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats::from_metrics(&state.metrics, state.entries.len(), state.size_bytes)
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// `compute` runs without the lock held, so concurrent callers may both
    /// compute; the last write wins.
    pub fn get_or_insert_with<F>(&self, key: &str, options: SetOptions, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute();
        self.set(key, value.clone(), options);
        value
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with); errors are
    /// returned and nothing is cached.
    pub fn try_get_or_insert_with<F, E>(
        &self,
        key: &str,
        options: SetOptions,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute()?;
        self.set(key, value.clone(), options);
        Ok(value)
    }
}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("policy", &self.policy)
            .field("max_entries", &self.max_entries)
            .field("max_size_bytes", &self.max_size_bytes)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
