//! Cache entries and per-write options.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Options for a single [`Cache::set`](super::Cache::set) call
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the cache's default TTL when set
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
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
}

/// A stored value plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub ttl: Option<Duration>,
    /// Estimated encoded size of `value`
    pub size_bytes: usize,
    pub tags: BTreeSet<String>,
    /// Write order, used by FIFO
    pub(crate) inserted_seq: u64,
    /// Last write or read, used to break LFU ties
    pub(crate) touched_seq: u64,
}

impl<V> CacheEntry<V> {
    /// When the entry stops being visible.
    ///
    /// `None` without a TTL, or when the TTL reaches past what `Instant` can
    /// represent.
    pub fn expires_at(&self) -> Option<Instant> {
        self.ttl.and_then(|ttl| self.created_at.checked_add(ttl))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    pub(crate) fn frequency_key(&self) -> (u64, u64, String) {
        (self.access_count, self.touched_seq, self.key.clone())
    }

    pub(crate) fn insertion_key(&self) -> (u64, String) {
        (self.inserted_seq, self.key.clone())
    }

    pub(crate) fn expiry_key(&self) -> Option<(Instant, u64, String)> {
        self.expires_at()
            .map(|at| (at, self.inserted_seq, self.key.clone()))
    }
}
