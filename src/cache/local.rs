//! L1: bounded in-process cache.
//!
//! Entries are kept in an LRU map guarded by a single lock. TTL is checked on
//! read; an expired entry is dropped the first time somebody looks at it.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::trace;

use super::clock::Clock;
use super::config::CacheConfig;
use super::epoch::Epoch;
use super::lock::{rw_read, rw_write};
use super::stats::{METRIC_L1_EVICT, METRIC_L1_HIT, METRIC_L1_MISS};

const SOURCE: &str = "cache::local";

/// A cached payload together with the epoch it was loaded under.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub stored_at_epoch: Epoch,
    pub expires_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(payload: Bytes, stored_at_epoch: Epoch, expires_at: OffsetDateTime) -> Self {
        Self {
            payload,
            stored_at_epoch,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

pub struct LocalCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl LocalCache {
    /// Create an L1 store sized from the configuration.
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(config.l1_max_entries_non_zero(), clock)
    }

    pub fn with_capacity(capacity: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            clock,
        }
    }

    /// Look up a live entry, promoting it in LRU order.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let lookup = entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.clone()));

        match lookup {
            Some(Some(entry)) => {
                counter!(METRIC_L1_HIT).increment(1);
                Some(entry)
            }
            Some(None) => {
                entries.pop(key);
                trace!(cache_key = key, "L1 entry expired");
                counter!(METRIC_L1_MISS).increment(1);
                None
            }
            None => {
                counter!(METRIC_L1_MISS).increment(1);
                None
            }
        }
    }

    /// Look up a live entry without touching LRU order or metrics.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        rw_read(&self.entries, SOURCE, "peek")
            .peek(key)
            .filter(|entry| !entry.is_expired(now))
            .cloned()
    }

    /// Store an entry, returning the key evicted to make room, if any.
    pub fn set(&self, key: &str, entry: CacheEntry) -> Option<String> {
        let evicted = rw_write(&self.entries, SOURCE, "set")
            .push(key.to_string(), entry)
            .map(|(evicted_key, _)| evicted_key)
            .filter(|evicted_key| evicted_key != key);

        if let Some(evicted_key) = &evicted {
            trace!(cache_key = %evicted_key, "L1 entry evicted for capacity");
            counter!(METRIC_L1_EVICT).increment(1);
        }
        evicted
    }

    pub fn delete(&self, key: &str) -> bool {
        rw_write(&self.entries, SOURCE, "delete").pop(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`; returns how many went.
    pub fn delete_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_by_prefix");
        let matched: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matched {
            entries.pop(key);
        }
        matched.len()
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    /// Number of stored entries, expired ones included until next touched.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
