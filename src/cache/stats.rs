//! Cache counters.
//!
//! Every counter is mirrored into the `metrics` facade and kept locally so
//! callers can read a snapshot without an exporter installed.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

pub const METRIC_L1_HIT: &str = "catalog_cache_l1_hit_total";
pub const METRIC_L1_MISS: &str = "catalog_cache_l1_miss_total";
pub const METRIC_L1_EVICT: &str = "catalog_cache_l1_evict_total";
pub const METRIC_L2_HIT: &str = "catalog_cache_l2_hit_total";
pub const METRIC_L2_MISS: &str = "catalog_cache_l2_miss_total";
pub const METRIC_L2_ERROR: &str = "catalog_cache_l2_error_total";
pub const METRIC_ORIGIN_LOAD: &str = "catalog_cache_origin_load_total";
pub const METRIC_ORIGIN_LOAD_MS: &str = "catalog_cache_origin_load_ms";
pub const METRIC_COALESCED: &str = "catalog_cache_coalesced_total";
pub const METRIC_STALE_WRITE_REJECTED: &str = "catalog_cache_stale_write_rejected_total";
pub const METRIC_INVALIDATION: &str = "catalog_cache_invalidation_total";
pub const METRIC_INVALIDATION_MS: &str = "catalog_cache_invalidation_ms";

/// Point-in-time view of the read path counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub origin_loads: u64,
    pub coalesced_waiters: u64,
    pub stale_writes_rejected: u64,
    /// Share of reads answered by either tier, in percent.
    pub hit_rate: f64,
}

#[derive(Default)]
pub(crate) struct StatsRecorder {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    origin_loads: AtomicU64,
    stale_writes_rejected: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn origin_load(&self) {
        self.origin_loads.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_ORIGIN_LOAD).increment(1);
    }

    pub(crate) fn stale_write_rejected(&self) {
        self.stale_writes_rejected.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_STALE_WRITE_REJECTED).increment(1);
    }

    /// `coalesced_waiters` is owned by the coalescer and passed in.
    pub(crate) fn snapshot(&self, coalesced_waiters: u64) -> CacheStats {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let reads = l1_hits + l2_hits + misses;
        let hit_rate = if reads == 0 {
            0.0
        } else {
            (l1_hits + l2_hits) as f64 / reads as f64 * 100.0
        };

        CacheStats {
            l1_hits,
            l2_hits,
            misses,
            origin_loads: self.origin_loads.load(Ordering::Relaxed),
            coalesced_waiters,
            stale_writes_rejected: self.stale_writes_rejected.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}
