//! Catalog read-path cache.
//!
//! Two tiers sit in front of the origin store:
//!
//! - **L1 (local)**: bounded in-process LRU with a short TTL
//! - **L2 (remote)**: shared distributed cache with a longer TTL
//!
//! Misses on both tiers go through a per-key [`RequestCoalescer`] so that a
//! burst of identical requests costs one origin load. Writes are followed by
//! a call into [`CacheInvalidator`], which advances the per-namespace
//! [`InvalidationEpochs`] before deleting so that loads racing the write never
//! repopulate stale data.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enable_l1_cache = true
//! enable_l2_cache = true
//! l1_ttl_secs = 5
//! l2_ttl_secs = 60
//! # ... see config.rs for all options
//! ```

mod clock;
mod coalescer;
mod config;
mod epoch;
mod invalidator;
mod keys;
mod local;
mod lock;
mod remote;
mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coalescer::RequestCoalescer;
pub use config::CacheConfig;
pub use epoch::{Epoch, InvalidationEpochs};
pub use invalidator::{CacheInvalidator, InvalidationReport};
pub use keys::{CacheKey, Namespace};
pub use local::{CacheEntry, LocalCache};
pub use remote::{DistributedTransport, RemoteCache, RemoteEntry, RemoteHealth, TransportError};
pub use stats::CacheStats;

pub(crate) use lock::{rw_read, rw_write};
pub(crate) use stats::StatsRecorder;

/// Metric names emitted by the cache, for exporters to describe.
pub mod metric_names {
    pub use super::stats::{
        METRIC_COALESCED, METRIC_INVALIDATION, METRIC_INVALIDATION_MS, METRIC_L1_EVICT,
        METRIC_L1_HIT, METRIC_L1_MISS, METRIC_L2_ERROR, METRIC_L2_HIT, METRIC_L2_MISS,
        METRIC_ORIGIN_LOAD, METRIC_ORIGIN_LOAD_MS, METRIC_STALE_WRITE_REJECTED,
    };
}
