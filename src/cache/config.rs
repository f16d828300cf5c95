//! Cache configuration.
//!
//! Controls the in-process L1 tier, the distributed L2 tier and the origin
//! load budget. Populated from the `[cache]` section of `catalog-cache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_L1_TTL_SECS: u64 = 5;
const DEFAULT_L1_MAX_ENTRIES: usize = 1_000;
const DEFAULT_L2_TTL_SECS: u64 = 60;
const DEFAULT_L2_TIMEOUT_MS: u64 = 150;
const DEFAULT_LOAD_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CATEGORY_TTL_SECS: u64 = 300;
const DEFAULT_L2_KEY_PREFIX: &str = "catalog:";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the in-process L1 tier.
    pub enable_l1_cache: bool,
    /// Enable the distributed L2 tier.
    pub enable_l2_cache: bool,
    /// L1 time-to-live in seconds. Never exceeds the L2 TTL.
    pub l1_ttl_secs: u64,
    /// Maximum number of entries held in L1.
    pub l1_max_entries: usize,
    /// L2 time-to-live in seconds for product keys.
    pub l2_ttl_secs: u64,
    /// Upper bound for every L2 call, in milliseconds.
    pub l2_timeout_ms: u64,
    /// Budget for one coalesced origin load, in milliseconds.
    pub load_timeout_ms: u64,
    /// L2 time-to-live in seconds for the category list.
    pub category_ttl_secs: u64,
    /// Prefix prepended to every L2 key.
    pub l2_key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_l1_cache: true,
            enable_l2_cache: true,
            l1_ttl_secs: DEFAULT_L1_TTL_SECS,
            l1_max_entries: DEFAULT_L1_MAX_ENTRIES,
            l2_ttl_secs: DEFAULT_L2_TTL_SECS,
            l2_timeout_ms: DEFAULT_L2_TIMEOUT_MS,
            load_timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
            category_ttl_secs: DEFAULT_CATEGORY_TTL_SECS,
            l2_key_prefix: DEFAULT_L2_KEY_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Returns the L1 capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn l1_max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.l1_max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs)
    }

    pub fn category_ttl(&self) -> Duration {
        Duration::from_secs(self.category_ttl_secs)
    }

    /// L1 TTL, capped by the L2 lifetime it is layered over.
    pub fn l1_ttl_for(&self, l2_ttl: Duration) -> Duration {
        Duration::from_secs(self.l1_ttl_secs).min(l2_ttl)
    }

    pub fn l2_timeout(&self) -> Duration {
        Duration::from_millis(self.l2_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}
