//! Invalidation epochs.
//!
//! Each namespace carries a monotonic counter bumped on every invalidation
//! touching it. A load records the epoch it started under; if the counter has
//! moved by the time the load completes, the result is not written back.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use super::keys::Namespace;

/// Monotonic invalidation counter value.
pub type Epoch = u64;

pub struct InvalidationEpochs {
    counters: [AtomicU64; Namespace::COUNT],
}

impl InvalidationEpochs {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Current epoch of `namespace`.
    pub fn current(&self, namespace: Namespace) -> Epoch {
        self.counters[namespace.index()].load(Ordering::SeqCst)
    }

    /// Advance the epoch of `namespace` and return the new value.
    pub fn bump(&self, namespace: Namespace) -> Epoch {
        let epoch = self.counters[namespace.index()].fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            namespace = %namespace,
            epoch,
            "Invalidation epoch advanced"
        );

        epoch
    }

    /// True when nothing invalidated `namespace` since `observed` was read.
    pub fn is_current(&self, namespace: Namespace, observed: Epoch) -> bool {
        self.current(namespace) == observed
    }
}

impl Default for InvalidationEpochs {
    fn default() -> Self {
        Self::new()
    }
}
