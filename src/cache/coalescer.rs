//! Per-key request coalescing.
//!
//! Concurrent misses on the same key share one origin load. The load runs in
//! its own task, so a caller that gives up does not cancel it for the others,
//! and its write-back still happens. The registry entry is removed by the
//! load task itself before any waiter observes the result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use tracing::{debug, error, warn};

use super::lock::mutex_lock;
use super::stats::METRIC_COALESCED;
use crate::application::error::CatalogError;

const SOURCE: &str = "cache::coalescer";

type SharedLoad = Shared<BoxFuture<'static, Result<Bytes, CatalogError>>>;

struct InFlight {
    generation: u64,
    load: SharedLoad,
    waiters: usize,
}

#[derive(Default)]
struct Registry {
    loads: Mutex<HashMap<String, InFlight>>,
    next_generation: AtomicU64,
    joined: AtomicU64,
}

impl Registry {
    /// Drop the entry for `key` if it still belongs to `generation`.
    fn finish(&self, key: &str, generation: u64) {
        let mut loads = mutex_lock(&self.loads, SOURCE, "finish");
        if loads
            .get(key)
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            loads.remove(key);
        }
    }
}

/// Detaches one caller from the load it is waiting on.
struct WaiterGuard<'a> {
    registry: &'a Registry,
    key: &'a str,
    generation: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut loads = mutex_lock(&self.registry.loads, SOURCE, "detach");
        if let Some(in_flight) = loads.get_mut(self.key) {
            if in_flight.generation == self.generation {
                in_flight.waiters = in_flight.waiters.saturating_sub(1);
            }
        }
    }
}

/// Removes the registry entry when the load task ends, panics included.
struct FinishGuard {
    registry: Arc<Registry>,
    key: String,
    generation: u64,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.registry.finish(&self.key, self.generation);
    }
}

#[derive(Clone)]
pub struct RequestCoalescer {
    registry: Arc<Registry>,
    budget: Duration,
}

impl RequestCoalescer {
    /// `budget` bounds each shared load end to end.
    pub fn new(budget: Duration) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            budget,
        }
    }

    /// Run `loader` for `key` unless a load for it is already in flight, in
    /// which case wait for that one instead. Every waiter gets the same result.
    pub async fn execute<F, Fut>(&self, key: &str, loader: F) -> Result<Bytes, CatalogError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, CatalogError>> + Send + 'static,
    {
        let (generation, load) = {
            let mut loads = mutex_lock(&self.registry.loads, SOURCE, "execute");
            match loads.get_mut(key) {
                Some(in_flight) => {
                    in_flight.waiters += 1;
                    self.registry.joined.fetch_add(1, Ordering::Relaxed);
                    counter!(METRIC_COALESCED).increment(1);
                    debug!(
                        cache_key = key,
                        waiters = in_flight.waiters,
                        "Joined in-flight origin load"
                    );
                    (in_flight.generation, in_flight.load.clone())
                }
                None => {
                    let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
                    let load = self.spawn_load(key, generation, loader());
                    loads.insert(
                        key.to_string(),
                        InFlight {
                            generation,
                            load: load.clone(),
                            waiters: 1,
                        },
                    );
                    (generation, load)
                }
            }
        };

        let _waiter = WaiterGuard {
            registry: &self.registry,
            key,
            generation,
        };
        load.await
    }

    /// Number of keys with a load in flight.
    pub fn in_flight(&self) -> usize {
        mutex_lock(&self.registry.loads, SOURCE, "in_flight").len()
    }

    /// Callers that joined a load instead of starting one, since creation.
    pub fn coalesced_total(&self) -> u64 {
        self.registry.joined.load(Ordering::Relaxed)
    }

    /// Callers still waiting on the in-flight load for `key`, if any.
    pub fn waiters(&self, key: &str) -> Option<usize> {
        mutex_lock(&self.registry.loads, SOURCE, "waiters")
            .get(key)
            .map(|in_flight| in_flight.waiters)
    }

    fn spawn_load<Fut>(&self, key: &str, generation: u64, load: Fut) -> SharedLoad
    where
        Fut: Future<Output = Result<Bytes, CatalogError>> + Send + 'static,
    {
        let budget = self.budget;
        let guard = FinishGuard {
            registry: Arc::clone(&self.registry),
            key: key.to_string(),
            generation,
        };

        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(budget, load).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        cache_key = %guard.key,
                        budget_ms = budget.as_millis() as u64,
                        "Origin load exceeded its budget"
                    );
                    Err(CatalogError::CoalescingTimeout { budget })
                }
            };
            drop(guard);
            result
        });

        let key = key.to_string();
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    error!(
                        cache_key = %key,
                        error = %join_error,
                        "Origin load task aborted"
                    );
                    Err(CatalogError::origin_unavailable(format!(
                        "origin load aborted: {join_error}"
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }
}
