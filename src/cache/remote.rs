//! L2: shared distributed cache.
//!
//! [`DistributedTransport`] is the raw wire seam. [`RemoteCache`] wraps a
//! transport with the key prefix and a per-call timeout, and turns every
//! transport failure into a miss or a no-op. The read path never fails
//! because L2 did.
//!
//! Values travel as a [`RemoteEntry`] frame: a version byte, the epoch the
//! payload was loaded under (big-endian `u64`), then the payload itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::epoch::Epoch;
use super::stats::{METRIC_L2_ERROR, METRIC_L2_HIT, METRIC_L2_MISS};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport connection failed: {0}")]
    Connection(String),
    #[error("transport command failed: {0}")]
    Command(String),
    #[error("transport call exceeded {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Byte-oriented key/value store shared between processes.
#[async_trait]
pub trait DistributedTransport: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, TransportError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), TransportError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), TransportError>;

    /// Delete every key starting with `prefix`; returns how many were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, TransportError>;

    async fn ping(&self) -> Result<(), TransportError>;
}

const FRAME_VERSION: u8 = 1;
const FRAME_HEADER_LEN: usize = 1 + size_of::<u64>();

/// A payload as stored in L2, tagged with the epoch it was loaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub payload: Bytes,
    pub stored_at_epoch: Epoch,
}

impl RemoteEntry {
    pub fn new(payload: Bytes, stored_at_epoch: Epoch) -> Self {
        Self {
            payload,
            stored_at_epoch,
        }
    }

    fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        frame.put_u8(FRAME_VERSION);
        frame.put_u64(self.stored_at_epoch);
        frame.put_slice(&self.payload);
        frame.freeze()
    }

    fn decode(frame: Bytes) -> Option<Self> {
        if frame.len() < FRAME_HEADER_LEN || frame[0] != FRAME_VERSION {
            return None;
        }
        let epoch_bytes: [u8; 8] = frame[1..FRAME_HEADER_LEN].try_into().ok()?;
        Some(Self {
            stored_at_epoch: u64::from_be_bytes(epoch_bytes),
            payload: frame.slice(FRAME_HEADER_LEN..),
        })
    }
}

/// Reachability of the L2 tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteHealth {
    Disabled,
    Healthy,
    Unreachable { reason: String },
}

impl RemoteHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, RemoteHealth::Healthy)
    }
}

#[derive(Clone)]
pub struct RemoteCache {
    transport: Option<Arc<dyn DistributedTransport>>,
    key_prefix: String,
    timeout: Duration,
}

impl RemoteCache {
    /// Wrap `transport`; yields a disabled tier when L2 is switched off.
    pub fn new(transport: Arc<dyn DistributedTransport>, config: &CacheConfig) -> Self {
        if !config.enable_l2_cache {
            return Self::disabled();
        }

        Self {
            transport: Some(transport),
            key_prefix: config.l2_key_prefix.clone(),
            timeout: config.l2_timeout(),
        }
    }

    /// A tier that always misses and accepts every write silently.
    pub fn disabled() -> Self {
        Self {
            transport: None,
            key_prefix: String::new(),
            timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<RemoteEntry> {
        let transport = self.transport.as_ref()?;
        let full_key = self.full_key(key);

        match self.bounded(transport.get(&full_key)).await {
            Ok(Some(frame)) => match RemoteEntry::decode(frame) {
                Some(entry) => {
                    counter!(METRIC_L2_HIT).increment(1);
                    Some(entry)
                }
                None => {
                    counter!(METRIC_L2_MISS).increment(1);
                    warn!(cache_key = key, "Ignoring L2 value with an unknown frame");
                    None
                }
            },
            Ok(None) => {
                counter!(METRIC_L2_MISS).increment(1);
                None
            }
            Err(error) => {
                record_failure("get", key, &error);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, entry: &RemoteEntry, ttl: Duration) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let full_key = self.full_key(key);

        if let Err(error) = self.bounded(transport.set(&full_key, entry.encode(), ttl)).await {
            record_failure("set", key, &error);
        }
    }

    /// Returns false when the tier could not confirm the delete.
    pub async fn delete(&self, key: &str) -> bool {
        let Some(transport) = self.transport.as_ref() else {
            return true;
        };
        let full_key = self.full_key(key);

        match self.bounded(transport.delete(&full_key)).await {
            Ok(()) => true,
            Err(error) => {
                record_failure("delete", key, &error);
                false
            }
        }
    }

    /// Returns the removed count, or `None` when the purge failed.
    pub async fn delete_by_prefix(&self, prefix: &str) -> Option<u64> {
        let Some(transport) = self.transport.as_ref() else {
            return Some(0);
        };
        let full_prefix = self.full_key(prefix);

        // SCAN-based purges walk the whole keyspace; the timeout scales with it.
        match self
            .bounded_for(self.timeout * 10, transport.delete_by_prefix(&full_prefix))
            .await
        {
            Ok(removed) => {
                debug!(prefix, removed, "L2 prefix purge finished");
                Some(removed)
            }
            Err(error) => {
                record_failure("delete_by_prefix", prefix, &error);
                None
            }
        }
    }

    pub async fn health(&self) -> RemoteHealth {
        let Some(transport) = self.transport.as_ref() else {
            return RemoteHealth::Disabled;
        };

        match self.bounded(transport.ping()).await {
            Ok(()) => RemoteHealth::Healthy,
            Err(error) => RemoteHealth::Unreachable {
                reason: error.to_string(),
            },
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        self.bounded_for(self.timeout, call).await
    }

    async fn bounded_for<T>(
        &self,
        limit: Duration,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }
}

fn record_failure(op: &'static str, key: &str, error: &TransportError) {
    counter!(METRIC_L2_ERROR, "op" => op).increment(1);
    warn!(
        op,
        cache_key = key,
        error = %error,
        "L2 call failed; continuing without it"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::infra::memory::MemoryTransport;

    /// Transport whose calls never complete.
    struct HangingTransport;

    #[async_trait]
    impl DistributedTransport for HangingTransport {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, TransportError> {
            futures::future::pending().await
        }

        async fn set(&self, _: &str, _: Bytes, _: Duration) -> Result<(), TransportError> {
            futures::future::pending().await
        }

        async fn delete(&self, _key: &str) -> Result<(), TransportError> {
            futures::future::pending().await
        }

        async fn delete_by_prefix(&self, _prefix: &str) -> Result<u64, TransportError> {
            futures::future::pending().await
        }

        async fn ping(&self) -> Result<(), TransportError> {
            futures::future::pending().await
        }
    }

    /// Transport that fails every call and records the keys it saw.
    #[derive(Default)]
    struct FailingTransport {
        calls: AtomicUsize,
        last_key: std::sync::Mutex<Option<String>>,
    }

    impl FailingTransport {
        fn fail(&self, key: &str) -> TransportError {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_key.lock().expect("last key lock") = Some(key.to_string());
            TransportError::Connection("connection refused".to_string())
        }
    }

    #[async_trait]
    impl DistributedTransport for FailingTransport {
        async fn get(&self, key: &str) -> Result<Option<Bytes>, TransportError> {
            Err(self.fail(key))
        }

        async fn set(&self, key: &str, _: Bytes, _: Duration) -> Result<(), TransportError> {
            Err(self.fail(key))
        }

        async fn delete(&self, key: &str) -> Result<(), TransportError> {
            Err(self.fail(key))
        }

        async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, TransportError> {
            Err(self.fail(prefix))
        }

        async fn ping(&self) -> Result<(), TransportError> {
            Err(self.fail(""))
        }
    }

    fn entry(payload: &'static [u8], epoch: Epoch) -> RemoteEntry {
        RemoteEntry::new(Bytes::from_static(payload), epoch)
    }

    fn config() -> CacheConfig {
        CacheConfig {
            l2_timeout_ms: 100,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_transport_is_a_bounded_miss() {
        let remote = RemoteCache::new(Arc::new(HangingTransport), &config());

        let started = tokio::time::Instant::now();
        assert!(remote.get("products:id:1").await.is_none());
        assert!(started.elapsed() <= Duration::from_millis(150));

        remote
            .set("products:id:1", &entry(b"x", 0), Duration::from_secs(1))
            .await;
        assert!(!remote.delete("products:id:1").await);
        assert!(remote.delete_by_prefix("products:list:").await.is_none());
        assert!(matches!(
            remote.health().await,
            RemoteHealth::Unreachable { .. }
        ));
    }

    #[tokio::test]
    async fn failing_transport_is_swallowed_and_prefixed() {
        let transport = Arc::new(FailingTransport::default());
        let remote = RemoteCache::new(transport.clone(), &config());

        assert!(remote.get("products:id:1").await.is_none());
        assert_eq!(
            transport.last_key.lock().expect("last key lock").as_deref(),
            Some("catalog:products:id:1")
        );

        remote
            .set("products:id:1", &entry(b"x", 0), Duration::from_secs(1))
            .await;
        assert!(!remote.delete("products:id:1").await);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disabled_tier_misses_without_calling_transport() {
        let transport = Arc::new(FailingTransport::default());
        let config = CacheConfig {
            enable_l2_cache: false,
            ..config()
        };
        let remote = RemoteCache::new(transport.clone(), &config);

        assert!(!remote.is_enabled());
        assert!(remote.get("products:id:1").await.is_none());
        assert!(remote.delete("products:id:1").await);
        assert_eq!(remote.delete_by_prefix("products:").await, Some(0));
        assert_eq!(remote.health().await, RemoteHealth::Disabled);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn entries_keep_their_epoch_through_the_transport() {
        let clock = Arc::new(ManualClock::default());
        let transport = Arc::new(MemoryTransport::new(clock));
        let remote = RemoteCache::new(transport.clone(), &config());

        remote
            .set("products:id:1", &entry(b"{\"price\":1}", 7), Duration::from_secs(60))
            .await;

        let stored = remote.get("products:id:1").await.expect("stored entry");
        assert_eq!(stored.stored_at_epoch, 7);
        assert_eq!(stored.payload, Bytes::from_static(b"{\"price\":1}"));
    }

    #[tokio::test]
    async fn unframed_values_read_as_misses() {
        let clock = Arc::new(ManualClock::default());
        let transport = Arc::new(MemoryTransport::new(clock));
        let remote = RemoteCache::new(transport.clone(), &config());

        transport
            .set("catalog:products:id:1", Bytes::from_static(b"{}"), Duration::from_secs(60))
            .await
            .expect("set");
        transport
            .set("catalog:products:id:2", Bytes::new(), Duration::from_secs(60))
            .await
            .expect("set");

        assert!(remote.get("products:id:1").await.is_none());
        assert!(remote.get("products:id:2").await.is_none());
    }
}
