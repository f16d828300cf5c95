//! Cached catalog queries.
//!
//! Reads go L1 → L2 → coalesced origin load. A successful load writes L2 then
//! L1, but only if no invalidation touched the key's namespace while it was in
//! flight. Both tiers tag entries with the epoch they were loaded under, and
//! reads skip entries older than the current one. Origin failures are never
//! cached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::histogram;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::application::error::CatalogError;
use crate::application::query::ProductQuery;
use crate::application::repos::OriginStore;
use crate::cache::metric_names::METRIC_ORIGIN_LOAD_MS;
use crate::cache::{
    CacheConfig, CacheEntry, CacheInvalidator, CacheKey, CacheStats, Clock, Epoch,
    InvalidationEpochs, InvalidationReport, LocalCache, RemoteCache, RemoteEntry, RemoteHealth,
    RequestCoalescer, StatsRecorder,
};
use crate::domain::entities::{CategoryRecord, ProductPage, ProductRecord};

type OriginFetch = BoxFuture<'static, Result<Bytes, CatalogError>>;

/// Liveness view of the cache stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogHealth {
    pub l1_enabled: bool,
    pub l1_entries: usize,
    pub l2: RemoteHealth,
    pub loads_in_flight: usize,
}

#[derive(Clone)]
pub struct CatalogService {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    local: Arc<LocalCache>,
    remote: RemoteCache,
    origin: Arc<dyn OriginStore>,
    clock: Arc<dyn Clock>,
    epochs: Arc<InvalidationEpochs>,
    coalescer: RequestCoalescer,
    invalidator: CacheInvalidator,
    stats: StatsRecorder,
}

impl CatalogService {
    pub fn new(
        config: CacheConfig,
        local: Arc<LocalCache>,
        remote: RemoteCache,
        origin: Arc<dyn OriginStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let epochs = Arc::new(InvalidationEpochs::new());
        let coalescer = RequestCoalescer::new(config.load_timeout());
        let invalidator =
            CacheInvalidator::new(Arc::clone(&local), remote.clone(), Arc::clone(&epochs));

        Self {
            inner: Arc::new(Inner {
                config,
                local,
                remote,
                origin,
                clock,
                epochs,
                coalescer,
                invalidator,
                stats: StatsRecorder::default(),
            }),
        }
    }

    #[instrument(skip(self, query))]
    pub async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, CatalogError> {
        let normalized = query.normalize();
        let key = CacheKey::normalized_product_list(&normalized);

        self.read_through(key, self.inner.config.l2_ttl(), move |origin| {
            async move {
                let page = origin.query_products(&normalized).await?;
                encode(&page)
            }
            .boxed()
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: Uuid) -> Result<ProductRecord, CatalogError> {
        let key = CacheKey::product_by_id(id);
        let product: ProductRecord = self
            .read_through(key, self.inner.config.l2_ttl(), move |origin| {
                async move {
                    let product = origin
                        .fetch_product_by_id(id)
                        .await?
                        .ok_or_else(|| CatalogError::not_found("product"))?;
                    encode(&product)
                }
                .boxed()
            })
            .await?;

        self.remember_slug(&product);
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn get_by_slug(&self, slug: &str) -> Result<ProductRecord, CatalogError> {
        let key = CacheKey::product_by_slug(slug);
        let owned_slug = slug.to_string();
        let product: ProductRecord = self
            .read_through(key, self.inner.config.l2_ttl(), move |origin| {
                async move {
                    let product = origin
                        .fetch_product_by_slug(&owned_slug)
                        .await?
                        .ok_or_else(|| CatalogError::not_found("product"))?;
                    encode(&product)
                }
                .boxed()
            })
            .await?;

        self.remember_slug(&product);
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<CategoryRecord>, CatalogError> {
        self.read_through(
            CacheKey::category_list(),
            self.inner.config.category_ttl(),
            |origin| {
                async move {
                    let categories = origin.list_categories().await?;
                    encode(&categories)
                }
                .boxed()
            },
        )
        .await
    }

    /// Call after any write that changed product `id`.
    pub async fn invalidate_product(&self, id: Uuid) -> InvalidationReport {
        self.inner.invalidator.invalidate_product(id).await
    }

    /// Like [`CatalogService::invalidate_product`], also purging the given
    /// slugs. Pass the previous slug when a write renamed the product.
    pub async fn invalidate_product_slugs(&self, id: Uuid, slugs: &[String]) -> InvalidationReport {
        self.inner.invalidator.invalidate_product_slugs(id, slugs).await
    }

    pub async fn invalidate_category_list(&self) -> InvalidationReport {
        self.inner.invalidator.invalidate_category_list().await
    }

    pub async fn invalidate_all(&self) -> InvalidationReport {
        self.inner.invalidator.invalidate_all().await
    }

    pub fn stats(&self) -> CacheStats {
        self.inner
            .stats
            .snapshot(self.inner.coalescer.coalesced_total())
    }

    pub async fn health(&self) -> CatalogHealth {
        CatalogHealth {
            l1_enabled: self.inner.config.enable_l1_cache,
            l1_entries: self.inner.local.len(),
            l2: self.inner.remote.health().await,
            loads_in_flight: self.inner.coalescer.in_flight(),
        }
    }

    /// Slug keys of a product read by either lookup must be found again when
    /// only its id is invalidated.
    fn remember_slug(&self, product: &ProductRecord) {
        self.inner.invalidator.remember_slug(product.id, &product.slug);
    }

    async fn read_through<T, F>(
        &self,
        key: CacheKey,
        l2_ttl: Duration,
        fetch: F,
    ) -> Result<T, CatalogError>
    where
        T: DeserializeOwned,
        F: FnOnce(Arc<dyn OriginStore>) -> OriginFetch,
    {
        let inner = &self.inner;

        if let Some(value) = inner.read_local(&key) {
            inner.stats.l1_hit();
            return Ok(value);
        }

        if let Some(value) = inner.read_remote(&key, l2_ttl).await {
            inner.stats.l2_hit();
            return Ok(value);
        }

        inner.stats.miss();
        let loader_inner = Arc::clone(inner);
        let loader_key = key.clone();
        let payload = inner
            .coalescer
            .execute(key.as_str(), move || {
                let fetch = fetch(Arc::clone(&loader_inner.origin));
                async move {
                    loader_inner
                        .load_and_populate(&loader_key, l2_ttl, fetch)
                        .await
                }
            })
            .await?;

        decode(&payload)
    }
}

impl Inner {
    fn read_local<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if !self.config.enable_l1_cache {
            return None;
        }

        let entry = self.local.get(key.as_str())?;
        if !self.epochs.is_current(key.namespace(), entry.stored_at_epoch) {
            self.local.delete(key.as_str());
            return None;
        }

        match decode(&entry.payload) {
            Ok(value) => {
                debug!(cache_key = %key, tier = "l1", "Cache hit");
                Some(value)
            }
            Err(error) => {
                warn!(cache_key = %key, tier = "l1", error = %error, "Evicting unreadable entry");
                self.local.delete(key.as_str());
                None
            }
        }
    }

    async fn read_remote<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        l2_ttl: Duration,
    ) -> Option<T> {
        let epoch = self.epochs.current(key.namespace());
        let entry = self.remote.get(key.as_str()).await?;

        // Loaded before the last invalidation and not yet retracted.
        if entry.stored_at_epoch < epoch {
            debug!(
                cache_key = %key,
                tier = "l2",
                stored_at_epoch = entry.stored_at_epoch,
                epoch,
                "Ignoring entry written under an older epoch"
            );
            return None;
        }

        match decode(&entry.payload) {
            Ok(value) => {
                debug!(cache_key = %key, tier = "l2", "Cache hit");
                self.write_local(key, entry.payload, epoch, l2_ttl);
                Some(value)
            }
            Err(error) => {
                warn!(cache_key = %key, tier = "l2", error = %error, "Evicting unreadable entry");
                self.remote.delete(key.as_str()).await;
                None
            }
        }
    }

    /// Runs inside the coalesced load task; completes even if every caller
    /// has gone away.
    async fn load_and_populate(
        &self,
        key: &CacheKey,
        l2_ttl: Duration,
        fetch: OriginFetch,
    ) -> Result<Bytes, CatalogError> {
        let namespace = key.namespace();
        let epoch = self.epochs.current(namespace);

        self.stats.origin_load();
        let started = Instant::now();
        let result = fetch.await;
        histogram!(METRIC_ORIGIN_LOAD_MS, "namespace" => namespace.as_str())
            .record(started.elapsed().as_secs_f64() * 1000.0);

        let payload = match result {
            Ok(payload) => payload,
            Err(error) => {
                if error.is_origin_unavailable() {
                    warn!(cache_key = %key, error = %error, "Origin load failed");
                } else {
                    debug!(cache_key = %key, error = %error, "Origin load returned no value");
                }
                return Err(error);
            }
        };

        self.populate(key, payload.clone(), epoch, l2_ttl).await;
        Ok(payload)
    }

    async fn populate(&self, key: &CacheKey, payload: Bytes, epoch: Epoch, l2_ttl: Duration) {
        let namespace = key.namespace();
        if !self.epochs.is_current(namespace, epoch) {
            self.stats.stale_write_rejected();
            debug!(cache_key = %key, epoch, "Skipping write-back of load raced by invalidation");
            return;
        }

        self.remote
            .set(key.as_str(), &RemoteEntry::new(payload.clone(), epoch), l2_ttl)
            .await;
        self.write_local(key, payload, epoch, l2_ttl);

        // An invalidation may have run its deletes while we were writing.
        if !self.epochs.is_current(namespace, epoch) {
            self.stats.stale_write_rejected();
            self.local.delete(key.as_str());
            self.remote.delete(key.as_str()).await;
            debug!(cache_key = %key, epoch, "Retracted write-back raced by invalidation");
        }
    }

    fn write_local(&self, key: &CacheKey, payload: Bytes, epoch: Epoch, l2_ttl: Duration) {
        if !self.config.enable_l1_cache {
            return;
        }

        let expires_at = self.clock.now() + self.config.l1_ttl_for(l2_ttl);
        self.local
            .set(key.as_str(), CacheEntry::new(payload, epoch, expires_at));

        if !self.epochs.is_current(key.namespace(), epoch) {
            self.local.delete(key.as_str());
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, CatalogError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CatalogError> {
    Ok(serde_json::from_slice(payload)?)
}
