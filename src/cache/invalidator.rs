//! Write-side cache invalidation.
//!
//! Every invalidation advances the epochs of the namespaces it touches first
//! and only then deletes, so a load already in flight cannot write its result
//! back after the delete has run.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use metrics::{counter, histogram};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::epoch::InvalidationEpochs;
use super::keys::{CacheKey, Namespace};
use super::local::LocalCache;
use super::remote::RemoteCache;
use super::stats::{METRIC_INVALIDATION, METRIC_INVALIDATION_MS};
use crate::domain::entities::ProductRecord;

/// What one invalidation touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Entries removed from L1.
    pub local_removed: usize,
    /// Entries L2 reported removed.
    pub remote_removed: u64,
    /// False when any L2 delete could not be confirmed. Whatever survived
    /// expires with its TTL.
    pub remote_complete: bool,
}

impl InvalidationReport {
    fn new() -> Self {
        Self {
            remote_complete: true,
            ..Default::default()
        }
    }

    async fn delete_key(&mut self, local: &LocalCache, remote: &RemoteCache, key: &CacheKey) {
        if local.delete(key.as_str()) {
            self.local_removed += 1;
        }
        if !remote.delete(key.as_str()).await {
            self.remote_complete = false;
        }
    }

    async fn purge_prefix(&mut self, local: &LocalCache, remote: &RemoteCache, prefix: &str) {
        self.local_removed += local.delete_by_prefix(prefix);
        match remote.delete_by_prefix(prefix).await {
            Some(removed) => self.remote_removed += removed,
            None => self.remote_complete = false,
        }
    }
}

#[derive(Clone)]
pub struct CacheInvalidator {
    local: Arc<LocalCache>,
    remote: RemoteCache,
    epochs: Arc<InvalidationEpochs>,
    /// Slugs each product has been served under by this process.
    served_slugs: Arc<DashMap<Uuid, Vec<String>>>,
}

impl CacheInvalidator {
    pub fn new(local: Arc<LocalCache>, remote: RemoteCache, epochs: Arc<InvalidationEpochs>) -> Self {
        Self {
            local,
            remote,
            epochs,
            served_slugs: Arc::new(DashMap::new()),
        }
    }

    /// Record that product `id` was served under `slug`, so invalidating the
    /// id also purges the slug key.
    pub fn remember_slug(&self, id: Uuid, slug: &str) {
        let known = self
            .served_slugs
            .get(&id)
            .is_some_and(|slugs| slugs.iter().any(|known| known == slug));
        if known {
            return;
        }

        let mut slugs = self.served_slugs.entry(id).or_default();
        if !slugs.iter().any(|known| known == slug) {
            slugs.push(slug.to_string());
        }
    }

    /// Invalidate everything derived from product `id`.
    ///
    /// Slug keys are found through the slugs this process served the product
    /// under and any cached copy of it. Callers that know a slug the cache
    /// may not have seen (another instance's reads, a slug that just changed)
    /// should use [`CacheInvalidator::invalidate_product_slugs`].
    pub async fn invalidate_product(&self, id: Uuid) -> InvalidationReport {
        self.invalidate_product_slugs(id, &[]).await
    }

    #[instrument(skip(self, slugs), fields(product_id = %id))]
    pub async fn invalidate_product_slugs(&self, id: Uuid, slugs: &[String]) -> InvalidationReport {
        let started = Instant::now();

        // Collect slugs before anything is deleted.
        let id_key = CacheKey::product_by_id(id);
        let mut known_slugs: Vec<String> = slugs.to_vec();
        let served = self
            .served_slugs
            .remove(&id)
            .map(|(_, served)| served)
            .unwrap_or_default();
        let cached = self.cached_slug(&id_key).await;
        for slug in served.into_iter().chain(cached) {
            if !known_slugs.contains(&slug) {
                known_slugs.push(slug);
            }
        }

        for namespace in Namespace::PRODUCTS {
            self.epochs.bump(namespace);
        }

        let mut report = InvalidationReport::new();
        report.delete_key(&self.local, &self.remote, &id_key).await;
        for slug in &known_slugs {
            let slug_key = CacheKey::product_by_slug(slug);
            report.delete_key(&self.local, &self.remote, &slug_key).await;
        }
        report
            .purge_prefix(
                &self.local,
                &self.remote,
                &Namespace::ProductList.prefix(),
            )
            .await;

        self.finish("product", started, &report);
        info!(
            slugs = known_slugs.len(),
            local_removed = report.local_removed,
            remote_complete = report.remote_complete,
            "Product invalidated"
        );
        report
    }

    #[instrument(skip(self))]
    pub async fn invalidate_category_list(&self) -> InvalidationReport {
        let started = Instant::now();
        self.epochs.bump(Namespace::CategoryList);

        let mut report = InvalidationReport::new();
        report
            .purge_prefix(
                &self.local,
                &self.remote,
                &Namespace::CategoryList.prefix(),
            )
            .await;

        self.finish("categories", started, &report);
        info!(
            local_removed = report.local_removed,
            remote_complete = report.remote_complete,
            "Category list invalidated"
        );
        report
    }

    /// Drop every cached catalog entry in both tiers.
    #[instrument(skip(self))]
    pub async fn invalidate_all(&self) -> InvalidationReport {
        let started = Instant::now();
        for namespace in Namespace::ALL {
            self.epochs.bump(namespace);
        }
        self.served_slugs.clear();

        let mut report = InvalidationReport::new();
        for namespace in Namespace::ALL {
            report
                .purge_prefix(&self.local, &self.remote, &namespace.prefix())
                .await;
        }

        self.finish("all", started, &report);
        info!(
            local_removed = report.local_removed,
            remote_removed = report.remote_removed,
            remote_complete = report.remote_complete,
            "Catalog cache cleared"
        );
        report
    }

    async fn cached_slug(&self, id_key: &CacheKey) -> Option<String> {
        let payload: Bytes = match self.local.peek(id_key.as_str()) {
            Some(entry) => entry.payload,
            None => self.remote.get(id_key.as_str()).await?.payload,
        };

        match serde_json::from_slice::<ProductRecord>(&payload) {
            Ok(product) => Some(product.slug),
            Err(error) => {
                warn!(
                    cache_key = %id_key,
                    error = %error,
                    "Cached product payload is unreadable; slug keys left to TTL"
                );
                None
            }
        }
    }

    fn finish(&self, scope: &'static str, started: Instant, report: &InvalidationReport) {
        counter!(METRIC_INVALIDATION, "scope" => scope).increment(1);
        histogram!(METRIC_INVALIDATION_MS, "scope" => scope)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if !report.remote_complete {
            warn!(
                scope,
                "L2 invalidation incomplete; surviving entries expire with their TTL"
            );
        }
    }
}
