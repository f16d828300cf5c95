//! In-process adapters.
//!
//! [`MemoryTransport`] stands in for Redis as the L2 tier of a single process;
//! [`MemoryOrigin`] is a reference origin store. Both can be told to fail,
//! and the origin can be slowed down, to exercise the degraded paths.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::query::NormalizedQuery;
use crate::application::repos::{OriginError, OriginStore};
use crate::cache::{Clock, DistributedTransport, TransportError, rw_read, rw_write};
use crate::domain::entities::{CategoryRecord, ProductPage, ProductRecord};
use crate::domain::types::{SortField, SortOrder};

const SOURCE: &str = "infra::memory";

struct StoredValue {
    payload: Bytes,
    expires_at: OffsetDateTime,
}

/// Shared-nothing L2 stand-in with clock-driven expiry.
pub struct MemoryTransport {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    write_latency_ms: AtomicU64,
}

impl MemoryTransport {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            write_latency_ms: AtomicU64::new(0),
        }
    }

    /// Delay applied before every `set` and `delete` takes effect.
    pub fn set_write_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.write_latency_ms.store(millis, Ordering::SeqCst);
    }

    /// While unavailable every call fails with a connection error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// True if `key` (already prefixed) holds a live value.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .is_some_and(|value| value.expires_at > now)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|value| value.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn delay_write(&self) {
        let millis = self.write_latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Connection(
                "memory transport marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl DistributedTransport for MemoryTransport {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, TransportError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(value) if value.expires_at > now => return Ok(Some(value.payload.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), TransportError> {
        self.ensure_available()?;
        self.delay_write().await;
        let expires_at = self.clock.now() + ttl;
        self.entries.insert(
            key.to_string(),
            StoredValue {
                payload: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TransportError> {
        self.ensure_available()?;
        self.delay_write().await;
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, TransportError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut removed = 0u64;
        self.entries.retain(|key, value| {
            if !key.starts_with(prefix) {
                return true;
            }
            if value.expires_at > now {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.ensure_available()
    }
}

/// Reference origin store held in memory.
#[derive(Default)]
pub struct MemoryOrigin {
    products: DashMap<Uuid, ProductRecord>,
    categories: RwLock<Vec<CategoryRecord>>,
    loads: AtomicUsize,
    latency_ms: AtomicU64,
    failures_pending: AtomicUsize,
}

impl MemoryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = ProductRecord>) -> Self {
        let origin = Self::new();
        for product in products {
            origin.upsert_product(product);
        }
        origin
    }

    /// Insert or replace a product. Callers must invalidate the cache after.
    pub fn upsert_product(&self, product: ProductRecord) {
        self.products.insert(product.id, product);
    }

    pub fn remove_product(&self, id: Uuid) -> Option<ProductRecord> {
        self.products.remove(&id).map(|(_, product)| product)
    }

    pub fn replace_categories(&self, categories: Vec<CategoryRecord>) {
        *rw_write(&self.categories, SOURCE, "replace_categories") = categories;
    }

    /// Total number of reads served, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Delay every read by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    async fn begin_read(&self) -> Result<(), OriginError> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let failing = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                pending.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(OriginError::from_persistence("injected origin failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl OriginStore for MemoryOrigin {
    async fn query_products(&self, query: &NormalizedQuery) -> Result<ProductPage, OriginError> {
        self.begin_read().await?;

        let mut matching: Vec<ProductRecord> = self
            .products
            .iter()
            .filter(|entry| matches_query(entry.value(), query))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| compare(a, b, query.sort_by, query.sort_order));

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(query.page_size as usize)
            .collect();

        Ok(ProductPage {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn fetch_product_by_id(&self, id: Uuid) -> Result<Option<ProductRecord>, OriginError> {
        self.begin_read().await?;
        Ok(self.products.get(&id).map(|entry| entry.value().clone()))
    }

    async fn fetch_product_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<ProductRecord>, OriginError> {
        self.begin_read().await?;
        Ok(self
            .products
            .iter()
            .find(|entry| entry.value().slug == slug)
            .map(|entry| entry.value().clone()))
    }

    async fn list_categories(&self) -> Result<Vec<CategoryRecord>, OriginError> {
        self.begin_read().await?;
        let categories = rw_read(&self.categories, SOURCE, "list_categories").clone();
        Ok(categories.into_iter().filter(|c| c.is_active).collect())
    }
}

fn matches_query(product: &ProductRecord, query: &NormalizedQuery) -> bool {
    if let Some(search) = &query.search {
        let in_name = product.name.to_lowercase().contains(search);
        let in_description = product
            .description
            .as_deref()
            .is_some_and(|text| text.to_lowercase().contains(search));
        if !in_name && !in_description {
            return false;
        }
    }
    if query.min_price_cents.is_some_and(|min| product.price_cents < min) {
        return false;
    }
    if query.max_price_cents.is_some_and(|max| product.price_cents > max) {
        return false;
    }
    if query
        .category_id
        .is_some_and(|category| product.category_id != Some(category))
    {
        return false;
    }
    if query.featured.is_some_and(|featured| product.featured != featured) {
        return false;
    }
    if query.active.is_some_and(|active| product.is_active != active) {
        return false;
    }
    true
}

fn compare(a: &ProductRecord, b: &ProductRecord, field: SortField, order: SortOrder) -> CmpOrdering {
    let primary = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::Name => a.name.cmp(&b.name),
        SortField::PriceCents => a.price_cents.cmp(&b.price_cents),
        SortField::ViewCount => a.view_count.cmp(&b.view_count),
    };
    let ordered = match order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    ordered.then_with(|| a.id.cmp(&b.id))
}
