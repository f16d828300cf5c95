//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use catalog_cache::application::CatalogService;
use catalog_cache::cache::{CacheConfig, LocalCache, ManualClock, RemoteCache};
use catalog_cache::domain::entities::{CategoryRecord, ProductRecord};
use catalog_cache::infra::memory::{MemoryOrigin, MemoryTransport};
use time::OffsetDateTime;
use uuid::Uuid;

pub struct Harness {
    pub service: CatalogService,
    pub origin: Arc<MemoryOrigin>,
    pub transport: Arc<MemoryTransport>,
    pub local: Arc<LocalCache>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(config: CacheConfig, products: Vec<ProductRecord>) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let origin = Arc::new(MemoryOrigin::with_products(products));
    let transport = Arc::new(MemoryTransport::new(clock.clone()));
    let local = Arc::new(LocalCache::new(&config, clock.clone()));
    let remote = RemoteCache::new(transport.clone(), &config);
    let service = CatalogService::new(
        config,
        local.clone(),
        remote,
        origin.clone(),
        clock.clone(),
    );

    Harness {
        service,
        origin,
        transport,
        local,
        clock,
    }
}

pub fn product(name: &str, price_cents: i64) -> ProductRecord {
    ProductRecord {
        id: Uuid::new_v4(),
        slug: name.to_lowercase().replace(' ', "-"),
        name: name.to_string(),
        description: Some(format!("{name} with a walnut finish")),
        short_description: None,
        price_cents,
        original_price_cents: None,
        image_url: None,
        category_id: None,
        brand: Some("Northfield".to_string()),
        sku: None,
        stock_quantity: 4,
        featured: false,
        is_active: true,
        view_count: 0,
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn category(name: &str) -> CategoryRecord {
    CategoryRecord {
        id: Uuid::new_v4(),
        slug: name.to_lowercase(),
        name: name.to_string(),
        parent_id: None,
        is_active: true,
    }
}
