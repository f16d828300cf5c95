//! Read-through behaviour of the catalog service across both tiers.

mod support;

use std::time::Duration;

use catalog_cache::application::{CatalogError, ProductQuery};
use catalog_cache::cache::{CacheConfig, RemoteHealth};
use catalog_cache::domain::types::SortField;
use futures::future::join_all;
use uuid::Uuid;

use support::{category, harness, product};

fn tiered_config() -> CacheConfig {
    CacheConfig {
        l1_ttl_secs: 5,
        l2_ttl_secs: 60,
        ..Default::default()
    }
}

#[tokio::test]
async fn sequential_reads_load_origin_once() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(CacheConfig::default(), vec![amp.clone()]);

    for _ in 0..5 {
        let found = h.service.get_by_id(id).await.expect("product");
        assert_eq!(found, amp);
    }

    assert_eq!(h.origin.load_count(), 1);
    let stats = h.service.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.l1_hits, 4);
    assert_eq!(stats.origin_loads, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_reads_share_one_origin_load() {
    let h = harness(
        CacheConfig::default(),
        vec![product("Tube Amp", 129_900), product("Ribbon Mic", 80_000)],
    );
    h.origin.set_latency(Duration::from_millis(50));

    let query = ProductQuery {
        sort_by: Some(SortField::PriceCents),
        ..Default::default()
    };
    let results = join_all((0..32).map(|_| h.service.list_products(&query))).await;

    assert_eq!(h.origin.load_count(), 1);
    let first = results[0].as_ref().expect("listing");
    assert_eq!(first.total, 2);
    for result in &results {
        assert_eq!(result.as_ref().expect("listing"), first);
    }
    assert_eq!(h.service.stats().coalesced_waiters, 31);
}

#[tokio::test]
async fn equivalent_queries_share_an_entry() {
    let h = harness(CacheConfig::default(), vec![product("Tube Amp", 129_900)]);

    let implicit = ProductQuery::default();
    let explicit = ProductQuery {
        page: Some(1),
        page_size: Some(20),
        search: Some("  ".to_string()),
        ..Default::default()
    };

    h.service.list_products(&implicit).await.expect("listing");
    h.service.list_products(&explicit).await.expect("listing");

    assert_eq!(h.origin.load_count(), 1);
}

#[tokio::test]
async fn tiered_ttl_scenario() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(tiered_config(), vec![amp]);

    // t=0: both tiers populated.
    h.service.get_by_id(id).await.expect("product");
    assert_eq!(h.origin.load_count(), 1);

    // t=3: L1 hit.
    h.clock.advance(Duration::from_secs(3));
    h.service.get_by_id(id).await.expect("product");
    assert_eq!(h.origin.load_count(), 1);
    assert_eq!(h.service.stats().l1_hits, 1);

    // t=10: L1 expired, L2 answers and refills L1.
    h.clock.advance(Duration::from_secs(7));
    h.service.get_by_id(id).await.expect("product");
    assert_eq!(h.origin.load_count(), 1);
    assert_eq!(h.service.stats().l2_hits, 1);

    h.clock.advance(Duration::from_secs(1));
    h.service.get_by_id(id).await.expect("product");
    assert_eq!(h.service.stats().l1_hits, 2);

    // t=70: both expired.
    h.clock.advance(Duration::from_secs(59));
    h.service.get_by_id(id).await.expect("product");
    assert_eq!(h.origin.load_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn coalesced_failure_reaches_every_waiter_and_is_not_cached() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(CacheConfig::default(), vec![amp.clone()]);
    h.origin.set_latency(Duration::from_millis(50));
    h.origin.fail_next(1);

    let results = join_all((0..5).map(|_| h.service.get_by_id(id))).await;
    for result in &results {
        let error = result.as_ref().expect_err("origin failure");
        assert!(error.is_origin_unavailable(), "unexpected error: {error}");
    }
    assert_eq!(h.origin.load_count(), 1);
    assert_eq!(h.service.health().await.loads_in_flight, 0);

    let recovered = h.service.get_by_id(id).await.expect("product");
    assert_eq!(recovered, amp);
    assert_eq!(h.origin.load_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_origin_times_out_as_unavailable() {
    let config = CacheConfig {
        load_timeout_ms: 100,
        ..Default::default()
    };
    let h = harness(config, vec![]);
    h.origin.set_latency(Duration::from_secs(30));

    let error = h
        .service
        .list_categories()
        .await
        .expect_err("load should time out");

    assert_eq!(
        error,
        CatalogError::CoalescingTimeout {
            budget: Duration::from_millis(100)
        }
    );
    assert!(error.is_origin_unavailable());
}

#[tokio::test]
async fn not_found_is_not_cached() {
    let h = harness(CacheConfig::default(), vec![]);
    let missing = Uuid::new_v4();

    for _ in 0..2 {
        let error = h.service.get_by_id(missing).await.expect_err("absent");
        assert_eq!(error, CatalogError::not_found("product"));
    }
    assert_eq!(h.origin.load_count(), 2);
    assert!(h.local.is_empty());
    assert!(h.transport.is_empty());
}

#[tokio::test]
async fn slug_lookups_are_cached_separately() {
    let amp = product("Tube Amp", 129_900);
    let h = harness(CacheConfig::default(), vec![amp.clone()]);

    let by_slug = h.service.get_by_slug("tube-amp").await.expect("product");
    let by_id = h.service.get_by_id(amp.id).await.expect("product");
    h.service.get_by_slug("tube-amp").await.expect("product");

    assert_eq!(by_slug, by_id);
    assert_eq!(h.origin.load_count(), 2);
}

#[tokio::test]
async fn categories_use_their_own_ttl() {
    let h = harness(tiered_config(), vec![]);
    h.origin
        .replace_categories(vec![category("Amplifiers"), category("Microphones")]);

    let categories = h.service.list_categories().await.expect("categories");
    assert_eq!(categories.len(), 2);

    // Past the product L2 TTL but inside the category TTL.
    h.clock.advance(Duration::from_secs(120));
    h.service.list_categories().await.expect("categories");
    assert_eq!(h.origin.load_count(), 1);

    h.clock.advance(Duration::from_secs(300));
    h.service.list_categories().await.expect("categories");
    assert_eq!(h.origin.load_count(), 2);
}

#[tokio::test]
async fn l2_outage_degrades_to_origin() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let config = CacheConfig {
        enable_l1_cache: false,
        ..Default::default()
    };
    let h = harness(config, vec![amp.clone()]);
    h.transport.set_available(false);

    for _ in 0..3 {
        assert_eq!(h.service.get_by_id(id).await.expect("product"), amp);
    }
    assert_eq!(h.origin.load_count(), 3);

    let health = h.service.health().await;
    assert!(matches!(health.l2, RemoteHealth::Unreachable { .. }));
    assert!(!health.l1_enabled);
}

#[tokio::test]
async fn shared_l2_serves_a_second_instance() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let config = CacheConfig::default();
    let first = harness(config.clone(), vec![amp.clone()]);

    first.service.get_by_id(id).await.expect("product");

    // A second process with its own L1 and origin handle, same L2.
    let second_local = std::sync::Arc::new(catalog_cache::cache::LocalCache::new(
        &config,
        first.clock.clone(),
    ));
    let second = catalog_cache::application::CatalogService::new(
        config.clone(),
        second_local,
        catalog_cache::cache::RemoteCache::new(first.transport.clone(), &config),
        first.origin.clone(),
        first.clock.clone(),
    );

    assert_eq!(second.get_by_id(id).await.expect("product"), amp);
    assert_eq!(first.origin.load_count(), 1);
    assert_eq!(second.stats().l2_hits, 1);
}

#[tokio::test]
async fn health_reports_tiers() {
    let h = harness(CacheConfig::default(), vec![product("Tube Amp", 1)]);
    h.service.list_products(&ProductQuery::default()).await.expect("listing");

    let health = h.service.health().await;
    assert!(health.l1_enabled);
    assert_eq!(health.l1_entries, 1);
    assert!(health.l2.is_healthy());
    assert_eq!(health.loads_in_flight, 0);
}
