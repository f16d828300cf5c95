//! Write-side invalidation and the in-flight load race.

mod support;

use std::time::Duration;

use catalog_cache::application::ProductQuery;
use catalog_cache::cache::{CacheConfig, CacheKey};

use support::{category, harness, product};

#[tokio::test]
async fn invalidate_product_hides_pre_mutation_value() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(CacheConfig::default(), vec![amp.clone()]);

    h.service.get_by_id(id).await.expect("product");
    h.service.get_by_slug("tube-amp").await.expect("product");
    let listing = h
        .service
        .list_products(&ProductQuery::default())
        .await
        .expect("listing");
    assert_eq!(listing.items[0].price_cents, 129_900);

    let mut updated = amp.clone();
    updated.price_cents = 99_900;
    h.origin.upsert_product(updated.clone());
    h.service.invalidate_product(id).await;

    assert_eq!(h.service.get_by_id(id).await.expect("product"), updated);
    assert_eq!(
        h.service.get_by_slug("tube-amp").await.expect("product"),
        updated
    );
    let listing = h
        .service
        .list_products(&ProductQuery::default())
        .await
        .expect("listing");
    assert_eq!(listing.items[0].price_cents, 99_900);
}

#[tokio::test]
async fn renamed_slug_is_purged_when_supplied() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(CacheConfig::default(), vec![amp.clone()]);

    h.service.get_by_slug("tube-amp").await.expect("product");

    let mut renamed = amp.clone();
    renamed.slug = "tube-amp-mk2".to_string();
    h.origin.upsert_product(renamed);
    h.service
        .invalidate_product_slugs(id, &["tube-amp".to_string()])
        .await;

    let slug_key = CacheKey::product_by_slug("tube-amp");
    assert!(h.local.peek(slug_key.as_str()).is_none());
    assert!(!h.transport.contains(&format!("catalog:{slug_key}")));
    assert!(h.service.get_by_slug("tube-amp").await.is_err());
}

#[tokio::test]
async fn slug_only_reads_are_purged_by_id_invalidation() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(CacheConfig::default(), vec![amp.clone()]);

    h.service.get_by_slug("tube-amp").await.expect("product");

    let mut updated = amp.clone();
    updated.price_cents = 99_900;
    h.origin.upsert_product(updated.clone());
    h.service.invalidate_product(id).await;

    let slug_key = CacheKey::product_by_slug("tube-amp");
    assert!(!h.transport.contains(&format!("catalog:{slug_key}")));
    assert_eq!(
        h.service.get_by_slug("tube-amp").await.expect("product"),
        updated
    );
    assert_eq!(h.origin.load_count(), 2);
}

#[tokio::test]
async fn repeated_invalidation_is_idempotent() {
    let h = harness(CacheConfig::default(), vec![]);
    h.origin.replace_categories(vec![category("Amplifiers")]);
    h.service.list_categories().await.expect("categories");

    let first = h.service.invalidate_category_list().await;
    let second = h.service.invalidate_category_list().await;

    assert_eq!(first.local_removed, 1);
    assert_eq!(first.remote_removed, 1);
    assert_eq!(second.local_removed, 0);
    assert_eq!(second.remote_removed, 0);
    assert!(second.remote_complete);

    h.service.list_categories().await.expect("categories");
    assert_eq!(h.origin.load_count(), 2);
}

#[tokio::test]
async fn category_invalidation_leaves_products_cached() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(CacheConfig::default(), vec![amp]);
    h.origin.replace_categories(vec![category("Amplifiers")]);

    h.service.get_by_id(id).await.expect("product");
    h.service.list_categories().await.expect("categories");
    h.service.invalidate_category_list().await;

    h.service.get_by_id(id).await.expect("product");
    assert_eq!(h.origin.load_count(), 2);
}

#[tokio::test]
async fn invalidate_all_forces_fresh_loads() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(CacheConfig::default(), vec![amp]);
    h.origin.replace_categories(vec![category("Amplifiers")]);

    h.service.get_by_id(id).await.expect("product");
    h.service.list_categories().await.expect("categories");

    let report = h.service.invalidate_all().await;
    assert!(report.remote_complete);
    assert!(h.local.is_empty());
    assert!(h.transport.is_empty());

    h.service.get_by_id(id).await.expect("product");
    h.service.list_categories().await.expect("categories");
    assert_eq!(h.origin.load_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn load_raced_by_invalidation_is_not_written_back() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let h = harness(CacheConfig::default(), vec![amp.clone()]);
    h.origin.set_latency(Duration::from_millis(100));

    // t=0: load starts against the old record.
    let reader = {
        let service = h.service.clone();
        tokio::spawn(async move { service.get_by_id(id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // t=50ms: write lands and invalidates while the load is in flight.
    let mut updated = amp.clone();
    updated.price_cents = 99_900;
    h.origin.upsert_product(updated.clone());
    h.service.invalidate_product(id).await;

    // t=100ms: the raced load completes and answers its own caller only.
    reader.await.expect("reader task").expect("product");
    assert_eq!(h.service.stats().stale_writes_rejected, 1);

    let key = CacheKey::product_by_id(id);
    assert!(h.local.peek(key.as_str()).is_none());
    assert!(!h.transport.contains(&format!("catalog:{key}")));

    // Next read misses and loads exactly once more.
    assert_eq!(h.service.get_by_id(id).await.expect("product"), updated);
    assert_eq!(h.origin.load_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_value_still_landing_in_l2_is_not_promoted() {
    let amp = product("Tube Amp", 129_900);
    let id = amp.id;
    let key = CacheKey::product_by_id(id);
    let h = harness(CacheConfig::default(), vec![amp.clone()]);
    h.transport.set_write_latency(Duration::from_millis(100));

    // t=0: load of the old record starts; its L2 write lands at t=100.
    let first = {
        let service = h.service.clone();
        tokio::spawn(async move { service.get_by_id(id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // t=50: write and invalidation; the invalidation's delete lands at t=150.
    let mut updated = amp.clone();
    updated.price_cents = 99_900;
    h.origin.upsert_product(updated.clone());
    let invalidation = {
        let service = h.service.clone();
        tokio::spawn(async move { service.invalidate_product(id).await })
    };
    tokio::time::sleep(Duration::from_millis(55)).await;

    // t=105: the old value sits in L2 and a reader arrives.
    assert!(h.transport.contains(&format!("catalog:{key}")));
    h.service.get_by_id(id).await.expect("product");

    first.await.expect("reader task").expect("product");
    invalidation.await.expect("invalidation task");
    assert_eq!(h.service.stats().stale_writes_rejected, 1);

    // Once everything has settled, no tier serves the old value.
    assert_eq!(h.service.get_by_id(id).await.expect("product"), updated);
    h.clock.advance(Duration::from_secs(1));
    assert_eq!(h.service.get_by_id(id).await.expect("product"), updated);
}

#[tokio::test(start_paused = true)]
async fn other_namespaces_keep_populating_during_invalidation() {
    let h = harness(CacheConfig::default(), vec![product("Tube Amp", 1)]);
    h.origin.replace_categories(vec![category("Amplifiers")]);
    h.origin.set_latency(Duration::from_millis(100));

    let reader = {
        let service = h.service.clone();
        tokio::spawn(async move { service.list_categories().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.service.invalidate_product(uuid::Uuid::new_v4()).await;

    reader.await.expect("reader task").expect("categories");
    assert_eq!(h.service.stats().stale_writes_rejected, 0);

    h.service.list_categories().await.expect("categories");
    assert_eq!(h.origin.load_count(), 1);
}
