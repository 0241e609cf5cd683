//! Read-through cache behaviour under contention and failure.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use flashsale_core::{CacheConfig, FastStore, FlashSaleError, keys};
use flashsale_runtime::ReadThroughCache;
use flashsale_testing::{CountingSource, InMemoryFastStore, account};
use std::sync::Arc;
use std::time::Duration;

type Cache = ReadThroughCache<InMemoryFastStore, CountingSource>;

fn cache(store: &InMemoryFastStore, source: &CountingSource, config: CacheConfig) -> Cache {
    ReadThroughCache::new(store.clone(), source.clone(), config)
}

// ============================================================================
// Stampede protection
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_load_once() {
    let store = InMemoryFastStore::new();
    let source = CountingSource::new().with_delay(Duration::from_millis(50));
    source.insert(account(1, 250)).unwrap();
    let cache = Arc::new(cache(
        &store,
        &source,
        CacheConfig::default().with_retry_delay(Duration::from_millis(10)),
    ));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(1).await.unwrap() })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap(), Some(account(1, 250)));
    }
    assert_eq!(source.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_on_missing_entity_load_once() {
    let store = InMemoryFastStore::new();
    let source = CountingSource::new().with_delay(Duration::from_millis(50));
    let cache = Arc::new(cache(
        &store,
        &source,
        CacheConfig::default().with_retry_delay(Duration::from_millis(10)),
    ));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(404).await.unwrap() })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap(), None);
    }
    assert_eq!(source.loads(), 1);
}

#[tokio::test]
async fn held_mutex_falls_back_to_direct_read() {
    let store = InMemoryFastStore::new();
    let source = CountingSource::new();
    source.insert(account(1, 10)).unwrap();
    let cache = cache(
        &store,
        &source,
        CacheConfig::default()
            .with_retry_delay(Duration::from_millis(1))
            .with_max_attempts(3),
    );

    // Another node is repopulating and never finishes.
    store
        .set_if_absent(&keys::mutex_key("user", 1), "other-node", Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(cache.get(1).await.unwrap(), Some(account(1, 10)));
    assert_eq!(source.loads(), 1);
    assert!(store.hash_get_all(&keys::cache_key("user", 1)).await.unwrap().is_empty());
}

// ============================================================================
// Tombstones and invalidation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn tombstone_expires() {
    let store = InMemoryFastStore::new();
    let source = CountingSource::new();
    let cache = cache(&store, &source, CacheConfig::default());

    assert_eq!(cache.get(7).await.unwrap(), None);
    assert_eq!(cache.get(7).await.unwrap(), None);
    assert_eq!(source.loads(), 1);

    source.insert(account(7, 1)).unwrap();
    tokio::time::advance(Duration::from_secs(121)).await;

    assert_eq!(cache.get(7).await.unwrap(), Some(account(7, 1)));
    assert_eq!(source.loads(), 2);
}

#[tokio::test]
async fn invalidate_forces_reload() {
    let store = InMemoryFastStore::new();
    let source = CountingSource::new();
    source.insert(account(3, 100)).unwrap();
    let cache = cache(&store, &source, CacheConfig::default());

    assert_eq!(cache.get(3).await.unwrap().map(|a| a.credits), Some(100));

    source.insert(account(3, 40)).unwrap();
    assert_eq!(cache.get(3).await.unwrap().map(|a| a.credits), Some(100));

    cache.invalidate(3).await.unwrap();
    assert_eq!(cache.get(3).await.unwrap().map(|a| a.credits), Some(40));
    assert_eq!(source.loads(), 2);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn store_outage_degrades_to_source() {
    let store = InMemoryFastStore::new();
    let source = CountingSource::new();
    source.insert(account(1, 5)).unwrap();
    let cache = cache(&store, &source, CacheConfig::default());
    store.set_unavailable(true);

    assert_eq!(cache.get(1).await.unwrap(), Some(account(1, 5)));
    assert_eq!(cache.get(1).await.unwrap(), Some(account(1, 5)));
    assert_eq!(source.loads(), 2);
}

#[tokio::test]
async fn source_error_propagates_and_is_not_cached() {
    let store = InMemoryFastStore::new();
    let source = CountingSource::new();
    source.insert(account(1, 5)).unwrap();
    let cache = cache(&store, &source, CacheConfig::default());

    source.set_failing(true);
    assert!(matches!(cache.get(1).await, Err(FlashSaleError::Database(_))));

    source.set_failing(false);
    assert_eq!(cache.get(1).await.unwrap(), Some(account(1, 5)));
    assert_eq!(source.loads(), 2);
}
