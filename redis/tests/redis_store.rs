//! Integration tests for the Redis fast-path store.
//!
//! These tests require a running Redis instance on `localhost:6379`.
//!
//! Run with: `cargo test -p flashsale-redis -- --ignored`

#![allow(clippy::unwrap_used)]

use chrono::Utc;
use flashsale_core::{
    AccountId, FastStore, Offer, OfferId, ReadCursor, ScriptKey, keys,
};
use flashsale_redis::RedisFastStore;
use std::time::Duration;

const REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Unique suffix so parallel test runs never share keys.
fn unique(prefix: &str) -> String {
    format!("{prefix}:{}", uuid::Uuid::new_v4())
}

fn unique_offer() -> OfferId {
    OfferId(u64::from(uuid::Uuid::new_v4().as_fields().0))
}

async fn publish(store: &RedisFastStore, offer_id: OfferId, stock: u32) -> Offer {
    let now = Utc::now();
    let offer = Offer {
        id: offer_id,
        author_id: AccountId(1),
        price: 100,
        stock,
        valid_from: now - chrono::Duration::minutes(1),
        valid_until: now + chrono::Duration::hours(1),
    };
    let (keys, args) = publication_args(&offer, Duration::from_secs(3600));
    assert_eq!(store.run_atomic(ScriptKey::PublishReservation, &keys, &args).await.unwrap(), 1);
    offer
}

fn publication_args(offer: &Offer, ttl: Duration) -> (Vec<String>, Vec<String>) {
    let mut args = vec![ttl.as_millis().to_string()];
    for (field, value) in offer.reservation_fields() {
        args.push(field);
        args.push(value);
    }
    (vec![keys::stock_key(offer.id), keys::grant_key(offer.id)], args)
}

fn admission_args(offer: &Offer, reader: u64, stream: &str, now_ms: i64) -> (Vec<String>, Vec<String>) {
    (
        vec![
            keys::stock_key(offer.id),
            keys::grant_key(offer.id),
            stream.to_string(),
        ],
        vec![
            reader.to_string(),
            offer.author_id.to_string(),
            offer.id.to_string(),
            offer.price.to_string(),
            now_ms.to_string(),
        ],
    )
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn admission_script_follows_result_codes() {
    let store = RedisFastStore::new(REDIS_URL).await.unwrap();
    let stream = unique("stream");
    let offer = publish(&store, unique_offer(), 1).await;
    let now_ms = Utc::now().timestamp_millis();

    let (keys, args) = admission_args(&offer, 10, &stream, now_ms);
    assert_eq!(store.run_atomic(ScriptKey::Admission, &keys, &args).await.unwrap(), 0);
    assert_eq!(store.run_atomic(ScriptKey::Admission, &keys, &args).await.unwrap(), 1);

    let (keys, args) = admission_args(&offer, 11, &stream, now_ms);
    assert_eq!(store.run_atomic(ScriptKey::Admission, &keys, &args).await.unwrap(), 3);

    let late = offer.valid_until.timestamp_millis() + 1;
    let (keys, args) = admission_args(&offer, 12, &stream, late);
    assert_eq!(store.run_atomic(ScriptKey::Admission, &keys, &args).await.unwrap(), 2);

    let missing = Offer { id: unique_offer(), ..offer };
    let (keys, args) = admission_args(&missing, 13, &stream, now_ms);
    assert_eq!(store.run_atomic(ScriptKey::Admission, &keys, &args).await.unwrap(), 2);

    store.delete(&stream).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn consumer_group_read_ack_and_claim() {
    let store = RedisFastStore::new(REDIS_URL).await.unwrap();
    let stream = unique("stream");
    let group = "g1";

    store.stream_create_group(&stream, group).await.unwrap();
    // Second creation is a no-op.
    store.stream_create_group(&stream, group).await.unwrap();

    let fields = vec![("reader_id".to_string(), "1".to_string())];
    let id = store.stream_append(&stream, &fields).await.unwrap();

    let read = store
        .stream_read_group(&stream, group, "c1", 1, Duration::from_millis(100), ReadCursor::New)
        .await
        .unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].id, id);

    // Unacked entries show up in the consumer's own pending view.
    let pending = store
        .stream_read_group(&stream, group, "c1", 10, Duration::ZERO, ReadCursor::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let listed = store.stream_pending(&stream, group, None, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].consumer, "c1");
    assert!(listed[0].delivery_count >= 1);

    let claimed = store
        .stream_claim(&stream, group, "c2", Duration::ZERO, &[id.clone()])
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].fields.get("reader_id").map(String::as_str), Some("1"));

    store.stream_ack(&stream, group, &id).await.unwrap();
    assert!(store.stream_pending(&stream, group, None, 10).await.unwrap().is_empty());

    // Nothing new: the blocking read times out empty.
    let empty = store
        .stream_read_group(&stream, group, "c1", 1, Duration::from_millis(50), ReadCursor::New)
        .await
        .unwrap();
    assert!(empty.is_empty());

    store.delete(&stream).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn lock_is_released_only_by_owner() {
    let store = RedisFastStore::new(REDIS_URL).await.unwrap();
    let lock = unique("mutex:test");

    assert!(store.set_if_absent(&lock, "owner", Duration::from_secs(5)).await.unwrap());
    assert!(!store.set_if_absent(&lock, "other", Duration::from_secs(5)).await.unwrap());

    let keys = vec![lock.clone()];
    let released = store
        .run_atomic(ScriptKey::ReleaseLock, &keys, &["other".to_string()])
        .await
        .unwrap();
    assert_eq!(released, 0);

    let released = store
        .run_atomic(ScriptKey::ReleaseLock, &keys, &["owner".to_string()])
        .await
        .unwrap();
    assert_eq!(released, 1);
    assert!(store.set_if_absent(&lock, "other", Duration::from_secs(5)).await.unwrap());

    store.delete(&lock).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn hash_fields_round_trip_with_tombstone_check() {
    let store = RedisFastStore::new(REDIS_URL).await.unwrap();
    let key = unique("cache:user");

    assert!(store.hash_get_all(&key).await.unwrap().is_empty());
    store
        .hash_set(&key, &[(keys::FIELD_TOMBSTONE.to_string(), "1".to_string())])
        .await
        .unwrap();
    assert!(store.hash_exists(&key, keys::FIELD_TOMBSTONE).await.unwrap());
    assert!(!store.hash_exists(&key, keys::FIELD_PAYLOAD).await.unwrap());

    store.delete(&key).await.unwrap();
    assert!(store.hash_get_all(&key).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn publication_never_overwrites_a_live_offer() {
    let store = RedisFastStore::new(REDIS_URL).await.unwrap();
    let stream = unique("stream");
    let offer = publish(&store, unique_offer(), 1).await;
    let now_ms = Utc::now().timestamp_millis();

    let (keys, args) = admission_args(&offer, 10, &stream, now_ms);
    assert_eq!(store.run_atomic(ScriptKey::Admission, &keys, &args).await.unwrap(), 0);

    let (pkeys, pargs) = publication_args(&Offer { stock: 5, ..offer.clone() }, Duration::from_secs(60));
    assert_eq!(store.run_atomic(ScriptKey::PublishReservation, &pkeys, &pargs).await.unwrap(), 0);

    let reservation = store.hash_get_all(&keys::stock_key(offer.id)).await.unwrap();
    assert_eq!(reservation[keys::FIELD_STOCK], "0");
    assert_eq!(store.run_atomic(ScriptKey::Admission, &keys, &args).await.unwrap(), 1);

    store.delete(&keys::stock_key(offer.id)).await.unwrap();
    store.delete(&keys::grant_key(offer.id)).await.unwrap();
    store.delete(&stream).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn hash_replace_sets_fields_and_ttl() {
    let store = RedisFastStore::new(REDIS_URL).await.unwrap();
    let key = unique("cache:user");

    store
        .hash_set(&key, &[(keys::FIELD_TOMBSTONE.to_string(), "1".to_string())])
        .await
        .unwrap();
    store
        .hash_replace(
            &key,
            &[(keys::FIELD_PAYLOAD.to_string(), "{}".to_string())],
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    let hash = store.hash_get_all(&key).await.unwrap();
    assert_eq!(hash.len(), 1);
    assert!(hash.contains_key(keys::FIELD_PAYLOAD));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(store.hash_get_all(&key).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn pending_list_pages_after_cursor() {
    let store = RedisFastStore::new(REDIS_URL).await.unwrap();
    let stream = unique("stream");
    let group = "g1";
    store.stream_create_group(&stream, group).await.unwrap();

    let fields = vec![("reader_id".to_string(), "1".to_string())];
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(store.stream_append(&stream, &fields).await.unwrap());
    }
    store
        .stream_read_group(&stream, group, "c1", 3, Duration::ZERO, ReadCursor::New)
        .await
        .unwrap();

    let first = store.stream_pending(&stream, group, None, 2).await.unwrap();
    assert_eq!(first.iter().map(|p| p.id.clone()).collect::<Vec<_>>(), ids[..2]);

    let rest = store
        .stream_pending(&stream, group, Some(&first[1].id), 2)
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, ids[2]);

    store.delete(&stream).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn blocking_reads_of_different_consumers_overlap() {
    let store = RedisFastStore::new(REDIS_URL).await.unwrap();
    let stream = unique("stream");
    let group = "g1";
    store.stream_create_group(&stream, group).await.unwrap();

    let block = Duration::from_millis(400);
    let started = std::time::Instant::now();
    let (a, b) = tokio::join!(
        store.stream_read_group(&stream, group, "c1", 1, block, ReadCursor::New),
        store.stream_read_group(&stream, group, "c2", 1, block, ReadCursor::New),
    );
    assert!(a.unwrap().is_empty());
    assert!(b.unwrap().is_empty());
    assert!(started.elapsed() < block * 2);

    store.delete(&stream).await.unwrap();
}
