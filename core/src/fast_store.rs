//! Fast-path store capability.
//!
//! The admission pipeline and the read-through cache share one external
//! store that offers:
//!
//! - atomic server-side scripts (the only way stock and grant sets mutate)
//! - hash maps with TTLs (reservations, cache entries)
//! - conditional set with TTL (repopulation mutex)
//! - an append-only stream with consumer groups (fulfillment records)
//!
//! The trait is a capability interface, not a product binding. The Redis
//! implementation lives in `flashsale-redis`; `flashsale-testing` provides
//! an in-memory implementation with the same semantics.
//!
//! # Blocking
//!
//! Every operation completes in one round-trip except
//! [`FastStore::stream_read_group`] with a non-zero `block`, which waits at
//! most that long for new entries.

use crate::error::Result;
use crate::types::{EntryId, PendingEntry, ReadCursor, StreamEntry};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Server-side scripts known to every [`FastStore`].
///
/// Scripts are addressed by key so that stores which cannot run the Lua
/// source (the in-memory double) implement the same contract natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKey {
    /// Validate and reserve one unit of stock, then enqueue fulfillment.
    ///
    /// - `KEYS`: stock hash, grant set, stream
    /// - `ARGV`: reader, author, offer, credit amount, now (unix millis)
    /// - Returns: `0` admitted, `1` already granted, `2` expired or
    ///   missing, `3` out of stock
    Admission,

    /// Create a reservation hash with its TTL unless the offer already has
    /// a reservation or a grant set.
    ///
    /// - `KEYS`: stock hash, grant set
    /// - `ARGV`: TTL (millis), then alternating field names and values
    /// - Returns: `1` created, `0` already present (nothing written)
    PublishReservation,

    /// Delete a key only if it still holds the caller's token.
    ///
    /// - `KEYS`: lock key
    /// - `ARGV`: owner token
    /// - Returns: `1` released, `0` not owner (or already expired)
    ReleaseLock,
}

/// Operations the pipeline needs from the shared fast-path store.
///
/// # Errors
///
/// Every method returns
/// [`FlashSaleError::StoreUnavailable`](crate::FlashSaleError::StoreUnavailable)
/// when the store cannot be reached and
/// [`FlashSaleError::Script`](crate::FlashSaleError::Script) when a script
/// fails server-side.
pub trait FastStore: Send + Sync {
    /// Run a registered script atomically and return its integer result.
    fn run_atomic(
        &self,
        script: ScriptKey,
        keys: &[String],
        args: &[String],
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Read every field of a hash. Missing keys yield an empty map.
    fn hash_get_all(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send;

    /// Set fields of a hash, creating it if needed.
    fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Replace a hash with exactly `fields` and give it `ttl`, as one
    /// atomic step. Readers never observe the hash without its TTL.
    fn hash_replace(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Whether a hash has the given field.
    fn hash_exists(&self, key: &str, field: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Set a key's time-to-live.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Set `key` to `value` with a TTL only if it does not exist.
    ///
    /// Returns `true` if the value was written.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete a key of any type.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Create a consumer group (and the stream) if it does not exist yet.
    ///
    /// New groups start at the beginning of the stream.
    fn stream_create_group(
        &self,
        stream: &str,
        group: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Append an entry and return its store-assigned ID.
    fn stream_append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> impl Future<Output = Result<EntryId>> + Send;

    /// Read up to `count` entries for `consumer`.
    ///
    /// With [`ReadCursor::New`] entries are assigned to the consumer and
    /// added to its pending list; `block` bounds the wait when none are
    /// available. With [`ReadCursor::Pending`] the consumer's own
    /// unacknowledged entries are returned and `block` is ignored.
    fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        cursor: ReadCursor,
    ) -> impl Future<Output = Result<Vec<StreamEntry>>> + Send;

    /// Acknowledge an entry, removing it from the pending list.
    fn stream_ack(
        &self,
        stream: &str,
        group: &str,
        id: &EntryId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// List up to `count` delivered-but-unacknowledged entries of the group,
    /// oldest first.
    ///
    /// With `after` set, only entries with a strictly greater ID are listed,
    /// so callers page through a long pending list by passing the last ID of
    /// the previous page.
    fn stream_pending(
        &self,
        stream: &str,
        group: &str,
        after: Option<&EntryId>,
        count: usize,
    ) -> impl Future<Output = Result<Vec<PendingEntry>>> + Send;

    /// Transfer ownership of entries idle for at least `min_idle` to
    /// `consumer` and return them. Entries that are no longer pending or not
    /// idle long enough are skipped.
    fn stream_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> impl Future<Output = Result<Vec<StreamEntry>>> + Send;
}

impl<S: FastStore + ?Sized> FastStore for std::sync::Arc<S> {
    fn run_atomic(
        &self,
        script: ScriptKey,
        keys: &[String],
        args: &[String],
    ) -> impl Future<Output = Result<i64>> + Send {
        (**self).run_atomic(script, keys, args)
    }

    fn hash_get_all(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send {
        (**self).hash_get_all(key)
    }

    fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).hash_set(key, fields)
    }

    fn hash_replace(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).hash_replace(key, fields, ttl)
    }

    fn hash_exists(&self, key: &str, field: &str) -> impl Future<Output = Result<bool>> + Send {
        (**self).hash_exists(key, field)
    }

    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<()>> + Send {
        (**self).expire(key, ttl)
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send {
        (**self).set_if_absent(key, value, ttl)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete(key)
    }

    fn stream_create_group(
        &self,
        stream: &str,
        group: &str,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).stream_create_group(stream, group)
    }

    fn stream_append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> impl Future<Output = Result<EntryId>> + Send {
        (**self).stream_append(stream, fields)
    }

    fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        cursor: ReadCursor,
    ) -> impl Future<Output = Result<Vec<StreamEntry>>> + Send {
        (**self).stream_read_group(stream, group, consumer, count, block, cursor)
    }

    fn stream_ack(
        &self,
        stream: &str,
        group: &str,
        id: &EntryId,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).stream_ack(stream, group, id)
    }

    fn stream_pending(
        &self,
        stream: &str,
        group: &str,
        after: Option<&EntryId>,
        count: usize,
    ) -> impl Future<Output = Result<Vec<PendingEntry>>> + Send {
        (**self).stream_pending(stream, group, after, count)
    }

    fn stream_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> impl Future<Output = Result<Vec<StreamEntry>>> + Send {
        (**self).stream_claim(stream, group, consumer, min_idle, ids)
    }
}
