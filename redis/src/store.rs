//! Redis implementation of [`FastStore`].
//!
//! # Connections
//!
//! Non-blocking commands share one multiplexed [`ConnectionManager`], which
//! reconnects on its own. A blocking `XREADGROUP` would stall every command
//! pipelined behind it on that connection, so blocking reads go through a
//! dedicated connection per consumer name instead. A dedicated connection is
//! dropped on error and reopened on the next read.
//!
//! Paging through the pending list uses exclusive `XPENDING` ranges, which
//! need Redis 6.2 or newer.
//!
//! # Example
//!
//! ```no_run
//! use flashsale_redis::RedisFastStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisFastStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use crate::scripts::Scripts;
use flashsale_core::{
    EntryId, FastStore, FlashSaleError, PendingEntry, ReadCursor, Result, ScriptKey, StreamEntry,
};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, RedisError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Redis-backed fast-path store.
#[derive(Clone)]
pub struct RedisFastStore {
    /// Client used to open dedicated blocking connections.
    client: Client,
    /// Shared connection for non-blocking commands.
    conn_manager: ConnectionManager,
    /// Dedicated connections for blocking reads, keyed by consumer.
    blocking: Arc<Mutex<HashMap<String, MultiplexedConnection>>>,
    scripts: Arc<Scripts>,
}

impl RedisFastStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::StoreUnavailable`] if the client cannot be
    /// created or the first connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            FlashSaleError::StoreUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            FlashSaleError::StoreUnavailable(format!(
                "Failed to create Redis connection manager: {e}"
            ))
        })?;

        tracing::info!("Connected to Redis fast-path store");

        Ok(Self {
            client,
            conn_manager,
            blocking: Arc::new(Mutex::new(HashMap::new())),
            scripts: Arc::new(Scripts::new()),
        })
    }

    /// Dedicated connection for `consumer`, opened on first use.
    ///
    /// The map lock is never held across the connect, so one slow handshake
    /// does not stall readers of other consumers. If two reads race on the
    /// same new consumer, the first inserted connection wins.
    async fn blocking_connection(&self, consumer: &str) -> Result<MultiplexedConnection> {
        let cached = self.blocking.lock().await.get(consumer).cloned();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let opened = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| unavailable("open blocking connection", &e))?;

        let conn = self
            .blocking
            .lock()
            .await
            .entry(consumer.to_string())
            .or_insert(opened)
            .clone();

        tracing::debug!(consumer = %consumer, "Opened dedicated Redis connection for blocking reads");
        Ok(conn)
    }

    async fn drop_blocking_connection(&self, consumer: &str) {
        self.blocking.lock().await.remove(consumer);
    }
}

fn unavailable(action: &str, error: &RedisError) -> FlashSaleError {
    FlashSaleError::StoreUnavailable(format!("Failed to {action}: {error}"))
}

/// Connection-level failures mean the store is unavailable; anything else
/// coming back from `EVALSHA` is the script's own fault.
fn script_error(script: ScriptKey, error: &RedisError) -> FlashSaleError {
    if error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
    {
        unavailable(&format!("run {script:?} script"), error)
    } else {
        FlashSaleError::Script(format!("{script:?} script failed: {error}"))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `XPENDING` start bound: the whole list, or strictly after a cursor.
fn pending_start(after: Option<&EntryId>) -> String {
    after.map_or_else(|| "-".to_string(), |id| format!("({id}"))
}

/// Convert a raw stream entry into the core type.
///
/// Field values are stored as bulk strings; anything else is skipped and
/// surfaces later as a malformed record.
fn to_entry(raw: StreamId) -> StreamEntry {
    let fields = raw
        .map
        .into_iter()
        .filter_map(|(field, value)| {
            redis::from_redis_value::<String>(&value)
                .ok()
                .map(|value| (field, value))
        })
        .collect();

    StreamEntry { id: EntryId(raw.id), fields }
}

impl FastStore for RedisFastStore {
    async fn run_atomic(&self, script: ScriptKey, keys: &[String], args: &[String]) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        let mut invocation = self.scripts.get(script).prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| script_error(script, &e))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn_manager.clone();
        conn.hgetall(key).await.map_err(|e| unavailable("read hash", &e))
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .hset_multiple(key, fields)
            .await
            .map_err(|e| unavailable("write hash", &e))?;
        Ok(())
    }

    async fn hash_replace(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !fields.is_empty() {
            pipe.hset_multiple(key, fields)
                .ignore()
                .cmd("PEXPIRE")
                .arg(key)
                .arg(millis(ttl).max(1))
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("replace hash", &e))?;
        Ok(())
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        conn.hexists(key, field)
            .await
            .map_err(|e| unavailable("check hash field", &e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("set expiry", &e))?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl).max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("set key if absent", &e))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = conn.del(key).await.map_err(|e| unavailable("delete key", &e))?;
        Ok(())
    }

    async fn stream_create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;

        match created {
            Ok(()) => {
                tracing::info!(stream = %stream, group = %group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!(stream = %stream, group = %group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(unavailable("create consumer group", &e)),
        }
    }

    async fn stream_append(&self, stream: &str, fields: &[(String, String)]) -> Result<EntryId> {
        let mut conn = self.conn_manager.clone();
        let id: String = conn
            .xadd(stream, "*", fields)
            .await
            .map_err(|e| unavailable("append to stream", &e))?;
        Ok(EntryId(id))
    }

    async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        cursor: ReadCursor,
    ) -> Result<Vec<StreamEntry>> {
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count.max(1));

        let blocking = cursor == ReadCursor::New && !block.is_zero();
        let reply: redis::RedisResult<Option<StreamReadReply>> = if blocking {
            options = options.block(usize::try_from(block.as_millis()).unwrap_or(usize::MAX));
            let mut conn = self.blocking_connection(consumer).await?;
            let reply = conn
                .xread_options(&[stream], &[cursor.as_str()], &options)
                .await;
            if reply.is_err() {
                self.drop_blocking_connection(consumer).await;
            }
            reply
        } else {
            let mut conn = self.conn_manager.clone();
            conn.xread_options(&[stream], &[cursor.as_str()], &options)
                .await
        };

        let reply = reply.map_err(|e| unavailable("read from consumer group", &e))?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(to_entry)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = conn
            .xack(stream, group, &[id.as_str()])
            .await
            .map_err(|e| unavailable("acknowledge entry", &e))?;
        Ok(())
    }

    async fn stream_pending(
        &self,
        stream: &str,
        group: &str,
        after: Option<&EntryId>,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let mut conn = self.conn_manager.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, pending_start(after), "+", count.max(1))
            .await
            .map_err(|e| unavailable("list pending entries", &e))?;

        Ok(reply
            .ids
            .into_iter()
            .map(|pending| PendingEntry {
                id: EntryId(pending.id),
                consumer: pending.consumer,
                idle: Duration::from_millis(
                    u64::try_from(pending.last_delivered_ms).unwrap_or(u64::MAX),
                ),
                delivery_count: u64::try_from(pending.times_delivered).unwrap_or(u64::MAX),
            })
            .collect())
    }

    async fn stream_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn_manager.clone();
        let ids: Vec<&str> = ids.iter().map(EntryId::as_str).collect();
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, millis(min_idle), &ids)
            .await
            .map_err(|e| unavailable("claim pending entries", &e))?;

        Ok(reply.ids.into_iter().map(to_entry).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn pending_pages_start_after_the_cursor() {
        assert_eq!(pending_start(None), "-");
        assert_eq!(pending_start(Some(&EntryId("1700000000000-3".to_string()))), "(1700000000000-3");
    }

    #[test]
    fn entry_conversion_keeps_string_fields() {
        let mut map = HashMap::new();
        map.insert(
            "reader_id".to_string(),
            redis::Value::BulkString(b"7".to_vec()),
        );
        let entry = to_entry(StreamId { id: "1-0".to_string(), map });

        assert_eq!(entry.id, EntryId("1-0".to_string()));
        assert_eq!(entry.fields.get("reader_id").map(String::as_str), Some("7"));
    }
}
