//! In-memory [`FastStore`] with Redis semantics.
//!
//! Registered scripts run natively under the store lock, which gives them
//! the same all-or-nothing isolation a Lua script has inside Redis. TTLs are
//! evaluated lazily against [`tokio::time::Instant`], so tests running with
//! a paused clock can expire keys by advancing time.

use flashsale_core::{
    EntryId, FastStore, FlashSaleError, FulfillmentRecord, PendingEntry, ReadCursor, Result,
    ScriptKey, StreamEntry, keys,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    Str(String),
}

#[derive(Debug, Clone)]
struct Stored {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct Delivery {
    consumer: String,
    delivered_at: Instant,
    count: u64,
}

#[derive(Debug, Default)]
struct Group {
    last_delivered: u64,
    pending: BTreeMap<u64, Delivery>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: BTreeMap<u64, HashMap<String, String>>,
    last_id: u64,
    groups: HashMap<String, Group>,
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Stored>,
    streams: HashMap<String, Stream>,
}

fn format_id(seq: u64) -> String {
    format!("{seq}-0")
}

fn parse_id(id: &EntryId) -> Option<u64> {
    id.as_str().split_once('-').and_then(|(seq, _)| seq.parse().ok())
}

fn wrong_type(key: &str) -> FlashSaleError {
    FlashSaleError::StoreUnavailable(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

fn no_group(stream: &str, group: &str) -> FlashSaleError {
    FlashSaleError::StoreUnavailable(format!("NOGROUP No such key '{stream}' or consumer group '{group}'"))
}

impl State {
    /// Live entry for `key`, purging it first if its TTL has passed.
    fn live(&mut self, key: &str) -> Option<&mut Stored> {
        let expired = self
            .values
            .get(key)
            .and_then(|stored| stored.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }

    fn hash(&mut self, key: &str) -> Result<Option<&mut HashMap<String, String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Stored { value: Value::Hash(hash), .. }) => Ok(Some(hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn remaining_ttl(&mut self, key: &str) -> Option<Instant> {
        self.live(key).and_then(|stored| stored.expires_at)
    }

    fn append(&mut self, stream: &str, fields: HashMap<String, String>) -> EntryId {
        let stream = self.streams.entry(stream.to_string()).or_default();
        stream.last_id += 1;
        stream.entries.insert(stream.last_id, fields);
        EntryId(format_id(stream.last_id))
    }

    fn admission(&mut self, keys: &[String], args: &[String]) -> Result<(i64, bool)> {
        let [stock_key, grant_key, stream] = keys else {
            return Err(FlashSaleError::Script("admission expects 3 keys".to_string()));
        };
        let [reader, author, offer, credits, now] = args else {
            return Err(FlashSaleError::Script("admission expects 5 arguments".to_string()));
        };
        let now: i64 = now
            .parse()
            .map_err(|_| FlashSaleError::Script(format!("now is not a number: {now}")))?;

        match self.live(grant_key) {
            Some(Stored { value: Value::Set(members), .. }) if members.contains(reader) => {
                return Ok((1, false));
            }
            Some(Stored { value: Value::Set(_), .. }) | None => {}
            Some(_) => return Err(wrong_type(grant_key)),
        }

        let Some(reservation) = self.hash(stock_key)? else {
            return Ok((2, false));
        };
        let number = |field: &str| -> Result<Option<i64>> {
            reservation
                .get(field)
                .map(|raw| {
                    raw.parse::<i64>().map_err(|_| {
                        FlashSaleError::Script(format!("{field} is not a number: {raw}"))
                    })
                })
                .transpose()
        };
        let (Some(stock), Some(from), Some(until)) = (
            number(keys::FIELD_STOCK)?,
            number(keys::FIELD_VALID_FROM)?,
            number(keys::FIELD_VALID_UNTIL)?,
        ) else {
            return Ok((2, false));
        };

        if now < from || now > until {
            return Ok((2, false));
        }
        if stock <= 0 {
            return Ok((3, false));
        }

        reservation.insert(keys::FIELD_STOCK.to_string(), (stock - 1).to_string());
        let expires_at = self.remaining_ttl(stock_key);
        let grants = self
            .values
            .entry(grant_key.clone())
            .or_insert_with(|| Stored { value: Value::Set(HashSet::new()), expires_at: None });
        if let Value::Set(members) = &mut grants.value {
            members.insert(reader.clone());
        }
        if expires_at.is_some() {
            grants.expires_at = expires_at;
        }

        let fields = HashMap::from([
            (FulfillmentRecord::FIELD_READER.to_string(), reader.clone()),
            (FulfillmentRecord::FIELD_AUTHOR.to_string(), author.clone()),
            (FulfillmentRecord::FIELD_OFFER.to_string(), offer.clone()),
            (FulfillmentRecord::FIELD_CREDITS.to_string(), credits.clone()),
        ]);
        self.append(stream, fields);

        Ok((0, true))
    }

    fn publish_reservation(&mut self, keys: &[String], args: &[String]) -> Result<i64> {
        let [stock_key, grant_key] = keys else {
            return Err(FlashSaleError::Script("publication expects 2 keys".to_string()));
        };
        let Some((ttl, pairs)) = args.split_first() else {
            return Err(FlashSaleError::Script("publication expects a TTL".to_string()));
        };
        if pairs.len() % 2 != 0 {
            return Err(FlashSaleError::Script(
                "publication expects field/value pairs".to_string(),
            ));
        }
        let ttl: u64 = ttl
            .parse()
            .map_err(|_| FlashSaleError::Script(format!("ttl is not a number: {ttl}")))?;

        if self.live(stock_key).is_some() || self.live(grant_key).is_some() {
            return Ok(0);
        }

        let reservation = pairs
            .chunks_exact(2)
            .filter_map(|pair| match pair {
                [field, value] => Some((field.clone(), value.clone())),
                _ => None,
            })
            .collect();
        self.values.insert(
            stock_key.clone(),
            Stored {
                value: Value::Hash(reservation),
                expires_at: Some(Instant::now() + Duration::from_millis(ttl)),
            },
        );
        Ok(1)
    }

    fn release_lock(&mut self, keys: &[String], args: &[String]) -> Result<i64> {
        let ([lock], [token]) = (keys, args) else {
            return Err(FlashSaleError::Script(
                "release lock expects 1 key and 1 argument".to_string(),
            ));
        };
        let owned = matches!(
            self.live(lock),
            Some(Stored { value: Value::Str(current), .. }) if current == token
        );
        if owned {
            self.values.remove(lock);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    fn group(&mut self, stream: &str, group: &str) -> Result<&mut Group> {
        self.streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| no_group(stream, group))
    }

    fn entry(&self, stream: &str, seq: u64) -> StreamEntry {
        let fields = self
            .streams
            .get(stream)
            .and_then(|s| s.entries.get(&seq))
            .cloned()
            .unwrap_or_default();
        StreamEntry { id: EntryId(format_id(seq)), fields }
    }

    fn read_new(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let stream_state = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| no_group(stream, group))?;
        let group_state = stream_state
            .groups
            .get_mut(group)
            .ok_or_else(|| no_group(stream, group))?;

        let now = Instant::now();
        let mut read = Vec::new();
        for (&seq, fields) in stream_state
            .entries
            .range(group_state.last_delivered + 1..)
            .take(count)
        {
            group_state.last_delivered = seq;
            group_state.pending.insert(
                seq,
                Delivery { consumer: consumer.to_string(), delivered_at: now, count: 1 },
            );
            read.push(StreamEntry { id: EntryId(format_id(seq)), fields: fields.clone() });
        }
        Ok(read)
    }

    fn read_pending(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let now = Instant::now();
        let group_state = self.group(stream, group)?;
        let mut seqs = Vec::new();
        for (&seq, delivery) in &mut group_state.pending {
            if seqs.len() == count {
                break;
            }
            if delivery.consumer == consumer {
                delivery.delivered_at = now;
                delivery.count += 1;
                seqs.push(seq);
            }
        }
        Ok(seqs.into_iter().map(|seq| self.entry(stream, seq)).collect())
    }
}

/// In-memory fast-path store.
///
/// # Example
///
/// ```
/// use flashsale_core::FastStore;
/// use flashsale_testing::InMemoryFastStore;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryFastStore::new();
/// store.stream_create_group("stream.orders", "fulfillment").await.unwrap();
/// store.set_unavailable(true);
/// assert!(store.delete("anything").await.is_err());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryFastStore {
    state: Arc<Mutex<State>>,
    appended: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
    script_calls: Arc<AtomicU64>,
}

impl InMemoryFastStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            appended: Arc::new(Notify::new()),
            unavailable: Arc::new(AtomicBool::new(false)),
            script_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make every subsequent operation fail with
    /// [`FlashSaleError::StoreUnavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of scripts executed so far.
    #[must_use]
    pub fn script_calls(&self) -> u64 {
        self.script_calls.load(Ordering::SeqCst)
    }

    /// Number of entries ever appended to `stream`.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn stream_len(&self, stream: &str) -> Result<usize> {
        Ok(self
            .lock()?
            .streams
            .get(stream)
            .map_or(0, |s| s.entries.len()))
    }

    /// Number of delivered-but-unacknowledged entries in a group.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn pending_len(&self, stream: &str, group: &str) -> Result<usize> {
        Ok(self
            .lock()?
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len()))
    }

    /// Members of a set, empty if the key is missing or expired.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn set_members(&self, key: &str) -> Result<HashSet<String>> {
        let mut state = self.lock()?;
        Ok(match state.live(key) {
            Some(Stored { value: Value::Set(members), .. }) => members.clone(),
            _ => HashSet::new(),
        })
    }

    /// Remaining lifetime of a key, `None` if it is missing or persistent.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut state = self.lock()?;
        Ok(state
            .remaining_ttl(key)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| FlashSaleError::StoreUnavailable("Mutex lock failed".to_string()))
    }

    fn available(&self) -> Result<MutexGuard<'_, State>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FlashSaleError::StoreUnavailable(
                "Connection refused (injected)".to_string(),
            ));
        }
        self.lock()
    }
}

impl Default for InMemoryFastStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FastStore for InMemoryFastStore {
    async fn run_atomic(&self, script: ScriptKey, keys: &[String], args: &[String]) -> Result<i64> {
        let (code, appended) = {
            let mut state = self.available()?;
            self.script_calls.fetch_add(1, Ordering::SeqCst);
            match script {
                ScriptKey::Admission => state.admission(keys, args)?,
                ScriptKey::PublishReservation => (state.publish_reservation(keys, args)?, false),
                ScriptKey::ReleaseLock => (state.release_lock(keys, args)?, false),
            }
        };
        if appended {
            self.appended.notify_waiters();
        }
        Ok(code)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut state = self.available()?;
        Ok(state.hash(key)?.cloned().unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut state = self.available()?;
        if state.hash(key)?.is_none() {
            state.values.insert(
                key.to_string(),
                Stored { value: Value::Hash(HashMap::new()), expires_at: None },
            );
        }
        if let Some(hash) = state.hash(key)? {
            hash.extend(fields.iter().cloned());
        }
        Ok(())
    }

    async fn hash_replace(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<()> {
        let mut state = self.available()?;
        if fields.is_empty() || ttl.is_zero() {
            state.values.remove(key);
            return Ok(());
        }
        state.values.insert(
            key.to_string(),
            Stored {
                value: Value::Hash(fields.iter().cloned().collect()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        let mut state = self.available()?;
        Ok(state.hash(key)?.is_some_and(|hash| hash.contains_key(field)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut state = self.available()?;
        if ttl.is_zero() {
            state.values.remove(key);
        } else if let Some(stored) = state.live(key) {
            stored.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.available()?;
        if state.live(key).is_some() {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            Stored {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.available()?;
        state.values.remove(key);
        state.streams.remove(key);
        Ok(())
    }

    async fn stream_create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut state = self.available()?;
        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn stream_append(&self, stream: &str, fields: &[(String, String)]) -> Result<EntryId> {
        let id = {
            let mut state = self.available()?;
            state.append(stream, fields.iter().cloned().collect())
        };
        self.appended.notify_waiters();
        Ok(id)
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
        let count = count.max(1);
        if cursor == ReadCursor::Pending {
            return self.available()?.read_pending(stream, group, consumer, count);
        }

        let deadline = Instant::now() + block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let read = self.available()?.read_new(stream, group, consumer, count)?;
            if !read.is_empty() || block.is_zero() {
                return Ok(read);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            // Timing out is the normal empty-read path.
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<()> {
        let mut state = self.available()?;
        if let (Some(seq), Ok(group)) = (parse_id(id), state.group(stream, group)) {
            group.pending.remove(&seq);
        }
        Ok(())
    }

    async fn stream_pending(
        &self,
        stream: &str,
        group: &str,
        after: Option<&EntryId>,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let start = match after {
            None => 0,
            Some(id) => parse_id(id)
                .ok_or_else(|| {
                    FlashSaleError::StoreUnavailable(format!(
                        "ERR Invalid stream ID specified as stream command argument: {id}"
                    ))
                })?
                .saturating_add(1),
        };
        let mut state = self.available()?;
        let now = Instant::now();
        Ok(state
            .group(stream, group)?
            .pending
            .range(start..)
            .take(count.max(1))
            .map(|(&seq, delivery)| PendingEntry {
                id: EntryId(format_id(seq)),
                consumer: delivery.consumer.clone(),
                idle: now.saturating_duration_since(delivery.delivered_at),
                delivery_count: delivery.count,
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
        let mut state = self.available()?;
        let now = Instant::now();
        let exists = |state: &State, seq: u64| {
            state
                .streams
                .get(stream)
                .is_some_and(|s| s.entries.contains_key(&seq))
        };

        let mut claimed = Vec::new();
        for seq in ids.iter().filter_map(parse_id) {
            let live = exists(&state, seq);
            let group_state = state.group(stream, group)?;
            if !live {
                // Deleted entries leave the pending list instead of being claimed.
                group_state.pending.remove(&seq);
                continue;
            }
            let Some(delivery) = group_state.pending.get_mut(&seq) else {
                continue;
            };
            if now.saturating_duration_since(delivery.delivered_at) < min_idle {
                continue;
            }
            delivery.consumer = consumer.to_string();
            delivery.delivered_at = now;
            delivery.count += 1;
            claimed.push(seq);
        }

        Ok(claimed.into_iter().map(|seq| state.entry(stream, seq)).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn admission_call(reader: &str, now_ms: i64) -> (Vec<String>, Vec<String>) {
        (
            vec![
                "seckill:stock:1".to_string(),
                "seckill:order:1".to_string(),
                "stream.orders".to_string(),
            ],
            vec![
                reader.to_string(),
                "2".to_string(),
                "1".to_string(),
                "100".to_string(),
                now_ms.to_string(),
            ],
        )
    }

    async fn reserve(store: &InMemoryFastStore, stock: u32) {
        store
            .hash_set(
                "seckill:stock:1",
                &[
                    (keys::FIELD_STOCK.to_string(), stock.to_string()),
                    (keys::FIELD_VALID_FROM.to_string(), "1000".to_string()),
                    (keys::FIELD_VALID_UNTIL.to_string(), "2000".to_string()),
                ],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn admission_script_codes() {
        let store = InMemoryFastStore::new();

        let (k, a) = admission_call("7", 1500);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 2);

        reserve(&store, 2).await;
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 0);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 1);
        assert_eq!(stock(&store).await, "1");

        let (k, a) = admission_call("9", 2001);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 2);
        assert_eq!(stock(&store).await, "1");

        let (k, a) = admission_call("8", 1500);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 0);
        let (k, a) = admission_call("10", 1500);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 3);
        assert_eq!(stock(&store).await, "0");

        let granted = store.set_members("seckill:order:1").unwrap();
        assert_eq!(granted, HashSet::from(["7".to_string(), "8".to_string()]));
        assert_eq!(store.stream_len("stream.orders").unwrap(), 2);
        assert_eq!(store.script_calls(), 6);
    }

    async fn stock(store: &InMemoryFastStore) -> String {
        store.hash_get_all("seckill:stock:1").await.unwrap()[keys::FIELD_STOCK].clone()
    }

    fn publication(stock: &str) -> (Vec<String>, Vec<String>) {
        (
            vec!["seckill:stock:1".to_string(), "seckill:order:1".to_string()],
            vec![
                "5000".to_string(),
                keys::FIELD_STOCK.to_string(),
                stock.to_string(),
                keys::FIELD_VALID_FROM.to_string(),
                "1000".to_string(),
                keys::FIELD_VALID_UNTIL.to_string(),
                "2000".to_string(),
            ],
        )
    }

    #[tokio::test]
    async fn publication_is_create_only() {
        let store = InMemoryFastStore::new();

        let (k, a) = publication("2");
        assert_eq!(store.run_atomic(ScriptKey::PublishReservation, &k, &a).await.unwrap(), 1);
        assert!(store.ttl("seckill:stock:1").unwrap().is_some());

        let (ak, aa) = admission_call("7", 1500);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &ak, &aa).await.unwrap(), 0);

        let (k, a) = publication("50");
        assert_eq!(store.run_atomic(ScriptKey::PublishReservation, &k, &a).await.unwrap(), 0);
        assert_eq!(stock(&store).await, "1");
        assert_eq!(store.run_atomic(ScriptKey::Admission, &ak, &aa).await.unwrap(), 1);

        // A surviving grant set alone still blocks publication.
        store.delete("seckill:stock:1").await.unwrap();
        assert_eq!(store.run_atomic(ScriptKey::PublishReservation, &k, &a).await.unwrap(), 0);
        assert!(store.hash_get_all("seckill:stock:1").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hash_replace_swaps_fields_and_ttl_together() {
        let store = InMemoryFastStore::new();
        store
            .hash_set("cache:user:1", &[(keys::FIELD_TOMBSTONE.to_string(), "1".to_string())])
            .await
            .unwrap();
        assert_eq!(store.ttl("cache:user:1").unwrap(), None);

        store
            .hash_replace(
                "cache:user:1",
                &[(keys::FIELD_PAYLOAD.to_string(), "{}".to_string())],
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        let hash = store.hash_get_all("cache:user:1").await.unwrap();
        assert_eq!(hash.len(), 1);
        assert!(hash.contains_key(keys::FIELD_PAYLOAD));
        assert_eq!(store.ttl("cache:user:1").unwrap(), Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(store.hash_get_all("cache:user:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_list_pages_after_cursor() {
        let store = InMemoryFastStore::new();
        store.stream_create_group("s", "g").await.unwrap();
        for n in 0..5 {
            store
                .stream_append("s", &[("n".to_string(), n.to_string())])
                .await
                .unwrap();
        }
        store
            .stream_read_group("s", "g", "a", 5, Duration::ZERO, ReadCursor::New)
            .await
            .unwrap();

        let first = store.stream_pending("s", "g", None, 2).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["1-0", "2-0"]);

        let second = store.stream_pending("s", "g", Some(&first[1].id), 2).await.unwrap();
        let ids: Vec<&str> = second.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["3-0", "4-0"]);

        let last = store.stream_pending("s", "g", Some(&second[1].id), 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id.as_str(), "5-0");

        let bad = EntryId("not-an-id".to_string());
        assert!(store.stream_pending("s", "g", Some(&bad), 2).await.is_err());
    }

    #[tokio::test]
    async fn window_bounds_are_inclusive() {
        let store = InMemoryFastStore::new();
        reserve(&store, 5).await;

        let (k, a) = admission_call("1", 1000);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 0);
        let (k, a) = admission_call("2", 2000);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 0);
        let (k, a) = admission_call("3", 999);
        assert_eq!(store.run_atomic(ScriptKey::Admission, &k, &a).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire() {
        let store = InMemoryFastStore::new();
        assert!(store.set_if_absent("mutex:user:1", "a", Duration::from_secs(1)).await.unwrap());
        assert!(!store.set_if_absent("mutex:user:1", "b", Duration::from_secs(1)).await.unwrap());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(store.set_if_absent("mutex:user:1", "b", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn release_lock_checks_owner() {
        let store = InMemoryFastStore::new();
        store.set_if_absent("lock", "me", Duration::from_secs(5)).await.unwrap();
        let keys = vec!["lock".to_string()];

        assert_eq!(
            store.run_atomic(ScriptKey::ReleaseLock, &keys, &["you".to_string()]).await.unwrap(),
            0
        );
        assert_eq!(
            store.run_atomic(ScriptKey::ReleaseLock, &keys, &["me".to_string()]).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn pending_entries_are_redelivered_and_claimable() {
        let store = InMemoryFastStore::new();
        store.stream_create_group("s", "g").await.unwrap();
        let id = store
            .stream_append("s", &[("k".to_string(), "v".to_string())])
            .await
            .unwrap();

        let read = store
            .stream_read_group("s", "g", "a", 1, Duration::ZERO, ReadCursor::New)
            .await
            .unwrap();
        assert_eq!(read[0].id, id);

        let again = store
            .stream_read_group("s", "g", "a", 10, Duration::ZERO, ReadCursor::Pending)
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert!(store
            .stream_read_group("s", "g", "b", 10, Duration::ZERO, ReadCursor::Pending)
            .await
            .unwrap()
            .is_empty());

        let pending = store.stream_pending("s", "g", None, 10).await.unwrap();
        assert_eq!(pending[0].consumer, "a");
        assert_eq!(pending[0].delivery_count, 2);

        let claimed = store
            .stream_claim("s", "g", "b", Duration::ZERO, &[id.clone()])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(store.stream_pending("s", "g", None, 10).await.unwrap()[0].consumer, "b");

        store.stream_ack("s", "g", &id).await.unwrap();
        assert_eq!(store.pending_len("s", "g").unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_respects_min_idle() {
        let store = InMemoryFastStore::new();
        store.stream_create_group("s", "g").await.unwrap();
        let id = store.stream_append("s", &[]).await.unwrap();
        store
            .stream_read_group("s", "g", "a", 1, Duration::ZERO, ReadCursor::New)
            .await
            .unwrap();

        let early = store
            .stream_claim("s", "g", "b", Duration::from_secs(10), &[id.clone()])
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        let late = store
            .stream_claim("s", "g", "b", Duration::from_secs(10), &[id])
            .await
            .unwrap();
        assert_eq!(late.len(), 1);
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let store = InMemoryFastStore::new();
        store.stream_create_group("s", "g").await.unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .stream_read_group("s", "g", "a", 1, Duration::from_secs(5), ReadCursor::New)
                    .await
            })
        };
        tokio::task::yield_now().await;
        store.stream_append("s", &[("k".to_string(), "v".to_string())]).await.unwrap();

        let read = reader.await.unwrap().unwrap();
        assert_eq!(read.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryFastStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.hash_get_all("k").await,
            Err(FlashSaleError::StoreUnavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.hash_get_all("k").await.unwrap().is_empty());
    }
}
