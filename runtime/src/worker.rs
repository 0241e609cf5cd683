//! Fulfillment worker: one competing consumer of the stream.
//!
//! # Pattern: Drain-Then-Tail Loop
//!
//! ```text
//! cursor = Pending            // own backlog left by a previous run
//! loop {
//!     read batch (cursor)     // races the shutdown signal
//!     for entry in batch:
//!         process             // ack on success, leave pending on failure
//!     if cursor == Pending and (batch not full or anything failed):
//!         cursor = New        // tail the stream from here on
//!     if read failed:
//!         back off, keep going
//! }
//! ```
//!
//! A worker never exits because of a store or ledger error. Entries it
//! fails to apply stay in its pending list; the recovery sweeper picks them
//! up once they have been idle for `min_idle`, and the worker pokes the
//! sweeper so that happens promptly.
//!
//! Shutdown is only observed between batches: a batch that has been read
//! is always processed to completion.

use crate::fulfillment::FulfillmentProcessor;
use crate::retry::RetryPolicy;
use flashsale_core::{FastStore, Ledger, ReadCursor, Result, StreamEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

/// A fulfillment worker bound to one consumer name.
pub struct FulfillmentWorker<S, L> {
    /// Shared entry processor
    processor: Arc<FulfillmentProcessor<S, L>>,

    /// Stable consumer name within the group
    name: String,

    /// Entries per read
    batch_size: usize,

    /// Longest wait for new entries
    block: Duration,

    /// Backoff applied to failed reads
    retry: RetryPolicy,

    /// Wakes the recovery sweeper when an entry is left pending
    sweep_signal: Arc<Notify>,
}

impl<S: FastStore, L: Ledger> FulfillmentWorker<S, L> {
    /// Create a worker.
    #[must_use]
    pub fn new(
        processor: Arc<FulfillmentProcessor<S, L>>,
        name: impl Into<String>,
        batch_size: usize,
        block: Duration,
        sweep_signal: Arc<Notify>,
    ) -> Self {
        Self {
            processor,
            name: name.into(),
            batch_size: batch_size.max(1),
            block,
            retry: RetryPolicy::default(),
            sweep_signal,
        }
    }

    /// Set the backoff applied to failed reads.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until `shutdown` fires (or its sender is dropped).
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            consumer = %self.name,
            stream = %self.processor.stream(),
            group = %self.processor.group(),
            "Fulfillment worker started"
        );

        let mut cursor = ReadCursor::Pending;
        let mut failed_reads: u32 = 0;

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                read = self.read(cursor) => read,
            };

            match read {
                Ok(entries) => {
                    failed_reads = 0;
                    let full = entries.len() >= self.batch_size;
                    let all_acked = self.process_batch(&entries).await;

                    if cursor == ReadCursor::Pending && (!full || !all_acked) {
                        debug!(consumer = %self.name, "Pending backlog drained, tailing new entries");
                        cursor = ReadCursor::New;
                    }
                }
                Err(e) => {
                    let delay = self.retry.delay_for_attempt(failed_reads);
                    failed_reads = failed_reads.saturating_add(1);
                    warn!(
                        consumer = %self.name,
                        attempt = failed_reads,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Stream read failed, backing off"
                    );

                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(consumer = %self.name, "Fulfillment worker stopped");
    }

    async fn read(&self, cursor: ReadCursor) -> Result<Vec<StreamEntry>> {
        self.processor
            .store()
            .stream_read_group(
                self.processor.stream(),
                self.processor.group(),
                &self.name,
                self.batch_size,
                self.block,
                cursor,
            )
            .await
    }

    /// Process a batch in order. Returns `false` if any entry was left pending.
    async fn process_batch(&self, entries: &[StreamEntry]) -> bool {
        let mut all_acked = true;
        for entry in entries {
            if !self.processor.process(entry, &self.name).await.is_acked() {
                all_acked = false;
            }
        }
        if !all_acked {
            self.sweep_signal.notify_one();
        }
        all_acked
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_core::{AccountId, FulfillmentRecord, OfferId};
    use flashsale_testing::{InMemoryFastStore, InMemoryLedger};

    const STREAM: &str = "orders";
    const GROUP: &str = "g";

    fn record(reader: u64) -> FulfillmentRecord {
        FulfillmentRecord {
            reader_id: AccountId(reader),
            author_id: AccountId(100),
            offer_id: OfferId(1),
            credit_amount: 10,
        }
    }

    type Processor = Arc<FulfillmentProcessor<InMemoryFastStore, InMemoryLedger>>;

    async fn setup() -> (InMemoryFastStore, InMemoryLedger, Processor) {
        let store = InMemoryFastStore::new();
        let ledger = InMemoryLedger::new();
        ledger.add_account(AccountId(100), 0).unwrap();
        for reader in 1..=3 {
            ledger.add_account(AccountId(reader), 50).unwrap();
        }
        store.stream_create_group(STREAM, GROUP).await.unwrap();
        let processor = Arc::new(FulfillmentProcessor::new(
            store.clone(),
            ledger.clone(),
            STREAM,
            GROUP,
        ));
        (store, ledger, processor)
    }

    fn worker(
        processor: Processor,
        signal: Arc<Notify>,
    ) -> FulfillmentWorker<InMemoryFastStore, InMemoryLedger> {
        FulfillmentWorker::new(processor, "w-0", 1, Duration::from_millis(20), signal)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn drains_own_backlog_before_new_entries() {
        let (store, ledger, processor) = setup().await;

        // A previous incarnation of "w-0" read two entries and died.
        for reader in 1..=2 {
            store.stream_append(STREAM, &record(reader).to_fields()).await.unwrap();
        }
        store
            .stream_read_group(STREAM, GROUP, "w-0", 2, Duration::ZERO, ReadCursor::New)
            .await
            .unwrap();
        store.stream_append(STREAM, &record(3).to_fields()).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let worker = worker(processor, Arc::new(Notify::new()));
        let handle = tokio::spawn(worker.run(rx));

        wait_for(|| ledger.subscription_count().unwrap() == 3).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(ledger.subscription_count().unwrap(), 3);
        assert_eq!(store.pending_len(STREAM, GROUP).unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_entry_stays_pending_and_signals_sweeper() {
        let (store, ledger, processor) = setup().await;
        ledger.set_credits(AccountId(1), 0).unwrap();
        store.stream_append(STREAM, &record(1).to_fields()).await.unwrap();

        let signal = Arc::new(Notify::new());
        let (tx, rx) = broadcast::channel(1);
        let worker = worker(processor, Arc::clone(&signal));
        let handle = tokio::spawn(worker.run(rx));

        tokio::time::timeout(Duration::from_secs(1), signal.notified()).await.unwrap();
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(store.pending_len(STREAM, GROUP).unwrap(), 1);
        assert_eq!(ledger.subscription_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn survives_store_outage() {
        let (store, ledger, processor) = setup().await;
        store.set_unavailable(true);

        let (tx, rx) = broadcast::channel(1);
        let worker = worker(processor, Arc::new(Notify::new())).with_retry_policy(
            RetryPolicy::new()
                .with_initial_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(10)),
        );
        let handle = tokio::spawn(worker.run(rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.set_unavailable(false);
        store.stream_append(STREAM, &record(2).to_fields()).await.unwrap();

        wait_for(|| ledger.subscription_count().unwrap() == 1).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(ledger.has_subscription(AccountId(2), AccountId(100)).unwrap());
    }

    #[tokio::test]
    async fn stops_when_sender_is_dropped() {
        let (_store, _ledger, processor) = setup().await;
        let (tx, rx) = broadcast::channel::<()>(1);
        let worker = worker(processor, Arc::new(Notify::new()));
        let handle = tokio::spawn(worker.run(rx));

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
