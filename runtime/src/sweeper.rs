//! Recovery sweeper: re-drives entries stuck in the pending list.
//!
//! An entry stays pending when its consumer crashed between delivery and
//! ack, or when fulfillment failed. On every sweep the sweeper pages through
//! the group's whole pending list, `sweep_batch` entries at a time, claims
//! the ones idle for at least `min_idle` into its own consumer name, and
//! processes them exactly like a worker would. Entries it fails on remain pending under the sweeper's name and
//! are claimed again on a later sweep.
//!
//! Entries delivered more than `poison_threshold` times are reported at
//! `error` level on every sweep but are still retried; nothing is dropped
//! automatically.

use crate::fulfillment::FulfillmentProcessor;
use crate::metrics::FulfillmentMetrics;
use flashsale_core::{EntryId, FastStore, Ledger, PendingEntry, PipelineConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::{Instant, MissedTickBehavior};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending entries inspected
    pub inspected: usize,
    /// Entries over the poison threshold
    pub poison: usize,
    /// Entries claimed from other consumers (or re-claimed from ourselves)
    pub claimed: usize,
    /// Claimed entries that were acknowledged
    pub acked: usize,
}

/// Periodic claimer of stalled entries.
pub struct RecoverySweeper<S, L> {
    processor: Arc<FulfillmentProcessor<S, L>>,
    name: String,
    interval: Duration,
    min_idle: Duration,
    batch: usize,
    poison_threshold: u64,
    signal: Arc<Notify>,
}

impl<S: FastStore, L: Ledger> RecoverySweeper<S, L> {
    /// Create a sweeper using the sweep settings of `config`.
    #[must_use]
    pub fn new(
        processor: Arc<FulfillmentProcessor<S, L>>,
        config: &PipelineConfig,
        signal: Arc<Notify>,
    ) -> Self {
        Self {
            processor,
            name: config.sweeper_name(),
            interval: config.sweep_interval,
            min_idle: config.min_idle,
            batch: config.sweep_batch.max(1),
            poison_threshold: config.poison_threshold,
            signal,
        }
    }

    /// Consumer name claimed entries are assigned to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one sweep.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::StoreUnavailable`](flashsale_core::FlashSaleError::StoreUnavailable)
    /// if the pending list cannot be read or the claim fails. Fulfillment
    /// failures are not errors; they show up as `claimed - acked`.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let store = self.processor.store();
        let stream = self.processor.stream();
        let group = self.processor.group();

        let mut report = SweepReport::default();
        let mut after: Option<EntryId> = None;
        loop {
            let page = store
                .stream_pending(stream, group, after.as_ref(), self.batch)
                .await?;
            report.inspected += page.len();
            let last_page = page.len() < self.batch;
            after = page.last().map(|entry| entry.id.clone());

            self.recover_page(&page, &mut report).await?;

            if last_page {
                break;
            }
        }

        FulfillmentMetrics::record_sweep(report.claimed);
        if report.claimed > 0 {
            tracing::info!(
                consumer = %self.name,
                claimed = report.claimed,
                acked = report.acked,
                "Recovered stalled entries"
            );
        } else {
            tracing::debug!(inspected = report.inspected, "Sweep found nothing to recover");
        }

        Ok(report)
    }

    async fn recover_page(&self, page: &[PendingEntry], report: &mut SweepReport) -> Result<()> {
        let mut stalled = Vec::new();
        for entry in page {
            if entry.delivery_count > self.poison_threshold {
                report.poison += 1;
                tracing::error!(
                    entry_id = %entry.id,
                    consumer = %entry.consumer,
                    delivery_count = entry.delivery_count,
                    idle_ms = u64::try_from(entry.idle.as_millis()).unwrap_or(u64::MAX),
                    "Entry keeps failing fulfillment"
                );
            }
            if entry.idle >= self.min_idle {
                stalled.push(entry.id.clone());
            }
        }
        if stalled.is_empty() {
            return Ok(());
        }

        let claimed = self
            .processor
            .store()
            .stream_claim(
                self.processor.stream(),
                self.processor.group(),
                &self.name,
                self.min_idle,
                &stalled,
            )
            .await?;
        report.claimed += claimed.len();

        for entry in &claimed {
            if self.processor.process(entry, &self.name).await.is_acked() {
                report.acked += 1;
            }
        }
        Ok(())
    }

    /// Sweep every `sweep_interval`, and `min_idle` after a worker reports
    /// a failure, until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            consumer = %self.name,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Recovery sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scheduled: Option<Instant> = None;

        loop {
            let deadline = async move {
                match scheduled {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
                () = deadline => {}
                () = self.signal.notified(), if scheduled.is_none() => {
                    // Failed entries only become claimable once idle long enough.
                    scheduled = Some(Instant::now() + self.min_idle);
                    continue;
                }
            }

            scheduled = None;
            if let Err(e) = self.sweep().await {
                tracing::warn!(consumer = %self.name, error = %e, "Sweep failed");
            }
        }

        tracing::info!(consumer = %self.name, "Recovery sweeper stopped");
    }
}
