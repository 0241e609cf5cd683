//! Pipeline, cache and offer configuration.
//!
//! Values should be provided by the application; the defaults below match
//! the production settings the pipeline was tuned with.

use crate::keys;
use std::time::Duration;

/// Fulfillment worker pool and recovery sweeper configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stream holding fulfillment records.
    ///
    /// Default: `stream.orders`
    pub stream: String,

    /// Consumer group shared by all workers and the sweeper.
    ///
    /// Default: `fulfillment`
    pub group: String,

    /// Prefix for consumer names. Worker `i` is `{prefix}-{i}`, the sweeper
    /// is `{prefix}-sweeper`.
    ///
    /// Consumer names must be stable across restarts so a restarted worker
    /// finds its own pending backlog.
    pub consumer_prefix: String,

    /// Number of competing workers.
    ///
    /// Default: 1
    pub workers: usize,

    /// Entries fetched per read.
    ///
    /// Default: 1
    pub batch_size: usize,

    /// Maximum time a worker blocks waiting for new entries.
    ///
    /// Default: 2 seconds
    pub block: Duration,

    /// Interval between scheduled sweeps of the pending list.
    ///
    /// Default: 30 seconds
    pub sweep_interval: Duration,

    /// Minimum idle time before the sweeper claims an entry from another
    /// consumer.
    ///
    /// Default: 10 seconds
    pub min_idle: Duration,

    /// Pending entries listed per page. A sweep walks every page, so entries
    /// that keep failing never hide newer stalled ones.
    ///
    /// Default: 100
    pub sweep_batch: usize,

    /// Delivery count after which an entry is reported as poison on every sweep.
    ///
    /// Default: 10
    pub poison_threshold: u64,
}

impl PipelineConfig {
    /// Create a configuration for the given stream and group.
    #[must_use]
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            ..Self::default()
        }
    }

    /// Set the consumer name prefix.
    #[must_use]
    pub fn with_consumer_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_prefix = prefix.into();
        self
    }

    /// Set the number of workers.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the read batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the blocking read timeout.
    #[must_use]
    pub const fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the minimum idle time before claiming.
    #[must_use]
    pub const fn with_min_idle(mut self, min_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the pending-list page size of a sweep.
    #[must_use]
    pub const fn with_sweep_batch(mut self, batch: usize) -> Self {
        self.sweep_batch = batch;
        self
    }

    /// Set the poison reporting threshold.
    #[must_use]
    pub const fn with_poison_threshold(mut self, threshold: u64) -> Self {
        self.poison_threshold = threshold;
        self
    }

    /// Consumer name of worker `index`.
    #[must_use]
    pub fn worker_name(&self, index: usize) -> String {
        format!("{}-{index}", self.consumer_prefix)
    }

    /// Consumer name used by the recovery sweeper.
    #[must_use]
    pub fn sweeper_name(&self) -> String {
        format!("{}-sweeper", self.consumer_prefix)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream: keys::DEFAULT_STREAM.to_string(),
            group: keys::DEFAULT_GROUP.to_string(),
            consumer_prefix: "worker".to_string(),
            workers: 1,
            batch_size: 1,
            block: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(30),
            min_idle: Duration::from_secs(10),
            sweep_batch: 100,
            poison_threshold: 10,
        }
    }
}

/// Read-through cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of a populated entry.
    ///
    /// Default: 30 minutes
    pub entry_ttl: Duration,

    /// Lifetime of a "known absent" tombstone.
    ///
    /// Default: 2 minutes
    pub tombstone_ttl: Duration,

    /// Lifetime of the per-key repopulation mutex.
    ///
    /// Default: 1 second
    pub lock_ttl: Duration,

    /// Fixed wait before retrying a lookup whose mutex is held elsewhere.
    ///
    /// Default: 50 milliseconds
    pub retry_delay: Duration,

    /// Lookups attempted before falling back to a direct source read.
    ///
    /// Default: 40 (two lock lifetimes at the default retry delay)
    pub max_attempts: u32,
}

impl CacheConfig {
    /// Set the entry TTL.
    #[must_use]
    pub const fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Set the tombstone TTL.
    #[must_use]
    pub const fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    /// Set the repopulation mutex TTL.
    #[must_use]
    pub const fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the contention retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the maximum number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(30 * 60),
            tombstone_ttl: Duration::from_secs(2 * 60),
            lock_ttl: Duration::from_secs(1),
            retry_delay: Duration::from_millis(50),
            max_attempts: 40,
        }
    }
}

/// Bounds an author must respect when publishing an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferLimits {
    /// Largest discount percentage (exclusive of 100).
    pub max_discount_percent: u32,
    /// Largest stock an offer may carry.
    pub max_stock: u32,
    /// Longest offer window, in hours.
    pub max_duration_hours: u32,
    /// Extra lifetime of the fast-path reservation past the window end.
    pub reservation_grace: Duration,
}

impl Default for OfferLimits {
    fn default() -> Self {
        Self {
            max_discount_percent: 99,
            max_stock: 1000,
            max_duration_hours: 24,
            reservation_grace: Duration::from_secs(60 * 60),
        }
    }
}
