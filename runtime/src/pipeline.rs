//! Fulfillment pipeline lifecycle.
//!
//! # Startup
//!
//! 1. Create the consumer group (retried while the store is unreachable)
//! 2. Spawn `workers` fulfillment workers named `{prefix}-{i}`
//! 3. Spawn the recovery sweeper named `{prefix}-sweeper`
//!
//! # Graceful Shutdown
//!
//! [`RunningPipeline::stop`] broadcasts the shutdown signal and gives each
//! task `timeout` to finish its current batch. Entries that were read but
//! not acknowledged when a task is abandoned stay pending and are picked up
//! by the next run.
//!
//! # Example
//!
//! ```rust,ignore
//! let pipeline = FulfillmentPipeline::new(store, ledger, PipelineConfig::default())
//!     .start()
//!     .await?;
//!
//! shutdown_signal().await;
//! pipeline.stop(Duration::from_secs(10)).await;
//! ```

use crate::fulfillment::FulfillmentProcessor;
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::sweeper::RecoverySweeper;
use crate::worker::FulfillmentWorker;
use flashsale_core::{FastStore, FlashSaleError, Ledger, PipelineConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Not-yet-started fulfillment pipeline.
pub struct FulfillmentPipeline<S, L> {
    store: S,
    ledger: L,
    config: PipelineConfig,
    retry: RetryPolicy,
}

impl<S, L> FulfillmentPipeline<S, L>
where
    S: FastStore + 'static,
    L: Ledger + 'static,
{
    /// Create a pipeline.
    #[must_use]
    pub fn new(store: S, ledger: L, config: PipelineConfig) -> Self {
        Self {
            store,
            ledger,
            config,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the backoff used for group creation and failed reads.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create the consumer group and spawn workers and sweeper.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::Configuration`] if `workers` or `batch_size` is zero
    /// - [`FlashSaleError::StoreUnavailable`] if the group cannot be created
    ///   within the retry policy's attempts
    pub async fn start(self) -> Result<RunningPipeline> {
        let Self { store, ledger, config, retry } = self;

        if config.workers == 0 {
            return Err(FlashSaleError::Configuration(
                "pipeline needs at least one worker".to_string(),
            ));
        }
        if config.batch_size == 0 {
            return Err(FlashSaleError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }

        {
            let store = &store;
            let (stream, group) = (config.stream.as_str(), config.group.as_str());
            retry_with_predicate(
                &retry,
                move || store.stream_create_group(stream, group),
                FlashSaleError::is_retryable,
            )
            .await?;
        }

        let processor = Arc::new(FulfillmentProcessor::new(
            store,
            ledger,
            config.stream.clone(),
            config.group.clone(),
        ));
        let (shutdown, _) = broadcast::channel(1);
        let sweep_signal = Arc::new(Notify::new());

        let mut tasks = Vec::with_capacity(config.workers + 1);
        for index in 0..config.workers {
            let worker = FulfillmentWorker::new(
                Arc::clone(&processor),
                config.worker_name(index),
                config.batch_size,
                config.block,
                Arc::clone(&sweep_signal),
            )
            .with_retry_policy(retry.clone());
            let name = worker.name().to_string();
            tasks.push((name, tokio::spawn(worker.run(shutdown.subscribe()))));
        }

        let sweeper = RecoverySweeper::new(processor, &config, sweep_signal);
        let name = sweeper.name().to_string();
        tasks.push((name, tokio::spawn(sweeper.run(shutdown.subscribe()))));

        info!(
            stream = %config.stream,
            group = %config.group,
            workers = config.workers,
            "Fulfillment pipeline started"
        );

        Ok(RunningPipeline { shutdown, tasks })
    }
}

/// Handle to a started pipeline.
///
/// Dropping the handle without calling [`RunningPipeline::stop`] drops the
/// shutdown sender, which also stops every task.
pub struct RunningPipeline {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl RunningPipeline {
    /// Consumer names of the running tasks, workers first.
    #[must_use]
    pub fn consumers(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Signal shutdown and wait up to `timeout` for each task.
    pub async fn stop(self, timeout: Duration) {
        info!("Stopping fulfillment pipeline");
        let _ = self.shutdown.send(());

        for (consumer, handle) in self.tasks {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(consumer = %consumer, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(consumer = %consumer, error = %e, "Task failed"),
                Err(_) => warn!(consumer = %consumer, "Task shutdown timed out"),
            }
        }

        info!("Fulfillment pipeline stopped");
    }
}
