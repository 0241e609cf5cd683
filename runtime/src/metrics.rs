//! Prometheus metrics for the flash-sale pipeline.
//!
//! Counters and histograms are recorded through the `metrics` facade from
//! every component; [`MetricsServer`] installs the Prometheus recorder and
//! serves the scrape endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use flashsale_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use flashsale_core::AdmissionOutcome;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a
    /// warning and returns `Ok` without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                self.handle = Some(handle);
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!("Metrics exporter stopped");
                    }
                });
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "flashsale_admissions_total",
        "Purchase attempts by admission outcome"
    );
    describe_histogram!(
        "flashsale_admission_duration_seconds",
        "Time taken to decide an admission"
    );
    describe_counter!(
        "flashsale_fulfillments_total",
        "Fulfillment records processed by result"
    );
    describe_counter!("flashsale_sweeps_total", "Recovery sweeps run");
    describe_counter!(
        "flashsale_reclaimed_entries_total",
        "Stalled entries claimed by the recovery sweeper"
    );
    describe_counter!(
        "flashsale_cache_lookups_total",
        "Read-through cache lookups by result"
    );
    describe_counter!("flashsale_offers_created_total", "Offers persisted");
    describe_counter!("flashsale_offers_published_total", "Offers published to the fast path");
}

/// Admission metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record a decided admission.
    pub fn record(outcome: AdmissionOutcome, duration: Duration) {
        counter!("flashsale_admissions_total", "outcome" => outcome.as_str()).increment(1);
        histogram!("flashsale_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an admission that failed closed.
    pub fn record_failure() {
        counter!("flashsale_admissions_total", "outcome" => "error").increment(1);
    }

    /// Record a published offer.
    pub fn record_publish() {
        counter!("flashsale_offers_published_total").increment(1);
    }
}

/// Fulfillment metrics recorder.
pub struct FulfillmentMetrics;

impl FulfillmentMetrics {
    /// Record a processed entry. `result` is one of `applied`,
    /// `already_applied`, `malformed`, `failed`.
    pub fn record(result: &'static str) {
        counter!("flashsale_fulfillments_total", "result" => result).increment(1);
    }

    /// Record a completed sweep and the entries it reclaimed.
    pub fn record_sweep(reclaimed: usize) {
        counter!("flashsale_sweeps_total").increment(1);
        counter!("flashsale_reclaimed_entries_total")
            .increment(u64::try_from(reclaimed).unwrap_or(u64::MAX));
    }
}

/// Cache metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a lookup. `result` is one of `hit`, `tombstone`, `loaded`,
    /// `degraded`, `fallback`.
    pub fn record(result: &'static str) {
        counter!("flashsale_cache_lookups_total", "result" => result).increment(1);
    }
}
