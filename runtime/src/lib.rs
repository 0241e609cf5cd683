//! # Flashsale Runtime
//!
//! The moving parts of the flash-sale pipeline, generic over the
//! collaborator traits in `flashsale-core`.
//!
//! ## Core Components
//!
//! - **Admission** ([`AdmissionController`]): decides a purchase in one
//!   atomic script call and enqueues the fulfillment record
//! - **Fulfillment** ([`FulfillmentPipeline`]): competing workers on a
//!   consumer group plus a recovery sweeper for stalled entries
//! - **Cache** ([`ReadThroughCache`]): stampede-protected read-through
//!   cache with tombstones for missing entities
//! - **Observability** ([`metrics`]): Prometheus exporter and metric
//!   recorders
//!
//! ## Example
//!
//! ```
//! use flashsale_core::{AccountId, AdmissionOutcome, OfferDraft, OfferId, PipelineConfig, PurchaseRequest};
//! use flashsale_runtime::{AdmissionController, FulfillmentPipeline};
//! use flashsale_testing::{InMemoryFastStore, InMemoryLedger, test_clock};
//! use flashsale_core::Clock;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryFastStore::new();
//! let ledger = InMemoryLedger::new();
//! ledger.add_account(AccountId(1), 100).unwrap();
//! ledger.add_account(AccountId(2), 0).unwrap();
//!
//! let admission = AdmissionController::new(store.clone(), test_clock());
//! let draft = OfferDraft {
//!     author_id: AccountId(2),
//!     subscription_fee: 80,
//!     discount_percent: 50,
//!     stock: 1,
//!     duration_hours: 1,
//! };
//! admission.publish_offer(&draft.into_offer(OfferId(1), test_clock().now())).await.unwrap();
//!
//! let request = PurchaseRequest {
//!     reader_id: AccountId(1),
//!     author_id: AccountId(2),
//!     offer_id: OfferId(1),
//!     credit_amount: 40,
//! };
//! assert_eq!(admission.admit_purchase(&request).await.unwrap(), AdmissionOutcome::Admitted);
//!
//! let config = PipelineConfig::default().with_block(Duration::from_millis(10));
//! let pipeline = FulfillmentPipeline::new(store, ledger.clone(), config).start().await.unwrap();
//! while ledger.subscription_count().unwrap() == 0 {
//!     tokio::time::sleep(Duration::from_millis(5)).await;
//! }
//! pipeline.stop(Duration::from_secs(1)).await;
//!
//! assert_eq!(ledger.balance(AccountId(2)).unwrap(), Some(40));
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Purchase admission and offer publication
pub mod admission;

/// Read-through cache with stampede protection
pub mod cache;

/// Applying a single stream entry to the ledger
pub mod fulfillment;

/// Prometheus metrics for observability
pub mod metrics;

/// Worker pool and sweeper lifecycle
pub mod pipeline;

/// Retry logic with exponential backoff
pub mod retry;

/// Recovery of stalled pending entries
pub mod sweeper;

/// Competing consumer loop
pub mod worker;

pub use admission::AdmissionController;
pub use cache::ReadThroughCache;
pub use fulfillment::{FulfillmentProcessor, Processed};
pub use pipeline::{FulfillmentPipeline, RunningPipeline};
pub use retry::RetryPolicy;
pub use sweeper::{RecoverySweeper, SweepReport};
pub use worker::FulfillmentWorker;
