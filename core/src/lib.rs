//! # Flashsale Core
//!
//! Shared vocabulary for the flash-sale admission pipeline and the
//! read-through cache that sits beside it.
//!
//! This crate owns no I/O. It defines:
//!
//! - Domain types ([`types`], [`offer`]): identifiers, fulfillment records,
//!   admission outcomes
//! - Collaborator traits: [`fast_store::FastStore`] (atomic scripts, hashes,
//!   consumer-group streams), [`ledger::Ledger`] (transactional system of
//!   record) and [`ledger::EntitySource`] (point lookups behind the cache)
//! - The error taxonomy ([`error`])
//! - Configuration with defaults ([`config`]) and the fast-path keyspace
//!   ([`keys`])
//!
//! ## Architecture
//!
//! ```text
//! purchase ──► AdmissionController ──► FastStore (atomic script)
//!                                        │  decrement stock
//!                                        │  add reader to grant set
//!                                        │  XADD fulfillment record
//!                                        ▼
//!                                  stream.orders ──► FulfillmentWorker ──► Ledger
//!                                        ▲                  │ ack on success
//!                                        └── RecoverySweeper (claims stalled entries)
//! ```
//!
//! Implementations live in `flashsale-redis` (Redis), `flashsale-postgres`
//! (PostgreSQL) and `flashsale-testing` (in-memory doubles).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod environment;
pub mod error;
pub mod fast_store;
pub mod keys;
pub mod ledger;
pub mod offer;
pub mod types;

pub use config::{CacheConfig, OfferLimits, PipelineConfig};
pub use environment::{Clock, SystemClock};
pub use error::{FlashSaleError, Result};
pub use fast_store::{FastStore, ScriptKey};
pub use ledger::{EntitySource, Ledger};
pub use offer::{Offer, OfferDraft};
pub use types::{
    Account, AccountId, AdmissionOutcome, EntryId, FulfillmentOutcome, FulfillmentRecord,
    OfferId, PendingEntry, PurchaseRequest, ReadCursor, StreamEntry,
};
