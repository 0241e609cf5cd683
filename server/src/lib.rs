//! # Flashsale Server
//!
//! Runs the flash-sale service on one node: the Redis fast path, the
//! `PostgreSQL` system of record, the fulfillment worker pool and its
//! recovery sweeper, and the Prometheus exporter.
//!
//! Several nodes may run side by side. They share the consumer group, so
//! each fulfillment record is applied by exactly one of them; each node
//! needs its own `FLASHSALE_CONSUMER_PREFIX`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod lifecycle;

pub use app::FlashSaleApp;
pub use config::Config;
