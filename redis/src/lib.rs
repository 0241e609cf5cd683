//! Redis fast-path store for the flash-sale pipeline.
//!
//! Implements [`flashsale_core::FastStore`] on top of Redis:
//!
//! - atomic admission and unlock as Lua scripts ([`scripts`])
//! - hashes and conditional `SET NX PX` for reservations and the cache
//! - consumer-group streams (`XREADGROUP`, `XACK`, `XPENDING`, `XCLAIM`)
//!   for fulfillment records
//!
//! # Example
//!
//! ```no_run
//! use flashsale_core::FastStore;
//! use flashsale_redis::RedisFastStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisFastStore::new("redis://127.0.0.1:6379").await?;
//! store.stream_create_group("stream.orders", "fulfillment").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scripts;
pub mod store;

pub use store::RedisFastStore;
