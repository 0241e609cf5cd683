//! # Flash-sale testing
//!
//! In-memory doubles for the flash-sale collaborators.
//!
//! This crate provides:
//! - [`InMemoryFastStore`]: hashes, sets, TTLs, consumer-group streams and
//!   native versions of the atomic scripts
//! - [`InMemoryLedger`]: transactional subscription ledger
//! - [`CountingSource`]: entity source that counts loads for cache tests
//! - [`FixedClock`] and [`ManualClock`]: deterministic time
//! - [`properties`]: proptest strategies for domain types
//!
//! ## Example
//!
//! ```
//! use flashsale_core::{AccountId, Ledger};
//! use flashsale_testing::InMemoryLedger;
//!
//! # tokio_test::block_on(async {
//! let ledger = InMemoryLedger::new();
//! ledger.add_account(AccountId(1), 500).unwrap();
//! assert_eq!(ledger.credits(AccountId(1)).await.unwrap(), Some(500));
//! # });
//! ```

pub mod clock;
pub mod ledger;
pub mod properties;
pub mod source;
pub mod store;

// Re-export commonly used items
pub use clock::{FixedClock, ManualClock, test_clock};
pub use ledger::InMemoryLedger;
pub use source::{CountingSource, account};
pub use store::InMemoryFastStore;
