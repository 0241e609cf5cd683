//! System-of-record collaborators.
//!
//! The relational store is an external collaborator: the pipeline only
//! needs a transactional fulfillment step and point lookups for the cache.

use crate::error::Result;
use crate::types::{AccountId, FulfillmentOutcome, FulfillmentRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;

/// Transactional ledger that turns fulfillment records into subscriptions.
///
/// # Contract
///
/// [`Ledger::apply_fulfillment`] runs as **one transaction**:
///
/// 1. Create `Subscription{reader, author}`. If the pair already exists the
///    record was applied before: return
///    [`FulfillmentOutcome::AlreadyApplied`] without touching balances.
/// 2. Re-check the reader's balance and fail closed with
///    [`FlashSaleError::InsufficientCredits`](crate::FlashSaleError::InsufficientCredits).
/// 3. Debit the reader, credit the author.
///
/// Any error rolls the whole transaction back, so the record can be
/// redelivered safely.
pub trait Ledger: Send + Sync {
    /// Apply a fulfillment record exactly-once-effectively.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::InsufficientCredits`](crate::FlashSaleError::InsufficientCredits)
    ///   if the reader can no longer pay
    /// - [`FlashSaleError::AccountNotFound`](crate::FlashSaleError::AccountNotFound)
    ///   if either account is missing
    /// - [`FlashSaleError::Database`](crate::FlashSaleError::Database) on any
    ///   storage failure
    fn apply_fulfillment(
        &self,
        record: &FulfillmentRecord,
    ) -> impl Future<Output = Result<FulfillmentOutcome>> + Send;

    /// Current balance of an account, `None` if it does not exist.
    ///
    /// Reads the committed balance, bypassing any cache.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`](crate::FlashSaleError::Database)
    /// on storage failure.
    fn credits(&self, account: AccountId) -> impl Future<Output = Result<Option<u64>>> + Send;
}

/// Point lookups shielded by the read-through cache.
pub trait EntitySource: Send + Sync {
    /// Entity type. Serialized as JSON into the cache.
    type Entity: Serialize + DeserializeOwned + Send + Sync;

    /// Short name used in cache keys (`cache:{kind}:{id}`).
    fn kind(&self) -> &'static str;

    /// Load an entity, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the source itself fails. "Not found" is not an
    /// error.
    fn load(&self, id: u64) -> impl Future<Output = Result<Option<Self::Entity>>> + Send;
}

impl<L: Ledger + ?Sized> Ledger for std::sync::Arc<L> {
    fn apply_fulfillment(
        &self,
        record: &FulfillmentRecord,
    ) -> impl Future<Output = Result<FulfillmentOutcome>> + Send {
        (**self).apply_fulfillment(record)
    }

    fn credits(&self, account: AccountId) -> impl Future<Output = Result<Option<u64>>> + Send {
        (**self).credits(account)
    }
}

impl<E: EntitySource + ?Sized> EntitySource for std::sync::Arc<E> {
    type Entity = E::Entity;

    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn load(&self, id: u64) -> impl Future<Output = Result<Option<Self::Entity>>> + Send {
        (**self).load(id)
    }
}
