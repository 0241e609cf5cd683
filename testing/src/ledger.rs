//! In-memory [`Ledger`] with transactional semantics.

use flashsale_core::{
    Account, AccountId, FlashSaleError, FulfillmentOutcome, FulfillmentRecord, Ledger, OfferId,
    Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    subscriptions: HashSet<(AccountId, AccountId)>,
    offer_stock: HashMap<OfferId, u32>,
}

/// Mock ledger.
///
/// The whole fulfillment step runs under one lock, so it either applies
/// completely or not at all, like the Postgres transaction it stands in for.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    failing: Arc<AtomicBool>,
    apply_calls: Arc<AtomicU64>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account with a balance and no subscription fee.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn add_account(&self, id: AccountId, credits: u64) -> Result<()> {
        self.lock()?.accounts.insert(
            id,
            Account {
                id,
                email: format!("user{id}@example.com"),
                credits,
                subscription_fee: 0,
            },
        );
        Ok(())
    }

    /// Mirror an offer's durable stock counter.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn add_offer(&self, id: OfferId, stock: u32) -> Result<()> {
        self.lock()?.offer_stock.insert(id, stock);
        Ok(())
    }

    /// Overwrite a balance.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::AccountNotFound`] for unknown accounts.
    pub fn set_credits(&self, id: AccountId, credits: u64) -> Result<()> {
        let mut state = self.lock()?;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(FlashSaleError::AccountNotFound(id))?;
        account.credits = credits;
        Ok(())
    }

    /// Current balance, `None` for unknown accounts.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn balance(&self, id: AccountId) -> Result<Option<u64>> {
        Ok(self.lock()?.accounts.get(&id).map(|a| a.credits))
    }

    /// Durable stock counter of an offer.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn offer_stock(&self, id: OfferId) -> Result<Option<u32>> {
        Ok(self.lock()?.offer_stock.get(&id).copied())
    }

    /// Whether `reader` subscribes to `author`.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn has_subscription(&self, reader: AccountId, author: AccountId) -> Result<bool> {
        Ok(self.lock()?.subscriptions.contains(&(reader, author)))
    }

    /// Number of subscriptions created.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn subscription_count(&self) -> Result<usize> {
        Ok(self.lock()?.subscriptions.len())
    }

    /// Make every fulfillment fail with a database error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `apply_fulfillment` calls, including failed ones.
    #[must_use]
    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| FlashSaleError::Database("Mutex lock failed".to_string()))
    }
}

impl Ledger for InMemoryLedger {
    async fn apply_fulfillment(&self, record: &FulfillmentRecord) -> Result<FulfillmentOutcome> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FlashSaleError::Database("connection reset (injected)".to_string()));
        }

        let mut state = self.lock()?;
        let pair = (record.reader_id, record.author_id);
        if state.subscriptions.contains(&pair) {
            return Ok(FulfillmentOutcome::AlreadyApplied);
        }
        if !state.accounts.contains_key(&record.author_id) {
            return Err(FlashSaleError::AccountNotFound(record.author_id));
        }

        let reader = state
            .accounts
            .get_mut(&record.reader_id)
            .ok_or(FlashSaleError::AccountNotFound(record.reader_id))?;
        if reader.credits < record.credit_amount {
            return Err(FlashSaleError::InsufficientCredits {
                account: record.reader_id,
                required: record.credit_amount,
                available: reader.credits,
            });
        }
        reader.credits -= record.credit_amount;

        if let Some(author) = state.accounts.get_mut(&record.author_id) {
            author.credits += record.credit_amount;
        }
        if let Some(stock) = state.offer_stock.get_mut(&record.offer_id) {
            *stock = stock.saturating_sub(1);
        }
        state.subscriptions.insert(pair);

        Ok(FulfillmentOutcome::Applied)
    }

    async fn credits(&self, account: AccountId) -> Result<Option<u64>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FlashSaleError::Database("connection reset (injected)".to_string()));
        }
        self.balance(account)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(credits: u64) -> FulfillmentRecord {
        FulfillmentRecord {
            reader_id: AccountId(1),
            author_id: AccountId(2),
            offer_id: OfferId(3),
            credit_amount: credits,
        }
    }

    #[tokio::test]
    async fn applies_once() {
        let ledger = InMemoryLedger::new();
        ledger.add_account(AccountId(1), 100).unwrap();
        ledger.add_account(AccountId(2), 0).unwrap();
        ledger.add_offer(OfferId(3), 5).unwrap();

        assert_eq!(
            ledger.apply_fulfillment(&record(40)).await.unwrap(),
            FulfillmentOutcome::Applied
        );
        assert_eq!(
            ledger.apply_fulfillment(&record(40)).await.unwrap(),
            FulfillmentOutcome::AlreadyApplied
        );

        assert_eq!(ledger.balance(AccountId(1)).unwrap(), Some(60));
        assert_eq!(ledger.balance(AccountId(2)).unwrap(), Some(40));
        assert_eq!(ledger.offer_stock(OfferId(3)).unwrap(), Some(4));
    }

    #[tokio::test]
    async fn insufficient_credits_changes_nothing() {
        let ledger = InMemoryLedger::new();
        ledger.add_account(AccountId(1), 10).unwrap();
        ledger.add_account(AccountId(2), 0).unwrap();

        let err = ledger.apply_fulfillment(&record(40)).await.unwrap_err();
        assert!(matches!(err, FlashSaleError::InsufficientCredits { available: 10, .. }));
        assert_eq!(ledger.balance(AccountId(1)).unwrap(), Some(10));
        assert_eq!(ledger.subscription_count().unwrap(), 0);
    }
}
