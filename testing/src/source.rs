//! Counting [`EntitySource`] for cache tests.

use flashsale_core::{Account, AccountId, EntitySource, FlashSaleError, Result, keys};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Account source that counts loads and can be slowed down or broken.
#[derive(Debug, Clone, Default)]
pub struct CountingSource {
    accounts: Arc<Mutex<HashMap<u64, Account>>>,
    loads: Arc<AtomicUsize>,
    delay: Duration,
    failing: Arc<AtomicBool>,
}

impl CountingSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every load, to widen race windows.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add or replace an account.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn insert(&self, account: Account) -> Result<()> {
        self.accounts
            .lock()
            .map_err(|_| FlashSaleError::Database("Mutex lock failed".to_string()))?
            .insert(account.id.0, account);
        Ok(())
    }

    /// Make every load fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Loads performed so far.
    #[must_use]
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

/// Build an account with defaults for the fields tests rarely care about.
#[must_use]
pub fn account(id: u64, credits: u64) -> Account {
    Account {
        id: AccountId(id),
        email: format!("user{id}@example.com"),
        credits,
        subscription_fee: 0,
    }
}

impl EntitySource for CountingSource {
    type Entity = Account;

    fn kind(&self) -> &'static str {
        keys::ACCOUNT_KIND
    }

    async fn load(&self, id: u64) -> Result<Option<Account>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FlashSaleError::Database("source unavailable (injected)".to_string()));
        }
        Ok(self
            .accounts
            .lock()
            .map_err(|_| FlashSaleError::Database("Mutex lock failed".to_string()))?
            .get(&id)
            .cloned())
    }
}
