//! Turning one delivered stream entry into a ledger transaction.
//!
//! Shared by the workers and the recovery sweeper so both apply the same
//! ack rules:
//!
//! | Ledger result | Ack | Result |
//! |---|---|---|
//! | `Applied` | yes | [`Processed::Applied`] |
//! | `AlreadyApplied` | yes | [`Processed::AlreadyApplied`] |
//! | malformed entry | yes | [`Processed::Malformed`] |
//! | any error | no | [`Processed::Failed`] |
//!
//! An entry that is not acknowledged stays in the pending list and is
//! redelivered later, either to the same consumer on restart or to the
//! sweeper once it has been idle long enough.
//!
//! Once the ledger has applied a record (on this delivery or an earlier
//! one), the cached accounts of the reader and the author are dropped
//! before the ack, so the next lookup reads the new balances.

use crate::metrics::FulfillmentMetrics;
use flashsale_core::{
    FastStore, FlashSaleError, FulfillmentOutcome, FulfillmentRecord, Ledger, StreamEntry, keys,
};

/// What happened to a delivered entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Ledger applied the record; entry acknowledged.
    Applied,
    /// Record had been applied by an earlier delivery; entry acknowledged.
    AlreadyApplied,
    /// Entry did not carry a record; acknowledged and dropped.
    Malformed,
    /// Ledger or ack failed; entry left pending.
    Failed(FlashSaleError),
}

impl Processed {
    /// Whether the entry was acknowledged.
    #[must_use]
    pub const fn is_acked(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
            Self::Malformed => "malformed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Applies entries from one stream/group to a ledger.
#[derive(Debug)]
pub struct FulfillmentProcessor<S, L> {
    store: S,
    ledger: L,
    stream: String,
    group: String,
}

impl<S: FastStore, L: Ledger> FulfillmentProcessor<S, L> {
    /// Create a processor for `stream`/`group`.
    #[must_use]
    pub fn new(store: S, ledger: L, stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            store,
            ledger,
            stream: stream.into(),
            group: group.into(),
        }
    }

    /// Store the processor acknowledges against.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Stream name.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Consumer group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Apply one entry on behalf of `consumer` and acknowledge it when the
    /// ack rules allow.
    pub async fn process(&self, entry: &StreamEntry, consumer: &str) -> Processed {
        let processed = self.apply(entry, consumer).await;
        FulfillmentMetrics::record(processed.as_str());
        processed
    }

    async fn apply(&self, entry: &StreamEntry, consumer: &str) -> Processed {
        let record = match entry.record() {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    entry_id = %entry.id,
                    consumer = %consumer,
                    error = %e,
                    "Dropping malformed fulfillment entry"
                );
                return match self.ack(entry, consumer).await {
                    Ok(()) => Processed::Malformed,
                    Err(e) => Processed::Failed(e),
                };
            }
        };

        let outcome = match self.ledger.apply_fulfillment(&record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    entry_id = %entry.id,
                    consumer = %consumer,
                    reader_id = %record.reader_id,
                    author_id = %record.author_id,
                    offer_id = %record.offer_id,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Fulfillment failed, leaving entry pending"
                );
                return Processed::Failed(e);
            }
        };

        self.forget_accounts(&record).await;

        if let Err(e) = self.ack(entry, consumer).await {
            return Processed::Failed(e);
        }

        match outcome {
            FulfillmentOutcome::Applied => {
                tracing::info!(
                    entry_id = %entry.id,
                    consumer = %consumer,
                    reader_id = %record.reader_id,
                    author_id = %record.author_id,
                    credit_amount = record.credit_amount,
                    "Subscription fulfilled"
                );
                Processed::Applied
            }
            FulfillmentOutcome::AlreadyApplied => {
                tracing::debug!(
                    entry_id = %entry.id,
                    consumer = %consumer,
                    "Fulfillment already applied, acknowledging redelivery"
                );
                Processed::AlreadyApplied
            }
        }
    }

    /// Drop cached copies of the accounts a record changed. A failed delete
    /// only costs staleness until the entry's TTL runs out.
    async fn forget_accounts(&self, record: &FulfillmentRecord) {
        for account in [record.reader_id, record.author_id] {
            let key = keys::cache_key(keys::ACCOUNT_KIND, account.0);
            if let Err(e) = self.store.delete(&key).await {
                tracing::warn!(key = %key, error = %e, "Failed to invalidate cached account");
            }
        }
    }

    async fn ack(&self, entry: &StreamEntry, consumer: &str) -> Result<(), FlashSaleError> {
        self.store
            .stream_ack(&self.stream, &self.group, &entry.id)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    entry_id = %entry.id,
                    consumer = %consumer,
                    error = %e,
                    "Failed to acknowledge entry"
                );
            })
    }
}
