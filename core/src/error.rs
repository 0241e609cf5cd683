//! Error types for the flash-sale pipeline.
//!
//! Admission *rejections* (already granted, expired, out of stock, ...) are
//! not errors: they are [`AdmissionOutcome`](crate::types::AdmissionOutcome)
//! values returned to the caller. This enum covers the failures that are
//! not part of the business protocol.

use crate::types::{AccountId, EntryId, OfferId};
use thiserror::Error;

/// Result type alias for flash-sale operations.
pub type Result<T> = std::result::Result<T, FlashSaleError>;

/// Error taxonomy for the fast-path store, the system of record and
/// configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashSaleError {
    // ═══════════════════════════════════════════════════════════
    // Fast-path store
    // ═══════════════════════════════════════════════════════════

    /// The fast-path store could not be reached or rejected the command.
    #[error("Fast-path store unavailable: {0}")]
    StoreUnavailable(String),

    /// An atomic script failed or returned a result code nobody understands.
    #[error("Atomic script failed: {0}")]
    Script(String),

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stream entry is missing fields or carries unparsable values.
    #[error("Malformed stream entry {entry_id}: {reason}")]
    MalformedEntry {
        /// Entry that failed to parse
        entry_id: EntryId,
        /// What was wrong with it
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // System of record
    // ═══════════════════════════════════════════════════════════

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An account referenced by a fulfillment record does not exist.
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    /// The reader's balance no longer covers the purchase.
    #[error("Account {account} has {available} credits, {required} required")]
    InsufficientCredits {
        /// Account being debited
        account: AccountId,
        /// Credits the purchase needs
        required: u64,
        /// Credits currently on the account
        available: u64,
    },

    // ═══════════════════════════════════════════════════════════
    // Input and configuration
    // ═══════════════════════════════════════════════════════════

    /// An offer draft violates the publication limits.
    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    /// An offer already has a live reservation or grant set on the fast path.
    #[error("Offer {0} is already published")]
    AlreadyPublished(OfferId),

    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FlashSaleError {
    /// Returns `true` if retrying the same operation later can succeed.
    ///
    /// Malformed entries and invalid input never heal on their own;
    /// infrastructure failures and stale balances might.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flashsale_core::FlashSaleError;
    /// assert!(FlashSaleError::StoreUnavailable("timeout".into()).is_retryable());
    /// assert!(!FlashSaleError::InvalidOffer("stock".into()).is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_)
                | Self::Database(_)
                | Self::InsufficientCredits { .. }
                | Self::AccountNotFound(_)
        )
    }
}
