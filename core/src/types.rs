//! Identifiers, stream records and outcomes.

use crate::error::{FlashSaleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Account identifier. Readers and authors are both accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Offer (discount) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub u64);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned stream entry identifier (`<millis>-<seq>` in Redis).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account as seen by the read path. This is what the cache stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub id: AccountId,
    /// Contact email
    pub email: String,
    /// Spendable credits
    pub credits: u64,
    /// Regular subscription fee charged by this account as an author
    pub subscription_fee: u64,
}

/// A purchase attempt against a published offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Buyer
    pub reader_id: AccountId,
    /// Seller, owner of the offer
    pub author_id: AccountId,
    /// Offer being purchased
    pub offer_id: OfferId,
    /// Discounted price in credits
    pub credit_amount: u64,
}

/// Durable record appended to the stream by a successful admission.
///
/// Never mutated after creation; only its delivery/ack state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRecord {
    /// Buyer
    pub reader_id: AccountId,
    /// Seller
    pub author_id: AccountId,
    /// Offer the stock was reserved from
    pub offer_id: OfferId,
    /// Credits to move from reader to author
    pub credit_amount: u64,
}

impl FulfillmentRecord {
    /// Stream field carrying the reader ID.
    pub const FIELD_READER: &'static str = "reader_id";
    /// Stream field carrying the author ID.
    pub const FIELD_AUTHOR: &'static str = "author_id";
    /// Stream field carrying the offer ID.
    pub const FIELD_OFFER: &'static str = "offer_id";
    /// Stream field carrying the credit amount.
    pub const FIELD_CREDITS: &'static str = "credit_amount";

    /// Encode as stream fields.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (Self::FIELD_READER.to_string(), self.reader_id.to_string()),
            (Self::FIELD_AUTHOR.to_string(), self.author_id.to_string()),
            (Self::FIELD_OFFER.to_string(), self.offer_id.to_string()),
            (Self::FIELD_CREDITS.to_string(), self.credit_amount.to_string()),
        ]
    }

    /// Decode from stream fields.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::MalformedEntry`] if a field is missing or
    /// is not an unsigned integer.
    pub fn from_fields(entry_id: &EntryId, fields: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &str| -> Result<u64> {
            let raw = fields.get(name).ok_or_else(|| FlashSaleError::MalformedEntry {
                entry_id: entry_id.clone(),
                reason: format!("missing field `{name}`"),
            })?;
            raw.parse::<u64>().map_err(|e| FlashSaleError::MalformedEntry {
                entry_id: entry_id.clone(),
                reason: format!("field `{name}` = {raw:?}: {e}"),
            })
        };

        Ok(Self {
            reader_id: AccountId(field(Self::FIELD_READER)?),
            author_id: AccountId(field(Self::FIELD_AUTHOR)?),
            offer_id: OfferId(field(Self::FIELD_OFFER)?),
            credit_amount: field(Self::FIELD_CREDITS)?,
        })
    }
}

impl From<PurchaseRequest> for FulfillmentRecord {
    fn from(request: PurchaseRequest) -> Self {
        Self {
            reader_id: request.reader_id,
            author_id: request.author_id,
            offer_id: request.offer_id,
            credit_amount: request.credit_amount,
        }
    }
}

/// An entry delivered from a consumer-group read or claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Store-assigned identifier
    pub id: EntryId,
    /// Raw field map
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    /// Parse the fulfillment record carried by this entry.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::MalformedEntry`] if the fields do not form
    /// a record.
    pub fn record(&self) -> Result<FulfillmentRecord> {
        FulfillmentRecord::from_fields(&self.id, &self.fields)
    }
}

/// Summary of an entry that was delivered but never acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Entry identifier
    pub id: EntryId,
    /// Consumer currently owning the entry
    pub consumer: String,
    /// Time since last delivery
    pub idle: Duration,
    /// Number of times the entry has been delivered
    pub delivery_count: u64,
}

/// Where a consumer-group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer of the group (`>`).
    New,
    /// This consumer's own delivered-but-unacknowledged backlog (`0`).
    Pending,
}

impl ReadCursor {
    /// Wire representation used by Redis streams.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => ">",
            Self::Pending => "0",
        }
    }
}

/// Result of an admission attempt.
///
/// Everything except [`AdmissionOutcome::Admitted`] is an expected,
/// user-facing rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdmissionOutcome {
    /// Stock reserved and fulfillment record enqueued.
    Admitted,
    /// Reader already holds a grant for this offer.
    AlreadyGranted,
    /// Offer is outside its validity window, or no longer exists.
    Expired,
    /// No stock left.
    OutOfStock,
    /// Reader and author are the same account.
    SelfPurchase,
    /// Caller-side balance check failed before the atomic step.
    InsufficientCredits,
}

impl AdmissionOutcome {
    /// Map an admission-script result code.
    ///
    /// Returns `None` for codes the script never produces.
    #[must_use]
    pub const fn from_script_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Admitted),
            1 => Some(Self::AlreadyGranted),
            2 => Some(Self::Expired),
            3 => Some(Self::OutOfStock),
            _ => None,
        }
    }

    /// Whether the purchase went through.
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::AlreadyGranted => "already_granted",
            Self::Expired => "expired",
            Self::OutOfStock => "out_of_stock",
            Self::SelfPurchase => "self_purchase",
            Self::InsufficientCredits => "insufficient_credits",
        }
    }

    /// Reason shown to the buyer.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Admitted => "Discount purchased successfully",
            Self::AlreadyGranted => "You have already purchased this discount",
            Self::Expired => "The discount is not within its valid time range",
            Self::OutOfStock => "The discount is out of stock",
            Self::SelfPurchase => "You cannot purchase your own discount",
            Self::InsufficientCredits => "You do not have enough credits",
        }
    }
}

impl fmt::Display for AdmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the system of record handled a fulfillment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// Subscription created and credits transferred.
    Applied,
    /// Subscription already existed; nothing was changed.
    AlreadyApplied,
}
