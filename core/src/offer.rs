//! Offers: what an author publishes and what admission reserves against.

use crate::config::OfferLimits;
use crate::error::{FlashSaleError, Result};
use crate::keys;
use crate::types::{AccountId, OfferId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An author's request to publish a limited-stock discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDraft {
    /// Publishing author
    pub author_id: AccountId,
    /// Author's regular subscription fee
    pub subscription_fee: u64,
    /// Discounted price as a percentage of the fee
    pub discount_percent: u32,
    /// Units available
    pub stock: u32,
    /// Window length in hours, starting at publication
    pub duration_hours: u32,
}

impl OfferDraft {
    /// Check the draft against publication limits.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::InvalidOffer`] if the author has no
    /// subscription fee, or if discount, stock or duration is out of range.
    pub fn validate(&self, limits: &OfferLimits) -> Result<()> {
        if self.subscription_fee == 0 {
            return Err(FlashSaleError::InvalidOffer(
                "author has no subscription fee set".to_string(),
            ));
        }
        if self.discount_percent == 0 || self.discount_percent > limits.max_discount_percent {
            return Err(FlashSaleError::InvalidOffer(format!(
                "discount must be between 1 and {} percent",
                limits.max_discount_percent
            )));
        }
        if self.stock == 0 || self.stock > limits.max_stock {
            return Err(FlashSaleError::InvalidOffer(format!(
                "stock must be between 1 and {}",
                limits.max_stock
            )));
        }
        if self.duration_hours == 0 || self.duration_hours > limits.max_duration_hours {
            return Err(FlashSaleError::InvalidOffer(format!(
                "duration must be between 1 and {} hours",
                limits.max_duration_hours
            )));
        }
        Ok(())
    }

    /// Discounted price in credits (rounded down).
    #[must_use]
    pub fn price(&self) -> u64 {
        let scaled = u128::from(self.subscription_fee) * u128::from(self.discount_percent) / 100;
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }

    /// Turn a validated draft into an offer whose window starts at `now`.
    #[must_use]
    pub fn into_offer(self, id: OfferId, now: DateTime<Utc>) -> Offer {
        Offer {
            id,
            author_id: self.author_id,
            price: self.price(),
            stock: self.stock,
            valid_from: now,
            valid_until: now + Duration::hours(i64::from(self.duration_hours)),
        }
    }
}

/// A published offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Offer identifier
    pub id: OfferId,
    /// Owner
    pub author_id: AccountId,
    /// Discounted price in credits
    pub price: u64,
    /// Initial stock
    pub stock: u32,
    /// Window start (inclusive)
    pub valid_from: DateTime<Utc>,
    /// Window end (inclusive)
    pub valid_until: DateTime<Utc>,
}

impl Offer {
    /// Whether `now` falls inside the validity window.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    /// Hash fields of the fast-path stock reservation.
    #[must_use]
    pub fn reservation_fields(&self) -> Vec<(String, String)> {
        vec![
            (keys::FIELD_STOCK.to_string(), self.stock.to_string()),
            (
                keys::FIELD_VALID_FROM.to_string(),
                self.valid_from.timestamp_millis().to_string(),
            ),
            (
                keys::FIELD_VALID_UNTIL.to_string(),
                self.valid_until.timestamp_millis().to_string(),
            ),
            (keys::FIELD_AUTHOR.to_string(), self.author_id.to_string()),
            (keys::FIELD_PRICE.to_string(), self.price.to_string()),
        ]
    }
}
