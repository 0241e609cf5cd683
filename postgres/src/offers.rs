//! Durable offer rows.

use crate::{from_db, to_db};
use chrono::{DateTime, Utc};
use flashsale_core::{AccountId, FlashSaleError, Offer, OfferDraft, OfferId, OfferLimits, Result};
use sqlx::PgPool;

type OfferRow = (i64, i64, i64, i32, DateTime<Utc>, DateTime<Utc>);

fn offer_from_row((id, author, price, stock, valid_from, valid_until): OfferRow) -> Result<Offer> {
    Ok(Offer {
        id: OfferId(from_db(id, "offer id")?),
        author_id: AccountId(from_db(author, "author id")?),
        price: from_db(price, "price")?,
        stock: u32::try_from(stock)
            .map_err(|_| FlashSaleError::Database(format!("stock {stock} is negative")))?,
        valid_from,
        valid_until,
    })
}

/// Offer persistence.
///
/// The offer row is the durable record; its `stock` column mirrors the
/// fast-path counter and is decremented by the fulfillment transaction.
#[derive(Clone)]
pub struct PostgresOfferRepository {
    pool: PgPool,
}

impl PostgresOfferRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validate a draft and persist it as an offer whose window opens at `now`.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::InvalidOffer`] if the draft violates `limits`
    /// - [`FlashSaleError::AccountNotFound`] if the author does not exist
    /// - [`FlashSaleError::Database`] if the insert fails
    pub async fn create(
        &self,
        draft: &OfferDraft,
        limits: &OfferLimits,
        now: DateTime<Utc>,
    ) -> Result<Offer> {
        draft.validate(limits)?;
        let template = draft.into_offer(OfferId(0), now);

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO offers (author_id, price, initial_stock, stock, valid_from, valid_until)
            VALUES ($1, $2, $3, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(to_db(template.author_id.0, "author id")?)
        .bind(to_db(template.price, "price")?)
        .bind(i32::try_from(template.stock).map_err(|_| {
            FlashSaleError::InvalidOffer(format!("stock {} is too large", template.stock))
        })?)
        .bind(template.valid_from)
        .bind(template.valid_until)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_foreign_key_violation() {
                    return FlashSaleError::AccountNotFound(draft.author_id);
                }
            }
            FlashSaleError::Database(format!("Failed to create offer: {e}"))
        })?;

        let offer = Offer {
            id: OfferId(from_db(id, "offer id")?),
            ..template
        };

        tracing::info!(
            offer_id = %offer.id,
            author_id = %offer.author_id,
            price = offer.price,
            stock = offer.stock,
            "Offer created"
        );
        metrics::counter!("flashsale_offers_created_total").increment(1);

        Ok(offer)
    }

    /// Load an offer with its current durable stock.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`] if the query fails.
    pub async fn find(&self, id: OfferId) -> Result<Option<Offer>> {
        let row: Option<OfferRow> = sqlx::query_as(
            r"
            SELECT id, author_id, price, stock, valid_from, valid_until
            FROM offers
            WHERE id = $1
            ",
        )
        .bind(to_db(id.0, "offer id")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlashSaleError::Database(format!("Failed to load offer: {e}")))?;

        row.map(offer_from_row).transpose()
    }
}
