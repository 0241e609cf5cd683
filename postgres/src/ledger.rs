//! Fulfillment transaction.

use crate::{from_db, to_db};
use flashsale_core::{
    AccountId, FlashSaleError, FulfillmentOutcome, FulfillmentRecord, Ledger, Result,
};
use sqlx::PgPool;
use sqlx::postgres::PgConnection;

/// `PostgreSQL` ledger.
///
/// Applies fulfillment records exactly-once-effectively: the unique
/// `(reader_id, author_id)` constraint on `subscriptions` turns a redelivered
/// record into [`FulfillmentOutcome::AlreadyApplied`] inside the same
/// transaction that would have moved the credits.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a ledger over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace an account. Used for seeding and tests.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`] if the upsert fails.
    pub async fn upsert_account(
        &self,
        id: AccountId,
        email: &str,
        credits: u64,
        subscription_fee: u64,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO accounts (id, email, credits, subscription_fee)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET email = EXCLUDED.email,
                credits = EXCLUDED.credits,
                subscription_fee = EXCLUDED.subscription_fee
            ",
        )
        .bind(to_db(id.0, "account id")?)
        .bind(email)
        .bind(to_db(credits, "credits")?)
        .bind(to_db(subscription_fee, "subscription fee")?)
        .execute(&self.pool)
        .await
        .map_err(|e| FlashSaleError::Database(format!("Failed to upsert account: {e}")))?;
        Ok(())
    }

    /// Whether `reader` holds a subscription to `author`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`] if the query fails.
    pub async fn has_subscription(&self, reader: AccountId, author: AccountId) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM subscriptions WHERE reader_id = $1 AND author_id = $2",
        )
        .bind(to_db(reader.0, "reader id")?)
        .bind(to_db(author.0, "author id")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlashSaleError::Database(format!("Failed to look up subscription: {e}")))?;
        Ok(found.is_some())
    }

    /// Lock both accounts in id order and return the reader's balance.
    ///
    /// Locking in a fixed order keeps two opposite transfers from
    /// deadlocking each other.
    async fn lock_accounts(conn: &mut PgConnection, record: &FulfillmentRecord) -> Result<u64> {
        let reader = to_db(record.reader_id.0, "reader id")?;
        let author = to_db(record.author_id.0, "author id")?;

        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r"
            SELECT id, credits
            FROM accounts
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            ",
        )
        .bind(vec![reader, author])
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| FlashSaleError::Database(format!("Failed to lock accounts: {e}")))?;

        if !rows.iter().any(|(id, _)| *id == author) {
            return Err(FlashSaleError::AccountNotFound(record.author_id));
        }
        let (_, credits) = rows
            .into_iter()
            .find(|(id, _)| *id == reader)
            .ok_or(FlashSaleError::AccountNotFound(record.reader_id))?;

        from_db(credits, "credits")
    }

    async fn apply_in(conn: &mut PgConnection, record: &FulfillmentRecord) -> Result<FulfillmentOutcome> {
        let reader = to_db(record.reader_id.0, "reader id")?;
        let author = to_db(record.author_id.0, "author id")?;
        let offer = to_db(record.offer_id.0, "offer id")?;
        let amount = to_db(record.credit_amount, "credit amount")?;

        let available = Self::lock_accounts(conn, record).await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO subscriptions (reader_id, author_id, offer_id, credit_amount)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (reader_id, author_id) DO NOTHING
            ",
        )
        .bind(reader)
        .bind(author)
        .bind(offer)
        .bind(amount)
        .execute(&mut *conn)
        .await
        .map_err(|e| FlashSaleError::Database(format!("Failed to insert subscription: {e}")))?;

        if inserted.rows_affected() == 0 {
            return Ok(FulfillmentOutcome::AlreadyApplied);
        }

        if available < record.credit_amount {
            return Err(FlashSaleError::InsufficientCredits {
                account: record.reader_id,
                required: record.credit_amount,
                available,
            });
        }

        sqlx::query("UPDATE accounts SET credits = credits - $2 WHERE id = $1")
            .bind(reader)
            .bind(amount)
            .execute(&mut *conn)
            .await
            .map_err(|e| FlashSaleError::Database(format!("Failed to debit reader: {e}")))?;

        sqlx::query("UPDATE accounts SET credits = credits + $2 WHERE id = $1")
            .bind(author)
            .bind(amount)
            .execute(&mut *conn)
            .await
            .map_err(|e| FlashSaleError::Database(format!("Failed to credit author: {e}")))?;

        let mirrored = sqlx::query("UPDATE offers SET stock = stock - 1 WHERE id = $1 AND stock > 0")
            .bind(offer)
            .execute(&mut *conn)
            .await
            .map_err(|e| FlashSaleError::Database(format!("Failed to update offer stock: {e}")))?;

        if mirrored.rows_affected() == 0 {
            tracing::warn!(
                offer_id = %record.offer_id,
                "Durable offer stock not decremented (offer missing or already at zero)"
            );
        }

        Ok(FulfillmentOutcome::Applied)
    }
}

impl Ledger for PostgresLedger {
    async fn apply_fulfillment(&self, record: &FulfillmentRecord) -> Result<FulfillmentOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FlashSaleError::Database(format!("Failed to start transaction: {e}")))?;

        match Self::apply_in(&mut *tx, record).await {
            Ok(outcome) => {
                tx.commit().await.map_err(|e| {
                    FlashSaleError::Database(format!("Failed to commit transaction: {e}"))
                })?;
                Ok(outcome)
            }
            Err(error) => {
                let _ = tx.rollback().await; // Ignore rollback errors
                Err(error)
            }
        }
    }

    async fn credits(&self, account: AccountId) -> Result<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT credits FROM accounts WHERE id = $1")
            .bind(to_db(account.0, "account id")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FlashSaleError::Database(format!("Failed to read credits: {e}")))?;

        row.map(|(credits,)| from_db(credits, "credits")).transpose()
    }
}
