//! Account lookups for the read-through cache.

use crate::{from_db, to_db};
use flashsale_core::{Account, AccountId, EntitySource, FlashSaleError, Result, keys};
use sqlx::{PgPool, Row};

/// Loads [`Account`]s by id. Cached under `cache:user:{id}`.
#[derive(Clone)]
pub struct PostgresAccountSource {
    pool: PgPool,
}

impl PostgresAccountSource {
    /// Create a source over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl EntitySource for PostgresAccountSource {
    type Entity = Account;

    fn kind(&self) -> &'static str {
        keys::ACCOUNT_KIND
    }

    async fn load(&self, id: u64) -> Result<Option<Account>> {
        let row = sqlx::query(
            r"
            SELECT id, email, credits, subscription_fee
            FROM accounts
            WHERE id = $1
            ",
        )
        .bind(to_db(id, "account id")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlashSaleError::Database(format!("Failed to load account: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let column = |e: sqlx::Error| FlashSaleError::Database(format!("Failed to decode account: {e}"));

        Ok(Some(Account {
            id: AccountId(from_db(row.try_get("id").map_err(column)?, "account id")?),
            email: row.try_get("email").map_err(column)?,
            credits: from_db(row.try_get("credits").map_err(column)?, "credits")?,
            subscription_fee: from_db(
                row.try_get("subscription_fee").map_err(column)?,
                "subscription fee",
            )?,
        }))
    }
}
