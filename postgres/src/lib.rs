//! `PostgreSQL` system of record for the flash-sale pipeline.
//!
//! This crate provides:
//!
//! - [`PostgresLedger`]: the fulfillment transaction (subscription,
//!   balance transfer, durable stock mirror) behind [`flashsale_core::Ledger`]
//! - [`PostgresAccountSource`]: account lookups for the read-through cache
//! - [`PostgresOfferRepository`]: durable offer rows
//!
//! All queries are checked at runtime, so building the crate needs no
//! database. The schema lives in `migrations/` and is applied with
//! [`migrate`].
//!
//! # Example
//!
//! ```no_run
//! use flashsale_postgres::{PostgresLedger, connect, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/flashsale", 10).await?;
//! migrate(&pool).await?;
//! let ledger = PostgresLedger::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accounts;
pub mod ledger;
pub mod offers;

pub use accounts::PostgresAccountSource;
pub use ledger::PostgresLedger;
pub use offers::PostgresOfferRepository;

use flashsale_core::{FlashSaleError, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`FlashSaleError::Database`] if the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| FlashSaleError::Database(format!("Failed to connect: {e}")))?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
///
/// # Errors
///
/// Returns [`FlashSaleError::Database`] if migrations fail.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| FlashSaleError::Database(format!("Migration failed: {e}")))?;
    Ok(())
}

/// Convert an unsigned domain value to a `BIGINT` column value.
pub(crate) fn to_db(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| FlashSaleError::Database(format!("{what} {value} exceeds BIGINT range")))
}

/// Convert a `BIGINT` column value back to an unsigned domain value.
pub(crate) fn from_db(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| FlashSaleError::Database(format!("{what} {value} is negative")))
}
