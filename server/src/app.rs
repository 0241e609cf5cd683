//! Application coordinator - wires the stores into the flash-sale services.

use crate::config::Config;
use flashsale_core::{
    Account, AccountId, AdmissionOutcome, CacheConfig, Clock, FlashSaleError, Offer, OfferDraft,
    OfferLimits, PurchaseRequest, Result, SystemClock,
};
use flashsale_postgres::{PostgresAccountSource, PostgresLedger, PostgresOfferRepository};
use flashsale_redis::RedisFastStore;
use flashsale_runtime::{AdmissionController, FulfillmentPipeline, ReadThroughCache, RunningPipeline};

/// Main flash-sale application.
///
/// Coordinates:
/// - Fast-path store (Redis): stock reservations, grant sets, the fulfillment stream
/// - System of record (`PostgreSQL`): accounts, offers, subscriptions
/// - Read-through account cache in front of `PostgreSQL`
pub struct FlashSaleApp {
    store: RedisFastStore,
    ledger: PostgresLedger,
    offers: PostgresOfferRepository,
    accounts: ReadThroughCache<RedisFastStore, PostgresAccountSource>,
    admission: AdmissionController<RedisFastStore, SystemClock>,
    limits: OfferLimits,
    config: Config,
}

impl FlashSaleApp {
    /// Connect to both stores and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::StoreUnavailable`] if Redis cannot be
    /// reached and [`FlashSaleError::Database`] if `PostgreSQL` cannot be
    /// reached or migrated.
    pub async fn new(config: Config) -> Result<Self> {
        tracing::info!("Initializing flash-sale application...");

        let store = RedisFastStore::new(&config.redis.url).await?;

        let pool = flashsale_postgres::connect(&config.postgres.url, config.postgres.max_connections)
            .await?;
        tracing::info!("Running database migrations...");
        flashsale_postgres::migrate(&pool).await?;

        let limits = OfferLimits::default();
        let admission = AdmissionController::new(store.clone(), SystemClock)
            .with_stream(config.fulfillment.stream.clone())
            .with_limits(limits);
        let accounts = ReadThroughCache::new(
            store.clone(),
            PostgresAccountSource::new(pool.clone()),
            CacheConfig::default(),
        );

        tracing::info!("Flash-sale application initialized");

        Ok(Self {
            store,
            ledger: PostgresLedger::new(pool.clone()),
            offers: PostgresOfferRepository::new(pool),
            accounts,
            admission,
            limits,
            config,
        })
    }

    /// Create an offer durably, then make it purchasable on the fast path.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::InvalidOffer`] for drafts outside the
    /// configured limits, [`FlashSaleError::AlreadyPublished`] if the fast
    /// path still holds an offer under the new id, or the error of whichever
    /// store failed.
    pub async fn create_offer(&self, draft: &OfferDraft) -> Result<Offer> {
        let offer = self.offers.create(draft, &self.limits, SystemClock.now()).await?;
        self.admission.publish_offer(&offer).await?;
        Ok(offer)
    }

    /// Admit a purchase, using the cached balance as a courtesy check.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::AccountNotFound`] if the reader does not
    /// exist, or the admission error if the fast-path store is unavailable.
    pub async fn purchase(&self, request: &PurchaseRequest) -> Result<AdmissionOutcome> {
        let reader = self
            .account(request.reader_id)
            .await?
            .ok_or(FlashSaleError::AccountNotFound(request.reader_id))?;
        self.admission.admit_with_balance(request, reader.credits).await
    }

    /// Account lookup through the read-through cache.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`] if the cache misses and the
    /// database lookup fails.
    pub async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.accounts.get(id.0).await
    }

    /// Drop the cached copy of an account after it changed.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::StoreUnavailable`] if the delete fails.
    pub async fn invalidate_account(&self, id: AccountId) -> Result<()> {
        self.accounts.invalidate(id.0).await
    }

    /// Start the fulfillment workers and the recovery sweeper.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer group cannot be created or the
    /// pool configuration is invalid.
    pub async fn start_pipeline(&self) -> Result<RunningPipeline> {
        FulfillmentPipeline::new(
            self.store.clone(),
            self.ledger.clone(),
            self.config.pipeline_config(),
        )
        .start()
        .await
    }

    /// Loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}
