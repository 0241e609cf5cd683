//! Admission controller: the synchronous half of a flash sale.
//!
//! A purchase is decided in one round-trip to the fast-path store. The
//! admission script checks the grant set, the validity window and the stock,
//! then reserves a unit and appends the fulfillment record, all atomically.
//! Once [`AdmissionController::admit_purchase`] returns
//! [`AdmissionOutcome::Admitted`] the record is durable in the stream and
//! fulfillment happens in the background.
//!
//! # Example
//!
//! ```
//! use flashsale_core::{AccountId, AdmissionOutcome, OfferId, PurchaseRequest};
//! use flashsale_runtime::AdmissionController;
//! use flashsale_testing::{InMemoryFastStore, test_clock};
//!
//! # tokio_test::block_on(async {
//! let admission = AdmissionController::new(InMemoryFastStore::new(), test_clock());
//! let request = PurchaseRequest {
//!     reader_id: AccountId(7),
//!     author_id: AccountId(7),
//!     offer_id: OfferId(1),
//!     credit_amount: 50,
//! };
//! let outcome = admission.admit_purchase(&request).await.unwrap();
//! assert_eq!(outcome, AdmissionOutcome::SelfPurchase);
//! # });
//! ```

use crate::metrics::AdmissionMetrics;
use flashsale_core::{
    AdmissionOutcome, Clock, FastStore, FlashSaleError, Offer, OfferLimits, PurchaseRequest,
    Result, ScriptKey, keys,
};
use std::time::{Duration, Instant};

/// Decides purchase attempts against published offers.
///
/// Holds no per-offer state of its own: stock, grants and the stream all
/// live in the fast-path store, so any number of controllers (and
/// processes) can admit concurrently.
#[derive(Debug, Clone)]
pub struct AdmissionController<S, C> {
    store: S,
    clock: C,
    stream: String,
    limits: OfferLimits,
}

impl<S: FastStore, C: Clock> AdmissionController<S, C> {
    /// Create a controller writing to the default stream.
    #[must_use]
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            stream: keys::DEFAULT_STREAM.to_string(),
            limits: OfferLimits::default(),
        }
    }

    /// Write fulfillment records to `stream` instead of the default.
    #[must_use]
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    /// Override publication limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: OfferLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Stream fulfillment records are appended to.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Decide a purchase attempt.
    ///
    /// Rejections are returned as outcomes, not errors.
    ///
    /// # Errors
    ///
    /// Fails closed: a store failure or an unknown script result returns an
    /// error, which callers must treat as a rejection. Nothing was reserved
    /// in that case unless the script ran to completion.
    pub async fn admit_purchase(&self, request: &PurchaseRequest) -> Result<AdmissionOutcome> {
        let started = Instant::now();

        if request.reader_id == request.author_id {
            return Ok(self.finish(request, AdmissionOutcome::SelfPurchase, started));
        }

        let script_keys = [
            keys::stock_key(request.offer_id),
            keys::grant_key(request.offer_id),
            self.stream.clone(),
        ];
        let args = [
            request.reader_id.to_string(),
            request.author_id.to_string(),
            request.offer_id.to_string(),
            request.credit_amount.to_string(),
            self.clock.now().timestamp_millis().to_string(),
        ];

        let code = match self.store.run_atomic(ScriptKey::Admission, &script_keys, &args).await {
            Ok(code) => code,
            Err(e) => {
                AdmissionMetrics::record_failure();
                tracing::error!(
                    reader_id = %request.reader_id,
                    offer_id = %request.offer_id,
                    error = %e,
                    "Admission failed closed"
                );
                return Err(e);
            }
        };

        let outcome = AdmissionOutcome::from_script_code(code).ok_or_else(|| {
            AdmissionMetrics::record_failure();
            tracing::error!(
                reader_id = %request.reader_id,
                offer_id = %request.offer_id,
                code,
                "Admission script returned an unknown result code"
            );
            FlashSaleError::Script(format!("unknown admission result code {code}"))
        })?;

        Ok(self.finish(request, outcome, started))
    }

    /// Decide a purchase attempt after a courtesy balance check.
    ///
    /// `balance` is the reader's balance as the caller last saw it. This
    /// avoids burning stock on a buyer who obviously cannot pay; the
    /// fulfillment transaction re-checks the balance authoritatively.
    ///
    /// # Errors
    ///
    /// Same as [`AdmissionController::admit_purchase`].
    pub async fn admit_with_balance(
        &self,
        request: &PurchaseRequest,
        balance: u64,
    ) -> Result<AdmissionOutcome> {
        if request.reader_id != request.author_id && balance < request.credit_amount {
            return Ok(self.finish(request, AdmissionOutcome::InsufficientCredits, Instant::now()));
        }
        self.admit_purchase(request).await
    }

    /// Make an offer purchasable on the fast path.
    ///
    /// Creates the reservation hash together with a TTL ending
    /// `reservation_grace` after the window closes. Publication is
    /// create-only: while the offer still has a reservation or a grant set,
    /// nothing is written, so stock can never be reset and a reader granted
    /// once stays granted.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::AlreadyPublished`] if the offer is already
    /// live on the fast path and [`FlashSaleError::StoreUnavailable`] if the
    /// store cannot be reached.
    pub async fn publish_offer(&self, offer: &Offer) -> Result<()> {
        let remaining = (offer.valid_until - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let ttl = remaining + self.limits.reservation_grace;

        let script_keys = [keys::stock_key(offer.id), keys::grant_key(offer.id)];
        let mut args = vec![ttl.as_millis().max(1).to_string()];
        for (field, value) in offer.reservation_fields() {
            args.push(field);
            args.push(value);
        }

        match self
            .store
            .run_atomic(ScriptKey::PublishReservation, &script_keys, &args)
            .await?
        {
            1 => {}
            0 => {
                tracing::warn!(offer_id = %offer.id, "Offer already live, publication refused");
                return Err(FlashSaleError::AlreadyPublished(offer.id));
            }
            code => {
                return Err(FlashSaleError::Script(format!(
                    "publication returned unknown code {code}"
                )));
            }
        }

        AdmissionMetrics::record_publish();
        tracing::info!(
            offer_id = %offer.id,
            author_id = %offer.author_id,
            stock = offer.stock,
            price = offer.price,
            valid_until = %offer.valid_until,
            ttl_secs = ttl.as_secs(),
            "Offer published"
        );
        Ok(())
    }

    fn finish(
        &self,
        request: &PurchaseRequest,
        outcome: AdmissionOutcome,
        started: Instant,
    ) -> AdmissionOutcome {
        AdmissionMetrics::record(outcome, started.elapsed());
        if outcome.is_admitted() {
            tracing::info!(
                reader_id = %request.reader_id,
                author_id = %request.author_id,
                offer_id = %request.offer_id,
                credit_amount = request.credit_amount,
                stream = %self.stream,
                "Purchase admitted"
            );
        } else {
            tracing::debug!(
                reader_id = %request.reader_id,
                offer_id = %request.offer_id,
                outcome = %outcome,
                "Purchase rejected"
            );
        }
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use flashsale_core::{AccountId, OfferDraft, OfferId};
    use flashsale_testing::{InMemoryFastStore, ManualClock, test_clock};
    use std::collections::HashSet;

    fn offer(stock: u32) -> Offer {
        OfferDraft {
            author_id: AccountId(2),
            subscription_fee: 100,
            discount_percent: 50,
            stock,
            duration_hours: 1,
        }
        .into_offer(OfferId(9), test_clock().now())
    }

    async fn remaining_stock(store: &InMemoryFastStore) -> String {
        store.hash_get_all(&keys::stock_key(OfferId(9))).await.unwrap()[keys::FIELD_STOCK].clone()
    }

    fn request(reader: u64) -> PurchaseRequest {
        PurchaseRequest {
            reader_id: AccountId(reader),
            author_id: AccountId(2),
            offer_id: OfferId(9),
            credit_amount: 50,
        }
    }

    #[tokio::test]
    async fn admits_then_rejects_duplicates_and_exhaustion() {
        let store = InMemoryFastStore::new();
        let admission = AdmissionController::new(store.clone(), test_clock());
        admission.publish_offer(&offer(2)).await.unwrap();

        assert_eq!(
            admission.admit_purchase(&request(1)).await.unwrap(),
            AdmissionOutcome::Admitted
        );
        assert_eq!(
            admission.admit_purchase(&request(1)).await.unwrap(),
            AdmissionOutcome::AlreadyGranted
        );
        assert_eq!(remaining_stock(&store).await, "1");
        assert_eq!(store.stream_len(keys::DEFAULT_STREAM).unwrap(), 1);

        assert_eq!(
            admission.admit_purchase(&request(3)).await.unwrap(),
            AdmissionOutcome::Admitted
        );
        assert_eq!(
            admission.admit_purchase(&request(4)).await.unwrap(),
            AdmissionOutcome::OutOfStock
        );
        assert_eq!(remaining_stock(&store).await, "0");
        assert_eq!(store.stream_len(keys::DEFAULT_STREAM).unwrap(), 2);
        assert_eq!(store.set_members(&keys::grant_key(OfferId(9))).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn self_purchase_never_touches_the_store() {
        let store = InMemoryFastStore::new();
        let admission = AdmissionController::new(store.clone(), test_clock());

        let outcome = admission.admit_purchase(&request(2)).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::SelfPurchase);
        assert_eq!(store.script_calls(), 0);
    }

    #[tokio::test]
    async fn courtesy_check_rejects_before_reserving() {
        let store = InMemoryFastStore::new();
        let admission = AdmissionController::new(store.clone(), test_clock());
        admission.publish_offer(&offer(1)).await.unwrap();
        let published = store.script_calls();

        let outcome = admission.admit_with_balance(&request(1), 10).await.unwrap();
        assert_eq!(outcome, AdmissionOutcome::InsufficientCredits);
        assert_eq!(store.script_calls(), published);

        let outcome = admission.admit_with_balance(&request(1), 50).await.unwrap();
        assert_eq!(outcome, AdmissionOutcome::Admitted);
    }

    #[tokio::test]
    async fn window_is_enforced_with_injected_clock() {
        let clock = ManualClock::new(test_clock().now());
        let store = InMemoryFastStore::new();
        let admission = AdmissionController::new(store.clone(), clock.clone());
        admission.publish_offer(&offer(5)).await.unwrap();

        clock.advance(ChronoDuration::hours(1));
        assert_eq!(
            admission.admit_purchase(&request(1)).await.unwrap(),
            AdmissionOutcome::Admitted
        );
        assert_eq!(remaining_stock(&store).await, "4");

        clock.advance(ChronoDuration::milliseconds(1));
        assert_eq!(
            admission.admit_purchase(&request(3)).await.unwrap(),
            AdmissionOutcome::Expired
        );
        assert_eq!(remaining_stock(&store).await, "4");
        assert_eq!(
            store.set_members(&keys::grant_key(OfferId(9))).unwrap(),
            HashSet::from(["1".to_string()])
        );
        assert_eq!(store.stream_len(keys::DEFAULT_STREAM).unwrap(), 1);
    }

    #[tokio::test]
    async fn unpublished_offer_is_expired() {
        let admission = AdmissionController::new(InMemoryFastStore::new(), test_clock());
        assert_eq!(
            admission.admit_purchase(&request(1)).await.unwrap(),
            AdmissionOutcome::Expired
        );
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = InMemoryFastStore::new();
        let admission = AdmissionController::new(store.clone(), test_clock());
        admission.publish_offer(&offer(1)).await.unwrap();
        store.set_unavailable(true);

        let result = admission.admit_purchase(&request(1)).await;
        assert!(matches!(result, Err(FlashSaleError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn republishing_a_live_offer_is_rejected() {
        let store = InMemoryFastStore::new();
        let admission = AdmissionController::new(store.clone(), test_clock());
        admission.publish_offer(&offer(1)).await.unwrap();
        admission.admit_purchase(&request(1)).await.unwrap();

        let result = admission.publish_offer(&offer(1)).await;

        assert_eq!(result, Err(FlashSaleError::AlreadyPublished(OfferId(9))));
        assert_eq!(remaining_stock(&store).await, "0");
        assert_eq!(
            store.set_members(&keys::grant_key(OfferId(9))).unwrap(),
            HashSet::from(["1".to_string()])
        );
        assert_eq!(
            admission.admit_purchase(&request(1)).await.unwrap(),
            AdmissionOutcome::AlreadyGranted
        );
        assert_eq!(store.stream_len(keys::DEFAULT_STREAM).unwrap(), 1);
    }

    #[tokio::test]
    async fn reservation_expires_after_grace() {
        let store = InMemoryFastStore::new();
        let admission = AdmissionController::new(store.clone(), test_clock());
        admission.publish_offer(&offer(1)).await.unwrap();

        let ttl = store.ttl(&keys::stock_key(OfferId(9))).unwrap().unwrap();
        // One hour of window plus one hour of grace.
        assert!(ttl > Duration::from_secs(7190) && ttl <= Duration::from_secs(7200));
    }
}
