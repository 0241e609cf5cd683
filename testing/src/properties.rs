//! Property-based testing strategies for domain types.

use flashsale_core::{AccountId, FulfillmentRecord, OfferId};
use proptest::prelude::*;

/// Arbitrary well-formed fulfillment record.
pub fn fulfillment_record() -> impl Strategy<Value = FulfillmentRecord> {
    (any::<u64>(), any::<u64>(), any::<u64>(), any::<u64>()).prop_map(
        |(reader, author, offer, credits)| FulfillmentRecord {
            reader_id: AccountId(reader),
            author_id: AccountId(author),
            offer_id: OfferId(offer),
            credit_amount: credits,
        },
    )
}

/// Purchase attempts by readers drawn from a small pool, so the same reader
/// shows up more than once.
pub fn contended_readers(pool: u64, attempts: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1..=pool.max(1), 1..=attempts.max(1))
}
