//! Fast-path store keyspace.
//!
//! Every key the pipeline touches is built here so the Redis store, the
//! in-memory double and operators agree on the layout:
//!
//! | Key | Type | Holds |
//! |---|---|---|
//! | `seckill:stock:{offer}` | hash | `stock`, `valid_from_ms`, `valid_until_ms`, `author_id`, `price` |
//! | `seckill:order:{offer}` | set | readers granted this offer |
//! | `stream.orders` | stream | fulfillment records |
//! | `cache:{kind}:{id}` | hash | `payload` (JSON) or `is_empty` tombstone |
//! | `mutex:{kind}:{id}` | string | repopulation owner token |

use crate::types::OfferId;

/// Default stream holding fulfillment records.
pub const DEFAULT_STREAM: &str = "stream.orders";

/// Default consumer group for fulfillment workers.
pub const DEFAULT_GROUP: &str = "fulfillment";

/// Reservation hash field: remaining stock.
pub const FIELD_STOCK: &str = "stock";
/// Reservation hash field: window start, unix millis.
pub const FIELD_VALID_FROM: &str = "valid_from_ms";
/// Reservation hash field: window end, unix millis.
pub const FIELD_VALID_UNTIL: &str = "valid_until_ms";
/// Reservation hash field: offer owner.
pub const FIELD_AUTHOR: &str = "author_id";
/// Reservation hash field: discounted price.
pub const FIELD_PRICE: &str = "price";

/// Cache hash field holding the serialized entity.
pub const FIELD_PAYLOAD: &str = "payload";
/// Cache hash field marking a known-absent entity.
pub const FIELD_TOMBSTONE: &str = "is_empty";

/// Entity kind under which accounts are cached.
pub const ACCOUNT_KIND: &str = "user";

/// Stock/window hash of an offer.
#[must_use]
pub fn stock_key(offer_id: OfferId) -> String {
    format!("seckill:stock:{offer_id}")
}

/// Set of readers already granted an offer.
#[must_use]
pub fn grant_key(offer_id: OfferId) -> String {
    format!("seckill:order:{offer_id}")
}

/// Cache entry of an entity.
#[must_use]
pub fn cache_key(kind: &str, id: u64) -> String {
    format!("cache:{kind}:{id}")
}

/// Repopulation mutex of an entity.
#[must_use]
pub fn mutex_key(kind: &str, id: u64) -> String {
    format!("mutex:{kind}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(stock_key(OfferId(12)), "seckill:stock:12");
        assert_eq!(grant_key(OfferId(12)), "seckill:order:12");
        assert_eq!(cache_key("user", 9), "cache:user:9");
        assert_eq!(mutex_key("user", 9), "mutex:user:9");
    }
}
