//! Lua sources of the registered atomic scripts.
//!
//! Scripts run inside Redis without interleaving, which is what makes the
//! admission decision safe under arbitrary concurrency without any
//! client-side lock.

use flashsale_core::ScriptKey;
use redis::Script;

/// Admission: validate and reserve one unit of stock, then enqueue the
/// fulfillment record.
///
/// ```text
/// KEYS[1] seckill:stock:{offer}   hash: stock, valid_from_ms, valid_until_ms
/// KEYS[2] seckill:order:{offer}   set of granted readers
/// KEYS[3] stream.orders           fulfillment stream
/// ARGV    reader, author, offer, credit_amount, now_ms
/// ```
///
/// Result codes: `0` admitted, `1` already granted, `2` expired or missing,
/// `3` out of stock.
pub const ADMISSION_LUA: &str = r"
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
    return 1
end

local window = redis.call('HMGET', KEYS[1], 'stock', 'valid_from_ms', 'valid_until_ms')
if not window[1] or not window[2] or not window[3] then
    return 2
end

local now = tonumber(ARGV[5])
if now < tonumber(window[2]) or now > tonumber(window[3]) then
    return 2
end

if tonumber(window[1]) <= 0 then
    return 3
end

redis.call('HINCRBY', KEYS[1], 'stock', -1)
redis.call('SADD', KEYS[2], ARGV[1])

local ttl = redis.call('PTTL', KEYS[1])
if ttl > 0 then
    redis.call('PEXPIRE', KEYS[2], ttl)
end

redis.call('XADD', KEYS[3], '*',
    'reader_id', ARGV[1],
    'author_id', ARGV[2],
    'offer_id', ARGV[3],
    'credit_amount', ARGV[4])
return 0
";

/// Create-only publication of a reservation hash.
///
/// ```text
/// KEYS[1] seckill:stock:{offer}   reservation hash
/// KEYS[2] seckill:order:{offer}   set of granted readers
/// ARGV    ttl_ms, field1, value1, field2, value2, ...
/// ```
///
/// Returns `0` without writing when either key exists, so republishing an
/// offer can never reset stock or forget who was already granted.
pub const PUBLISH_RESERVATION_LUA: &str = r"
if redis.call('EXISTS', KEYS[1], KEYS[2]) > 0 then
    return 0
end

for i = 2, #ARGV, 2 do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return 1
";

/// Owner-checked unlock: delete the key only if it still holds our token.
pub const RELEASE_LOCK_LUA: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Compiled scripts. `Script` caches the SHA and falls back to `EVAL` on
/// `NOSCRIPT`, so a Redis restart needs no special handling.
pub struct Scripts {
    admission: Script,
    publish_reservation: Script,
    release_lock: Script,
}

impl Scripts {
    /// Compile all registered scripts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            admission: Script::new(ADMISSION_LUA),
            publish_reservation: Script::new(PUBLISH_RESERVATION_LUA),
            release_lock: Script::new(RELEASE_LOCK_LUA),
        }
    }

    /// Script registered under `key`.
    #[must_use]
    pub const fn get(&self, key: ScriptKey) -> &Script {
        match key {
            ScriptKey::Admission => &self.admission,
            ScriptKey::PublishReservation => &self.publish_reservation,
            ScriptKey::ReleaseLock => &self.release_lock,
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_core::FulfillmentRecord;
    use flashsale_core::keys;

    #[test]
    fn admission_script_writes_record_fields() {
        for field in [
            FulfillmentRecord::FIELD_READER,
            FulfillmentRecord::FIELD_AUTHOR,
            FulfillmentRecord::FIELD_OFFER,
            FulfillmentRecord::FIELD_CREDITS,
        ] {
            assert!(ADMISSION_LUA.contains(&format!("'{field}'")), "missing {field}");
        }
    }

    #[test]
    fn admission_script_reads_reservation_fields() {
        for field in [keys::FIELD_STOCK, keys::FIELD_VALID_FROM, keys::FIELD_VALID_UNTIL] {
            assert!(ADMISSION_LUA.contains(&format!("'{field}'")), "missing {field}");
        }
    }

    #[test]
    fn scripts_have_distinct_hashes() {
        let scripts = Scripts::new();
        let hashes: std::collections::HashSet<&str> = [
            ScriptKey::Admission,
            ScriptKey::PublishReservation,
            ScriptKey::ReleaseLock,
        ]
        .into_iter()
        .map(|key| scripts.get(key).get_hash())
        .collect();
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn publication_checks_both_keys_before_writing() {
        let guard = PUBLISH_RESERVATION_LUA.find("EXISTS").unwrap();
        let write = PUBLISH_RESERVATION_LUA.find("HSET").unwrap();
        assert!(guard < write);
        assert!(PUBLISH_RESERVATION_LUA.contains("KEYS[1], KEYS[2]"));
        assert!(!PUBLISH_RESERVATION_LUA.contains("DEL"));
    }
}
