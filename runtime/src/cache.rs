//! Read-through cache with stampede protection.
//!
//! Entries live in the fast-path store as a hash at `cache:{kind}:{id}`:
//! either a JSON `payload` field, or an `is_empty` tombstone recording that
//! the entity does not exist. Tombstones expire sooner than entries.
//!
//! On a miss exactly one caller repopulates: it takes `mutex:{kind}:{id}`
//! with a random owner token, re-checks the cache, loads the entity from
//! the source and writes the entry (or tombstone). Everyone else waits
//! `retry_delay` and looks again. The mutex is released with an
//! owner-checked delete, so a holder whose lock already expired cannot
//! remove a successor's lock.
//!
//! The cache never makes a read fail that the source could have served:
//! when the store is unavailable, or the retry budget runs out while
//! another caller holds the mutex, the entity is read from the source
//! directly. Source errors are returned as-is and nothing is cached.

use crate::metrics::CacheMetrics;
use flashsale_core::{
    CacheConfig, EntitySource, FastStore, FlashSaleError, Result, ScriptKey, keys,
};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a cache lookup found.
enum Cached<T> {
    Entity(T),
    Tombstone,
}

/// Read-through cache in front of an [`EntitySource`].
#[derive(Debug, Clone)]
pub struct ReadThroughCache<S, E> {
    store: S,
    source: E,
    config: CacheConfig,
}

impl<S: FastStore, E: EntitySource> ReadThroughCache<S, E> {
    /// Create a cache.
    #[must_use]
    pub const fn new(store: S, source: E, config: CacheConfig) -> Self {
        Self { store, source, config }
    }

    /// Source behind the cache.
    #[must_use]
    pub const fn source(&self) -> &E {
        &self.source
    }

    /// Look up an entity, loading and caching it on a miss.
    ///
    /// Returns `Ok(None)` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the entity had to be loaded and the
    /// load failed. Store failures are never returned.
    pub async fn get(&self, id: u64) -> Result<Option<E::Entity>> {
        let kind = self.source.kind();
        let cache_key = keys::cache_key(kind, id);
        let mutex_key = keys::mutex_key(kind, id);

        for attempt in 0..self.config.max_attempts {
            match self.lookup(&cache_key).await {
                Ok(Some(cached)) => return Ok(Self::hit(cached)),
                Ok(None) => {}
                Err(e) => return self.degraded(id, &e).await,
            }

            let token = Uuid::new_v4().to_string();
            match self
                .store
                .set_if_absent(&mutex_key, &token, self.config.lock_ttl)
                .await
            {
                Ok(true) => return self.repopulate(id, &cache_key, &mutex_key, &token).await,
                Ok(false) => {
                    debug!(key = %cache_key, attempt, "Repopulation in progress, waiting");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return self.degraded(id, &e).await,
            }
        }

        warn!(
            key = %cache_key,
            attempts = self.config.max_attempts,
            "Cache repopulation did not finish in time, reading source directly"
        );
        CacheMetrics::record("fallback");
        self.source.load(id).await
    }

    /// Drop the cached entry (or tombstone) of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::StoreUnavailable`] if the delete fails.
    pub async fn invalidate(&self, id: u64) -> Result<()> {
        let cache_key = keys::cache_key(self.source.kind(), id);
        self.store.delete(&cache_key).await?;
        debug!(key = %cache_key, "Cache entry invalidated");
        Ok(())
    }

    fn hit(cached: Cached<E::Entity>) -> Option<E::Entity> {
        match cached {
            Cached::Entity(entity) => {
                CacheMetrics::record("hit");
                Some(entity)
            }
            Cached::Tombstone => {
                CacheMetrics::record("tombstone");
                None
            }
        }
    }

    async fn lookup(&self, cache_key: &str) -> Result<Option<Cached<E::Entity>>> {
        let fields = self.store.hash_get_all(cache_key).await?;
        Ok(Self::decode(cache_key, &fields))
    }

    fn decode(cache_key: &str, fields: &HashMap<String, String>) -> Option<Cached<E::Entity>> {
        if fields.contains_key(keys::FIELD_TOMBSTONE) {
            return Some(Cached::Tombstone);
        }
        let payload = fields.get(keys::FIELD_PAYLOAD)?;
        match serde_json::from_str(payload) {
            Ok(entity) => Some(Cached::Entity(entity)),
            Err(e) => {
                // Treated as a miss; repopulation overwrites it.
                warn!(key = %cache_key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn repopulate(
        &self,
        id: u64,
        cache_key: &str,
        mutex_key: &str,
        token: &str,
    ) -> Result<Option<E::Entity>> {
        let result = self.fill(id, cache_key).await;
        self.release(mutex_key, token).await;
        result
    }

    async fn fill(&self, id: u64, cache_key: &str) -> Result<Option<E::Entity>> {
        // Someone may have filled the entry between our miss and taking the mutex.
        if let Ok(Some(cached)) = self.lookup(cache_key).await {
            return Ok(Self::hit(cached));
        }

        let loaded = self.source.load(id).await?;
        CacheMetrics::record("loaded");

        if let Err(e) = self.write(cache_key, loaded.as_ref()).await {
            warn!(key = %cache_key, error = %e, "Failed to write cache entry");
        }
        Ok(loaded)
    }

    async fn write(&self, cache_key: &str, entity: Option<&E::Entity>) -> Result<()> {
        let (fields, ttl) = match entity {
            Some(entity) => {
                let payload = serde_json::to_string(entity)
                    .map_err(|e| FlashSaleError::Serialization(e.to_string()))?;
                (vec![(keys::FIELD_PAYLOAD.to_string(), payload)], self.config.entry_ttl)
            }
            None => (
                vec![(keys::FIELD_TOMBSTONE.to_string(), "1".to_string())],
                self.config.tombstone_ttl,
            ),
        };

        self.store.hash_replace(cache_key, &fields, ttl).await
    }

    async fn release(&self, mutex_key: &str, token: &str) {
        let released = self
            .store
            .run_atomic(
                ScriptKey::ReleaseLock,
                &[mutex_key.to_string()],
                &[token.to_string()],
            )
            .await;

        match released {
            Ok(1) => {}
            Ok(_) => debug!(key = %mutex_key, "Repopulation mutex expired before release"),
            Err(e) => warn!(key = %mutex_key, error = %e, "Failed to release repopulation mutex"),
        }
    }

    async fn degraded(&self, id: u64, error: &FlashSaleError) -> Result<Option<E::Entity>> {
        warn!(
            kind = self.source.kind(),
            id,
            error = %error,
            "Cache unavailable, reading source directly"
        );
        CacheMetrics::record("degraded");
        self.source.load(id).await
    }
}
