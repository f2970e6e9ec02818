//! Read-through offline cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::key::CacheKey;
use crate::cache::store::{CacheEntry, CacheSlot, CacheStore};
use crate::error::{EngineResult, GatewayError, GatewayResult};
use crate::keys::OfflineAvailability;

/// Wraps an expensive idempotent read with a versioned cache.
///
/// Concurrent misses on the same key may each run the loader; dedup belongs
/// to the store if it is needed.
pub struct OfflineCache {
    store: Arc<dyn CacheStore>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl OfflineCache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached payload for `(operation, version, key)` or loads it.
    ///
    /// On a hit the loader is not called. On a miss it is called exactly once
    /// and a successful result is stored. A loader error is returned as
    /// [`GatewayError::CacheLoader`] and nothing is stored. With
    /// [`OfflineAvailability::None`] the store is neither read nor written.
    pub fn serve<T, F>(
        &self,
        operation: &'static str,
        version: u32,
        key: CacheKey,
        availability: OfflineAvailability,
        loader: F,
    ) -> GatewayResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&CacheKey) -> EngineResult<T>,
    {
        let load = |key: &CacheKey| loader(key).map_err(|source| GatewayError::CacheLoader { operation, source });

        if availability == OfflineAvailability::None {
            return load(&key);
        }

        let slot = CacheSlot { operation, version, key };
        match self.store.get(&slot) {
            Ok(Some(entry)) => match serde_json::from_slice::<T>(&entry.payload) {
                Ok(payload) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(operation, key = ?slot.key, "offline cache hit");
                    return Ok(payload);
                }
                Err(e) => warn!(operation, key = ?slot.key, error = %e, "discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(operation, error = %e, "cache read failed, loading directly"),
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let payload = load(&slot.key)?;
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                let entry = CacheEntry {
                    slot,
                    payload: bytes,
                    stored_at: Utc::now(),
                };
                if let Err(e) = self.store.put(entry) {
                    warn!(operation, error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(operation, error = %e, "payload not serializable, not caching"),
        }
        Ok(payload)
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}

impl std::fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineCache")
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish_non_exhaustive()
    }
}
