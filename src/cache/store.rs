//! Cache store contract and an in-memory backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::cache::key::CacheKey;
use crate::error::CacheStoreError;

/// Where an entry lives: operation name, payload version, normalized key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheSlot {
    pub operation: &'static str,
    pub version: u32,
    pub key: CacheKey,
}

/// A stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub slot: CacheSlot,
    /// Serialized payload, opaque to the store.
    pub payload: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

/// Storage behind the offline cache.
///
/// Implementations must tolerate concurrent reads and writes of the same
/// slot. Invalidation and version bumps are the store's business.
pub trait CacheStore: Send + Sync {
    /// Looks up an entry.
    fn get(&self, slot: &CacheSlot) -> Result<Option<CacheEntry>, CacheStoreError>;

    /// Inserts or replaces an entry.
    fn put(&self, entry: CacheEntry) -> Result<(), CacheStoreError>;

    /// Removes an entry. Returns whether one existed.
    fn remove(&self, slot: &CacheSlot) -> Result<bool, CacheStoreError>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize, CacheStoreError>;

    /// Returns true when nothing is stored.
    fn is_empty(&self) -> Result<bool, CacheStoreError> {
        Ok(self.len()? == 0)
    }
}

fn lock_err(context: &'static str) -> CacheStoreError {
    CacheStoreError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory cache store.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<CacheSlot, CacheEntry>>,
    offline: AtomicBool,
}

impl InMemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a backend error until turned off again.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), CacheStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheStoreError::BackendError("cache store offline".to_string()));
        }
        Ok(())
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, slot: &CacheSlot) -> Result<Option<CacheEntry>, CacheStoreError> {
        self.check_online()?;
        let entries = self.entries.read().map_err(|_| lock_err("cache entries"))?;
        Ok(entries.get(slot).cloned())
    }

    fn put(&self, entry: CacheEntry) -> Result<(), CacheStoreError> {
        self.check_online()?;
        let mut entries = self.entries.write().map_err(|_| lock_err("cache entries"))?;
        entries.insert(entry.slot.clone(), entry);
        Ok(())
    }

    fn remove(&self, slot: &CacheSlot) -> Result<bool, CacheStoreError> {
        self.check_online()?;
        let mut entries = self.entries.write().map_err(|_| lock_err("cache entries"))?;
        Ok(entries.remove(slot).is_some())
    }

    fn len(&self) -> Result<usize, CacheStoreError> {
        self.check_online()?;
        let entries = self.entries.read().map_err(|_| lock_err("cache entries"))?;
        Ok(entries.len())
    }
}
