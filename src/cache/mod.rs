//! Offline cache for expensive reads.
//!
//! Reads are keyed by a digest of the request fields that affect the payload,
//! so requests that differ only in session-scoped or display-only fields share
//! one entry.

/// Read-through adapter.
pub mod adapter;
/// Key normalization.
pub mod key;
/// Store contract and in-memory backend.
pub mod store;

pub use adapter::OfflineCache;
pub use key::{CacheKey, CacheKeyed};
pub use store::{CacheEntry, CacheSlot, CacheStore, InMemoryCacheStore};
