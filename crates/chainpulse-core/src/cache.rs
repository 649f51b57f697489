//! Shared TTL-bound key/value store.
//!
//! Backed by `moka` with a per-entry expiry policy, so every `set` carries
//! its own lifetime (see [`crate::ttl`]). Values are stored as JSON so any
//! component can read entities written by another without sharing types.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Well-known cache keys.
pub mod keys {
    /// Current tip height; deleted on reorg.
    pub const TIP_HEIGHT: &str = "chain:tip:height";
    pub const FEE_ESTIMATES: &str = "network:fees";
    pub const MEMPOOL_SUMMARY: &str = "network:mempool";
    /// Written by the external price feed.
    pub const PRICE_CURRENT: &str = "price:current";
    /// Written by the external FX feed.
    pub const FX_RATES: &str = "fx:rates";
    pub const BOOTSTRAP_SNAPSHOT: &str = "bootstrap:snapshot";
}

const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Arc<CacheEntry>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Cloneable handle to the shared cache. Clones share storage.
#[derive(Clone)]
pub struct SharedCache {
    inner: Cache<String, Arc<CacheEntry>>,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Read and decode an entry. Missing, expired and undecodable entries
    /// all read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.inner.get(key).await?;
        match serde_json::from_value(entry.value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(key, error = %e, "cache entry has unexpected shape");
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`. Overwrites reset the lifetime.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.inner
            .insert(key.to_string(), Arc::new(CacheEntry { value, ttl }))
            .await;
        Ok(())
    }

    pub async fn delete(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeeEstimate;

    #[tokio::test]
    async fn set_then_get_typed() {
        let cache = SharedCache::new();
        let fees = FeeEstimate { fast: 30.0, normal: 12.5, slow: 3.0 };
        cache.set(keys::FEE_ESTIMATES, &fees, Duration::from_secs(15)).await.unwrap();
        assert_eq!(cache.get::<FeeEstimate>(keys::FEE_ESTIMATES).await, Some(fees));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = SharedCache::new();
        cache.set(keys::TIP_HEIGHT, &840_000u64, Duration::from_secs(2)).await.unwrap();
        assert_eq!(cache.get::<u64>(keys::TIP_HEIGHT).await, Some(840_000));
        cache.delete(keys::TIP_HEIGHT).await;
        assert_eq!(cache.get::<u64>(keys::TIP_HEIGHT).await, None);
        // Deleting a missing key is a no-op.
        cache.delete(keys::TIP_HEIGHT).await;
    }

    #[tokio::test]
    async fn entries_expire_after_their_own_ttl() {
        let cache = SharedCache::new();
        cache.set("short", &1u8, Duration::from_millis(50)).await.unwrap();
        cache.set("long", &2u8, Duration::from_secs(60)).await.unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get::<u8>("short").await, None);
        assert_eq!(cache.get::<u8>("long").await, Some(2));
    }

    #[tokio::test]
    async fn wrong_shape_reads_as_miss() {
        let cache = SharedCache::new();
        cache.set("k", "not a number", Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get::<u64>("k").await, None);
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("not a number"));
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let a = SharedCache::new();
        let b = a.clone();
        a.set("k", &5u32, Duration::from_secs(5)).await.unwrap();
        assert_eq!(b.get::<u32>("k").await, Some(5));
    }
}
