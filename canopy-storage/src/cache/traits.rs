//! Key/value cache client trait and cache statistics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canopy_core::CacheError;

/// Minimal Redis-style cache client.
///
/// Implementations must be safe for concurrent use. All values are opaque
/// strings; the hierarchy layer stores JSON.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Fetch a live (non-expired) value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Delete every key in one round trip. Returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;
}

#[async_trait]
impl<C: KeyValueCache + ?Sized> KeyValueCache for Arc<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        (**self).del(keys).await
    }
}

/// Statistics about hierarchy cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from the cache.
    pub hits: u64,
    /// Reads that fell through to the store.
    pub misses: u64,
    /// Backend or payload failures that were logged and swallowed.
    pub errors: u64,
    /// Keys requested for deletion by invalidations.
    pub invalidated_keys: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
