//! Read-through hierarchy cache and path-derived invalidation.
//!
//! The cache is advisory. A hit short-circuits the store; a miss, a backend
//! failure or an undecodable payload falls through to the store and the
//! fresh result is written back with the configured TTL. Cache failures are
//! logged and counted, never returned.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canopy_core::{CanopyResult, TenantId, UserId, WorkspacePath};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::key::{hierarchy_invalidation_keys, HierarchyCacheKey};
use super::traits::{CacheStats, KeyValueCache};

/// Lifetime of every hierarchy cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Configuration for the hierarchy cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied to every write. Bounds staleness if an invalidation is lost.
    pub entry_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }
}

#[derive(Debug, Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    invalidated_keys: AtomicU64,
}

/// Tenant-scoped read-through cache over a [`KeyValueCache`].
pub struct HierarchyCache<C: KeyValueCache + ?Sized> {
    backend: Arc<C>,
    config: CacheConfig,
    stats: AtomicStats,
}

impl<C: KeyValueCache + ?Sized> HierarchyCache<C> {
    pub fn new(backend: Arc<C>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            stats: AtomicStats::default(),
        }
    }

    pub fn with_defaults(backend: Arc<C>) -> Self {
        Self::new(backend, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    /// Snapshot of hit/miss/error counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            invalidated_keys: self.stats.invalidated_keys.load(Ordering::Relaxed),
        }
    }

    /// Cached value for `key`, or `None` on miss or any cache failure.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &HierarchyCacheKey) -> Option<T> {
        let rendered = key.render();
        let raw = match self.backend.get(&rendered).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %rendered, "hierarchy cache miss");
                return None;
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %rendered, error = %e, "hierarchy cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %rendered, "hierarchy cache hit");
                Some(value)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %rendered, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Write `value` under `key` with the configured TTL. Failures are logged.
    pub async fn store<T: Serialize + ?Sized>(&self, key: &HierarchyCacheKey, value: &T) {
        let rendered = key.render();
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %rendered, error = %e, "failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self
            .backend
            .set(&rendered, &payload, self.config.entry_ttl)
            .await
        {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %rendered, error = %e, "hierarchy cache write failed");
        }
    }

    /// Serve `key` from cache, otherwise run `fetch` and populate the cache.
    ///
    /// Errors from `fetch` propagate unchanged and leave the cache untouched.
    pub async fn read_through<T, F, Fut>(&self, key: &HierarchyCacheKey, fetch: F) -> CanopyResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CanopyResult<T>>,
    {
        if let Some(cached) = self.lookup(key).await {
            return Ok(cached);
        }
        let fresh = fetch().await?;
        self.store(key, &fresh).await;
        Ok(fresh)
    }

    /// Delete the `descendants` and `agg_counts` entries of `path` and of
    /// every ancestor prefix, in one batched call.
    pub async fn invalidate_hierarchy(&self, tenant_id: TenantId, path: &WorkspacePath) {
        let keys: Vec<String> = hierarchy_invalidation_keys(tenant_id, path)
            .iter()
            .map(HierarchyCacheKey::render)
            .collect();
        self.delete_batch(tenant_id, keys).await;
    }

    /// Delete the cached tree for `user_id`. `None` is a no-op; the entry, if
    /// any, ages out through its TTL.
    pub async fn invalidate_tree(&self, tenant_id: TenantId, user_id: Option<UserId>) {
        let Some(user_id) = user_id else {
            tracing::debug!(tenant_id = %tenant_id, "tree invalidation skipped, no user");
            return;
        };
        let keys = vec![HierarchyCacheKey::tree(tenant_id, user_id).render()];
        self.delete_batch(tenant_id, keys).await;
    }

    async fn delete_batch(&self, tenant_id: TenantId, keys: Vec<String>) {
        self.stats
            .invalidated_keys
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        match self.backend.del(&keys).await {
            Ok(deleted) => {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    requested = keys.len(),
                    deleted,
                    "hierarchy cache invalidated"
                );
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tenant_id = %tenant_id,
                    requested = keys.len(),
                    error = %e,
                    "hierarchy cache invalidation failed"
                );
            }
        }
    }
}
