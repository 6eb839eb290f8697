//! In-process key/value cache with per-entry TTL.
//!
//! Expiry is lazy: an expired entry is treated as absent by `get` and
//! dropped either on the next write that touches it or by the sweep that
//! runs every [`SWEEP_INTERVAL`] writes. Time comes from
//! `tokio::time::Instant` so tests can drive it with a paused clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use canopy_core::CacheError;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::traits::KeyValueCache;

/// Writes between two sweeps of expired entries.
pub const SWEEP_INTERVAL: usize = 256;

/// Longest TTL an entry can carry. Longer TTLs are clamped.
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`KeyValueCache`].
#[derive(Debug, Default)]
pub struct InMemoryKvCache {
    entries: RwLock<HashMap<String, Entry>>,
    writes: AtomicUsize,
}

impl InMemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `key` holds a live value.
    pub async fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|e| e.is_live(now))
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        sweep(&mut entries, Instant::now())
    }
}

fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, e| e.is_live(now));
    let removed = before - entries.len();
    if removed > 0 {
        tracing::debug!(removed, remaining = entries.len(), "expired cache entries swept");
    }
    removed
}

/// `now + ttl`, clamped to [`MAX_ENTRY_TTL`] so the addition cannot overflow.
fn expiry(now: Instant, ttl: Duration) -> Instant {
    let ttl = ttl.min(MAX_ENTRY_TTL);
    now.checked_add(ttl).unwrap_or(now)
}

#[async_trait]
impl KeyValueCache for InMemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = Entry {
            value: value.to_string(),
            expires_at: expiry(now, ttl),
        };
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            sweep(&mut entries, now);
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut deleted = 0u64;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if entry.is_live(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}
