//! LMDB-backed key/value cache.
//!
//! Uses heed for a memory-mapped store that survives process restarts and
//! can be shared by several workers on one host.
//!
//! Value layout: `[expires_at_millis: i64 LE][utf-8 value]`. Expired entries
//! read as absent and are removed by [`LmdbKvCache::purge_expired`].
//!
//! heed transactions are blocking. The calls are short single-key reads and
//! writes, so they run inline on the async task.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use canopy_core::CacheError;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::KeyValueCache;

const EXPIRY_PREFIX_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes do not follow the value layout.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::EnvOpen(_) | LmdbCacheError::DbOpen(_) | LmdbCacheError::Io(_) => {
                CacheError::Unavailable {
                    reason: e.to_string(),
                }
            }
            LmdbCacheError::Transaction(_) => CacheError::Backend {
                reason: e.to_string(),
            },
            LmdbCacheError::Corrupt(_) => CacheError::Serialization {
                reason: e.to_string(),
            },
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed [`KeyValueCache`].
pub struct LmdbKvCache {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbKvCache {
    /// Open (or create) the cache.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory holding the LMDB files; created if missing
    /// * `max_size_mb` - LMDB map size in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - The LMDB environment cannot be opened
    /// - The database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this cache and is not
        // opened twice within one process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, db })
    }

    /// Remove every expired entry in one write transaction.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();

        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let iter = self.db.iter(&rtxn).map_err(txn_err)?;
            let mut keys = Vec::new();
            for item in iter {
                let (key, bytes) = item.map_err(txn_err)?;
                let live = decode_entry(bytes).is_ok_and(|(expires_at, _)| expires_at > now);
                if !live {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        Ok(deleted)
    }

    fn read(&self, key: &str) -> Result<Option<String>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let Some(bytes) = self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? else {
            return Ok(None);
        };

        let (expires_at, value) = decode_entry(bytes)?;
        if expires_at <= Utc::now().timestamp_millis() {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }

    fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LmdbCacheError> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_millis);

        let mut bytes = Vec::with_capacity(EXPIRY_PREFIX_LEN + value.len());
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(value.as_bytes());

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn delete_many(&self, keys: &[String]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }
}

fn decode_entry(bytes: &[u8]) -> Result<(i64, &str), LmdbCacheError> {
    if bytes.len() < EXPIRY_PREFIX_LEN {
        return Err(LmdbCacheError::Corrupt("entry shorter than expiry header".into()));
    }
    let (header, payload) = bytes.split_at(EXPIRY_PREFIX_LEN);
    let header: [u8; EXPIRY_PREFIX_LEN] = header
        .try_into()
        .map_err(|_| LmdbCacheError::Corrupt("invalid expiry header".into()))?;
    let value =
        std::str::from_utf8(payload).map_err(|e| LmdbCacheError::Corrupt(e.to_string()))?;
    Ok((i64::from_le_bytes(header), value))
}

#[async_trait]
impl KeyValueCache for LmdbKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.read(key)?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        Ok(self.write(key, value, ttl)?)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.delete_many(keys)?)
    }
}
