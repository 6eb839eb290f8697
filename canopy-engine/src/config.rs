//! Environment-driven configuration.
//!
//! Every struct has a `Default`, a `from_env()` that falls back to the
//! default for unset or unparsable variables, and `with_*` setters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use canopy_core::{CacheError, CanopyResult, StorageError};
use canopy_storage::{InMemoryKvCache, KeyValueCache, LmdbKvCache, DEFAULT_CACHE_TTL};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

/// Default and ceiling for the page `get_direct_children` returns.
pub const DEFAULT_MAX_PAGE_SIZE: i64 = 100;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// DATABASE
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait/create/recycle timeout for pooled connections
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "canopy".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Read `CANOPY_DB_*` variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("CANOPY_DB_HOST").unwrap_or(defaults.host),
            port: env_parse("CANOPY_DB_PORT").unwrap_or(defaults.port),
            dbname: std::env::var("CANOPY_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("CANOPY_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("CANOPY_DB_PASSWORD").unwrap_or(defaults.password),
            max_size: env_parse("CANOPY_DB_POOL_SIZE").unwrap_or(defaults.max_size),
            timeout: env_parse("CANOPY_DB_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Create a connection pool from this configuration.
    ///
    /// Connections are opened lazily, so this does not touch the network.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Pool` if deadpool cannot build a pool from
    /// this configuration.
    pub fn create_pool(&self) -> CanopyResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        pool_cfg.timeouts.create = Some(self.timeout);
        pool_cfg.timeouts.recycle = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::Pool {
                reason: format!("Failed to create pool: {e}"),
            })?;

        Ok(pool)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Tunables for [`HierarchyEngine`](crate::HierarchyEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL for every hierarchy cache entry.
    pub cache_ttl: Duration,
    /// Upper bound for `get_direct_children` page size, at most
    /// [`DEFAULT_MAX_PAGE_SIZE`].
    pub max_page_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Read `CANOPY_CACHE_TTL_SECS` and `CANOPY_MAX_PAGE_SIZE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_ttl: env_parse("CANOPY_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            max_page_size: env_parse::<i64>("CANOPY_MAX_PAGE_SIZE")
                .filter(|n| *n >= 1)
                .map(|n| n.min(DEFAULT_MAX_PAGE_SIZE))
                .unwrap_or(defaults.max_page_size),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_max_page_size(mut self, max: i64) -> Self {
        self.max_page_size = max.clamp(1, DEFAULT_MAX_PAGE_SIZE);
        self
    }
}

// ============================================================================
// CACHE BACKEND
// ============================================================================

/// Which [`KeyValueCache`] implementation to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Lmdb { path: PathBuf, max_size_mb: usize },
}

/// Cache backend selection.
#[derive(Debug, Clone)]
pub struct CacheBackendConfig {
    pub kind: CacheBackendKind,
}

impl Default for CacheBackendConfig {
    fn default() -> Self {
        Self {
            kind: CacheBackendKind::Memory,
        }
    }
}

impl CacheBackendConfig {
    /// Read `CANOPY_CACHE_BACKEND` (`memory` or `lmdb`) plus
    /// `CANOPY_CACHE_LMDB_PATH` and `CANOPY_CACHE_LMDB_MAX_MB`.
    pub fn from_env() -> Self {
        let backend = std::env::var("CANOPY_CACHE_BACKEND").unwrap_or_default();
        let kind = match backend.to_ascii_lowercase().as_str() {
            "lmdb" => CacheBackendKind::Lmdb {
                path: std::env::var("CANOPY_CACHE_LMDB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| std::env::temp_dir().join("canopy-cache")),
                max_size_mb: env_parse("CANOPY_CACHE_LMDB_MAX_MB").unwrap_or(256),
            },
            _ => CacheBackendKind::Memory,
        };
        Self { kind }
    }

    pub fn lmdb(path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        Self {
            kind: CacheBackendKind::Lmdb {
                path: path.into(),
                max_size_mb,
            },
        }
    }

    /// Build the configured backend.
    pub fn build(&self) -> CanopyResult<Arc<dyn KeyValueCache>> {
        match &self.kind {
            CacheBackendKind::Memory => Ok(Arc::new(InMemoryKvCache::new())),
            CacheBackendKind::Lmdb { path, max_size_mb } => {
                let cache = LmdbKvCache::new(path, *max_size_mb).map_err(CacheError::from)?;
                Ok(Arc::new(cache))
            }
        }
    }
}
