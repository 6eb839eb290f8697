//! Cache layer for hierarchy reads.
//!
//! Cached entries are derived, never authoritative. Keys are always tenant
//! scoped: [`HierarchyCacheKey`] cannot be built without a tenant id, so a
//! read for one tenant can never be served another tenant's entry.
//!
//! Invalidation is computed from the mutated path alone. A change at `A/B/C`
//! deletes the `descendants` and `agg_counts` entries of `A/B/C`, `A/B` and
//! `A` in one batched delete. There is no keyspace scan. Every entry also
//! carries a TTL so a lost invalidation heals on its own.

pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod read_through;
pub mod traits;

pub use key::{hierarchy_invalidation_keys, CacheFamily, HierarchyCacheKey};
pub use lmdb_backend::{LmdbCacheError, LmdbKvCache};
pub use memory_backend::InMemoryKvCache;
pub use read_through::{CacheConfig, HierarchyCache, DEFAULT_CACHE_TTL};
pub use traits::{CacheStats, KeyValueCache};
