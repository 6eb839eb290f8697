//! CANOPY Storage - Query Trait, In-Memory Store and Cache Layer
//!
//! Defines the query-layer abstraction for the workspace hierarchy and the
//! tenant-scoped cache that sits in front of it. The PostgreSQL
//! implementation lives in canopy-engine.

pub mod cache;
pub mod memory;
pub mod store;

pub use cache::{
    hierarchy_invalidation_keys, CacheConfig, CacheFamily, CacheStats, HierarchyCache,
    HierarchyCacheKey, InMemoryKvCache, KeyValueCache, LmdbCacheError, LmdbKvCache,
    DEFAULT_CACHE_TTL,
};
pub use memory::InMemoryHierarchyStore;
pub use store::HierarchyStore;
