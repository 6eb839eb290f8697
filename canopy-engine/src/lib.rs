//! CANOPY Engine - Workspace Hierarchy Engine
//!
//! Ties the pure path arithmetic of `canopy-core` and the cache layer of
//! `canopy-storage` into [`HierarchyEngine`], and provides the PostgreSQL
//! store, per-tenant DDL, configuration and tracing setup a host needs.
//!
//! ```ignore
//! let pool = DbConfig::from_env().create_pool()?;
//! let store = Arc::new(PgHierarchyStore::new(pool));
//! let cache = CacheBackendConfig::from_env().build()?;
//! let engine = HierarchyEngine::new(store, cache, EngineConfig::from_env());
//!
//! let ctx = TenantContext::parse(tenant_id, "tenant_acme")?;
//! let tree = engine.get_tree(user_id, &ctx).await?;
//! ```

pub mod config;
pub mod engine;
pub mod pg;
pub mod schema;
pub mod telemetry;

pub use config::{
    CacheBackendConfig, CacheBackendKind, DbConfig, EngineConfig, DEFAULT_MAX_PAGE_SIZE,
};
pub use engine::HierarchyEngine;
pub use pg::PgHierarchyStore;
pub use schema::tenant_schema_ddl;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError, DEFAULT_LOG_FILTER};

// Path arithmetic entry points used by mutation flows.
pub use canopy_core::{compute_hierarchy_fields, validate_depth_constraint, MAX_DEPTH};
