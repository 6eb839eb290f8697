//! Error types for CANOPY operations

use crate::identity::{TenantId, WorkspaceId};
use thiserror::Error;

/// Input validation errors raised before any query or cache key is built.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid schema name: {name:?}")]
    InvalidSchemaName { name: String },

    #[error("Invalid workspace path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid membership role: {role:?}")]
    InvalidRole { role: String },

    #[error("Tenant {tenant_id} is bound to schema {bound:?}, not {requested:?}")]
    SchemaMismatch {
        tenant_id: TenantId,
        bound: String,
        requested: String,
    },
}

/// Violations of the hierarchy invariants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("Depth exceeded: parent depth {parent_depth} leaves no room under max depth {max_depth}")]
    DepthExceeded { parent_depth: i32, max_depth: i32 },

    #[error("Invalid reparent of {workspace_id}: {reason}")]
    InvalidReparent {
        workspace_id: WorkspaceId,
        reason: String,
    },

    #[error("Workspace not found: {workspace_id}")]
    WorkspaceNotFound { workspace_id: WorkspaceId },

    #[error("Invariant violated for {workspace_id}: {reason}")]
    InvariantViolated {
        workspace_id: WorkspaceId,
        reason: String,
    },
}

/// Store-layer errors. Propagated unchanged to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection pool error: {reason}")]
    Pool { reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Failed to decode column {column}: {reason}")]
    RowDecode { column: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache-layer errors. The engine logs and swallows these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache serialization error: {reason}")]
    Serialization { reason: String },
}

/// Master error type for all CANOPY errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanopyError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl CanopyError {
    /// True for `DepthExceeded`, which callers report as a rejected operation.
    pub fn is_depth_exceeded(&self) -> bool {
        matches!(
            self,
            CanopyError::Hierarchy(HierarchyError::DepthExceeded { .. })
        )
    }
}

/// Result type alias for CANOPY operations.
pub type CanopyResult<T> = Result<T, CanopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_exceeded_display() {
        let err = HierarchyError::DepthExceeded {
            parent_depth: 2,
            max_depth: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("parent depth 2"));
        assert!(msg.contains("max depth 2"));
    }

    #[test]
    fn test_invalid_schema_name_display() {
        let err = ValidationError::InvalidSchemaName {
            name: "public; drop".to_string(),
        };
        assert!(err.to_string().contains("public; drop"));
    }

    #[test]
    fn test_schema_mismatch_display() {
        let err = ValidationError::SchemaMismatch {
            tenant_id: TenantId::now_v7(),
            bound: "tenant_a".to_string(),
            requested: "tenant_b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"tenant_a\""));
        assert!(msg.contains("\"tenant_b\""));
    }

    #[test]
    fn test_from_conversions() {
        let err: CanopyError = StorageError::LockPoisoned.into();
        assert!(matches!(err, CanopyError::Storage(StorageError::LockPoisoned)));

        let err: CanopyError = HierarchyError::DepthExceeded {
            parent_depth: 3,
            max_depth: 2,
        }
        .into();
        assert!(err.is_depth_exceeded());
    }

    #[test]
    fn test_cache_error_is_not_depth_exceeded() {
        let err: CanopyError = CacheError::Unavailable {
            reason: "connection refused".to_string(),
        }
        .into();
        assert!(!err.is_depth_exceeded());
    }
}
