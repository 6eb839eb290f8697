//! CANOPY Core - Workspace Hierarchy Types
//!
//! Pure data structures and pure functions shared by every other crate:
//! identity newtypes, the workspace/membership model, validated materialised
//! paths, tenant scoping guards, path arithmetic and tree reconstruction.
//! Nothing in here performs I/O.

pub mod entities;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod path;
pub mod tenant;
pub mod tree;

pub use entities::{
    AggregatedCounts, MemberRole, VisibleWorkspaceRow, Workspace, WorkspaceMembership,
};
pub use error::{
    CacheError, CanopyError, CanopyResult, HierarchyError, StorageError, ValidationError,
};
pub use hierarchy::{
    check_path_invariants, compute_hierarchy_fields, plan_reparent, validate_depth_constraint,
    HierarchyFields, PathRewrite, MAX_DEPTH,
};
pub use identity::{new_entity_id, TenantId, UserId, WorkspaceId};
pub use path::{depth_of, WorkspacePath, PATH_SEPARATOR};
pub use tenant::{SchemaName, TenantContext};
pub use tree::{build_tree, find_in_forest, TreeNode, TreeNodeCount};
