//! Query-layer abstraction over the tenant-scoped relational store.
//!
//! Every method takes the caller's [`TenantContext`]; implementations must
//! filter on `tenant_id` and resolve tables inside `schema`. Pagination
//! clamping, the empty-ancestor short circuit and caching live in the engine,
//! not here.

use async_trait::async_trait;
use canopy_core::{
    AggregatedCounts, CanopyResult, TenantContext, UserId, VisibleWorkspaceRow, Workspace,
    WorkspaceId, WorkspacePath,
};

/// Async query operations backing the hierarchy engine.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// All nodes whose path starts with `root + "/"`, ordered by `(depth, name)`.
    async fn descendants(
        &self,
        ctx: &TenantContext,
        root: &WorkspacePath,
    ) -> CanopyResult<Vec<Workspace>>;

    /// Nodes with `parent_id = parent`, ordered by name. `limit` is already clamped.
    async fn direct_children(
        &self,
        ctx: &TenantContext,
        parent: WorkspaceId,
        limit: i64,
        offset: i64,
    ) -> CanopyResult<Vec<Workspace>>;

    /// The given ids, ordered by depth. Unknown or foreign ids are skipped.
    async fn workspaces_by_ids(
        &self,
        ctx: &TenantContext,
        ids: &[WorkspaceId],
    ) -> CanopyResult<Vec<Workspace>>;

    /// One workspace by id.
    async fn workspace(
        &self,
        ctx: &TenantContext,
        id: WorkspaceId,
    ) -> CanopyResult<Option<Workspace>>;

    /// `COUNT(*) > 0` over `parent_id = id`.
    async fn has_children(&self, ctx: &TenantContext, id: WorkspaceId) -> CanopyResult<bool>;

    /// Whether `user` holds ADMIN on any of `ids`. Never called with an empty slice.
    async fn has_admin_role(
        &self,
        ctx: &TenantContext,
        user: UserId,
        ids: &[WorkspaceId],
    ) -> CanopyResult<bool>;

    /// Member and descendant totals for the subtree rooted at `path`, in one pass.
    async fn aggregated_counts(
        &self,
        ctx: &TenantContext,
        path: &WorkspacePath,
    ) -> CanopyResult<AggregatedCounts>;

    /// Flat visibility set for `user`: member nodes plus their ancestors,
    /// ordered by `(depth, name)`.
    async fn visible_rows(
        &self,
        ctx: &TenantContext,
        user: UserId,
    ) -> CanopyResult<Vec<VisibleWorkspaceRow>>;
}
