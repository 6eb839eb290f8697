//! The hierarchy engine.
//!
//! Facade over a [`HierarchyStore`] and a [`HierarchyCache`]. The only state
//! it keeps is which schema each tenant id is served from.
//!
//! Reads of descendants, aggregated counts and trees go through the cache;
//! pagination, ancestor lookups and child checks always hit the store.
//! Mutation flows call the `after_*` hooks once their store write has
//! committed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use canopy_core::{
    build_tree, compute_hierarchy_fields, plan_reparent, validate_depth_constraint,
    AggregatedCounts, CanopyResult, HierarchyError, HierarchyFields, PathRewrite, SchemaName,
    StorageError, TenantContext, TenantId, TreeNode, UserId, ValidationError, Workspace,
    WorkspaceId, WorkspacePath,
};
use canopy_storage::{
    CacheConfig, HierarchyCache, HierarchyCacheKey, HierarchyStore, KeyValueCache,
};

use crate::config::{EngineConfig, DEFAULT_MAX_PAGE_SIZE};

/// Cached, tenant-scoped hierarchy queries.
pub struct HierarchyEngine<S, C>
where
    S: HierarchyStore + ?Sized,
    C: KeyValueCache + ?Sized,
{
    store: Arc<S>,
    cache: HierarchyCache<C>,
    config: EngineConfig,
    bindings: SchemaBindings,
}

/// The schema each tenant id was first seen with.
///
/// Cache keys name only the tenant, so a tenant id is served from exactly one
/// schema per engine. A context pairing it with any other schema is rejected
/// before the cache or the store is consulted.
#[derive(Debug, Default)]
struct SchemaBindings {
    bound: RwLock<HashMap<TenantId, SchemaName>>,
}

impl SchemaBindings {
    fn check(&self, ctx: &TenantContext) -> CanopyResult<()> {
        {
            let bound = self.bound.read().map_err(|_| StorageError::LockPoisoned)?;
            if let Some(schema) = bound.get(&ctx.tenant_id) {
                return same_schema(ctx, schema);
            }
        }
        let mut bound = self.bound.write().map_err(|_| StorageError::LockPoisoned)?;
        let schema = bound
            .entry(ctx.tenant_id)
            .or_insert_with(|| ctx.schema.clone());
        same_schema(ctx, schema)
    }
}

fn same_schema(ctx: &TenantContext, bound: &SchemaName) -> CanopyResult<()> {
    if *bound == ctx.schema {
        return Ok(());
    }
    tracing::warn!(
        tenant_id = %ctx.tenant_id,
        bound = bound.as_str(),
        requested = ctx.schema.as_str(),
        "tenant addressed through a second schema"
    );
    Err(ValidationError::SchemaMismatch {
        tenant_id: ctx.tenant_id,
        bound: bound.as_str().to_string(),
        requested: ctx.schema.as_str().to_string(),
    }
    .into())
}

impl<S, C> HierarchyEngine<S, C>
where
    S: HierarchyStore + ?Sized,
    C: KeyValueCache + ?Sized,
{
    pub fn new(store: Arc<S>, cache_backend: Arc<C>, config: EngineConfig) -> Self {
        let cache = HierarchyCache::new(
            cache_backend,
            CacheConfig::new().with_ttl(config.cache_ttl),
        );
        Self {
            store,
            cache,
            config,
            bindings: SchemaBindings::default(),
        }
    }

    pub fn with_defaults(store: Arc<S>, cache_backend: Arc<C>) -> Self {
        Self::new(store, cache_backend, EngineConfig::default())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &HierarchyCache<C> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Every node strictly below `path`, ordered by `(depth, name)`. Cached.
    pub async fn get_descendants(
        &self,
        path: &WorkspacePath,
        ctx: &TenantContext,
    ) -> CanopyResult<Vec<Workspace>> {
        self.bindings.check(ctx)?;
        let key = HierarchyCacheKey::descendants(ctx.tenant_id, path);
        let store = &self.store;
        self.cache
            .read_through(&key, move || async move { store.descendants(ctx, path).await })
            .await
    }

    /// One page of `parent_id`'s children ordered by name.
    ///
    /// `limit` is clamped to `[1, max_page_size]` and `offset` to `>= 0`.
    /// `max_page_size` itself never exceeds [`DEFAULT_MAX_PAGE_SIZE`].
    pub async fn get_direct_children(
        &self,
        parent_id: WorkspaceId,
        ctx: &TenantContext,
        limit: i64,
        offset: i64,
    ) -> CanopyResult<Vec<Workspace>> {
        self.bindings.check(ctx)?;
        let ceiling = self.config.max_page_size.clamp(1, DEFAULT_MAX_PAGE_SIZE);
        let limit = limit.clamp(1, ceiling);
        let offset = offset.max(0);
        self.store
            .direct_children(ctx, parent_id, limit, offset)
            .await
    }

    /// The part of the tenant's forest visible to `user_id`. Cached per user.
    pub async fn get_tree(
        &self,
        user_id: UserId,
        ctx: &TenantContext,
    ) -> CanopyResult<Vec<TreeNode>> {
        self.bindings.check(ctx)?;
        let key = HierarchyCacheKey::tree(ctx.tenant_id, user_id);
        let store = &self.store;
        self.cache
            .read_through(&key, move || async move {
                let rows = store.visible_rows(ctx, user_id).await?;
                tracing::debug!(
                    tenant_id = %ctx.tenant_id,
                    user_id = %user_id,
                    rows = rows.len(),
                    "building visible tree"
                );
                Ok(build_tree(rows))
            })
            .await
    }

    /// Member and descendant totals for the subtree at `path`. Cached.
    ///
    /// `child_count` excludes the node named by the last path segment.
    pub async fn get_aggregated_counts(
        &self,
        path: &WorkspacePath,
        ctx: &TenantContext,
    ) -> CanopyResult<AggregatedCounts> {
        self.bindings.check(ctx)?;
        let key = HierarchyCacheKey::agg_counts(ctx.tenant_id, path);
        let store = &self.store;
        self.cache
            .read_through(&key, move || async move {
                store.aggregated_counts(ctx, path).await
            })
            .await
    }

    /// Whether `user_id` is ADMIN on any proper ancestor of `path`.
    ///
    /// Roots have no ancestors and answer `false` without a store call.
    pub async fn is_ancestor_admin(
        &self,
        user_id: UserId,
        path: &WorkspacePath,
        ctx: &TenantContext,
    ) -> CanopyResult<bool> {
        self.bindings.check(ctx)?;
        let ancestors = path.ancestor_ids();
        if ancestors.is_empty() {
            return Ok(false);
        }
        self.store.has_admin_role(ctx, user_id, ancestors).await
    }

    /// Ancestors of `path`, root first. At most `MAX_DEPTH` id lookups.
    pub async fn get_ancestor_chain(
        &self,
        path: &WorkspacePath,
        ctx: &TenantContext,
    ) -> CanopyResult<Vec<Workspace>> {
        self.bindings.check(ctx)?;
        let ancestors = path.ancestor_ids();
        if ancestors.is_empty() {
            return Ok(Vec::new());
        }
        self.store.workspaces_by_ids(ctx, ancestors).await
    }

    pub async fn has_children(&self, id: WorkspaceId, ctx: &TenantContext) -> CanopyResult<bool> {
        self.bindings.check(ctx)?;
        self.store.has_children(ctx, id).await
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Drop cached descendants and counts for `path` and all its ancestors.
    /// Never fails; cache errors are logged.
    pub async fn invalidate_hierarchy_cache(&self, path: &WorkspacePath, tenant_id: TenantId) {
        self.cache.invalidate_hierarchy(tenant_id, path).await;
    }

    /// Drop the cached tree of `user_id`. `None` is a no-op.
    pub async fn invalidate_tree_cache(&self, user_id: Option<UserId>, tenant_id: TenantId) {
        self.cache.invalidate_tree(tenant_id, user_id).await;
    }

    // ========================================================================
    // MUTATION HOOKS
    // ========================================================================

    /// Hierarchy fields for a node about to be created under `parent_id`.
    ///
    /// The depth check runs against the parent's persisted depth.
    pub async fn prepare_child(
        &self,
        parent_id: Option<WorkspaceId>,
        new_id: WorkspaceId,
        ctx: &TenantContext,
    ) -> CanopyResult<HierarchyFields> {
        self.bindings.check(ctx)?;
        let Some(parent_id) = parent_id else {
            return Ok(compute_hierarchy_fields(None, new_id)?);
        };
        let parent = self.load(parent_id, ctx).await?;
        validate_depth_constraint(parent.depth)?;
        Ok(compute_hierarchy_fields(Some(&parent), new_id)?)
    }

    /// Path rewrites that move `node_id` under `new_parent_id` (or to the top
    /// level). Reads the subtree straight from the store.
    pub async fn prepare_reparent(
        &self,
        node_id: WorkspaceId,
        new_parent_id: Option<WorkspaceId>,
        ctx: &TenantContext,
    ) -> CanopyResult<Vec<PathRewrite>> {
        self.bindings.check(ctx)?;
        let node = self.load(node_id, ctx).await?;
        let descendants = self.store.descendants(ctx, &node.path).await?;
        let new_parent = match new_parent_id {
            Some(id) => Some(self.load(id, ctx).await?),
            None => None,
        };
        plan_reparent(&node, &descendants, new_parent.as_ref())
    }

    pub async fn after_create(&self, path: &WorkspacePath, ctx: &TenantContext) {
        self.invalidate_hierarchy_cache(path, ctx.tenant_id).await;
    }

    /// Invalidate both the old and the new location of a moved subtree.
    pub async fn after_reparent(
        &self,
        old_path: &WorkspacePath,
        new_path: &WorkspacePath,
        ctx: &TenantContext,
    ) {
        self.invalidate_hierarchy_cache(old_path, ctx.tenant_id).await;
        self.invalidate_hierarchy_cache(new_path, ctx.tenant_id).await;
    }

    pub async fn after_delete(&self, path: &WorkspacePath, ctx: &TenantContext) {
        self.invalidate_hierarchy_cache(path, ctx.tenant_id).await;
    }

    /// A membership on the node at `path` was added, changed or removed.
    pub async fn after_membership_change(
        &self,
        user_id: UserId,
        path: &WorkspacePath,
        ctx: &TenantContext,
    ) {
        self.invalidate_tree_cache(Some(user_id), ctx.tenant_id).await;
        self.invalidate_hierarchy_cache(path, ctx.tenant_id).await;
    }

    async fn load(&self, id: WorkspaceId, ctx: &TenantContext) -> CanopyResult<Workspace> {
        self.store
            .workspace(ctx, id)
            .await?
            .ok_or_else(|| HierarchyError::WorkspaceNotFound { workspace_id: id }.into())
    }
}
