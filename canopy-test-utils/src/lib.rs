//! CANOPY Test Utilities
//!
//! Centralized test infrastructure for the CANOPY workspace:
//! - Proptest generators for ids, paths, schema names and forest shapes
//! - A forest fixture over the in-memory store
//! - Cache and store doubles that record or fail calls
//! - Custom assertions for hierarchy-specific validation

// Re-export the in-memory implementations from their source crate
pub use canopy_storage::{InMemoryHierarchyStore, InMemoryKvCache};

// Re-export core types for convenience
pub use canopy_core::{
    AggregatedCounts, CacheError, CanopyError, CanopyResult, HierarchyError, MemberRole,
    SchemaName, TenantContext, TenantId, TreeNode, UserId, ValidationError, VisibleWorkspaceRow,
    Workspace, WorkspaceId, WorkspaceMembership, WorkspacePath, MAX_DEPTH,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use canopy_storage::{HierarchyStore, KeyValueCache};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for hierarchy types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        arb_uuid().prop_map(TenantId::new)
    }

    pub fn arb_workspace_id() -> impl Strategy<Value = WorkspaceId> {
        arb_uuid().prop_map(WorkspaceId::new)
    }

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        arb_uuid().prop_map(UserId::new)
    }

    /// A valid path of 1..=MAX_DEPTH+1 segments.
    pub fn arb_path() -> impl Strategy<Value = WorkspacePath> {
        prop::collection::vec(arb_workspace_id(), 1..=(MAX_DEPTH as usize + 1)).prop_filter_map(
            "path must be valid",
            |ids| WorkspacePath::from_ids(ids).ok(),
        )
    }

    /// A schema name that passes the allow-list.
    pub fn arb_schema_name() -> impl Strategy<Value = SchemaName> {
        "[a-z0-9_]{1,63}".prop_filter_map("schema must parse", |s| SchemaName::parse(&s).ok())
    }

    /// A string the schema allow-list must reject.
    pub fn arb_invalid_schema_name() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-z0-9_]{64,80}",
            "[a-z0-9_]{0,10}[A-Z;\"' .\\-][a-z0-9_]{0,10}",
            Just("tenant\"; DROP SCHEMA public; --".to_string()),
        ]
    }

    pub fn arb_member_role() -> impl Strategy<Value = MemberRole> {
        prop_oneof![
            Just(MemberRole::Admin),
            Just(MemberRole::Member),
            Just(MemberRole::Viewer),
        ]
    }

    /// Forest shape as parent indices: entry `i` is `None` (root) or the
    /// index of an earlier node. Depth never exceeds `MAX_DEPTH`.
    pub fn arb_forest_shape(max_nodes: usize) -> impl Strategy<Value = Vec<Option<usize>>> {
        prop::collection::vec(any::<prop::sample::Index>(), 1..=max_nodes.max(1)).prop_map(
            |picks| {
                let mut parents: Vec<Option<usize>> = Vec::with_capacity(picks.len());
                let mut depths: Vec<i32> = Vec::with_capacity(picks.len());
                for (i, pick) in picks.into_iter().enumerate() {
                    // Slot `i` means "new root"; others pick an earlier node
                    // that still has room below it.
                    let choice = pick.index(i + 1);
                    let parent = (choice < i && depths[choice] < MAX_DEPTH).then_some(choice);
                    depths.push(parent.map_or(0, |p| depths[p] + 1));
                    parents.push(parent);
                }
                parents
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built forests in the in-memory store.

    use super::*;
    use canopy_core::compute_hierarchy_fields;

    /// Tenant context with a fresh tenant id.
    pub fn tenant_context(schema: &str) -> CanopyResult<TenantContext> {
        Ok(TenantContext::parse(TenantId::now_v7(), schema)?)
    }

    /// Builds workspaces and memberships for one tenant.
    #[derive(Debug, Clone)]
    pub struct ForestBuilder {
        store: Arc<InMemoryHierarchyStore>,
        ctx: TenantContext,
    }

    impl ForestBuilder {
        pub fn new(store: Arc<InMemoryHierarchyStore>, ctx: TenantContext) -> Self {
            Self { store, ctx }
        }

        pub fn ctx(&self) -> &TenantContext {
            &self.ctx
        }

        pub fn store(&self) -> &Arc<InMemoryHierarchyStore> {
            &self.store
        }

        pub fn root(&self, name: &str) -> CanopyResult<Workspace> {
            self.insert(None, name)
        }

        pub fn child(&self, parent: &Workspace, name: &str) -> CanopyResult<Workspace> {
            self.insert(Some(parent), name)
        }

        pub fn member(&self, user: UserId, ws: &Workspace, role: MemberRole) -> CanopyResult<()> {
            self.store.insert_membership(
                &self.ctx.schema,
                WorkspaceMembership {
                    user_id: user,
                    workspace_id: ws.id,
                    tenant_id: self.ctx.tenant_id,
                    role,
                },
            )
        }

        /// Materialise a shape from [`generators::arb_forest_shape`].
        pub fn from_shape(&self, shape: &[Option<usize>]) -> CanopyResult<Vec<Workspace>> {
            let mut nodes: Vec<Workspace> = Vec::with_capacity(shape.len());
            for (i, parent) in shape.iter().enumerate() {
                let parent = parent.and_then(|p| nodes.get(p)).cloned();
                let ws = self.insert(parent.as_ref(), &format!("node-{i:03}"))?;
                nodes.push(ws);
            }
            Ok(nodes)
        }

        fn insert(&self, parent: Option<&Workspace>, name: &str) -> CanopyResult<Workspace> {
            let id = WorkspaceId::now_v7();
            let fields = compute_hierarchy_fields(parent, id)?;
            let ws = Workspace::new(id, self.ctx.tenant_id, parent.map(|p| p.id), fields, name);
            self.store.insert_workspace(&self.ctx.schema, ws.clone())?;
            Ok(ws)
        }
    }

    /// Root -> child -> grandchild chain.
    pub struct Chain {
        pub root: Workspace,
        pub child: Workspace,
        pub grandchild: Workspace,
    }

    pub fn chain(forest: &ForestBuilder) -> CanopyResult<Chain> {
        let root = forest.root("Root")?;
        let child = forest.child(&root, "Child")?;
        let grandchild = forest.child(&child, "Grandchild")?;
        Ok(Chain {
            root,
            child,
            grandchild,
        })
    }
}

// ============================================================================
// DOUBLES
// ============================================================================

pub mod doubles {
    //! Cache and store wrappers for asserting call patterns.

    use super::*;

    /// Wraps an [`InMemoryKvCache`] and records every `del` batch.
    #[derive(Debug, Default)]
    pub struct RecordingCache {
        inner: InMemoryKvCache,
        del_batches: Mutex<Vec<Vec<String>>>,
        gets: AtomicUsize,
        sets: AtomicUsize,
    }

    impl RecordingCache {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every `del` call so far, in order.
        pub fn del_batches(&self) -> Vec<Vec<String>> {
            self.del_batches
                .lock()
                .map(|b| b.clone())
                .unwrap_or_default()
        }

        pub fn get_calls(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        pub fn set_calls(&self) -> usize {
            self.sets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeyValueCache for RecordingCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value, ttl).await
        }

        async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
            if let Ok(mut b) = self.del_batches.lock() {
                b.push(keys.to_vec());
            }
            self.inner.del(keys).await
        }
    }

    /// A cache whose every call fails.
    #[derive(Debug, Default)]
    pub struct FailingCache {
        calls: AtomicUsize,
    }

    impl FailingCache {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail<T>(&self) -> Result<T, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
    }

    #[async_trait]
    impl KeyValueCache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            self.fail()
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            self.fail()
        }

        async fn del(&self, _keys: &[String]) -> Result<u64, CacheError> {
            self.fail()
        }
    }

    /// Per-method call counters for [`CountingStore`].
    #[derive(Debug, Default)]
    pub struct StoreCalls {
        pub descendants: AtomicUsize,
        pub direct_children: AtomicUsize,
        pub workspaces_by_ids: AtomicUsize,
        pub workspace: AtomicUsize,
        pub has_children: AtomicUsize,
        pub has_admin_role: AtomicUsize,
        pub aggregated_counts: AtomicUsize,
        pub visible_rows: AtomicUsize,
    }

    impl StoreCalls {
        pub fn total(&self) -> usize {
            [
                &self.descendants,
                &self.direct_children,
                &self.workspaces_by_ids,
                &self.workspace,
                &self.has_children,
                &self.has_admin_role,
                &self.aggregated_counts,
                &self.visible_rows,
            ]
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
        }
    }

    /// Delegating [`HierarchyStore`] that counts calls per method.
    pub struct CountingStore<S: HierarchyStore> {
        inner: S,
        calls: StoreCalls,
    }

    impl<S: HierarchyStore> CountingStore<S> {
        pub fn new(inner: S) -> Self {
            Self {
                inner,
                calls: StoreCalls::default(),
            }
        }

        pub fn calls(&self) -> &StoreCalls {
            &self.calls
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[async_trait]
    impl<S: HierarchyStore> HierarchyStore for CountingStore<S> {
        async fn descendants(
            &self,
            ctx: &TenantContext,
            root: &WorkspacePath,
        ) -> CanopyResult<Vec<Workspace>> {
            bump(&self.calls.descendants);
            self.inner.descendants(ctx, root).await
        }

        async fn direct_children(
            &self,
            ctx: &TenantContext,
            parent: WorkspaceId,
            limit: i64,
            offset: i64,
        ) -> CanopyResult<Vec<Workspace>> {
            bump(&self.calls.direct_children);
            self.inner.direct_children(ctx, parent, limit, offset).await
        }

        async fn workspaces_by_ids(
            &self,
            ctx: &TenantContext,
            ids: &[WorkspaceId],
        ) -> CanopyResult<Vec<Workspace>> {
            bump(&self.calls.workspaces_by_ids);
            self.inner.workspaces_by_ids(ctx, ids).await
        }

        async fn workspace(
            &self,
            ctx: &TenantContext,
            id: WorkspaceId,
        ) -> CanopyResult<Option<Workspace>> {
            bump(&self.calls.workspace);
            self.inner.workspace(ctx, id).await
        }

        async fn has_children(&self, ctx: &TenantContext, id: WorkspaceId) -> CanopyResult<bool> {
            bump(&self.calls.has_children);
            self.inner.has_children(ctx, id).await
        }

        async fn has_admin_role(
            &self,
            ctx: &TenantContext,
            user: UserId,
            ids: &[WorkspaceId],
        ) -> CanopyResult<bool> {
            bump(&self.calls.has_admin_role);
            self.inner.has_admin_role(ctx, user, ids).await
        }

        async fn aggregated_counts(
            &self,
            ctx: &TenantContext,
            path: &WorkspacePath,
        ) -> CanopyResult<AggregatedCounts> {
            bump(&self.calls.aggregated_counts);
            self.inner.aggregated_counts(ctx, path).await
        }

        async fn visible_rows(
            &self,
            ctx: &TenantContext,
            user: UserId,
        ) -> CanopyResult<Vec<VisibleWorkspaceRow>> {
            bump(&self.calls.visible_rows);
            self.inner.visible_rows(ctx, user).await
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for hierarchy validation.

    use super::*;
    use canopy_core::check_path_invariants;

    /// Assert that a CanopyResult is a DepthExceeded error.
    #[track_caller]
    pub fn assert_depth_exceeded<T: std::fmt::Debug>(result: &CanopyResult<T>) {
        match result {
            Err(e) if e.is_depth_exceeded() => {}
            other => panic!("Expected DepthExceeded, got: {:?}", other),
        }
    }

    /// Assert path/depth/parent consistency on every row.
    #[track_caller]
    pub fn assert_path_invariants(rows: &[Workspace]) {
        for ws in rows {
            if let Err(e) = check_path_invariants(ws) {
                panic!("path invariant violated: {e}");
            }
        }
    }

    /// Assert every row belongs to `tenant_id`.
    #[track_caller]
    pub fn assert_single_tenant(rows: &[Workspace], tenant_id: TenantId) {
        for ws in rows {
            assert_eq!(
                ws.tenant_id, tenant_id,
                "workspace {} leaked from tenant {}",
                ws.id, ws.tenant_id
            );
        }
    }

    /// Assert `_count.children` equals the number of attached children at
    /// every node.
    #[track_caller]
    pub fn assert_tree_counts_consistent(forest: &[TreeNode]) {
        for node in forest {
            assert_eq!(
                node.count.children,
                node.children.len(),
                "child count mismatch at {}",
                node.id()
            );
            assert_tree_counts_consistent(&node.children);
        }
    }
}
