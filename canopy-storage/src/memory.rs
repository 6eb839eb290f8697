//! In-memory [`HierarchyStore`] for tests and embedded use.
//!
//! Rows are kept per schema, and every query additionally filters on the
//! caller's tenant id, mirroring the two isolation layers of the PostgreSQL
//! store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use canopy_core::{
    AggregatedCounts, CanopyResult, MemberRole, PathRewrite, SchemaName, StorageError, TenantContext,
    TenantId, UserId, VisibleWorkspaceRow, Workspace, WorkspaceId, WorkspaceMembership,
    WorkspacePath,
};

use crate::store::HierarchyStore;

#[derive(Debug, Default, Clone)]
struct Namespace {
    workspaces: Vec<Workspace>,
    memberships: Vec<WorkspaceMembership>,
}

/// In-memory hierarchy store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryHierarchyStore {
    namespaces: Arc<RwLock<HashMap<SchemaName, Namespace>>>,
}

impl InMemoryHierarchyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, schema: &SchemaName, f: impl FnOnce(&Namespace) -> T) -> CanopyResult<T> {
        let guard = self
            .namespaces
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let empty = Namespace::default();
        Ok(f(guard.get(schema).unwrap_or(&empty)))
    }

    fn write<T>(
        &self,
        schema: &SchemaName,
        f: impl FnOnce(&mut Namespace) -> T,
    ) -> CanopyResult<T> {
        let mut guard = self
            .namespaces
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(f(guard.entry(schema.clone()).or_default()))
    }

    // ========================================================================
    // MUTATIONS (test and embedding support)
    // ========================================================================

    /// Insert or replace a workspace row in `schema`.
    pub fn insert_workspace(&self, schema: &SchemaName, ws: Workspace) -> CanopyResult<()> {
        self.write(schema, |ns| {
            ns.workspaces
                .retain(|w| !(w.id == ws.id && w.tenant_id == ws.tenant_id));
            ns.workspaces.push(ws);
        })
    }

    /// Insert or replace a membership row in `schema`.
    pub fn insert_membership(
        &self,
        schema: &SchemaName,
        membership: WorkspaceMembership,
    ) -> CanopyResult<()> {
        self.write(schema, |ns| {
            ns.memberships.retain(|m| {
                !(m.user_id == membership.user_id
                    && m.workspace_id == membership.workspace_id
                    && m.tenant_id == membership.tenant_id)
            });
            ns.memberships.push(membership);
        })
    }

    /// Remove one membership. Returns whether a row was removed.
    pub fn remove_membership(
        &self,
        ctx: &TenantContext,
        user: UserId,
        workspace: WorkspaceId,
    ) -> CanopyResult<bool> {
        self.write(&ctx.schema, |ns| {
            let before = ns.memberships.len();
            ns.memberships.retain(|m| {
                !(m.tenant_id == ctx.tenant_id && m.user_id == user && m.workspace_id == workspace)
            });
            before != ns.memberships.len()
        })
    }

    /// Delete a workspace, its descendants and their memberships.
    /// Returns the number of workspace rows removed.
    pub fn remove_subtree(&self, ctx: &TenantContext, root: &WorkspacePath) -> CanopyResult<usize> {
        self.write(&ctx.schema, |ns| {
            let doomed: Vec<WorkspaceId> = ns
                .workspaces
                .iter()
                .filter(|w| w.tenant_id == ctx.tenant_id && root.contains(&w.path))
                .map(|w| w.id)
                .collect();
            ns.workspaces
                .retain(|w| !(w.tenant_id == ctx.tenant_id && doomed.contains(&w.id)));
            ns.memberships
                .retain(|m| !(m.tenant_id == ctx.tenant_id && doomed.contains(&m.workspace_id)));
            doomed.len()
        })
    }

    /// Apply a reparent plan.
    pub fn apply_rewrites(&self, ctx: &TenantContext, rewrites: &[PathRewrite]) -> CanopyResult<()> {
        self.write(&ctx.schema, |ns| {
            for rewrite in rewrites {
                if let Some(ws) = ns
                    .workspaces
                    .iter_mut()
                    .find(|w| w.tenant_id == ctx.tenant_id && w.id == rewrite.workspace_id)
                {
                    ws.parent_id = rewrite.parent_id;
                    ws.depth = rewrite.depth;
                    ws.path = rewrite.path.clone();
                    ws.updated_at = chrono::Utc::now();
                }
            }
        })
    }
}

fn tenant_rows(ns: &Namespace, tenant: TenantId) -> impl Iterator<Item = &Workspace> {
    ns.workspaces.iter().filter(move |w| w.tenant_id == tenant)
}

fn sort_by_depth_then_name(rows: &mut [Workspace]) {
    rows.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.name.cmp(&b.name)));
}

#[async_trait]
impl HierarchyStore for InMemoryHierarchyStore {
    async fn descendants(
        &self,
        ctx: &TenantContext,
        root: &WorkspacePath,
    ) -> CanopyResult<Vec<Workspace>> {
        let prefix = root.descendant_prefix();
        let mut rows = self.read(&ctx.schema, |ns| {
            tenant_rows(ns, ctx.tenant_id)
                .filter(|w| w.path.as_str().starts_with(&prefix))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        sort_by_depth_then_name(&mut rows);
        Ok(rows)
    }

    async fn direct_children(
        &self,
        ctx: &TenantContext,
        parent: WorkspaceId,
        limit: i64,
        offset: i64,
    ) -> CanopyResult<Vec<Workspace>> {
        let mut rows = self.read(&ctx.schema, |ns| {
            tenant_rows(ns, ctx.tenant_id)
                .filter(|w| w.parent_id == Some(parent))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn workspaces_by_ids(
        &self,
        ctx: &TenantContext,
        ids: &[WorkspaceId],
    ) -> CanopyResult<Vec<Workspace>> {
        let mut rows = self.read(&ctx.schema, |ns| {
            tenant_rows(ns, ctx.tenant_id)
                .filter(|w| ids.contains(&w.id))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        rows.sort_by_key(|w| w.depth);
        Ok(rows)
    }

    async fn workspace(
        &self,
        ctx: &TenantContext,
        id: WorkspaceId,
    ) -> CanopyResult<Option<Workspace>> {
        self.read(&ctx.schema, |ns| {
            tenant_rows(ns, ctx.tenant_id).find(|w| w.id == id).cloned()
        })
    }

    async fn has_children(&self, ctx: &TenantContext, id: WorkspaceId) -> CanopyResult<bool> {
        self.read(&ctx.schema, |ns| {
            tenant_rows(ns, ctx.tenant_id).any(|w| w.parent_id == Some(id))
        })
    }

    async fn has_admin_role(
        &self,
        ctx: &TenantContext,
        user: UserId,
        ids: &[WorkspaceId],
    ) -> CanopyResult<bool> {
        self.read(&ctx.schema, |ns| {
            ns.memberships.iter().any(|m| {
                m.tenant_id == ctx.tenant_id
                    && m.user_id == user
                    && m.role == MemberRole::Admin
                    && ids.contains(&m.workspace_id)
            })
        })
    }

    async fn aggregated_counts(
        &self,
        ctx: &TenantContext,
        path: &WorkspacePath,
    ) -> CanopyResult<AggregatedCounts> {
        let self_id = path.self_id();
        self.read(&ctx.schema, |ns| {
            let subtree: Vec<WorkspaceId> = tenant_rows(ns, ctx.tenant_id)
                .filter(|w| path.contains(&w.path))
                .map(|w| w.id)
                .collect();
            let member_count = ns
                .memberships
                .iter()
                .filter(|m| m.tenant_id == ctx.tenant_id && subtree.contains(&m.workspace_id))
                .count() as i64;
            let child_count = subtree.iter().filter(|id| **id != self_id).count() as i64;
            AggregatedCounts {
                member_count,
                child_count,
            }
        })
    }

    async fn visible_rows(
        &self,
        ctx: &TenantContext,
        user: UserId,
    ) -> CanopyResult<Vec<VisibleWorkspaceRow>> {
        let mut rows = self.read(&ctx.schema, |ns| {
            let roles: HashMap<WorkspaceId, MemberRole> = ns
                .memberships
                .iter()
                .filter(|m| m.tenant_id == ctx.tenant_id && m.user_id == user)
                .map(|m| (m.workspace_id, m.role))
                .collect();

            let mut member_counts: HashMap<WorkspaceId, i64> = HashMap::new();
            for m in ns.memberships.iter().filter(|m| m.tenant_id == ctx.tenant_id) {
                *member_counts.entry(m.workspace_id).or_default() += 1;
            }

            let member_paths: Vec<&WorkspacePath> = tenant_rows(ns, ctx.tenant_id)
                .filter(|w| roles.contains_key(&w.id))
                .map(|w| &w.path)
                .collect();

            tenant_rows(ns, ctx.tenant_id)
                .filter(|w| {
                    roles.contains_key(&w.id)
                        || member_paths.iter().any(|p| w.path.is_ancestor_of(p))
                })
                .map(|w| VisibleWorkspaceRow {
                    workspace: w.clone(),
                    member_role: roles.get(&w.id).copied(),
                    direct_member_count: member_counts.get(&w.id).copied().unwrap_or(0),
                })
                .collect::<Vec<_>>()
        })?;
        rows.sort_by(|a, b| {
            a.workspace
                .depth
                .cmp(&b.workspace.depth)
                .then_with(|| a.workspace.name.cmp(&b.workspace.name))
        });
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::compute_hierarchy_fields;

    fn ctx(schema: &str) -> TenantContext {
        TenantContext::parse(TenantId::now_v7(), schema).expect("valid schema")
    }

    fn add(
        store: &InMemoryHierarchyStore,
        ctx: &TenantContext,
        parent: Option<&Workspace>,
        name: &str,
    ) -> Workspace {
        let id = WorkspaceId::now_v7();
        let fields = compute_hierarchy_fields(parent, id).expect("within depth");
        let ws = Workspace::new(id, ctx.tenant_id, parent.map(|p| p.id), fields, name);
        store
            .insert_workspace(&ctx.schema, ws.clone())
            .expect("insert");
        ws
    }

    fn member(
        store: &InMemoryHierarchyStore,
        ctx: &TenantContext,
        user: UserId,
        ws: &Workspace,
        role: MemberRole,
    ) {
        store
            .insert_membership(
                &ctx.schema,
                WorkspaceMembership {
                    user_id: user,
                    workspace_id: ws.id,
                    tenant_id: ctx.tenant_id,
                    role,
                },
            )
            .expect("insert membership");
    }

    #[tokio::test]
    async fn test_descendants_ordered_by_depth_then_name() {
        let store = InMemoryHierarchyStore::new();
        let ctx = ctx("tenant_a");
        let root = add(&store, &ctx, None, "root");
        let zeta = add(&store, &ctx, Some(&root), "zeta");
        let alpha = add(&store, &ctx, Some(&root), "alpha");
        let deep = add(&store, &ctx, Some(&zeta), "deep");
        let _other_root = add(&store, &ctx, None, "other");

        let rows = store.descendants(&ctx, &root.path).await.expect("query");
        let ids: Vec<_> = rows.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![alpha.id, zeta.id, deep.id]);
    }

    #[tokio::test]
    async fn test_direct_children_paginates_by_name() {
        let store = InMemoryHierarchyStore::new();
        let ctx = ctx("tenant_a");
        let root = add(&store, &ctx, None, "root");
        for name in ["c", "a", "b"] {
            add(&store, &ctx, Some(&root), name);
        }

        let page = store
            .direct_children(&ctx, root.id, 2, 1)
            .await
            .expect("query");
        let names: Vec<_> = page.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[tokio::test]
    async fn test_tenant_filter_within_shared_schema() {
        let store = InMemoryHierarchyStore::new();
        let a = ctx("shared");
        let b = TenantContext::new(TenantId::now_v7(), a.schema.clone());
        let root_a = add(&store, &a, None, "root-a");

        assert!(store.workspace(&b, root_a.id).await.expect("query").is_none());
        assert!(store
            .workspaces_by_ids(&b, &[root_a.id])
            .await
            .expect("query")
            .is_empty());
    }

    #[tokio::test]
    async fn test_schema_filter_for_same_tenant() {
        let store = InMemoryHierarchyStore::new();
        let a = ctx("schema_one");
        let same_tenant_other_schema =
            TenantContext::parse(a.tenant_id, "schema_two").expect("valid");
        let root = add(&store, &a, None, "root");

        assert!(store
            .workspace(&same_tenant_other_schema, root.id)
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn test_aggregated_counts_exclude_self() {
        let store = InMemoryHierarchyStore::new();
        let ctx = ctx("tenant_a");
        let user = UserId::now_v7();
        let root = add(&store, &ctx, None, "root");
        let child = add(&store, &ctx, Some(&root), "child");
        member(&store, &ctx, user, &root, MemberRole::Admin);
        member(&store, &ctx, user, &child, MemberRole::Member);

        let at_root = store.aggregated_counts(&ctx, &root.path).await.expect("query");
        assert_eq!(at_root.child_count, 1);
        assert_eq!(at_root.member_count, 2);

        let at_child = store.aggregated_counts(&ctx, &child.path).await.expect("query");
        assert_eq!(at_child.child_count, 0);
        assert_eq!(at_child.member_count, 1);
    }

    #[tokio::test]
    async fn test_visible_rows_include_ancestors_without_role() {
        let store = InMemoryHierarchyStore::new();
        let ctx = ctx("tenant_a");
        let user = UserId::now_v7();
        let root = add(&store, &ctx, None, "root");
        let child = add(&store, &ctx, Some(&root), "child");
        let grandchild = add(&store, &ctx, Some(&child), "grandchild");
        let _sibling = add(&store, &ctx, Some(&root), "sibling");
        member(&store, &ctx, user, &grandchild, MemberRole::Viewer);
        member(&store, &ctx, UserId::now_v7(), &root, MemberRole::Admin);

        let rows = store.visible_rows(&ctx, user).await.expect("query");
        let summary: Vec<_> = rows
            .iter()
            .map(|r| (r.workspace.id, r.member_role, r.direct_member_count))
            .collect();
        assert_eq!(
            summary,
            vec![
                (root.id, None, 1),
                (child.id, None, 0),
                (grandchild.id, Some(MemberRole::Viewer), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_subtree_drops_memberships() {
        let store = InMemoryHierarchyStore::new();
        let ctx = ctx("tenant_a");
        let user = UserId::now_v7();
        let root = add(&store, &ctx, None, "root");
        let child = add(&store, &ctx, Some(&root), "child");
        member(&store, &ctx, user, &child, MemberRole::Member);

        assert_eq!(store.remove_subtree(&ctx, &child.path).expect("remove"), 1);
        assert!(!store.has_children(&ctx, root.id).await.expect("query"));
        assert!(store.visible_rows(&ctx, user).await.expect("query").is_empty());
    }
}
