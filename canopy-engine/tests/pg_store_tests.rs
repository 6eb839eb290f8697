#![cfg(feature = "db-tests")]
//! PostgreSQL store against a live database.
//!
//! Connection settings come from `CANOPY_DB_*`. Every test creates its own
//! schema so runs never observe each other's rows.

use std::sync::Arc;

use canopy_core::{
    AggregatedCounts, MemberRole, SchemaName, TenantContext, TenantId, UserId, Workspace,
    WorkspaceId, WorkspaceMembership,
};
use canopy_engine::{compute_hierarchy_fields, DbConfig, HierarchyEngine, PgHierarchyStore};
use canopy_storage::{HierarchyStore, InMemoryKvCache};
use uuid::Uuid;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

async fn test_store() -> (PgHierarchyStore, TenantContext) {
    let pool = DbConfig::from_env()
        .with_max_size(4)
        .create_pool()
        .expect("Failed to create pool");
    let store = PgHierarchyStore::new(pool);
    let schema = SchemaName::parse(&format!("canopy_test_{}", Uuid::now_v7().simple()))
        .expect("generated schema name is valid");
    store
        .ensure_schema(&schema)
        .await
        .expect("Failed to create tenant schema");
    (store, TenantContext::new(TenantId::now_v7(), schema))
}

async fn add(
    store: &PgHierarchyStore,
    ctx: &TenantContext,
    parent: Option<&Workspace>,
    name: &str,
) -> Workspace {
    let id = WorkspaceId::now_v7();
    let fields = compute_hierarchy_fields(parent, id).expect("depth within limit");
    let ws = Workspace::new(id, ctx.tenant_id, parent.map(|p| p.id), fields, name);
    store
        .insert_workspace(ctx, &ws)
        .await
        .expect("Failed to insert workspace");
    ws
}

async fn join(
    store: &PgHierarchyStore,
    ctx: &TenantContext,
    user: UserId,
    ws: &Workspace,
    role: MemberRole,
) {
    store
        .upsert_membership(
            ctx,
            &WorkspaceMembership {
                user_id: user,
                workspace_id: ws.id,
                tenant_id: ctx.tenant_id,
                role,
            },
        )
        .await
        .expect("Failed to upsert membership");
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_ensure_schema_is_idempotent() {
    let (store, ctx) = test_store().await;
    store
        .ensure_schema(&ctx.schema)
        .await
        .expect("second ensure_schema succeeds");
}

#[tokio::test]
async fn test_descendants_and_counts() {
    let (store, ctx) = test_store().await;
    let root = add(&store, &ctx, None, "Root").await;
    let b = add(&store, &ctx, Some(&root), "b").await;
    let a = add(&store, &ctx, Some(&root), "a").await;
    let leaf = add(&store, &ctx, Some(&a), "leaf").await;
    join(&store, &ctx, UserId::now_v7(), &root, MemberRole::Admin).await;
    join(&store, &ctx, UserId::now_v7(), &b, MemberRole::Member).await;
    join(&store, &ctx, UserId::now_v7(), &leaf, MemberRole::Viewer).await;

    let rows = store.descendants(&ctx, &root.path).await.expect("descendants");
    let names: Vec<_> = rows.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "leaf"]);

    let counts = store
        .aggregated_counts(&ctx, &root.path)
        .await
        .expect("counts");
    assert_eq!(
        counts,
        AggregatedCounts {
            member_count: 3,
            child_count: 3,
        }
    );

    let page = store
        .direct_children(&ctx, root.id, 1, 1)
        .await
        .expect("children");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, b.id);
}

#[tokio::test]
async fn test_visible_rows_and_admin_check() {
    let (store, ctx) = test_store().await;
    let root = add(&store, &ctx, None, "Root").await;
    let child = add(&store, &ctx, Some(&root), "Child").await;
    let grandchild = add(&store, &ctx, Some(&child), "Grandchild").await;
    add(&store, &ctx, Some(&root), "Sibling").await;
    let user = UserId::now_v7();
    join(&store, &ctx, user, &child, MemberRole::Admin).await;

    let rows = store.visible_rows(&ctx, user).await.expect("rows");
    let ids: Vec<_> = rows.iter().map(|r| r.workspace.id).collect();
    assert_eq!(ids, vec![root.id, child.id]);
    assert_eq!(rows[0].member_role, None);
    assert_eq!(rows[1].member_role, Some(MemberRole::Admin));
    assert_eq!(rows[1].direct_member_count, 1);

    assert!(store
        .has_admin_role(&ctx, user, grandchild.path.ancestor_ids())
        .await
        .expect("admin check"));
    assert!(!store
        .has_admin_role(&ctx, user, child.path.ancestor_ids())
        .await
        .expect("admin check"));
}

#[tokio::test]
async fn test_reparent_transaction_and_engine_invalidation() {
    let (store, ctx) = test_store().await;
    let root = add(&store, &ctx, None, "Root").await;
    let child = add(&store, &ctx, Some(&root), "Child").await;
    add(&store, &ctx, Some(&child), "Grandchild").await;
    let other = add(&store, &ctx, None, "Other").await;

    let store = Arc::new(store);
    let engine = HierarchyEngine::with_defaults(store.clone(), Arc::new(InMemoryKvCache::new()));
    assert_eq!(
        engine
            .get_descendants(&root.path, &ctx)
            .await
            .expect("warm")
            .len(),
        2
    );

    let rewrites = engine
        .prepare_reparent(child.id, Some(other.id), &ctx)
        .await
        .expect("plan");
    store.apply_rewrites(&ctx, &rewrites).await.expect("apply");
    engine
        .after_reparent(&rewrites[0].old_path, &rewrites[0].path, &ctx)
        .await;

    assert!(engine
        .get_descendants(&root.path, &ctx)
        .await
        .expect("descendants")
        .is_empty());
    assert_eq!(
        engine
            .get_descendants(&other.path, &ctx)
            .await
            .expect("descendants")
            .len(),
        2
    );

    // A stale plan no longer matches the stored paths and rolls back.
    let stale = store.apply_rewrites(&ctx, &rewrites).await;
    assert!(stale.is_err());
}

#[tokio::test]
async fn test_delete_subtree_cascades_memberships() {
    let (store, ctx) = test_store().await;
    let root = add(&store, &ctx, None, "Root").await;
    let child = add(&store, &ctx, Some(&root), "Child").await;
    let grandchild = add(&store, &ctx, Some(&child), "Grandchild").await;
    join(&store, &ctx, UserId::now_v7(), &grandchild, MemberRole::Member).await;

    let deleted = store
        .delete_subtree(&ctx, &child.path)
        .await
        .expect("delete");
    assert_eq!(deleted, 2);

    let counts = store
        .aggregated_counts(&ctx, &root.path)
        .await
        .expect("counts");
    assert_eq!(counts, AggregatedCounts::default());
    assert!(!store.has_children(&ctx, root.id).await.expect("check"));
}

#[tokio::test]
async fn test_other_tenant_in_same_schema_is_invisible() {
    let (store, ctx) = test_store().await;
    let other_ctx = TenantContext::new(TenantId::now_v7(), ctx.schema.clone());
    let root = add(&store, &ctx, None, "Root").await;
    add(&store, &ctx, Some(&root), "Child").await;

    assert!(store
        .descendants(&other_ctx, &root.path)
        .await
        .expect("descendants")
        .is_empty());
    assert!(store
        .workspace(&other_ctx, root.id)
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn test_engine_tree_over_postgres() {
    let (store, ctx) = test_store().await;
    let root = add(&store, &ctx, None, "Root").await;
    let child = add(&store, &ctx, Some(&root), "Child").await;
    let grandchild = add(&store, &ctx, Some(&child), "Grandchild").await;
    let user = UserId::now_v7();
    join(&store, &ctx, user, &root, MemberRole::Admin).await;
    join(&store, &ctx, user, &child, MemberRole::Member).await;
    join(&store, &ctx, user, &grandchild, MemberRole::Viewer).await;

    let engine = HierarchyEngine::with_defaults(Arc::new(store), Arc::new(InMemoryKvCache::new()));
    let tree = engine.get_tree(user, &ctx).await.expect("tree");

    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].count.children, 1);
    assert_eq!(tree[0].count.members, 1);
    assert_eq!(tree[0].children[0].count.children, 1);
    assert_eq!(tree[0].children[0].children[0].count.children, 0);
    assert_eq!(tree[0].children[0].children[0].id(), grandchild.id);
}
