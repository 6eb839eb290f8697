//! Property-Based Tests for Tenant Isolation
//!
//! For any two tenants sharing a store and a cache backend, every engine read
//! SHALL return only the caller's rows, and every invalidation SHALL only
//! touch the caller's cache entries. A tenant id is served from one schema
//! per engine; a second schema never reads the first schema's cache entries.

use std::sync::Arc;

use canopy_engine::HierarchyEngine;
use canopy_storage::{HierarchyCacheKey, InMemoryKvCache};
use canopy_test_utils::assertions::{assert_single_tenant, assert_tree_counts_consistent};
use canopy_test_utils::fixtures::ForestBuilder;
use canopy_test_utils::generators::{
    arb_forest_shape, arb_member_role, arb_schema_name, arb_tenant_id, arb_user_id,
};
use canopy_test_utils::{
    CanopyError, CanopyResult, InMemoryHierarchyStore, MemberRole, TenantContext, TenantId,
    UserId, ValidationError, Workspace,
};
use proptest::prelude::*;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

type Engine = HierarchyEngine<InMemoryHierarchyStore, InMemoryKvCache>;

/// Two tenants populated from their own shapes in one shared store.
struct SharedWorld {
    engine: Engine,
    cache: Arc<InMemoryKvCache>,
    a: ForestBuilder,
    b: ForestBuilder,
    a_nodes: Vec<Workspace>,
    b_nodes: Vec<Workspace>,
}

fn shared_world(
    ctx_a: TenantContext,
    ctx_b: TenantContext,
    shape_a: &[Option<usize>],
    shape_b: &[Option<usize>],
) -> Result<SharedWorld, TestCaseError> {
    let store = Arc::new(InMemoryHierarchyStore::new());
    let cache = Arc::new(InMemoryKvCache::new());
    let a = ForestBuilder::new(store.clone(), ctx_a);
    let b = ForestBuilder::new(store.clone(), ctx_b);
    let a_nodes = a
        .from_shape(shape_a)
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    let b_nodes = b
        .from_shape(shape_b)
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    Ok(SharedWorld {
        engine: HierarchyEngine::with_defaults(store, cache.clone()),
        cache,
        a,
        b,
        a_nodes,
        b_nodes,
    })
}

fn fail(e: impl std::fmt::Display) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Descendant and count queries never return another tenant's rows, even
    /// when the caller names a path that belongs to the other tenant.
    #[test]
    fn prop_reads_stay_inside_tenant(
        tenant_a in arb_tenant_id(),
        tenant_b in arb_tenant_id(),
        schema in arb_schema_name(),
        shape_a in arb_forest_shape(12),
        shape_b in arb_forest_shape(12),
    ) {
        prop_assume!(tenant_a != tenant_b);
        let rt = test_runtime()?;
        rt.block_on(async {
            let world = shared_world(
                TenantContext::new(tenant_a, schema.clone()),
                TenantContext::new(tenant_b, schema.clone()),
                &shape_a,
                &shape_b,
            )?;
            let ctx_a = world.a.ctx();

            for ws in &world.a_nodes {
                let rows = world.engine.get_descendants(&ws.path, ctx_a).await.map_err(fail)?;
                assert_single_tenant(&rows, tenant_a);
            }

            for foreign in &world.b_nodes {
                let rows = world
                    .engine
                    .get_descendants(&foreign.path, ctx_a)
                    .await
                    .map_err(fail)?;
                prop_assert!(rows.is_empty());

                let counts = world
                    .engine
                    .get_aggregated_counts(&foreign.path, ctx_a)
                    .await
                    .map_err(fail)?;
                prop_assert_eq!(counts.child_count, 0);
                prop_assert_eq!(counts.member_count, 0);

                let children = world
                    .engine
                    .get_direct_children(foreign.id, ctx_a, 100, 0)
                    .await
                    .map_err(fail)?;
                prop_assert!(children.is_empty());
                prop_assert!(!world.engine.has_children(foreign.id, ctx_a).await.map_err(fail)?);
            }
            Ok(())
        })?;
    }

    /// A user who is a member in both tenants sees only the caller tenant's
    /// nodes in their tree.
    #[test]
    fn prop_tree_stays_inside_tenant(
        tenant_a in arb_tenant_id(),
        tenant_b in arb_tenant_id(),
        schema in arb_schema_name(),
        shape_a in arb_forest_shape(10),
        shape_b in arb_forest_shape(10),
    ) {
        prop_assume!(tenant_a != tenant_b);
        let rt = test_runtime()?;
        rt.block_on(async {
            let world = shared_world(
                TenantContext::new(tenant_a, schema.clone()),
                TenantContext::new(tenant_b, schema.clone()),
                &shape_a,
                &shape_b,
            )?;
            let user = UserId::now_v7();
            for ws in &world.a_nodes {
                world.a.member(user, ws, MemberRole::Member).map_err(fail)?;
            }
            for ws in &world.b_nodes {
                world.b.member(user, ws, MemberRole::Admin).map_err(fail)?;
            }

            let tree = world.engine.get_tree(user, world.a.ctx()).await.map_err(fail)?;
            let size: usize = tree.iter().map(|root| root.subtree_size()).sum();
            prop_assert_eq!(size, world.a_nodes.len());
            for ws in &world.b_nodes {
                prop_assert!(canopy_core::find_in_forest(&tree, ws.id).is_none());
            }
            assert_tree_counts_consistent(&tree);

            // Admin in tenant B grants nothing in tenant A.
            for ws in &world.a_nodes {
                let admin = world
                    .engine
                    .is_ancestor_admin(user, &ws.path, world.a.ctx())
                    .await
                    .map_err(fail)?;
                prop_assert!(!admin);
            }
            Ok(())
        })?;
    }

    /// Invalidating a path in one tenant leaves the other tenant's entries for
    /// the identical path in place.
    #[test]
    fn prop_invalidation_stays_inside_tenant(
        tenant_a in arb_tenant_id(),
        tenant_b in arb_tenant_id(),
        schema in arb_schema_name(),
        shape in arb_forest_shape(8),
    ) {
        prop_assume!(tenant_a != tenant_b);
        let rt = test_runtime()?;
        rt.block_on(async {
            let world = shared_world(
                TenantContext::new(tenant_a, schema.clone()),
                TenantContext::new(tenant_b, schema.clone()),
                &shape,
                &[],
            )?;
            let path = &world.a_nodes[0].path;

            world.engine.get_descendants(path, world.a.ctx()).await.map_err(fail)?;
            world.engine.get_descendants(path, world.b.ctx()).await.map_err(fail)?;

            let key_a = HierarchyCacheKey::descendants(tenant_a, path).render();
            let key_b = HierarchyCacheKey::descendants(tenant_b, path).render();
            prop_assert_ne!(&key_a, &key_b);
            prop_assert!(world.cache.contains(&key_a).await);
            prop_assert!(world.cache.contains(&key_b).await);

            world.engine.invalidate_hierarchy_cache(path, tenant_a).await;

            prop_assert!(!world.cache.contains(&key_a).await);
            prop_assert!(world.cache.contains(&key_b).await);
            Ok(())
        })?;
    }

    /// One tenant id is served from one schema. Once cached reads have run
    /// through the first schema, every read through a second schema is
    /// rejected instead of being answered from the shared cache.
    #[test]
    fn prop_second_schema_never_sees_cached_rows(
        tenant in arb_tenant_id(),
        schema_a in arb_schema_name(),
        schema_b in arb_schema_name(),
        shape in arb_forest_shape(10),
        user in arb_user_id(),
        role in arb_member_role(),
    ) {
        prop_assume!(schema_a != schema_b);
        let rt = test_runtime()?;
        rt.block_on(async {
            let world = shared_world(
                TenantContext::new(tenant, schema_a),
                TenantContext::new(tenant, schema_b),
                &shape,
                &[],
            )?;
            for ws in &world.a_nodes {
                world.a.member(user, ws, role).map_err(fail)?;
            }

            let (ctx_a, ctx_b) = (world.a.ctx(), world.b.ctx());
            for ws in &world.a_nodes {
                world.engine.get_descendants(&ws.path, ctx_a).await.map_err(fail)?;
                world.engine.get_aggregated_counts(&ws.path, ctx_a).await.map_err(fail)?;
            }
            let tree = world.engine.get_tree(user, ctx_a).await.map_err(fail)?;
            prop_assert!(!tree.is_empty());

            for ws in &world.a_nodes {
                let descendants = world.engine.get_descendants(&ws.path, ctx_b).await;
                prop_assert!(is_schema_mismatch(&descendants), "{:?}", descendants);
                let counts = world.engine.get_aggregated_counts(&ws.path, ctx_b).await;
                prop_assert!(is_schema_mismatch(&counts), "{:?}", counts);
                let children = world.engine.get_direct_children(ws.id, ctx_b, 100, 0).await;
                prop_assert!(is_schema_mismatch(&children), "{:?}", children);
            }
            let tree_b = world.engine.get_tree(user, ctx_b).await;
            prop_assert!(is_schema_mismatch(&tree_b), "{:?}", tree_b);
            Ok(())
        })?;
    }

    /// Through its own schema a tenant sees only that schema's rows, even
    /// when its first schema holds rows at the same paths.
    #[test]
    fn prop_schemas_are_disjoint(
        tenant in arb_tenant_id(),
        schema_a in arb_schema_name(),
        schema_b in arb_schema_name(),
        shape in arb_forest_shape(10),
    ) {
        prop_assume!(schema_a != schema_b);
        let rt = test_runtime()?;
        rt.block_on(async {
            let world = shared_world(
                TenantContext::new(tenant, schema_a),
                TenantContext::new(tenant, schema_b),
                &shape,
                &[],
            )?;

            // A separate engine serves schema B with its own cache.
            let engine_b = HierarchyEngine::with_defaults(
                world.a.store().clone(),
                Arc::new(InMemoryKvCache::new()),
            );
            for ws in &world.a_nodes {
                let rows = engine_b
                    .get_descendants(&ws.path, world.b.ctx())
                    .await
                    .map_err(fail)?;
                prop_assert!(rows.is_empty());
                let counts = engine_b
                    .get_aggregated_counts(&ws.path, world.b.ctx())
                    .await
                    .map_err(fail)?;
                prop_assert_eq!(counts.child_count, 0);
                prop_assert_eq!(counts.member_count, 0);
            }
            Ok(())
        })?;
    }
}

fn is_schema_mismatch<T>(result: &CanopyResult<T>) -> bool {
    matches!(
        result,
        Err(CanopyError::Validation(ValidationError::SchemaMismatch { .. }))
    )
}

#[test]
fn test_cross_tenant_reparent_is_rejected() -> Result<(), TestCaseError> {
    let rt = test_runtime()?;
    rt.block_on(async {
        let schema = canopy_test_utils::SchemaName::parse("tenant_shared").map_err(fail)?;
        let ctx_a = TenantContext::new(TenantId::now_v7(), schema.clone());
        let ctx_b = TenantContext::new(TenantId::now_v7(), schema);
        let world = shared_world(ctx_a, ctx_b, &[None], &[None])?;

        let result = world
            .engine
            .prepare_reparent(world.a_nodes[0].id, Some(world.b_nodes[0].id), world.a.ctx())
            .await;
        assert!(result.is_err(), "foreign parent must not resolve");
        Ok::<_, TestCaseError>(())
    })
}
