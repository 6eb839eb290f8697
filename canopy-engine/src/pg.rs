//! PostgreSQL [`HierarchyStore`].
//!
//! Every statement filters on `tenant_id` and runs against tables inside the
//! caller's schema. The schema identifier is the only interpolated value and
//! comes from [`SchemaName::quoted`], which only exists for names that passed
//! the allow-list. Everything else is a bound parameter.
//!
//! Paths are built from hyphenated UUIDs and `/`, so they never contain the
//! `LIKE` metacharacters `%`, `_` or `\` and need no escaping.

use async_trait::async_trait;
use canopy_core::{
    AggregatedCounts, CanopyResult, MemberRole, PathRewrite, SchemaName, StorageError,
    TenantContext, UserId, VisibleWorkspaceRow, Workspace, WorkspaceId, WorkspaceMembership,
    WorkspacePath,
};
use canopy_storage::HierarchyStore;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::schema::tenant_schema_ddl;

const WORKSPACE_COLUMNS: &str = "w.id, w.tenant_id, w.parent_id, w.depth, w.path, w.slug, \
     w.name, w.description, w.settings, w.created_at, w.updated_at";

fn pool_err(e: deadpool_postgres::PoolError) -> StorageError {
    StorageError::Pool {
        reason: e.to_string(),
    }
}

fn query_err(e: tokio_postgres::Error) -> StorageError {
    StorageError::Query {
        reason: e.to_string(),
    }
}

fn decode_err(column: &str, reason: impl ToString) -> StorageError {
    StorageError::RowDecode {
        column: column.to_string(),
        reason: reason.to_string(),
    }
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a Row,
    column: &str,
) -> Result<T, StorageError> {
    row.try_get(column).map_err(|e| decode_err(column, e))
}

fn workspace_from_row(row: &Row) -> Result<Workspace, StorageError> {
    let raw_path: String = get(row, "path")?;
    let path = WorkspacePath::parse(&raw_path).map_err(|e| decode_err("path", e))?;
    Ok(Workspace {
        id: WorkspaceId::new(get::<Uuid>(row, "id")?),
        tenant_id: get::<Uuid>(row, "tenant_id")?.into(),
        parent_id: get::<Option<Uuid>>(row, "parent_id")?.map(WorkspaceId::new),
        depth: get(row, "depth")?,
        path,
        slug: get(row, "slug")?,
        name: get(row, "name")?,
        description: get(row, "description")?,
        settings: get(row, "settings")?,
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
        updated_at: get::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn uuids(ids: &[WorkspaceId]) -> Vec<Uuid> {
    ids.iter().map(WorkspaceId::as_uuid).collect()
}

/// PostgreSQL-backed hierarchy store over a shared deadpool pool.
#[derive(Clone)]
pub struct PgHierarchyStore {
    pool: Pool,
}

impl PgHierarchyStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<Object, StorageError> {
        self.pool.get().await.map_err(pool_err)
    }

    /// Create the tenant's schema, tables and indexes if missing.
    pub async fn ensure_schema(&self, schema: &SchemaName) -> CanopyResult<()> {
        let client = self.client().await?;
        for stmt in tenant_schema_ddl(schema) {
            client.batch_execute(&stmt).await.map_err(query_err)?;
        }
        tracing::info!(schema = %schema, "tenant schema ensured");
        Ok(())
    }

    /// Insert one workspace row.
    pub async fn insert_workspace(&self, ctx: &TenantContext, ws: &Workspace) -> CanopyResult<()> {
        let s = ctx.schema.quoted();
        let client = self.client().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO {s}.workspaces
                        (id, tenant_id, parent_id, depth, path, slug, name, description,
                         settings, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
                ),
                &[
                    &ws.id.as_uuid(),
                    &ctx.tenant_id.as_uuid(),
                    &ws.parent_id.map(|p| p.as_uuid()),
                    &ws.depth,
                    &ws.path.as_str(),
                    &ws.slug,
                    &ws.name,
                    &ws.description,
                    &ws.settings,
                    &ws.created_at,
                    &ws.updated_at,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Insert or update one membership row.
    pub async fn upsert_membership(
        &self,
        ctx: &TenantContext,
        membership: &WorkspaceMembership,
    ) -> CanopyResult<()> {
        let s = ctx.schema.quoted();
        let client = self.client().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO {s}.workspace_memberships (user_id, workspace_id, tenant_id, role)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (user_id, workspace_id) DO UPDATE SET role = EXCLUDED.role"
                ),
                &[
                    &membership.user_id.as_uuid(),
                    &membership.workspace_id.as_uuid(),
                    &ctx.tenant_id.as_uuid(),
                    &membership.role.as_db_str(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Persist a reparent plan in one transaction.
    pub async fn apply_rewrites(
        &self,
        ctx: &TenantContext,
        rewrites: &[PathRewrite],
    ) -> CanopyResult<()> {
        let s = ctx.schema.quoted();
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(query_err)?;
        let stmt = tx
            .prepare(&format!(
                "UPDATE {s}.workspaces
                 SET parent_id = $3, depth = $4, path = $5, updated_at = now()
                 WHERE tenant_id = $1 AND id = $2 AND path = $6"
            ))
            .await
            .map_err(query_err)?;

        for rw in rewrites {
            let updated = tx
                .execute(
                    &stmt,
                    &[
                        &ctx.tenant_id.as_uuid(),
                        &rw.workspace_id.as_uuid(),
                        &rw.parent_id.map(|p| p.as_uuid()),
                        &rw.depth,
                        &rw.path.as_str(),
                        &rw.old_path.as_str(),
                    ],
                )
                .await
                .map_err(query_err)?;
            if updated != 1 {
                // Dropping the transaction rolls it back.
                return Err(StorageError::Query {
                    reason: format!(
                        "workspace {} moved concurrently; reparent aborted",
                        rw.workspace_id
                    ),
                }
                .into());
            }
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    /// Delete a node and its whole subtree. Returns the number of rows removed.
    pub async fn delete_subtree(
        &self,
        ctx: &TenantContext,
        root: &WorkspacePath,
    ) -> CanopyResult<u64> {
        let s = ctx.schema.quoted();
        let client = self.client().await?;
        let deleted = client
            .execute(
                &format!(
                    "DELETE FROM {s}.workspaces
                     WHERE tenant_id = $1 AND (path = $2 OR path LIKE $3)"
                ),
                &[
                    &ctx.tenant_id.as_uuid(),
                    &root.as_str(),
                    &format!("{}%", root.descendant_prefix()),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(deleted)
    }

    async fn query_workspaces(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> CanopyResult<Vec<Workspace>> {
        let client = self.client().await?;
        let rows = client.query(sql, params).await.map_err(query_err)?;
        rows.iter()
            .map(|row| workspace_from_row(row).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl HierarchyStore for PgHierarchyStore {
    async fn descendants(
        &self,
        ctx: &TenantContext,
        root: &WorkspacePath,
    ) -> CanopyResult<Vec<Workspace>> {
        let s = ctx.schema.quoted();
        let pattern = format!("{}%", root.descendant_prefix());
        let rows = self
            .query_workspaces(
                &format!(
                    "SELECT {WORKSPACE_COLUMNS} FROM {s}.workspaces w
                     WHERE w.tenant_id = $1 AND w.path LIKE $2
                     ORDER BY w.depth, w.name"
                ),
                &[&ctx.tenant_id.as_uuid(), &pattern],
            )
            .await?;
        Ok(rows)
    }

    async fn direct_children(
        &self,
        ctx: &TenantContext,
        parent: WorkspaceId,
        limit: i64,
        offset: i64,
    ) -> CanopyResult<Vec<Workspace>> {
        let s = ctx.schema.quoted();
        let rows = self
            .query_workspaces(
                &format!(
                    "SELECT {WORKSPACE_COLUMNS} FROM {s}.workspaces w
                     WHERE w.tenant_id = $1 AND w.parent_id = $2
                     ORDER BY w.name
                     LIMIT $3 OFFSET $4"
                ),
                &[&ctx.tenant_id.as_uuid(), &parent.as_uuid(), &limit, &offset],
            )
            .await?;
        Ok(rows)
    }

    async fn workspaces_by_ids(
        &self,
        ctx: &TenantContext,
        ids: &[WorkspaceId],
    ) -> CanopyResult<Vec<Workspace>> {
        let s = ctx.schema.quoted();
        let rows = self
            .query_workspaces(
                &format!(
                    "SELECT {WORKSPACE_COLUMNS} FROM {s}.workspaces w
                     WHERE w.tenant_id = $1 AND w.id = ANY($2)
                     ORDER BY w.depth"
                ),
                &[&ctx.tenant_id.as_uuid(), &uuids(ids)],
            )
            .await?;
        Ok(rows)
    }

    async fn workspace(
        &self,
        ctx: &TenantContext,
        id: WorkspaceId,
    ) -> CanopyResult<Option<Workspace>> {
        let s = ctx.schema.quoted();
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {WORKSPACE_COLUMNS} FROM {s}.workspaces w
                     WHERE w.tenant_id = $1 AND w.id = $2"
                ),
                &[&ctx.tenant_id.as_uuid(), &id.as_uuid()],
            )
            .await
            .map_err(query_err)?;
        Ok(row.as_ref().map(workspace_from_row).transpose()?)
    }

    async fn has_children(&self, ctx: &TenantContext, id: WorkspaceId) -> CanopyResult<bool> {
        let s = ctx.schema.quoted();
        let client = self.client().await?;
        let row = client
            .query_one(
                &format!(
                    "SELECT COUNT(*) > 0 AS has_children FROM {s}.workspaces
                     WHERE tenant_id = $1 AND parent_id = $2"
                ),
                &[&ctx.tenant_id.as_uuid(), &id.as_uuid()],
            )
            .await
            .map_err(query_err)?;
        Ok(get(&row, "has_children")?)
    }

    async fn has_admin_role(
        &self,
        ctx: &TenantContext,
        user: UserId,
        ids: &[WorkspaceId],
    ) -> CanopyResult<bool> {
        let s = ctx.schema.quoted();
        let client = self.client().await?;
        let row = client
            .query_one(
                &format!(
                    "SELECT EXISTS (
                        SELECT 1 FROM {s}.workspace_memberships
                        WHERE tenant_id = $1 AND user_id = $2
                          AND role = $3 AND workspace_id = ANY($4)
                     ) AS is_admin"
                ),
                &[
                    &ctx.tenant_id.as_uuid(),
                    &user.as_uuid(),
                    &MemberRole::Admin.as_db_str(),
                    &uuids(ids),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(get(&row, "is_admin")?)
    }

    async fn aggregated_counts(
        &self,
        ctx: &TenantContext,
        path: &WorkspacePath,
    ) -> CanopyResult<AggregatedCounts> {
        let s = ctx.schema.quoted();
        let pattern = format!("{}%", path.descendant_prefix());
        let client = self.client().await?;
        // One pass over subtree x memberships. Child count excludes the
        // queried node itself, identified by the last path segment.
        let row = client
            .query_one(
                &format!(
                    "SELECT
                        COUNT(m.user_id) AS member_count,
                        COUNT(DISTINCT w.id) FILTER (WHERE w.id <> $4) AS child_count
                     FROM {s}.workspaces w
                     LEFT JOIN {s}.workspace_memberships m
                        ON m.workspace_id = w.id AND m.tenant_id = w.tenant_id
                     WHERE w.tenant_id = $1 AND (w.path = $2 OR w.path LIKE $3)"
                ),
                &[
                    &ctx.tenant_id.as_uuid(),
                    &path.as_str(),
                    &pattern,
                    &path.self_id().as_uuid(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(AggregatedCounts {
            member_count: get(&row, "member_count")?,
            child_count: get(&row, "child_count")?,
        })
    }

    async fn visible_rows(
        &self,
        ctx: &TenantContext,
        user: UserId,
    ) -> CanopyResult<Vec<VisibleWorkspaceRow>> {
        let s = ctx.schema.quoted();
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "WITH member_of AS (
                        SELECT workspace_id, role FROM {s}.workspace_memberships
                        WHERE tenant_id = $1 AND user_id = $2
                     ),
                     member_paths AS (
                        SELECT w.path FROM {s}.workspaces w
                        JOIN member_of mo ON mo.workspace_id = w.id
                        WHERE w.tenant_id = $1
                     ),
                     visible AS (
                        SELECT DISTINCT w.id FROM {s}.workspaces w
                        JOIN member_paths mp
                          ON mp.path = w.path OR mp.path LIKE w.path || '/%'
                        WHERE w.tenant_id = $1
                     ),
                     member_counts AS (
                        SELECT workspace_id, COUNT(*) AS direct_member_count
                        FROM {s}.workspace_memberships
                        WHERE tenant_id = $1 AND workspace_id IN (SELECT id FROM visible)
                        GROUP BY workspace_id
                     )
                     SELECT {WORKSPACE_COLUMNS},
                        mo.role AS member_role,
                        COALESCE(mc.direct_member_count, 0) AS direct_member_count
                     FROM {s}.workspaces w
                     JOIN visible v ON v.id = w.id
                     LEFT JOIN member_of mo ON mo.workspace_id = w.id
                     LEFT JOIN member_counts mc ON mc.workspace_id = w.id
                     WHERE w.tenant_id = $1
                     ORDER BY w.depth, w.name"
                ),
                &[&ctx.tenant_id.as_uuid(), &user.as_uuid()],
            )
            .await
            .map_err(query_err)?;

        let mut visible = Vec::with_capacity(rows.len());
        for row in &rows {
            let member_role = get::<Option<String>>(row, "member_role")?
                .map(|r| r.parse::<MemberRole>())
                .transpose()
                .map_err(|e| decode_err("member_role", e))?;
            visible.push(VisibleWorkspaceRow {
                workspace: workspace_from_row(row)?,
                member_role,
                direct_member_count: get(row, "direct_member_count")?,
            });
        }
        Ok(visible)
    }
}
