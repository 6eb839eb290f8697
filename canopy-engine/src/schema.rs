//! Per-tenant DDL.
//!
//! Each tenant gets its own schema holding `workspaces` and
//! `workspace_memberships`. The `text_pattern_ops` index on `path` is what
//! makes `path LIKE $prefix || '%'` an index range scan under any collation.

use canopy_core::{SchemaName, MAX_DEPTH};

/// Statements that create the tenant's tables and indexes. Idempotent.
pub fn tenant_schema_ddl(schema: &SchemaName) -> Vec<String> {
    let s = schema.quoted();
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {s}"),
        format!(
            "CREATE TABLE IF NOT EXISTS {s}.workspaces (
                id          UUID PRIMARY KEY,
                tenant_id   UUID NOT NULL,
                parent_id   UUID REFERENCES {s}.workspaces(id) ON DELETE CASCADE,
                depth       INTEGER NOT NULL CHECK (depth >= 0 AND depth <= {MAX_DEPTH}),
                path        TEXT NOT NULL,
                slug        TEXT NOT NULL,
                name        TEXT NOT NULL,
                description TEXT,
                settings    JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (tenant_id, path)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {s}.workspace_memberships (
                user_id      UUID NOT NULL,
                workspace_id UUID NOT NULL REFERENCES {s}.workspaces(id) ON DELETE CASCADE,
                tenant_id    UUID NOT NULL,
                role         TEXT NOT NULL CHECK (role IN ('ADMIN', 'MEMBER', 'VIEWER')),
                PRIMARY KEY (user_id, workspace_id)
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS workspaces_path_prefix_idx
                ON {s}.workspaces (tenant_id, path text_pattern_ops)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS workspaces_parent_idx
                ON {s}.workspaces (tenant_id, parent_id, name)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS workspace_memberships_workspace_idx
                ON {s}.workspace_memberships (tenant_id, workspace_id)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS workspace_memberships_user_idx
                ON {s}.workspace_memberships (tenant_id, user_id)"
        ),
    ]
}
