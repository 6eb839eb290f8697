//! Workspace hierarchy entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::hierarchy::HierarchyFields;
use crate::identity::{TenantId, UserId, WorkspaceId};
use crate::path::WorkspacePath;

/// A node in one tenant's forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub tenant_id: TenantId,
    /// `None` for roots.
    pub parent_id: Option<WorkspaceId>,
    /// Cached derivative of `path`; always `count('/', path)`.
    pub depth: i32,
    pub path: WorkspacePath,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Assemble a workspace from freshly computed hierarchy fields.
    pub fn new(
        id: WorkspaceId,
        tenant_id: TenantId,
        parent_id: Option<WorkspaceId>,
        fields: HierarchyFields,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id,
            tenant_id,
            parent_id,
            depth: fields.depth,
            path: fields.path,
            slug: slugify(&name),
            name,
            description: None,
            settings: serde_json::Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Role a user holds on one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Admin,
    Member,
    Viewer,
}

impl MemberRole {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "ADMIN",
            MemberRole::Member => "MEMBER",
            MemberRole::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for MemberRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(MemberRole::Admin),
            "MEMBER" => Ok(MemberRole::Member),
            "VIEWER" => Ok(MemberRole::Viewer),
            other => Err(ValidationError::InvalidRole {
                role: other.to_string(),
            }),
        }
    }
}

/// `(user, workspace, tenant, role)`. Owned by the membership service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMembership {
    pub user_id: UserId,
    pub workspace_id: WorkspaceId,
    pub tenant_id: TenantId,
    pub role: MemberRole,
}

/// Authoritative subtree totals, unscoped by visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCounts {
    /// Membership rows on the node and all of its descendants.
    pub member_count: i64,
    /// Descendant nodes, excluding the queried node itself.
    pub child_count: i64,
}

/// One row of the flat visibility set feeding tree reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleWorkspaceRow {
    pub workspace: Workspace,
    /// `None` for ancestor context nodes the user is not a member of.
    pub member_role: Option<MemberRole>,
    pub direct_member_count: i64,
}
