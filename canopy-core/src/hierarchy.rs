//! Path arithmetic for the workspace hierarchy.
//!
//! Pure functions only: no I/O. The store-aware wrappers that load the
//! persisted parent live in `canopy-engine`.

use serde::{Deserialize, Serialize};

use crate::entities::Workspace;
use crate::error::{CanopyResult, HierarchyError};
use crate::identity::WorkspaceId;
use crate::path::WorkspacePath;

/// Deepest allowed depth. Three levels: root (0), child (1), grandchild (2).
pub const MAX_DEPTH: i32 = 2;

/// `(depth, path)` for a node about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyFields {
    pub depth: i32,
    pub path: WorkspacePath,
}

impl HierarchyFields {
    pub fn root(id: WorkspaceId) -> Self {
        Self {
            depth: 0,
            path: WorkspacePath::root(id),
        }
    }
}

/// Compute `(depth, path)` for a new node under `parent` (or a new root).
///
/// Callers run [`validate_depth_constraint`] on the parent's persisted depth
/// first. A parent already at [`MAX_DEPTH`] cannot produce a valid path, so
/// that case reports `DepthExceeded` here as well.
pub fn compute_hierarchy_fields(
    parent: Option<&Workspace>,
    new_id: WorkspaceId,
) -> Result<HierarchyFields, HierarchyError> {
    match parent {
        None => Ok(HierarchyFields::root(new_id)),
        Some(parent) => {
            validate_depth_constraint(parent.depth)?;
            let path = parent
                .path
                .child(new_id)
                .map_err(|_| HierarchyError::DepthExceeded {
                    parent_depth: parent.depth,
                    max_depth: MAX_DEPTH,
                })?;
            Ok(HierarchyFields {
                depth: parent.depth + 1,
                path,
            })
        }
    }
}

/// Reject a child whose depth would be `parent_depth + 1 > MAX_DEPTH`.
pub fn validate_depth_constraint(parent_depth: i32) -> Result<(), HierarchyError> {
    if parent_depth >= MAX_DEPTH {
        return Err(HierarchyError::DepthExceeded {
            parent_depth,
            max_depth: MAX_DEPTH,
        });
    }
    Ok(())
}

/// Check invariants 1-3 on a persisted row.
pub fn check_path_invariants(ws: &Workspace) -> Result<(), HierarchyError> {
    let violated = |reason: String| HierarchyError::InvariantViolated {
        workspace_id: ws.id,
        reason,
    };

    if ws.depth != ws.path.depth() {
        return Err(violated(format!(
            "depth {} does not match path depth {}",
            ws.depth,
            ws.path.depth()
        )));
    }
    if ws.path.self_id() != ws.id {
        return Err(violated("last path segment is not the workspace id".into()));
    }
    let path_parent = ws.path.ancestor_ids().last().copied();
    if path_parent != ws.parent_id {
        return Err(violated(format!(
            "parent id {:?} does not match path parent {:?}",
            ws.parent_id, path_parent
        )));
    }
    if ws.depth > MAX_DEPTH {
        return Err(violated(format!("depth {} exceeds {}", ws.depth, MAX_DEPTH)));
    }
    Ok(())
}

/// New hierarchy fields for one node touched by a reparent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRewrite {
    pub workspace_id: WorkspaceId,
    pub parent_id: Option<WorkspaceId>,
    pub old_path: WorkspacePath,
    pub depth: i32,
    pub path: WorkspacePath,
}

/// Plan the path/depth rewrite for moving `node` (with all of `descendants`)
/// under `new_parent`, or to the top level when `new_parent` is `None`.
///
/// The returned rewrites start with `node` itself. Callers persist them in one
/// transaction, then invalidate caches for the old and the new path.
pub fn plan_reparent(
    node: &Workspace,
    descendants: &[Workspace],
    new_parent: Option<&Workspace>,
) -> CanopyResult<Vec<PathRewrite>> {
    let reject = |reason: &str| HierarchyError::InvalidReparent {
        workspace_id: node.id,
        reason: reason.to_string(),
    };

    if let Some(parent) = new_parent {
        if parent.tenant_id != node.tenant_id {
            return Err(reject("new parent belongs to another tenant").into());
        }
        if node.path.contains(&parent.path) {
            return Err(reject("new parent lies inside the moved subtree").into());
        }
    }

    let mut relative_depth = 0;
    for d in descendants {
        if !node.path.is_ancestor_of(&d.path) {
            return Err(reject("descendant list contains a node outside the subtree").into());
        }
        relative_depth = relative_depth.max(d.depth - node.depth);
    }

    let new_path = match new_parent {
        None => WorkspacePath::root(node.id),
        Some(parent) => {
            // Deepest moved node lands at parent.depth + 1 + relative_depth.
            validate_depth_constraint(parent.depth + relative_depth)?;
            parent
                .path
                .child(node.id)
                .map_err(|_| HierarchyError::DepthExceeded {
                    parent_depth: parent.depth,
                    max_depth: MAX_DEPTH,
                })?
        }
    };

    let mut rewrites = Vec::with_capacity(descendants.len() + 1);
    rewrites.push(PathRewrite {
        workspace_id: node.id,
        parent_id: new_parent.map(|p| p.id),
        old_path: node.path.clone(),
        depth: new_path.depth(),
        path: new_path.clone(),
    });

    for d in descendants {
        let path = d
            .path
            .rebase(&node.path, &new_path)?
            .ok_or_else(|| reject("descendant list contains a node outside the subtree"))?;
        rewrites.push(PathRewrite {
            workspace_id: d.id,
            parent_id: d.parent_id,
            old_path: d.path.clone(),
            depth: path.depth(),
            path,
        });
    }

    Ok(rewrites)
}
