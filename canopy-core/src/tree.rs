//! Visibility-scoped tree reconstruction.
//!
//! Turns the flat row set returned by the visibility query into a nested
//! forest. Nodes live in an arena indexed by id while linking, so no owning
//! parent/child pointers exist until the final materialisation step.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::{MemberRole, VisibleWorkspaceRow, Workspace};
use crate::identity::WorkspaceId;

/// Per-node counters. `children` only counts visible children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNodeCount {
    pub children: usize,
    pub members: i64,
}

/// One node of a user's visible forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub workspace: Workspace,
    /// `None` for ancestors included only as context.
    pub member_role: Option<MemberRole>,
    #[serde(rename = "_count")]
    pub count: TreeNodeCount,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn leaf(row: VisibleWorkspaceRow) -> Self {
        Self {
            workspace: row.workspace,
            member_role: row.member_role,
            count: TreeNodeCount {
                children: 0,
                members: row.direct_member_count,
            },
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> WorkspaceId {
        self.workspace.id
    }

    /// Depth-first search for a node in this subtree.
    pub fn find(&self, id: WorkspaceId) -> Option<&TreeNode> {
        if self.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Number of nodes in this subtree, self included.
    pub fn subtree_size(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TreeNode::subtree_size)
            .sum::<usize>()
    }
}

/// Find a node anywhere in a forest.
pub fn find_in_forest(forest: &[TreeNode], id: WorkspaceId) -> Option<&TreeNode> {
    forest.iter().find_map(|root| root.find(id))
}

/// Rebuild the visible forest from flat rows.
///
/// Two full passes, so row order does not matter for correctness; children
/// keep the relative order of their rows. A row whose parent is not in the
/// set becomes a root, which yields several roots when the user belongs to
/// disjoint subtrees.
pub fn build_tree(rows: Vec<VisibleWorkspaceRow>) -> Vec<TreeNode> {
    let mut arena: Vec<Option<TreeNode>> = Vec::with_capacity(rows.len());
    let mut index: HashMap<WorkspaceId, usize> = HashMap::with_capacity(rows.len());

    // Pass 1: index. First row per id wins unless a later duplicate carries the membership.
    for row in rows {
        match index.get(&row.workspace.id) {
            Some(&slot) => {
                if let Some(existing) = arena[slot].as_mut() {
                    if existing.member_role.is_none() && row.member_role.is_some() {
                        *existing = TreeNode::leaf(row);
                    }
                }
            }
            None => {
                index.insert(row.workspace.id, arena.len());
                arena.push(Some(TreeNode::leaf(row)));
            }
        }
    }

    // Pass 2: link.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); arena.len()];
    let mut roots = Vec::new();
    for (slot, node) in arena.iter().enumerate() {
        let parent_slot = node
            .as_ref()
            .and_then(|n| n.workspace.parent_id)
            .and_then(|parent_id| index.get(&parent_id).copied())
            .filter(|&parent| parent != slot);
        match parent_slot {
            Some(parent) => children[parent].push(slot),
            None => roots.push(slot),
        }
    }

    for (slot, kids) in children.iter().enumerate() {
        if let Some(node) = arena[slot].as_mut() {
            node.count.children = kids.len();
        }
    }

    // Rows caught in a parent cycle are never reached from a root and drop out here.
    roots
        .into_iter()
        .filter_map(|slot| materialise(slot, &mut arena, &children))
        .collect()
}

fn materialise(
    slot: usize,
    arena: &mut [Option<TreeNode>],
    children: &[Vec<usize>],
) -> Option<TreeNode> {
    let mut node = arena[slot].take()?;
    node.children = children[slot]
        .iter()
        .filter_map(|&child| materialise(child, arena, children))
        .collect();
    Some(node)
}
