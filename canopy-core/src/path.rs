//! Materialised paths.
//!
//! A [`WorkspacePath`] is the `/`-joined id chain from a root workspace down to
//! the workspace itself. It is the single source of truth for ancestry: depth,
//! parent, ancestors and descendant prefixes are all derived from it.
//!
//! Paths are validated on construction. Every segment must be a workspace id
//! and the chain may not be deeper than [`MAX_DEPTH`](crate::MAX_DEPTH), so a
//! parsed path only ever contains hex digits, `-` and `/`. That keeps it safe
//! to embed in `LIKE` patterns and cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::hierarchy::MAX_DEPTH;
use crate::identity::WorkspaceId;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

/// A validated materialised path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspacePath {
    raw: String,
    ids: Vec<WorkspaceId>,
}

impl WorkspacePath {
    /// Path of a root workspace.
    pub fn root(id: WorkspaceId) -> Self {
        Self {
            raw: id.to_string(),
            ids: vec![id],
        }
    }

    /// Parse and normalise an untrusted path string.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        if input.is_empty() {
            return Err(invalid(input, "path is empty"));
        }

        let mut ids = Vec::new();
        for segment in input.split(PATH_SEPARATOR) {
            if segment.is_empty() {
                return Err(invalid(input, "path contains an empty segment"));
            }
            let id = segment
                .parse::<WorkspaceId>()
                .map_err(|_| invalid(input, &format!("segment {segment:?} is not a workspace id")))?;
            ids.push(id);
        }

        Self::from_ids(ids).map_err(|_| {
            invalid(
                input,
                &format!("path is deeper than max depth {MAX_DEPTH}"),
            )
        })
    }

    /// Build a path from an id chain, root first.
    pub fn from_ids(ids: Vec<WorkspaceId>) -> Result<Self, ValidationError> {
        if ids.is_empty() {
            return Err(invalid("", "path is empty"));
        }
        let raw = join_ids(&ids);
        if ids.len() > (MAX_DEPTH as usize) + 1 {
            return Err(invalid(&raw, "path is too deep"));
        }
        Ok(Self { raw, ids })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Id chain from root to self.
    pub fn ids(&self) -> &[WorkspaceId] {
        &self.ids
    }

    /// Number of ancestors. Equals the number of `/` in the path.
    pub fn depth(&self) -> i32 {
        (self.ids.len() - 1) as i32
    }

    pub fn is_root(&self) -> bool {
        self.ids.len() == 1
    }

    /// The workspace this path points at (last segment).
    pub fn self_id(&self) -> WorkspaceId {
        self.ids[self.ids.len() - 1]
    }

    /// The first segment.
    pub fn root_id(&self) -> WorkspaceId {
        self.ids[0]
    }

    /// Ancestor ids, root first, excluding self.
    pub fn ancestor_ids(&self) -> &[WorkspaceId] {
        &self.ids[..self.ids.len() - 1]
    }

    /// Every proper prefix ending on a `/` boundary, shortest first.
    ///
    /// For `A/B/C` this yields `A` and `A/B`.
    pub fn ancestor_paths(&self) -> Vec<WorkspacePath> {
        (1..self.ids.len())
            .map(|len| {
                let ids = self.ids[..len].to_vec();
                Self {
                    raw: join_ids(&ids),
                    ids,
                }
            })
            .collect()
    }

    pub fn parent_path(&self) -> Option<WorkspacePath> {
        self.ancestor_paths().pop()
    }

    /// Prefix shared by every descendant: `path + "/"`.
    pub fn descendant_prefix(&self) -> String {
        format!("{}{}", self.raw, PATH_SEPARATOR)
    }

    /// Path of a new child under this one.
    pub fn child(&self, id: WorkspaceId) -> Result<Self, ValidationError> {
        let mut ids = self.ids.clone();
        ids.push(id);
        Self::from_ids(ids)
    }

    /// True if `other` lies strictly below this path.
    pub fn is_ancestor_of(&self, other: &WorkspacePath) -> bool {
        other.ids.len() > self.ids.len() && other.ids.starts_with(&self.ids)
    }

    /// True if `other` is this path or lies below it.
    pub fn contains(&self, other: &WorkspacePath) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Move this path from under `old_prefix` to under `new_prefix`.
    ///
    /// Returns `Ok(None)` when the path is not `old_prefix` or one of its
    /// descendants.
    pub fn rebase(
        &self,
        old_prefix: &WorkspacePath,
        new_prefix: &WorkspacePath,
    ) -> Result<Option<WorkspacePath>, ValidationError> {
        if !old_prefix.contains(self) {
            return Ok(None);
        }
        let mut ids = new_prefix.ids.clone();
        ids.extend_from_slice(&self.ids[old_prefix.ids.len()..]);
        Self::from_ids(ids).map(Some)
    }
}

fn join_ids(ids: &[WorkspaceId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn invalid(path: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Depth of a raw path string: the number of `/` characters.
pub fn depth_of(path: &str) -> i32 {
    path.matches(PATH_SEPARATOR).count() as i32
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for WorkspacePath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WorkspacePath {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WorkspacePath> for String {
    fn from(path: WorkspacePath) -> Self {
        path.raw
    }
}

impl AsRef<str> for WorkspacePath {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Vec<WorkspaceId> {
        (0..n).map(|_| WorkspaceId::now_v7()).collect()
    }

    #[test]
    fn test_root_path_is_id() {
        let id = WorkspaceId::now_v7();
        let path = WorkspacePath::root(id);
        assert_eq!(path.as_str(), id.to_string());
        assert_eq!(path.depth(), 0);
        assert!(path.is_root());
        assert!(path.ancestor_ids().is_empty());
        assert!(path.ancestor_paths().is_empty());
        assert!(path.parent_path().is_none());
    }

    #[test]
    fn test_parse_three_levels() {
        let ids = chain(3);
        let raw = format!("{}/{}/{}", ids[0], ids[1], ids[2]);
        let path = WorkspacePath::parse(&raw).expect("valid path");

        assert_eq!(path.depth(), 2);
        assert_eq!(path.self_id(), ids[2]);
        assert_eq!(path.root_id(), ids[0]);
        assert_eq!(path.ancestor_ids(), &ids[..2]);
        assert_eq!(depth_of(path.as_str()), path.depth());
    }

    #[test]
    fn test_ancestor_paths_shortest_first() {
        let ids = chain(3);
        let path = WorkspacePath::from_ids(ids.clone()).expect("valid");
        let ancestors = path.ancestor_paths();

        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[0].as_str(), ids[0].to_string());
        assert_eq!(ancestors[1].as_str(), format!("{}/{}", ids[0], ids[1]));
        assert_eq!(path.parent_path(), Some(ancestors[1].clone()));
    }

    #[test]
    fn test_parse_normalises_uppercase() {
        let id = WorkspaceId::now_v7();
        let upper = id.to_string().to_uppercase();
        let path = WorkspacePath::parse(&upper).expect("uuid parse is case-insensitive");
        assert_eq!(path.as_str(), id.to_string());
    }

    #[test]
    fn test_parse_rejects_empty_and_empty_segments() {
        assert!(WorkspacePath::parse("").is_err());

        let id = WorkspaceId::now_v7();
        assert!(WorkspacePath::parse(&format!("{id}/")).is_err());
        assert!(WorkspacePath::parse(&format!("/{id}")).is_err());
        assert!(WorkspacePath::parse(&format!("{id}//{id}")).is_err());
    }

    #[test]
    fn test_parse_rejects_like_wildcards_and_quotes() {
        for bad in ["%", "_", "a'b", "abc%", "' OR 1=1 --"] {
            let err = WorkspacePath::parse(bad).expect_err("must reject");
            assert!(matches!(err, ValidationError::InvalidPath { .. }));
        }
    }

    #[test]
    fn test_parse_rejects_too_deep() {
        let ids = chain(4);
        let raw = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("/");
        assert!(WorkspacePath::parse(&raw).is_err());
    }

    #[test]
    fn test_descendant_prefix_ends_with_separator() {
        let path = WorkspacePath::root(WorkspaceId::now_v7());
        assert_eq!(path.descendant_prefix(), format!("{}/", path));
    }

    #[test]
    fn test_is_ancestor_of_respects_segment_boundaries() {
        let ids = chain(2);
        let parent = WorkspacePath::root(ids[0]);
        let child = parent.child(ids[1]).expect("child");
        let other_root = WorkspacePath::root(ids[1]);

        assert!(parent.is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&parent));
        assert!(!parent.is_ancestor_of(&parent));
        assert!(parent.contains(&parent));
        assert!(!other_root.is_ancestor_of(&child));
    }

    #[test]
    fn test_rebase_moves_subtree() {
        let ids = chain(4);
        let old_parent = WorkspacePath::root(ids[0]);
        let moved = old_parent.child(ids[1]).expect("child");
        let grandchild = moved.child(ids[2]).expect("grandchild");
        let new_root = WorkspacePath::root(ids[1]);

        let rebased = grandchild
            .rebase(&moved, &new_root)
            .expect("valid")
            .expect("under old prefix");
        assert_eq!(rebased.ids(), &[ids[1], ids[2]]);

        let unrelated = WorkspacePath::root(ids[3]);
        assert_eq!(unrelated.rebase(&moved, &new_root).expect("valid"), None);
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let path = WorkspacePath::from_ids(chain(2)).expect("valid");
        let json = serde_json::to_string(&path).expect("serialize");
        assert_eq!(json, format!("\"{}\"", path));
        let back: WorkspacePath = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, path);
    }

    #[test]
    fn test_serde_rejects_invalid_string() {
        let result: Result<WorkspacePath, _> = serde_json::from_str("\"../etc\"");
        assert!(result.is_err());
    }
}
