//! Tenant-scoped hierarchy cache keys.
//!
//! `HierarchyCacheKey` has private fields and only tenant-taking
//! constructors, so a key for another tenant's data cannot be built by
//! accident. Keys render to
//! `tenant:{tenantId}:workspace:hierarchy:{family}:{subject}`.

use std::fmt;

use canopy_core::{TenantId, UserId, WorkspacePath};

const TENANT_SEGMENT: &str = "tenant";
const NAMESPACE: &str = "workspace:hierarchy";

/// The three cached views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheFamily {
    /// Result of `get_descendants`, keyed by path.
    Descendants,
    /// Result of `get_aggregated_counts`, keyed by path.
    AggCounts,
    /// Result of `get_tree`, keyed by user id.
    Tree,
}

impl CacheFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheFamily::Descendants => "descendants",
            CacheFamily::AggCounts => "agg_counts",
            CacheFamily::Tree => "tree",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "descendants" => Some(CacheFamily::Descendants),
            "agg_counts" => Some(CacheFamily::AggCounts),
            "tree" => Some(CacheFamily::Tree),
            _ => None,
        }
    }
}

/// A cache key scoped to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HierarchyCacheKey {
    inner: KeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    tenant_id: TenantId,
    family: CacheFamily,
    subject: String,
}

impl HierarchyCacheKey {
    fn new(tenant_id: TenantId, family: CacheFamily, subject: String) -> Self {
        Self {
            inner: KeyInner {
                tenant_id,
                family,
                subject,
            },
        }
    }

    pub fn descendants(tenant_id: TenantId, path: &WorkspacePath) -> Self {
        Self::new(tenant_id, CacheFamily::Descendants, path.to_string())
    }

    pub fn agg_counts(tenant_id: TenantId, path: &WorkspacePath) -> Self {
        Self::new(tenant_id, CacheFamily::AggCounts, path.to_string())
    }

    pub fn tree(tenant_id: TenantId, user_id: UserId) -> Self {
        Self::new(tenant_id, CacheFamily::Tree, user_id.to_string())
    }

    pub fn tenant_id(&self) -> TenantId {
        self.inner.tenant_id
    }

    pub fn family(&self) -> CacheFamily {
        self.inner.family
    }

    /// The path or user id this key is about.
    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    /// Wire form used with the cache backend.
    pub fn render(&self) -> String {
        format!(
            "{TENANT_SEGMENT}:{}:{NAMESPACE}:{}:{}",
            self.inner.tenant_id,
            self.inner.family.as_str(),
            self.inner.subject
        )
    }

    /// Parse a rendered key. Returns `None` for anything this module did not produce.
    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(6, ':');
        if parts.next()? != TENANT_SEGMENT {
            return None;
        }
        let tenant_id: TenantId = parts.next()?.parse().ok()?;
        if parts.next()? != "workspace" || parts.next()? != "hierarchy" {
            return None;
        }
        let family = CacheFamily::from_str(parts.next()?)?;
        let subject = parts.next()?;

        match family {
            CacheFamily::Descendants | CacheFamily::AggCounts => {
                let path = WorkspacePath::parse(subject).ok()?;
                Some(Self::new(tenant_id, family, path.to_string()))
            }
            CacheFamily::Tree => {
                let user: UserId = subject.parse().ok()?;
                Some(Self::tree(tenant_id, user))
            }
        }
    }
}

impl fmt::Display for HierarchyCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Every key a mutation at `path` makes stale.
///
/// Own `descendants`/`agg_counts` first, then both families for every
/// ancestor prefix, shortest first. Derived purely from the path string:
/// each ancestor's path is exactly a `/`-bounded prefix of `path`.
pub fn hierarchy_invalidation_keys(
    tenant_id: TenantId,
    path: &WorkspacePath,
) -> Vec<HierarchyCacheKey> {
    let ancestors = path.ancestor_paths();
    let mut keys = Vec::with_capacity(2 + ancestors.len() * 2);
    keys.push(HierarchyCacheKey::descendants(tenant_id, path));
    keys.push(HierarchyCacheKey::agg_counts(tenant_id, path));
    for ancestor in &ancestors {
        keys.push(HierarchyCacheKey::agg_counts(tenant_id, ancestor));
        keys.push(HierarchyCacheKey::descendants(tenant_id, ancestor));
    }
    keys
}
