//! Tenant scoping and the schema-name guard.
//!
//! Tenant namespace identifiers are interpolated into SQL text because query
//! engines cannot bind identifiers as parameters. [`SchemaName`] can only be
//! built through an allow-list check, and a [`TenantContext`] cannot exist
//! without one, so no query is ever assembled from an unchecked identifier.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::identity::TenantId;

/// Lowercase alphanumerics and underscore, 1..=63 chars (PostgreSQL identifier limit).
static SCHEMA_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_]{1,63}$").expect("schema name regex is valid")
});

/// A storage namespace identifier that passed the allow-list check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// Validate an untrusted schema identifier.
    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        if SCHEMA_NAME_RE.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(ValidationError::InvalidSchemaName {
                name: name.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted identifier for SQL interpolation.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SchemaName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SchemaName> for String {
    fn from(name: SchemaName) -> Self {
        name.0
    }
}

/// Per-request tenant scope. Supplied by upstream request middleware.
///
/// Every query filters on `tenant_id` and runs inside `schema`, two
/// independent isolation layers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub schema: SchemaName,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, schema: SchemaName) -> Self {
        Self { tenant_id, schema }
    }

    /// Build a context from an untrusted schema string.
    pub fn parse(tenant_id: TenantId, schema: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(tenant_id, SchemaName::parse(schema)?))
    }
}
