//! Permitted schema names.

use crate::error::{GatewayError, GatewayResult};
use std::collections::BTreeSet;

/// Set of schema names that queries may reference.
///
/// Names compare case-insensitively. The list is built once at startup and
/// never mutated; per-call restrictions produce a narrowed copy through
/// [`SchemaAllowList::scoped`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaAllowList {
    names: BTreeSet<String>,
    default_schema: String,
}

impl SchemaAllowList {
    /// Build an allow-list. Unqualified table references resolve to `default_schema`.
    pub fn new<I, S>(names: I, default_schema: impl Into<String>) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(GatewayError::config(
                "At least one allowed schema must be configured",
            ));
        }
        let default_schema = default_schema.into().trim().to_string();
        if default_schema.is_empty() {
            return Err(GatewayError::config("Default schema must not be empty"));
        }
        Ok(Self {
            names,
            default_schema,
        })
    }

    pub fn contains(&self, schema: &str) -> bool {
        self.names.contains(&schema.trim().to_lowercase())
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    /// Schema an optional qualifier resolves to.
    pub fn resolve<'a>(&'a self, qualifier: Option<&'a str>) -> &'a str {
        qualifier.unwrap_or(&self.default_schema)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Intersect with a caller-requested scope.
    ///
    /// The result never contains a schema this list does not; an empty
    /// intersection is a valid list that admits nothing.
    pub fn scoped(&self, scope: Option<&[String]>) -> SchemaAllowList {
        let Some(scope) = scope else {
            return self.clone();
        };
        let requested: BTreeSet<String> = scope.iter().map(|s| s.trim().to_lowercase()).collect();
        SchemaAllowList {
            names: self.names.intersection(&requested).cloned().collect(),
            default_schema: self.default_schema.clone(),
        }
    }
}
