//! Known-column cache for structured requests.

use crate::db::TableColumns;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// How long a cached column list stays valid.
pub const CATALOG_TTL: Duration = Duration::from_secs(300);

/// Column set of one table, with case-insensitive lookup.
#[derive(Debug, Clone)]
pub struct KnownColumns {
    table: String,
    by_lower: HashMap<String, String>,
    ordered: Vec<String>,
}

impl KnownColumns {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Canonical spelling of `column`, if the table has it.
    pub fn resolve(&self, column: &str) -> Option<&str> {
        self.by_lower
            .get(&column.to_lowercase())
            .map(String::as_str)
    }

    pub fn columns(&self) -> &[String] {
        &self.ordered
    }
}

impl From<TableColumns> for KnownColumns {
    fn from(t: TableColumns) -> Self {
        let by_lower = t
            .columns
            .iter()
            .map(|c| (c.to_lowercase(), c.clone()))
            .collect();
        Self {
            table: t.table,
            by_lower,
            ordered: t.columns,
        }
    }
}

struct Entry {
    columns: Arc<KnownColumns>,
    loaded_at: Instant,
}

/// Cache keyed by lower-cased `(schema, table)`.
pub struct ColumnCatalog {
    entries: RwLock<HashMap<(String, String), Entry>>,
    ttl: Duration,
}

impl Default for ColumnCatalog {
    fn default() -> Self {
        Self::new(CATALOG_TTL)
    }
}

impl std::fmt::Debug for ColumnCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnCatalog")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn key(schema: &str, table: &str) -> (String, String) {
    (schema.to_lowercase(), table.to_lowercase())
}

impl ColumnCatalog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached columns, if present and fresh.
    pub fn get(&self, schema: &str, table: &str) -> Option<Arc<KnownColumns>> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&key(schema, table))
            .filter(|e| e.loaded_at.elapsed() < self.ttl)
            .map(|e| Arc::clone(&e.columns))
    }

    pub fn insert(&self, schema: &str, table: &str, columns: TableColumns) -> Arc<KnownColumns> {
        let columns = Arc::new(KnownColumns::from(columns));
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key(schema, table),
                Entry {
                    columns: Arc::clone(&columns),
                    loaded_at: Instant::now(),
                },
            );
        }
        columns
    }

    /// Drop a table's entry, e.g. after the server reports an unknown column.
    pub fn invalidate(&self, schema: &str, table: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&key(schema, table));
        }
    }
}
