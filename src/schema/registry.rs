//! Immutable schema registry and its process-wide shared handle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{QueryError, QueryResult};

use super::model::{Column, Relation, Table};

/// Immutable table/column/relation metadata store.
///
/// Built exactly once by [`crate::schema::bootstrap::build_registry`] and
/// shared read-only across all request-handling tasks. A rebuild produces a
/// wholly new instance swapped in through [`SharedRegistry`].
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    /// Tables keyed by client-facing alias.
    tables: HashMap<String, Table>,
    /// Physical name -> alias translation.
    name_to_alias: HashMap<String, String>,
    relations: Vec<Relation>,
    /// (table alias, column alias) -> indices into `relations`.
    relation_index: HashMap<(String, String), Vec<usize>>,
}

impl SchemaRegistry {
    /// Build a registry from tables and relations, checking alias
    /// uniqueness invariants.
    pub fn new(tables: Vec<Table>, relations: Vec<Relation>) -> QueryResult<Self> {
        let mut registry = SchemaRegistry::default();
        for table in tables {
            if registry.tables.contains_key(&table.alias) {
                return Err(QueryError::BootstrapError(format!(
                    "duplicate table alias '{}'",
                    table.alias
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for column in &table.columns {
                if !seen.insert(column.alias.as_str()) {
                    return Err(QueryError::BootstrapError(format!(
                        "duplicate column alias '{}' in table '{}'",
                        column.alias, table.alias
                    )));
                }
            }
            registry
                .name_to_alias
                .insert(table.name.clone(), table.alias.clone());
            registry.tables.insert(table.alias.clone(), table);
        }
        for relation in relations {
            for side in [
                (&relation.owner_table, &relation.owner_column),
                (&relation.related_table, &relation.related_column),
            ] {
                let table = registry.tables.get(side.0).ok_or_else(|| {
                    QueryError::BootstrapError(format!(
                        "relation references unknown table '{}'",
                        side.0
                    ))
                })?;
                if table.column(side.1).is_none() {
                    return Err(QueryError::BootstrapError(format!(
                        "relation references unknown column '{}.{}'",
                        side.0, side.1
                    )));
                }
            }
            let idx = registry.relations.len();
            registry
                .relation_index
                .entry((relation.owner_table.clone(), relation.owner_column.clone()))
                .or_default()
                .push(idx);
            registry
                .relation_index
                .entry((
                    relation.related_table.clone(),
                    relation.related_column.clone(),
                ))
                .or_default()
                .push(idx);
            registry.relations.push(relation);
        }
        Ok(registry)
    }

    /// Find a table by its client-facing alias.
    pub fn table(&self, alias: &str) -> Option<&Table> {
        self.tables.get(alias)
    }

    /// Find a table by alias first, then by physical name.
    pub fn table_by_alias_or_name(&self, key: &str) -> Option<&Table> {
        self.tables
            .get(key)
            .or_else(|| self.name_to_alias.get(key).and_then(|a| self.tables.get(a)))
    }

    /// Resolve a table or fail with a request error.
    pub fn require_table(&self, alias: &str) -> QueryResult<&Table> {
        self.table_by_alias_or_name(alias)
            .ok_or_else(|| QueryError::SchemaNotFound(alias.to_string()))
    }

    /// Resolve a column or fail with a request error.
    pub fn require_column<'a>(&'a self, table: &'a Table, alias: &str) -> QueryResult<&'a Column> {
        table
            .column(alias)
            .ok_or_else(|| QueryError::ColumnNotFound {
                schema: table.alias.clone(),
                column: alias.to_string(),
            })
    }

    /// Alias for a physical table name.
    pub fn alias_for(&self, name: &str) -> Option<&str> {
        self.name_to_alias.get(name).map(|s| s.as_str())
    }

    /// Physical name for a table alias.
    pub fn name_for(&self, alias: &str) -> Option<&str> {
        self.tables.get(alias).map(|t| t.name.as_str())
    }

    /// All registered tables.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Relations touching the given (table, column) pair, either side.
    pub fn relations_of(&self, table_alias: &str, column_alias: &str) -> Vec<&Relation> {
        self.relation_index
            .get(&(table_alias.to_string(), column_alias.to_string()))
            .map(|idxs| idxs.iter().map(|&i| &self.relations[i]).collect())
            .unwrap_or_default()
    }

    /// Find the direct relation edge between two tables, either direction.
    pub fn relation_between(&self, a: &str, b: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.connects(a, b))
    }

    /// Like [`Self::relation_between`] but failing with a request error.
    pub fn require_relation(&self, a: &str, b: &str) -> QueryResult<&Relation> {
        self.relation_between(a, b)
            .ok_or_else(|| QueryError::RelationNotFound(a.to_string(), b.to_string()))
    }
}

/// Process-wide registry handle.
///
/// Readers take a cheap `Arc` snapshot and never block each other; a rebuild
/// swaps in a wholly new registry, leaving in-flight requests on the old
/// snapshot.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<Arc<SchemaRegistry>>>,
}

impl SharedRegistry {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<SchemaRegistry> {
        self.inner.read().clone()
    }

    /// Atomically install a freshly built registry.
    pub fn swap(&self, registry: SchemaRegistry) {
        let mut guard = self.inner.write();
        *guard = Arc::new(registry);
        tracing::info!("schema registry swapped");
    }
}
