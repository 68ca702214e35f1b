//! Schema metadata types: tables, columns and relations.
//!
//! The engine works with client-facing aliases everywhere; physical names
//! only surface when SQL is rendered. Metadata is built once at startup and
//! never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Declared value kind of a column, driving condition legality and
/// result post-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    String,
    Number,
    DateTime,
    Other,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::String => "string",
            ColumnKind::Number => "number",
            ColumnKind::DateTime => "datetime",
            ColumnKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column of a queryable table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Physical column name in the store.
    pub name: String,
    /// Client-facing alias, unique within the table.
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub primary_key: bool,
    pub kind: ColumnKind,
    /// Declared maximum length for string columns, when known.
    #[serde(default)]
    pub max_length: Option<u32>,
}

/// A queryable entity exposed under a client-facing alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Physical table name in the store.
    pub name: String,
    /// Client-facing alias, unique registry-wide.
    pub alias: String,
    #[serde(default)]
    pub description: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Find a column by its client-facing alias.
    pub fn column(&self, alias: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.alias == alias)
    }

    /// Find a column by its physical name.
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary-key columns in declaration order; possibly composite.
    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }
}

/// Cardinality of a relation edge, seen from one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
}

/// A directed foreign-key-like link between two tables.
///
/// The edge is traversable in both directions; cardinality from either side
/// is decided by whether the far-side column is covered by a single-column
/// unique index (`owner_unique` / `related_unique`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Table alias of the owning side.
    pub owner_table: String,
    /// Column alias on the owning side.
    pub owner_column: String,
    /// Table alias of the related side.
    pub related_table: String,
    /// Column alias on the related side.
    pub related_column: String,
    /// The owner column is covered by a single-column unique index.
    #[serde(default)]
    pub owner_unique: bool,
    /// The related column is covered by a single-column unique index.
    #[serde(default)]
    pub related_unique: bool,
}

impl Relation {
    /// Cardinality in the declared owner -> related direction.
    pub fn kind(&self) -> RelationKind {
        if self.related_unique {
            RelationKind::OneToOne
        } else {
            RelationKind::OneToMany
        }
    }

    /// Cardinality seen from `parent_alias` towards the other side: one
    /// child per parent only when the child-side join column is unique.
    pub fn kind_from(&self, parent_alias: &str) -> RelationKind {
        let child_unique = if self.owner_table == parent_alias {
            self.related_unique
        } else {
            self.owner_unique
        };
        if child_unique {
            RelationKind::OneToOne
        } else {
            RelationKind::OneToMany
        }
    }

    /// True when the edge links `a` and `b` in either direction.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.owner_table == a && self.related_table == b)
            || (self.owner_table == b && self.related_table == a)
    }

    /// Join column aliases as (parent side, child side), given the parent.
    pub fn join_columns_from(&self, parent_alias: &str) -> (&str, &str) {
        if self.owner_table == parent_alias {
            (&self.owner_column, &self.related_column)
        } else {
            (&self.related_column, &self.owner_column)
        }
    }
}
