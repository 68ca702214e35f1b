//! Registry bootstrap: static declarations first, catalog introspection as
//! the fallback.
//!
//! Exactly one source ever populates a registry. The factory tries the
//! static declaration set; when it is empty, the relational store's metadata
//! catalog is introspected instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::exec::store::{RelationalExecutor, Row};

use super::model::{Column, ColumnKind, Relation, Table};
use super::registry::SchemaRegistry;

/// Static schema declarations, typically loaded from a TOML file pinned in
/// deployment config. An empty set signals "introspect the store instead".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSchemas {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl StaticSchemas {
    pub fn from_toml_str(input: &str) -> QueryResult<Self> {
        toml::from_str(input).map_err(|e| QueryError::BootstrapError(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Build the registry from exactly one bootstrap source.
pub async fn build_registry(
    statics: &StaticSchemas,
    executor: &dyn RelationalExecutor,
) -> QueryResult<SchemaRegistry> {
    if !statics.is_empty() {
        tracing::info!(tables = statics.tables.len(), "building registry from static declarations");
        return SchemaRegistry::new(statics.tables.clone(), statics.relations.clone());
    }
    tracing::info!("no static declarations, introspecting store catalog");
    introspect(executor).await
}

/// Introspect a SQLite catalog into a registry: tables, columns with
/// declared types, primary-key flags and string lengths, foreign-key pairs,
/// and unique single-column indexes driving one-to-one detection.
pub async fn introspect(executor: &dyn RelationalExecutor) -> QueryResult<SchemaRegistry> {
    let table_rows = executor
        .query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )
        .await?;

    let mut tables = Vec::new();
    let mut fk_rows_by_table = Vec::new();
    let mut unique_columns_by_table = std::collections::HashMap::new();

    for row in &table_rows {
        let name = str_field(row, "name")?;
        let columns = introspect_columns(executor, name).await?;
        let uniques = introspect_unique_columns(executor, name, &columns).await?;
        let fks = executor
            .query(&format!("PRAGMA foreign_key_list(\"{}\")", name), &[])
            .await?;
        fk_rows_by_table.push((name.to_string(), fks));
        unique_columns_by_table.insert(name.to_string(), uniques);
        tables.push(Table {
            name: name.to_string(),
            alias: table_alias(name),
            description: String::new(),
            columns,
        });
    }

    let mut relations = Vec::new();
    for (owner_name, fks) in &fk_rows_by_table {
        for fk in fks {
            let related_name = str_field(fk, "table")?;
            let owner_col_name = str_field(fk, "from")?;
            let Some(related) = tables.iter().find(|t| &t.name == related_name) else {
                continue;
            };
            let owner = tables
                .iter()
                .find(|t| &t.name == owner_name)
                .ok_or_else(|| QueryError::BootstrapError(format!("table '{owner_name}' vanished")))?;
            // A NULL "to" column means the foreign key targets the primary key.
            let related_col_name = match fk.get("to") {
                Some(Value::String(s)) => s.clone(),
                _ => related
                    .columns
                    .iter()
                    .find(|c| c.primary_key)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| {
                        QueryError::BootstrapError(format!(
                            "foreign key into '{related_name}' has no target column"
                        ))
                    })?,
            };
            let owner_column = owner.column_by_name(owner_col_name).ok_or_else(|| {
                QueryError::BootstrapError(format!(
                    "foreign key column '{owner_name}.{owner_col_name}' not found"
                ))
            })?;
            let related_column = related.column_by_name(&related_col_name).ok_or_else(|| {
                QueryError::BootstrapError(format!(
                    "foreign key target '{related_name}.{related_col_name}' not found"
                ))
            })?;
            let empty = std::collections::HashSet::new();
            let owner_uniques = unique_columns_by_table.get(owner_name).unwrap_or(&empty);
            let related_uniques = unique_columns_by_table.get(related_name).unwrap_or(&empty);
            relations.push(Relation {
                owner_table: owner.alias.clone(),
                owner_column: owner_column.alias.clone(),
                related_table: related.alias.clone(),
                related_column: related_column.alias.clone(),
                owner_unique: owner_uniques.contains(owner_col_name),
                related_unique: related_uniques.contains(related_col_name.as_str()),
            });
        }
    }

    tracing::info!(
        tables = tables.len(),
        relations = relations.len(),
        "catalog introspection complete"
    );
    SchemaRegistry::new(tables, relations)
}

async fn introspect_columns(
    executor: &dyn RelationalExecutor,
    table: &str,
) -> QueryResult<Vec<Column>> {
    let rows = executor
        .query(&format!("PRAGMA table_info(\"{}\")", table), &[])
        .await?;
    let mut columns = Vec::new();
    for row in &rows {
        let name = str_field(row, "name")?;
        let declared = row.get("type").and_then(Value::as_str).unwrap_or("");
        let (kind, max_length) = map_declared_type(declared);
        let pk = row.get("pk").and_then(Value::as_i64).unwrap_or(0) > 0;
        columns.push(Column {
            name: name.to_string(),
            alias: to_camel_case(name),
            description: String::new(),
            primary_key: pk,
            kind,
            max_length,
        });
    }
    Ok(columns)
}

/// Columns of `table` covered by a single-column unique index. A
/// single-column primary key counts too.
async fn introspect_unique_columns(
    executor: &dyn RelationalExecutor,
    table: &str,
    columns: &[Column],
) -> QueryResult<std::collections::HashSet<String>> {
    let mut uniques = std::collections::HashSet::new();
    let pk: Vec<&Column> = columns.iter().filter(|c| c.primary_key).collect();
    if pk.len() == 1 {
        uniques.insert(pk[0].name.clone());
    }
    let indexes = executor
        .query(&format!("PRAGMA index_list(\"{}\")", table), &[])
        .await?;
    for index in &indexes {
        if index.get("unique").and_then(Value::as_i64).unwrap_or(0) != 1 {
            continue;
        }
        let index_name = str_field(index, "name")?;
        let members = executor
            .query(&format!("PRAGMA index_info(\"{}\")", index_name), &[])
            .await?;
        if members.len() == 1 {
            if let Some(col) = members[0].get("name").and_then(Value::as_str) {
                uniques.insert(col.to_string());
            }
        }
    }
    Ok(uniques)
}

fn str_field<'a>(row: &'a Row, key: &str) -> QueryResult<&'a str> {
    row.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| QueryError::BootstrapError(format!("catalog row missing '{key}'")))
}

/// Map a declared SQL type onto a column kind, extracting VARCHAR lengths.
fn map_declared_type(declared: &str) -> (ColumnKind, Option<u32>) {
    let upper = declared.to_uppercase();
    if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        let max_length = upper
            .split('(')
            .nth(1)
            .and_then(|rest| rest.split(')').next())
            .and_then(|n| n.trim().parse::<u32>().ok());
        (ColumnKind::String, max_length)
    } else if upper.contains("DATE") || upper.contains("TIME") {
        (ColumnKind::DateTime, None)
    } else if upper.contains("INT")
        || upper.contains("REAL")
        || upper.contains("FLOA")
        || upper.contains("DOUB")
        || upper.contains("NUMERIC")
        || upper.contains("DECIMAL")
        || upper.contains("BOOL")
    {
        (ColumnKind::Number, None)
    } else {
        (ColumnKind::Other, None)
    }
}

/// Client-facing table alias: strip the conventional `t_` prefix, then
/// camel-case the rest.
fn table_alias(name: &str) -> String {
    to_camel_case(name.strip_prefix("t_").unwrap_or(name))
}

fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
