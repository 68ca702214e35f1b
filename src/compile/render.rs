//! Shared SQL identifier rendering.
//!
//! Tables appear in SQL under their client-facing alias (quoted), columns
//! under their physical name. Output aliases reuse the column alias so rows
//! come back keyed the way the caller asked.

use crate::error::QueryResult;
use crate::request::model::ColumnRef;
use crate::schema::registry::SchemaRegistry;

pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Render a possibly qualified column reference for use in WHERE/GROUP
/// BY/ORDER BY. Resolution errors carry the offending fragment.
pub fn render_column(
    registry: &SchemaRegistry,
    default_schema: &str,
    reference: &str,
    qualify: bool,
) -> QueryResult<String> {
    let parsed = ColumnRef::parse(reference);
    let table = registry.require_table(parsed.schema.unwrap_or(default_schema))?;
    let column = registry.require_column(table, parsed.column)?;
    Ok(if qualify {
        format!("{}.{}", quote(&table.alias), quote(&column.name))
    } else {
        quote(&column.name)
    })
}

/// Render a column with its output alias for the SELECT list.
pub fn render_select_column(
    registry: &SchemaRegistry,
    default_schema: &str,
    reference: &str,
    qualify: bool,
) -> QueryResult<(String, String)> {
    let parsed = ColumnRef::parse(reference);
    let table = registry.require_table(parsed.schema.unwrap_or(default_schema))?;
    let column = registry.require_column(table, parsed.column)?;
    let expr = if qualify {
        format!("{}.{}", quote(&table.alias), quote(&column.name))
    } else {
        quote(&column.name)
    };
    Ok((expr, column.alias.clone()))
}
