//! Reassembles flat rows into the requested nested result tree.
//!
//! For each nested relation the assembler issues exactly one batched
//! follow-up query (an IN list over the collected parent keys, chunked only
//! to respect placeholder limits), merges child rows into their parents, and
//! finishes with the per-column date-format pass. Keys injected purely for
//! assembly are stripped before rows leave this module.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::compile::condition::CompiledConditions;
use crate::compile::render::quote;
use crate::compile::sql::SqlBuilder;
use crate::config::EngineConfig;
use crate::error::{QueryError, QueryResult};
use crate::request::model::{ResultColumn, ResultSpec};
use crate::schema::model::RelationKind;
use crate::schema::registry::SchemaRegistry;

use super::store::{RelationalExecutor, Row};

/// Assemble one projection level: fetch and merge nested relations, apply
/// date formats, strip injected keys.
pub fn assemble_rows<'a>(
    executor: &'a dyn RelationalExecutor,
    registry: &'a SchemaRegistry,
    config: &'a EngineConfig,
    spec: &'a ResultSpec,
    schema: &'a str,
    rows: Vec<Row>,
    injected: &'a [String],
) -> Pin<Box<dyn Future<Output = QueryResult<Vec<Row>>> + Send + 'a>> {
    Box::pin(async move {
        let mut rows = rows;
        if !rows.is_empty() {
            for column in &spec.columns {
                if let ResultColumn::Relation { key, result } = column {
                    merge_relation(
                        executor, registry, config, schema, key, result, &mut rows,
                    )
                    .await?;
                }
            }
        }

        for column in &spec.columns {
            if let ResultColumn::DateFormat {
                column,
                format,
                timezone,
            } = column
            {
                let out_key = column.rsplit('.').next().unwrap_or(column).to_string();
                let zone = resolve_timezone(timezone.as_deref())?;
                for row in &mut rows {
                    if let Some(value) = row.get_mut(&out_key) {
                        *value = format_datetime_value(value, format, zone)?;
                    }
                }
            }
        }

        if !injected.is_empty() {
            for row in &mut rows {
                for key in injected {
                    row.remove(key);
                }
            }
        }
        Ok(rows)
    })
}

/// Fetch one nested relation in a single batched pass and merge its rows
/// into the parents.
async fn merge_relation(
    executor: &dyn RelationalExecutor,
    registry: &SchemaRegistry,
    config: &EngineConfig,
    parent_schema: &str,
    output_key: &str,
    child_spec: &ResultSpec,
    parents: &mut [Row],
) -> QueryResult<()> {
    let child_alias = child_spec.schema.as_deref().ok_or_else(|| {
        QueryError::BadRequest(format!("nested relation '{output_key}' must name a schema"))
    })?;
    let child_table = registry.require_table(child_alias)?;
    let relation = registry.require_relation(parent_schema, &child_table.alias)?;
    let (parent_col, child_col) = relation.join_columns_from(parent_schema);
    let cardinality = relation.kind_from(parent_schema);

    // Distinct parent keys, order preserved.
    let mut seen = std::collections::HashSet::new();
    let mut keys = Vec::new();
    for row in parents.iter() {
        if let Some(value) = row.get(parent_col) {
            if !value.is_null() && seen.insert(value.to_string()) {
                keys.push(value.clone());
            }
        }
    }

    let (child_rows, join_col_injected) = if keys.is_empty() {
        (Vec::new(), false)
    } else {
        fetch_children(
            executor,
            registry,
            config,
            child_table.alias.as_str(),
            child_spec,
            child_col,
            &keys,
        )
        .await?
    };

    // Index child rows by join key, then hand them to their parents. A join
    // column that was only injected for matching is dropped here.
    let mut index: HashMap<String, Vec<Row>> = HashMap::new();
    for mut row in child_rows {
        let Some(key) = row.get(child_col).map(|v| v.to_string()) else {
            continue;
        };
        if join_col_injected {
            row.remove(child_col);
        }
        index.entry(key).or_default().push(row);
    }

    for parent in parents.iter_mut() {
        let matches = parent
            .get(parent_col)
            .filter(|v| !v.is_null())
            .and_then(|v| index.get(&v.to_string()));
        let value = match (cardinality, matches) {
            (RelationKind::OneToOne, Some(rows)) => rows
                .first()
                .cloned()
                .map(Value::Object)
                .unwrap_or(Value::Null),
            (RelationKind::OneToOne, None) => Value::Null,
            (RelationKind::OneToMany, Some(rows)) => {
                Value::Array(rows.iter().cloned().map(Value::Object).collect())
            }
            (RelationKind::OneToMany, None) => Value::Array(Vec::new()),
        };
        parent.insert(output_key.to_string(), value);
    }
    Ok(())
}

/// Run the batched child query, recursing for deeper nesting. The child
/// join column is injected for merging and stripped here once the parents
/// have claimed their rows.
async fn fetch_children(
    executor: &dyn RelationalExecutor,
    registry: &SchemaRegistry,
    config: &EngineConfig,
    child_alias: &str,
    child_spec: &ResultSpec,
    child_col: &str,
    keys: &[Value],
) -> QueryResult<(Vec<Row>, bool)> {
    let child_table = registry.require_table(child_alias)?;
    let builder = SqlBuilder::new(registry, child_alias);

    // Injected columns: the join key, child primary keys, and the keys any
    // deeper relation will need.
    let mut extras: Vec<String> = vec![child_col.to_string()];
    for pk in child_table.primary_key() {
        if !extras.iter().any(|e| e == &pk.alias) {
            extras.push(pk.alias.clone());
        }
    }
    for column in &child_spec.columns {
        if let ResultColumn::Relation { result, .. } = column {
            let grandchild = result.schema.as_deref().unwrap_or_default();
            let relation = registry.require_relation(child_alias, grandchild)?;
            let (key_col, _) = relation.join_columns_from(child_alias);
            if !extras.iter().any(|e| e == key_col) {
                extras.push(key_col.to_string());
            }
        }
    }

    let projection = builder.render_projection(child_spec, child_alias, false, &extras)?;
    let from = format!("{} AS {}", quote(&child_table.name), quote(&child_table.alias));
    let join_column = registry.require_column(child_table, child_col)?;

    let mut child_rows = Vec::new();
    for chunk in keys.chunks(config.in_batch_size.max(1)) {
        let holes = vec!["?"; chunk.len()].join(", ");
        let where_ = CompiledConditions {
            sql: format!("{} IN ({})", quote(&join_column.name), holes),
            params: chunk.to_vec(),
        };
        let stmt = builder.build_select(
            &projection.items,
            &from,
            Some(&where_),
            &[],
            None,
            &[],
            None,
        );
        tracing::debug!(sql = %stmt.sql, keys = chunk.len(), "fetching nested relation batch");
        child_rows.extend(executor.query(&stmt.sql, &stmt.params).await?);
    }

    // Deeper levels strip their own injections. The join column survives
    // this pass even when injected; merge_relation drops it once the
    // parents have matched their rows.
    let join_col_injected = projection.injected.iter().any(|a| a.as_str() == child_col);
    let deeper_injected: Vec<String> = projection
        .injected
        .iter()
        .filter(|alias| alias.as_str() != child_col)
        .cloned()
        .collect();
    let assembled = assemble_rows(
        executor,
        registry,
        config,
        child_spec,
        child_alias,
        child_rows,
        &deeper_injected,
    )
    .await?;
    Ok((assembled, join_col_injected))
}

/// Resolve an optional IANA timezone name; defaults to UTC.
pub fn resolve_timezone(timezone: Option<&str>) -> QueryResult<Tz> {
    match timezone {
        None => Ok(Tz::UTC),
        Some(name) => Tz::from_str(name)
            .map_err(|_| QueryError::BadRequest(format!("unknown timezone '{name}'"))),
    }
}

/// Rewrite a raw store value as a formatted date string in the given zone.
/// Nulls pass through untouched.
pub fn format_datetime_value(value: &Value, pattern: &str, zone: Tz) -> QueryResult<Value> {
    let instant = match value {
        Value::Null => return Ok(Value::Null),
        Value::String(text) => parse_instant(text).ok_or_else(|| {
            QueryError::BadRequest(format!("cannot parse '{text}' as a datetime"))
        })?,
        Value::Number(n) => {
            let raw = n.as_i64().unwrap_or_default();
            // Heuristic: values past ~2001-09 in millis are treated as millis.
            let timestamp = if raw.abs() >= 1_000_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            };
            timestamp.ok_or_else(|| {
                QueryError::BadRequest(format!("cannot interpret {raw} as a timestamp"))
            })?
        }
        other => {
            return Err(QueryError::BadRequest(format!(
                "cannot format {other} as a datetime"
            )));
        }
    };
    Ok(Value::String(
        instant.with_timezone(&zone).format(pattern).to_string(),
    ))
}

/// Parse the datetime encodings relational stores commonly hand back.
/// Naive values are taken as UTC.
fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}
