//! Schema-driven request validation.
//!
//! Everything here runs before any SQL is built: unknown schemas/columns,
//! illegal condition operators for a column's declared kind, duplicate
//! output keys, malformed aggregate specs and unreachable relation hops are
//! all rejected with an error naming the offending fragment. Validation is
//! pure and idempotent.

use std::collections::{BTreeSet, HashMap, HashSet};

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::schema::model::{ColumnKind, Table};
use crate::schema::registry::SchemaRegistry;

use super::model::{
    AggregateFunc, ColumnRef, ConditionNode, ConditionType, QueryRequest, ResultColumn, ResultSpec,
};

/// Static legality table: which condition operators each column kind
/// accepts.
static LEGAL_CONDITIONS: Lazy<HashMap<ColumnKind, &'static [ConditionType]>> = Lazy::new(|| {
    use ConditionType::*;
    let mut map: HashMap<ColumnKind, &'static [ConditionType]> = HashMap::new();
    map.insert(
        ColumnKind::String,
        &[Eq, In, Like, LikePrefix, LikeSuffix][..],
    );
    map.insert(ColumnKind::Number, &[Eq, Gt, Gte, Lt, Lte][..]);
    map.insert(ColumnKind::DateTime, &[Gt, Gte, Lt, Lte, Between][..]);
    map.insert(ColumnKind::Other, &[Eq][..]);
    map
});

/// True when `op` is legal on a column of the given kind.
pub fn condition_allowed(kind: ColumnKind, op: ConditionType) -> bool {
    LEGAL_CONDITIONS
        .get(&kind)
        .map(|ops| ops.contains(&op))
        .unwrap_or(false)
}

/// The distinct table sets a request touches, by canonical alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchedTables {
    /// Tables referenced by WHERE conditions and ORDER BY columns. ORDER BY
    /// rides along because the id-first pagination pass sorts on the narrow
    /// join.
    pub filter_tables: BTreeSet<String>,
    /// Tables referenced by the top-level projection and GROUP BY.
    pub result_tables: BTreeSet<String>,
    /// Tables referenced only through aggregate target columns.
    pub aggregate_tables: BTreeSet<String>,
}

/// A request that passed validation, with its touched-table sets.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    /// Canonical root table alias.
    pub root: String,
    pub touched: TouchedTables,
    pub has_plain: bool,
    pub has_aggregate: bool,
}

impl ValidatedRequest {
    /// Tables joined in the narrow (filter-only) pass, root excluded.
    pub fn narrow_tables(&self) -> BTreeSet<String> {
        let mut set = self.touched.filter_tables.clone();
        set.remove(&self.root);
        set
    }

    /// Tables joined in the wide pass, root excluded.
    pub fn wide_tables(&self) -> BTreeSet<String> {
        let mut set = self.narrow_tables();
        set.extend(self.touched.result_tables.iter().cloned());
        set.extend(self.touched.aggregate_tables.iter().cloned());
        set.remove(&self.root);
        set
    }

    /// GROUP BY is emitted only when the projection mixes plain and
    /// aggregate columns.
    pub fn mixed_projection(&self) -> bool {
        self.has_plain && self.has_aggregate
    }
}

/// Validate a request against the registry.
pub fn validate(request: &QueryRequest, registry: &SchemaRegistry) -> QueryResult<ValidatedRequest> {
    if request.root_schema.trim().is_empty() {
        return Err(QueryError::BadRequest("root schema is blank".to_string()));
    }
    let root = registry.require_table(&request.root_schema)?;
    if request.result.columns.is_empty() {
        return Err(QueryError::BadRequest(
            "result projection is empty".to_string(),
        ));
    }

    let mut validated = ValidatedRequest {
        root: root.alias.clone(),
        touched: TouchedTables::default(),
        has_plain: false,
        has_aggregate: false,
    };

    let root_alias = validated.root.clone();
    if let Some(conditions) = &request.param.conditions {
        check_condition(conditions, &root_alias, registry, &mut validated)?;
    }

    let aggregate_aliases = check_result(&request.result, root, registry, &mut validated, 0)?;

    for group_col in &request.param.group_by {
        let (table, _) = resolve_column(registry, &validated.root, group_col)?;
        validated.touched.result_tables.insert(table);
    }
    if validated.mixed_projection() && request.param.group_by.is_empty() {
        return Err(QueryError::BadRequest(
            "projection mixes plain and aggregate columns but groupBy is empty".to_string(),
        ));
    }

    for order in &request.param.order_by {
        // Ordering by an aggregate's output alias is allowed.
        if !order.column.contains('.') && aggregate_aliases.contains(order.column.as_str()) {
            continue;
        }
        let (table, _) = resolve_column(registry, &validated.root, &order.column)?;
        validated.touched.filter_tables.insert(table);
    }

    if let Some(page) = &request.param.page {
        if page.page == 0 || page.limit == 0 {
            return Err(QueryError::BadRequest(
                "page and limit must be positive".to_string(),
            ));
        }
    }

    check_reachability(&validated, registry)?;

    Ok(validated)
}

/// Resolve a possibly qualified column reference to (table alias, column
/// alias), verifying both exist.
fn resolve_column(
    registry: &SchemaRegistry,
    default_schema: &str,
    reference: &str,
) -> QueryResult<(String, String)> {
    let parsed = ColumnRef::parse(reference);
    let table = registry.require_table(parsed.schema.unwrap_or(default_schema))?;
    let column = registry.require_column(table, parsed.column)?;
    Ok((table.alias.clone(), column.alias.clone()))
}

fn check_condition(
    node: &ConditionNode,
    inherited_schema: &str,
    registry: &SchemaRegistry,
    validated: &mut ValidatedRequest,
) -> QueryResult<()> {
    match node {
        ConditionNode::Leaf {
            schema,
            column,
            op,
            value,
        } => {
            let schema_alias = schema.as_deref().unwrap_or(inherited_schema);
            let parsed = ColumnRef::parse(column);
            let table = registry.require_table(parsed.schema.unwrap_or(schema_alias))?;
            let col = registry.require_column(table, parsed.column)?;
            if !condition_allowed(col.kind, *op) {
                return Err(QueryError::IllegalCondition {
                    condition: op.tag().to_string(),
                    kind: col.kind.to_string(),
                    column: format!("{}.{}", table.alias, col.alias),
                });
            }
            check_condition_value(*op, value, &table.alias, &col.alias)?;
            validated.touched.filter_tables.insert(table.alias.clone());
            Ok(())
        }
        ConditionNode::Group {
            schema, children, ..
        } => {
            let schema_alias = schema.as_deref().unwrap_or(inherited_schema);
            for child in children {
                check_condition(child, schema_alias, registry, validated)?;
            }
            Ok(())
        }
    }
}

/// Shape checks on the condition value; compilation assumes these hold.
fn check_condition_value(
    op: ConditionType,
    value: &Value,
    table: &str,
    column: &str,
) -> QueryResult<()> {
    let context = || format!("condition on '{table}.{column}'");
    match op {
        ConditionType::In | ConditionType::NotIn => {
            if !value.is_array() {
                return Err(QueryError::BadRequest(format!(
                    "{}: '{}' expects an array value",
                    context(),
                    op.tag()
                )));
            }
        }
        ConditionType::Between => {
            match value.as_array() {
                Some(items) if items.len() == 2 => {}
                _ => {
                    return Err(QueryError::BadRequest(format!(
                        "{}: 'between' expects a 2-element array",
                        context()
                    )));
                }
            }
        }
        ConditionType::IsNull | ConditionType::NotNull => {}
        _ => {
            if value.is_null() || value.is_array() || value.is_object() {
                return Err(QueryError::BadRequest(format!(
                    "{}: '{}' expects a single scalar value",
                    context(),
                    op.tag()
                )));
            }
        }
    }
    Ok(())
}

/// Validate one projection level; returns the aggregate output aliases
/// declared at the top level (for ORDER BY resolution).
fn check_result(
    spec: &ResultSpec,
    level_table: &Table,
    registry: &SchemaRegistry,
    validated: &mut ValidatedRequest,
    depth: usize,
) -> QueryResult<HashSet<String>> {
    let mut output_keys = HashSet::new();
    let mut aggregate_aliases = HashSet::new();

    for column in &spec.columns {
        if !output_keys.insert(column.output_key().to_string()) {
            return Err(QueryError::DuplicateOutputKey(
                column.output_key().to_string(),
            ));
        }
        match column {
            ResultColumn::Column { column } => {
                let (table, _) = resolve_column(registry, &level_table.alias, column)?;
                if depth == 0 {
                    validated.touched.result_tables.insert(table);
                    validated.has_plain = true;
                }
            }
            ResultColumn::DateFormat { column, .. } => {
                let (table, col_alias) = resolve_column(registry, &level_table.alias, column)?;
                let resolved_table = registry.require_table(&table)?;
                let col = registry.require_column(resolved_table, &col_alias)?;
                if col.kind != ColumnKind::DateTime {
                    return Err(QueryError::BadRequest(format!(
                        "dateFormat target '{}.{}' is not a datetime column",
                        table, col_alias
                    )));
                }
                if depth == 0 {
                    validated.touched.result_tables.insert(table);
                    validated.has_plain = true;
                }
            }
            ResultColumn::Aggregate {
                alias,
                func,
                column,
                having,
            } => {
                let target_kind = match (func, column) {
                    (AggregateFunc::Count, None) => ColumnKind::Number,
                    (_, None) => {
                        return Err(QueryError::InvalidAggregate(format!(
                            "aggregate '{alias}' needs a target column"
                        )));
                    }
                    (_, Some(reference)) => {
                        let (table, col_alias) =
                            resolve_column(registry, &level_table.alias, reference)?;
                        if depth == 0 {
                            validated.touched.aggregate_tables.insert(table.clone());
                        }
                        let resolved_table = registry.require_table(&table)?;
                        registry.require_column(resolved_table, &col_alias)?.kind
                    }
                };
                // Aggregate outputs compare as their input kind; COUNT is
                // always numeric.
                let having_kind = if *func == AggregateFunc::Count {
                    ColumnKind::Number
                } else {
                    target_kind
                };
                for cond in having {
                    if !condition_allowed(having_kind, cond.op) {
                        return Err(QueryError::IllegalCondition {
                            condition: cond.op.tag().to_string(),
                            kind: having_kind.to_string(),
                            column: format!("HAVING {alias}"),
                        });
                    }
                    check_condition_value(cond.op, &cond.value, "HAVING", alias)?;
                }
                if depth == 0 {
                    validated.has_aggregate = true;
                }
            }
            ResultColumn::Relation { key, result } => {
                let child_alias = result.schema.as_deref().ok_or_else(|| {
                    QueryError::BadRequest(format!(
                        "nested relation '{key}' must name a schema"
                    ))
                })?;
                let child = registry.require_table(child_alias)?;
                registry.require_relation(&level_table.alias, &child.alias)?;
                check_result(result, child, registry, validated, depth + 1)?;
            }
        }
        if depth == 0 {
            if let ResultColumn::Aggregate { alias, .. } = column {
                aggregate_aliases.insert(alias.clone());
            }
        }
    }

    Ok(aggregate_aliases)
}

/// Every touched table beyond the root must sit one relation edge away from
/// a table already included in the plan.
fn check_reachability(validated: &ValidatedRequest, registry: &SchemaRegistry) -> QueryResult<()> {
    let mut included: BTreeSet<String> = BTreeSet::new();
    included.insert(validated.root.clone());
    let mut remaining = validated.wide_tables();
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .find(|candidate| {
                included
                    .iter()
                    .any(|inc| registry.relation_between(inc, candidate).is_some())
            })
            .cloned();
        match next {
            Some(table) => {
                remaining.remove(&table);
                included.insert(table);
            }
            None => {
                let stuck = remaining.iter().next().cloned().unwrap_or_default();
                return Err(QueryError::RelationNotFound(validated.root.clone(), stuck));
            }
        }
    }
    Ok(())
}
