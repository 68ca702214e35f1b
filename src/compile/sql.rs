//! SELECT/COUNT statement assembly.
//!
//! Clause order is fixed: SELECT, FROM+JOIN, WHERE, GROUP BY, HAVING, ORDER
//! BY, LIMIT/OFFSET. Bound parameters follow the same order (WHERE params
//! before HAVING params); limits are numeric and rendered inline.

use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::request::model::{AggregateFunc, OrderBy, ResultColumn, ResultSpec};
use crate::schema::registry::SchemaRegistry;

use super::condition::{compile_leaf, CompiledConditions};
use super::render::{quote, render_column, render_select_column};

/// A ready-to-execute statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// The rendered SELECT list for one projection level, plus the combined
/// HAVING fragment its aggregates contributed.
#[derive(Debug, Clone)]
pub struct ProjectionSql {
    /// (expression, output alias) pairs in projection order.
    pub items: Vec<(String, String)>,
    /// Output aliases that were injected rather than requested; stripped
    /// again during assembly.
    pub injected: Vec<String>,
    pub having: Option<CompiledConditions>,
}

pub struct SqlBuilder<'a> {
    pub registry: &'a SchemaRegistry,
    pub root: &'a str,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(registry: &'a SchemaRegistry, root: &'a str) -> Self {
        Self { registry, root }
    }

    /// Render the SELECT list from a projection level. `extra` names column
    /// aliases (on the level's schema) the engine needs for assembly, such
    /// as root primary keys and nested-relation join keys; they are injected
    /// when the caller did not project them.
    pub fn render_projection(
        &self,
        spec: &ResultSpec,
        level_schema: &str,
        qualify: bool,
        extra: &[String],
    ) -> QueryResult<ProjectionSql> {
        let mut items: Vec<(String, String)> = Vec::new();
        let mut having_sql: Vec<String> = Vec::new();
        let mut having_params: Vec<Value> = Vec::new();

        for column in &spec.columns {
            match column {
                ResultColumn::Column { column } | ResultColumn::DateFormat { column, .. } => {
                    let (expr, alias) =
                        render_select_column(self.registry, level_schema, column, qualify)?;
                    items.push((expr, alias));
                }
                ResultColumn::Aggregate {
                    alias,
                    func,
                    column,
                    having,
                } => {
                    let target = match column {
                        Some(reference) => {
                            render_column(self.registry, level_schema, reference, qualify)?
                        }
                        None if *func == AggregateFunc::Count => "*".to_string(),
                        None => {
                            return Err(QueryError::InvalidAggregate(format!(
                                "aggregate '{alias}' needs a target column"
                            )));
                        }
                    };
                    let expr = format!("{}({})", func.sql(), target);
                    for cond in having {
                        if let Some(sql) =
                            compile_leaf(&expr, cond.op, &cond.value, &mut having_params)?
                        {
                            having_sql.push(sql);
                        }
                    }
                    items.push((expr, alias.clone()));
                }
                ResultColumn::Relation { .. } => {}
            }
        }

        let mut injected = Vec::new();
        for alias in extra {
            if items.iter().any(|(_, a)| a == alias) {
                continue;
            }
            let (expr, out_alias) =
                render_select_column(self.registry, level_schema, alias, qualify)?;
            injected.push(out_alias.clone());
            items.push((expr, out_alias));
        }

        let having = if having_sql.is_empty() {
            None
        } else {
            Some(CompiledConditions {
                sql: having_sql.join(" AND "),
                params: having_params,
            })
        };
        Ok(ProjectionSql {
            items,
            injected,
            having,
        })
    }

    /// Render GROUP BY expressions.
    pub fn render_group_by(&self, group_by: &[String], qualify: bool) -> QueryResult<Vec<String>> {
        group_by
            .iter()
            .map(|reference| render_column(self.registry, self.root, reference, qualify))
            .collect()
    }

    /// Render ORDER BY entries; bare references matching an aggregate
    /// output alias order by that alias.
    pub fn render_order_by(
        &self,
        order_by: &[OrderBy],
        aggregate_aliases: &[String],
        qualify: bool,
    ) -> QueryResult<Vec<String>> {
        order_by
            .iter()
            .map(|entry| {
                let expr = if !entry.column.contains('.')
                    && aggregate_aliases.iter().any(|a| a == &entry.column)
                {
                    quote(&entry.column)
                } else {
                    render_column(self.registry, self.root, &entry.column, qualify)?
                };
                Ok(format!("{} {}", expr, entry.direction.sql()))
            })
            .collect()
    }

    /// Assemble a SELECT from rendered parts.
    #[allow(clippy::too_many_arguments)]
    pub fn build_select(
        &self,
        items: &[(String, String)],
        from: &str,
        where_: Option<&CompiledConditions>,
        group_by: &[String],
        having: Option<&CompiledConditions>,
        order_by: &[String],
        limit: Option<(u64, u64)>,
    ) -> Statement {
        let select_list = items
            .iter()
            .map(|(expr, alias)| format!("{} AS {}", expr, quote(alias)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {} FROM {}", select_list, from);
        let mut params = Vec::new();
        if let Some(where_) = where_ {
            sql.push_str(" WHERE ");
            sql.push_str(&where_.sql);
            params.extend(where_.params.iter().cloned());
        }
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }
        if let Some(having) = having {
            sql.push_str(" HAVING ");
            sql.push_str(&having.sql);
            params.extend(having.params.iter().cloned());
        }
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }
        if let Some((limit, offset)) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if offset > 0 {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
        Statement { sql, params }
    }

    /// COUNT for ungrouped queries: `COUNT(DISTINCT pk)` over the narrow
    /// join; composite keys wrap a `SELECT DISTINCT` subquery instead.
    pub fn build_distinct_count(
        &self,
        pk_exprs: &[String],
        from: &str,
        where_: Option<&CompiledConditions>,
    ) -> Statement {
        let params = where_.map(|w| w.params.clone()).unwrap_or_default();
        let where_sql = where_
            .map(|w| format!(" WHERE {}", w.sql))
            .unwrap_or_default();
        let sql = if pk_exprs.len() == 1 {
            format!(
                "SELECT COUNT(DISTINCT {}) FROM {}{}",
                pk_exprs[0], from, where_sql
            )
        } else {
            format!(
                "SELECT COUNT(*) FROM (SELECT DISTINCT {} FROM {}{}) AS \"cnt\"",
                pk_exprs.join(", "),
                from,
                where_sql
            )
        };
        Statement { sql, params }
    }

    /// COUNT for grouped queries: wrap the grouped+HAVING query and count
    /// its rows, since HAVING filters post-aggregation.
    pub fn build_grouped_count(&self, inner: Statement) -> Statement {
        Statement {
            sql: format!("SELECT COUNT(*) FROM ({}) AS \"cnt\"", inner.sql),
            params: inner.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::condition::{compile_conditions, ConditionContext};
    use crate::compile::join::{plan_joins, render_from};
    use crate::request::model::{ConditionNode, ConditionType, SortDirection};
    use crate::schema::fixtures::shop_registry;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> ResultSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_plain_select_single_table() {
        let registry = shop_registry();
        let builder = SqlBuilder::new(&registry, "order");
        let projection = builder
            .render_projection(
                &spec(json!({"columns": [
                    {"type": "column", "column": "id"},
                    {"type": "column", "column": "orderNo"}
                ]})),
                "order",
                false,
                &["id".to_string()],
            )
            .unwrap();
        // id was already projected, nothing to inject.
        assert!(projection.injected.is_empty());
        let stmt = builder.build_select(
            &projection.items,
            "\"t_order\" AS \"order\"",
            None,
            &[],
            None,
            &[],
            None,
        );
        assert_eq!(
            stmt.sql,
            "SELECT \"id\" AS \"id\", \"order_no\" AS \"orderNo\" FROM \"t_order\" AS \"order\""
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_injected_pk_tracked() {
        let registry = shop_registry();
        let builder = SqlBuilder::new(&registry, "order");
        let projection = builder
            .render_projection(
                &spec(json!({"columns": [{"type": "column", "column": "orderNo"}]})),
                "order",
                false,
                &["id".to_string()],
            )
            .unwrap();
        assert_eq!(projection.injected, vec!["id".to_string()]);
        assert_eq!(projection.items.len(), 2);
    }

    #[test]
    fn test_grouped_select_with_having() {
        let registry = shop_registry();
        let builder = SqlBuilder::new(&registry, "order");
        let projection = builder
            .render_projection(
                &spec(json!({"columns": [
                    {"type": "column", "column": "customerId"},
                    {"type": "aggregate", "alias": "total", "func": "sum", "column": "amount",
                     "having": [{"op": "gt", "value": 100}]}
                ]})),
                "order",
                false,
                &[],
            )
            .unwrap();
        let group_by = builder
            .render_group_by(&["customerId".to_string()], false)
            .unwrap();
        let stmt = builder.build_select(
            &projection.items,
            "\"t_order\" AS \"order\"",
            None,
            &group_by,
            projection.having.as_ref(),
            &[],
            None,
        );
        assert_eq!(
            stmt.sql,
            "SELECT \"customer_id\" AS \"customerId\", SUM(\"amount\") AS \"total\" \
             FROM \"t_order\" AS \"order\" GROUP BY \"customer_id\" HAVING SUM(\"amount\") > ?"
        );
        assert_eq!(stmt.params, vec![json!(100)]);
    }

    #[test]
    fn test_count_of_all_needs_no_column() {
        let registry = shop_registry();
        let builder = SqlBuilder::new(&registry, "order");
        let projection = builder
            .render_projection(
                &spec(json!({"columns": [
                    {"type": "aggregate", "alias": "n", "func": "count"}
                ]})),
                "order",
                false,
                &[],
            )
            .unwrap();
        assert_eq!(projection.items[0].0, "COUNT(*)");
    }

    #[test]
    fn test_where_then_having_param_order() {
        let registry = shop_registry();
        let builder = SqlBuilder::new(&registry, "order");
        let node = ConditionNode::Leaf {
            schema: None,
            column: "status".to_string(),
            op: ConditionType::Eq,
            value: json!(2),
        };
        let ctx = ConditionContext {
            registry: &registry,
            default_schema: "order",
            qualify: false,
        };
        let where_ = compile_conditions(&node, &ctx).unwrap();
        let projection = builder
            .render_projection(
                &spec(json!({"columns": [
                    {"type": "column", "column": "customerId"},
                    {"type": "aggregate", "alias": "total", "func": "sum", "column": "amount",
                     "having": [{"op": "gt", "value": 100}]}
                ]})),
                "order",
                false,
                &[],
            )
            .unwrap();
        let group_by = builder
            .render_group_by(&["customerId".to_string()], false)
            .unwrap();
        let stmt = builder.build_select(
            &projection.items,
            "\"t_order\" AS \"order\"",
            where_.as_ref(),
            &group_by,
            projection.having.as_ref(),
            &[],
            None,
        );
        assert_eq!(stmt.params, vec![json!(2), json!(100)]);
        assert!(stmt.sql.contains("WHERE \"status\" = ? GROUP BY"));
    }

    #[test]
    fn test_order_by_and_limit_rendering() {
        let registry = shop_registry();
        let builder = SqlBuilder::new(&registry, "order");
        let order_by = builder
            .render_order_by(
                &[
                    OrderBy {
                        column: "createdAt".to_string(),
                        direction: SortDirection::Desc,
                    },
                    OrderBy {
                        column: "total".to_string(),
                        direction: SortDirection::Asc,
                    },
                ],
                &["total".to_string()],
                false,
            )
            .unwrap();
        assert_eq!(order_by, vec!["\"created_at\" DESC", "\"total\" ASC"]);

        let stmt = builder.build_select(
            &[("\"id\"".to_string(), "id".to_string())],
            "\"t_order\" AS \"order\"",
            None,
            &[],
            None,
            &order_by,
            Some((20, 40)),
        );
        assert!(stmt
            .sql
            .ends_with("ORDER BY \"created_at\" DESC, \"total\" ASC LIMIT 20 OFFSET 40"));

        // Zero offset renders no OFFSET clause.
        let stmt = builder.build_select(
            &[("\"id\"".to_string(), "id".to_string())],
            "\"t_order\" AS \"order\"",
            None,
            &[],
            None,
            &[],
            Some((20, 0)),
        );
        assert!(stmt.sql.ends_with("LIMIT 20"));
    }

    #[test]
    fn test_distinct_count_single_and_composite() {
        let registry = shop_registry();
        let builder = SqlBuilder::new(&registry, "order");
        let stmt = builder.build_distinct_count(
            &["\"order\".\"id\"".to_string()],
            "\"t_order\" AS \"order\"",
            None,
        );
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(DISTINCT \"order\".\"id\") FROM \"t_order\" AS \"order\""
        );

        let stmt = builder.build_distinct_count(
            &["\"a\"".to_string(), "\"b\"".to_string()],
            "\"t\" AS \"t\"",
            None,
        );
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT \"a\", \"b\" FROM \"t\" AS \"t\") AS \"cnt\""
        );
    }

    #[test]
    fn test_grouped_count_wraps_subquery() {
        let registry = shop_registry();
        let builder = SqlBuilder::new(&registry, "order");
        let inner = Statement {
            sql: "SELECT \"customer_id\" FROM \"t_order\" GROUP BY \"customer_id\" HAVING SUM(\"amount\") > ?".to_string(),
            params: vec![json!(100)],
        };
        let stmt = builder.build_grouped_count(inner);
        assert!(stmt.sql.starts_with("SELECT COUNT(*) FROM (SELECT"));
        assert_eq!(stmt.params, vec![json!(100)]);
    }

    #[test]
    fn test_multi_table_from_render() {
        let registry = shop_registry();
        let touched = ["orderAddress".to_string()].into_iter().collect();
        let steps = plan_joins(&registry, "order", &touched).unwrap();
        let from = render_from(&registry, "order", &steps).unwrap();
        let builder = SqlBuilder::new(&registry, "order");
        let projection = builder
            .render_projection(
                &spec(json!({"columns": [{"type": "column", "column": "orderAddress.phone"}]})),
                "order",
                true,
                &[],
            )
            .unwrap();
        let stmt = builder.build_select(&projection.items, &from, None, &[], None, &[], None);
        assert_eq!(
            stmt.sql,
            "SELECT \"orderAddress\".\"phone\" AS \"phone\" FROM \"t_order\" AS \"order\" \
             LEFT JOIN \"t_order_address\" AS \"orderAddress\" ON \"order\".\"id\" = \"orderAddress\".\"order_id\""
        );
    }
}
