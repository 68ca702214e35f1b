//! The query engine: strategy selection and execution.
//!
//! Per request, exactly one of these strategies runs:
//! 1. no paging, object shape: single-row query;
//! 2. no paging, list shape: unbounded list;
//! 3. paging with counting suppressed: direct LIMIT/OFFSET, no COUNT;
//! 4. paging with count: COUNT first, then either the direct wide query or,
//!    past the deep-page threshold, an id-first narrow pass followed by a
//!    wide IN-list fetch.
//!
//! All store round-trips within a request are sequential; later queries
//! depend on earlier results.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::compile::condition::{compile_conditions, CompiledConditions, ConditionContext};
use crate::compile::join::{plan_joins, render_from};
use crate::compile::render::quote;
use crate::compile::sql::{SqlBuilder, Statement};
use crate::config::EngineConfig;
use crate::error::QueryResult;
use crate::request::model::{Page, QueryRequest, ResultColumn, ResultShape};
use crate::request::validate::{validate, ValidatedRequest};
use crate::schema::registry::{SchemaRegistry, SharedRegistry};

use super::assemble::assemble_rows;
use super::store::{RelationalExecutor, Row};

/// Final result value, mirroring the requested shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Object(Row),
    List(Vec<Row>),
    Paged { count: i64, list: Vec<Row> },
}

pub struct QueryEngine {
    executor: Arc<dyn RelationalExecutor>,
    registry: SharedRegistry,
    config: EngineConfig,
}

/// Per-request compiled pieces shared by the strategies.
struct CompiledRequest<'a> {
    registry: &'a SchemaRegistry,
    validated: &'a ValidatedRequest,
    from_narrow: String,
    from_wide: String,
    where_narrow: Option<CompiledConditions>,
    where_wide: Option<CompiledConditions>,
    items: Vec<(String, String)>,
    injected: Vec<String>,
    having: Option<CompiledConditions>,
    group_by: Vec<String>,
    order_by_narrow: Vec<String>,
    order_by_wide: Vec<String>,
    /// (qualified expr, output alias) per root primary-key column, for the
    /// narrow join.
    pk_narrow: Vec<(String, String)>,
    qualify_wide: bool,
}

impl QueryEngine {
    pub fn new(
        executor: Arc<dyn RelationalExecutor>,
        registry: SharedRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor,
            registry,
            config,
        }
    }

    /// Validate, compile and execute one request.
    pub async fn execute(&self, request: &QueryRequest) -> QueryResult<QueryOutput> {
        let registry = self.registry.load();
        let validated = validate(request, &registry)?;
        let compiled = self.compile(request, &registry, &validated)?;

        match (&request.param.page, request.shape) {
            (None, ResultShape::Object) => self.run_object(request, &compiled).await,
            (None, ResultShape::List) => self.run_list(request, &compiled).await,
            (Some(page), _) => {
                let page = self.clamp(*page);
                if page.count {
                    self.run_counted_page(request, &compiled, page).await
                } else {
                    self.run_uncounted_page(request, &compiled, page).await
                }
            }
        }
    }

    fn clamp(&self, mut page: Page) -> Page {
        if page.limit > self.config.max_page_limit {
            tracing::warn!(
                requested = page.limit,
                max = self.config.max_page_limit,
                "page limit clamped"
            );
            page.limit = self.config.max_page_limit;
        }
        page
    }

    fn compile<'a>(
        &self,
        request: &QueryRequest,
        registry: &'a SchemaRegistry,
        validated: &'a ValidatedRequest,
    ) -> QueryResult<CompiledRequest<'a>> {
        let builder = SqlBuilder::new(registry, &validated.root);
        let narrow_steps = plan_joins(registry, &validated.root, &validated.narrow_tables())?;
        let wide_steps = plan_joins(registry, &validated.root, &validated.wide_tables())?;
        let qualify_narrow = !narrow_steps.is_empty();
        let qualify_wide = !wide_steps.is_empty();

        let from_narrow = render_from(registry, &validated.root, &narrow_steps)?;
        let from_wide = render_from(registry, &validated.root, &wide_steps)?;

        let compile_where = |qualify: bool| -> QueryResult<Option<CompiledConditions>> {
            match &request.param.conditions {
                Some(node) => compile_conditions(
                    node,
                    &ConditionContext {
                        registry,
                        default_schema: &validated.root,
                        qualify,
                    },
                ),
                None => Ok(None),
            }
        };
        let where_narrow = compile_where(qualify_narrow)?;
        let where_wide = compile_where(qualify_wide)?;

        // The SELECT always carries the root primary key plus any nested
        // relation join keys; assembly strips the ones nobody asked for.
        let root_table = registry.require_table(&validated.root)?;
        let mut extras: Vec<String> = root_table
            .primary_key()
            .iter()
            .map(|c| c.alias.clone())
            .collect();
        for column in &request.result.columns {
            if let ResultColumn::Relation { result, .. } = column {
                let child = result.schema.as_deref().unwrap_or_default();
                let relation = registry.require_relation(&validated.root, child)?;
                let (parent_col, _) = relation.join_columns_from(&validated.root);
                if !extras.iter().any(|e| e == parent_col) {
                    extras.push(parent_col.to_string());
                }
            }
        }

        let projection =
            builder.render_projection(&request.result, &validated.root, qualify_wide, &extras)?;

        let aggregate_aliases: Vec<String> = request
            .result
            .columns
            .iter()
            .filter_map(|c| match c {
                ResultColumn::Aggregate { alias, .. } => Some(alias.clone()),
                _ => None,
            })
            .collect();

        let group_by = if validated.mixed_projection() {
            builder.render_group_by(&request.param.group_by, qualify_wide)?
        } else {
            Vec::new()
        };
        let order_by_narrow =
            builder.render_order_by(&request.param.order_by, &aggregate_aliases, qualify_narrow)?;
        let order_by_wide =
            builder.render_order_by(&request.param.order_by, &aggregate_aliases, qualify_wide)?;

        let pk_narrow = root_table
            .primary_key()
            .iter()
            .map(|c| {
                let expr = if qualify_narrow {
                    format!("{}.{}", quote(&validated.root), quote(&c.name))
                } else {
                    quote(&c.name)
                };
                (expr, c.alias.clone())
            })
            .collect();

        Ok(CompiledRequest {
            registry,
            validated,
            from_narrow,
            from_wide,
            where_narrow,
            where_wide,
            items: projection.items,
            injected: projection.injected,
            having: projection.having,
            group_by,
            order_by_narrow,
            order_by_wide,
            pk_narrow,
            qualify_wide,
        })
    }

    fn wide_statement(&self, c: &CompiledRequest<'_>, limit: Option<(u64, u64)>) -> Statement {
        let builder = SqlBuilder::new(c.registry, &c.validated.root);
        builder.build_select(
            &c.items,
            &c.from_wide,
            c.where_wide.as_ref(),
            &c.group_by,
            c.having.as_ref(),
            &c.order_by_wide,
            limit,
        )
    }

    async fn fetch_and_assemble(
        &self,
        request: &QueryRequest,
        c: &CompiledRequest<'_>,
        stmt: Statement,
    ) -> QueryResult<Vec<Row>> {
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "running primary query");
        let rows = self.executor.query(&stmt.sql, &stmt.params).await?;
        assemble_rows(
            self.executor.as_ref(),
            c.registry,
            &self.config,
            &request.result,
            &c.validated.root,
            rows,
            &c.injected,
        )
        .await
    }

    async fn run_object(
        &self,
        request: &QueryRequest,
        c: &CompiledRequest<'_>,
    ) -> QueryResult<QueryOutput> {
        let stmt = self.wide_statement(c, Some((1, 0)));
        let rows = self.fetch_and_assemble(request, c, stmt).await?;
        // No match degrades to an empty object, not an error.
        Ok(QueryOutput::Object(
            rows.into_iter().next().unwrap_or_default(),
        ))
    }

    async fn run_list(
        &self,
        request: &QueryRequest,
        c: &CompiledRequest<'_>,
    ) -> QueryResult<QueryOutput> {
        let stmt = self.wide_statement(c, None);
        Ok(QueryOutput::List(
            self.fetch_and_assemble(request, c, stmt).await?,
        ))
    }

    async fn run_uncounted_page(
        &self,
        request: &QueryRequest,
        c: &CompiledRequest<'_>,
        page: Page,
    ) -> QueryResult<QueryOutput> {
        let stmt = self.wide_statement(c, Some((page.limit, page.offset())));
        Ok(QueryOutput::List(
            self.fetch_and_assemble(request, c, stmt).await?,
        ))
    }

    async fn run_counted_page(
        &self,
        request: &QueryRequest,
        c: &CompiledRequest<'_>,
        page: Page,
    ) -> QueryResult<QueryOutput> {
        let count = self.run_count(c).await?;
        let offset = page.offset();
        if count == 0 || offset >= count as u64 {
            return Ok(QueryOutput::Paged {
                count,
                list: Vec::new(),
            });
        }

        let deep = !c.validated.has_aggregate
            && c.pk_narrow.len() == 1
            && offset > self.config.deep_page_threshold;
        let rows = if deep {
            tracing::debug!(offset, threshold = self.config.deep_page_threshold, "deep page, using id-first strategy");
            self.run_deep_page(request, c, page).await?
        } else {
            let stmt = self.wide_statement(c, Some((page.limit, offset)));
            self.fetch_and_assemble(request, c, stmt).await?
        };
        Ok(QueryOutput::Paged { count, list: rows })
    }

    async fn run_count(&self, c: &CompiledRequest<'_>) -> QueryResult<i64> {
        let builder = SqlBuilder::new(c.registry, &c.validated.root);
        let stmt = if c.validated.has_aggregate {
            // HAVING filters post-aggregation: count the grouped rows.
            let inner = builder.build_select(
                &c.items,
                &c.from_wide,
                c.where_wide.as_ref(),
                &c.group_by,
                c.having.as_ref(),
                &[],
                None,
            );
            builder.build_grouped_count(inner)
        } else if c.pk_narrow.is_empty() {
            let params = c
                .where_narrow
                .as_ref()
                .map(|w| w.params.clone())
                .unwrap_or_default();
            let where_sql = c
                .where_narrow
                .as_ref()
                .map(|w| format!(" WHERE {}", w.sql))
                .unwrap_or_default();
            Statement {
                sql: format!("SELECT COUNT(*) FROM {}{}", c.from_narrow, where_sql),
                params,
            }
        } else {
            let pk_exprs: Vec<String> = c.pk_narrow.iter().map(|(e, _)| e.clone()).collect();
            builder.build_distinct_count(&pk_exprs, &c.from_narrow, c.where_narrow.as_ref())
        };
        tracing::debug!(sql = %stmt.sql, "running count query");
        self.executor.query_scalar(&stmt.sql, &stmt.params).await
    }

    /// Id-first deep pagination: page primary keys over the narrow join,
    /// then fetch the wide projection bounded by an IN list instead of a
    /// large OFFSET.
    async fn run_deep_page(
        &self,
        request: &QueryRequest,
        c: &CompiledRequest<'_>,
        page: Page,
    ) -> QueryResult<Vec<Row>> {
        let builder = SqlBuilder::new(c.registry, &c.validated.root);
        let id_stmt = builder.build_select(
            &c.pk_narrow,
            &c.from_narrow,
            c.where_narrow.as_ref(),
            &[],
            None,
            &c.order_by_narrow,
            Some((page.limit, page.offset())),
        );
        tracing::debug!(sql = %id_stmt.sql, "running id-first query");
        let id_rows = self.executor.query(&id_stmt.sql, &id_stmt.params).await?;
        if id_rows.is_empty() {
            return Ok(Vec::new());
        }
        let pk_alias = &c.pk_narrow[0].1;
        let ids: Vec<Value> = id_rows
            .iter()
            .filter_map(|row| row.get(pk_alias.as_str()).cloned())
            .collect();

        let root_table = c.registry.require_table(&c.validated.root)?;
        let pk_column = root_table.primary_key()[0];
        let pk_expr = if c.qualify_wide {
            format!("{}.{}", quote(&c.validated.root), quote(&pk_column.name))
        } else {
            quote(&pk_column.name)
        };
        let holes = vec!["?"; ids.len()].join(", ");
        let in_sql = format!("{pk_expr} IN ({holes})");
        let combined = match &c.where_wide {
            Some(where_wide) => CompiledConditions {
                sql: format!("{} AND {}", where_wide.sql, in_sql),
                params: where_wide
                    .params
                    .iter()
                    .cloned()
                    .chain(ids.iter().cloned())
                    .collect(),
            },
            None => CompiledConditions {
                sql: in_sql,
                params: ids.clone(),
            },
        };
        // The IN list does not preserve order, so ORDER BY rides along.
        let stmt = builder.build_select(
            &c.items,
            &c.from_wide,
            Some(&combined),
            &c.group_by,
            c.having.as_ref(),
            &c.order_by_wide,
            None,
        );
        self.fetch_and_assemble(request, c, stmt).await
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
