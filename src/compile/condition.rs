//! Compiles condition trees into SQL fragments plus bound parameters.
//!
//! Each operator owns one pure compilation rule. Values always become bound
//! parameters; SQL text never embeds user input. Leaves that degenerate to
//! nothing (an `in` over an empty or all-null array, a `between` with both
//! endpoints absent) are elided entirely, and group joining filters them out
//! so the emitted WHERE never contains orphaned operators or empty
//! parentheses.

use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::request::model::{ConditionNode, ConditionType};
use crate::schema::registry::SchemaRegistry;

use super::render::render_column;

/// A compiled condition tree: SQL text plus its ordered bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledConditions {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Rendering context for column references inside conditions.
pub struct ConditionContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub default_schema: &'a str,
    /// Qualify column references with their table alias; required once more
    /// than one table participates in the join.
    pub qualify: bool,
}

/// Compile a whole tree. `None` means every leaf was elided and no WHERE
/// clause should be emitted.
pub fn compile_conditions(
    node: &ConditionNode,
    ctx: &ConditionContext<'_>,
) -> QueryResult<Option<CompiledConditions>> {
    let mut params = Vec::new();
    match compile_node(node, ctx.default_schema, ctx, &mut params)? {
        Some(fragment) => Ok(Some(CompiledConditions {
            sql: fragment.sql,
            params,
        })),
        None => Ok(None),
    }
}

struct Fragment {
    sql: String,
    /// Number of live fragments joined at this node; >1 means the fragment
    /// needs parentheses when embedded in a parent group.
    members: usize,
}

fn compile_node(
    node: &ConditionNode,
    inherited_schema: &str,
    ctx: &ConditionContext<'_>,
    params: &mut Vec<Value>,
) -> QueryResult<Option<Fragment>> {
    match node {
        ConditionNode::Leaf {
            schema,
            column,
            op,
            value,
        } => {
            let schema_alias = schema.as_deref().unwrap_or(inherited_schema);
            let rendered = render_column(ctx.registry, schema_alias, column, ctx.qualify)?;
            Ok(compile_leaf(&rendered, *op, value, params)?.map(|sql| Fragment { sql, members: 1 }))
        }
        ConditionNode::Group {
            schema,
            logic,
            children,
        } => {
            let schema_alias = schema.as_deref().unwrap_or(inherited_schema);
            let mut live = Vec::new();
            for child in children {
                if let Some(fragment) = compile_node(child, schema_alias, ctx, params)? {
                    live.push(fragment);
                }
            }
            if live.is_empty() {
                return Ok(None);
            }
            let members = live.len();
            let joined = live
                .into_iter()
                .map(|f| {
                    if f.members > 1 {
                        format!("({})", f.sql)
                    } else {
                        f.sql
                    }
                })
                .collect::<Vec<_>>()
                .join(&format!(" {} ", logic.sql()));
            Ok(Some(Fragment {
                sql: joined,
                members,
            }))
        }
    }
}

/// Compile a single leaf against an already-rendered column reference.
///
/// Returns `Ok(None)` when the leaf compiles to nothing.
pub fn compile_leaf(
    column: &str,
    op: ConditionType,
    value: &Value,
    params: &mut Vec<Value>,
) -> QueryResult<Option<String>> {
    use ConditionType::*;
    let sql = match op {
        IsNull => format!("{column} IS NULL"),
        NotNull => format!("{column} IS NOT NULL"),
        Eq | Ne | Gt | Gte | Lt | Lte => {
            let cmp = match op {
                Eq => "=",
                Ne => "<>",
                Gt => ">",
                Gte => ">=",
                Lt => "<",
                Lte => "<=",
                _ => unreachable!(),
            };
            params.push(value.clone());
            format!("{column} {cmp} ?")
        }
        In | NotIn => {
            let items: Vec<&Value> = value
                .as_array()
                .map(|a| a.iter().filter(|v| !v.is_null()).collect())
                .unwrap_or_default();
            if items.is_empty() {
                // Degenerate but valid: contributes nothing.
                return Ok(None);
            }
            params.extend(items.iter().map(|v| (*v).clone()));
            let holes = vec!["?"; items.len()].join(", ");
            let keyword = if op == NotIn { "NOT IN" } else { "IN" };
            format!("{column} {keyword} ({holes})")
        }
        Between => {
            let empty = Vec::new();
            let items = value.as_array().unwrap_or(&empty);
            let low = items.first().filter(|v| !v.is_null());
            let high = items.get(1).filter(|v| !v.is_null());
            match (low, high) {
                (None, None) => return Ok(None),
                (Some(low), None) => {
                    params.push(low.clone());
                    format!("{column} >= ?")
                }
                (None, Some(high)) => {
                    params.push(high.clone());
                    format!("{column} <= ?")
                }
                (Some(low), Some(high)) => {
                    params.push(low.clone());
                    params.push(high.clone());
                    // Self-parenthesized so OR groups cannot split the pair.
                    format!("({column} >= ? AND {column} <= ?)")
                }
            }
        }
        Like | LikePrefix | LikeSuffix | NotLike => {
            let needle = escape_like(&like_text(value)?);
            let pattern = match op {
                LikePrefix => format!("{needle}%"),
                LikeSuffix => format!("%{needle}"),
                _ => format!("%{needle}%"),
            };
            params.push(Value::String(pattern));
            let keyword = if op == NotLike { "NOT LIKE" } else { "LIKE" };
            format!("{column} {keyword} ? ESCAPE '\\'")
        }
    };
    Ok(Some(sql))
}

fn like_text(value: &Value) -> QueryResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(QueryError::BadRequest(format!(
            "LIKE value must be text, got {other}"
        ))),
    }
}

/// Escape LIKE metacharacters so the user's text matches literally.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch == '%' || ch == '_' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
