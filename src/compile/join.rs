//! Join planning over the relation graph.
//!
//! Walks outward from the root: every touched table must be reachable via
//! exactly one direct relation edge from a table already in the plan. There
//! is no multi-hop path discovery; a needed intermediate table has to be
//! touched explicitly by the request.

use std::collections::BTreeSet;

use crate::error::{QueryError, QueryResult};
use crate::schema::model::RelationKind;
use crate::schema::registry::SchemaRegistry;

use super::render::quote;

/// One planned join: `LEFT JOIN child ON master.col = child.col`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    /// Alias of the already-included side.
    pub master: String,
    /// Alias of the newly joined table.
    pub child: String,
    /// Physical column name on the master side.
    pub master_column: String,
    /// Physical column name on the child side.
    pub child_column: String,
    /// Cardinality master -> child.
    pub kind: RelationKind,
}

/// Plan an ordered join chain covering `touched` (root excluded).
pub fn plan_joins(
    registry: &SchemaRegistry,
    root: &str,
    touched: &BTreeSet<String>,
) -> QueryResult<Vec<JoinStep>> {
    let mut included: Vec<String> = vec![root.to_string()];
    let mut remaining: BTreeSet<String> = touched.clone();
    remaining.remove(root);
    let mut steps = Vec::new();

    while !remaining.is_empty() {
        let mut picked = None;
        'scan: for candidate in &remaining {
            for master in &included {
                if let Some(relation) = registry.relation_between(master, candidate) {
                    let (master_col_alias, child_col_alias) = relation.join_columns_from(master);
                    let master_table = registry.require_table(master)?;
                    let child_table = registry.require_table(candidate)?;
                    let master_column = registry
                        .require_column(master_table, master_col_alias)?
                        .name
                        .clone();
                    let child_column = registry
                        .require_column(child_table, child_col_alias)?
                        .name
                        .clone();
                    picked = Some(JoinStep {
                        master: master.clone(),
                        child: candidate.clone(),
                        master_column,
                        child_column,
                        kind: relation.kind_from(master),
                    });
                    break 'scan;
                }
            }
        }
        match picked {
            Some(step) => {
                remaining.remove(&step.child);
                included.push(step.child.clone());
                steps.push(step);
            }
            None => {
                let stuck = remaining.iter().next().cloned().unwrap_or_default();
                return Err(QueryError::RelationNotFound(root.to_string(), stuck));
            }
        }
    }
    Ok(steps)
}

/// Render the FROM clause plus the planned joins.
pub fn render_from(registry: &SchemaRegistry, root: &str, steps: &[JoinStep]) -> QueryResult<String> {
    let root_table = registry.require_table(root)?;
    let mut sql = format!("{} AS {}", quote(&root_table.name), quote(&root_table.alias));
    for step in steps {
        let child_table = registry.require_table(&step.child)?;
        sql.push_str(&format!(
            " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
            quote(&child_table.name),
            quote(&child_table.alias),
            quote(&step.master),
            quote(&step.master_column),
            quote(&step.child),
            quote(&step.child_column),
        ));
    }
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::shop_registry;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_touched_set_plans_nothing() {
        let registry = shop_registry();
        let steps = plan_joins(&registry, "order", &set(&[])).unwrap();
        assert!(steps.is_empty());
        let from = render_from(&registry, "order", &steps).unwrap();
        assert_eq!(from, "\"t_order\" AS \"order\"");
    }

    #[test]
    fn test_single_join() {
        let registry = shop_registry();
        let steps = plan_joins(&registry, "order", &set(&["orderAddress"])).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].master, "order");
        assert_eq!(steps[0].child, "orderAddress");
        assert_eq!(steps[0].master_column, "id");
        assert_eq!(steps[0].child_column, "order_id");
        assert_eq!(steps[0].kind, RelationKind::OneToOne);

        let from = render_from(&registry, "order", &steps).unwrap();
        assert_eq!(
            from,
            "\"t_order\" AS \"order\" LEFT JOIN \"t_order_address\" AS \"orderAddress\" \
             ON \"order\".\"id\" = \"orderAddress\".\"order_id\""
        );
    }

    #[test]
    fn test_multiple_joins_ordered_from_root() {
        let registry = shop_registry();
        let steps =
            plan_joins(&registry, "order", &set(&["customer", "orderItem"])).unwrap();
        assert_eq!(steps.len(), 2);
        for step in &steps {
            assert_eq!(step.master, "order");
        }
        let children: BTreeSet<&str> = steps.iter().map(|s| s.child.as_str()).collect();
        assert_eq!(children, ["customer", "orderItem"].into_iter().collect());
    }

    #[test]
    fn test_unreachable_table_fails() {
        let registry = shop_registry();
        // customer relates to order, not to orderAddress; from root customer
        // the address is two hops away and must be rejected.
        let err = plan_joins(&registry, "customer", &set(&["orderAddress"])).unwrap_err();
        assert!(matches!(err, QueryError::RelationNotFound(_, _)));
    }

    #[test]
    fn test_chained_reachability() {
        let registry = shop_registry();
        // customer -> order -> orderAddress works when order is touched too.
        let steps =
            plan_joins(&registry, "customer", &set(&["order", "orderAddress"])).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].child, "order");
        assert_eq!(steps[1].master, "order");
        assert_eq!(steps[1].child, "orderAddress");
    }
}
