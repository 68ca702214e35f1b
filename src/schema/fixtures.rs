//! Shared registry fixtures for unit tests: a small shop model with
//! one-to-one, one-to-many and many-to-one relations around `order`.

use super::model::{Column, ColumnKind, Relation, Table};
use super::registry::SchemaRegistry;

fn column(alias: &str, name: &str, kind: ColumnKind) -> Column {
    Column {
        name: name.to_string(),
        alias: alias.to_string(),
        description: String::new(),
        primary_key: false,
        kind,
        max_length: None,
    }
}

fn pk(alias: &str, name: &str) -> Column {
    Column {
        primary_key: true,
        ..column(alias, name, ColumnKind::Number)
    }
}

pub fn shop_tables() -> Vec<Table> {
    vec![
        Table {
            name: "t_order".to_string(),
            alias: "order".to_string(),
            description: "orders".to_string(),
            columns: vec![
                pk("id", "id"),
                column("orderNo", "order_no", ColumnKind::String),
                column("status", "status", ColumnKind::Number),
                column("amount", "amount", ColumnKind::Number),
                column("customerId", "customer_id", ColumnKind::Number),
                column("createdAt", "created_at", ColumnKind::DateTime),
                column("payload", "payload", ColumnKind::Other),
            ],
        },
        Table {
            name: "t_customer".to_string(),
            alias: "customer".to_string(),
            description: "customers".to_string(),
            columns: vec![
                pk("id", "id"),
                column("name", "name", ColumnKind::String),
                column("level", "level", ColumnKind::Number),
            ],
        },
        Table {
            name: "t_order_address".to_string(),
            alias: "orderAddress".to_string(),
            description: "shipping addresses".to_string(),
            columns: vec![
                pk("id", "id"),
                column("orderId", "order_id", ColumnKind::Number),
                column("phone", "phone", ColumnKind::String),
                column("city", "city", ColumnKind::String),
            ],
        },
        Table {
            name: "t_order_item".to_string(),
            alias: "orderItem".to_string(),
            description: "order lines".to_string(),
            columns: vec![
                pk("id", "id"),
                column("orderId", "order_id", ColumnKind::Number),
                column("productName", "product_name", ColumnKind::String),
                column("price", "price", ColumnKind::Number),
                column("quantity", "quantity", ColumnKind::Number),
            ],
        },
    ]
}

pub fn shop_relations() -> Vec<Relation> {
    vec![
        // One address per order.
        Relation {
            owner_table: "orderAddress".to_string(),
            owner_column: "orderId".to_string(),
            related_table: "order".to_string(),
            related_column: "id".to_string(),
            owner_unique: true,
            related_unique: true,
        },
        // Many items per order.
        Relation {
            owner_table: "orderItem".to_string(),
            owner_column: "orderId".to_string(),
            related_table: "order".to_string(),
            related_column: "id".to_string(),
            owner_unique: false,
            related_unique: true,
        },
        // Many orders per customer.
        Relation {
            owner_table: "order".to_string(),
            owner_column: "customerId".to_string(),
            related_table: "customer".to_string(),
            related_column: "id".to_string(),
            owner_unique: false,
            related_unique: true,
        },
    ]
}

pub fn shop_registry() -> SchemaRegistry {
    SchemaRegistry::new(shop_tables(), shop_relations()).expect("valid fixture registry")
}
