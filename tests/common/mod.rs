// Shared setup for engine integration tests: an in-memory SQLite store with
// a small shop model, plus a recording executor for asserting query shapes.
// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use nestql::error::QueryResult;
use nestql::exec::store::{RelationalExecutor, Row, SqliteExecutor};
use nestql::{EngineConfig, QueryEngine, SharedRegistry, StaticSchemas};

pub const SHOP_DDL: &str = "
    CREATE TABLE t_customer (
        id INTEGER PRIMARY KEY,
        name VARCHAR(64),
        level INTEGER
    );
    CREATE TABLE t_order (
        id INTEGER PRIMARY KEY,
        order_no VARCHAR(64),
        status INTEGER,
        amount REAL,
        customer_id INTEGER REFERENCES t_customer(id),
        created_at DATETIME
    );
    CREATE TABLE t_order_address (
        id INTEGER PRIMARY KEY,
        order_id INTEGER REFERENCES t_order(id),
        phone VARCHAR(32),
        city VARCHAR(64)
    );
    CREATE UNIQUE INDEX idx_address_order ON t_order_address(order_id);
    CREATE TABLE t_order_item (
        id INTEGER PRIMARY KEY,
        order_id INTEGER REFERENCES t_order(id),
        product_name VARCHAR(64),
        price REAL,
        quantity INTEGER
    );
";

pub const SHOP_SEED: &str = "
    INSERT INTO t_customer VALUES (1, 'Alice', 1), (2, 'Bob', 2);
    INSERT INTO t_order VALUES
        (1, 'A1001', 2, 150.0, 1, '2024-03-05 10:20:30'),
        (2, 'A1002', 1, 80.0,  1, '2024-03-06 11:00:00'),
        (3, 'B2001', 2, 300.0, 2, '2024-03-07 09:30:00');
    INSERT INTO t_order_address VALUES
        (1, 1, '555-0001', 'Paris'),
        (2, 3, '555-0003', 'Lyon');
    INSERT INTO t_order_item VALUES
        (1, 1, 'widget', 50.0, 1),
        (2, 1, 'gadget', 100.0, 1),
        (3, 2, 'widget', 80.0, 1),
        (4, 3, 'mega', 300.0, 1);
";

/// The same model pinned as static declarations, exercising the TOML path.
pub const SHOP_SCHEMA_TOML: &str = r#"
[[tables]]
name = "t_order"
alias = "order"

[[tables.columns]]
name = "id"
alias = "id"
primary_key = true
kind = "number"

[[tables.columns]]
name = "order_no"
alias = "orderNo"
kind = "string"
max_length = 64

[[tables.columns]]
name = "status"
alias = "status"
kind = "number"

[[tables.columns]]
name = "amount"
alias = "amount"
kind = "number"

[[tables.columns]]
name = "customer_id"
alias = "customerId"
kind = "number"

[[tables.columns]]
name = "created_at"
alias = "createdAt"
kind = "datetime"

[[tables]]
name = "t_customer"
alias = "customer"

[[tables.columns]]
name = "id"
alias = "id"
primary_key = true
kind = "number"

[[tables.columns]]
name = "name"
alias = "name"
kind = "string"

[[tables.columns]]
name = "level"
alias = "level"
kind = "number"

[[tables]]
name = "t_order_address"
alias = "orderAddress"

[[tables.columns]]
name = "id"
alias = "id"
primary_key = true
kind = "number"

[[tables.columns]]
name = "order_id"
alias = "orderId"
kind = "number"

[[tables.columns]]
name = "phone"
alias = "phone"
kind = "string"

[[tables.columns]]
name = "city"
alias = "city"
kind = "string"

[[tables]]
name = "t_order_item"
alias = "orderItem"

[[tables.columns]]
name = "id"
alias = "id"
primary_key = true
kind = "number"

[[tables.columns]]
name = "order_id"
alias = "orderId"
kind = "number"

[[tables.columns]]
name = "product_name"
alias = "productName"
kind = "string"

[[tables.columns]]
name = "price"
alias = "price"
kind = "number"

[[tables.columns]]
name = "quantity"
alias = "quantity"
kind = "number"

[[relations]]
owner_table = "orderAddress"
owner_column = "orderId"
related_table = "order"
related_column = "id"
owner_unique = true
related_unique = true

[[relations]]
owner_table = "orderItem"
owner_column = "orderId"
related_table = "order"
related_column = "id"
owner_unique = false
related_unique = true

[[relations]]
owner_table = "order"
owner_column = "customerId"
related_table = "customer"
related_column = "id"
owner_unique = false
related_unique = true
"#;

/// Route engine tracing through `RUST_LOG` during test runs.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn shop_store() -> Arc<SqliteExecutor> {
    init_tracing();
    let exec = SqliteExecutor::in_memory().expect("open sqlite");
    exec.execute_batch(SHOP_DDL).expect("create schema");
    exec.execute_batch(SHOP_SEED).expect("seed data");
    Arc::new(exec)
}

pub async fn shop_engine() -> QueryEngine {
    shop_engine_with(shop_store(), EngineConfig::default()).await
}

pub async fn shop_engine_with(
    executor: Arc<dyn RelationalExecutor>,
    config: EngineConfig,
) -> QueryEngine {
    let statics = StaticSchemas::from_toml_str(SHOP_SCHEMA_TOML).expect("valid schema toml");
    let registry = nestql::build_registry(&statics, executor.as_ref())
        .await
        .expect("build registry");
    QueryEngine::new(executor, SharedRegistry::new(registry), config)
}

/// Delegating executor that records every SQL statement it runs.
pub struct RecordingExecutor {
    inner: Arc<SqliteExecutor>,
    log: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new(inner: Arc<SqliteExecutor>) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

#[async_trait]
impl RelationalExecutor for RecordingExecutor {
    async fn query(&self, sql: &str, params: &[Value]) -> QueryResult<Vec<Row>> {
        self.log.lock().push(sql.to_string());
        self.inner.query(sql, params).await
    }

    async fn query_scalar(&self, sql: &str, params: &[Value]) -> QueryResult<i64> {
        self.log.lock().push(sql.to_string());
        self.inner.query_scalar(sql, params).await
    }
}
