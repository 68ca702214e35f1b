//! The relational store boundary.
//!
//! The engine only ever hands the store a SQL string plus an ordered bound
//! parameter list; values are never interpolated into SQL text. Rows come
//! back as ordered column-alias -> value maps.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, ToSql};
use serde_json::{Number, Value};

use crate::error::QueryResult;

/// One result row: ordered column-alias -> value map.
pub type Row = serde_json::Map<String, Value>;

/// Executes parameterized read queries against a relational store.
///
/// Timeouts, cancellation and connection management belong to the
/// implementation; the engine performs no retry of its own.
#[async_trait]
pub trait RelationalExecutor: Send + Sync {
    /// Run a read query, returning all rows.
    async fn query(&self, sql: &str, params: &[Value]) -> QueryResult<Vec<Row>>;

    /// Run a count-style query returning a single scalar.
    async fn query_scalar(&self, sql: &str, params: &[Value]) -> QueryResult<i64>;
}

/// Bound-parameter adapter from JSON values to SQLite values.
struct SqlParam<'a>(&'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(*b as i64)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ToSqlOutput::Owned(SqlValue::Integer(i))
                } else {
                    ToSqlOutput::Owned(SqlValue::Real(n.as_f64().unwrap_or(0.0)))
                }
            }
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            other => ToSqlOutput::Owned(SqlValue::Text(other.to_string())),
        })
    }
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// SQLite-backed executor.
///
/// The connection is guarded by a mutex; each request issues its queries
/// sequentially, so there is nothing to pipeline.
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open an in-memory database; used by tests and demos.
    pub fn in_memory() -> QueryResult<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    pub fn open(path: &str) -> QueryResult<Self> {
        Ok(Self::new(Connection::open(path)?))
    }

    /// Run arbitrary setup statements (DDL, seed data).
    pub fn execute_batch(&self, sql: &str) -> QueryResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> QueryResult<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(SqlParam)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                record.insert(name.clone(), read_value(row.get_ref(i)?));
            }
            out.push(record);
        }
        Ok(out)
    }
}

#[async_trait]
impl RelationalExecutor for SqliteExecutor {
    async fn query(&self, sql: &str, params: &[Value]) -> QueryResult<Vec<Row>> {
        tracing::debug!(sql = %sql, params = params.len(), "executing query");
        self.run_query(sql, params)
    }

    async fn query_scalar(&self, sql: &str, params: &[Value]) -> QueryResult<i64> {
        tracing::debug!(sql = %sql, params = params.len(), "executing count query");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let value = stmt.query_row(
            rusqlite::params_from_iter(params.iter().map(SqlParam)),
            |row| row.get::<_, i64>(0),
        )?;
        Ok(value)
    }
}

impl std::fmt::Debug for SqliteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteExecutor").finish_non_exhaustive()
    }
}
