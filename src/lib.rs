pub mod compile;
pub mod config;
pub mod error;
pub mod exec;
pub mod request;
pub mod schema;

pub use config::EngineConfig;
pub use error::{QueryError, QueryResult};
pub use exec::{QueryEngine, QueryOutput, RelationalExecutor, Row, SqliteExecutor};
pub use request::{QueryRequest, ResultShape};
pub use schema::{build_registry, SchemaRegistry, SharedRegistry, StaticSchemas};
