pub mod assemble;
pub mod engine;
pub mod store;

pub use engine::{QueryEngine, QueryOutput};
pub use store::{RelationalExecutor, Row, SqliteExecutor};
