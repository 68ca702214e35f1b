use thiserror::Error;

/// Errors raised while validating, compiling or executing a query request.
///
/// Everything up to `Execution` is a caller-correctable request error raised
/// before any SQL runs. `Execution` wraps failures from the relational store
/// and propagates unchanged; the engine never retries and never returns a
/// partially assembled result.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Schema '{0}' not found")]
    SchemaNotFound(String),

    #[error("Column '{column}' not found in schema '{schema}'")]
    ColumnNotFound { schema: String, column: String },

    #[error("No relation between '{0}' and '{1}'")]
    RelationNotFound(String, String),

    #[error("Condition '{condition}' is not allowed on {kind} column '{column}'")]
    IllegalCondition {
        condition: String,
        kind: String,
        column: String,
    },

    #[error("Duplicate output key '{0}'")]
    DuplicateOutputKey(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid aggregate: {0}")]
    InvalidAggregate(String),

    #[error("Schema bootstrap failed: {0}")]
    BootstrapError(String),

    #[error("Query execution error: {0}")]
    Execution(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type QueryResult<T> = Result<T, QueryError>;

impl serde::Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Execution(err.to_string())
    }
}

impl QueryError {
    /// True for errors the caller can fix by correcting the request.
    pub fn is_request_error(&self) -> bool {
        !matches!(self, QueryError::Execution(_) | QueryError::Json(_))
    }
}
