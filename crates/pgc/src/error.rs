//! Error types for pgc.
//!
//! ## Error classification
//!
//! - [`Model`](PgcError::Model) and [`Query`](PgcError::Query) mean the caller
//!   holds a programming bug (a record shape the layer cannot map, or a
//!   misused query option). Nothing has touched the database.
//! - [`Db`](PgcError::Db) carries the driver error; the SQLSTATE is available
//!   through [`sqlstate`](PgcError::sqlstate) and the three predicates below.
//! - A SELECT that finds no row is **not** an error: `get` returns
//!   `Ok(false)` and `select` returns an empty Vec.

use thiserror::Error;

/// Result type alias for pgc operations.
pub type PgcResult<T> = Result<T, PgcError>;

/// SQLSTATE: relation does not exist.
pub const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";
/// SQLSTATE: relation already exists.
pub const SQLSTATE_DUPLICATE_TABLE: &str = "42P07";
/// SQLSTATE: unique constraint violation.
pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

/// Error type for pgc operations.
#[derive(Debug, Error)]
pub enum PgcError {
    /// A record shape the type model cannot represent.
    #[error("model error: {0}")]
    Model(String),

    /// Query-option misuse; no state was mutated.
    #[error("query error: {0}")]
    Query(String),

    /// Driver error, carrying the PostgreSQL SQLSTATE where present.
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    /// Row decode/mapping error (schema drift or type mismatch).
    #[error("decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Connection configuration error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Pool exhaustion or misconfiguration.
    #[error("pool error: {0}")]
    Pool(String),

    /// Migration registration or execution error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Filesystem error (migration files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PgcError {
    /// Create a model construction error.
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model(message.into())
    }

    /// Create a query-build error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Create a decode error for a specific column.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a migration error.
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration(message.into())
    }

    /// The PostgreSQL SQLSTATE code, if this error came from the database.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Db(e) => e.as_db_error().map(|db| db.code().code()),
            _ => None,
        }
    }

    /// Whether this is a unique constraint violation (SQLSTATE 23505).
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate() == Some(SQLSTATE_UNIQUE_VIOLATION)
    }

    /// Whether this is a "relation already exists" error (SQLSTATE 42P07).
    pub fn is_table_exists(&self) -> bool {
        self.sqlstate() == Some(SQLSTATE_DUPLICATE_TABLE)
    }

    /// Whether this is a "relation does not exist" error (SQLSTATE 42P01).
    pub fn is_undefined_table(&self) -> bool {
        self.sqlstate() == Some(SQLSTATE_UNDEFINED_TABLE)
    }
}

impl From<deadpool_postgres::PoolError> for PgcError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
