//! # pgc
//!
//! A lightweight data-access layer over PostgreSQL. Not a general ORM: a
//! record type maps onto exactly one table, and a small query-option
//! vocabulary composes the SQL. Schema, CRUD statements and row
//! materialization are all derived from the record type.
//!
//! - **Derived table model**: `#[derive(Record)]` turns a struct into a
//!   table description - column types, primary key, join slots - cached
//!   process-wide on first use.
//! - **Composable queries**: functional options (`equal`, `in_list`, `or`,
//!   `order`, `limit`, `join`, ...) build a parameterized query; whole-table
//!   writes must be spelled out with `all()`.
//! - **Join materialization**: left-joined child rows are fused back into
//!   their parents, one-to-many slots included.
//! - **Migrations**: `.sql` files named by timestamp, applied and rolled
//!   back transactionally, tracked in bookkeeping tables.
//!
//! ```ignore
//! use pgc::{query as q, Adapter, PoolClient, Record};
//!
//! #[derive(Debug, Clone, Default, Record)]
//! struct Blog {
//!     id: String,
//!     name: String,
//!     descr: String,
//! }
//!
//! # async fn demo(pool: &deadpool_postgres::Pool) -> pgc::PgcResult<()> {
//! let adapter = Adapter::new(PoolClient::acquire(pool).await?);
//! adapter.create_table::<Blog>().await?;
//! adapter.insert(&[Blog { id: "b1".into(), name: "first".into(), descr: String::new() }]).await?;
//!
//! let blogs: Vec<Blog> = adapter
//!     .select(vec![q::equal("name", "first"), q::limit(10)])
//!     .await?;
//! # Ok(()) }
//! ```

// The derive macro emits `::pgc::` paths; make them resolve in this crate's
// own tests and bookkeeping records too.
extern crate self as pgc;

mod adapter;
mod client;
mod error;
mod model;
mod pool;
pub mod query;
mod record;
mod sql;

pub mod migrate;

pub use adapter::{begin, Adapter, MigrationAdapter, SetMap, TxAdapter, LIMIT_INSERT};
pub use client::GenericClient;
pub use error::{
    PgcError, PgcResult, SQLSTATE_DUPLICATE_TABLE, SQLSTATE_UNDEFINED_TABLE,
    SQLSTATE_UNIQUE_VIOLATION,
};
pub use model::{
    describe, make_order_by, parse_name, qualified_column, FieldDescriptor, FieldKind, FieldSpec,
    JoinSpec, TypeModel,
};
pub use pool::{
    create_pool, create_pool_with_url, Config, PoolClient, DEFAULT_MAX_CONNECTIONS, ENV_LOG_QUERIES,
    ENV_PG_DB, ENV_PG_HOST, ENV_PG_MIGRATION_PATH, ENV_PG_PASSWORD, ENV_PG_PORT, ENV_PG_SSL_MODE,
    ENV_PG_USER,
};
pub use query::{Query, QueryOption, QueryType, SortDir, DEFAULT_SELECT_LIMIT};
pub use record::{Record, SqlParam};

pub use pgc_derive::Record;

// Re-exported for the derive-generated code and for jsonb column types.
pub use tokio_postgres::types::Json;
#[doc(hidden)]
pub use chrono;
#[doc(hidden)]
pub use tokio_postgres;
