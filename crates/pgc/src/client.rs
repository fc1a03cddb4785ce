//! Generic client trait for unified database access.

use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::error::PgcResult;

/// A trait that unifies clients and transactions for database operations.
///
/// Adapter methods accept anything implementing this, so the same repository
/// code runs against a pooled client, a plain connection, or an open
/// transaction.
pub trait GenericClient: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = PgcResult<Vec<Row>>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = PgcResult<u64>> + Send;

    /// Execute a statement sequence over the simple protocol. Migration
    /// files routinely contain several statements.
    fn batch_execute(&self, sql: &str) -> impl std::future::Future<Output = PgcResult<()>> + Send;
}

impl GenericClient for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<Vec<Row>> {
        tokio_postgres::Client::query(self, sql, params)
            .await
            .map_err(Into::into)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<u64> {
        tokio_postgres::Client::execute(self, sql, params)
            .await
            .map_err(Into::into)
    }

    async fn batch_execute(&self, sql: &str) -> PgcResult<()> {
        tokio_postgres::Client::batch_execute(self, sql)
            .await
            .map_err(Into::into)
    }
}

impl GenericClient for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<Vec<Row>> {
        tokio_postgres::Transaction::query(self, sql, params)
            .await
            .map_err(Into::into)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<u64> {
        tokio_postgres::Transaction::execute(self, sql, params)
            .await
            .map_err(Into::into)
    }

    async fn batch_execute(&self, sql: &str) -> PgcResult<()> {
        tokio_postgres::Transaction::batch_execute(self, sql)
            .await
            .map_err(Into::into)
    }
}

impl<T: GenericClient> GenericClient for &T {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<Vec<Row>> {
        (**self).query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<u64> {
        (**self).execute(sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> PgcResult<()> {
        (**self).batch_execute(sql).await
    }
}
