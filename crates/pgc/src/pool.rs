//! Connection pool and environment bootstrap.

use std::ops::Deref;
use std::path::PathBuf;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::client::GenericClient;
use crate::error::{PgcError, PgcResult};

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;

/// Environment variable names for [`Config::from_env`].
pub const ENV_PG_DB: &str = "POSTGRES_DB";
pub const ENV_PG_HOST: &str = "POSTGRES_HOST";
pub const ENV_PG_PORT: &str = "POSTGRES_PORT";
pub const ENV_PG_USER: &str = "POSTGRES_USER";
pub const ENV_PG_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const ENV_PG_SSL_MODE: &str = "POSTGRES_SSL_MODE";
pub const ENV_PG_MIGRATION_PATH: &str = "POSTGRES_MIGRATION_PATH";
pub const ENV_LOG_QUERIES: &str = "PGC_LOG_QUERIES";

/// Connection configuration, typically loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
    pub migration_path: Option<PathBuf>,
    pub log_queries: bool,
    pub max_connections: usize,
}

impl Config {
    /// Load the configuration from `POSTGRES_*` environment variables.
    /// `POSTGRES_DB` is required; the rest default sensibly.
    pub fn from_env() -> PgcResult<Self> {
        let database = std::env::var(ENV_PG_DB)
            .map_err(|_| PgcError::Connection(format!("{ENV_PG_DB} is not set")))?;
        let host = std::env::var(ENV_PG_HOST).unwrap_or_else(|_| "localhost".to_string());
        let port = match std::env::var(ENV_PG_PORT) {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                PgcError::Connection(format!("bad port ({raw}) in {ENV_PG_PORT}, expected a u16"))
            })?,
            Err(_) => 5432,
        };
        let user = std::env::var(ENV_PG_USER).unwrap_or_else(|_| "postgres".to_string());
        let password = std::env::var(ENV_PG_PASSWORD).unwrap_or_default();
        let ssl_mode = std::env::var(ENV_PG_SSL_MODE).unwrap_or_else(|_| "disable".to_string());
        let migration_path = std::env::var(ENV_PG_MIGRATION_PATH).ok().map(PathBuf::from);
        let log_queries = std::env::var(ENV_LOG_QUERIES).as_deref() == Ok("true");

        Ok(Self {
            database,
            host,
            port,
            user,
            password,
            ssl_mode,
            migration_path,
            log_queries,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        })
    }
}

/// Create a connection pool from a [`Config`].
pub fn create_pool(config: &Config) -> PgcResult<Pool> {
    let mut pg = tokio_postgres::Config::new();
    pg.dbname(&config.database)
        .host(&config.host)
        .port(config.port)
        .user(&config.user);
    if !config.password.is_empty() {
        pg.password(&config.password);
    }
    build_pool(pg, config.max_connections)
}

/// Create a connection pool from a database URL.
pub fn create_pool_with_url(database_url: &str) -> PgcResult<Pool> {
    let pg: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| PgcError::Connection(e.to_string()))?;
    build_pool(pg, DEFAULT_MAX_CONNECTIONS)
}

fn build_pool(pg: tokio_postgres::Config, max_size: usize) -> PgcResult<Pool> {
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg, NoTls, mgr_config);
    Pool::builder(mgr)
        .max_size(max_size)
        .build()
        .map_err(|e| PgcError::Pool(e.to_string()))
}

/// A pooled client usable wherever a [`GenericClient`] is expected.
pub struct PoolClient(deadpool_postgres::Client);

impl PoolClient {
    /// Check a client out of the pool.
    pub async fn acquire(pool: &Pool) -> PgcResult<Self> {
        Ok(Self(pool.get().await?))
    }

    pub fn new(client: deadpool_postgres::Client) -> Self {
        Self(client)
    }

    pub fn into_inner(self) -> deadpool_postgres::Client {
        self.0
    }
}

impl Deref for PoolClient {
    type Target = deadpool_postgres::Client;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl GenericClient for PoolClient {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<Vec<Row>> {
        self.0.query(sql, params).await.map_err(Into::into)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<u64> {
        self.0.execute(sql, params).await.map_err(Into::into)
    }

    async fn batch_execute(&self, sql: &str) -> PgcResult<()> {
        self.0.batch_execute(sql).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_from_bad_url_is_a_connection_error() {
        let err = create_pool_with_url("not a url").expect_err("must fail");
        assert!(matches!(err, PgcError::Connection(_)));
    }

    #[test]
    fn pool_from_config_builds() {
        let config = Config {
            database: "pgc_test".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            ssl_mode: "disable".to_string(),
            migration_path: None,
            log_queries: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        };
        // Pool construction is lazy; no server is contacted here.
        assert!(create_pool(&config).is_ok());
    }
}
