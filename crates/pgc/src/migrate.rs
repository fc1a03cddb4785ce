//! File-backed schema migrations.
//!
//! Migrations are plain `.sql` files named after their version
//! (`2021-06-01:12:00:00.sql`, optional `..._down.sql` companion) in a
//! directory the caller configures. Applied versions are tracked in
//! `pgc_schema_migration`, activity in `pgc_migration_log`, and every
//! up/exec/rollback step runs inside a single transaction. Ordering is
//! lexicographic on the version string, which by construction is
//! chronological.
//!
//! ```ignore
//! let migrator = Migrator::from_path("./schema_updates")?;
//! migrator.init_schema(&mut client, false).await?;
//! let installed = migrator.update_schema(&mut client, false).await?;
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};

use crate::adapter::{Adapter, MigrationAdapter};
use crate::client::GenericClient;
use crate::error::{PgcError, PgcResult};
use crate::query::{self as q, SortDir};
use crate::Record;

/// Version timestamp layout for migration file names.
pub const VERSION_TIME_FORMAT: &str = "%Y-%m-%d:%H:%M:%S";

/// The reserved default-schema version. Registered like any other migration
/// but never applied unless explicitly requested.
pub const DEFAULT_VERSION: &str = "0000-00-00:00:00:00";

const ACTION_INIT: &str = "init";
const ACTION_ROLLBACK: &str = "rollback";
const ACTION_RESET: &str = "reset";

/// Bookkeeping row: one per applied schema version.
#[derive(Debug, Clone, Default, Record)]
#[pgc(table = "pgc_schema_migration")]
pub struct SchemaMigration {
    #[pgc(pk)]
    pub version: String,
    pub created: NaiveDateTime,
}

/// Bookkeeping row: one per migration action.
#[derive(Debug, Clone, Default, Record)]
#[pgc(table = "pgc_migration_log")]
pub struct MigrationLog {
    pub id: String,
    pub action: String,
    pub message: String,
    pub version: String,
    pub created: NaiveDateTime,
    pub success: bool,
}

impl MigrationLog {
    /// A fresh, successful log row. Flip `success` manually for failures.
    pub fn new(action: &str, message: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.to_string(),
            message: message.into(),
            version: version.into(),
            created: Utc::now().naive_utc(),
            success: true,
        }
    }
}

/// A registered migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: String,
    pub up_sql: String,
    pub down_sql: String,
    /// Set iff the version equals [`DEFAULT_VERSION`].
    pub is_default: bool,
}

/// Status report: the last 10 log rows and the 10 most recent versions.
#[derive(Debug, Default)]
pub struct MigrationStatus {
    pub logs: Vec<MigrationLog>,
    pub latest: Vec<SchemaMigration>,
}

/// Owns the registered migrations and drives the up / down / reset / status
/// state machine. Every schema-changing operation runs in a transaction; a
/// failed statement rolls back, and a rollback or commit failure panics
/// since the database state is then unknown.
#[derive(Debug)]
pub struct Migrator {
    dir: PathBuf,
    migrations: BTreeMap<String, Migration>,
}

impl Migrator {
    /// An empty registry bound to a migration directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            migrations: BTreeMap::new(),
        }
    }

    /// Scan `dir` for `<version>.sql` files (excluding `*_down.sql`),
    /// registering each with its optional down file. Version names must
    /// parse as [`VERSION_TIME_FORMAT`] or equal [`DEFAULT_VERSION`].
    pub fn from_path(dir: impl Into<PathBuf>) -> PgcResult<Self> {
        let dir = dir.into();
        let mut migrator = Self::new(&dir);

        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".sql") || name.ends_with("_down.sql") {
                continue;
            }
            let Some(version) = name.strip_suffix(".sql") else {
                continue;
            };
            if version != DEFAULT_VERSION
                && NaiveDateTime::parse_from_str(version, VERSION_TIME_FORMAT).is_err()
            {
                return Err(PgcError::migration(format!(
                    "unrecognized version ({version}) format"
                )));
            }

            let up_sql = std::fs::read_to_string(&path).map_err(|e| {
                PgcError::migration(format!("fail read migration {version} file: {e}"))
            })?;
            let down_path = dir.join(format!("{version}_down.sql"));
            let down_sql = match std::fs::read_to_string(&down_path) {
                Ok(sql) => sql,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => {
                    return Err(PgcError::migration(format!(
                        "cannot open version ({version}) down sql: {e}"
                    )))
                }
            };
            migrator.register(version, up_sql, down_sql)?;
        }

        Ok(migrator)
    }

    /// Register a migration. Registering a version twice is an error.
    pub fn register(
        &mut self,
        version: &str,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> PgcResult<()> {
        if self.migrations.contains_key(version) {
            return Err(PgcError::migration(format!(
                "migration ({version}) has already been registered"
            )));
        }
        self.migrations.insert(
            version.to_string(),
            Migration {
                version: version.to_string(),
                up_sql: up_sql.into(),
                down_sql: down_sql.into(),
                is_default: version == DEFAULT_VERSION,
            },
        );
        Ok(())
    }

    /// Registered versions in lexicographic (chronological) order.
    pub fn versions(&self) -> Vec<&str> {
        self.migrations.keys().map(String::as_str).collect()
    }

    /// The migration directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the bookkeeping tables if absent (an already-present table is
    /// a no-op) and append an init log row. With `exec_default`, the
    /// reserved default version is executed afterwards.
    pub async fn init_schema(
        &self,
        client: &mut tokio_postgres::Client,
        exec_default: bool,
    ) -> PgcResult<()> {
        {
            let ops = MigrationAdapter::with_dir(&*client, &self.dir);
            create_table_if_absent::<SchemaMigration, _>(&ops).await?;
            create_table_if_absent::<MigrationLog, _>(&ops).await?;

            let existing: Vec<SchemaMigration> = ops
                .select(vec![q::order("version", SortDir::Asc), q::all()])
                .await?;
            for installed in &existing {
                if !self.migrations.contains_key(&installed.version) {
                    tracing::warn!(
                        target: "pgc",
                        version = %installed.version,
                        "installed schema version is missing from the registry"
                    );
                }
            }

            ops.insert(&[MigrationLog::new(
                ACTION_INIT,
                "Creating pgc schema version and log tables",
                "",
            )])
            .await?;
        }

        if exec_default && self.migrations.contains_key(DEFAULT_VERSION) {
            self.execute(client, "default").await?;
        }
        Ok(())
    }

    /// Apply every registered version not yet present in the bookkeeping
    /// table, each inside its own transaction. The default version is
    /// skipped unless `exec_default`. Returns the versions installed.
    pub async fn update_schema(
        &self,
        client: &mut tokio_postgres::Client,
        exec_default: bool,
    ) -> PgcResult<Vec<String>> {
        let existing: Vec<SchemaMigration> = {
            Adapter::new(&*client)
                .select(vec![q::order("version", SortDir::Asc), q::all()])
                .await?
        };
        let installed_versions: Vec<&str> =
            existing.iter().map(|m| m.version.as_str()).collect();

        let mut installed = Vec::new();
        for (version, migration) in &self.migrations {
            if installed_versions.contains(&version.as_str()) {
                continue;
            }
            if migration.up_sql.is_empty() {
                return Err(PgcError::migration(format!(
                    "migration ({version}): up sql not defined"
                )));
            }
            if migration.is_default && !exec_default {
                continue;
            }
            self.exec_up(client, version, &migration.up_sql, false)
                .await
                .map_err(|e| {
                    PgcError::migration(format!("fail update to version ({version}): {e}"))
                })?;
            installed.push(version.clone());
        }
        Ok(installed)
    }

    /// Execute one named version (`"default"` aliases the reserved default
    /// version). The bookkeeping row is inserted only if absent.
    pub async fn execute(
        &self,
        client: &mut tokio_postgres::Client,
        version: &str,
    ) -> PgcResult<()> {
        let version = alias_default(version);
        let migration = self
            .migrations
            .get(version)
            .ok_or_else(|| PgcError::migration(format!("migration ({version}) not found")))?;
        if migration.up_sql.is_empty() {
            return Err(PgcError::migration(format!(
                "migration ({version}): up sql not defined"
            )));
        }
        self.exec_up(client, version, &migration.up_sql, true)
            .await
            .map_err(|e| PgcError::migration(format!("fail execute migration ({version}): {e}")))
    }

    /// Roll back one named version: execute its down SQL and delete the
    /// bookkeeping row, transactionally, then append a log row. A version
    /// without down SQL cannot be rolled back.
    pub async fn rollback(
        &self,
        client: &mut tokio_postgres::Client,
        version: &str,
    ) -> PgcResult<()> {
        let version = alias_default(version);
        let migration = self
            .migrations
            .get(version)
            .ok_or_else(|| PgcError::migration(format!("migration ({version}) not found")))?;
        self.run_rollback(client, version, migration).await?;

        Adapter::new(&*client)
            .insert(&[MigrationLog::new(
                ACTION_ROLLBACK,
                format!("Rolled back migration \"{version}\""),
                version,
            )])
            .await?;
        Ok(())
    }

    /// Roll back the most recently installed version, if any.
    pub async fn rollback_latest(&self, client: &mut tokio_postgres::Client) -> PgcResult<()> {
        let mut latest = SchemaMigration::default();
        let found = {
            Adapter::new(&*client)
                .get(&mut latest, vec![q::order("version", SortDir::Desc)])
                .await?
        };
        if !found {
            tracing::info!(target: "pgc", "nothing to rollback");
            return Ok(());
        }
        let migration = self.migrations.get(&latest.version).ok_or_else(|| {
            PgcError::migration(format!("migration ({}) not found", latest.version))
        })?;
        self.run_rollback(client, &latest.version, migration).await?;

        // If nothing is left installed the previous version reads as empty.
        let mut previous = SchemaMigration::default();
        {
            Adapter::new(&*client)
                .get(&mut previous, vec![q::order("version", SortDir::Desc)])
                .await?;
        }
        Adapter::new(&*client)
            .insert(&[MigrationLog::new(
                ACTION_ROLLBACK,
                format!(
                    "Rolled back from \"{}\" to \"{}\"",
                    latest.version, previous.version
                ),
                latest.version.clone(),
            )])
            .await?;
        Ok(())
    }

    /// Delete every bookkeeping row and append a reset log row.
    pub async fn reset(&self, client: &mut tokio_postgres::Client) -> PgcResult<()> {
        let adapter = Adapter::new(&*client);
        adapter
            .delete_rows::<SchemaMigration>(vec![q::all()])
            .await?;
        adapter
            .insert(&[MigrationLog::new(ACTION_RESET, "Reset all data", "")])
            .await?;
        Ok(())
    }

    /// The last 10 log rows and 10 most recent installed versions.
    pub async fn status(&self, client: &mut tokio_postgres::Client) -> PgcResult<MigrationStatus> {
        let adapter = Adapter::new(&*client);
        let logs = adapter
            .select(vec![q::order("created", SortDir::Desc), q::limit(10)])
            .await?;
        let latest = adapter
            .select(vec![q::order("version", SortDir::Desc), q::limit(10)])
            .await?;
        Ok(MigrationStatus { logs, latest })
    }

    /// Create a stub up file (and a stub down file) named after the current
    /// UTC time, or after the reserved default literal. Returns the new
    /// version.
    pub fn init_migration(&self, is_default: bool) -> PgcResult<String> {
        let version = if is_default {
            DEFAULT_VERSION.to_string()
        } else {
            Utc::now().format(VERSION_TIME_FORMAT).to_string()
        };

        let up_path = self.dir.join(format!("{version}.sql"));
        std::fs::write(&up_path, "-- paste here migration sql code\n").map_err(|e| {
            PgcError::migration(format!("fail create migration sql file: {e}"))
        })?;

        let down_path = self.dir.join(format!("{version}_down.sql"));
        if let Err(e) = std::fs::write(&down_path, "-- paste here migration rollback sql code\n") {
            let _ = std::fs::remove_file(&up_path);
            return Err(PgcError::migration(format!(
                "fail create down migration sql file: {e}"
            )));
        }

        Ok(version)
    }

    async fn exec_up(
        &self,
        client: &mut tokio_postgres::Client,
        version: &str,
        up_sql: &str,
        skip_if_recorded: bool,
    ) -> PgcResult<()> {
        let tx = client.transaction().await?;
        let step = {
            let ops = MigrationAdapter::with_dir(&tx, &self.dir);
            async {
                ops.exec(up_sql).await?;
                let record = if skip_if_recorded {
                    let mut existing = SchemaMigration::default();
                    !ops.get(&mut existing, vec![q::equal("version", version.to_string())])
                        .await?
                } else {
                    true
                };
                if record {
                    ops.insert(&[SchemaMigration {
                        version: version.to_string(),
                        created: Utc::now().naive_utc(),
                    }])
                    .await?;
                }
                Ok::<(), PgcError>(())
            }
            .await
        };
        finish_tx(tx, version, step).await
    }

    async fn run_rollback(
        &self,
        client: &mut tokio_postgres::Client,
        version: &str,
        migration: &Migration,
    ) -> PgcResult<()> {
        if migration.down_sql.is_empty() {
            return Err(PgcError::migration(format!(
                "migration ({version}): down sql not found"
            )));
        }
        let tx = client.transaction().await?;
        let step = {
            let ops = MigrationAdapter::with_dir(&tx, &self.dir);
            async {
                ops.exec(&migration.down_sql).await?;
                ops.delete_rows::<SchemaMigration>(vec![q::equal(
                    "version",
                    version.to_string(),
                )])
                .await?;
                Ok::<(), PgcError>(())
            }
            .await
        };
        finish_tx(tx, version, step)
            .await
            .map_err(|e| PgcError::migration(format!("fail rollback version ({version}): {e}")))
    }
}

fn alias_default(version: &str) -> &str {
    if version == "default" {
        DEFAULT_VERSION
    } else {
        version
    }
}

async fn create_table_if_absent<T: Record, C: GenericClient>(
    ops: &MigrationAdapter<C>,
) -> PgcResult<bool> {
    match ops.create_table::<T>().await {
        Ok(()) => Ok(true),
        Err(err) if err.is_table_exists() => Ok(false),
        Err(err) => Err(err),
    }
}

async fn finish_tx(
    tx: tokio_postgres::Transaction<'_>,
    version: &str,
    step: PgcResult<()>,
) -> PgcResult<()> {
    match step {
        Ok(()) => {
            if let Err(err) = tx.commit().await {
                panic!("migration ({version}): failed to commit transaction: {err}");
            }
            Ok(())
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                panic!("migration ({version}): failed to rollback transaction: {rollback_err}");
            }
            Err(err)
        }
    }
}
