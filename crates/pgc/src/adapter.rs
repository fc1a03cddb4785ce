//! CRUD execution and row materialization.
//!
//! [`Adapter`] binds the operations to anything implementing
//! [`GenericClient`]: a plain connection, a pooled client, or an open
//! transaction. Queries are rendered from the type model plus a built
//! [`Query`], arguments are bound positionally, and result rows are read
//! back into records; left-joined child rows are fused into their parents
//! across consecutive rows.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::client::GenericClient;
use crate::error::{PgcError, PgcResult};
use crate::model::{describe, escape_ident, FieldDescriptor, TypeModel};
use crate::query::{self, JoinConfig, Query, QueryOption, QueryType};
use crate::record::{params_ref, Record, SqlParam};
use crate::sql::{self, JoinClause};

/// Most items a single multi-row INSERT accepts.
pub const LIMIT_INSERT: usize = 1000;

pub(crate) fn log_query(sql: &str) {
    tracing::debug!(target: "pgc", query = sql, "executing");
}

fn statement(base: &str, fragment: &str) -> String {
    if fragment.is_empty() {
        format!("{base};")
    } else {
        format!("{base} {fragment};")
    }
}

/// Column values for [`Adapter::update_rows`].
///
/// ```ignore
/// let n = adapter
///     .update_rows::<Blog>(SetMap::new().set("name", "renamed"), vec![q::equal("id", id)])
///     .await?;
/// ```
#[derive(Default)]
pub struct SetMap {
    entries: Vec<(String, SqlParam)>,
}

impl SetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column to a value. Columns unknown to the record's model are
    /// dropped silently at execution.
    pub fn set<T: ToSql + Send + Sync + 'static>(
        mut self,
        column: impl Into<String>,
        value: T,
    ) -> Self {
        self.entries.push((column.into(), Arc::new(value)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, column: &str) -> Option<&SqlParam> {
        self.entries
            .iter()
            .find(|(col, _)| col == column)
            .map(|(_, v)| v)
    }
}

/// Executes CRUD operations against a [`GenericClient`].
pub struct Adapter<C> {
    con: C,
}

/// A joined child ready for scanning: its model, the projected fields, and
/// the type-erased hooks to create and fill instances.
struct ScanJoin {
    model: &'static TypeModel,
    fields: Vec<&'static FieldDescriptor>,
    runtime: crate::query::JoinRuntime,
}

impl<C: GenericClient> Adapter<C> {
    pub fn new(con: C) -> Self {
        Self { con }
    }

    /// The underlying connection handle.
    pub fn connection(&self) -> &C {
        &self.con
    }

    /// Insert one or more records. All items land in the record type's
    /// table; at most [`LIMIT_INSERT`] items per call, checked before the
    /// database is contacted.
    pub async fn insert<T: Record>(&self, items: &[T]) -> PgcResult<()> {
        if items.is_empty() {
            return Err(PgcError::query("nothing to insert"));
        }
        if items.len() > LIMIT_INSERT {
            return Err(PgcError::query(format!(
                "insertion of more than ({LIMIT_INSERT}) items not allowed"
            )));
        }
        let model = describe::<T>(true)?;
        let fields = model.fields_for(&[])?;
        let mut args: Vec<SqlParam> = Vec::with_capacity(fields.len() * items.len());
        for item in items {
            args.extend(item.bind_values(&fields));
        }
        let sql = sql::insert_sql(model, items.len());
        log_query(&sql);
        self.con.execute(&sql, &params_ref(&args)).await?;
        Ok(())
    }

    /// Update a record by primary key. The PK placeholder index is derived
    /// from the actual argument count.
    pub async fn update<T: Record>(&self, item: &T) -> PgcResult<()> {
        let model = describe::<T>(true)?;
        let fields = model.fields_no_pk(&[])?;
        let pk = item.pk_text();
        if pk.is_empty() {
            return Err(PgcError::query(format!(
                "cannot update table ({}), primary key not set",
                model.table_name
            )));
        }
        let mut args = item.bind_values(&fields);
        args.push(Arc::new(pk));
        let sql = format!(
            "{} WHERE {} = ${};",
            sql::update_set_sql(model, &fields),
            escape_ident(&model.pk_name),
            args.len()
        );
        log_query(&sql);
        self.con.execute(&sql, &params_ref(&args)).await?;
        Ok(())
    }

    /// Update rows matched by the options with the given column values,
    /// returning the number of affected rows. A produced query without a
    /// WHERE clause is rejected unless `all()` was passed; whole-table
    /// updates must be spelled out.
    pub async fn update_rows<T: Record>(
        &self,
        values: SetMap,
        opts: Vec<QueryOption>,
    ) -> PgcResult<u64> {
        if values.is_empty() {
            return Err(PgcError::query("columns for update cannot be empty"));
        }
        if opts.is_empty() {
            return Err(PgcError::query("query options cannot be empty"));
        }
        let model = describe::<T>(true)?;
        let set_fields: Vec<&FieldDescriptor> = model
            .fields
            .iter()
            .filter(|f| Some(f.field_pos) != model.pk_pos && values.get(&f.column).is_some())
            .collect();
        if set_fields.is_empty() {
            return Err(PgcError::query("columns for update cannot be empty"));
        }
        let args: Vec<SqlParam> = set_fields
            .iter()
            .filter_map(|f| values.get(&f.column).cloned())
            .collect();

        let q = query::build(opts, QueryType::Update, args)?;
        if !q.is_query_all() && !q.fragment().contains("WHERE") {
            return Err(PgcError::query("query options cannot be empty"));
        }
        let sql = statement(&sql::update_set_sql(model, &set_fields), q.fragment());
        log_query(&sql);
        Ok(self.con.execute(&sql, &q.params()).await?)
    }

    /// Delete a record by primary key.
    pub async fn delete<T: Record>(&self, item: &T) -> PgcResult<()> {
        let model = describe::<T>(true)?;
        let pk = item.pk_text();
        if pk.is_empty() {
            return Err(PgcError::query(format!(
                "cannot delete from table ({}), primary key not set",
                model.table_name
            )));
        }
        let sql = format!(
            "{} WHERE {} = $1;",
            sql::delete_sql(model),
            escape_ident(&model.pk_name)
        );
        log_query(&sql);
        let args: Vec<SqlParam> = vec![Arc::new(pk)];
        self.con.execute(&sql, &params_ref(&args)).await?;
        Ok(())
    }

    /// Delete rows matched by the options, returning the number of affected
    /// rows. WHERE-less deletes require `all()`.
    pub async fn delete_rows<T: Record>(&self, opts: Vec<QueryOption>) -> PgcResult<u64> {
        let model = describe::<T>(true)?;
        let q = query::build(opts, QueryType::Delete, vec![])?;
        if !q.is_query_all() && !q.fragment().contains("WHERE") {
            return Err(PgcError::query("query options cannot be empty"));
        }
        let sql = statement(&sql::delete_sql(model), q.fragment());
        log_query(&sql);
        Ok(self.con.execute(&sql, &q.params()).await?)
    }

    /// Select records matched by the options. Without an explicit `limit`
    /// or `all()` the effective LIMIT is 1000.
    pub async fn select<T: Record>(&self, opts: Vec<QueryOption>) -> PgcResult<Vec<T>> {
        let q = query::build(opts, QueryType::Select, vec![])?;
        let model = describe::<T>(false)?;
        self.run_select(model, &q).await
    }

    /// Select with a raw WHERE fragment appended to the base SELECT. The
    /// fragment must not start with `select`; placeholders are `$1`-based
    /// over `args`.
    pub async fn select_where<T: Record>(
        &self,
        where_stmt: &str,
        args: Vec<SqlParam>,
    ) -> PgcResult<Vec<T>> {
        if where_stmt
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("select")
        {
            return Err(PgcError::query(
                "select_where expects a WHERE fragment, not a full select",
            ));
        }
        let model = describe::<T>(false)?;
        let fields = model.fields_for(&[])?;
        let base = sql::select_base_sql(&model.table_name, &fields, &[], &[])?;
        let sql = statement(&base, where_stmt);
        log_query(&sql);
        let rows = self.con.query(&sql, &params_ref(&args)).await?;
        materialize(model, &fields, &[], &rows)
    }

    /// Get one record. Without options the record's primary key value is
    /// bound as `$1`; with options the first matching row wins. Returns
    /// `Ok(false)` when nothing matched; no-row is never an error.
    pub async fn get<T: Record>(&self, rec: &mut T, opts: Vec<QueryOption>) -> PgcResult<bool> {
        let model = describe::<T>(true)?;
        if opts.is_empty() {
            let fields = model.fields_for(&[])?;
            let base = sql::select_base_sql(&model.table_name, &fields, &[], &[])?;
            let sql = format!("{} WHERE {} = $1;", base, escape_ident(&model.pk_name));
            let args: Vec<SqlParam> = vec![Arc::new(rec.pk_text())];
            log_query(&sql);
            let rows = self.con.query(&sql, &params_ref(&args)).await?;
            let Some(row) = rows.first() else {
                return Ok(false);
            };
            rec.read_row(row, 0, &fields)?;
            return Ok(true);
        }

        let q = query::build(opts, QueryType::Select, vec![])?;
        if !q.joins.is_empty() {
            // Joined gets go through the slice scanner and take the first
            // assembled parent.
            let found: Vec<T> = self.run_select(model, &q).await?;
            let Some(first) = found.into_iter().next() else {
                return Ok(false);
            };
            *rec = first;
            return Ok(true);
        }

        let fields = model.fields_for(&q.columns)?;
        let base = sql::select_base_sql(&model.table_name, &fields, &[], &[])?;
        let sql = statement(&base, q.fragment());
        log_query(&sql);
        let rows = self.con.query(&sql, &q.params()).await?;
        let Some(row) = rows.first() else {
            return Ok(false);
        };
        rec.read_row(row, 0, &fields)?;
        Ok(true)
    }

    /// Select custom columns (aggregates, expressions) into a separate
    /// destination record. The owner record type supplies the table name
    /// only; `#[pgc(name = "...")]` overrides on the destination may carry
    /// `expr as alias` projections.
    pub async fn select_custom_data<M: Record, D: Record>(
        &self,
        opts: Vec<QueryOption>,
    ) -> PgcResult<Vec<D>> {
        let owner = describe::<M>(true)?;
        let model = describe::<D>(false)?;
        let q = query::build(opts, QueryType::Select, vec![])?;
        let fields = model.fields_for(&q.columns)?;
        let base = sql::select_base_sql(&owner.table_name, &fields, &[], &[])?;
        let sql = statement(&base, q.fragment());
        log_query(&sql);
        let rows = self.con.query(&sql, &q.params()).await?;
        materialize(model, &fields, &[], &rows)
    }

    /// Count rows matched by the options.
    pub async fn count<M: Record>(&self, opts: Vec<QueryOption>) -> PgcResult<i64> {
        let rows: Vec<RowsCount> = self.select_custom_data::<M, RowsCount>(opts).await?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    /// Create the record type's table from its derived schema.
    pub async fn create_table<T: Record>(&self) -> PgcResult<()> {
        let model = describe::<T>(true)?;
        let sql = sql::create_table_sql(model);
        log_query(&sql);
        self.con.batch_execute(&sql).await
    }

    async fn run_select<T: Record>(
        &self,
        model: &'static TypeModel,
        q: &Query,
    ) -> PgcResult<Vec<T>> {
        let fields = model.fields_for(&q.columns)?;
        let (clauses, scans) = process_joins(model, &q.joins)?;
        let join_fields: Vec<Vec<&'static FieldDescriptor>> =
            scans.iter().map(|s| s.fields.clone()).collect();
        let base = sql::select_base_sql(&model.table_name, &fields, &clauses, &join_fields)?;
        let sql = statement(&base, q.fragment());
        log_query(&sql);
        let rows = self.con.query(&sql, &q.params()).await?;
        materialize(model, &fields, &scans, &rows)
    }
}

fn process_joins(
    model: &TypeModel,
    joins: &[JoinConfig],
) -> PgcResult<(Vec<JoinClause>, Vec<ScanJoin>)> {
    let mut clauses = Vec::with_capacity(joins.len());
    let mut scans = Vec::with_capacity(joins.len());
    for jc in joins {
        let child = (jc.runtime.describe)(true)?;
        if model.join_slot(jc.child).is_none() && !child.no_fields {
            return Err(PgcError::query(format!(
                "unknown join relation {}, join fields must be tagged #[pgc(join)]",
                jc.child
            )));
        }
        clauses.push(JoinClause {
            table: child.table_name.clone(),
            condition: jc.condition.clone(),
        });
        // Bridge records participate in ON clauses only.
        if child.no_fields {
            continue;
        }
        scans.push(ScanJoin {
            model: child,
            fields: child.fields_for(&jc.columns)?,
            runtime: jc.runtime,
        });
    }
    Ok((clauses, scans))
}

/// Scan result rows into records, fusing joined child rows into parents.
///
/// Rows for one parent are assumed contiguous (the LEFT JOIN expansion);
/// an ORDER BY that fragments parent groups produces duplicate parents.
fn materialize<T: Record>(
    model: &TypeModel,
    fields: &[&FieldDescriptor],
    scans: &[ScanJoin],
    rows: &[Row],
) -> PgcResult<Vec<T>> {
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    let mut prev_pk = String::new();
    // Child PKs already attached to the current parent, per join type.
    let mut seen: HashMap<&'static str, Vec<String>> = HashMap::new();

    for row in rows {
        let mut rec = T::default();
        let mut idx = rec.read_row(row, 0, fields)?;

        let pk = if model.pk_pos.is_some() {
            rec.pk_text()
        } else {
            String::new()
        };
        // The same parent PK on the next row means the row only carries
        // another joined child (one-to-many expansion).
        let row_is_same = !pk.is_empty() && pk == prev_pk;
        if !row_is_same {
            seen.clear();
        }

        for scan in scans {
            let mut child = (scan.runtime.new_child)();
            idx = (scan.runtime.read_row)(child.as_mut(), row, idx, &scan.fields)?;

            let slot = model.join_slot(scan.model.struct_name).ok_or_else(|| {
                PgcError::query(format!("unknown join {}", scan.model.struct_name))
            })?;

            // Left-joined NULLs came back as the COALESCE defaults; an empty
            // child PK means this row matched no child.
            let child_pk = (scan.runtime.pk_text)(child.as_ref());
            if child_pk.is_empty() {
                continue;
            }

            if !slot.many {
                if !row_is_same {
                    rec.attach_child(slot.field_pos, child)?;
                }
                continue;
            }

            let seen_pks = seen.entry(scan.model.struct_name).or_default();
            if seen_pks.contains(&child_pk) {
                continue;
            }
            seen_pks.push(child_pk);

            if row_is_same {
                match out.last_mut() {
                    Some(parent) => parent.attach_child(slot.field_pos, child)?,
                    None => rec.attach_child(slot.field_pos, child)?,
                }
            } else {
                rec.attach_child(slot.field_pos, child)?;
            }
        }

        if !row_is_same {
            prev_pk = pk;
            out.push(rec);
        }
    }

    Ok(out)
}

/// Count destination for [`Adapter::count`].
#[derive(Debug, Clone, Default, crate::Record)]
struct RowsCount {
    #[pgc(name = "COUNT(*) as count")]
    count: i64,
}

/// Begin a transaction, returning an adapter bound to it.
pub async fn begin(client: &mut tokio_postgres::Client) -> PgcResult<TxAdapter<'_>> {
    let tx = client.transaction().await?;
    Ok(TxAdapter {
        adapter: Adapter::new(tx),
    })
}

/// An [`Adapter`] bound to one open transaction.
pub struct TxAdapter<'a> {
    adapter: Adapter<tokio_postgres::Transaction<'a>>,
}

impl<'a> TxAdapter<'a> {
    pub async fn commit(self) -> PgcResult<()> {
        self.adapter.con.commit().await.map_err(Into::into)
    }

    pub async fn rollback(self) -> PgcResult<()> {
        self.adapter.con.rollback().await.map_err(Into::into)
    }
}

impl<'a> Deref for TxAdapter<'a> {
    type Target = Adapter<tokio_postgres::Transaction<'a>>;

    fn deref(&self) -> &Self::Target {
        &self.adapter
    }
}

/// An [`Adapter`] with raw-SQL and schema powers, used by migrations.
pub struct MigrationAdapter<C> {
    adapter: Adapter<C>,
    dir: PathBuf,
}

impl<C: GenericClient> MigrationAdapter<C> {
    pub fn new(con: C) -> Self {
        Self::with_dir(con, ".")
    }

    /// Bind the adapter to a migration directory; [`exec_file`]
    /// resolves names against it.
    ///
    /// [`exec_file`]: MigrationAdapter::exec_file
    pub fn with_dir(con: C, dir: impl Into<PathBuf>) -> Self {
        Self {
            adapter: Adapter::new(con),
            dir: dir.into(),
        }
    }

    /// Execute raw SQL, which may contain several statements.
    pub async fn exec(&self, sql: &str) -> PgcResult<()> {
        log_query(sql);
        self.adapter.con.batch_execute(sql).await
    }

    /// Execute a SQL file from the migration directory. Only the base name
    /// of `name` is used.
    pub async fn exec_file(&self, name: &str) -> PgcResult<()> {
        let base = Path::new(name)
            .file_name()
            .ok_or_else(|| PgcError::migration(format!("invalid sql file name ({name})")))?;
        let path = self.dir.join(base);
        let sql = std::fs::read_to_string(&path).map_err(|e| {
            PgcError::migration(format!("cannot read sql file ({}): {e}", path.display()))
        })?;
        self.exec(&sql).await
    }
}

impl<C> Deref for MigrationAdapter<C> {
    type Target = Adapter<C>;

    fn deref(&self) -> &Self::Target {
        &self.adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query as q;
    use crate::Record;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default, Record)]
    struct Widget {
        id: String,
        name: String,
        num: i32,
    }

    #[derive(Default)]
    struct FakeClient {
        executed: Mutex<Vec<(String, usize)>>,
        affected: u64,
    }

    impl FakeClient {
        fn with_affected(affected: u64) -> Self {
            Self {
                affected,
                ..Default::default()
            }
        }

        fn recorded(&self) -> Vec<(String, usize)> {
            self.executed.lock().expect("lock").clone()
        }
    }

    impl GenericClient for FakeClient {
        async fn query(
            &self,
            sql: &str,
            params: &[&(dyn ToSql + Sync)],
        ) -> PgcResult<Vec<Row>> {
            self.executed
                .lock()
                .expect("lock")
                .push((sql.to_string(), params.len()));
            Ok(Vec::new())
        }

        async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgcResult<u64> {
            self.executed
                .lock()
                .expect("lock")
                .push((sql.to_string(), params.len()));
            Ok(self.affected)
        }

        async fn batch_execute(&self, sql: &str) -> PgcResult<()> {
            self.executed.lock().expect("lock").push((sql.to_string(), 0));
            Ok(())
        }
    }

    fn widget(id: &str) -> Widget {
        Widget {
            id: id.to_string(),
            name: "thing".to_string(),
            num: 7,
        }
    }

    #[tokio::test]
    async fn insert_renders_multi_row_statement() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        adapter
            .insert(&[widget("a"), widget("b")])
            .await
            .expect("insert");
        let recorded = con.recorded();
        assert_eq!(
            recorded[0].0,
            "INSERT INTO \"widget\" (\"id\", \"name\", \"num\") VALUES ($1, $2, $3), ($4, $5, $6);"
        );
        assert_eq!(recorded[0].1, 6);
    }

    #[tokio::test]
    async fn insert_bounds_are_checked_before_the_database() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);

        let err = adapter.insert::<Widget>(&[]).await.expect_err("must fail");
        assert!(err.to_string().contains("nothing to insert"));

        let too_many: Vec<Widget> = (0..=LIMIT_INSERT).map(|i| widget(&i.to_string())).collect();
        let err = adapter.insert(&too_many).await.expect_err("must fail");
        assert!(err.to_string().contains("more than (1000) items"));

        assert!(con.recorded().is_empty());
    }

    #[tokio::test]
    async fn update_binds_pk_last() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        adapter.update(&widget("a")).await.expect("update");
        let recorded = con.recorded();
        assert_eq!(
            recorded[0].0,
            "UPDATE \"widget\" SET \"name\" = $1, \"num\" = $2 WHERE \"id\" = $3;"
        );
        assert_eq!(recorded[0].1, 3);
    }

    #[tokio::test]
    async fn update_requires_a_pk_value() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let err = adapter.update(&Widget::default()).await.expect_err("must fail");
        assert!(err.to_string().contains("primary key not set"));
        assert!(con.recorded().is_empty());
    }

    #[tokio::test]
    async fn update_rows_requires_options_and_where() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);

        let err = adapter
            .update_rows::<Widget>(SetMap::new().set("name", "x"), vec![])
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("query options cannot be empty"));

        let err = adapter
            .update_rows::<Widget>(SetMap::new(), vec![q::all()])
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("columns for update cannot be empty"));

        // An option list that produces no WHERE is rejected without all().
        let err = adapter
            .update_rows::<Widget>(SetMap::new().set("name", "x"), vec![q::or(vec![])])
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("query options cannot be empty"));

        assert!(con.recorded().is_empty());
    }

    #[tokio::test]
    async fn update_rows_drops_unknown_columns_silently() {
        let con = FakeClient::with_affected(3);
        let adapter = Adapter::new(&con);
        let affected = adapter
            .update_rows::<Widget>(
                SetMap::new().set("name", "x").set("no_such_column", 1_i32),
                vec![q::equal("num", 7_i32)],
            )
            .await
            .expect("update_rows");
        assert_eq!(affected, 3);
        let recorded = con.recorded();
        assert_eq!(
            recorded[0].0,
            "UPDATE \"widget\" SET \"name\" = $1 WHERE \"num\" = $2;"
        );
    }

    #[tokio::test]
    async fn update_rows_with_all_touches_every_row() {
        let con = FakeClient::with_affected(9);
        let adapter = Adapter::new(&con);
        let affected = adapter
            .update_rows::<Widget>(SetMap::new().set("name", "x"), vec![q::all()])
            .await
            .expect("update_rows");
        assert_eq!(affected, 9);
        assert_eq!(con.recorded()[0].0, "UPDATE \"widget\" SET \"name\" = $1;");
    }

    #[tokio::test]
    async fn delete_by_pk() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        adapter.delete(&widget("a")).await.expect("delete");
        assert_eq!(
            con.recorded()[0].0,
            "DELETE FROM \"widget\" WHERE \"id\" = $1;"
        );

        let err = adapter
            .delete(&Widget::default())
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("primary key not set"));
    }

    #[tokio::test]
    async fn delete_rows_requires_where_or_all() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);

        let err = adapter
            .delete_rows::<Widget>(vec![])
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("query options cannot be empty"));

        adapter
            .delete_rows::<Widget>(vec![q::all()])
            .await
            .expect("delete all");
        assert_eq!(con.recorded()[0].0, "DELETE FROM \"widget\";");
    }

    #[tokio::test]
    async fn select_applies_the_default_limit() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let rows: Vec<Widget> = adapter.select(vec![]).await.expect("select");
        assert!(rows.is_empty());
        assert_eq!(
            con.recorded()[0].0,
            "SELECT \"widget\".\"id\", \"widget\".\"name\", \"widget\".\"num\" FROM \"widget\" LIMIT 1000;"
        );
    }

    #[tokio::test]
    async fn select_with_projection_keeps_pk() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let _: Vec<Widget> = adapter
            .select(vec![q::columns(&["name"]), q::all()])
            .await
            .expect("select");
        assert_eq!(
            con.recorded()[0].0,
            "SELECT \"widget\".\"id\", \"widget\".\"name\" FROM \"widget\";"
        );
    }

    #[tokio::test]
    async fn select_rejects_unknown_projection_columns() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let err = adapter
            .select::<Widget>(vec![q::columns(&["name", "unknown"])])
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("unrecognized column (unknown)"));
    }

    #[tokio::test]
    async fn get_without_options_binds_the_pk() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let mut rec = widget("abc");
        let found = adapter.get(&mut rec, vec![]).await.expect("get");
        assert!(!found);
        let recorded = con.recorded();
        assert_eq!(
            recorded[0].0,
            "SELECT \"widget\".\"id\", \"widget\".\"name\", \"widget\".\"num\" FROM \"widget\" WHERE \"id\" = $1;"
        );
        assert_eq!(recorded[0].1, 1);
    }

    #[tokio::test]
    async fn count_projects_count_star() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let count = adapter.count::<Widget>(vec![q::all()]).await.expect("count");
        assert_eq!(count, 0);
        assert_eq!(
            con.recorded()[0].0,
            "SELECT COUNT(*) as \"count\" FROM \"widget\";"
        );
    }

    #[tokio::test]
    async fn join_on_unregistered_child_fails() {
        #[derive(Debug, Clone, Default, Record)]
        struct Stray {
            id: String,
        }
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let err = adapter
            .select::<Widget>(vec![q::join::<Stray>("\"widget\".\"id\" = \"stray\".\"id\"")])
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("unknown join relation Stray"));
    }

    #[tokio::test]
    async fn join_renders_left_join_and_coalesce() {
        #[derive(Debug, Clone, Default, Record)]
        struct Wheel {
            id: String,
            cart_id: String,
        }
        #[derive(Debug, Clone, Default, Record)]
        struct Cart {
            id: String,
            label: String,
            #[pgc(join)]
            wheels: Vec<Wheel>,
        }
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let _: Vec<Cart> = adapter
            .select(vec![
                q::join::<Wheel>("\"cart\".\"id\" = \"wheel\".\"cart_id\""),
                q::all(),
            ])
            .await
            .expect("select");
        assert_eq!(
            con.recorded()[0].0,
            "SELECT \"cart\".\"id\", \"cart\".\"label\", COALESCE(\"wheel\".\"id\", ''), \
             COALESCE(\"wheel\".\"cart_id\", '') FROM \"cart\" \
             LEFT JOIN \"wheel\" ON \"cart\".\"id\" = \"wheel\".\"cart_id\";"
        );
    }

    #[tokio::test]
    async fn bridge_joins_are_never_projected() {
        #[derive(Debug, Clone, Default, Record)]
        struct Tag {
            id: String,
            label: String,
        }
        #[derive(Debug, Clone, Default, Record)]
        #[pgc(many_to_many)]
        struct PostTag {
            id: String,
            post_id: String,
            tag_id: String,
        }
        #[derive(Debug, Clone, Default, Record)]
        struct Post {
            id: String,
            #[pgc(join)]
            tags: Vec<Tag>,
        }
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let _: Vec<Post> = adapter
            .select(vec![
                q::join::<PostTag>("\"post\".\"id\" = \"post_tag\".\"post_id\""),
                q::join::<Tag>("\"post_tag\".\"tag_id\" = \"tag\".\"id\""),
                q::all(),
            ])
            .await
            .expect("select");
        let sql = &con.recorded()[0].0;
        // The bridge appears in the join chain but none of its columns do.
        assert!(sql.contains("LEFT JOIN \"post_tag\" ON"));
        assert!(sql.contains("LEFT JOIN \"tag\" ON"));
        assert!(!sql.contains("COALESCE(\"post_tag\""));
        assert!(sql.contains("COALESCE(\"tag\".\"id\", '')"));
    }

    #[tokio::test]
    async fn select_where_rejects_full_selects() {
        let con = FakeClient::default();
        let adapter = Adapter::new(&con);
        let err = adapter
            .select_where::<Widget>("SELECT * FROM widget", vec![])
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("WHERE fragment"));

        let _: Vec<Widget> = adapter
            .select_where("WHERE id = $1", vec![q::param("x")])
            .await
            .expect("select_where");
        assert_eq!(
            con.recorded()[0].0,
            "SELECT \"widget\".\"id\", \"widget\".\"name\", \"widget\".\"num\" FROM \"widget\" WHERE id = $1;"
        );
    }
}
