//! The query-option vocabulary.
//!
//! Each option is a small builder that runs against the in-progress
//! [`Query`]: predicates append a bind value and emit a `$n` fragment, the
//! rest classify themselves (pagination, ordering, projection, joins) and
//! mutate the accumulator. [`build`] assembles the final fragment in fixed
//! order: `WHERE`, `GROUP BY`, `HAVING`, `ORDER BY`, `LIMIT`, `OFFSET`.
//!
//! ```ignore
//! use pgc::query as q;
//!
//! let query = q::build(
//!     vec![
//!         q::or(vec![
//!             q::equal("name", "blog4"),
//!             q::and(vec![
//!                 q::equal("descr", "descr3"),
//!                 q::in_list("id", vec![id1, id2]),
//!             ]),
//!         ]),
//!         q::limit(2),
//!     ],
//!     q::QueryType::Select,
//!     vec![],
//! )?;
//! ```

use std::any::Any;
use std::sync::Arc;

use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::error::{PgcError, PgcResult};
use crate::model::{describe, FieldDescriptor, TypeModel};
use crate::record::{params_ref, Record, SqlParam};

/// Default LIMIT applied to a SELECT without an explicit `limit` or `all`.
pub const DEFAULT_SELECT_LIMIT: i64 = 1000;

/// The operation a query is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Select => "select",
            QueryType::Insert => "insert",
            QueryType::Update => "update",
            QueryType::Delete => "delete",
        }
    }
}

/// Sort direction for [`order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

impl std::fmt::Display for SortDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-erased hooks the materializer needs to drive a joined child record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JoinRuntime {
    pub(crate) describe: fn(bool) -> PgcResult<&'static TypeModel>,
    pub(crate) new_child: fn() -> Box<dyn Any + Send>,
    pub(crate) read_row:
        fn(&mut (dyn Any + Send), &Row, usize, &[&FieldDescriptor]) -> PgcResult<usize>,
    pub(crate) pk_text: fn(&(dyn Any + Send)) -> String,
}

impl JoinRuntime {
    pub(crate) fn of<C: Record>() -> Self {
        Self {
            describe: |require_pk| describe::<C>(require_pk),
            new_child: || Box::new(C::default()),
            read_row: |obj, row, start, fields| match obj.downcast_mut::<C>() {
                Some(child) => child.read_row(row, start, fields),
                None => Err(PgcError::model("join child type mismatch")),
            },
            pk_text: |obj| obj.downcast_ref::<C>().map(C::pk_text).unwrap_or_default(),
        }
    }
}

/// One requested join.
#[derive(Debug)]
pub struct JoinConfig {
    pub(crate) condition: String,
    pub(crate) columns: Vec<String>,
    pub(crate) child: &'static str,
    pub(crate) runtime: JoinRuntime,
}

/// The product of [`build`]: fragment, ordered bind values, projection and
/// join list. Single-shot; a fresh query is built per call.
#[derive(Debug)]
pub struct Query {
    pub(crate) query_type: QueryType,
    pub(crate) args: Vec<SqlParam>,
    pub(crate) columns: Vec<String>,
    pub(crate) fragment: String,
    pub(crate) is_query_all: bool,
    pub(crate) joins: Vec<JoinConfig>,

    limit: i64,
    offset: i64,
    order: Vec<String>,
    group: Vec<String>,
    having: String,
}

impl Query {
    /// The assembled `WHERE ... LIMIT ... OFFSET ...` fragment.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// The accumulated bind values, in placeholder order.
    pub fn args(&self) -> &[SqlParam] {
        &self.args
    }

    /// Borrowed parameters in driver form.
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        params_ref(&self.args)
    }

    /// The explicit projection, if any.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether `all()` unlocked whole-table writes / unlimited selects.
    pub fn is_query_all(&self) -> bool {
        self.is_query_all
    }
}

enum Applied {
    Where(String),
    Pagination,
    Order,
    Having,
    Columns,
    Join,
    QueryAll,
}

type ApplyFn = Box<dyn FnOnce(&mut Query) -> PgcResult<Applied> + Send>;

/// A composable query option; see the module docs.
pub struct QueryOption(ApplyFn);

fn option(f: impl FnOnce(&mut Query) -> PgcResult<Applied> + Send + 'static) -> QueryOption {
    QueryOption(Box::new(f))
}

fn quote_field(field: &str) -> String {
    // Function calls and pre-quoted identifiers pass through untouched.
    if field.contains('(') || (field.starts_with('"') && field.ends_with('"')) {
        field.to_string()
    } else {
        format!("\"{field}\"")
    }
}

fn cmp<T>(field: impl Into<String>, op: &'static str, value: T) -> QueryOption
where
    T: ToSql + Send + Sync + 'static,
{
    let field = field.into();
    option(move |q| {
        if field.is_empty() {
            return Err(PgcError::query("field cannot be empty"));
        }
        q.args.push(Arc::new(value));
        let n = q.args.len();
        Ok(Applied::Where(format!("{} {} ${}", quote_field(&field), op, n)))
    })
}

/// `field = value`.
pub fn equal<T: ToSql + Send + Sync + 'static>(field: impl Into<String>, value: T) -> QueryOption {
    cmp(field, "=", value)
}

/// `field != value`.
pub fn not_equal<T: ToSql + Send + Sync + 'static>(
    field: impl Into<String>,
    value: T,
) -> QueryOption {
    cmp(field, "!=", value)
}

/// `field < value`.
pub fn less_than<T: ToSql + Send + Sync + 'static>(
    field: impl Into<String>,
    value: T,
) -> QueryOption {
    cmp(field, "<", value)
}

/// `field <= value`.
pub fn less_or_equal<T: ToSql + Send + Sync + 'static>(
    field: impl Into<String>,
    value: T,
) -> QueryOption {
    cmp(field, "<=", value)
}

/// `field > value`.
pub fn greater_than<T: ToSql + Send + Sync + 'static>(
    field: impl Into<String>,
    value: T,
) -> QueryOption {
    cmp(field, ">", value)
}

/// `field >= value`.
pub fn greater_or_equal<T: ToSql + Send + Sync + 'static>(
    field: impl Into<String>,
    value: T,
) -> QueryOption {
    cmp(field, ">=", value)
}

/// `field LIKE pattern`.
pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> QueryOption {
    cmp(field, "LIKE", pattern.into())
}

/// `field IN ($a, $b, ...)`, one placeholder per value. An empty value list
/// is an error.
pub fn in_list<T>(field: impl Into<String>, values: Vec<T>) -> QueryOption
where
    T: ToSql + Send + Sync + 'static,
{
    let field = field.into();
    option(move |q| {
        if field.is_empty() {
            return Err(PgcError::query("field cannot be empty"));
        }
        if values.is_empty() {
            return Err(PgcError::query("IN values cannot be empty"));
        }
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            q.args.push(Arc::new(value));
            placeholders.push(format!("${}", q.args.len()));
        }
        Ok(Applied::Where(format!(
            "\"{}\" IN ({})",
            field,
            placeholders.join(",")
        )))
    })
}

/// Owned bind value for [`raw`].
pub fn param<T: ToSql + Send + Sync + 'static>(value: T) -> SqlParam {
    Arc::new(value)
}

/// A raw where fragment. Arguments are marked `?` and rewritten to the next
/// positional placeholders; a count mismatch is an error.
///
/// ```ignore
/// q::raw("name = ? or status = ?", vec![q::param("John"), q::param("active")])
/// ```
pub fn raw(query: impl Into<String>, args: Vec<SqlParam>) -> QueryOption {
    let query = query.into();
    option(move |q| {
        if query.is_empty() {
            return Err(PgcError::query("query cannot be empty"));
        }
        let mut rewritten = String::with_capacity(query.len() + args.len());
        let mut used = 0usize;
        for ch in query.chars() {
            if ch == '?' {
                used += 1;
                rewritten.push('$');
                rewritten.push_str(&(q.args.len() + used).to_string());
            } else {
                rewritten.push(ch);
            }
        }
        if used != args.len() {
            return Err(PgcError::query(format!(
                "raw query expected ({}) arguments, provided ({}) arguments",
                used,
                args.len()
            )));
        }
        q.args.extend(args);
        Ok(Applied::Where(rewritten))
    })
}

/// Enforce querying all data. Unlocks UPDATE/DELETE without a WHERE clause
/// and disables the default SELECT limit; exists so that whole-table writes
/// are always spelled out.
pub fn all() -> QueryOption {
    option(|_| Ok(Applied::QueryAll))
}

fn compose(op: &'static str, opts: Vec<QueryOption>) -> QueryOption {
    option(move |q| {
        let mut parts = Vec::with_capacity(opts.len());
        for opt in opts {
            match (opt.0)(q)? {
                Applied::Where(part) => parts.push(part),
                _ => {
                    return Err(PgcError::query(format!(
                        "cannot pass a non-predicate option to {op}"
                    )))
                }
            }
        }
        if parts.is_empty() {
            return Ok(Applied::Where(String::new()));
        }
        Ok(Applied::Where(format!(
            "({})",
            parts.join(&format!(" {op} "))
        )))
    })
}

/// Combine predicates with OR.
pub fn or(opts: Vec<QueryOption>) -> QueryOption {
    compose("OR", opts)
}

/// Combine predicates with AND.
pub fn and(opts: Vec<QueryOption>) -> QueryOption {
    compose("AND", opts)
}

/// HAVING clause over the given predicates. SELECT only.
pub fn having(opts: Vec<QueryOption>) -> QueryOption {
    option(move |q| {
        if q.query_type != QueryType::Select {
            return Err(PgcError::query(format!(
                "cannot use having in ({})",
                q.query_type.as_str()
            )));
        }
        let Applied::Where(fragment) = (and(opts).0)(q)? else {
            return Err(PgcError::query("cannot pass a non-predicate option to AND"));
        };
        q.having = fragment;
        Ok(Applied::Having)
    })
}

/// GROUP BY the given columns. SELECT only.
pub fn group_by(columns: &[&str]) -> QueryOption {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    option(move |q| {
        if q.query_type != QueryType::Select {
            return Err(PgcError::query(format!(
                "cannot use group by in ({})",
                q.query_type.as_str()
            )));
        }
        if columns.is_empty() {
            return Err(PgcError::query("no columns specified for group by"));
        }
        q.group = columns;
        Ok(Applied::Order)
    })
}

/// LIMIT. SELECT only; the last of several wins.
pub fn limit(limit: i64) -> QueryOption {
    option(move |q| {
        if q.query_type != QueryType::Select {
            return Err(PgcError::query(format!(
                "cannot use limit in ({})",
                q.query_type.as_str()
            )));
        }
        if limit < 0 {
            return Err(PgcError::query("limit cannot be less than 0"));
        }
        q.limit = limit;
        Ok(Applied::Pagination)
    })
}

/// OFFSET. SELECT only; the last of several wins.
pub fn offset(offset: i64) -> QueryOption {
    option(move |q| {
        if q.query_type != QueryType::Select {
            return Err(PgcError::query(format!(
                "cannot use offset in ({})",
                q.query_type.as_str()
            )));
        }
        if offset < 0 {
            return Err(PgcError::query("offset cannot be less than 0"));
        }
        q.offset = offset;
        Ok(Applied::Pagination)
    })
}

/// ORDER BY a column. SELECT only; several orders keep their supply order.
pub fn order(field: impl Into<String>, dir: SortDir) -> QueryOption {
    let field = field.into();
    option(move |q| {
        if q.query_type != QueryType::Select {
            return Err(PgcError::query(format!(
                "cannot use order in ({})",
                q.query_type.as_str()
            )));
        }
        q.order.push(format!("\"{}\" {}", field, dir.as_str()));
        Ok(Applied::Order)
    })
}

/// Restrict the fetched columns. The primary key is always retained; a
/// column unknown to the record's model fails the operation. SELECT only.
pub fn columns(columns: &[&str]) -> QueryOption {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    option(move |q| {
        if q.query_type != QueryType::Select {
            return Err(PgcError::query(format!(
                "cannot use columns in ({})",
                q.query_type.as_str()
            )));
        }
        q.columns = columns;
        Ok(Applied::Columns)
    })
}

/// LEFT JOIN a child record type on `condition`, materializing matched rows
/// into the parent's `#[pgc(join)]` slot. SELECT only.
pub fn join<C: Record>(condition: impl Into<String>) -> QueryOption {
    join_with::<C>(condition, &[])
}

/// [`join`] with a column subset for the child.
pub fn join_with<C: Record>(condition: impl Into<String>, columns: &[&str]) -> QueryOption {
    let condition = condition.into();
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    option(move |q| {
        if q.query_type != QueryType::Select {
            return Err(PgcError::query(format!(
                "cannot use join in ({})",
                q.query_type.as_str()
            )));
        }
        if condition.is_empty() {
            return Err(PgcError::query("join condition cannot be empty"));
        }
        q.joins.push(JoinConfig {
            condition,
            columns,
            child: C::struct_name(),
            runtime: JoinRuntime::of::<C>(),
        });
        Ok(Applied::Join)
    })
}

/// Build a [`Query`] from options. `existing_args` occupy the leading
/// placeholders (UPDATE sets its column values first).
pub fn build(
    opts: Vec<QueryOption>,
    query_type: QueryType,
    existing_args: Vec<SqlParam>,
) -> PgcResult<Query> {
    let mut q = Query {
        query_type,
        args: existing_args,
        columns: Vec::new(),
        fragment: String::new(),
        is_query_all: false,
        joins: Vec::new(),
        limit: 0,
        offset: 0,
        order: Vec::new(),
        group: Vec::new(),
        having: String::new(),
    };

    let mut where_parts: Vec<String> = Vec::new();
    for opt in opts {
        match (opt.0)(&mut q)? {
            Applied::Where(part) if !part.is_empty() => where_parts.push(part),
            Applied::QueryAll => q.is_query_all = true,
            _ => {}
        }
    }

    let mut fragment = String::new();
    if !where_parts.is_empty() {
        fragment.push_str("WHERE ");
        fragment.push_str(&where_parts.join(" AND "));
    }
    if !q.group.is_empty() {
        fragment.push_str(" GROUP BY ");
        fragment.push_str(&q.group.join(","));
    }
    if !q.having.is_empty() {
        fragment.push_str(" HAVING ");
        fragment.push_str(&q.having);
    }
    if !q.order.is_empty() {
        fragment.push_str(" ORDER BY ");
        fragment.push_str(&q.order.join(", "));
    }
    if q.limit == 0 && query_type == QueryType::Select && !q.is_query_all {
        q.limit = DEFAULT_SELECT_LIMIT;
    }
    if q.limit != 0 {
        fragment.push_str(&format!(" LIMIT {}", q.limit));
    }
    if q.offset != 0 {
        fragment.push_str(&format!(" OFFSET {}", q.offset));
    }

    q.fragment = fragment.trim().to_string();
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    fn build_select(opts: Vec<QueryOption>) -> Query {
        build(opts, QueryType::Select, vec![]).expect("build")
    }

    #[test]
    fn nested_or_and_produces_expected_fragment() {
        let q = build_select(vec![or(vec![
            equal("name", "blog4"),
            and(vec![
                equal("descr", "descr3"),
                in_list("id", vec!["id1".to_string(), "id2".to_string()]),
            ]),
        ])]);
        assert_eq!(
            q.fragment(),
            "WHERE (\"name\" = $1 OR (\"descr\" = $2 AND \"id\" IN ($3,$4))) LIMIT 1000"
        );
        assert_eq!(q.args().len(), 4);
    }

    #[test]
    fn default_select_limit() {
        let q = build_select(vec![equal("name", "x")]);
        assert!(q.fragment().ends_with("LIMIT 1000"));

        let q = build_select(vec![equal("name", "x"), limit(2)]);
        assert!(q.fragment().ends_with("LIMIT 2"));

        let q = build_select(vec![equal("name", "x"), all()]);
        assert!(!q.fragment().contains("LIMIT"));
        assert!(q.is_query_all());
    }

    #[test]
    fn last_limit_and_offset_win() {
        let q = build_select(vec![limit(5), limit(7), offset(10), offset(20)]);
        assert_eq!(q.fragment(), "LIMIT 7 OFFSET 20");
    }

    #[test]
    fn order_fragments_keep_supply_order() {
        let q = build_select(vec![
            order("id", SortDir::Asc),
            order("updated", SortDir::Desc),
            all(),
        ]);
        assert_eq!(q.fragment(), "ORDER BY \"id\" ASC, \"updated\" DESC");
    }

    #[test]
    fn group_by_and_having() {
        let q = build_select(vec![
            group_by(&["user_id"]),
            having(vec![greater_than("COUNT(*)", 5_i64)]),
            all(),
        ]);
        assert_eq!(q.fragment(), "GROUP BY user_id HAVING (COUNT(*) > $1)");
    }

    #[test]
    fn function_call_fields_pass_unquoted() {
        let q = build_select(vec![equal("LOWER(name)", "x"), all()]);
        assert_eq!(q.fragment(), "WHERE LOWER(name) = $1");

        let q = build_select(vec![equal("\"already\"", "x"), all()]);
        assert_eq!(q.fragment(), "WHERE \"already\" = $1");
    }

    #[test]
    fn raw_rewrites_placeholders() {
        let q = build_select(vec![
            equal("a", 1_i32),
            raw(
                "name = ? or status = ?",
                vec![param("John"), param("active")],
            ),
            all(),
        ]);
        assert_eq!(q.fragment(), "WHERE \"a\" = $1 AND name = $2 or status = $3");
        assert_eq!(q.args().len(), 3);
    }

    #[test]
    fn raw_argument_count_mismatch() {
        let err = build(
            vec![raw("name = ?", vec![])],
            QueryType::Select,
            vec![],
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("expected (1) arguments"));
    }

    #[test]
    fn empty_field_is_an_error() {
        assert!(build(vec![equal("", 1_i32)], QueryType::Select, vec![]).is_err());
    }

    #[test]
    fn empty_in_list_is_an_error() {
        let err = build(
            vec![in_list("id", Vec::<String>::new())],
            QueryType::Select,
            vec![],
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("IN values cannot be empty"));
    }

    #[test]
    fn composing_non_predicates_is_an_error() {
        let err = build(
            vec![or(vec![equal("a", 1_i32), limit(5)])],
            QueryType::Select,
            vec![],
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("non-predicate"));
    }

    #[test]
    fn empty_composition_yields_empty_fragment() {
        let q = build_select(vec![or(vec![]), all()]);
        assert_eq!(q.fragment(), "");
    }

    #[test]
    fn select_only_options_rejected_elsewhere() {
        let cases: Vec<(&str, fn() -> QueryOption)> = vec![
            ("limit", || limit(5)),
            ("offset", || offset(5)),
            ("order", || order("id", SortDir::Asc)),
            ("group by", || group_by(&["id"])),
            ("columns", || columns(&["id"])),
            ("having", || having(vec![])),
        ];
        for (name, opt) in cases {
            let err = build(vec![opt()], QueryType::Update, vec![]).expect_err("must fail");
            assert!(
                err.to_string().contains("(update)"),
                "option {name}: {err}"
            );
        }
    }

    #[test]
    fn existing_args_occupy_leading_placeholders() {
        let q = build(
            vec![equal("status", "done")],
            QueryType::Update,
            vec![param("a"), param("b")],
        )
        .expect("build");
        assert_eq!(q.fragment(), "WHERE \"status\" = $3");
        assert_eq!(q.args().len(), 3);
    }

    #[derive(Debug, Clone, Default, Record)]
    struct JoinChild {
        id: String,
        name: String,
    }

    #[test]
    fn join_collects_config() {
        let q = build_select(vec![
            join::<JoinChild>("\"parent\".\"id\" = \"join_child\".\"parent_id\""),
            all(),
        ]);
        assert_eq!(q.joins.len(), 1);
        assert_eq!(q.joins[0].child, "JoinChild");

        let err = build(
            vec![join::<JoinChild>("x = y")],
            QueryType::Delete,
            vec![],
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("cannot use join in (delete)"));
    }

    #[test]
    fn empty_join_condition_is_an_error() {
        let err = build(vec![join::<JoinChild>("")], QueryType::Select, vec![])
            .expect_err("must fail");
        assert!(err.to_string().contains("join condition cannot be empty"));
    }
}
