//! Record type models.
//!
//! A [`TypeModel`] is the one place the rest of the crate looks to for a
//! record's table name, column set, primary key and join slots. It is built
//! once per record type by the generated [`Record::build_model`] impl and
//! cached process-wide; every SQL generator and every row scanner walks
//! `TypeModel::fields` in the same order, and positional arguments are
//! derived from that ordering. Never reorder.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{PgcError, PgcResult};
use crate::query::SortDir;
use crate::record::Record;

/// Column type for a text primary key.
pub const PGT_PK_STRING: &str = "text PRIMARY KEY";
/// Column type for timestamps.
pub const PGT_DATE_TIME: &str = "timestamp without time zone NOT NULL";
/// Column type for jsonb objects.
pub const PGT_JSONB_DICT: &str = "jsonb DEFAULT '{}'::jsonb NOT NULL";
/// Column type for jsonb arrays.
pub const PGT_JSONB_ARRAY: &str = "jsonb DEFAULT '[]'::jsonb NOT NULL";
/// Column type for small integers.
pub const PGT_SMALL_INT: &str = "smallint DEFAULT 0 NOT NULL";
/// Column type for 64-bit integers.
pub const PGT_BIG_INT: &str = "bigint DEFAULT 0 NOT NULL";
/// Column type for 32-bit integers.
pub const PGT_INTEGER: &str = "integer DEFAULT 0 NOT NULL";
/// Column type for booleans.
pub const PGT_BOOLEAN: &str = "boolean DEFAULT false NOT NULL";
/// Column type for 64-bit floats.
pub const PGT_FLOAT64: &str = "double precision DEFAULT 0 NOT NULL";
/// Column type for 32-bit floats.
pub const PGT_FLOAT: &str = "real DEFAULT 0 NOT NULL";
/// Column type for text.
pub const PGT_TEXT: &str = "text DEFAULT ''::text NOT NULL";

/// The column kind a record field maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Timestamp,
    JsonObject,
    JsonArray,
}

impl FieldKind {
    /// The PostgreSQL column type for this kind.
    pub fn column_type(self) -> &'static str {
        match self {
            FieldKind::Text => PGT_TEXT,
            FieldKind::Bool => PGT_BOOLEAN,
            FieldKind::SmallInt => PGT_SMALL_INT,
            FieldKind::Integer => PGT_INTEGER,
            FieldKind::BigInt => PGT_BIG_INT,
            FieldKind::Real => PGT_FLOAT,
            FieldKind::Double => PGT_FLOAT64,
            FieldKind::Timestamp => PGT_DATE_TIME,
            FieldKind::JsonObject => PGT_JSONB_DICT,
            FieldKind::JsonArray => PGT_JSONB_ARRAY,
        }
    }

    /// The literal substituted for a NULL column of this kind when the
    /// column comes in through a left join.
    pub fn join_default(self) -> &'static str {
        match self {
            FieldKind::Text => "''",
            FieldKind::Bool => "false",
            FieldKind::SmallInt
            | FieldKind::Integer
            | FieldKind::BigInt
            | FieldKind::Real
            | FieldKind::Double => "0",
            FieldKind::Timestamp => "CURRENT_TIMESTAMP",
            FieldKind::JsonObject => "'{}'::jsonb",
            FieldKind::JsonArray => "'[]'::jsonb",
        }
    }
}

/// Per-field input to [`TypeModel::build`], emitted by `#[derive(Record)]`.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub rust_name: &'static str,
    /// `#[pgc(name = "...")]` override, possibly an `expr as alias` projection.
    pub name: Option<&'static str>,
    pub kind: FieldKind,
    /// Declaration index in the struct (skipped and join fields leave gaps).
    pub field_pos: usize,
    /// `#[pgc(pk)]`.
    pub pk: bool,
    /// `#[pgc(dt)]`.
    pub dt: bool,
}

/// A join slot: which child type lands at which field position.
#[derive(Debug, Clone, Copy)]
pub struct JoinSpec {
    pub child: &'static str,
    pub field_pos: usize,
    /// True for `Vec<Child>` (one-to-many).
    pub many: bool,
}

/// One persisted column of a record type.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub rust_name: &'static str,
    pub column: String,
    pub table: String,
    pub pg_type: &'static str,
    pub kind: FieldKind,
    pub field_pos: usize,

    quoted: String,
    quoted_select: String,
    joined: String,
}

impl FieldDescriptor {
    /// Bare quoted form: `"col"`.
    pub fn quoted(&self) -> &str {
        &self.quoted
    }

    /// Projection form: `"table"."col"`, or `expr as "alias"` for a
    /// `name` override carrying an `as` expression.
    pub fn select_expr(&self) -> &str {
        &self.quoted_select
    }

    /// Left-join projection form: `COALESCE("table"."col", <kind default>)`.
    pub fn joined_expr(&self) -> &str {
        &self.joined
    }

    /// Projection form against a foreign table (custom-data selects project
    /// the destination's columns from the owner's table).
    pub fn select_expr_for(&self, table: &str) -> PgcResult<String> {
        if table == self.table {
            return Ok(self.quoted_select.clone());
        }
        render_select_expr(&self.column, table)
    }

    /// Derived from the column type string.
    pub fn is_primary_key(&self) -> bool {
        self.pg_type.to_ascii_lowercase().contains("primary key")
    }
}

/// Cached description of a record type: table, ordered columns, primary key
/// and join slots.
#[derive(Debug)]
pub struct TypeModel {
    pub struct_name: &'static str,
    pub table_name: String,
    /// Column descriptors in declaration order.
    pub fields: Vec<FieldDescriptor>,
    pub pk_name: String,
    /// Field position of the primary key, if any.
    pub pk_pos: Option<usize>,
    /// Join slots keyed by child type name.
    pub joins: Vec<JoinSpec>,
    /// True for many-to-many bridge records: schema is still generated but
    /// the record is never projected when joined against.
    pub no_fields: bool,
}

impl TypeModel {
    /// Build a model from the specs the derive macro emits.
    pub fn build(
        struct_name: &'static str,
        table_override: Option<&'static str>,
        no_fields: bool,
        specs: &[FieldSpec],
        joins: &[JoinSpec],
    ) -> PgcResult<TypeModel> {
        let table_name = table_override
            .map(str::to_string)
            .unwrap_or_else(|| parse_name(struct_name));

        if specs.iter().filter(|s| s.pk).count() > 1 {
            return Err(PgcError::model(format!(
                "at most one primary key field is allowed for table ({table_name})"
            )));
        }
        let has_explicit_pk = specs.iter().any(|s| s.pk);

        let mut pk_name = String::new();
        let mut pk_pos: Option<usize> = None;
        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            let column = spec
                .name
                .map(str::to_string)
                .unwrap_or_else(|| parse_name(spec.rust_name));

            let pg_type = if spec.pk {
                PGT_PK_STRING
            } else if spec.dt {
                PGT_DATE_TIME
            } else if !has_explicit_pk
                && pk_pos.is_none()
                && column == "id"
                && spec.kind == FieldKind::Text
            {
                // An untagged text `id` column is the implicit primary key.
                PGT_PK_STRING
            } else if spec.kind == FieldKind::Timestamp {
                PGT_DATE_TIME
            } else {
                spec.kind.column_type()
            };

            if pg_type == PGT_PK_STRING {
                pk_name = column.clone();
                pk_pos = Some(spec.field_pos);
            }

            let quoted = escape_ident(&column);
            let quoted_select = render_select_expr(&column, &table_name)?;
            let joined = format!(
                "COALESCE(\"{}\".{}, {})",
                trim_ident(&table_name),
                escape_ident(&column),
                spec.kind.join_default()
            );

            fields.push(FieldDescriptor {
                rust_name: spec.rust_name,
                column,
                table: table_name.clone(),
                pg_type,
                kind: spec.kind,
                field_pos: spec.field_pos,
                quoted,
                quoted_select,
                joined,
            });
        }

        Ok(TypeModel {
            struct_name,
            table_name,
            fields,
            pk_name,
            pk_pos,
            joins: joins.to_vec(),
            no_fields,
        })
    }

    /// The descriptors an operation works with. An empty `columns` list
    /// selects every field; otherwise the primary key is always retained and
    /// a column unknown to the model is an error.
    pub fn fields_for(&self, columns: &[String]) -> PgcResult<Vec<&FieldDescriptor>> {
        if columns.is_empty() {
            return Ok(self.fields.iter().collect());
        }
        let mut out = Vec::with_capacity(columns.len() + 1);
        for f in &self.fields {
            if Some(f.field_pos) == self.pk_pos {
                out.push(f);
                continue;
            }
            if columns.iter().any(|c| c == &f.column) {
                out.push(f);
            }
        }
        for col in columns {
            if !out.iter().any(|f| &f.column == col) {
                return Err(PgcError::model(format!("unrecognized column ({col})")));
            }
        }
        Ok(out)
    }

    /// Like [`fields_for`](Self::fields_for) without the primary key; UPDATE
    /// never rewrites the PK column.
    pub fn fields_no_pk(&self, columns: &[String]) -> PgcResult<Vec<&FieldDescriptor>> {
        Ok(self
            .fields_for(columns)?
            .into_iter()
            .filter(|f| Some(f.field_pos) != self.pk_pos)
            .collect())
    }

    /// The join slot registered for a child type name.
    pub fn join_slot(&self, child: &str) -> Option<&JoinSpec> {
        self.joins.iter().find(|j| j.child == child)
    }

    /// The primary key descriptor, if the record has one.
    pub fn pk_field(&self) -> Option<&FieldDescriptor> {
        self.pk_pos
            .and_then(|pos| self.fields.iter().find(|f| f.field_pos == pos))
    }

    /// Qualified column reference: `"table"."col"`.
    pub fn column_ref(&self, column: &str) -> String {
        format!(
            "\"{}\".{}",
            trim_ident(&self.table_name),
            escape_ident(column)
        )
    }
}

static MODELS: Mutex<BTreeMap<TypeId, &'static TypeModel>> = Mutex::new(BTreeMap::new());

/// Describe a record type, creating and caching its [`TypeModel`] on first
/// use. Concurrent callers observe the same model identity. With
/// `require_pk` the description fails for a record without a primary key;
/// selects into projection-only destinations pass `false`.
pub fn describe<T: Record>(require_pk: bool) -> PgcResult<&'static TypeModel> {
    let key = TypeId::of::<T>();
    let model = {
        let mut cache = MODELS.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(&key) {
            Some(model) => *model,
            None => {
                let built: &'static TypeModel = Box::leak(Box::new(T::build_model()?));
                cache.insert(key, built);
                built
            }
        }
    };
    if require_pk && model.pk_pos.is_none() {
        return Err(PgcError::model(format!(
            "missing primary key for table ({})",
            model.table_name
        )));
    }
    Ok(model)
}

/// Qualified column reference for a record type: `"table"."col"`.
pub fn qualified_column<T: Record>(column: &str) -> PgcResult<String> {
    Ok(describe::<T>(false)?.column_ref(column))
}

/// Parse an ORDER BY request against a model. Accepts the record's field
/// name (case-insensitively, camel-cased input included) or the column name,
/// with a leading `-` meaning descending. Returns `None` for unknown fields.
pub fn make_order_by(model: &TypeModel, sort_by: &str) -> Option<(String, SortDir)> {
    let mut sort_by = sort_by.trim();
    if sort_by.is_empty() {
        return None;
    }
    let mut dir = SortDir::Asc;
    if let Some(rest) = sort_by.strip_prefix('-') {
        dir = SortDir::Desc;
        sort_by = rest;
    }
    for f in &model.fields {
        if f.column == sort_by || f.rust_name.eq_ignore_ascii_case(sort_by) {
            return Some((f.column.clone(), dir));
        }
    }
    // Camel-cased input normalizes to the same snake form the columns use.
    let normalized = parse_name(sort_by);
    for f in &model.fields {
        if f.column == normalized || f.rust_name == normalized {
            return Some((f.column.clone(), dir));
        }
    }
    None
}

/// Snake-case a camel-cased identifier. Runs of capitals collapse into one
/// lowercase token: `MyJSONString` becomes `my_json_string`, `URL` becomes
/// `url`.
pub fn parse_name(name: &str) -> String {
    let runes: Vec<char> = name.chars().collect();
    let mut buf = String::with_capacity(2 * name.len());
    let mut upper_count = 0usize;
    let mut is_upper = false;
    for i in 0..runes.len() {
        is_upper = runes[i].is_uppercase();
        if i != 0 && upper_count == 0 && is_upper {
            buf.push('_');
        }
        if !is_upper {
            // A capital run directly before camelcase, like the JSON in
            // MyJSONString, ends one rune early: json_string.
            if upper_count > 1 {
                for j in 0..upper_count - 1 {
                    buf.extend(runes[i - upper_count + j].to_lowercase());
                }
                buf.push('_');
            }
            if upper_count > 0 {
                buf.extend(runes[i - 1].to_lowercase());
            }
            buf.push(runes[i]);
            upper_count = 0;
        } else {
            upper_count += 1;
        }
    }
    if is_upper {
        for j in 0..upper_count {
            buf.extend(runes[runes.len() - upper_count + j].to_lowercase());
        }
    }
    buf
}

pub(crate) fn trim_ident(s: &str) -> String {
    s.replace(';', "").replace('"', "")
}

pub(crate) fn escape_ident(s: &str) -> String {
    format!("\"{}\"", trim_ident(s))
}

fn render_select_expr(column: &str, table: &str) -> PgcResult<String> {
    let lower = column.to_ascii_lowercase();
    let occurrences: Vec<usize> = lower.match_indices(" as ").map(|(i, _)| i).collect();
    match occurrences.len() {
        0 => Ok(format!(
            "\"{}\".{}",
            trim_ident(table),
            escape_ident(column)
        )),
        1 => {
            let idx = occurrences[0];
            let expr = trim_ident(column[..idx].trim());
            let alias = column[idx + 4..].trim();
            Ok(format!("{} as {}", expr, escape_ident(alias)))
        }
        _ => Err(PgcError::model(format!("invalid column name ({column})"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    #[derive(Debug, Clone, Default, Record)]
    struct SimpleAddress {
        street: String,
        state: String,
        city: String,
        id: String,
    }

    #[derive(Debug, Clone, Default, Record)]
    #[pgc(table = "not_like_the_real_meth")]
    struct TableMeth {
        id: String,
    }

    #[derive(Debug, Clone, Default, Record)]
    struct NoKey {
        name: String,
        #[pgc(name = "field_custom")]
        custome_field: String,
        updated_at: chrono::NaiveDateTime,
    }

    #[test]
    fn parse_name_cases() {
        let cases = [
            ("MyCamelCasedName", "my_camel_cased_name"),
            ("ID", "id"),
            ("URL", "url"),
            ("MyJSONString", "my_json_string"),
            ("MyStringJSON", "my_string_json"),
            ("SimpleString", "simple_string"),
            ("under_scored", "under_scored"),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_name(input), expected, "input {input}");
        }
    }

    #[test]
    fn describe_simple_struct() {
        let model = describe::<SimpleAddress>(true).expect("describe");
        assert_eq!(model.struct_name, "SimpleAddress");
        assert_eq!(model.table_name, "simple_address");
        assert_eq!(model.fields.len(), 4);
        let names: Vec<&str> = model.fields.iter().map(|f| f.column.as_str()).collect();
        assert_eq!(names, ["street", "state", "city", "id"]);
        for f in &model.fields {
            assert!(f.pg_type.starts_with("text"), "pg type {}", f.pg_type);
        }
        assert_eq!(model.pk_name, "id");
        assert_eq!(model.pk_pos, Some(3));
        assert!(model.pk_field().expect("pk field").is_primary_key());
    }

    #[test]
    fn describe_is_cached_and_identical_across_threads() {
        let handles: Vec<_> = (0..10)
            .map(|_| {
                std::thread::spawn(|| {
                    describe::<SimpleAddress>(true).expect("describe") as *const TypeModel as usize
                })
            })
            .collect();
        let ptrs: Vec<usize> = handles.into_iter().map(|h| h.join().expect("join")).collect();
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn table_name_override() {
        let model = describe::<TableMeth>(true).expect("describe");
        assert_eq!(model.table_name, "not_like_the_real_meth");
    }

    #[test]
    fn describe_without_pk() {
        assert!(describe::<NoKey>(false).is_ok());
        let err = describe::<NoKey>(true).expect_err("must fail");
        assert!(err.to_string().contains("missing primary key"));
    }

    #[test]
    fn fields_for_keeps_pk_and_rejects_unknown() {
        let model = describe::<SimpleAddress>(true).expect("describe");
        let fields = model
            .fields_for(&["city".to_string()])
            .expect("fields_for");
        let names: Vec<&str> = fields.iter().map(|f| f.column.as_str()).collect();
        assert_eq!(names, ["city", "id"]);

        let err = model
            .fields_for(&["city".to_string(), "nope".to_string()])
            .expect_err("must fail");
        assert!(err.to_string().contains("unrecognized column (nope)"));
    }

    #[test]
    fn fields_no_pk_drops_the_key() {
        let model = describe::<SimpleAddress>(true).expect("describe");
        let fields = model.fields_no_pk(&[]).expect("fields_no_pk");
        assert!(fields.iter().all(|f| f.column != "id"));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn quoted_forms() {
        let model = describe::<SimpleAddress>(true).expect("describe");
        let street = &model.fields[0];
        assert_eq!(street.quoted(), "\"street\"");
        assert_eq!(street.select_expr(), "\"simple_address\".\"street\"");
        assert_eq!(
            street.joined_expr(),
            "COALESCE(\"simple_address\".\"street\", '')"
        );
        assert_eq!(
            street.select_expr_for("blog").expect("expr"),
            "\"blog\".\"street\""
        );
    }

    #[test]
    fn projection_expression_override() {
        #[derive(Debug, Clone, Default, Record)]
        struct TotalRow {
            #[pgc(name = "SUM(price) as total_price")]
            total_price: i64,
        }
        let model = describe::<TotalRow>(false).expect("describe");
        assert_eq!(
            model.fields[0].select_expr(),
            "SUM(price) as \"total_price\""
        );
    }

    #[test]
    fn column_ref_is_qualified() {
        let model = describe::<SimpleAddress>(true).expect("describe");
        assert_eq!(model.column_ref("city"), "\"simple_address\".\"city\"");
    }

    #[test]
    fn make_order_by_cases() {
        let model = describe::<NoKey>(false).expect("describe");
        assert_eq!(
            make_order_by(model, " name "),
            Some(("name".to_string(), SortDir::Asc))
        );
        assert_eq!(
            make_order_by(model, "UpdatedAt"),
            Some(("updated_at".to_string(), SortDir::Asc))
        );
        assert_eq!(
            make_order_by(model, "-CustomeField"),
            Some(("field_custom".to_string(), SortDir::Desc))
        );
        assert_eq!(make_order_by(model, "field_custom"), Some(("field_custom".to_string(), SortDir::Asc)));
        assert_eq!(make_order_by(model, "unknown"), None);
        assert_eq!(make_order_by(model, ""), None);
    }

    #[test]
    fn skipped_fields_are_not_columns() {
        #[derive(Debug, Clone, Default, Record)]
        struct WithSkips {
            id: String,
            name: String,
            #[pgc(skip)]
            scratch: String,
        }
        let model = describe::<WithSkips>(true).expect("describe");
        let names: Vec<&str> = model.fields.iter().map(|f| f.column.as_str()).collect();
        assert_eq!(names, ["id", "name"]);
    }

    #[test]
    fn dt_forces_the_timestamp_type() {
        #[derive(Debug, Clone, Default, Record)]
        struct Stamped {
            id: String,
            #[pgc(dt)]
            seen: chrono::NaiveDateTime,
        }
        let model = describe::<Stamped>(true).expect("describe");
        assert_eq!(model.fields[1].pg_type, PGT_DATE_TIME);
    }

    #[test]
    fn many_to_many_marks_a_bridge() {
        #[derive(Debug, Clone, Default, Record)]
        #[pgc(many_to_many)]
        struct TagAssignment {
            id: String,
            post_id: String,
            tag_id: String,
        }
        let model = describe::<TagAssignment>(true).expect("describe");
        assert!(model.no_fields);
        // Schema generation still covers every column.
        assert_eq!(model.fields.len(), 3);
    }

    #[test]
    fn join_slots_register_by_child_name() {
        #[derive(Debug, Clone, Default, Record)]
        struct Leaf {
            id: String,
        }
        #[derive(Debug, Clone, Default, Record)]
        struct Tree {
            id: String,
            #[pgc(join)]
            leaves: Vec<Leaf>,
            #[pgc(join)]
            crown: Option<Leaf>,
        }
        let model = describe::<Tree>(true).expect("describe");
        assert_eq!(model.fields.len(), 1);
        assert_eq!(model.joins.len(), 2);
        let many = model.join_slot("Leaf").expect("slot");
        assert_eq!(many.field_pos, 1);
        assert!(many.many);
    }

    #[test]
    fn numeric_kinds_map_to_expected_types() {
        #[derive(Debug, Clone, Default, Record)]
        struct Numbers {
            id: String,
            small: i16,
            normal: i32,
            big: i64,
            ratio: f32,
            precise: f64,
            flag: bool,
            tags: Vec<String>,
            meta: std::collections::HashMap<String, String>,
            seen: chrono::NaiveDateTime,
        }
        let model = describe::<Numbers>(true).expect("describe");
        let types: Vec<&str> = model.fields.iter().map(|f| f.pg_type).collect();
        assert_eq!(
            types,
            [
                PGT_PK_STRING,
                PGT_SMALL_INT,
                PGT_INTEGER,
                PGT_BIG_INT,
                PGT_FLOAT,
                PGT_FLOAT64,
                PGT_BOOLEAN,
                PGT_JSONB_ARRAY,
                PGT_JSONB_DICT,
                PGT_DATE_TIME,
            ]
        );
    }
}
