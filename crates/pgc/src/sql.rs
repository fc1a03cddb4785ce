//! SQL statement rendering.
//!
//! A fixed set of generators, each parameterized by a type model and the
//! descriptors an operation works with. Placeholders are 1-based and always
//! follow field order; a multi-row INSERT numbers item `k`'s field `i` as
//! `$(i + 1 + field_count * k)`.

use crate::error::PgcResult;
use crate::model::{trim_ident, FieldDescriptor, TypeModel};

/// `INSERT INTO "t" ("c1", "c2") VALUES ($1, $2), ($3, $4);`
pub(crate) fn insert_sql(model: &TypeModel, items: usize) -> String {
    let fields = &model.fields;
    let columns: Vec<&str> = fields.iter().map(|f| f.quoted()).collect();

    let mut groups = Vec::with_capacity(items);
    for item in 0..items {
        let placeholders: Vec<String> = (0..fields.len())
            .map(|i| format!("${}", i + 1 + fields.len() * item))
            .collect();
        groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO \"{}\" ({}) VALUES {};",
        trim_ident(&model.table_name),
        columns.join(", "),
        groups.join(", ")
    )
}

/// A rendered `LEFT JOIN` target.
pub(crate) struct JoinClause {
    pub table: String,
    pub condition: String,
}

/// The SELECT base: qualified parent columns, then each join's columns
/// wrapped in COALESCE, then the FROM clause and LEFT JOINs. The caller
/// appends the query fragment.
pub(crate) fn select_base_sql(
    table: &str,
    fields: &[&FieldDescriptor],
    joins: &[JoinClause],
    join_fields: &[Vec<&'static FieldDescriptor>],
) -> PgcResult<String> {
    let mut columns = Vec::with_capacity(fields.len());
    for f in fields {
        columns.push(f.select_expr_for(table)?);
    }
    for set in join_fields {
        for f in set {
            columns.push(f.joined_expr().to_string());
        }
    }

    let mut sql = format!(
        "SELECT {} FROM \"{}\"",
        columns.join(", "),
        trim_ident(table)
    );
    for join in joins {
        sql.push_str(&format!(
            " LEFT JOIN \"{}\" ON {}",
            trim_ident(&join.table),
            join.condition
        ));
    }
    Ok(sql)
}

/// `UPDATE "t" SET "c1" = $1, ..., "cN" = $N` - the caller appends the WHERE
/// clause, deriving any PK placeholder from the actual argument count.
pub(crate) fn update_set_sql(model: &TypeModel, fields: &[&FieldDescriptor]) -> String {
    let sets: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ${}", f.quoted(), i + 1))
        .collect();
    format!(
        "UPDATE \"{}\" SET {}",
        trim_ident(&model.table_name),
        sets.join(", ")
    )
}

/// `DELETE FROM "t"` - the caller appends the WHERE clause.
pub(crate) fn delete_sql(model: &TypeModel) -> String {
    format!("DELETE FROM \"{}\"", trim_ident(&model.table_name))
}

/// `CREATE TABLE` with the derived column types.
pub(crate) fn create_table_sql(model: &TypeModel) -> String {
    let columns: Vec<String> = model
        .fields
        .iter()
        .map(|f| format!("    {} {}", f.column, f.pg_type))
        .collect();
    format!(
        "CREATE TABLE \"{}\" (\n{}\n);",
        trim_ident(&model.table_name),
        columns.join(",\n")
    )
}
