//! The record trait generated by `#[derive(Record)]`.

use std::any::Any;
use std::sync::Arc;

use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::error::PgcResult;
use crate::model::{FieldDescriptor, TypeModel};

/// An owned bind value.
pub type SqlParam = Arc<dyn ToSql + Send + Sync>;

/// A struct that maps onto a single table.
///
/// Implemented by `#[derive(Record)]`; the generated impl carries the table
/// description plus index-based accessors, so the runtime never inspects the
/// struct itself. Use [`describe`](crate::describe) rather than calling
/// [`build_model`](Record::build_model) directly.
pub trait Record: Default + Clone + Send + Sync + 'static {
    /// The type's short name; keys join registration.
    fn struct_name() -> &'static str;

    /// Build the table description. Called once per process by the cache.
    fn build_model() -> PgcResult<TypeModel>;

    /// Owned bind values for `fields`, in the given order.
    fn bind_values(&self, fields: &[&FieldDescriptor]) -> Vec<SqlParam>;

    /// Read `fields.len()` columns from `row` starting at column `start`
    /// into `self`, returning the next unread column index.
    fn read_row(&mut self, row: &Row, start: usize, fields: &[&FieldDescriptor]) -> PgcResult<usize>;

    /// The primary key rendered as text; empty when unset or absent.
    fn pk_text(&self) -> String;

    /// Attach a materialized child record into the join slot at `field_pos`.
    fn attach_child(&mut self, field_pos: usize, child: Box<dyn Any + Send>) -> PgcResult<()>;
}

/// Borrow a parameter list in the form the driver wants.
pub(crate) fn params_ref(args: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    args.iter()
        .map(|a| a.as_ref() as &(dyn ToSql + Sync))
        .collect()
}
