//! Derive macro for pgc record types.
//!
//! Provides `#[derive(Record)]`, which turns a plain struct into a table
//! description plus the index-based accessors the pgc runtime needs.

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod attrs;
mod record;
mod types;

/// Derive the `Record` trait for a struct.
///
/// # Example
///
/// ```ignore
/// use pgc::Record;
///
/// #[derive(Debug, Clone, Default, Record)]
/// struct Blog {
///     id: String,            // implicit primary key (text)
///     name: String,
///     posts_count: i32,
///     tags: Vec<String>,     // jsonb
///     created: chrono::NaiveDateTime,
///     #[pgc(join)]
///     posts: Vec<Post>,      // one-to-many join slot
/// }
/// ```
///
/// # Attributes
///
/// Struct-level:
///
/// - `#[pgc(table = "name")]` - Override the snake_cased table name
/// - `#[pgc(many_to_many)]` - Mark the record as a join bridge: it is never
///   projected when joined, only referenced in ON clauses
///
/// Field-level:
///
/// - `#[pgc(pk)]` - Mark the primary key (`text PRIMARY KEY`, field must be `String`)
/// - `#[pgc(skip)]` - Exclude the field from all operations
/// - `#[pgc(dt)]` - Force `timestamp without time zone` for a custom time type
/// - `#[pgc(join)]` - The field is a join slot (child, `Option<child>`, or `Vec<child>`)
/// - `#[pgc(name = "column")]` - Override the derived column name; may carry a
///   projection expression such as `"SUM(price) as total_price"`
#[proc_macro_derive(Record, attributes(pgc))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    record::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
