//! Parsing of `#[pgc(...)]` attributes.

use syn::{DeriveInput, Result};

#[derive(Default)]
pub(crate) struct StructAttrs {
    pub table: Option<String>,
    pub many_to_many: bool,
}

#[derive(Default)]
pub(crate) struct FieldAttrs {
    pub pk: bool,
    pub dt: bool,
    pub skip: bool,
    pub join: bool,
    pub name: Option<String>,
}

pub(crate) fn struct_attrs(input: &DeriveInput) -> Result<StructAttrs> {
    let mut out = StructAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("pgc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let lit: syn::LitStr = meta.value()?.parse()?;
                out.table = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("many_to_many") {
                out.many_to_many = true;
                Ok(())
            } else {
                Err(meta.error("unknown struct-level pgc attribute, expected `table` or `many_to_many`"))
            }
        })?;
    }
    Ok(out)
}

pub(crate) fn field_attrs(field: &syn::Field) -> Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("pgc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("pk") {
                out.pk = true;
                Ok(())
            } else if meta.path.is_ident("dt") {
                out.dt = true;
                Ok(())
            } else if meta.path.is_ident("skip") {
                out.skip = true;
                Ok(())
            } else if meta.path.is_ident("join") {
                out.join = true;
                Ok(())
            } else if meta.path.is_ident("name") {
                let lit: syn::LitStr = meta.value()?.parse()?;
                out.name = Some(lit.value());
                Ok(())
            } else {
                Err(meta.error(
                    "unknown pgc attribute, expected `pk`, `dt`, `skip`, `join` or `name = \"...\"`",
                ))
            }
        })?;
    }
    Ok(out)
}
