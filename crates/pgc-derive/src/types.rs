//! Syntactic classification of record field types.
//!
//! The macro sees types as written, so the mapping is by name: the scalar
//! names the driver supports map to their column kinds, `Vec<T>` and map or
//! struct types become jsonb, and everything the driver cannot bind is
//! rejected at compile time.

use proc_macro2::TokenStream;
use quote::quote;

/// Column kind, mirroring `pgc::FieldKind` variant for variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
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

impl Kind {
    pub(crate) fn tokens(self) -> TokenStream {
        match self {
            Kind::Text => quote!(::pgc::FieldKind::Text),
            Kind::Bool => quote!(::pgc::FieldKind::Bool),
            Kind::SmallInt => quote!(::pgc::FieldKind::SmallInt),
            Kind::Integer => quote!(::pgc::FieldKind::Integer),
            Kind::BigInt => quote!(::pgc::FieldKind::BigInt),
            Kind::Real => quote!(::pgc::FieldKind::Real),
            Kind::Double => quote!(::pgc::FieldKind::Double),
            Kind::Timestamp => quote!(::pgc::FieldKind::Timestamp),
            Kind::JsonObject => quote!(::pgc::FieldKind::JsonObject),
            Kind::JsonArray => quote!(::pgc::FieldKind::JsonArray),
        }
    }
}

/// How the generated code moves the field across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// The field type has its own `ToSql`/`FromSql` impls.
    Plain,
    /// Wrapped in `Json<T>` on both sides.
    Json,
    /// `DateTime<Utc>` converted to/from naive UTC (`timestamp` columns).
    UtcTimestamp,
}

/// Extract the inner type T from Option<T>, or None if not an Option.
pub(crate) fn option_inner(ty: &syn::Type) -> Option<&syn::Type> {
    generic_inner(ty, "Option")
}

/// Extract the inner type T from Vec<T>, or None if not a Vec.
pub(crate) fn vec_inner(ty: &syn::Type) -> Option<&syn::Type> {
    generic_inner(ty, "Vec")
}

fn generic_inner<'a>(ty: &'a syn::Type, name: &str) -> Option<&'a syn::Type> {
    let syn::Type::Path(type_path) = ty else {
        return None;
    };
    let seg = type_path.path.segments.last()?;
    if seg.ident != name {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &seg.arguments else {
        return None;
    };
    if args.args.len() != 1 {
        return None;
    }
    let syn::GenericArgument::Type(inner) = args.args.first()? else {
        return None;
    };
    Some(inner)
}

/// Classify a persisted (non-join) field type.
pub(crate) fn classify(ty: &syn::Type) -> Result<(Kind, Access), String> {
    if option_inner(ty).is_some() {
        return Err(
            "nullable scalar fields are not supported; every column carries a NOT NULL default. \
             Use #[pgc(join)] for an optional child record, or drop the Option"
                .to_string(),
        );
    }
    if vec_inner(ty).is_some() {
        return Ok((Kind::JsonArray, Access::Json));
    }

    let syn::Type::Path(type_path) = ty else {
        return Err(format!(
            "unsupported field type `{}`",
            quote!(#ty)
        ));
    };
    let Some(seg) = type_path.path.segments.last() else {
        return Err("unsupported field type".to_string());
    };

    match seg.ident.to_string().as_str() {
        "String" => Ok((Kind::Text, Access::Plain)),
        "bool" => Ok((Kind::Bool, Access::Plain)),
        "i16" => Ok((Kind::SmallInt, Access::Plain)),
        "i32" => Ok((Kind::Integer, Access::Plain)),
        "i64" => Ok((Kind::BigInt, Access::Plain)),
        "f32" => Ok((Kind::Real, Access::Plain)),
        "f64" => Ok((Kind::Double, Access::Plain)),
        "i8" | "u8" | "u16" | "u32" | "u64" | "usize" | "isize" => Err(format!(
            "`{}` cannot be bound by the PostgreSQL driver; use i16, i32 or i64",
            seg.ident
        )),
        "NaiveDateTime" => Ok((Kind::Timestamp, Access::Plain)),
        "DateTime" => {
            if datetime_is_utc(seg) {
                Ok((Kind::Timestamp, Access::UtcTimestamp))
            } else {
                Err("only DateTime<Utc> timestamps are supported; columns are `timestamp without time zone` stored as UTC".to_string())
            }
        }
        // Maps, serde_json::Value and nested serde structs all land in jsonb.
        _ => Ok((Kind::JsonObject, Access::Json)),
    }
}

fn datetime_is_utc(seg: &syn::PathSegment) -> bool {
    let syn::PathArguments::AngleBracketed(args) = &seg.arguments else {
        return false;
    };
    if args.args.len() != 1 {
        return false;
    }
    let Some(syn::GenericArgument::Type(syn::Type::Path(inner))) = args.args.first() else {
        return false;
    };
    inner
        .path
        .segments
        .last()
        .is_some_and(|s| s.ident == "Utc")
}

/// Shape of a `#[pgc(join)]` slot.
pub(crate) enum SlotShape<'a> {
    /// `Vec<Child>` - one-to-many.
    Many(&'a syn::Type),
    /// `Option<Child>` - optional one-to-one.
    Optional(&'a syn::Type),
    /// `Child` - embedded one-to-one.
    One(&'a syn::Type),
}

pub(crate) fn slot_shape(ty: &syn::Type) -> SlotShape<'_> {
    if let Some(inner) = vec_inner(ty) {
        SlotShape::Many(inner)
    } else if let Some(inner) = option_inner(ty) {
        SlotShape::Optional(inner)
    } else {
        SlotShape::One(ty)
    }
}

/// Last path segment of a child type, used as the join registry key.
pub(crate) fn type_name(ty: &syn::Type) -> Result<String, String> {
    let syn::Type::Path(type_path) = ty else {
        return Err("join slots must hold a record type".to_string());
    };
    type_path
        .path
        .segments
        .last()
        .map(|s| s.ident.to_string())
        .ok_or_else(|| "join slots must hold a record type".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn classify_scalars() {
        let cases: Vec<(syn::Type, Kind)> = vec![
            (parse_quote!(String), Kind::Text),
            (parse_quote!(bool), Kind::Bool),
            (parse_quote!(i16), Kind::SmallInt),
            (parse_quote!(i32), Kind::Integer),
            (parse_quote!(i64), Kind::BigInt),
            (parse_quote!(f32), Kind::Real),
            (parse_quote!(f64), Kind::Double),
        ];
        for (ty, kind) in cases {
            let (k, access) = classify(&ty).expect("classify");
            assert_eq!(k, kind);
            assert_eq!(access, Access::Plain);
        }
    }

    #[test]
    fn classify_timestamps() {
        let ty: syn::Type = parse_quote!(chrono::NaiveDateTime);
        assert_eq!(classify(&ty).unwrap(), (Kind::Timestamp, Access::Plain));

        let ty: syn::Type = parse_quote!(chrono::DateTime<chrono::Utc>);
        assert_eq!(
            classify(&ty).unwrap(),
            (Kind::Timestamp, Access::UtcTimestamp)
        );

        let ty: syn::Type = parse_quote!(DateTime<Local>);
        assert!(classify(&ty).is_err());
    }

    #[test]
    fn classify_jsonb() {
        let ty: syn::Type = parse_quote!(Vec<String>);
        assert_eq!(classify(&ty).unwrap(), (Kind::JsonArray, Access::Json));

        let ty: syn::Type = parse_quote!(std::collections::HashMap<String, String>);
        assert_eq!(classify(&ty).unwrap(), (Kind::JsonObject, Access::Json));

        let ty: syn::Type = parse_quote!(serde_json::Value);
        assert_eq!(classify(&ty).unwrap(), (Kind::JsonObject, Access::Json));

        let ty: syn::Type = parse_quote!(Profile);
        assert_eq!(classify(&ty).unwrap(), (Kind::JsonObject, Access::Json));
    }

    #[test]
    fn classify_rejects_nullable_scalar() {
        let ty: syn::Type = parse_quote!(Option<String>);
        assert!(classify(&ty).is_err());
    }

    #[test]
    fn classify_rejects_unsigned() {
        let ty: syn::Type = parse_quote!(u64);
        assert!(classify(&ty).unwrap_err().contains("i16, i32 or i64"));
    }

    #[test]
    fn slot_shapes() {
        let ty: syn::Type = parse_quote!(Vec<Post>);
        assert!(matches!(slot_shape(&ty), SlotShape::Many(_)));

        let ty: syn::Type = parse_quote!(Option<Author>);
        assert!(matches!(slot_shape(&ty), SlotShape::Optional(_)));

        let ty: syn::Type = parse_quote!(Author);
        assert!(matches!(slot_shape(&ty), SlotShape::One(_)));
    }

    #[test]
    fn type_name_last_segment() {
        let ty: syn::Type = parse_quote!(crate::models::Post);
        assert_eq!(type_name(&ty).unwrap(), "Post");
    }
}
