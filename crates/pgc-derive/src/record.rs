//! `#[derive(Record)]` expansion.
//!
//! The macro performs at compile time what a reflective runtime would do on
//! first use: it classifies every field, fixes the field positions, and
//! emits a `Record` impl whose accessors are plain `match`es on those
//! positions. Shapes the runtime would have to reject become compile errors
//! here.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Error, Fields, Result};

use crate::attrs::{field_attrs, struct_attrs};
use crate::types::{classify, option_inner, slot_shape, type_name, Access, Kind, SlotShape};

pub(crate) fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let name_str = name.to_string();

    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Record cannot be derived for generic structs",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(Error::new_spanned(
                    &input,
                    "Record can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(Error::new_spanned(
                &input,
                "Record can only be derived for structs",
            ))
        }
    };

    let sattrs = struct_attrs(&input)?;
    let table_tok = match &sattrs.table {
        Some(t) => quote!(::core::option::Option::Some(#t)),
        None => quote!(::core::option::Option::None),
    };
    let no_fields = sattrs.many_to_many;

    let mut field_specs: Vec<TokenStream> = Vec::new();
    let mut join_specs: Vec<TokenStream> = Vec::new();
    let mut bind_arms: Vec<TokenStream> = Vec::new();
    let mut read_arms: Vec<TokenStream> = Vec::new();
    let mut attach_arms: Vec<TokenStream> = Vec::new();
    let mut explicit_pk: Option<syn::Ident> = None;
    let mut implicit_pk: Option<syn::Ident> = None;

    for (pos, field) in fields.iter().enumerate() {
        let fattrs = field_attrs(field)?;
        if fattrs.skip {
            continue;
        }
        let ident = field.ident.clone().expect("named field");
        let rust_name = ident.to_string();
        let ty = &field.ty;

        if fattrs.join {
            let (shape, child_ty) = match slot_shape(ty) {
                SlotShape::Many(inner) => ("many", inner),
                SlotShape::Optional(inner) => ("optional", inner),
                SlotShape::One(inner) => ("one", inner),
            };
            let child_name =
                type_name(child_ty).map_err(|m| Error::new_spanned(ty, m))?;
            let many = shape == "many";
            join_specs.push(quote! {
                ::pgc::JoinSpec { child: #child_name, field_pos: #pos, many: #many }
            });
            let assign = match shape {
                "many" => quote!(self.#ident.push(*c)),
                "optional" => quote!(self.#ident = ::core::option::Option::Some(*c)),
                _ => quote!(self.#ident = *c),
            };
            attach_arms.push(quote! {
                #pos => match child.downcast::<#child_ty>() {
                    ::core::result::Result::Ok(c) => {
                        #assign;
                        ::core::result::Result::Ok(())
                    }
                    ::core::result::Result::Err(_) => {
                        ::core::result::Result::Err(::pgc::PgcError::model(::std::format!(
                            "join child type mismatch for slot `{}`",
                            #rust_name
                        )))
                    }
                },
            });
            continue;
        }

        let (kind, access) = if fattrs.dt {
            if option_inner(ty).is_some() {
                return Err(Error::new_spanned(
                    ty,
                    "timestamp columns are NOT NULL; drop the Option",
                ));
            }
            // A custom time type carries its own timestamp ToSql/FromSql.
            match classify(ty) {
                Ok((_, Access::UtcTimestamp)) => (Kind::Timestamp, Access::UtcTimestamp),
                _ => (Kind::Timestamp, Access::Plain),
            }
        } else {
            classify(ty).map_err(|m| Error::new_spanned(ty, m))?
        };

        if fattrs.pk {
            if explicit_pk.is_some() {
                return Err(Error::new_spanned(
                    field,
                    "at most one field may be tagged #[pgc(pk)]",
                ));
            }
            if kind != Kind::Text {
                return Err(Error::new_spanned(
                    ty,
                    "primary key fields must be String (text PRIMARY KEY)",
                ));
            }
            explicit_pk = Some(ident.clone());
        }
        let column_is_id =
            fattrs.name.as_deref() == Some("id") || (fattrs.name.is_none() && rust_name == "id");
        if column_is_id && kind == Kind::Text && implicit_pk.is_none() {
            implicit_pk = Some(ident.clone());
        }

        let name_tok = match &fattrs.name {
            Some(s) => quote!(::core::option::Option::Some(#s)),
            None => quote!(::core::option::Option::None),
        };
        let kind_tok = kind.tokens();
        let pk_flag = fattrs.pk;
        let dt_flag = fattrs.dt;
        field_specs.push(quote! {
            ::pgc::FieldSpec {
                rust_name: #rust_name,
                name: #name_tok,
                kind: #kind_tok,
                field_pos: #pos,
                pk: #pk_flag,
                dt: #dt_flag,
            }
        });

        let bind_expr = match access {
            Access::Plain => quote!(::std::sync::Arc::new(self.#ident.clone())),
            Access::Json => quote!(::std::sync::Arc::new(::pgc::Json(self.#ident.clone()))),
            Access::UtcTimestamp => quote!(::std::sync::Arc::new(self.#ident.naive_utc())),
        };
        bind_arms.push(quote! {
            #pos => vals.push(#bind_expr as ::pgc::SqlParam),
        });

        let read_stmt = match access {
            Access::Plain => quote! {
                self.#ident = row
                    .try_get(idx)
                    .map_err(|e| ::pgc::PgcError::decode(f.column.clone(), e.to_string()))?;
            },
            Access::Json => quote! {
                let ::pgc::Json(v): ::pgc::Json<#ty> = row
                    .try_get(idx)
                    .map_err(|e| ::pgc::PgcError::decode(f.column.clone(), e.to_string()))?;
                self.#ident = v;
            },
            Access::UtcTimestamp => quote! {
                let v: ::pgc::chrono::NaiveDateTime = row
                    .try_get(idx)
                    .map_err(|e| ::pgc::PgcError::decode(f.column.clone(), e.to_string()))?;
                self.#ident =
                    ::pgc::chrono::DateTime::<::pgc::chrono::Utc>::from_naive_utc_and_offset(
                        v,
                        ::pgc::chrono::Utc,
                    );
            },
        };
        read_arms.push(quote! {
            #pos => { #read_stmt }
        });
    }

    let pk_expr = match explicit_pk.or(implicit_pk) {
        Some(ident) => quote!(self.#ident.clone()),
        None => quote!(::std::string::String::new()),
    };

    Ok(quote! {
        #[automatically_derived]
        impl ::pgc::Record for #name {
            fn struct_name() -> &'static str {
                #name_str
            }

            fn build_model() -> ::pgc::PgcResult<::pgc::TypeModel> {
                ::pgc::TypeModel::build(
                    #name_str,
                    #table_tok,
                    #no_fields,
                    &[#(#field_specs),*],
                    &[#(#join_specs),*],
                )
            }

            fn bind_values(
                &self,
                fields: &[&::pgc::FieldDescriptor],
            ) -> ::std::vec::Vec<::pgc::SqlParam> {
                let mut vals: ::std::vec::Vec<::pgc::SqlParam> =
                    ::std::vec::Vec::with_capacity(fields.len());
                for f in fields {
                    match f.field_pos {
                        #(#bind_arms)*
                        _ => {}
                    }
                }
                vals
            }

            fn read_row(
                &mut self,
                row: &::pgc::tokio_postgres::Row,
                start: usize,
                fields: &[&::pgc::FieldDescriptor],
            ) -> ::pgc::PgcResult<usize> {
                let mut idx = start;
                for f in fields {
                    match f.field_pos {
                        #(#read_arms)*
                        _ => {
                            return ::core::result::Result::Err(::pgc::PgcError::model(
                                ::std::format!(
                                    "{} has no persisted field at position {}",
                                    #name_str,
                                    f.field_pos
                                ),
                            ));
                        }
                    }
                    idx += 1;
                }
                ::core::result::Result::Ok(idx)
            }

            fn pk_text(&self) -> ::std::string::String {
                #pk_expr
            }

            fn attach_child(
                &mut self,
                field_pos: usize,
                child: ::std::boxed::Box<dyn ::std::any::Any + ::std::marker::Send>,
            ) -> ::pgc::PgcResult<()> {
                match field_pos {
                    #(#attach_arms)*
                    _ => ::core::result::Result::Err(::pgc::PgcError::model(::std::format!(
                        "{} has no join slot at position {}",
                        #name_str,
                        field_pos
                    ))),
                }
            }
        }
    })
}
