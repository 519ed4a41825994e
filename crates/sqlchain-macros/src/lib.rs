//! Procedural macros for sqlchain.
//!
//! `#[derive(Model)]` turns a struct into a mapped model: it emits the
//! static `ModelSchema` the descriptor cache reads, by-name field access,
//! row decoding and relation access. Reflection over the struct happens
//! here, at compile time; the runtime only sees plain data.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;

mod infer;
mod parse;

use parse::{FieldDef, ModelDef, RelationShape, parse_model};

/// Derive macro for the `Model` trait.
///
/// # Attributes
///
/// Struct level:
/// - `#[sqlchain(table = "name")]` - Override the table name
/// - `#[sqlchain(hooks)]` - Implement `Hooks` by hand instead of the empty default
///
/// Field level:
/// - `primary_key`, `auto_increment`, `unique`
/// - `column = "name"` - Override the column name
/// - `sql_type = "TEXT"` - Column type used verbatim in DDL
/// - `size = 64` - Column size for text types
/// - `default = "expr"` - SQL DEFAULT expression
/// - `index` / `index = "name"`, `unique_index` / `unique_index = "name"`
/// - `skip` / `ignore` - Field has no column
/// - `embedded` - Promote the columns of a nested `Model`
/// - `relationship` / `relationship(foreign_key = "...", association_foreign_key = "...",
///   many_to_many = "join_table", join_foreign_key = "...",
///   association_join_foreign_key = "...")`
///
/// # Example
///
/// ```ignore
/// use sqlchain::Model;
///
/// #[derive(Debug, Clone, Default, Model)]
/// struct User {
///     #[sqlchain(primary_key, auto_increment)]
///     id: i64,
///     #[sqlchain(size = 100, index)]
///     name: String,
///     #[sqlchain(relationship)]
///     orders: Vec<Order>,
/// }
/// ```
#[proc_macro_derive(Model, attributes(sqlchain))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_model_impl(&model).into()
}

fn generate_model_impl(model: &ModelDef) -> TokenStream2 {
    let name = &model.name;
    let name_lit = name.to_string();
    let table_name = opt_str(model.table_name.as_deref());
    let field_schemas: Vec<_> = model.fields.iter().map(generate_field_schema).collect();

    let value_of = generate_value_of(model);
    let set_value = generate_set_value(model);
    let assign_row = generate_assign_row(model);
    let relation_methods = generate_relation_methods(model);

    let hooks = if model.custom_hooks {
        quote! {}
    } else {
        quote! {
            #[automatically_derived]
            impl ::sqlchain_core::Hooks for #name {}
        }
    };

    quote! {
        #[automatically_derived]
        impl ::sqlchain_core::Model for #name {
            fn schema() -> &'static ::sqlchain_core::ModelSchema {
                static FIELDS: &[::sqlchain_core::FieldSchema] = &[#(#field_schemas),*];
                static SCHEMA: ::sqlchain_core::ModelSchema = ::sqlchain_core::ModelSchema {
                    name: #name_lit,
                    type_id: ::core::any::TypeId::of::<#name>,
                    table_name: #table_name,
                    fields: FIELDS,
                };
                &SCHEMA
            }

            #value_of
            #set_value
            #assign_row
            #relation_methods
        }

        #hooks
    }
}

fn opt_str(value: Option<&str>) -> TokenStream2 {
    match value {
        Some(s) => quote! { ::core::option::Option::Some(#s) },
        None => quote! { ::core::option::Option::None },
    }
}

fn generate_field_schema(field: &FieldDef) -> TokenStream2 {
    let name_lit = field.name.to_string();
    let ty = &field.ty;

    if field.skip {
        return quote! {
            ::sqlchain_core::FieldSchema::new(#name_lit, ::sqlchain_core::SqlType::Text).ignored(true)
        };
    }
    if field.embedded {
        return quote! {
            ::sqlchain_core::FieldSchema::new(#name_lit, ::sqlchain_core::SqlType::Text)
                .embedded(<#ty as ::sqlchain_core::Model>::schema)
        };
    }
    if let Some(rel) = &field.relationship {
        let shape = field.relation_shape();
        let related = shape.related();
        let many = matches!(shape, RelationShape::Many(_));
        let foreign_key = opt_str(rel.foreign_key.as_deref());
        let association_foreign_key = opt_str(rel.association_foreign_key.as_deref());
        let many_to_many = opt_str(rel.many_to_many.as_deref());
        let join_foreign_key = opt_str(rel.join_foreign_key.as_deref());
        let association_join_foreign_key = opt_str(rel.association_join_foreign_key.as_deref());
        return quote! {
            ::sqlchain_core::FieldSchema::new(#name_lit, ::sqlchain_core::SqlType::Text)
                .nullable(true)
                .relation(
                    ::sqlchain_core::RelationSchema::new(
                        <#related as ::sqlchain_core::Model>::schema,
                        #many,
                    )
                    .foreign_key(#foreign_key)
                    .association_foreign_key(#association_foreign_key)
                    .many_to_many(#many_to_many)
                    .join_foreign_key(#join_foreign_key)
                    .association_join_foreign_key(#association_join_foreign_key)
                )
        };
    }

    let sql_type = infer::infer_sql_type(&name_lit, ty);
    let column = opt_str(field.column.as_deref());
    let sql_type_override = opt_str(field.sql_type.as_deref());
    let nullable = field.nullable;
    let primary_key = field.primary_key;
    let auto_increment = field.auto_increment;
    let unique = field.unique;
    let size = match field.size {
        Some(n) => quote! { ::core::option::Option::Some(#n) },
        None => quote! { ::core::option::Option::None },
    };
    let default = opt_str(field.default.as_deref());
    let index = opt_str(field.index.as_deref());
    let unique_index = opt_str(field.unique_index.as_deref());

    quote! {
        ::sqlchain_core::FieldSchema::new(#name_lit, #sql_type)
            .column(#column)
            .sql_type_override(#sql_type_override)
            .nullable(#nullable)
            .primary_key(#primary_key)
            .auto_increment(#auto_increment)
            .unique(#unique)
            .size(#size)
            .default(#default)
            .index(#index)
            .unique_index(#unique_index)
    }
}

/// Column name a field is decoded from.
fn column_name(field: &FieldDef) -> String {
    field
        .column
        .clone()
        .unwrap_or_else(|| field.name.to_string())
}

fn embedded_fields(model: &ModelDef) -> impl Iterator<Item = &FieldDef> {
    model.fields.iter().filter(|f| f.embedded)
}

fn generate_value_of(model: &ModelDef) -> TokenStream2 {
    let arms = model.fields.iter().filter(|f| f.is_column()).map(|f| {
        let ident = &f.name;
        let name_lit = ident.to_string();
        quote! {
            #name_lit => ::core::option::Option::Some(
                ::sqlchain_core::Value::from(::core::clone::Clone::clone(&self.#ident))
            ),
        }
    });
    let embedded = embedded_fields(model).map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        quote! {
            if <#ty as ::sqlchain_core::Model>::schema().has_field(field) {
                return ::sqlchain_core::Model::value_of(&self.#ident, field);
            }
        }
    });

    quote! {
        fn value_of(&self, field: &str) -> ::core::option::Option<::sqlchain_core::Value> {
            match field {
                #(#arms)*
                _ => {
                    #(#embedded)*
                    ::core::option::Option::None
                }
            }
        }
    }
}

fn generate_set_value(model: &ModelDef) -> TokenStream2 {
    let arms = model.fields.iter().filter(|f| f.is_column()).map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        let name_lit = ident.to_string();
        quote! {
            #name_lit => {
                self.#ident = <#ty as ::sqlchain_core::FromValue>::from_value(&value)?;
                ::core::result::Result::Ok(())
            }
        }
    });
    let embedded = embedded_fields(model).map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        quote! {
            if <#ty as ::sqlchain_core::Model>::schema().has_field(field) {
                return ::sqlchain_core::Model::set_value(&mut self.#ident, field, value);
            }
        }
    });

    quote! {
        fn set_value(
            &mut self,
            field: &str,
            value: ::sqlchain_core::Value,
        ) -> ::sqlchain_core::Result<()> {
            match field {
                #(#arms)*
                _ => {
                    #(#embedded)*
                    ::core::result::Result::Err(
                        <Self as ::sqlchain_core::Model>::schema().unknown_field(field)
                    )
                }
            }
        }
    }
}

fn generate_assign_row(model: &ModelDef) -> TokenStream2 {
    let assignments = model.fields.iter().filter_map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        if f.is_column() {
            let column = column_name(f);
            Some(quote! {
                if let ::core::option::Option::Some(v) = row.get_optional::<#ty>(#column)? {
                    self.#ident = v;
                }
            })
        } else if f.embedded {
            Some(quote! {
                ::sqlchain_core::Model::assign_row(&mut self.#ident, row)?;
            })
        } else {
            None
        }
    });

    quote! {
        fn assign_row(&mut self, row: &::sqlchain_core::Row) -> ::sqlchain_core::Result<()> {
            #(#assignments)*
            ::core::result::Result::Ok(())
        }
    }
}

fn generate_relation_methods(model: &ModelDef) -> TokenStream2 {
    let relations: Vec<&FieldDef> = model
        .fields
        .iter()
        .filter(|f| f.relationship.is_some())
        .collect();
    if relations.is_empty() {
        return quote! {};
    }

    let records_arms = relations.iter().map(|f| {
        let ident = &f.name;
        let name_lit = ident.to_string();
        match f.relation_shape() {
            RelationShape::Many(_) | RelationShape::Optional(_) => quote! {
                #name_lit => self.#ident
                    .iter_mut()
                    .map(|r| r as &mut dyn ::sqlchain_core::Record)
                    .collect(),
            },
            RelationShape::One(_) => quote! {
                #name_lit => ::std::vec![&mut self.#ident as &mut dyn ::sqlchain_core::Record],
            },
        }
    });

    let load_arms = relations.iter().map(|f| {
        let ident = &f.name;
        let name_lit = ident.to_string();
        match f.relation_shape() {
            RelationShape::Many(related) => quote! {
                #name_lit => {
                    self.#ident = rows
                        .iter()
                        .map(<#related as ::sqlchain_core::Model>::from_row)
                        .collect::<::sqlchain_core::Result<::std::vec::Vec<_>>>()?;
                    ::core::result::Result::Ok(())
                }
            },
            RelationShape::Optional(related) => quote! {
                #name_lit => {
                    self.#ident = rows
                        .first()
                        .map(<#related as ::sqlchain_core::Model>::from_row)
                        .transpose()?;
                    ::core::result::Result::Ok(())
                }
            },
            RelationShape::One(related) => quote! {
                #name_lit => {
                    self.#ident = match rows.first() {
                        ::core::option::Option::Some(r) => {
                            <#related as ::sqlchain_core::Model>::from_row(r)?
                        }
                        ::core::option::Option::None => ::core::default::Default::default(),
                    };
                    ::core::result::Result::Ok(())
                }
            },
        }
    });

    quote! {
        fn relation_records_mut(
            &mut self,
            field: &str,
        ) -> ::std::vec::Vec<&mut dyn ::sqlchain_core::Record> {
            match field {
                #(#records_arms)*
                _ => ::std::vec::Vec::new(),
            }
        }

        fn load_relation(
            &mut self,
            field: &str,
            rows: &[::sqlchain_core::Row],
        ) -> ::sqlchain_core::Result<()> {
            match field {
                #(#load_arms)*
                _ => ::core::result::Result::Err(
                    <Self as ::sqlchain_core::Model>::schema().unknown_field(field)
                ),
            }
        }
    }
}
