//! Parsing logic for the Model derive macro.
//!
//! This module extracts struct-level and field-level `#[sqlchain(...)]`
//! attributes from the derive input into `ModelDef` and `FieldDef`.

use proc_macro2::Span;
use quote::ToTokens;
use syn::meta::ParseNestedMeta;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, GenericArgument, Ident, Lit, PathArguments,
    Result, Type,
};

/// Parsed model definition from a struct with `#[derive(Model)]`.
#[derive(Debug)]
pub struct ModelDef {
    /// The struct name (e.g., `User`).
    pub name: Ident,
    /// Explicit table name, if given.
    pub table_name: Option<String>,
    /// The user implements `Hooks` by hand.
    pub custom_hooks: bool,
    /// Parsed field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
}

/// Parsed definition of one struct field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    pub ty: Type,
    /// Column override; the naming convention applies when absent.
    pub column: Option<String>,
    /// Column type used verbatim in DDL.
    pub sql_type: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub size: Option<u32>,
    pub default: Option<String>,
    pub unique: bool,
    /// `Some("")` for a bare `index` flag.
    pub index: Option<String>,
    pub unique_index: Option<String>,
    pub skip: bool,
    pub embedded: bool,
    pub relationship: Option<RelationshipAttr>,
}

/// Parsed `relationship(...)` options.
#[derive(Debug, Clone, Default)]
pub struct RelationshipAttr {
    pub foreign_key: Option<String>,
    pub association_foreign_key: Option<String>,
    pub many_to_many: Option<String>,
    pub join_foreign_key: Option<String>,
    pub association_join_foreign_key: Option<String>,
}

/// How a relation field holds its records.
#[derive(Debug, Clone)]
pub enum RelationShape {
    /// `Vec<T>`
    Many(Type),
    /// `Option<T>`
    Optional(Type),
    /// `T`
    One(Type),
}

impl RelationShape {
    pub fn related(&self) -> &Type {
        match self {
            RelationShape::Many(t) | RelationShape::Optional(t) | RelationShape::One(t) => t,
        }
    }
}

impl FieldDef {
    /// A plain column: not skipped, embedded or a relationship.
    pub fn is_column(&self) -> bool {
        !self.skip && !self.embedded && self.relationship.is_none()
    }

    pub fn relation_shape(&self) -> RelationShape {
        if let Some(inner) = single_generic_arg(&self.ty, "Vec") {
            RelationShape::Many(inner.clone())
        } else if let Some(inner) = single_generic_arg(&self.ty, "Option") {
            RelationShape::Optional(inner.clone())
        } else {
            RelationShape::One(self.ty.clone())
        }
    }
}

/// Parse a `DeriveInput` into a `ModelDef`.
///
/// # Errors
///
/// Returns an error if the input is not a struct with named fields, is
/// generic, or carries unknown or conflicting attributes.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Model cannot be derived for generic structs",
        ));
    }

    let StructAttrs {
        table_name,
        custom_hooks,
    } = parse_struct_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    if fields.iter().filter(|f| f.primary_key).count() > 1 {
        return Err(Error::new_spanned(
            &input.ident,
            "only one field can be marked primary_key",
        ));
    }

    Ok(ModelDef {
        name: input.ident.clone(),
        table_name,
        custom_hooks,
        fields,
    })
}

struct StructAttrs {
    table_name: Option<String>,
    custom_hooks: bool,
}

/// Parse struct-level `#[sqlchain(...)]` attributes.
///
/// Supported keys: `table = "name"`, `hooks`.
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<StructAttrs> {
    let mut table_name: Option<String> = None;
    let mut custom_hooks = false;

    for attr in attrs {
        if !attr.path().is_ident("sqlchain") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if table_name.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate sqlchain attribute: table",
                    ));
                }
                table_name = Some(string_value(&meta, "table")?);
                Ok(())
            } else if meta.path.is_ident("hooks") {
                custom_hooks = true;
                Ok(())
            } else {
                Err(Error::new_spanned(
                    meta.path,
                    "unknown sqlchain struct attribute (supported: table, hooks)",
                ))
            }
        })?;
    }

    Ok(StructAttrs {
        table_name,
        custom_hooks,
    })
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with fields, not a unit struct",
        )),
    }
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;

    let mut def = FieldDef {
        nullable: is_option_type(&field.ty),
        name,
        ty: field.ty.clone(),
        column: None,
        sql_type: None,
        primary_key: false,
        auto_increment: false,
        size: None,
        default: None,
        unique: false,
        index: None,
        unique_index: None,
        skip: false,
        embedded: false,
        relationship: None,
    };

    for attr in &field.attrs {
        if !attr.path().is_ident("sqlchain") {
            continue;
        }
        attr.parse_nested_meta(|meta| parse_field_meta(&meta, &mut def))?;
    }

    validate_field(&def)?;
    Ok(def)
}

fn parse_field_meta(meta: &ParseNestedMeta<'_>, def: &mut FieldDef) -> Result<()> {
    let path = &meta.path;

    if path.is_ident("primary_key") {
        def.primary_key = true;
    } else if path.is_ident("auto_increment") {
        def.auto_increment = true;
    } else if path.is_ident("unique") {
        def.unique = true;
    } else if path.is_ident("skip") || path.is_ident("ignore") {
        def.skip = true;
    } else if path.is_ident("embedded") {
        def.embedded = true;
    } else if path.is_ident("column") {
        def.column = Some(string_value(meta, "column")?);
    } else if path.is_ident("sql_type") {
        def.sql_type = Some(string_value(meta, "sql_type")?);
    } else if path.is_ident("default") {
        def.default = Some(string_value(meta, "default")?);
    } else if path.is_ident("size") {
        let value: Lit = meta.value()?.parse()?;
        let Lit::Int(lit_int) = value else {
            return Err(Error::new_spanned(value, "expected integer literal for size"));
        };
        def.size = Some(
            lit_int
                .base10_parse::<u32>()
                .map_err(|_| Error::new_spanned(&lit_int, "size must be a u32"))?,
        );
    } else if path.is_ident("index") {
        def.index = Some(optional_string_value(meta, "index")?);
    } else if path.is_ident("unique_index") {
        def.unique_index = Some(optional_string_value(meta, "unique_index")?);
    } else if path.is_ident("relationship") {
        def.relationship = Some(parse_relationship(meta)?);
    } else {
        let attr_name = path.to_token_stream().to_string();
        return Err(Error::new_spanned(
            path,
            format!(
                "unknown sqlchain attribute `{attr_name}`. \
                 Valid attributes are: primary_key, auto_increment, column, sql_type, size, \
                 default, unique, index, unique_index, skip, ignore, embedded, relationship"
            ),
        ));
    }
    Ok(())
}

/// Parse `relationship` or `relationship(...)`.
fn parse_relationship(meta: &ParseNestedMeta<'_>) -> Result<RelationshipAttr> {
    let mut rel = RelationshipAttr::default();
    if !meta.input.peek(syn::token::Paren) {
        return Ok(rel);
    }

    meta.parse_nested_meta(|nested| {
        let path = &nested.path;
        let slot = if path.is_ident("foreign_key") {
            &mut rel.foreign_key
        } else if path.is_ident("association_foreign_key") {
            &mut rel.association_foreign_key
        } else if path.is_ident("many_to_many") {
            &mut rel.many_to_many
        } else if path.is_ident("join_foreign_key") {
            &mut rel.join_foreign_key
        } else if path.is_ident("association_join_foreign_key") {
            &mut rel.association_join_foreign_key
        } else {
            return Err(Error::new_spanned(
                path,
                "unknown relationship option (supported: foreign_key, association_foreign_key, \
                 many_to_many, join_foreign_key, association_join_foreign_key)",
            ));
        };
        let key = path.to_token_stream().to_string();
        *slot = Some(string_value(&nested, &key)?);
        Ok(())
    })?;
    Ok(rel)
}

fn string_value(meta: &ParseNestedMeta<'_>, key: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(lit_str) => Ok(lit_str.value()),
        other => Err(Error::new_spanned(
            other,
            format!("expected string literal for {key}"),
        )),
    }
}

/// `key = "value"` or a bare `key`, which yields an empty string.
fn optional_string_value(meta: &ParseNestedMeta<'_>, key: &str) -> Result<String> {
    if meta.input.peek(syn::Token![=]) {
        string_value(meta, key)
    } else {
        Ok(String::new())
    }
}

fn validate_field(def: &FieldDef) -> Result<()> {
    let kinds = [def.skip, def.embedded, def.relationship.is_some()];
    if kinds.iter().filter(|k| **k).count() > 1 {
        return Err(Error::new_spanned(
            &def.name,
            "skip, embedded and relationship are mutually exclusive",
        ));
    }
    let column_only = def.primary_key
        || def.auto_increment
        || def.unique
        || def.column.is_some()
        || def.sql_type.is_some()
        || def.size.is_some()
        || def.default.is_some()
        || def.index.is_some()
        || def.unique_index.is_some();
    if column_only && !def.is_column() {
        return Err(Error::new_spanned(
            &def.name,
            "column attributes cannot be used on skipped, embedded or relationship fields",
        ));
    }
    if def.auto_increment && !def.primary_key {
        return Err(Error::new_spanned(
            &def.name,
            "auto_increment requires primary_key",
        ));
    }
    if let Some(rel) = &def.relationship {
        let many = single_generic_arg(&def.ty, "Vec").is_some();
        if rel.many_to_many.is_some() && !many {
            return Err(Error::new_spanned(
                &def.ty,
                "many_to_many relationships must be declared on a Vec<T> field",
            ));
        }
    }
    Ok(())
}

/// Check if a type is `Option<T>`.
pub fn is_option_type(ty: &Type) -> bool {
    single_generic_arg(ty, "Option").is_some()
}

/// `T` when `ty` is `wrapper<T>`.
pub fn single_generic_arg<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn parses_struct_and_field_attrs() {
        let input: DeriveInput = parse_quote! {
            #[sqlchain(table = "people", hooks)]
            struct User {
                #[sqlchain(primary_key, auto_increment)]
                id: i64,
                #[sqlchain(column = "full_name", size = 64, index)]
                name: String,
                #[sqlchain(unique_index = "uix_email")]
                email: Option<String>,
                #[sqlchain(skip)]
                scratch: String,
            }
        };
        let model = parse_model(&input).unwrap();
        assert_eq!(model.table_name.as_deref(), Some("people"));
        assert!(model.custom_hooks);
        assert_eq!(model.fields.len(), 4);

        let id = &model.fields[0];
        assert!(id.primary_key && id.auto_increment && !id.nullable);

        let name = &model.fields[1];
        assert_eq!(name.column.as_deref(), Some("full_name"));
        assert_eq!(name.size, Some(64));
        assert_eq!(name.index.as_deref(), Some(""));

        let email = &model.fields[2];
        assert!(email.nullable);
        assert_eq!(email.unique_index.as_deref(), Some("uix_email"));

        assert!(model.fields[3].skip);
        assert!(!model.fields[3].is_column());
    }

    #[test]
    fn parses_relationships() {
        let input: DeriveInput = parse_quote! {
            struct User {
                id: i64,
                #[sqlchain(relationship)]
                profile: Option<Profile>,
                #[sqlchain(relationship(many_to_many = "user_languages", join_foreign_key = "uid"))]
                languages: Vec<Language>,
            }
        };
        let model = parse_model(&input).unwrap();
        let profile = &model.fields[1];
        assert!(matches!(profile.relation_shape(), RelationShape::Optional(_)));

        let languages = &model.fields[2];
        let rel = languages.relationship.as_ref().unwrap();
        assert_eq!(rel.many_to_many.as_deref(), Some("user_languages"));
        assert_eq!(rel.join_foreign_key.as_deref(), Some("uid"));
        assert!(matches!(languages.relation_shape(), RelationShape::Many(_)));
    }

    #[test]
    fn rejects_bad_input() {
        let generic: DeriveInput = parse_quote! { struct Wrapper<T> { id: i64, inner: T } };
        assert!(parse_model(&generic).is_err());

        let unknown: DeriveInput = parse_quote! {
            struct User { #[sqlchain(nullable)] id: i64 }
        };
        assert!(parse_model(&unknown).is_err());

        let conflicting: DeriveInput = parse_quote! {
            struct User { id: i64, #[sqlchain(relationship, column = "x")] profile: Profile }
        };
        assert!(parse_model(&conflicting).is_err());

        let m2m_single: DeriveInput = parse_quote! {
            struct User { id: i64, #[sqlchain(relationship(many_to_many = "j"))] profile: Profile }
        };
        assert!(parse_model(&m2m_single).is_err());

        let two_keys: DeriveInput = parse_quote! {
            struct User { #[sqlchain(primary_key)] a: i64, #[sqlchain(primary_key)] b: i64 }
        };
        assert!(parse_model(&two_keys).is_err());
    }

    #[test]
    fn detects_wrappers() {
        let ty: Type = parse_quote!(Option<i32>);
        assert!(is_option_type(&ty));
        let ty: Type = parse_quote!(std::vec::Vec<Order>);
        assert!(single_generic_arg(&ty, "Vec").is_some());
        let ty: Type = parse_quote!(String);
        assert!(!is_option_type(&ty));
    }
}
