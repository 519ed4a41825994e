//! SQL type inference from Rust types.

use crate::parse::single_generic_arg;
use proc_macro2::TokenStream;
use quote::{ToTokens, quote};
use syn::Type;

/// Infer the semantic column type of a field, returning a TokenStream
/// that constructs the `SqlType` variant.
///
/// `Option<T>` is unwrapped first. Integer fields whose name ends in
/// `_at` are timestamps (UTC microseconds). Unknown types fall back to
/// `Text`.
pub fn infer_sql_type(field_name: &str, ty: &Type) -> TokenStream {
    let inner_ty = single_generic_arg(ty, "Option").unwrap_or(ty);
    let type_str = type_to_string(inner_ty);

    match type_str.as_str() {
        "bool" => quote! { ::sqlchain_core::SqlType::Boolean },

        "i64" | "u32" | "u64" if field_name.ends_with("_at") => {
            quote! { ::sqlchain_core::SqlType::Timestamp }
        }

        "i8" | "i16" | "u8" => quote! { ::sqlchain_core::SqlType::SmallInt },
        "i32" | "u16" => quote! { ::sqlchain_core::SqlType::Integer },
        "i64" | "u32" | "u64" => quote! { ::sqlchain_core::SqlType::BigInt },

        "f32" => quote! { ::sqlchain_core::SqlType::Real },
        "f64" => quote! { ::sqlchain_core::SqlType::Double },

        "String" | "&str" | "str" => quote! { ::sqlchain_core::SqlType::Text },

        "Vec<u8>" => quote! { ::sqlchain_core::SqlType::Blob },

        "serde_json::Value" => quote! { ::sqlchain_core::SqlType::Json },

        _ => quote! { ::sqlchain_core::SqlType::Text },
    }
}

fn type_to_string(ty: &Type) -> String {
    ty.to_token_stream().to_string().replace(' ', "")
}
