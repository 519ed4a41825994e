//! SQL fragments with positional arguments.
//!
//! Every condition in a [`crate::Search`] is text plus arguments. Text uses
//! `?` as its only placeholder; arguments are expanded at render time:
//!
//! - a single value becomes one `?` and one bound value
//! - a list becomes `?,?,?` (or `NULL` when empty), for `IN (?)`
//! - a nested [`Expr`] is inlined with its own arguments
//!
//! The output keeps `?` placeholders. The dialect's numbered form, if any,
//! is applied last by [`bind_placeholders`], so argument order always
//! matches placeholder order.

use sqlchain_core::{Dialect, Error, Result, Value};

/// One argument of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    List(Vec<Value>),
    Expr(Expr),
}

/// A SQL fragment plus its arguments, usable wherever a value is.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    sql: String,
    args: Vec<Arg>,
}

/// Shorthand for [`Expr::new`].
pub fn expr(sql: impl Into<String>, args: impl IntoArgs) -> Expr {
    Expr::new(sql, args)
}

impl Expr {
    pub fn new(sql: impl Into<String>, args: impl IntoArgs) -> Self {
        Self {
            sql: sql.into(),
            args: args.into_args(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// The same expression wrapped in parentheses.
    pub fn parenthesized(&self) -> Expr {
        Expr {
            sql: format!("({})", self.sql),
            args: self.args.clone(),
        }
    }

    /// Flatten to `?`-placeholder SQL and the values in placeholder order.
    #[allow(clippy::result_large_err)]
    pub fn render(&self) -> Result<(String, Vec<Value>)> {
        let mut values = Vec::new();
        let sql = expand_placeholders(&self.sql, &self.args, &mut values)?;
        Ok((sql, values))
    }
}

fn count_mismatch(sql: &str, placeholders: usize, args: usize) -> Error {
    Error::InvalidSql(format!(
        "{placeholders} placeholder(s) but {args} argument(s) in `{sql}`"
    ))
}

/// Expand `args` into the `?` placeholders of `sql`, appending bound values to `out`.
///
/// Placeholders inside single-quoted literals are left alone. Every
/// placeholder consumes exactly one argument; a count mismatch in either
/// direction is an invalid-SQL error.
#[allow(clippy::result_large_err)]
pub fn expand_placeholders(sql: &str, args: &[Arg], out: &mut Vec<Value>) -> Result<String> {
    let mut rendered = String::with_capacity(sql.len() + args.len() * 2);
    let mut remaining = args.iter();
    let mut placeholders = 0;
    let mut in_literal = false;

    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                rendered.push(c);
            }
            '?' if !in_literal => {
                placeholders += 1;
                match remaining.next() {
                    Some(Arg::Value(v)) => {
                        out.push(v.clone());
                        rendered.push('?');
                    }
                    Some(Arg::List(values)) if values.is_empty() => rendered.push_str("NULL"),
                    Some(Arg::List(values)) => {
                        let marks = vec!["?"; values.len()];
                        rendered.push_str(&marks.join(","));
                        out.extend(values.iter().cloned());
                    }
                    Some(Arg::Expr(inner)) => {
                        rendered.push_str(&expand_placeholders(&inner.sql, &inner.args, out)?);
                    }
                    None => return Err(count_mismatch(sql, placeholders, args.len())),
                }
            }
            c => rendered.push(c),
        }
    }
    if placeholders != args.len() {
        return Err(count_mismatch(sql, placeholders, args.len()));
    }
    Ok(rendered)
}

/// Rewrite `?` placeholders into the dialect's form (`$1`, `$2`, ...),
/// checking that there is one per bound value.
#[allow(clippy::result_large_err)]
pub fn bind_placeholders(sql: &str, dialect: &dyn Dialect, params: usize) -> Result<String> {
    let numbered = dialect.bind_var(1) != "?";
    let mut rendered = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    let mut in_literal = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                rendered.push(c);
            }
            '?' if !in_literal => {
                index += 1;
                if numbered {
                    rendered.push_str(&dialect.bind_var(index));
                } else {
                    rendered.push('?');
                }
            }
            c => rendered.push(c),
        }
    }
    if index != params {
        return Err(count_mismatch(sql, index, params));
    }
    Ok(rendered)
}

/// Conversion into a list of condition arguments.
///
/// Implemented for `()`, single values, tuples of up to eight values and
/// `Vec<Arg>`. A `Vec` of scalars is one list argument, not many.
pub trait IntoArgs {
    fn into_args(self) -> Vec<Arg>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Arg> {
        Vec::new()
    }
}

impl IntoArgs for Vec<Arg> {
    fn into_args(self) -> Vec<Arg> {
        self
    }
}

impl IntoArgs for Arg {
    fn into_args(self) -> Vec<Arg> {
        vec![self]
    }
}

impl IntoArgs for Expr {
    fn into_args(self) -> Vec<Arg> {
        vec![Arg::Expr(self)]
    }
}

impl From<Expr> for Arg {
    fn from(e: Expr) -> Self {
        Arg::Expr(e)
    }
}

macro_rules! impl_scalar_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Arg::Value(Value::from(v))
                }
            }

            impl IntoArgs for $ty {
                fn into_args(self) -> Vec<Arg> {
                    vec![Arg::from(self)]
                }
            }
        )*
    };
}

impl_scalar_arg!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    &str,
    &String,
    Value,
    serde_json::Value,
    Option<i32>,
    Option<i64>,
    Option<String>,
    Option<&str>,
);

macro_rules! impl_list_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Arg {
                fn from(v: Vec<$ty>) -> Self {
                    Arg::List(v.into_iter().map(Value::from).collect())
                }
            }

            impl<const N: usize> From<[$ty; N]> for Arg {
                fn from(v: [$ty; N]) -> Self {
                    Arg::List(v.into_iter().map(Value::from).collect())
                }
            }

            impl IntoArgs for Vec<$ty> {
                fn into_args(self) -> Vec<Arg> {
                    vec![Arg::from(self)]
                }
            }
        )*
    };
}

impl_list_arg!(i32, i64, u32, u64, String, &str, Value);

macro_rules! impl_tuple_args {
    ($($name:ident),+) => {
        impl<$($name: Into<Arg>),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<Arg> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }
    };
}

impl_tuple_args!(A);
impl_tuple_args!(A, B);
impl_tuple_args!(A, B, C);
impl_tuple_args!(A, B, C, D);
impl_tuple_args!(A, B, C, D, E);
impl_tuple_args!(A, B, C, D, E, F);
impl_tuple_args!(A, B, C, D, E, F, G);
impl_tuple_args!(A, B, C, D, E, F, G, H);
