//! Condition accumulation for sqlchain.
//!
//! `sqlchain-query` holds the not-yet-rendered half of a query:
//!
//! - [`Expr`]: a SQL fragment with positional arguments, usable as a value
//!   inside other conditions (sub-queries)
//! - [`Arg`] / [`IntoArgs`]: argument conversion for condition methods
//! - [`Condition`]: the closed set of condition shapes (text, primary key,
//!   map, record, expression)
//! - [`Search`]: the per-query accumulator cloned along every chained call
//!
//! Rendering into final SQL happens in `sqlchain-session`, which owns the
//! dialect and the bound model.

pub mod condition;
pub mod expr;
pub mod search;

pub use condition::{Clause, Condition};
pub use expr::{Arg, Expr, IntoArgs, bind_placeholders, expr, expand_placeholders};
pub use search::{Order, Preload, Search, Selection, sanitize_group};
