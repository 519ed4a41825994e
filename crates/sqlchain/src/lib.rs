//! sqlchain - a chainable, callback-driven ORM core for SQL databases.
//!
//! sqlchain maps Rust structs to tables and builds queries by chaining
//! calls on a cheap, cloneable [`Session`]:
//!
//! - Struct mapping with `#[derive(Model)]`
//! - Chainable conditions, ordering, grouping and sub-queries
//! - Create/query/update/delete pipelines made of named, reorderable
//!   callbacks, with lifecycle hooks, timestamps and soft delete
//! - Eager loading and association handles for has-one, has-many,
//!   belongs-to and many-to-many relations
//! - Additive schema migration
//!
//! The database itself is reached through an [`Executor`] supplied by the
//! caller; SQL differences are handled by a [`Dialect`] looked up by name.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlchain::prelude::*;
//!
//! #[derive(Debug, Clone, Default, Model)]
//! struct User {
//!     #[sqlchain(primary_key, auto_increment)]
//!     id: i64,
//!     #[sqlchain(size = 100, index)]
//!     name: String,
//!     age: i32,
//! }
//!
//! fn example(executor: std::sync::Arc<dyn Executor>) -> Result<()> {
//!     let db = sqlchain::open("common", executor)?;
//!     db.auto_migrate(&[User::schema()]).result()?;
//!
//!     let mut user = User { name: "jinzhu".into(), age: 18, ..User::default() };
//!     db.create(&mut user).result()?;
//!
//!     let mut adults: Vec<User> = Vec::new();
//!     db.filter("age >= ?", 18).order("name").find(&mut adults).result()?;
//!
//!     db.model(&user).update("age", 19).result()?;
//!     db.delete(&mut user).result()
//! }
//! ```

use std::sync::Arc;

pub use sqlchain_core::{
    AssociationError, BaseModel, CallbackError, CommonDialect, Dialect, Error, Errors, ExecResult, Executor,
    FieldDescriptor, FieldSchema, FromValue, Hook, Hooks, IsolationLevel, JoinTable, LogKind,
    LogMode, LogRecord, Logger, Model, ModelDescriptor, ModelSchema, NamingPolicy, Record,
    RelationKind, RelationSchema, Relationship, Result, Row, SqlType, Target, TracingLogger,
    Value, describe, lookup_dialect, new_dialect, register_dialect, set_naming_policy,
};

pub use sqlchain_macros::Model;

pub use sqlchain_query::{Arg, Clause, Condition, Expr, IntoArgs, Order, Search, expr};

pub use sqlchain_session::callbacks;
pub use sqlchain_session::{
    Association, Callbacks, Handler, Operation, Pipeline, Registrar, Scope, Session, Settings,
    TableRef,
};

/// Open a session on `executor` with the dialect registered as
/// `dialect_name`.
///
/// The executor is pinged first; a backend that cannot be reached is
/// reported here rather than on the first query. Unknown dialect names
/// fall back to [`CommonDialect`].
#[allow(clippy::result_large_err)]
pub fn open(dialect_name: &str, executor: Arc<dyn Executor>) -> Result<Session> {
    Session::open(dialect_name, executor)
}

/// Commonly used items.
pub mod prelude {
    pub use crate::{
        Association, BaseModel, Condition, Error, Executor, Expr, Hooks, LogMode, Model, Result,
        Row, Session, Value, expr, open,
    };
}
