//! Core types and traits for sqlchain.
//!
//! This crate provides the foundations every other layer builds on:
//!
//! - `Value`/`Row` for dynamically typed SQL data
//! - `Model`, `Record` and `Target` for struct-to-table mapping, and
//!   `BaseModel` with the usual id/timestamp columns
//! - `ModelDescriptor` and the process-wide descriptor cache
//! - `Executor` and `Dialect`, the two backend collaborator interfaces
//! - `Logger` and `LogMode` for statement and error logging

pub mod base;
pub mod descriptor;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod logger;
pub mod model;
pub mod naming;
pub mod row;
pub mod types;
pub mod value;

pub use base::BaseModel;
pub use descriptor::{
    FieldDescriptor, JoinTable, ModelDescriptor, NamingPolicy, RelationKind, Relationship,
    describe, describe_schema, naming_policy, set_naming_policy, table_name_of,
};
pub use dialect::{
    CommonDialect, Dialect, lookup_dialect, new_dialect, register_dialect, require_dialect,
};
pub use error::{
    AssociationError, AssociationErrorKind, CallbackError, Error, Errors, QueryError,
    QueryErrorKind, Result, SchemaError, TransactionError, TransactionErrorKind, TypeError,
};
pub use executor::{ExecResult, Executor, IsolationLevel, PreparedStatement};
pub use logger::{LogKind, LogMode, LogRecord, Logger, TracingLogger, dispatch_async};
pub use model::{FieldSchema, Hook, Hooks, Model, ModelSchema, Record, RelationSchema, Target};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use value::Value;
