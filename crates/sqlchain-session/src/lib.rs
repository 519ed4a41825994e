//! Sessions, scopes and callback pipelines for sqlchain.
//!
//! `sqlchain-session` is the **execution layer**. A [`Session`] is a cheap,
//! cloneable handle: every chained call returns a new session carrying one
//! more piece of query state, and every terminal call builds a [`Scope`]
//! and runs it through the matching callback [`Pipeline`].
//!
//! # Role In The Architecture
//!
//! - **Session**: executor, dialect, callbacks, settings and the
//!   accumulated [`Search`](sqlchain_query::Search).
//! - **Scope**: one operation's working state; renders SQL and arguments.
//! - **Callbacks**: named, ordered handler chains per operation kind. The
//!   default chains implement create/query/update/delete, timestamps,
//!   soft delete, hooks, preloading and association saving.
//! - **Association**: relation-scoped operations on one loaded record.
//!
//! # Example
//!
//! ```ignore
//! let db = Session::new(executor, new_dialect("common"));
//! let mut user = User::default();
//! let found = db.filter("name = ?", "jinzhu").first(&mut user);
//! if found.record_not_found() {
//!     // ...
//! }
//! ```

pub mod association;
pub mod callback;
pub mod callbacks;
pub mod migrate;
pub mod scope;
pub mod session;
pub mod settings;

pub use association::Association;
pub use callback::{Callbacks, Handler, Operation, Pipeline, Registrar};
pub use migrate::TableRef;
pub use scope::Scope;
pub use session::Session;
pub use settings::Settings;

#[cfg(test)]
pub(crate) mod testing;
