//! The default handlers of every pipeline.
//!
//! Each operation's chain is registered here in execution order. Handler
//! names carry the `sqlchain:` prefix so user callbacks can be placed
//! relative to them with `before`/`after`.
//!
//! Settings read by the handlers are listed as constants below. Session
//! settings (`Session::set`) and scope settings (`Scope::instance_set`)
//! both apply; the scope wins.

mod associations;
mod create;
mod delete;
mod preload;
mod query;
mod row_query;
mod transaction;
mod update;

use crate::callback::{Callbacks, Handler, Operation};
use crate::scope::Scope;
use sqlchain_core::Hook;
use std::sync::Arc;

pub(crate) use associations::link_join_row;

/// `false` disables saving of associated records.
pub const SAVE_ASSOCIATIONS: &str = "sqlchain:save_associations";
/// Set by `update_column(s)`: no hooks, no timestamps, no associations.
pub const UPDATE_COLUMN: &str = "sqlchain:update_column";
/// `"ASC"`/`"DESC"` when the query should be ordered by primary key.
pub const ORDER_BY_PRIMARY_KEY: &str = "sqlchain:order_by_primary_key";
/// Text appended to INSERT statements.
pub const INSERT_OPTION: &str = "sqlchain:insert_option";
/// Text appended to UPDATE statements.
pub const UPDATE_OPTION: &str = "sqlchain:update_option";
/// Text appended to DELETE statements.
pub const DELETE_OPTION: &str = "sqlchain:delete_option";
/// Text appended to SELECT statements.
pub const QUERY_OPTION: &str = "sqlchain:query_option";
/// Text appended to CREATE TABLE statements.
pub const TABLE_OPTIONS: &str = "sqlchain:table_options";
/// Set on the scope when `begin_transaction` opened the transaction.
pub const STARTED_TRANSACTION: &str = "sqlchain:started_transaction";

fn handler(f: fn(&mut Scope<'_>)) -> Handler {
    Arc::new(f)
}

fn add(callbacks: &mut Callbacks, operation: Operation, name: &str, f: fn(&mut Scope<'_>)) {
    push_default(callbacks, operation, name, f, false);
}

fn add_cleanup(callbacks: &mut Callbacks, operation: Operation, name: &str, f: fn(&mut Scope<'_>)) {
    push_default(callbacks, operation, name, f, true);
}

// Defaults carry no constraints, so they always resolve.
fn push_default(
    callbacks: &mut Callbacks,
    operation: Operation,
    name: &str,
    f: fn(&mut Scope<'_>),
    cleanup: bool,
) {
    if let Err(err) = callbacks
        .pipeline_mut(operation)
        .push(name, handler(f), None, None, cleanup)
    {
        tracing::error!(%err, callback = name, "Default callback rejected");
    }
}

pub(crate) fn register_defaults(callbacks: &mut Callbacks) {
    use Operation::{Create, Delete, Query, RowQuery, Update};

    add(callbacks, Create, "sqlchain:begin_transaction", transaction::begin);
    add(callbacks, Create, "sqlchain:before_create", create::before);
    add(
        callbacks,
        Create,
        "sqlchain:save_before_associations",
        associations::save_before,
    );
    add(callbacks, Create, "sqlchain:update_time_stamp", create::stamp);
    add(callbacks, Create, "sqlchain:create", create::insert);
    add(
        callbacks,
        Create,
        "sqlchain:save_after_associations",
        associations::save_after,
    );
    add(callbacks, Create, "sqlchain:after_create", create::after);
    add_cleanup(
        callbacks,
        Create,
        "sqlchain:commit_or_rollback_transaction",
        transaction::commit_or_rollback,
    );

    add(
        callbacks,
        Update,
        "sqlchain:assign_updating_attributes",
        update::assign_attributes,
    );
    add(callbacks, Update, "sqlchain:begin_transaction", transaction::begin);
    add(callbacks, Update, "sqlchain:before_update", update::before);
    add(
        callbacks,
        Update,
        "sqlchain:save_before_associations",
        associations::save_before,
    );
    add(callbacks, Update, "sqlchain:update_time_stamp", update::stamp);
    add(callbacks, Update, "sqlchain:update", update::update);
    add(
        callbacks,
        Update,
        "sqlchain:save_after_associations",
        associations::save_after,
    );
    add(callbacks, Update, "sqlchain:after_update", update::after);
    add_cleanup(
        callbacks,
        Update,
        "sqlchain:commit_or_rollback_transaction",
        transaction::commit_or_rollback,
    );

    add(callbacks, Delete, "sqlchain:begin_transaction", transaction::begin);
    add(callbacks, Delete, "sqlchain:before_delete", delete::before);
    add(callbacks, Delete, "sqlchain:delete", delete::delete);
    add(callbacks, Delete, "sqlchain:after_delete", delete::after);
    add_cleanup(
        callbacks,
        Delete,
        "sqlchain:commit_or_rollback_transaction",
        transaction::commit_or_rollback,
    );

    add(callbacks, Query, "sqlchain:query", query::query);
    add(callbacks, Query, "sqlchain:preload", preload::preload);
    add(callbacks, Query, "sqlchain:after_query", query::after);

    add(callbacks, RowQuery, "sqlchain:row_query", row_query::row_query);
}

/// A string option setting rendered with a leading space, or empty.
fn option_suffix(scope: &Scope<'_>, name: &str) -> String {
    match scope.get::<String>(name) {
        Some(option) if !option.trim().is_empty() => format!(" {}", option.trim()),
        _ => String::new(),
    }
}

/// Run hooks in order, stopping at the first failure.
fn call_hooks(scope: &mut Scope<'_>, hooks: &[Hook]) {
    for &hook in hooks {
        if scope.has_error() {
            return;
        }
        scope.call_hook(hook);
    }
}

/// Guard against UPDATE/DELETE statements that would touch every row.
fn check_global_update(scope: &mut Scope<'_>) -> bool {
    let blocked = scope.session().block_global_update
        && !scope.search().has_conditions()
        && scope.primary_key_zero();
    if blocked {
        scope.add_error(sqlchain_core::Error::MissingWhereClause);
    }
    !blocked
}
