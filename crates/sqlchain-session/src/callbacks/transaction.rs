//! Wrapping writes in a transaction.

use super::STARTED_TRANSACTION;
use crate::scope::Scope;

/// Open a transaction unless the session already runs in one. An
/// executor that cannot start one leaves the write unwrapped.
pub(super) fn begin(scope: &mut Scope<'_>) {
    if scope.executor().is_transaction() {
        return;
    }
    match scope.executor().begin(None) {
        Ok(tx) => {
            scope.set_executor(tx);
            scope.instance_set(STARTED_TRANSACTION, true);
        }
        Err(e) => tracing::debug!(error = %e, "Running write without a transaction"),
    }
}

/// Commit the transaction `begin` opened, or roll it back on error.
pub(super) fn commit_or_rollback(scope: &mut Scope<'_>) {
    if !scope.instance_get::<bool>(STARTED_TRANSACTION).unwrap_or(false) {
        return;
    }
    if scope.has_error() {
        if let Err(e) = scope.executor().rollback() {
            tracing::warn!(error = %e, "Rollback failed");
        }
    } else if let Err(e) = scope.executor().commit() {
        scope.add_error(e);
    }
}
