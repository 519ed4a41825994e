//! DELETE handlers.

use super::{DELETE_OPTION, call_hooks, check_global_update, option_suffix};
use crate::scope::Scope;
use sqlchain_core::{Hook, Value};

pub(super) fn before(scope: &mut Scope<'_>) {
    call_hooks(scope, &[Hook::BeforeDelete]);
}

pub(super) fn after(scope: &mut Scope<'_>) {
    call_hooks(scope, &[Hook::AfterDelete]);
}

/// Stamp `deleted_at` when the model has one, otherwise delete the rows.
/// `unscoped` always deletes.
pub(super) fn delete(scope: &mut Scope<'_>) {
    if !check_global_update(scope) {
        return;
    }
    scope.reset_statement();
    let table = scope.quoted_table_name();
    let option = option_suffix(scope, DELETE_OPTION);
    let sql = if !scope.search().unscoped && scope.has_column("deleted_at") {
        let column = scope.quote("deleted_at");
        let mark = scope.add_to_vars(Value::now());
        let conditions = scope.combined_conditions_sql();
        format!("UPDATE {} SET {} = {}{}{}", table, column, mark, conditions, option)
    } else {
        let conditions = scope.combined_conditions_sql();
        format!("DELETE FROM {}{}{}", table, conditions, option)
    };
    scope.raw(sql);
    scope.exec();
}
