//! SELECT handlers.

use super::{ORDER_BY_PRIMARY_KEY, QUERY_OPTION, option_suffix};
use crate::scope::Scope;
use sqlchain_core::{Error, Hook};

/// Run the query and decode the rows into the destination.
///
/// A single-model destination with no matching row is `RecordNotFound`;
/// an empty list is not an error.
pub(super) fn query(scope: &mut Scope<'_>) {
    if let Some(direction) = scope.instance_get::<&'static str>(ORDER_BY_PRIMARY_KEY) {
        let primary = scope
            .descriptor()
            .and_then(|d| d.primary_field())
            .map(|f| f.column.clone());
        if let Some(column) = primary {
            if scope.search().orders.is_empty() {
                let order = format!(
                    "{}.{} {}",
                    scope.quoted_table_name(),
                    scope.quote(&column),
                    direction
                );
                scope.search_mut().order(order, false);
            }
        }
    }

    scope.prepare_query_sql();
    let option = option_suffix(scope, QUERY_OPTION);
    if !option.is_empty() {
        let sql = format!("{}{}", scope.sql(), option);
        scope.raw(sql);
    }

    let Some(rows) = scope.query_rows() else {
        return;
    };
    let result = scope.load_rows(&rows);
    if scope.check(result).is_none() {
        return;
    }
    scope.set_rows_affected(rows.len() as u64);
    if rows.is_empty() && !scope.loads_collection() {
        scope.add_error(Error::RecordNotFound);
    }
}

pub(super) fn after(scope: &mut Scope<'_>) {
    if !scope.has_destination() {
        scope.call_hook(Hook::AfterFind);
    }
}
