use super::{QUERY_OPTION, option_suffix};
use crate::scope::Scope;

/// Run the query and keep the raw rows.
pub(super) fn row_query(scope: &mut Scope<'_>) {
    scope.prepare_query_sql();
    let option = option_suffix(scope, QUERY_OPTION);
    if !option.is_empty() {
        let sql = format!("{}{}", scope.sql(), option);
        scope.raw(sql);
    }
    if let Some(rows) = scope.query_rows() {
        scope.set_rows_affected(rows.len() as u64);
        scope.set_rows(rows);
    }
}
