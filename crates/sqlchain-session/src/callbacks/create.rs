//! INSERT handlers.

use super::{INSERT_OPTION, call_hooks, option_suffix};
use crate::scope::Scope;
use sqlchain_core::{Hook, Value};

pub(super) fn before(scope: &mut Scope<'_>) {
    call_hooks(scope, &[Hook::BeforeSave, Hook::BeforeCreate]);
}

pub(super) fn after(scope: &mut Scope<'_>) {
    call_hooks(scope, &[Hook::AfterCreate, Hook::AfterSave]);
}

/// Fill blank `created_at`/`updated_at` with the current time.
pub(super) fn stamp(scope: &mut Scope<'_>) {
    let now = Value::now();
    let mut failure = None;
    for column in ["created_at", "updated_at"] {
        if !scope.has_column(column) {
            continue;
        }
        for record in scope.records_mut() {
            let blank = record.field_value(column).is_none_or(|v| v.is_blank());
            if blank {
                if let Err(e) = record.set_field_value(column, now.clone()) {
                    failure = Some(e);
                }
            }
        }
    }
    if let Some(e) = failure {
        scope.add_error(e);
    }
}

/// One INSERT per bound record; the generated key is written back.
pub(super) fn insert(scope: &mut Scope<'_>) {
    let Some(desc) = scope.descriptor().cloned() else {
        scope.add_error(sqlchain_core::Error::Unaddressable);
        return;
    };
    let table = scope.quoted_table_name();
    let option = option_suffix(scope, INSERT_OPTION);
    let primary = desc.primary_field().cloned();
    let returning = primary
        .as_ref()
        .map(|pk| {
            scope
                .dialect()
                .last_insert_id_returning_suffix(&desc.table_name, &pk.column)
        })
        .unwrap_or_default();

    let count = scope.records().len();
    let mut affected = 0;
    for index in 0..count {
        if scope.has_error() {
            return;
        }
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut key_blank = false;
        if let Some(record) = scope.records().get(index) {
            for field in desc.columns() {
                if !scope.changeable_field(field) {
                    continue;
                }
                let value = record.field_value(&field.name).unwrap_or(Value::Null);
                if field.primary_key && value.is_blank() {
                    key_blank = true;
                    continue;
                }
                if value.is_blank() && field.default.is_some() {
                    continue;
                }
                columns.push(scope.quote(&field.column));
                values.push(value);
            }
        }

        scope.reset_statement();
        let sql = if columns.is_empty() {
            format!(
                "INSERT INTO {} {}{}{}",
                table,
                scope.dialect().default_value_str(),
                option,
                returning
            )
        } else {
            let marks: Vec<String> = values.into_iter().map(|v| scope.add_to_vars(v)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}){}{}",
                table,
                columns.join(","),
                marks.join(","),
                option,
                returning
            )
        };
        scope.raw(sql);

        let new_key = if primary.is_some() && key_blank && !returning.is_empty() {
            let key = scope
                .query_rows()
                .and_then(|rows| rows.first().and_then(|row| row.get(0).cloned()));
            if key.is_some() {
                affected += 1;
            }
            key
        } else {
            let result = scope.execute();
            if let Some(r) = &result {
                affected += r.rows_affected;
            }
            result.and_then(|r| r.last_insert_id).map(Value::BigInt)
        };
        if let (Some(pk), true, Some(key)) = (&primary, key_blank, new_key) {
            let result = match scope.records_mut().get_mut(index) {
                Some(record) => record.set_field_value(&pk.name, key),
                None => Ok(()),
            };
            scope.check(result);
        }
    }
    scope.set_rows_affected(affected);
}
