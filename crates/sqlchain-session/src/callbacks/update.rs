//! UPDATE handlers.

use super::{UPDATE_COLUMN, UPDATE_OPTION, call_hooks, check_global_update, option_suffix};
use crate::scope::Scope;
use sqlchain_core::{Error, Hook, Value};
use sqlchain_query::Condition;

/// Turn the requested attributes into the columns that actually change,
/// writing them onto the bound records. Nothing changing skips the rest
/// of the chain.
pub(super) fn assign_attributes(scope: &mut Scope<'_>) {
    let Some(attrs) = scope.update_interface.take() else {
        return;
    };
    let pairs: Vec<(String, Value)> = match attrs {
        Condition::Map(pairs) => pairs,
        Condition::Record(record) => {
            let desc = record.record_schema().describe();
            desc.columns()
                .filter_map(|f| {
                    record
                        .field_value(&f.name)
                        .filter(|v| !v.is_blank())
                        .map(|v| (f.name.clone(), v))
                })
                .collect()
        }
        _ => {
            scope.add_error(Error::InvalidSql(
                "updates take a column map or a model".to_string(),
            ));
            return;
        }
    };

    let desc = scope.descriptor().cloned();
    let mut changed: Vec<(String, Value)> = Vec::new();
    let mut failure = None;
    for (key, value) in pairs {
        let field = desc
            .as_ref()
            .and_then(|d| d.field(&key))
            .filter(|f| f.is_normal())
            .cloned();
        let Some(field) = field else {
            changed.push((key, value));
            continue;
        };
        if !scope.changeable_field(&field) {
            continue;
        }
        let records = scope.records();
        let differs = records.is_empty()
            || records.iter().any(|r| {
                r.field_value(&field.name)
                    .is_none_or(|current| current.match_key() != value.match_key())
            });
        if !differs {
            continue;
        }
        for record in scope.records_mut() {
            if let Err(e) = record.set_field_value(&field.name, value.clone()) {
                failure = Some(e);
            }
        }
        changed.push((field.column.clone(), value));
    }

    if let Some(e) = failure {
        scope.add_error(e);
        return;
    }
    if changed.is_empty() {
        scope.skip_left();
        return;
    }
    scope.update_attrs = Some(changed);
}

pub(super) fn before(scope: &mut Scope<'_>) {
    if !scope.flag(UPDATE_COLUMN) {
        call_hooks(scope, &[Hook::BeforeSave, Hook::BeforeUpdate]);
    }
}

pub(super) fn after(scope: &mut Scope<'_>) {
    if !scope.flag(UPDATE_COLUMN) {
        call_hooks(scope, &[Hook::AfterUpdate, Hook::AfterSave]);
    }
}

pub(super) fn stamp(scope: &mut Scope<'_>) {
    if scope.flag(UPDATE_COLUMN) || !scope.has_column("updated_at") {
        return;
    }
    let result = scope.set_column("updated_at", Value::now());
    scope.check(result);
}

/// `UPDATE t SET ...` with the changed attributes, or every column of the
/// bound record for a full save.
pub(super) fn update(scope: &mut Scope<'_>) {
    if !check_global_update(scope) {
        return;
    }
    scope.reset_statement();
    let mut sets = Vec::new();
    match scope.update_attrs.clone() {
        Some(attrs) => {
            for (column, value) in attrs {
                let column = scope.quote(&column);
                let mark = scope.add_to_vars(value);
                sets.push(format!("{} = {}", column, mark));
            }
        }
        None => {
            let Some(desc) = scope.descriptor().cloned() else {
                scope.add_error(Error::Unaddressable);
                return;
            };
            let values: Vec<(String, Value)> = match scope.records().first() {
                Some(record) => desc
                    .columns()
                    .filter(|f| !f.primary_key && scope.changeable_field(f))
                    .map(|f| {
                        (
                            f.column.clone(),
                            record.field_value(&f.name).unwrap_or(Value::Null),
                        )
                    })
                    .collect(),
                None => Vec::new(),
            };
            for (column, value) in values {
                let column = scope.quote(&column);
                let mark = scope.add_to_vars(value);
                sets.push(format!("{} = {}", column, mark));
            }
        }
    }
    if sets.is_empty() {
        return;
    }

    let table = scope.quoted_table_name();
    let conditions = scope.combined_conditions_sql();
    let option = option_suffix(scope, UPDATE_OPTION);
    scope.raw(format!(
        "UPDATE {} SET {}{}{}",
        table,
        sets.join(", "),
        conditions,
        option
    ));
    scope.exec();
}
