//! Saving related records along with their owner.
//!
//! Belongs-to targets are saved first so the owner can store their key.
//! Has-one, has-many and many-to-many targets are saved after the owner,
//! once its key is known.

use super::{SAVE_ASSOCIATIONS, UPDATE_COLUMN};
use crate::scope::Scope;
use crate::session::Session;
use sqlchain_core::{Error, JoinTable, Record, RelationKind, Result, Value};

fn enabled(scope: &Scope<'_>) -> bool {
    scope.get::<bool>(SAVE_ASSOCIATIONS).unwrap_or(true)
        && !scope.flag(UPDATE_COLUMN)
        && scope.update_attrs.is_none()
}

/// A related value with every column blank is a placeholder, not a record.
fn is_blank(record: &dyn Record) -> bool {
    let desc = record.record_schema().describe();
    desc.columns()
        .all(|f| record.field_value(&f.name).is_none_or(|v| v.is_blank()))
}

pub(super) fn save_before(scope: &mut Scope<'_>) {
    if !enabled(scope) {
        return;
    }
    let Some(desc) = scope.descriptor().cloned() else {
        return;
    };
    let session = scope.nested_session();
    let mut failure: Option<Error> = None;

    for field in desc.relationships() {
        let Some(relationship) = &field.relationship else {
            continue;
        };
        if relationship.kind != RelationKind::BelongsTo {
            continue;
        }
        for record in scope.records_mut() {
            let mut key = None;
            for related in record.related_records_mut(&field.name) {
                if is_blank(related) {
                    continue;
                }
                if let Err(e) = session.save_record(&mut *related) {
                    failure = Some(e);
                    break;
                }
                key = related.field_value(&relationship.related_field);
            }
            if let Some(key) = key {
                if let Err(e) = record.set_field_value(&relationship.owner_field, key) {
                    failure = Some(e);
                }
            }
            if failure.is_some() {
                break;
            }
        }
        if failure.is_some() {
            break;
        }
    }
    if let Some(e) = failure {
        scope.add_error(e);
    }
}

pub(super) fn save_after(scope: &mut Scope<'_>) {
    if !enabled(scope) {
        return;
    }
    let Some(desc) = scope.descriptor().cloned() else {
        return;
    };
    let session = scope.nested_session();
    let mut failure: Option<Error> = None;

    'fields: for field in desc.relationships() {
        let Some(relationship) = &field.relationship else {
            continue;
        };
        if relationship.kind == RelationKind::BelongsTo {
            continue;
        }
        for record in scope.records_mut() {
            let owner_key = record
                .field_value(&relationship.owner_field)
                .unwrap_or(Value::Null);
            for related in record.related_records_mut(&field.name) {
                if is_blank(related) {
                    continue;
                }
                let result = match &relationship.join_table {
                    Some(join) => session.save_record(&mut *related).and_then(|_| {
                        let related_key = related
                            .field_value(&relationship.related_field)
                            .unwrap_or(Value::Null);
                        link_join_row(&session, join, &owner_key, &related_key)
                    }),
                    None => related
                        .set_field_value(&relationship.related_field, owner_key.clone())
                        .and_then(|()| session.save_record(&mut *related).map(|_| ())),
                };
                if let Err(e) = result {
                    failure = Some(e);
                    break 'fields;
                }
            }
        }
    }
    if let Some(e) = failure {
        scope.add_error(e);
    }
}

/// Insert a join row unless the pair is already linked.
pub(crate) fn link_join_row(
    session: &Session,
    join: &JoinTable,
    owner_key: &Value,
    related_key: &Value,
) -> Result<()> {
    let dialect = session.dialect();
    let table = dialect.quote(&join.table);
    let foreign_key = dialect.quote(&join.foreign_key);
    let association_key = dialect.quote(&join.association_foreign_key);
    let dummy = match dialect.select_from_dummy_table() {
        "" => String::new(),
        table => format!(" FROM {}", table),
    };
    let sql = format!(
        "INSERT INTO {t} ({fk},{ak}) SELECT ?,?{dummy} WHERE NOT EXISTS (SELECT * FROM {t} WHERE {fk} = ? AND {ak} = ?)",
        t = table,
        fk = foreign_key,
        ak = association_key,
        dummy = dummy,
    );
    session
        .exec(
            &sql,
            (
                owner_key.clone(),
                related_key.clone(),
                owner_key.clone(),
                related_key.clone(),
            ),
        )
        .result()
}
