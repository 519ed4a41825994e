//! Loading relations after the main query.
//!
//! Each requested relation costs one extra query: the owner keys of every
//! loaded record go into a single `IN (...)` list, and the rows that come
//! back are grouped by key and handed to the matching owners.

use crate::scope::Scope;
use crate::session::Session;
use sqlchain_core::{AssociationError, Error, Relationship, Result, Row, Value};
use sqlchain_query::Clause;
use std::collections::{HashMap, HashSet};

/// Name of the owner-key column added to many-to-many preload rows.
const OWNER_KEY: &str = "__owner_key";

pub(super) fn preload(scope: &mut Scope<'_>) {
    let preloads = scope.search().preload.clone();
    if preloads.is_empty() || scope.records().is_empty() {
        return;
    }
    let Some(desc) = scope.descriptor().cloned() else {
        return;
    };
    let session = scope.nested_session();

    for preload in &preloads {
        if scope.has_error() {
            return;
        }
        if preload.path.contains('.') {
            scope.add_error(Error::InvalidSql(format!(
                "nested preload {} is not supported",
                preload.path
            )));
            return;
        }
        let relation = desc
            .field(&preload.path)
            .and_then(|f| f.relationship.clone().map(|r| (f.name.clone(), r)));
        let Some((field, relationship)) = relation else {
            scope.add_error(AssociationError::invalid(&preload.path, desc.name));
            return;
        };
        tracing::debug!(model = desc.name, relation = %field, "Preloading");
        let result = load(scope, &session, &field, &relationship, &preload.conditions);
        scope.check(result);
    }
}

fn load(
    scope: &mut Scope<'_>,
    session: &Session,
    field: &str,
    relationship: &Relationship,
    conditions: &[Clause],
) -> Result<()> {
    let mut seen = HashSet::new();
    let keys: Vec<Value> = scope
        .records()
        .iter()
        .filter_map(|r| r.field_value(&relationship.owner_field))
        .filter(|v| !v.is_null() && seen.insert(v.match_key()))
        .collect();

    let rows = if keys.is_empty() {
        Vec::new()
    } else {
        fetch(session, relationship, conditions, keys)?
    };

    let key_column = match &relationship.join_table {
        Some(_) => OWNER_KEY,
        None => relationship.related_column.as_str(),
    };
    let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
    for row in rows {
        if let Some(key) = row.get_by_name(key_column).map(Value::match_key) {
            grouped.entry(key).or_default().push(row);
        }
    }

    for record in scope.records_mut() {
        let matching = record
            .field_value(&relationship.owner_field)
            .and_then(|key| grouped.get(&key.match_key()))
            .map_or(&[][..], Vec::as_slice);
        record.attach_related(field, matching)?;
    }
    Ok(())
}

fn fetch(
    session: &Session,
    relationship: &Relationship,
    conditions: &[Clause],
    keys: Vec<Value>,
) -> Result<Vec<Row>> {
    let dialect = session.dialect();
    let related_table = dialect.quote(&relationship.related_table);
    let related_column = dialect.quote(&relationship.related_column);

    let mut query = conditions.iter().fold(session.clone(), |q, clause| {
        q.filter(clause.condition.clone(), clause.args.clone())
    });
    query = match &relationship.join_table {
        Some(join) => {
            let join_table = dialect.quote(&join.table);
            query
                .joins(
                    format!(
                        "INNER JOIN {jt} ON {jt}.{afk} = {rt}.{rc}",
                        jt = join_table,
                        afk = dialect.quote(&join.association_foreign_key),
                        rt = related_table,
                        rc = related_column,
                    ),
                    (),
                )
                .select(
                    format!(
                        "{}.*, {}.{} AS {}",
                        related_table,
                        join_table,
                        dialect.quote(&join.foreign_key),
                        dialect.quote(OWNER_KEY)
                    ),
                    (),
                )
                .filter(
                    format!("{}.{} IN (?)", join_table, dialect.quote(&join.foreign_key)),
                    keys,
                )
        }
        None => query.filter(format!("{}.{} IN (?)", related_table, related_column), keys),
    };
    query.schema_rows(relationship.related_schema())
}
