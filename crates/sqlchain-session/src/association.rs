//! Relation-scoped operations on one loaded record.
//!
//! An [`Association`] is obtained with [`Session::association`] on a
//! session bound to a single record with a primary key. Creation problems
//! (nothing bound, blank key, unknown or non-relation field) are stored on
//! the handle; every operation then returns that error without touching
//! the database.

use crate::callbacks::link_join_row;
use crate::session::Session;
use sqlchain_core::naming::to_snake_case;
use sqlchain_core::{
    AssociationError, Error, RelationKind, Relationship, Result, Target, Value,
};
use sqlchain_query::Arg;

/// The owner side of an association, resolved once.
#[derive(Debug, Clone)]
struct Owner {
    table: String,
    primary_column: String,
    primary_key: Value,
    /// Value of the owner field the relation links through
    link_key: Value,
}

/// A handle on one relation field of one record.
#[derive(Debug)]
pub struct Association {
    session: Session,
    field: String,
    relationship: Option<Relationship>,
    owner: Option<Owner>,
    error: Option<Error>,
}

impl Session {
    /// A handle on relation `field` of the bound record.
    pub fn association(&self, field: &str) -> Association {
        Association::new(self, field)
    }

    /// Load the records related to the bound one into `out`.
    ///
    /// Keys are tried in order: `foreign_keys`, then `<out model>_id`, then
    /// `<bound model>_id`. The first key that resolves decides the query:
    ///
    /// - a relation field of the bound model loads through that relation
    /// - a column of the bound model is matched against `out`'s primary key
    /// - a column of `out`'s model is matched against the bound primary key
    #[track_caller]
    pub fn related<T: Target>(&self, out: &mut T, foreign_keys: &[&str]) -> Session {
        let mut result = self.clone();
        let source = match self.value.as_deref() {
            Some(value) if !value.is_collection() => value,
            _ => {
                result.add_error(Error::Unaddressable);
                return result;
            }
        };
        let Some(record) = source.records().first().copied() else {
            result.add_error(Error::Unaddressable);
            return result;
        };
        let from = source.target_schema().describe();
        let to = out.target_schema().describe();
        let query = self.chain(|s| s.value = None);
        let dialect = self.dialect();

        let keys: Vec<String> = foreign_keys
            .iter()
            .map(|k| (*k).to_string())
            .chain([
                format!("{}_id", to_snake_case(to.name)),
                format!("{}_id", to_snake_case(from.name)),
            ])
            .collect();

        for key in &keys {
            if let Some(field) = from.field(key) {
                if field.relationship.is_some() {
                    if let Err(e) = self.association(&field.name).find(out) {
                        result.add_error(e);
                    }
                    return result;
                }
                if field.is_normal() {
                    let Some(primary) = to.primary_field() else {
                        result.add_error(AssociationError::blank_primary_key());
                        return result;
                    };
                    let link = record.field_value(&field.name).unwrap_or(Value::Null);
                    let condition = format!(
                        "{}.{} = ?",
                        dialect.quote(&to.table_name),
                        dialect.quote(&primary.column)
                    );
                    return query.filter(condition, link).first(out);
                }
            }
            if let Some(field) = to.field(key).filter(|f| f.is_normal()) {
                let owner_key = from
                    .primary_field()
                    .and_then(|pk| record.field_value(&pk.name))
                    .unwrap_or(Value::Null);
                let condition = format!(
                    "{}.{} = ?",
                    dialect.quote(&to.table_name),
                    dialect.quote(&field.column)
                );
                return query.filter(condition, owner_key).find(out);
            }
        }

        result.add_error(AssociationError::invalid(&keys.join(", "), from.name));
        result
    }
}

impl Association {
    fn new(session: &Session, field: &str) -> Self {
        let mut handle = Self {
            session: session.new_session(),
            field: field.to_string(),
            relationship: None,
            owner: None,
            error: None,
        };
        match Self::resolve(session, field) {
            Ok((relationship, owner)) => {
                handle.relationship = Some(relationship);
                handle.owner = Some(owner);
            }
            Err(e) => handle.error = Some(e),
        }
        handle
    }

    fn resolve(session: &Session, field: &str) -> Result<(Relationship, Owner)> {
        let value = session.value.as_deref().ok_or(Error::Unaddressable)?;
        if value.is_collection() {
            return Err(Error::Unaddressable);
        }
        let records = value.records();
        let record = *records.first().ok_or(Error::Unaddressable)?;
        let desc = value.target_schema().describe();

        let primary = desc.primary_field().ok_or_else(AssociationError::blank_primary_key)?;
        let primary_key = record
            .field_value(&primary.name)
            .filter(|v| !v.is_blank())
            .ok_or_else(AssociationError::blank_primary_key)?;

        let relationship = desc
            .field(field)
            .and_then(|f| f.relationship.clone())
            .ok_or_else(|| AssociationError::invalid(field, desc.name))?;
        let link_key = record
            .field_value(&relationship.owner_field)
            .unwrap_or(Value::Null);

        let owner = Owner {
            table: desc.table_name.clone(),
            primary_column: primary.column.clone(),
            primary_key,
            link_key,
        };
        Ok((relationship, owner))
    }

    /// The error stored on this handle, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn ready(&self) -> Result<(&Relationship, &Owner)> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        match (&self.relationship, &self.owner) {
            (Some(r), Some(o)) => Ok((r, o)),
            _ => Err(AssociationError::invalid(&self.field, "association")),
        }
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.error = Some(match self.error.take() {
                Some(existing) => existing.merge(e.clone()),
                None => e.clone(),
            });
        }
        result
    }

    /// A session restricted to the related rows of the owner.
    fn related_query(&self) -> Result<(Session, Relationship)> {
        let (relationship, owner) = self.ready()?;
        let dialect = self.session.dialect();
        let related_table = dialect.quote(&relationship.related_table);
        let related_column = dialect.quote(&relationship.related_column);
        let query = match &relationship.join_table {
            Some(join) => {
                let join_table = dialect.quote(&join.table);
                self.session
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
                    .filter(
                        format!("{}.{} = ?", join_table, dialect.quote(&join.foreign_key)),
                        owner.link_key.clone(),
                    )
            }
            None => self.session.filter(
                format!("{}.{} = ?", related_table, related_column),
                owner.link_key.clone(),
            ),
        };
        Ok((query, relationship.clone()))
    }

    /// Load the related records into `out`.
    #[track_caller]
    pub fn find<T: Target>(&mut self, out: &mut T) -> Result<()> {
        let result = self
            .related_query()
            .and_then(|(query, _)| query.find(out).result());
        self.record(result)
    }

    /// Number of related records.
    #[track_caller]
    pub fn count(&mut self) -> Result<i64> {
        let result = self
            .related_query()
            .and_then(|(query, rel)| query.count_for(Some(rel.related_schema())));
        self.record(result)
    }

    /// Save `values` and link them to the owner.
    #[track_caller]
    pub fn append<T: Target>(&mut self, values: &mut T) -> Result<()> {
        let result = self.append_values(values);
        self.record(result)
    }

    fn append_values(&self, values: &mut dyn Target) -> Result<()> {
        let (relationship, owner) = self.ready()?;
        for related in values.records_mut() {
            match relationship.kind {
                RelationKind::HasOne | RelationKind::HasMany => {
                    related.set_field_value(&relationship.related_field, owner.link_key.clone())?;
                    self.session.save_record(related)?;
                }
                RelationKind::BelongsTo => {
                    self.session.save_record(&mut *related)?;
                    let key = related
                        .field_value(&relationship.related_field)
                        .unwrap_or(Value::Null);
                    self.set_owner_link(relationship, owner, key)?;
                }
                RelationKind::ManyToMany => {
                    self.session.save_record(&mut *related)?;
                    let key = related
                        .field_value(&relationship.related_field)
                        .unwrap_or(Value::Null);
                    if let Some(join) = &relationship.join_table {
                        link_join_row(&self.session, join, &owner.link_key, &key)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Link exactly `values`: append them, then unlink every other record.
    #[track_caller]
    pub fn replace<T: Target>(&mut self, values: &mut T) -> Result<()> {
        let result = self.append_values(&mut *values).and_then(|()| {
            let keep = self.keys_of(&*values)?;
            self.unlink(Unlink::Except(keep))
        });
        self.record(result)
    }

    /// Unlink `values` from the owner. The records themselves are kept.
    #[track_caller]
    pub fn delete<T: Target>(&mut self, values: &T) -> Result<()> {
        let result = self.keys_of(values).and_then(|keys| {
            if keys.is_empty() {
                Ok(())
            } else {
                self.unlink(Unlink::Only(keys))
            }
        });
        self.record(result)
    }

    /// Unlink every related record.
    #[track_caller]
    pub fn clear(&mut self) -> Result<()> {
        let result = self.unlink(Unlink::All);
        self.record(result)
    }

    /// Keys identifying `values` on the linked side: primary keys for
    /// has-one/has-many, link keys otherwise.
    fn keys_of(&self, values: &dyn Target) -> Result<Vec<Value>> {
        let (relationship, _) = self.ready()?;
        let field = match relationship.kind {
            RelationKind::HasOne | RelationKind::HasMany => relationship
                .related_schema()
                .describe()
                .primary_field()
                .map(|f| f.name.clone())
                .ok_or_else(|| {
                    AssociationError::missing_column(&relationship.related_table, "primary key")
                })?,
            RelationKind::BelongsTo | RelationKind::ManyToMany => {
                relationship.related_field.clone()
            }
        };
        Ok(values
            .records()
            .iter()
            .filter_map(|r| r.field_value(&field))
            .filter(|v| !v.is_blank())
            .collect())
    }

    fn unlink(&self, which: Unlink) -> Result<()> {
        let (relationship, owner) = self.ready()?;
        let dialect = self.session.dialect();
        match relationship.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                let related = relationship.related_schema().describe();
                let primary = related
                    .primary_field()
                    .map(|f| dialect.quote(&f.column))
                    .unwrap_or_default();
                let column = dialect.quote(&relationship.related_column);
                let mut sql = format!(
                    "UPDATE {} SET {} = NULL WHERE {} = ?",
                    dialect.quote(&relationship.related_table),
                    column,
                    column
                );
                let mut args = vec![Arg::Value(owner.link_key.clone())];
                which.append_to(&mut sql, &mut args, &primary);
                self.session.exec(&sql, args).result()
            }
            RelationKind::ManyToMany => {
                let Some(join) = &relationship.join_table else {
                    return Ok(());
                };
                let mut sql = format!(
                    "DELETE FROM {} WHERE {} = ?",
                    dialect.quote(&join.table),
                    dialect.quote(&join.foreign_key)
                );
                let mut args = vec![Arg::Value(owner.link_key.clone())];
                which.append_to(
                    &mut sql,
                    &mut args,
                    &dialect.quote(&join.association_foreign_key),
                );
                self.session.exec(&sql, args).result()
            }
            RelationKind::BelongsTo => {
                let linked = match &which {
                    Unlink::All => true,
                    Unlink::Only(keys) => keys
                        .iter()
                        .any(|k| k.match_key() == owner.link_key.match_key()),
                    Unlink::Except(keys) => !keys
                        .iter()
                        .any(|k| k.match_key() == owner.link_key.match_key()),
                };
                if linked {
                    self.set_owner_link(relationship, owner, Value::Null)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Point the owner's foreign key at `key`.
    fn set_owner_link(&self, relationship: &Relationship, owner: &Owner, key: Value) -> Result<()> {
        let dialect = self.session.dialect();
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            dialect.quote(&owner.table),
            dialect.quote(&relationship.owner_column),
            dialect.quote(&owner.primary_column)
        );
        self.session
            .exec(&sql, (key, owner.primary_key.clone()))
            .result()
    }
}

/// Which linked rows an unlink touches.
enum Unlink {
    All,
    Only(Vec<Value>),
    Except(Vec<Value>),
}

impl Unlink {
    fn append_to(&self, sql: &mut String, args: &mut Vec<Arg>, column: &str) {
        match self {
            Unlink::All => {}
            Unlink::Only(keys) => {
                sql.push_str(&format!(" AND {} IN (?)", column));
                args.push(Arg::List(keys.clone()));
            }
            Unlink::Except(keys) if keys.is_empty() => {}
            Unlink::Except(keys) => {
                sql.push_str(&format!(" AND {} NOT IN (?)", column));
                args.push(Arg::List(keys.clone()));
            }
        }
    }
}
