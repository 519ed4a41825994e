//! Additive schema migration.
//!
//! Every operation is chainable and records failures on the returned
//! session like any other call. Nothing here drops a column or a table
//! unless asked to explicitly; `auto_migrate` only creates tables, adds
//! missing columns and adds tagged indexes.

use crate::callbacks::TABLE_OPTIONS;
use crate::session::Session;
use sqlchain_core::{Dialect, Error, FieldDescriptor, ModelDescriptor, ModelSchema, Result};

/// A table named directly or through its model.
#[derive(Debug, Clone)]
pub enum TableRef {
    Name(String),
    Model(&'static ModelSchema),
}

impl TableRef {
    fn table_name(&self) -> String {
        match self {
            TableRef::Name(name) => name.clone(),
            TableRef::Model(schema) => schema.describe().table_name.clone(),
        }
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        TableRef::Name(name.to_string())
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        TableRef::Name(name)
    }
}

impl From<&'static ModelSchema> for TableRef {
    fn from(schema: &'static ModelSchema) -> Self {
        TableRef::Model(schema)
    }
}

/// Column type of a key column referenced from a join table.
fn key_type(dialect: &dyn Dialect, field: &FieldDescriptor) -> String {
    let mut key = field.clone();
    key.primary_key = false;
    key.auto_increment = false;
    key.unique = false;
    key.default = None;
    key.nullable = false;
    dialect.data_type_of(&key)
}

impl Session {
    fn failed(&self, err: Error) -> Session {
        let mut out = self.clone();
        out.add_error(err);
        out
    }

    fn table_options(&self) -> String {
        self.get::<String>(TABLE_OPTIONS).unwrap_or_default()
    }

    /// Does `table` exist?
    pub fn has_table(&self, table: impl Into<TableRef>) -> Result<bool> {
        let name = table.into().table_name();
        self.dialect.has_table(self.executor.as_ref(), &name)
    }

    /// Create the model's table, its join tables and its indexes.
    pub fn create_table(&self, schema: &'static ModelSchema) -> Session {
        let desc = schema.describe();
        let dialect = self.dialect();
        let mut columns = Vec::new();
        let mut primary_keys = Vec::new();
        for field in desc.columns() {
            columns.push(format!(
                "{} {}",
                dialect.quote(&field.column),
                dialect.data_type_of(field)
            ));
            if field.primary_key {
                primary_keys.push(dialect.quote(&field.column));
            }
        }
        let sql = dialect.create_table_sql(
            &desc.table_name,
            &columns,
            &primary_keys,
            &self.table_options(),
        );
        tracing::info!(table = %desc.table_name, "Creating table");
        self.exec(&sql, ())
            .create_join_tables(&desc)
            .auto_index(&desc)
    }

    pub fn drop_table(&self, table: impl Into<TableRef>) -> Session {
        let name = table.into().table_name();
        tracing::info!(table = %name, "Dropping table");
        self.exec(&self.dialect().drop_table_sql(&name), ())
    }

    pub fn drop_table_if_exists(&self, table: impl Into<TableRef>) -> Session {
        let table = table.into();
        match self.has_table(table.clone()) {
            Ok(true) => self.drop_table(table),
            Ok(false) => self.clone(),
            Err(e) => self.failed(e),
        }
    }

    /// Bring each model's table up to date without dropping anything.
    pub fn auto_migrate(&self, schemas: &[&'static ModelSchema]) -> Session {
        let mut out = self.clone();
        for &schema in schemas {
            if out.error().is_some() {
                break;
            }
            let desc = schema.describe();
            match out.has_table(desc.table_name.as_str()) {
                Ok(false) => out = out.create_table(schema),
                Ok(true) => {
                    out = out.add_missing_columns(&desc);
                    out = out.create_join_tables(&desc).auto_index(&desc);
                }
                Err(e) => {
                    out.add_error(e);
                }
            }
        }
        out
    }

    fn add_missing_columns(&self, desc: &ModelDescriptor) -> Session {
        let mut out = self.clone();
        let dialect = self.dialect();
        for field in desc.columns() {
            match dialect.has_column(self.executor.as_ref(), &desc.table_name, &field.column) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(table = %desc.table_name, column = %field.column, "Adding column");
                    let sql =
                        dialect.add_column_sql(&desc.table_name, &field.column, &dialect.data_type_of(field));
                    out = out.exec(&sql, ());
                }
                Err(e) => {
                    out.add_error(e);
                    break;
                }
            }
        }
        out
    }

    fn create_join_tables(&self, desc: &ModelDescriptor) -> Session {
        let mut out = self.clone();
        let dialect = self.dialect();
        for field in desc.relationships() {
            let Some(relationship) = &field.relationship else {
                continue;
            };
            let Some(join) = &relationship.join_table else {
                continue;
            };
            match out.has_table(join.table.as_str()) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => return out.failed(e),
            }
            let related = relationship.related_schema().describe();
            let (Some(owner_key), Some(related_key)) = (
                desc.field(&relationship.owner_field),
                related.field(&relationship.related_field),
            ) else {
                continue;
            };
            let columns = vec![
                format!("{} {}", dialect.quote(&join.foreign_key), key_type(dialect, owner_key)),
                format!(
                    "{} {}",
                    dialect.quote(&join.association_foreign_key),
                    key_type(dialect, related_key)
                ),
            ];
            let primary_keys = vec![
                dialect.quote(&join.foreign_key),
                dialect.quote(&join.association_foreign_key),
            ];
            let sql =
                dialect.create_table_sql(&join.table, &columns, &primary_keys, &self.table_options());
            tracing::info!(table = %join.table, "Creating join table");
            out = out.exec(&sql, ());
        }
        out
    }

    /// Add the indexes tagged on the model's fields.
    fn auto_index(&self, desc: &ModelDescriptor) -> Session {
        let mut indexes: Vec<(String, bool, Vec<String>)> = Vec::new();
        for field in desc.columns() {
            let tagged = [(&field.index, false), (&field.unique_index, true)];
            for (name, unique) in tagged {
                let Some(name) = name else {
                    continue;
                };
                match indexes.iter_mut().find(|(n, u, _)| n == name && *u == unique) {
                    Some((_, _, columns)) => columns.push(field.column.clone()),
                    None => indexes.push((name.clone(), unique, vec![field.column.clone()])),
                }
            }
        }
        indexes
            .into_iter()
            .fold(self.clone(), |out, (name, unique, columns)| {
                out.add_index_on(unique, &name, &desc.table_name, columns)
            })
    }

    /// Table of the bound value, or the `table` override.
    fn bound_table(&self) -> Result<String> {
        if !self.search.table_name.is_empty() {
            return Ok(self.search.table_name.clone());
        }
        self.value
            .as_ref()
            .map(|v| v.target_schema().describe().table_name.clone())
            .ok_or(Error::Unaddressable)
    }

    fn on_bound_table(&self, f: impl FnOnce(&Session, &str) -> Session) -> Session {
        match self.bound_table() {
            Ok(table) => f(self, &table),
            Err(e) => self.failed(e),
        }
    }

    /// Change a column's type on the bound table.
    pub fn modify_column(&self, column: &str, data_type: &str) -> Session {
        self.on_bound_table(|s, table| {
            s.exec(&s.dialect().modify_column_sql(table, column, data_type), ())
        })
    }

    pub fn drop_column(&self, column: &str) -> Session {
        self.on_bound_table(|s, table| s.exec(&s.dialect().drop_column_sql(table, column), ()))
    }

    /// Add an index on the bound table unless one with that name exists.
    pub fn add_index(&self, name: &str, columns: &[&str]) -> Session {
        let columns: Vec<String> = columns.iter().map(ToString::to_string).collect();
        self.on_bound_table(|s, table| s.add_index_on(false, name, table, columns))
    }

    pub fn add_unique_index(&self, name: &str, columns: &[&str]) -> Session {
        let columns: Vec<String> = columns.iter().map(ToString::to_string).collect();
        self.on_bound_table(|s, table| s.add_index_on(true, name, table, columns))
    }

    fn add_index_on(&self, unique: bool, name: &str, table: &str, columns: Vec<String>) -> Session {
        if self.error().is_some() {
            return self.clone();
        }
        match self.dialect.has_index(self.executor.as_ref(), table, name) {
            Ok(true) => self.clone(),
            Ok(false) => {
                tracing::info!(table, index = name, "Adding index");
                self.exec(&self.dialect().add_index_sql(unique, name, table, &columns), ())
            }
            Err(e) => self.failed(e),
        }
    }

    pub fn remove_index(&self, name: &str) -> Session {
        self.on_bound_table(|s, table| s.exec(&s.dialect().remove_index_sql(table, name), ()))
    }

    /// Add a foreign key from `field` to `destination` (`"users(id)"`).
    pub fn add_foreign_key(
        &self,
        field: &str,
        destination: &str,
        on_delete: &str,
        on_update: &str,
    ) -> Session {
        self.on_bound_table(|s, table| {
            let dialect = s.dialect();
            let key_name = dialect.build_key_name("fk", table, &[field, destination]);
            match dialect.has_foreign_key(s.executor.as_ref(), table, &key_name) {
                Ok(true) => s.clone(),
                Ok(false) => s.exec(
                    &dialect.add_foreign_key_sql(
                        table,
                        &key_name,
                        field,
                        destination,
                        on_delete,
                        on_update,
                    ),
                    (),
                ),
                Err(e) => s.failed(e),
            }
        })
    }

    pub fn remove_foreign_key(&self, field: &str, destination: &str) -> Session {
        self.on_bound_table(|s, table| {
            let dialect = s.dialect();
            let key_name = dialect.build_key_name("fk", table, &[field, destination]);
            s.exec(&dialect.remove_foreign_key_sql(table, &key_name), ())
        })
    }
}
