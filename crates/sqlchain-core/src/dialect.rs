//! The dialect collaborator and its registry.
//!
//! A [`Dialect`] owns every backend-specific piece of syntax: identifier
//! quoting, placeholders, column types, LIMIT/OFFSET, existence checks and
//! DDL fragments. Provided methods spell the portable form; backends
//! override what differs. Dialects are stateless and take the executor as
//! an argument where they need to ask the database something.

use crate::descriptor::FieldDescriptor;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

pub trait Dialect: Send + Sync {
    /// Registry name, e.g. `"common"`.
    fn name(&self) -> &'static str;

    /// Placeholder for the `index`-th (1-based) argument.
    fn bind_var(&self, index: usize) -> String {
        let _ = index;
        "?".to_string()
    }

    /// Quote one identifier.
    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quote a possibly qualified name, `a.b` -> `"a"."b"`.
    fn quote_path(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Column type (with modifiers) for a mapped field.
    fn data_type_of(&self, field: &FieldDescriptor) -> String {
        let mut sql = match &field.sql_type_override {
            Some(custom) => custom.clone(),
            None => field.sql_type.sql_name(field.size),
        };
        if field.auto_increment && field.sql_type_override.is_none() {
            sql.push_str(" AUTO_INCREMENT");
        }
        if !field.nullable && !field.primary_key {
            sql.push_str(" NOT NULL");
        }
        if field.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &field.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }

    #[allow(clippy::result_large_err)]
    fn current_database(&self, exec: &dyn Executor) -> Result<String> {
        let rows = exec.query("SELECT DATABASE()", &[])?;
        Ok(rows
            .first()
            .and_then(|r| r.get(0))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    #[allow(clippy::result_large_err)]
    fn has_table(&self, exec: &dyn Executor, table: &str) -> Result<bool> {
        let db = self.current_database(exec)?;
        count_positive(
            exec,
            "SELECT count(*) FROM INFORMATION_SCHEMA.TABLES WHERE table_schema = ? AND table_name = ?",
            &[Value::from(db), Value::from(table)],
        )
    }

    #[allow(clippy::result_large_err)]
    fn has_column(&self, exec: &dyn Executor, table: &str, column: &str) -> Result<bool> {
        let db = self.current_database(exec)?;
        count_positive(
            exec,
            "SELECT count(*) FROM INFORMATION_SCHEMA.COLUMNS WHERE table_schema = ? AND table_name = ? AND column_name = ?",
            &[Value::from(db), Value::from(table), Value::from(column)],
        )
    }

    #[allow(clippy::result_large_err)]
    fn has_index(&self, exec: &dyn Executor, table: &str, index: &str) -> Result<bool> {
        let db = self.current_database(exec)?;
        count_positive(
            exec,
            "SELECT count(*) FROM INFORMATION_SCHEMA.STATISTICS WHERE table_schema = ? AND table_name = ? AND index_name = ?",
            &[Value::from(db), Value::from(table), Value::from(index)],
        )
    }

    #[allow(clippy::result_large_err)]
    fn has_foreign_key(&self, exec: &dyn Executor, table: &str, key: &str) -> Result<bool> {
        let _ = (exec, table, key);
        Ok(false)
    }

    /// ` LIMIT n OFFSET m`, omitting each part whose value is negative.
    fn limit_and_offset_sql(&self, limit: i64, offset: i64) -> String {
        let mut sql = String::new();
        if limit >= 0 {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if offset >= 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    /// Table to select from when a statement needs no table.
    fn select_from_dummy_table(&self) -> &'static str {
        ""
    }

    /// Suffix that makes an INSERT return the generated key.
    fn last_insert_id_returning_suffix(&self, table: &str, column: &str) -> String {
        let _ = (table, column);
        String::new()
    }

    /// Body of an INSERT that sets no columns.
    fn default_value_str(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// Name for an index or key: `idx_users_name`.
    fn build_key_name(&self, kind: &str, table: &str, columns: &[&str]) -> String {
        let raw = format!("{}_{}_{}", kind, table, columns.join("_"));
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    fn create_table_sql(
        &self,
        table: &str,
        column_defs: &[String],
        primary_keys: &[String],
        options: &str,
    ) -> String {
        let mut body = column_defs.join(",");
        if !primary_keys.is_empty() {
            body.push_str(&format!(",PRIMARY KEY ({})", primary_keys.join(",")));
        }
        let mut sql = format!("CREATE TABLE {} ({})", self.quote_path(table), body);
        if !options.is_empty() {
            sql.push(' ');
            sql.push_str(options);
        }
        sql
    }

    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_path(table))
    }

    fn add_column_sql(&self, table: &str, column: &str, data_type: &str) -> String {
        format!(
            "ALTER TABLE {} ADD {} {}",
            self.quote_path(table),
            self.quote(column),
            data_type
        )
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_path(table),
            self.quote(column)
        )
    }

    fn modify_column_sql(&self, table: &str, column: &str, data_type: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
            self.quote_path(table),
            self.quote(column),
            data_type
        )
    }

    fn add_index_sql(&self, unique: bool, index: &str, table: &str, columns: &[String]) -> String {
        let quoted: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {}({})",
            if unique { "UNIQUE " } else { "" },
            self.quote(index),
            self.quote_path(table),
            quoted.join(", ")
        )
    }

    fn remove_index_sql(&self, table: &str, index: &str) -> String {
        let _ = table;
        format!("DROP INDEX {}", self.quote(index))
    }

    fn add_foreign_key_sql(
        &self,
        table: &str,
        key_name: &str,
        column: &str,
        destination: &str,
        on_delete: &str,
        on_update: &str,
    ) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ON DELETE {} ON UPDATE {}",
            self.quote_path(table),
            self.quote(key_name),
            self.quote(column),
            destination,
            on_delete,
            on_update
        )
    }

    fn remove_foreign_key_sql(&self, table: &str, key_name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_path(table),
            self.quote(key_name)
        )
    }
}

#[allow(clippy::result_large_err)]
fn count_positive(exec: &dyn Executor, sql: &str, params: &[Value]) -> Result<bool> {
    let rows = exec.query(sql, params)?;
    Ok(rows
        .first()
        .and_then(|r| r.get(0))
        .and_then(Value::as_i64)
        .is_some_and(|n| n > 0))
}

/// Portable SQL, used when no backend-specific dialect is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonDialect;

impl Dialect for CommonDialect {
    fn name(&self) -> &'static str {
        "common"
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn Dialect>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn Dialect>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, Arc<dyn Dialect>> = HashMap::new();
        map.insert("common".to_string(), Arc::new(CommonDialect));
        RwLock::new(map)
    })
}

/// Register a dialect under `name`, replacing any previous registration.
pub fn register_dialect(name: &str, dialect: Arc<dyn Dialect>) {
    registry()
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(name.to_string(), dialect);
}

/// Look up a registered dialect.
pub fn lookup_dialect(name: &str) -> Option<Arc<dyn Dialect>> {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(name)
        .cloned()
}

/// The dialect registered as `name`, falling back to [`CommonDialect`].
pub fn new_dialect(name: &str) -> Arc<dyn Dialect> {
    lookup_dialect(name).unwrap_or_else(|| {
        tracing::warn!(dialect = name, "Unknown dialect; falling back to common");
        Arc::new(CommonDialect)
    })
}

/// Like [`new_dialect`] but reports unknown names.
#[allow(clippy::result_large_err)]
pub fn require_dialect(name: &str) -> Result<Arc<dyn Dialect>> {
    lookup_dialect(name).ok_or_else(|| Error::Config(format!("unknown dialect {}", name)))
}
