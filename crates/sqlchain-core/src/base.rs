//! A ready-made set of common columns for embedding.
//!
//! ```ignore
//! #[derive(Debug, Clone, Default, Model)]
//! struct User {
//!     #[sqlchain(embedded)]
//!     base: BaseModel,
//!     name: String,
//! }
//! ```
//!
//! Embedding promotes `id` (the primary key), the create/update timestamps,
//! `deleted_at` (which turns on soft delete) and `extra_json`, a text column
//! holding a free-form JSON object.

use crate::Result;
use crate::model::{FieldSchema, Hooks, Model, ModelSchema};
use crate::row::{FromValue, Row};
use crate::types::SqlType;
use crate::value::Value;
use serde_json::{Map, Value as JsonValue};
use std::any::TypeId;

/// `id`, timestamps, soft-delete marker and a JSON "extra" bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseModel {
    pub id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    /// Serialized form of `extra`; this is what gets stored.
    pub extra_json: String,
    /// Decoded `extra_json`, filled on first access. Not a column.
    pub extra: Option<Map<String, JsonValue>>,
    pub deleted_at: Option<i64>,
}

static BASE_FIELDS: &[FieldSchema] = &[
    FieldSchema::new("id", SqlType::BigInt)
        .primary_key(true)
        .auto_increment(true),
    FieldSchema::new("created_at", SqlType::Timestamp),
    FieldSchema::new("updated_at", SqlType::Timestamp),
    FieldSchema::new("extra_json", SqlType::Text).sql_type_override(Some("TEXT")),
    FieldSchema::new("extra", SqlType::Json).ignored(true),
    FieldSchema::new("deleted_at", SqlType::Timestamp)
        .nullable(true)
        .index(Some("")),
];

static BASE_SCHEMA: ModelSchema = ModelSchema {
    name: "BaseModel",
    type_id: TypeId::of::<BaseModel>,
    table_name: None,
    fields: BASE_FIELDS,
};

impl BaseModel {
    /// Replace the extra bag, re-serializing it into `extra_json`.
    #[allow(clippy::result_large_err)]
    pub fn set_extra(&mut self, extra: Map<String, JsonValue>) -> Result<()> {
        self.extra_json = serde_json::to_string(&extra)?;
        self.extra = Some(extra);
        Ok(())
    }

    /// The extra bag, decoded from `extra_json` on first use. Changes made
    /// through the returned map are only stored by [`BaseModel::set_extra`]
    /// or [`BaseModel::add_extra`].
    #[allow(clippy::result_large_err)]
    pub fn extra(&mut self) -> Result<&mut Map<String, JsonValue>> {
        if self.extra.is_none() {
            let decoded = if self.extra_json.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&self.extra_json)?
            };
            self.extra = Some(decoded);
        }
        Ok(self.extra.get_or_insert_with(Map::new))
    }

    /// Set one key of the extra bag and re-serialize it.
    #[allow(clippy::result_large_err)]
    pub fn add_extra(&mut self, key: &str, value: impl Into<JsonValue>) -> Result<()> {
        let value = value.into();
        let mut extra = self.extra()?.clone();
        if let Some(old) = extra.get(key) {
            tracing::warn!(key, old = %old, new = %value, "Overriding extra key");
        }
        extra.insert(key.to_string(), value);
        self.set_extra(extra)
    }
}

impl Hooks for BaseModel {}

impl Model for BaseModel {
    fn schema() -> &'static ModelSchema {
        &BASE_SCHEMA
    }

    fn value_of(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::from(self.id)),
            "created_at" => Some(Value::from(self.created_at)),
            "updated_at" => Some(Value::from(self.updated_at)),
            "extra_json" => Some(Value::from(self.extra_json.clone())),
            "deleted_at" => Some(Value::from(self.deleted_at)),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = i64::from_value(&value)?,
            "created_at" => self.created_at = i64::from_value(&value)?,
            "updated_at" => self.updated_at = i64::from_value(&value)?,
            "extra_json" => {
                self.extra_json = String::from_value(&value)?;
                self.extra = None;
            }
            "deleted_at" => self.deleted_at = Option::<i64>::from_value(&value)?,
            _ => return Err(Self::schema().unknown_field(field)),
        }
        Ok(())
    }

    fn assign_row(&mut self, row: &Row) -> Result<()> {
        if let Some(id) = row.get_optional("id")? {
            self.id = id;
        }
        if let Some(created_at) = row.get_optional("created_at")? {
            self.created_at = created_at;
        }
        if let Some(updated_at) = row.get_optional("updated_at")? {
            self.updated_at = updated_at;
        }
        if let Some(extra_json) = row.get_optional::<String>("extra_json")? {
            self.extra_json = extra_json;
            self.extra = None;
        }
        if let Some(deleted_at) = row.get_optional("deleted_at")? {
            self.deleted_at = deleted_at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_round_trips_through_json_column() {
        let mut base = BaseModel::default();
        assert!(base.extra().unwrap().is_empty());

        base.add_extra("theme", "dark").unwrap();
        base.add_extra("visits", 3).unwrap();
        assert_eq!(base.extra_json, r#"{"theme":"dark","visits":3}"#);

        base.add_extra("theme", "light").unwrap();
        assert_eq!(base.extra().unwrap()["theme"], json!("light"));

        let mut loaded = BaseModel::default();
        loaded
            .set_value("extra_json", Value::from(base.extra_json.clone()))
            .unwrap();
        assert_eq!(loaded.extra().unwrap()["visits"], json!(3));
    }

    #[test]
    fn malformed_extra_json_is_an_error() {
        let mut base = BaseModel {
            extra_json: "{not json".into(),
            ..BaseModel::default()
        };
        assert!(base.extra().is_err());
        assert!(base.add_extra("k", true).is_err());
    }

    #[test]
    fn schema_describes_common_columns() {
        let desc = BaseModel::schema().describe();
        assert_eq!(desc.primary_field().map(|f| f.column.as_str()), Some("id"));
        assert!(desc.field("extra_json").is_some());
        assert!(desc.columns().all(|f| f.name != "extra"));

        let row = Row::new(
            vec!["id".into(), "deleted_at".into()],
            vec![Value::BigInt(4), Value::Null],
        );
        let base = BaseModel::from_row(&row).unwrap();
        assert_eq!(base.id, 4);
        assert_eq!(base.deleted_at, None);
    }
}
