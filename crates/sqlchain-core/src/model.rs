//! Struct-to-table mapping traits.
//!
//! `Model` is the statically typed contract, normally derived with
//! `#[derive(Model)]`. `Record` and `Target` are its object-safe faces:
//! a session stores whatever value it is bound to as a `dyn Target`, and
//! callbacks reach individual rows through `dyn Record`.

use crate::Result;
use crate::error::Error;
use crate::row::Row;
use crate::types::SqlType;
use crate::value::Value;
use std::any::{Any, TypeId};

/// Static description of a model type, emitted by the derive macro.
///
/// This is raw input to the descriptor cache; callers should work with
/// [`crate::ModelDescriptor`] instead.
#[derive(Debug)]
pub struct ModelSchema {
    /// Rust struct name
    pub name: &'static str,
    /// `TypeId::of` the model, the descriptor cache key
    pub type_id: fn() -> TypeId,
    /// Explicit table name, overriding the naming convention
    pub table_name: Option<&'static str>,
    /// Fields in declaration order
    pub fields: &'static [FieldSchema],
}

impl ModelSchema {
    /// Whether `name` is a field of this model or of one it embeds.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| match f.embedded {
            Some(inner) => inner().has_field(name),
            None => f.name == name,
        })
    }

    /// Cached descriptor of this schema's model.
    pub fn describe(&'static self) -> std::sync::Arc<crate::ModelDescriptor> {
        crate::describe_schema((self.type_id)(), self)
    }

    /// Error for a field name the model does not have.
    pub fn unknown_field(&self, name: &str) -> Error {
        Error::Custom(format!("{} has no field {}", self.name, name))
    }
}

/// Static description of one struct field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSchema {
    pub name: &'static str,
    pub column: Option<&'static str>,
    pub sql_type: SqlType,
    pub sql_type_override: Option<&'static str>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub size: Option<u32>,
    pub default: Option<&'static str>,
    /// Index membership; an empty name asks for a generated name
    pub index: Option<&'static str>,
    pub unique_index: Option<&'static str>,
    /// Field exists on the struct but has no column
    pub ignored: bool,
    /// Fields of this nested model are promoted into the owner
    pub embedded: Option<fn() -> &'static ModelSchema>,
    pub relation: Option<RelationSchema>,
}

impl FieldSchema {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column: None,
            sql_type,
            sql_type_override: None,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            size: None,
            default: None,
            index: None,
            unique_index: None,
            ignored: false,
            embedded: None,
            relation: None,
        }
    }

    pub const fn column(mut self, name: Option<&'static str>) -> Self {
        self.column = name;
        self
    }

    pub const fn sql_type_override(mut self, type_str: Option<&'static str>) -> Self {
        self.sql_type_override = type_str;
        self
    }

    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub const fn size(mut self, size: Option<u32>) -> Self {
        self.size = size;
        self
    }

    pub const fn default(mut self, expr: Option<&'static str>) -> Self {
        self.default = expr;
        self
    }

    pub const fn index(mut self, name: Option<&'static str>) -> Self {
        self.index = name;
        self
    }

    pub const fn unique_index(mut self, name: Option<&'static str>) -> Self {
        self.unique_index = name;
        self
    }

    pub const fn ignored(mut self, value: bool) -> Self {
        self.ignored = value;
        self
    }

    pub const fn embedded(mut self, schema: fn() -> &'static ModelSchema) -> Self {
        self.embedded = Some(schema);
        self
    }

    pub const fn relation(mut self, relation: RelationSchema) -> Self {
        self.relation = Some(relation);
        self
    }
}

/// Static description of a relation field.
///
/// The relationship kind is not stated here; it is classified when the
/// owning model is described, from cardinality and key presence.
#[derive(Debug, Clone, Copy)]
pub struct RelationSchema {
    pub related: fn() -> &'static ModelSchema,
    /// `Vec<T>` rather than `T`/`Option<T>`
    pub many: bool,
    pub foreign_key: Option<&'static str>,
    pub association_foreign_key: Option<&'static str>,
    /// Join table name for many-to-many
    pub many_to_many: Option<&'static str>,
    pub join_foreign_key: Option<&'static str>,
    pub association_join_foreign_key: Option<&'static str>,
}

impl RelationSchema {
    pub const fn new(related: fn() -> &'static ModelSchema, many: bool) -> Self {
        Self {
            related,
            many,
            foreign_key: None,
            association_foreign_key: None,
            many_to_many: None,
            join_foreign_key: None,
            association_join_foreign_key: None,
        }
    }

    pub const fn foreign_key(mut self, key: Option<&'static str>) -> Self {
        self.foreign_key = key;
        self
    }

    pub const fn association_foreign_key(mut self, key: Option<&'static str>) -> Self {
        self.association_foreign_key = key;
        self
    }

    pub const fn many_to_many(mut self, table: Option<&'static str>) -> Self {
        self.many_to_many = table;
        self
    }

    pub const fn join_foreign_key(mut self, key: Option<&'static str>) -> Self {
        self.join_foreign_key = key;
        self
    }

    pub const fn association_join_foreign_key(mut self, key: Option<&'static str>) -> Self {
        self.association_join_foreign_key = key;
        self
    }
}

/// Lifecycle hook points invoked by the default callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    BeforeSave,
    BeforeCreate,
    AfterCreate,
    AfterSave,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    AfterFind,
}

/// Lifecycle hooks. Every method defaults to a no-op.
///
/// `#[derive(Model)]` emits an empty impl unless the struct carries
/// `#[sqlchain(hooks)]`, in which case the user writes it.
pub trait Hooks {
    #[allow(clippy::result_large_err)]
    fn before_save(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn before_create(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn after_create(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn after_save(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn before_update(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn after_update(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn before_delete(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn after_delete(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn after_find(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A struct mapped to a database table.
///
/// Field access is by Rust field name. Embedded models answer for their
/// promoted fields through the owner.
pub trait Model: Hooks + Clone + Default + Send + Sync + 'static {
    /// The static schema for this type.
    fn schema() -> &'static ModelSchema;

    /// Read a column field by name.
    fn value_of(&self, field: &str) -> Option<Value>;

    /// Write a column field by name.
    #[allow(clippy::result_large_err)]
    fn set_value(&mut self, field: &str, value: Value) -> Result<()>;

    /// Overwrite the fields whose columns are present in `row`.
    #[allow(clippy::result_large_err)]
    fn assign_row(&mut self, row: &Row) -> Result<()>;

    /// Build a fresh instance from a row; absent columns keep defaults.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self> {
        let mut model = Self::default();
        model.assign_row(row)?;
        Ok(model)
    }

    /// Mutable views of the records held by a relation field.
    fn relation_records_mut(&mut self, field: &str) -> Vec<&mut dyn Record> {
        let _ = field;
        Vec::new()
    }

    /// Replace the contents of a relation field with decoded rows.
    #[allow(clippy::result_large_err)]
    fn load_relation(&mut self, field: &str, rows: &[Row]) -> Result<()> {
        let _ = rows;
        Err(Error::Custom(format!(
            "{} has no relation field {}",
            Self::schema().name,
            field
        )))
    }
}

/// Object-safe view of a single model instance.
pub trait Record: Send + Sync {
    fn record_schema(&self) -> &'static ModelSchema;
    fn record_type_id(&self) -> TypeId;
    fn field_value(&self, field: &str) -> Option<Value>;
    #[allow(clippy::result_large_err)]
    fn set_field_value(&mut self, field: &str, value: Value) -> Result<()>;
    #[allow(clippy::result_large_err)]
    fn assign_from_row(&mut self, row: &Row) -> Result<()>;
    fn related_records_mut(&mut self, field: &str) -> Vec<&mut dyn Record>;
    #[allow(clippy::result_large_err)]
    fn attach_related(&mut self, field: &str, rows: &[Row]) -> Result<()>;
    #[allow(clippy::result_large_err)]
    fn run_hook(&mut self, hook: Hook) -> Result<()>;
    fn clone_record(&self) -> Box<dyn Record>;
    fn as_any(&self) -> &dyn Any;
}

impl<M: Model> Record for M {
    fn record_schema(&self) -> &'static ModelSchema {
        M::schema()
    }

    fn record_type_id(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn field_value(&self, field: &str) -> Option<Value> {
        self.value_of(field)
    }

    fn set_field_value(&mut self, field: &str, value: Value) -> Result<()> {
        self.set_value(field, value)
    }

    fn assign_from_row(&mut self, row: &Row) -> Result<()> {
        self.assign_row(row)
    }

    fn related_records_mut(&mut self, field: &str) -> Vec<&mut dyn Record> {
        self.relation_records_mut(field)
    }

    fn attach_related(&mut self, field: &str, rows: &[Row]) -> Result<()> {
        self.load_relation(field, rows)
    }

    fn run_hook(&mut self, hook: Hook) -> Result<()> {
        match hook {
            Hook::BeforeSave => self.before_save(),
            Hook::BeforeCreate => self.before_create(),
            Hook::AfterCreate => self.after_create(),
            Hook::AfterSave => self.after_save(),
            Hook::BeforeUpdate => self.before_update(),
            Hook::AfterUpdate => self.after_update(),
            Hook::BeforeDelete => self.before_delete(),
            Hook::AfterDelete => self.after_delete(),
            Hook::AfterFind => self.after_find(),
        }
    }

    fn clone_record(&self) -> Box<dyn Record> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for dyn Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.record_schema().name)
            .finish_non_exhaustive()
    }
}

/// Anything a session can be bound to: one model or a list of them.
pub trait Target: Send + Sync {
    fn target_schema(&self) -> &'static ModelSchema;
    fn target_type_id(&self) -> TypeId;
    fn is_collection(&self) -> bool;
    fn records(&self) -> Vec<&dyn Record>;
    fn records_mut(&mut self) -> Vec<&mut dyn Record>;

    /// Load query results. A single model takes the first row; a list is
    /// replaced by one element per row. Returns the number of rows used.
    #[allow(clippy::result_large_err)]
    fn load_rows(&mut self, rows: &[Row]) -> Result<usize>;

    fn clone_target(&self) -> Box<dyn Target>;
}

impl<M: Model> Target for M {
    fn target_schema(&self) -> &'static ModelSchema {
        M::schema()
    }

    fn target_type_id(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn is_collection(&self) -> bool {
        false
    }

    fn records(&self) -> Vec<&dyn Record> {
        vec![self as &dyn Record]
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        vec![self as &mut dyn Record]
    }

    fn load_rows(&mut self, rows: &[Row]) -> Result<usize> {
        match rows.first() {
            Some(row) => {
                self.assign_row(row)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn clone_target(&self) -> Box<dyn Target> {
        Box::new(self.clone())
    }
}

impl<M: Model> Target for Vec<M> {
    fn target_schema(&self) -> &'static ModelSchema {
        M::schema()
    }

    fn target_type_id(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn is_collection(&self) -> bool {
        true
    }

    fn records(&self) -> Vec<&dyn Record> {
        self.iter().map(|m| m as &dyn Record).collect()
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.iter_mut().map(|m| m as &mut dyn Record).collect()
    }

    fn load_rows(&mut self, rows: &[Row]) -> Result<usize> {
        let loaded = rows.iter().map(M::from_row).collect::<Result<Vec<M>>>()?;
        *self = loaded;
        Ok(self.len())
    }

    fn clone_target(&self) -> Box<dyn Target> {
        Box::new(self.clone())
    }
}
