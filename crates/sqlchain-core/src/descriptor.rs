//! Model descriptors and the process-wide descriptor cache.
//!
//! A [`ModelDescriptor`] is the resolved mapping of one model type: table
//! name, flattened column list, primary key and classified relationships.
//! It is built once per (type, naming policy) pair from the static
//! [`ModelSchema`] and shared behind an `Arc` afterwards.

use crate::model::{FieldSchema, Model, ModelSchema, RelationSchema};
use crate::naming::{foreign_key_for, table_name_for, to_snake_case};
use crate::types::SqlType;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Table naming policy. Process-wide; see [`set_naming_policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NamingPolicy {
    /// Use `user` instead of `users` for a `User` model.
    pub singular: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
}

/// Link table of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Column referencing the owner's key
    pub foreign_key: String,
    /// Column referencing the related model's key
    pub association_foreign_key: String,
}

/// A classified relationship.
///
/// The link is always `owner.owner_column = related.related_column`; for
/// many-to-many both sides point into [`JoinTable`] instead. For
/// belongs-to the owner column is the foreign key, for has-one/has-many
/// the related column is.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub kind: RelationKind,
    pub related: fn() -> &'static ModelSchema,
    pub related_table: String,
    pub owner_field: String,
    pub owner_column: String,
    pub related_field: String,
    pub related_column: String,
    pub join_table: Option<JoinTable>,
}

impl Relationship {
    pub fn related_schema(&self) -> &'static ModelSchema {
        (self.related)()
    }

    /// Does the foreign key live on the related side?
    pub fn foreign_key_on_related(&self) -> bool {
        matches!(self.kind, RelationKind::HasOne | RelationKind::HasMany)
    }
}

/// One resolved field of a model.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub sql_type: SqlType,
    pub sql_type_override: Option<String>,
    pub size: Option<u32>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub index: Option<String>,
    pub unique_index: Option<String>,
    pub relationship: Option<Relationship>,
    /// Relation fields that could not be classified
    pub ignored: bool,
}

impl FieldDescriptor {
    /// Is this a plain column (not a relation)?
    pub fn is_normal(&self) -> bool {
        self.relationship.is_none() && !self.ignored
    }
}

/// Resolved, immutable mapping of a model type.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub type_id: TypeId,
    pub name: &'static str,
    pub table_name: String,
    pub fields: Vec<FieldDescriptor>,
    primary_keys: Vec<usize>,
}

impl ModelDescriptor {
    /// The first primary key field.
    pub fn primary_field(&self) -> Option<&FieldDescriptor> {
        self.primary_keys.first().map(|&i| &self.fields[i])
    }

    pub fn primary_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.primary_keys.iter().map(|&i| &self.fields[i])
    }

    /// Look a field up by Rust name or column name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.column == name))
    }

    /// Plain columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_normal())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().any(|f| f.column == column || f.name == column)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.relationship.is_some())
    }
}

struct DescriptorCache {
    policy: RwLock<NamingPolicy>,
    entries: RwLock<HashMap<(TypeId, NamingPolicy), Arc<ModelDescriptor>>>,
}

impl DescriptorCache {
    fn new() -> Self {
        Self {
            policy: RwLock::new(NamingPolicy::default()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_build(
        &self,
        type_id: TypeId,
        schema: &'static ModelSchema,
        policy: NamingPolicy,
    ) -> Arc<ModelDescriptor> {
        let key = (type_id, policy);
        // Fast path; poisoned locks are recovered, the map is never left half-written
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(found) = entries.get(&key) {
                return Arc::clone(found);
            }
        }

        // Slow path: build without holding a lock, first insert wins
        let built = Arc::new(build_descriptor(type_id, schema, policy));
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let stored = entries.entry(key).or_insert_with(|| {
            tracing::debug!(
                model = schema.name,
                table = %built.table_name,
                singular = policy.singular,
                "Described model"
            );
            built
        });
        Arc::clone(stored)
    }

    fn set_policy(&self, policy: NamingPolicy) {
        let mut current = self.policy.write().unwrap_or_else(|e| e.into_inner());
        if *current != policy {
            *current = policy;
            self.entries
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            tracing::debug!(singular = policy.singular, "Naming policy changed; descriptor cache cleared");
        }
    }

    fn policy(&self) -> NamingPolicy {
        *self.policy.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn cache() -> &'static DescriptorCache {
    static CACHE: OnceLock<DescriptorCache> = OnceLock::new();
    CACHE.get_or_init(DescriptorCache::new)
}

/// The current process-wide naming policy.
pub fn naming_policy() -> NamingPolicy {
    cache().policy()
}

/// Change the process-wide naming policy, invalidating every cached descriptor.
pub fn set_naming_policy(policy: NamingPolicy) {
    cache().set_policy(policy);
}

/// Descriptor of `M` under the current naming policy.
pub fn describe<M: Model>() -> Arc<ModelDescriptor> {
    describe_schema(TypeId::of::<M>(), M::schema())
}

/// Descriptor for a type known only by id and schema.
pub fn describe_schema(type_id: TypeId, schema: &'static ModelSchema) -> Arc<ModelDescriptor> {
    let c = cache();
    c.get_or_build(type_id, schema, c.policy())
}

/// Table name of a schema under a policy, without touching the cache.
pub fn table_name_of(schema: &ModelSchema, policy: NamingPolicy) -> String {
    match schema.table_name {
        Some(name) => name.to_string(),
        None => table_name_for(schema.name, policy.singular),
    }
}

fn column_of(field: &FieldSchema) -> String {
    field
        .column
        .map_or_else(|| to_snake_case(field.name), str::to_string)
}

/// Column fields of a schema with embedded fields promoted.
fn flatten(schema: &'static ModelSchema, out: &mut Vec<&'static FieldSchema>) {
    for field in schema.fields {
        match field.embedded {
            Some(inner) => flatten(inner(), out),
            None => out.push(field),
        }
    }
}

fn flattened(schema: &'static ModelSchema) -> Vec<&'static FieldSchema> {
    let mut out = Vec::with_capacity(schema.fields.len());
    flatten(schema, &mut out);
    out
}

/// (field, column) of the schema's primary key: tagged, else `id`.
fn primary_key_of(fields: &[&'static FieldSchema]) -> Option<(String, String)> {
    let columns = || {
        fields
            .iter()
            .filter(|f| f.relation.is_none() && !f.ignored)
    };
    columns()
        .find(|f| f.primary_key)
        .or_else(|| columns().find(|f| f.name == "id" || column_of(f) == "id"))
        .map(|f| (f.name.to_string(), column_of(f)))
}

/// Find a column field by Rust name or column name.
fn find_column(fields: &[&'static FieldSchema], key: &str) -> Option<(String, String)> {
    fields
        .iter()
        .filter(|f| f.relation.is_none() && !f.ignored)
        .find(|f| f.name == key || column_of(f) == key)
        .map(|f| (f.name.to_string(), column_of(f)))
}

fn classify(
    owner: &'static ModelSchema,
    owner_fields: &[&'static FieldSchema],
    field: &FieldSchema,
    rel: &RelationSchema,
    policy: NamingPolicy,
) -> Option<Relationship> {
    let related = (rel.related)();
    let related_fields = flattened(related);
    let related_table = table_name_of(related, policy);
    let owner_pk = primary_key_of(owner_fields);
    let related_pk = primary_key_of(&related_fields);

    let relationship = |kind, owner_key: (String, String), related_key: (String, String)| {
        Relationship {
            kind,
            related: rel.related,
            related_table: related_table.clone(),
            owner_field: owner_key.0,
            owner_column: owner_key.1,
            related_field: related_key.0,
            related_column: related_key.1,
            join_table: None,
        }
    };

    if let Some(join) = rel.many_to_many {
        let owner_key = match rel.foreign_key {
            Some(key) => find_column(owner_fields, key)?,
            None => owner_pk?,
        };
        let related_key = match rel.association_foreign_key {
            Some(key) => find_column(&related_fields, key)?,
            None => related_pk?,
        };
        let join_table = JoinTable {
            table: join.to_string(),
            foreign_key: rel
                .join_foreign_key
                .map_or_else(|| foreign_key_for(owner.name, &owner_key.1), str::to_string),
            association_foreign_key: rel.association_join_foreign_key.map_or_else(
                || foreign_key_for(related.name, &related_key.1),
                str::to_string,
            ),
        };
        let mut r = relationship(RelationKind::ManyToMany, owner_key, related_key);
        r.join_table = Some(join_table);
        return Some(r);
    }

    // has-one / has-many: the foreign key lives on the related model
    let owner_key = match rel.association_foreign_key {
        Some(key) => find_column(owner_fields, key),
        None => owner_pk,
    };
    if let Some(owner_key) = owner_key {
        let fk = rel
            .foreign_key
            .map_or_else(|| foreign_key_for(owner.name, &owner_key.1), str::to_string);
        if let Some(related_key) = find_column(&related_fields, &fk) {
            let kind = if rel.many {
                RelationKind::HasMany
            } else {
                RelationKind::HasOne
            };
            return Some(relationship(kind, owner_key, related_key));
        }
    }

    if rel.many {
        return None;
    }

    // belongs-to: the foreign key lives on the owner
    let related_key = match rel.association_foreign_key {
        Some(key) => find_column(&related_fields, key)?,
        None => related_pk?,
    };
    let fk = rel
        .foreign_key
        .map_or_else(|| foreign_key_for(field.name, &related_key.1), str::to_string);
    let owner_key = find_column(owner_fields, &fk)?;
    Some(relationship(RelationKind::BelongsTo, owner_key, related_key))
}

fn resolve_index(name: Option<&'static str>, prefix: &str, table: &str, column: &str) -> Option<String> {
    name.map(|n| {
        if n.is_empty() {
            format!("{}_{}_{}", prefix, table, column)
        } else {
            n.to_string()
        }
    })
}

fn build_descriptor(
    type_id: TypeId,
    schema: &'static ModelSchema,
    policy: NamingPolicy,
) -> ModelDescriptor {
    let table_name = table_name_of(schema, policy);
    let flat = flattened(schema);
    let mut fields = Vec::with_capacity(flat.len());

    for field in &flat {
        let column = column_of(field);
        let relationship = field
            .relation
            .as_ref()
            .and_then(|rel| classify(schema, &flat, field, rel, policy));
        if field.relation.is_some() && relationship.is_none() {
            tracing::debug!(
                model = schema.name,
                field = field.name,
                "Relation field has no resolvable keys; ignoring"
            );
        }
        fields.push(FieldDescriptor {
            name: field.name.to_string(),
            sql_type: field.sql_type,
            sql_type_override: field.sql_type_override.map(str::to_string),
            size: field.size,
            nullable: field.nullable,
            primary_key: false,
            auto_increment: field.auto_increment,
            unique: field.unique,
            default: field.default.map(str::to_string),
            index: resolve_index(field.index, "idx", &table_name, &column),
            unique_index: resolve_index(field.unique_index, "uix", &table_name, &column),
            ignored: field.ignored || (field.relation.is_some() && relationship.is_none()),
            relationship,
            column,
        });
    }

    let mut primary_keys: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(i, f)| f.is_normal() && flat[*i].primary_key)
        .map(|(i, _)| i)
        .collect();
    if primary_keys.is_empty() {
        if let Some(i) = fields
            .iter()
            .position(|f| f.is_normal() && (f.name == "id" || f.column == "id"))
        {
            primary_keys.push(i);
        }
    }
    for &i in &primary_keys {
        fields[i].primary_key = true;
    }

    ModelDescriptor {
        type_id,
        name: schema.name,
        table_name,
        fields,
        primary_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests touching the process-wide policy hold this lock.
    static POLICY_LOCK: Mutex<()> = Mutex::new(());

    struct User;
    struct Email;
    struct Company;
    struct Profile;
    struct Language;
    struct Audit;

    fn user_schema() -> &'static ModelSchema {
        static FIELDS: &[FieldSchema] = &[
            FieldSchema::new("id", SqlType::BigInt),
            FieldSchema::new("name", SqlType::Text).size(Some(100)).index(Some("")),
            FieldSchema::new("company_id", SqlType::BigInt).nullable(true),
            FieldSchema::new("audit", SqlType::BigInt).embedded(audit_schema),
            FieldSchema::new("emails", SqlType::BigInt)
                .relation(RelationSchema::new(email_schema, true)),
            FieldSchema::new("company", SqlType::BigInt)
                .relation(RelationSchema::new(company_schema, false)),
            FieldSchema::new("profile", SqlType::BigInt)
                .relation(RelationSchema::new(profile_schema, false)),
            FieldSchema::new("languages", SqlType::BigInt).relation(
                RelationSchema::new(language_schema, true).many_to_many(Some("user_languages")),
            ),
            FieldSchema::new("orphans", SqlType::BigInt)
                .relation(RelationSchema::new(company_schema, true)),
            FieldSchema::new("scratch", SqlType::Text).ignored(true),
        ];
        static SCHEMA: ModelSchema = ModelSchema {
            name: "User",
            type_id: TypeId::of::<User>,
            table_name: None,
            fields: FIELDS,
        };
        &SCHEMA
    }

    fn audit_schema() -> &'static ModelSchema {
        static FIELDS: &[FieldSchema] = &[
            FieldSchema::new("created_at", SqlType::Timestamp),
            FieldSchema::new("updated_at", SqlType::Timestamp),
        ];
        static SCHEMA: ModelSchema = ModelSchema {
            name: "Audit",
            type_id: TypeId::of::<Audit>,
            table_name: None,
            fields: FIELDS,
        };
        &SCHEMA
    }

    fn email_schema() -> &'static ModelSchema {
        static FIELDS: &[FieldSchema] = &[
            FieldSchema::new("email_id", SqlType::BigInt).primary_key(true),
            FieldSchema::new("user_id", SqlType::BigInt),
            FieldSchema::new("address", SqlType::Text).column(Some("email_address")),
        ];
        static SCHEMA: ModelSchema = ModelSchema {
            name: "Email",
            type_id: TypeId::of::<Email>,
            table_name: None,
            fields: FIELDS,
        };
        &SCHEMA
    }

    fn company_schema() -> &'static ModelSchema {
        static FIELDS: &[FieldSchema] = &[
            FieldSchema::new("id", SqlType::BigInt),
            FieldSchema::new("name", SqlType::Text),
        ];
        static SCHEMA: ModelSchema = ModelSchema {
            name: "Company",
            type_id: TypeId::of::<Company>,
            table_name: None,
            fields: FIELDS,
        };
        &SCHEMA
    }

    fn profile_schema() -> &'static ModelSchema {
        static FIELDS: &[FieldSchema] = &[
            FieldSchema::new("id", SqlType::BigInt),
            FieldSchema::new("user_id", SqlType::BigInt),
        ];
        static SCHEMA: ModelSchema = ModelSchema {
            name: "Profile",
            type_id: TypeId::of::<Profile>,
            table_name: Some("user_profiles"),
            fields: FIELDS,
        };
        &SCHEMA
    }

    fn language_schema() -> &'static ModelSchema {
        static FIELDS: &[FieldSchema] = &[
            FieldSchema::new("id", SqlType::BigInt),
            FieldSchema::new("code", SqlType::Text),
        ];
        static SCHEMA: ModelSchema = ModelSchema {
            name: "Language",
            type_id: TypeId::of::<Language>,
            table_name: None,
            fields: FIELDS,
        };
        &SCHEMA
    }

    fn user() -> ModelDescriptor {
        build_descriptor(TypeId::of::<User>(), user_schema(), NamingPolicy::default())
    }

    #[test]
    fn table_and_columns() {
        let d = user();
        assert_eq!(d.table_name, "users");
        let columns: Vec<_> = d.columns().map(|f| f.column.as_str()).collect();
        assert_eq!(
            columns,
            vec!["id", "name", "company_id", "created_at", "updated_at"]
        );
        assert_eq!(d.primary_field().unwrap().column, "id");
        assert_eq!(d.field("name").unwrap().index.as_deref(), Some("idx_users_name"));
        assert!(d.field("scratch").unwrap().ignored);
        assert!(!d.has_column("scratch"));
    }

    #[test]
    fn explicit_primary_key_and_column() {
        let d = build_descriptor(
            TypeId::of::<Email>(),
            email_schema(),
            NamingPolicy::default(),
        );
        assert_eq!(d.primary_field().unwrap().name, "email_id");
        assert_eq!(d.field("address").unwrap().column, "email_address");
        assert_eq!(d.field("email_address").unwrap().name, "address");
    }

    #[test]
    fn relationships_are_classified() {
        let d = user();
        let kind = |name: &str| {
            d.field(name)
                .and_then(|f| f.relationship.as_ref())
                .map(|r| r.kind)
        };
        assert_eq!(kind("emails"), Some(RelationKind::HasMany));
        assert_eq!(kind("company"), Some(RelationKind::BelongsTo));
        assert_eq!(kind("profile"), Some(RelationKind::HasOne));
        assert_eq!(kind("languages"), Some(RelationKind::ManyToMany));
        assert_eq!(kind("orphans"), None);
        assert!(d.field("orphans").unwrap().ignored);

        let company = d.field("company").unwrap().relationship.clone().unwrap();
        assert_eq!(company.owner_column, "company_id");
        assert_eq!(company.related_column, "id");
        assert_eq!(company.related_table, "companies");

        let profile = d.field("profile").unwrap().relationship.clone().unwrap();
        assert_eq!(profile.related_table, "user_profiles");
        assert!(profile.foreign_key_on_related());

        let languages = d.field("languages").unwrap().relationship.clone().unwrap();
        assert_eq!(
            languages.join_table,
            Some(JoinTable {
                table: "user_languages".to_string(),
                foreign_key: "user_id".to_string(),
                association_foreign_key: "language_id".to_string(),
            })
        );
    }

    #[test]
    fn cache_returns_shared_descriptor() {
        let _guard = POLICY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let a = describe_schema(TypeId::of::<Company>(), company_schema());
        let b = describe_schema(TypeId::of::<Company>(), company_schema());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn policy_change_invalidates() {
        let _guard = POLICY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let plural = describe_schema(TypeId::of::<Language>(), language_schema());
        assert_eq!(plural.table_name, "languages");

        set_naming_policy(NamingPolicy { singular: true });
        let singular = describe_schema(TypeId::of::<Language>(), language_schema());
        assert_eq!(singular.table_name, "language");
        assert!(!Arc::ptr_eq(&plural, &singular));

        set_naming_policy(NamingPolicy::default());
        let again = describe_schema(TypeId::of::<Language>(), language_schema());
        assert_eq!(again.table_name, "languages");
        assert!(!Arc::ptr_eq(&plural, &again));
    }

    #[test]
    fn concurrent_reads_share_one_entry() {
        let _guard = POLICY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| describe_schema(TypeId::of::<Profile>(), profile_schema()))
            })
            .collect();
        let all: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(all.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
