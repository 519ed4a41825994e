//! In-memory executor and small models shared by the unit tests.

use crate::session::Session;
use sqlchain_core::{
    CommonDialect, Error, ExecResult, Executor, FieldSchema, FromValue, Hooks, IsolationLevel,
    Model, ModelSchema, Record, RelationSchema, Result, Row, SqlType, Value,
};
use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    statements: Vec<(String, Vec<Value>)>,
    queued: VecDeque<Vec<Row>>,
    next_id: i64,
    began: usize,
    committed: usize,
    rolled_back: usize,
}

/// Records every statement and answers queries from a queue of canned
/// result sets. Unqueued queries return no rows.
#[derive(Debug, Clone)]
pub(crate) struct MockExecutor {
    state: Arc<Mutex<MockState>>,
    rows_affected: u64,
    transactions: bool,
    in_transaction: bool,
    failing_on: Option<String>,
}

/// Read side of a [`MockExecutor`], kept by the test after the executor
/// moves into a session.
#[derive(Debug, Clone)]
pub(crate) struct MockLog {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockExecutor {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            rows_affected: 1,
            transactions: true,
            in_transaction: false,
            failing_on: None,
        }
    }

    pub(crate) fn with_rows(self, rows: Vec<Row>) -> Self {
        lock(&self.state).queued.push_back(rows);
        self
    }

    pub(crate) fn affecting(mut self, rows: u64) -> Self {
        self.rows_affected = rows;
        self
    }

    pub(crate) fn without_transactions(mut self) -> Self {
        self.transactions = false;
        self
    }

    /// Fail every statement containing `fragment`.
    pub(crate) fn failing_on(mut self, fragment: &str) -> Self {
        self.failing_on = Some(fragment.to_string());
        self
    }

    pub(crate) fn state(&self) -> MockLog {
        MockLog {
            state: Arc::clone(&self.state),
        }
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        if self.failing_on.as_deref().is_some_and(|f| sql.contains(f)) {
            return Err(Error::Custom(format!("mock failure on: {}", sql)));
        }
        lock(&self.state)
            .statements
            .push((sql.to_string(), params.to_vec()));
        Ok(())
    }
}

impl Executor for MockExecutor {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        Ok(lock(&self.state).queued.pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.record(sql, params)?;
        let mut state = lock(&self.state);
        state.next_id += 1;
        Ok(ExecResult::new(self.rows_affected).with_last_insert_id(state.next_id))
    }

    fn begin(&self, _isolation: Option<IsolationLevel>) -> Result<Arc<dyn Executor>> {
        if !self.transactions {
            return Err(Error::CantStartTransaction);
        }
        lock(&self.state).began += 1;
        let mut tx = self.clone();
        tx.in_transaction = true;
        Ok(Arc::new(tx))
    }

    fn is_transaction(&self) -> bool {
        self.in_transaction
    }

    fn commit(&self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::InvalidTransaction);
        }
        lock(&self.state).committed += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::InvalidTransaction);
        }
        lock(&self.state).rolled_back += 1;
        Ok(())
    }
}

impl MockLog {
    pub(crate) fn statements(&self) -> Vec<(String, Vec<Value>)> {
        lock(&self.state).statements.clone()
    }

    pub(crate) fn last_statement(&self) -> Option<(String, Vec<Value>)> {
        lock(&self.state).statements.last().cloned()
    }

    pub(crate) fn statement_count(&self) -> usize {
        lock(&self.state).statements.len()
    }

    pub(crate) fn began(&self) -> usize {
        lock(&self.state).began
    }

    pub(crate) fn committed(&self) -> usize {
        lock(&self.state).committed
    }

    pub(crate) fn rolled_back(&self) -> usize {
        lock(&self.state).rolled_back
    }
}

pub(crate) fn mock_session(exec: MockExecutor) -> (Session, MockLog) {
    let log = exec.state();
    (Session::new(Arc::new(exec), Arc::new(CommonDialect)), log)
}

pub(crate) fn text_row(value: &str) -> Row {
    Row::new(vec!["value".into()], vec![Value::from(value)])
}

pub(crate) fn count_row(n: i64) -> Row {
    Row::new(vec!["count".into()], vec![Value::BigInt(n)])
}

pub(crate) fn user_row(id: i64, name: &str, age: i32) -> Row {
    Row::new(
        vec!["id".into(), "name".into(), "age".into()],
        vec![Value::BigInt(id), Value::from(name), Value::Int(age)],
    )
}

pub(crate) fn book_row(id: i64, author_id: i64, title: &str) -> Row {
    Row::new(
        vec!["id".into(), "author_id".into(), "title".into()],
        vec![Value::BigInt(id), Value::BigInt(author_id), Value::from(title)],
    )
}

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct User {
    pub id: i64,
    pub name: String,
    pub age: i32,
}

static USER_FIELDS: &[FieldSchema] = &[
    FieldSchema::new("id", SqlType::BigInt).primary_key(true),
    FieldSchema::new("name", SqlType::Text),
    FieldSchema::new("age", SqlType::Integer),
];

static USER_SCHEMA: ModelSchema = ModelSchema {
    name: "User",
    type_id: TypeId::of::<User>,
    table_name: None,
    fields: USER_FIELDS,
};

impl Model for User {
    fn schema() -> &'static ModelSchema {
        &USER_SCHEMA
    }

    fn value_of(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::from(self.id)),
            "name" => Some(Value::from(self.name.clone())),
            "age" => Some(Value::from(self.age)),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = i64::from_value(&value)?,
            "name" => self.name = String::from_value(&value)?,
            "age" => self.age = i32::from_value(&value)?,
            _ => return Err(Self::schema().unknown_field(field)),
        }
        Ok(())
    }

    fn assign_row(&mut self, row: &Row) -> Result<()> {
        if let Some(id) = row.get_optional("id")? {
            self.id = id;
        }
        if let Some(name) = row.get_optional("name")? {
            self.name = name;
        }
        if let Some(age) = row.get_optional("age")? {
            self.age = age;
        }
        Ok(())
    }
}

impl Hooks for User {}

/// Timestamps, soft delete and a rejecting hook.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Article {
    pub id: i64,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

static ARTICLE_FIELDS: &[FieldSchema] = &[
    FieldSchema::new("id", SqlType::BigInt).primary_key(true),
    FieldSchema::new("title", SqlType::Text),
    FieldSchema::new("created_at", SqlType::Timestamp),
    FieldSchema::new("updated_at", SqlType::Timestamp),
    FieldSchema::new("deleted_at", SqlType::Timestamp).nullable(true),
];

static ARTICLE_SCHEMA: ModelSchema = ModelSchema {
    name: "Article",
    type_id: TypeId::of::<Article>,
    table_name: None,
    fields: ARTICLE_FIELDS,
};

impl Model for Article {
    fn schema() -> &'static ModelSchema {
        &ARTICLE_SCHEMA
    }

    fn value_of(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::from(self.id)),
            "title" => Some(Value::from(self.title.clone())),
            "created_at" => Some(Value::from(self.created_at)),
            "updated_at" => Some(Value::from(self.updated_at)),
            "deleted_at" => Some(Value::from(self.deleted_at)),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = i64::from_value(&value)?,
            "title" => self.title = String::from_value(&value)?,
            "created_at" => self.created_at = i64::from_value(&value)?,
            "updated_at" => self.updated_at = i64::from_value(&value)?,
            "deleted_at" => self.deleted_at = Option::<i64>::from_value(&value)?,
            _ => return Err(Self::schema().unknown_field(field)),
        }
        Ok(())
    }

    fn assign_row(&mut self, row: &Row) -> Result<()> {
        if let Some(id) = row.get_optional("id")? {
            self.id = id;
        }
        if let Some(title) = row.get_optional("title")? {
            self.title = title;
        }
        if let Some(created_at) = row.get_optional("created_at")? {
            self.created_at = created_at;
        }
        if let Some(updated_at) = row.get_optional("updated_at")? {
            self.updated_at = updated_at;
        }
        if let Some(deleted_at) = row.get_optional("deleted_at")? {
            self.deleted_at = deleted_at;
        }
        Ok(())
    }
}

impl Hooks for Article {
    fn before_save(&mut self) -> Result<()> {
        if self.title == "forbidden" {
            return Err(Error::Custom("title is forbidden".into()));
        }
        self.title = self.title.trim().to_string();
        Ok(())
    }
}

/// Owner side of a has-many relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Author {
    pub id: i64,
    pub name: String,
    pub books: Vec<Book>,
}

fn book_schema() -> &'static ModelSchema {
    Book::schema()
}

static AUTHOR_FIELDS: &[FieldSchema] = &[
    FieldSchema::new("id", SqlType::BigInt).primary_key(true),
    FieldSchema::new("name", SqlType::Text),
    FieldSchema::new("books", SqlType::Text)
        .nullable(true)
        .relation(RelationSchema::new(book_schema, true)),
];

static AUTHOR_SCHEMA: ModelSchema = ModelSchema {
    name: "Author",
    type_id: TypeId::of::<Author>,
    table_name: None,
    fields: AUTHOR_FIELDS,
};

impl Model for Author {
    fn schema() -> &'static ModelSchema {
        &AUTHOR_SCHEMA
    }

    fn value_of(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::from(self.id)),
            "name" => Some(Value::from(self.name.clone())),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = i64::from_value(&value)?,
            "name" => self.name = String::from_value(&value)?,
            _ => return Err(Self::schema().unknown_field(field)),
        }
        Ok(())
    }

    fn assign_row(&mut self, row: &Row) -> Result<()> {
        if let Some(id) = row.get_optional("id")? {
            self.id = id;
        }
        if let Some(name) = row.get_optional("name")? {
            self.name = name;
        }
        Ok(())
    }

    fn relation_records_mut(&mut self, field: &str) -> Vec<&mut dyn Record> {
        match field {
            "books" => self.books.iter_mut().map(|b| b as &mut dyn Record).collect(),
            _ => Vec::new(),
        }
    }

    fn load_relation(&mut self, field: &str, rows: &[Row]) -> Result<()> {
        match field {
            "books" => {
                self.books = rows.iter().map(Book::from_row).collect::<Result<Vec<_>>>()?;
                Ok(())
            }
            _ => Err(Self::schema().unknown_field(field)),
        }
    }
}

impl Hooks for Author {}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Book {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
}

static BOOK_FIELDS: &[FieldSchema] = &[
    FieldSchema::new("id", SqlType::BigInt).primary_key(true),
    FieldSchema::new("author_id", SqlType::BigInt),
    FieldSchema::new("title", SqlType::Text),
];

static BOOK_SCHEMA: ModelSchema = ModelSchema {
    name: "Book",
    type_id: TypeId::of::<Book>,
    table_name: None,
    fields: BOOK_FIELDS,
};

impl Model for Book {
    fn schema() -> &'static ModelSchema {
        &BOOK_SCHEMA
    }

    fn value_of(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::from(self.id)),
            "author_id" => Some(Value::from(self.author_id)),
            "title" => Some(Value::from(self.title.clone())),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = i64::from_value(&value)?,
            "author_id" => self.author_id = i64::from_value(&value)?,
            "title" => self.title = String::from_value(&value)?,
            _ => return Err(Self::schema().unknown_field(field)),
        }
        Ok(())
    }

    fn assign_row(&mut self, row: &Row) -> Result<()> {
        if let Some(id) = row.get_optional("id")? {
            self.id = id;
        }
        if let Some(author_id) = row.get_optional("author_id")? {
            self.author_id = author_id;
        }
        if let Some(title) = row.get_optional("title")? {
            self.title = title;
        }
        Ok(())
    }
}

impl Hooks for Book {}
