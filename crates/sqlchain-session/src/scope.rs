//! Per-operation working state and SQL assembly.
//!
//! A [`Scope`] is created by every terminal session call and handed to
//! each handler of the matching pipeline. It binds the target value, a
//! private copy of the session's [`Search`], instance-only settings, and
//! the SQL text plus arguments the handlers build.
//!
//! Rendering appends bound values to `sql_vars` in the same pass that
//! writes their `?` placeholders, so argument order always matches
//! placeholder order. Placeholders are rewritten to the dialect's form
//! only when the statement is handed to the executor.

use crate::session::Session;
use crate::settings::Settings;
use regex::Regex;
use sqlchain_core::{
    Dialect, Error, ExecResult, Executor, FieldDescriptor, Hook, ModelDescriptor, ModelSchema,
    Record, Result, Row, Target, Value,
};
use sqlchain_query::{
    Arg, Clause, Condition, Order, Search, Selection, bind_placeholders, expand_placeholders,
};
use std::any::Any;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// What a scope operates on.
pub(crate) enum ScopeTarget<'a> {
    /// Nothing bound; table comes from the search.
    Empty,
    /// A model or a list of models.
    Value(&'a mut dyn Target),
    /// One record reached through another (nested saves).
    Record(&'a mut dyn Record),
    /// Only the model type is known (preload and association queries).
    Schema(&'static ModelSchema),
}

impl ScopeTarget<'_> {
    fn schema(&self) -> Option<&'static ModelSchema> {
        match self {
            ScopeTarget::Empty => None,
            ScopeTarget::Value(t) => Some(t.target_schema()),
            ScopeTarget::Record(r) => Some(r.record_schema()),
            ScopeTarget::Schema(s) => Some(*s),
        }
    }
}

/// What a finished scope hands back to its session.
pub(crate) struct Finished {
    pub error: Option<Error>,
    pub rows_affected: u64,
    pub rows: Vec<Row>,
}

struct Patterns {
    comparison: Regex,
    column: Regex,
    number: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                comparison: Regex::new(r"(?i)\s(=|<>|!=|[<>]=?|LIKE|IS|IN)\s").ok()?,
                column: Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").ok()?,
                number: Regex::new(r"^\s*\d+\s*$").ok()?,
            })
        })
        .as_ref()
}

fn is_column_name(s: &str) -> bool {
    patterns().is_some_and(|p| p.column.is_match(s.trim()))
}

fn is_comparison(s: &str) -> bool {
    patterns().is_some_and(|p| p.comparison.is_match(s))
}

fn is_number(s: &str) -> bool {
    patterns().is_some_and(|p| p.number.is_match(s))
}

/// Does `sql` contain an `OR` outside parentheses and string literals?
fn has_top_level_or(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut depth = 0_i32;
    let mut in_literal = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' => in_literal = !in_literal,
            b'(' if !in_literal => depth += 1,
            b')' if !in_literal => depth -= 1,
            b' ' if !in_literal && depth == 0 => {
                if bytes.len() >= i + 4 && bytes[i..i + 4].eq_ignore_ascii_case(b" OR ") {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn group_if_or(sql: String) -> String {
    if has_top_level_or(&sql) {
        format!("({})", sql)
    } else {
        sql
    }
}

/// One operation's working state.
pub struct Scope<'a> {
    session: &'a Session,
    target: ScopeTarget<'a>,
    /// Scan destination, when results go somewhere other than the target
    destination: Option<&'a mut dyn Target>,
    descriptor: Option<Arc<ModelDescriptor>>,
    executor: Arc<dyn Executor>,
    pub(crate) search: Search,
    settings: Settings,
    sql: String,
    sql_vars: Vec<Value>,
    error: Option<Error>,
    rows_affected: u64,
    skip_left: bool,
    rows: Vec<Row>,
    pub(crate) update_attrs: Option<Vec<(String, Value)>>,
    pub(crate) update_interface: Option<Condition>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(session: &'a Session, target: ScopeTarget<'a>) -> Self {
        let descriptor = target.schema().map(ModelSchema::describe);
        Self {
            session,
            target,
            destination: None,
            descriptor,
            executor: Arc::clone(&session.executor),
            search: session.search.clone(),
            settings: Settings::new(),
            sql: String::new(),
            sql_vars: Vec::new(),
            error: session.error.clone(),
            rows_affected: 0,
            skip_left: false,
            rows: Vec::new(),
            update_attrs: None,
            update_interface: None,
        }
    }

    pub(crate) fn with_destination(mut self, destination: &'a mut dyn Target) -> Self {
        self.destination = Some(destination);
        self
    }

    pub(crate) fn finish(self) -> Finished {
        Finished {
            error: self.error,
            rows_affected: self.rows_affected,
            rows: self.rows,
        }
    }
}

impl Scope<'_> {
    // ========================================================================
    // Collaborators
    // ========================================================================

    pub fn session(&self) -> &Session {
        self.session
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.session.dialect.as_ref()
    }

    /// The executor statements run on; a transaction once one was begun.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub(crate) fn set_executor(&mut self, executor: Arc<dyn Executor>) {
        self.executor = executor;
    }

    /// A fresh session sharing this scope's executor, for nested saves.
    pub fn nested_session(&self) -> Session {
        self.session.nested(Arc::clone(&self.executor))
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut Search {
        &mut self.search
    }

    pub fn descriptor(&self) -> Option<&Arc<ModelDescriptor>> {
        self.descriptor.as_ref()
    }

    pub fn quote(&self, ident: &str) -> String {
        self.dialect().quote(ident)
    }

    /// Quote plain (possibly qualified) identifiers, pass anything else through.
    pub fn quote_if_possible(&self, s: &str) -> String {
        if is_column_name(s) {
            self.dialect().quote_path(s.trim())
        } else {
            s.to_string()
        }
    }

    // ========================================================================
    // Errors and flow
    // ========================================================================

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Record an error; the not-found sentinel replaces earlier errors.
    pub fn add_error(&mut self, err: Error) {
        if matches!(err, Error::RecordNotFound) {
            self.error = Some(err);
            return;
        }
        self.error = Some(match self.error.take() {
            Some(existing) => existing.merge(err),
            None => err,
        });
    }

    /// Unwrap `result`, recording its error on the scope.
    pub fn check<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.add_error(e);
                None
            }
        }
    }

    /// Skip the remaining non-cleanup handlers without reporting an error.
    pub fn skip_left(&mut self) {
        self.skip_left = true;
    }

    pub fn skipped(&self) -> bool {
        self.skip_left
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// A scope setting, falling back to the session's.
    pub fn get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.settings
            .get::<T>(name)
            .or_else(|| self.session.settings.get::<T>(name))
    }

    /// Set a value visible to this scope only.
    pub fn instance_set<T: Any + Send + Sync>(&mut self, name: &str, value: T) {
        self.settings.set(name, value);
    }

    pub fn instance_get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.settings.get::<T>(name)
    }

    pub(crate) fn flag(&self, name: &str) -> bool {
        self.get::<bool>(name).unwrap_or(false)
    }

    // ========================================================================
    // Bound value
    // ========================================================================

    /// Is the target a list of models?
    pub fn is_collection(&self) -> bool {
        matches!(&self.target, ScopeTarget::Value(t) if t.is_collection())
    }

    pub fn records(&self) -> Vec<&dyn Record> {
        match &self.target {
            ScopeTarget::Value(t) => t.records(),
            ScopeTarget::Record(r) => {
                let r: &dyn Record = &**r;
                vec![r]
            }
            ScopeTarget::Empty | ScopeTarget::Schema(_) => Vec::new(),
        }
    }

    pub fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        match &mut self.target {
            ScopeTarget::Value(t) => t.records_mut(),
            ScopeTarget::Record(r) => {
                let r: &mut dyn Record = &mut **r;
                vec![r]
            }
            ScopeTarget::Empty | ScopeTarget::Schema(_) => Vec::new(),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.descriptor.as_ref().is_some_and(|d| d.has_column(name))
    }

    /// Primary key value of a single bound record.
    pub fn primary_key_value(&self) -> Option<Value> {
        if self.is_collection() {
            return None;
        }
        let pk = self.descriptor.as_ref()?.primary_field()?;
        self.records().first()?.field_value(&pk.name)
    }

    /// Is there no single record with a non-blank primary key?
    pub fn primary_key_zero(&self) -> bool {
        self.primary_key_value().is_none_or(|v| v.is_blank())
    }

    /// Set a column field on every bound record. During an update the
    /// column is also added to the written attributes.
    pub fn set_column(&mut self, field: &str, value: Value) -> Result<()> {
        let Some(desc) = self.descriptor.clone() else {
            return Err(Error::Unaddressable);
        };
        let Some(f) = desc.field(field).filter(|f| f.is_normal()) else {
            return Err(Error::Custom(format!("{} has no column {}", desc.name, field)));
        };
        if let Some(attrs) = &mut self.update_attrs {
            match attrs.iter_mut().find(|(col, _)| *col == f.column) {
                Some(entry) => entry.1 = value.clone(),
                None => attrs.push((f.column.clone(), value.clone())),
            }
        }
        for record in self.records_mut() {
            record.set_field_value(&f.name, value.clone())?;
        }
        Ok(())
    }

    /// Run a lifecycle hook on every bound record, stopping at the first error.
    pub fn call_hook(&mut self, hook: Hook) {
        let mut failure = None;
        for record in self.records_mut() {
            if let Err(e) = record.run_hook(hook) {
                failure = Some(e);
                break;
            }
        }
        if let Some(e) = failure {
            self.add_error(e);
        }
    }

    /// Whether the current select/omit lists allow writing `field`.
    pub fn changeable_field(&self, field: &FieldDescriptor) -> bool {
        if let Some(selection) = &self.search.select {
            let selected = selection.column_names();
            if !selected.is_empty() {
                return selected
                    .iter()
                    .any(|s| *s == field.name || *s == field.column);
            }
        }
        !self
            .search
            .omits
            .iter()
            .any(|o| *o == field.name || *o == field.column)
    }

    pub(crate) fn has_destination(&self) -> bool {
        self.destination.is_some()
    }

    pub(crate) fn loads_collection(&self) -> bool {
        match &self.destination {
            Some(dest) => dest.is_collection(),
            None => self.is_collection(),
        }
    }

    /// Decode rows into the scan destination, or else the target.
    pub(crate) fn load_rows(&mut self, rows: &[Row]) -> Result<usize> {
        if let Some(dest) = self.destination.as_deref_mut() {
            return dest.load_rows(rows);
        }
        match &mut self.target {
            ScopeTarget::Value(t) => t.load_rows(rows),
            ScopeTarget::Record(r) => match rows.first() {
                Some(row) => r.assign_from_row(row).map(|()| 1),
                None => Ok(0),
            },
            ScopeTarget::Empty | ScopeTarget::Schema(_) => Ok(rows.len()),
        }
    }

    // ========================================================================
    // Statement state
    // ========================================================================

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn sql_vars(&self) -> &[Value] {
        &self.sql_vars
    }

    /// Replace the statement text, keeping the accumulated arguments.
    pub fn raw(&mut self, sql: impl Into<String>) -> &mut Self {
        self.sql = sql.into();
        self
    }

    /// Bind one value and return its placeholder.
    pub fn add_to_vars(&mut self, value: Value) -> String {
        self.sql_vars.push(value);
        "?".to_string()
    }

    pub(crate) fn reset_statement(&mut self) {
        self.sql.clear();
        self.sql_vars.clear();
    }

    pub(crate) fn set_statement(&mut self, sql: String, vars: Vec<Value>) {
        self.sql = sql;
        self.sql_vars = vars;
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn set_rows_affected(&mut self, rows: u64) {
        self.rows_affected = rows;
    }

    /// Keep rows for the caller of a row query.
    pub(crate) fn set_rows(&mut self, rows: Vec<Row>) {
        self.rows = rows;
    }

    /// Run the statement as a command.
    pub fn execute(&mut self) -> Option<ExecResult> {
        if self.has_error() {
            return None;
        }
        let sql = match bind_placeholders(&self.sql, self.dialect(), self.sql_vars.len()) {
            Ok(sql) => sql,
            Err(e) => {
                self.add_error(e);
                return None;
            }
        };
        tracing::debug!(sql = %sql, params = self.sql_vars.len(), "Executing statement");
        let started = Instant::now();
        let result = self.executor.execute(&sql, &self.sql_vars);
        match result {
            Ok(res) => {
                self.rows_affected = res.rows_affected;
                self.session
                    .log_sql(&sql, &self.sql_vars, started.elapsed(), res.rows_affected);
                Some(res)
            }
            Err(e) => {
                self.add_error(e);
                None
            }
        }
    }

    /// Run the statement as a command, discarding the result.
    pub fn exec(&mut self) -> &mut Self {
        self.execute();
        self
    }

    /// Run the statement as a query.
    pub fn query_rows(&mut self) -> Option<Vec<Row>> {
        if self.has_error() {
            return None;
        }
        let sql = match bind_placeholders(&self.sql, self.dialect(), self.sql_vars.len()) {
            Ok(sql) => sql,
            Err(e) => {
                self.add_error(e);
                return None;
            }
        };
        tracing::debug!(sql = %sql, params = self.sql_vars.len(), "Executing query");
        let started = Instant::now();
        let result = self.executor.query(&sql, &self.sql_vars);
        match result {
            Ok(rows) => {
                self.session
                    .log_sql(&sql, &self.sql_vars, started.elapsed(), rows.len() as u64);
                Some(rows)
            }
            Err(e) => {
                self.add_error(e);
                None
            }
        }
    }

    // ========================================================================
    // SQL assembly
    // ========================================================================

    /// Table name: the search override, else the model's.
    pub fn table_name(&self) -> String {
        if !self.search.table_name.is_empty() {
            return self.search.table_name.clone();
        }
        self.descriptor
            .as_ref()
            .map(|d| d.table_name.clone())
            .unwrap_or_default()
    }

    /// Quoted table name. An override containing a space (`users u`,
    /// `(SELECT ...) AS t`) is used as written.
    pub fn quoted_table_name(&self) -> String {
        let table = &self.search.table_name;
        if table.contains(' ') {
            return table.clone();
        }
        self.dialect().quote_path(&self.table_name())
    }

    fn column_for(&self, key: &str) -> String {
        self.descriptor
            .as_ref()
            .and_then(|d| d.field(key))
            .map_or_else(|| key.to_string(), |f| f.column.clone())
    }

    fn primary_column(&self) -> Option<String> {
        self.descriptor
            .as_ref()
            .and_then(|d| d.primary_field())
            .map(|f| f.column.clone())
    }

    fn expand(&mut self, sql: &str, args: &[Arg]) -> String {
        match expand_placeholders(sql, args, &mut self.sql_vars) {
            Ok(expanded) => expanded,
            Err(e) => {
                self.add_error(e);
                sql.to_string()
            }
        }
    }

    /// Render one clause. `include == false` renders its negation.
    fn build_condition(&mut self, clause: &Clause, include: bool) -> String {
        let table = self.quoted_table_name();
        match &clause.condition {
            Condition::Text(text) if is_number(text) => {
                let key = text.trim().parse::<i64>().map_or_else(
                    |_| Value::Text(text.trim().to_string()),
                    Value::BigInt,
                );
                self.key_condition(&table, std::slice::from_ref(&key), false, include)
            }
            Condition::Text(text) if include => self.expand(text, &clause.args),
            Condition::Text(text) => {
                if !is_comparison(text) && is_column_name(text) {
                    self.not_column_condition(&table, text, &clause.args)
                } else {
                    let sql = self.expand(text, &clause.args);
                    format!("NOT ({})", sql)
                }
            }
            Condition::PrimaryKey(key) => {
                self.key_condition(&table, std::slice::from_ref(key), false, include)
            }
            Condition::PrimaryKeys(keys) => self.key_condition(&table, keys, true, include),
            Condition::Map(pairs) => {
                let pairs: Vec<(String, Value)> = pairs
                    .iter()
                    .map(|(k, v)| (self.column_for(k), v.clone()))
                    .collect();
                self.equality_conditions(&table, &pairs, include)
            }
            Condition::Record(record) => {
                let desc = record.record_schema().describe();
                let table = self.dialect().quote_path(&desc.table_name);
                let pairs: Vec<(String, Value)> = desc
                    .columns()
                    .filter_map(|f| {
                        record
                            .field_value(&f.name)
                            .filter(|v| !v.is_blank())
                            .map(|v| (f.column.clone(), v))
                    })
                    .collect();
                self.equality_conditions(&table, &pairs, include)
            }
            Condition::Expr(e) => {
                let sql = self.expand(e.sql(), e.args());
                if include { sql } else { format!("NOT ({})", sql) }
            }
        }
    }

    fn key_condition(&mut self, table: &str, keys: &[Value], list: bool, include: bool) -> String {
        let Some(pk) = self.primary_column() else {
            self.add_error(Error::Custom(format!(
                "{} has no primary key to match",
                self.table_name()
            )));
            return String::new();
        };
        let column = format!("{}.{}", table, self.quote(&pk));
        if list {
            let marks = vec!["?"; keys.len()].join(",");
            self.sql_vars.extend(keys.iter().cloned());
            let op = if include { "IN" } else { "NOT IN" };
            format!("{} {} ({})", column, op, marks)
        } else {
            let op = if include { "=" } else { "<>" };
            let mark = self.add_to_vars(keys.first().cloned().unwrap_or(Value::Null));
            format!("{} {} {}", column, op, mark)
        }
    }

    fn equality_conditions(
        &mut self,
        table: &str,
        pairs: &[(String, Value)],
        include: bool,
    ) -> String {
        let mut parts = Vec::with_capacity(pairs.len());
        for (column, value) in pairs {
            let column = format!("{}.{}", table, self.quote(column));
            let part = match (value.is_null(), include) {
                (true, true) => format!("{} IS NULL", column),
                (true, false) => format!("{} IS NOT NULL", column),
                (false, true) => format!("{} = {}", column, self.add_to_vars(value.clone())),
                (false, false) => format!("{} <> {}", column, self.add_to_vars(value.clone())),
            };
            parts.push(part);
        }
        parts.join(" AND ")
    }

    /// `Not("name", ...)`: a bare column excluded from a value or a list.
    fn not_column_condition(&mut self, table: &str, column: &str, args: &[Arg]) -> String {
        let column = column.trim();
        let column = if column.contains('.') {
            self.dialect().quote_path(column)
        } else {
            format!("{}.{}", table, self.quote(column))
        };
        match args.first() {
            Some(Arg::List(values)) if values.is_empty() => String::new(),
            Some(Arg::List(values)) => {
                let marks = vec!["?"; values.len()].join(",");
                self.sql_vars.extend(values.iter().cloned());
                format!("{} NOT IN ({})", column, marks)
            }
            Some(Arg::Value(v)) if v.is_null() => format!("{} IS NOT NULL", column),
            Some(Arg::Value(v)) => format!("{} <> {}", column, self.add_to_vars(v.clone())),
            Some(Arg::Expr(e)) => {
                let sql = self.expand(e.sql(), e.args());
                format!("{} NOT IN ({})", column, sql)
            }
            None => String::new(),
        }
    }

    fn render_clauses(&mut self, clauses: &[Clause], include: bool) -> Vec<String> {
        clauses
            .iter()
            .map(|c| self.build_condition(c, include))
            .filter(|s| !s.is_empty())
            .map(group_if_or)
            .collect()
    }

    /// The WHERE fragment, with a leading space, or empty.
    ///
    /// Primary-key and soft-delete conditions come first and are AND-ed
    /// with the parenthesized user conditions.
    pub fn where_sql(&mut self) -> String {
        let table = self.quoted_table_name();
        let mut primary = Vec::new();

        if !self.search.raw {
            if !self.primary_key_zero() {
                let fields: Vec<(String, String)> = self
                    .descriptor
                    .as_ref()
                    .map(|d| {
                        d.primary_fields()
                            .map(|f| (f.name.clone(), f.column.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                for (name, column) in fields {
                    let value = self
                        .records()
                        .first()
                        .and_then(|r| r.field_value(&name))
                        .unwrap_or(Value::Null);
                    let column = format!("{}.{}", table, self.quote(&column));
                    let mark = self.add_to_vars(value);
                    primary.push(format!("{} = {}", column, mark));
                }
            }
            if !self.search.unscoped && self.has_column("deleted_at") {
                primary.push(format!("{}.{} IS NULL", table, self.quote("deleted_at")));
            }
        }

        let wheres = self.search.where_conditions.clone();
        let nots = self.search.not_conditions.clone();
        let ors = self.search.or_conditions.clone();
        let mut and_parts = self.render_clauses(&wheres, true);
        and_parts.extend(self.render_clauses(&nots, false));
        let or_parts = self.render_clauses(&ors, true);

        let mut combined = and_parts.join(" AND ");
        let or_sql = or_parts.join(" OR ");
        if combined.is_empty() {
            combined = or_sql;
        } else if !or_sql.is_empty() {
            combined = format!("{} OR {}", combined, or_sql);
        }

        if self.search.raw {
            return if combined.is_empty() {
                String::new()
            } else {
                format!(" {}", combined)
            };
        }
        if !primary.is_empty() {
            let mut sql = format!(" WHERE {}", primary.join(" AND "));
            if !combined.is_empty() {
                sql.push_str(&format!(" AND ({})", combined));
            }
            sql
        } else if combined.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", combined)
        }
    }

    /// The select list.
    pub fn select_sql(&mut self) -> String {
        match self.search.select.clone() {
            Some(Selection::Text(query, args)) => self.expand(&query, &args),
            Some(Selection::Columns(columns)) => columns
                .iter()
                .map(|c| self.quote_if_possible(c))
                .collect::<Vec<_>>()
                .join(", "),
            None => {
                let table = self.quoted_table_name();
                if !self.search.omits.is_empty() {
                    if let Some(desc) = &self.descriptor {
                        return desc
                            .columns()
                            .filter(|f| {
                                !self
                                    .search
                                    .omits
                                    .iter()
                                    .any(|o| *o == f.name || *o == f.column)
                            })
                            .map(|f| format!("{}.{}", table, self.quote(&f.column)))
                            .collect::<Vec<_>>()
                            .join(", ");
                    }
                }
                if self.search.join_conditions.is_empty() {
                    "*".to_string()
                } else {
                    format!("{}.*", table)
                }
            }
        }
    }

    fn joins_sql(&mut self) -> String {
        let joins = self.search.join_conditions.clone();
        let mut parts = Vec::with_capacity(joins.len());
        for clause in &joins {
            match &clause.condition {
                Condition::Text(text) => parts.push(self.expand(text, &clause.args)),
                Condition::Expr(e) => parts.push(self.expand(e.sql(), e.args())),
                _ => {}
            }
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" {}", parts.join(" "))
        }
    }

    fn group_sql(&self) -> String {
        if self.search.group.is_empty() {
            String::new()
        } else {
            format!(" GROUP BY {}", self.search.group)
        }
    }

    fn having_sql(&mut self) -> String {
        let havings = self.search.having_conditions.clone();
        let parts = self.render_clauses(&havings, true);
        if parts.is_empty() {
            String::new()
        } else {
            format!(" HAVING {}", parts.join(" AND "))
        }
    }

    fn order_sql(&mut self) -> String {
        if self.search.orders.is_empty() || self.search.ignore_order_query {
            return String::new();
        }
        let orders = self.search.orders.clone();
        let parts: Vec<String> = orders
            .iter()
            .map(|order| match order {
                Order::Text(text) => self.quote_if_possible(text.trim()),
                Order::Expr(e) => self.expand(e.sql(), e.args()),
            })
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    }

    fn limit_and_offset_sql(&self) -> String {
        self.dialect()
            .limit_and_offset_sql(self.search.limit, self.search.offset)
    }

    /// Joins, WHERE, GROUP BY, HAVING, ORDER BY and LIMIT/OFFSET, in that order.
    pub fn combined_conditions_sql(&mut self) -> String {
        let joins = self.joins_sql();
        let where_sql = self.where_sql();
        let group = self.group_sql();
        let having = self.having_sql();
        let order = self.order_sql();
        let limit = self.limit_and_offset_sql();
        let sql = format!("{}{}{}{}{}{}", joins, where_sql, group, having, order, limit);
        if self.search.raw {
            sql.trim_start().to_string()
        } else {
            sql
        }
    }

    /// Build the SELECT statement for the current search.
    pub fn prepare_query_sql(&mut self) -> &mut Self {
        self.reset_statement();
        self.sql = if self.search.raw {
            self.combined_conditions_sql()
        } else {
            let select = self.select_sql();
            let table = self.quoted_table_name();
            let rest = self.combined_conditions_sql();
            format!("SELECT {} FROM {}{}", select, table, rest)
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockExecutor, User, mock_session};
    use sqlchain_core::Model;
    use sqlchain_query::expr;

    fn built(session: &Session) -> (String, Vec<Value>) {
        let mut scope = Scope::new(session, ScopeTarget::Schema(User::schema()));
        scope.prepare_query_sql();
        (scope.sql().to_string(), scope.sql_vars().to_vec())
    }

    #[test]
    fn top_level_or_detection() {
        assert!(has_top_level_or("a = 1 OR b = 2"));
        assert!(has_top_level_or("a = 1 or b = 2"));
        assert!(!has_top_level_or("(a = 1 OR b = 2)"));
        assert!(!has_top_level_or("name = ' OR '"));
        assert!(!has_top_level_or("color = 'red'"));
    }

    #[test]
    fn anded_where_conditions() {
        let (db, _) = mock_session(MockExecutor::new());
        let chained = db.filter("a = ?", 1).filter("b = ?", 2);
        let (sql, vars) = built(&chained);
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE a = ? AND b = ?"#);
        assert_eq!(vars, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn or_and_not_precedence() {
        let (db, _) = mock_session(MockExecutor::new());
        let s = db
            .filter("age > ?", 18)
            .not("name = ?", "admin")
            .or("role = ? OR role = ?", ("a", "b"));
        let (sql, vars) = built(&s);
        assert_eq!(
            sql,
            r#"SELECT * FROM "users" WHERE age > ? AND NOT (name = ?) OR (role = ? OR role = ?)"#
        );
        assert_eq!(vars.len(), 4);
        assert_eq!(vars[1], Value::from("admin"));
    }

    #[test]
    fn not_on_bare_column() {
        let (db, _) = mock_session(MockExecutor::new());
        let (sql, vars) = built(&db.not("name", vec!["a", "b"]));
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE "users"."name" NOT IN (?,?)"#);
        assert_eq!(vars.len(), 2);

        let (sql, _) = built(&db.not("name", "a"));
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE "users"."name" <> ?"#);
    }

    #[test]
    fn key_and_map_conditions() {
        let (db, _) = mock_session(MockExecutor::new());
        let (sql, vars) = built(&db.filter(7_i64, ()));
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE "users"."id" = ?"#);
        assert_eq!(vars, vec![Value::BigInt(7)]);

        let (sql, _) = built(&db.filter(vec![1_i64, 2, 3], ()));
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE "users"."id" IN (?,?,?)"#);

        let (sql, _) = built(&db.filter("10", ()));
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE "users"."id" = ?"#);

        let cond = Condition::map([("name", Value::from("x")), ("age", Value::Null)]);
        let (sql, vars) = built(&db.filter(cond, ()));
        assert_eq!(
            sql,
            r#"SELECT * FROM "users" WHERE "users"."age" IS NULL AND "users"."name" = ?"#
        );
        assert_eq!(vars, vec![Value::from("x")]);
    }

    #[test]
    fn record_condition_uses_non_blank_fields() {
        let (db, _) = mock_session(MockExecutor::new());
        let sample = User {
            name: "jinzhu".into(),
            ..User::default()
        };
        let (sql, vars) = built(&db.filter(Condition::record(&sample), ()));
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE "users"."name" = ?"#);
        assert_eq!(vars, vec![Value::from("jinzhu")]);
    }

    #[test]
    fn order_limit_offset() {
        let (db, _) = mock_session(MockExecutor::new());
        let (sql, _) = built(&db.order("name").order("age desc").limit(10).offset(5));
        assert_eq!(
            sql,
            r#"SELECT * FROM "users" ORDER BY "name", age desc LIMIT 10 OFFSET 5"#
        );

        let (sql, _) = built(&db.order("name").reorder("id"));
        assert_eq!(sql, r#"SELECT * FROM "users" ORDER BY "id""#);

        let (sql, _) = built(&db.limit(3).limit(-1));
        assert_eq!(sql, r#"SELECT * FROM "users""#);
    }

    #[test]
    fn select_group_having_joins() {
        let (db, _) = mock_session(MockExecutor::new());
        let s = db
            .select("name, sum(age) AS total", ())
            .joins("JOIN emails ON emails.user_id = users.id AND emails.kind = ?", "work")
            .group("name")
            .having("sum(age) > ?", 10);
        let (sql, vars) = built(&s);
        assert_eq!(
            sql,
            r#"SELECT name, sum(age) AS total FROM "users" JOIN emails ON emails.user_id = users.id AND emails.kind = ? GROUP BY name HAVING sum(age) > ?"#
        );
        assert_eq!(vars, vec![Value::from("work"), Value::Int(10)]);

        let (sql, _) = built(&db.joins("JOIN emails ON emails.user_id = users.id", ()));
        assert!(sql.starts_with(r#"SELECT "users".* FROM"#));
    }

    #[test]
    fn omit_lists_remaining_columns() {
        let (db, _) = mock_session(MockExecutor::new());
        let (sql, _) = built(&db.omit(["age"]));
        assert_eq!(sql, r#"SELECT "users"."id", "users"."name" FROM "users""#);
    }

    #[test]
    fn table_override_with_alias_is_verbatim() {
        let (db, _) = mock_session(MockExecutor::new());
        let (sql, _) = built(&db.table("users u"));
        assert_eq!(sql, "SELECT * FROM users u");
        let (sql, _) = built(&db.table("archive.users"));
        assert_eq!(sql, r#"SELECT * FROM "archive"."users""#);
    }

    #[test]
    fn bound_primary_key_leads_where() {
        let (db, _) = mock_session(MockExecutor::new());
        let mut user = User {
            id: 4,
            ..User::default()
        };
        let session = db.filter("name = ? OR age = ?", ("a", 3));
        let mut scope = Scope::new(&session, ScopeTarget::Value(&mut user));
        scope.prepare_query_sql();
        assert_eq!(
            scope.sql(),
            r#"SELECT * FROM "users" WHERE "users"."id" = ? AND ((name = ? OR age = ?))"#
        );
        assert_eq!(scope.sql_vars()[0], Value::BigInt(4));
    }

    #[test]
    fn subquery_arguments_follow_placeholder_order() {
        let (db, _) = mock_session(MockExecutor::new());
        let inner = expr("SELECT user_id FROM emails WHERE kind = ?", "work");
        let s = db
            .filter("age > ?", 1)
            .filter("id IN (?)", inner)
            .filter("name = ?", "x");
        let (sql, vars) = built(&s);
        assert_eq!(
            sql,
            r#"SELECT * FROM "users" WHERE age > ? AND id IN (SELECT user_id FROM emails WHERE kind = ?) AND name = ?"#
        );
        assert_eq!(
            vars,
            vec![Value::Int(1), Value::from("work"), Value::from("x")]
        );
    }

    #[test]
    fn raw_mode_skips_select_prefix() {
        let (db, _) = mock_session(MockExecutor::new());
        let (sql, vars) = built(&db.raw("SELECT name FROM users WHERE id = ?", 3));
        assert_eq!(sql, "SELECT name FROM users WHERE id = ?");
        assert_eq!(vars, vec![Value::Int(3)]);
    }
}
