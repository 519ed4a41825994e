//! The chainable session handle.
//!
//! A [`Session`] is a value: every chained call (`filter`, `order`,
//! `limit`, `model`, ...) clones the receiver, applies one change to the
//! clone and returns it. The receiver is never modified, so one root
//! session can be shared freely as a template.
//!
//! Terminal calls (`first`, `find`, `create`, `update`, `delete`, ...)
//! build a [`Scope`], run the matching callback pipeline and return a
//! session carrying the outcome: the error slot and rows affected.
//! Chaining after an error keeps working; callbacks skip their work while
//! an error is present, so the error can be checked once at the end.

use crate::callback::{Callbacks, Operation};
use crate::callbacks::{ORDER_BY_PRIMARY_KEY, UPDATE_COLUMN};
use crate::scope::{Finished, Scope, ScopeTarget};
use crate::settings::Settings;
use sqlchain_core::{
    Dialect, Error, Executor, FromValue, IsolationLevel, LogMode, LogRecord, Logger, Model,
    ModelSchema, NamingPolicy, Record, Result, Row, Target, TracingLogger, Value,
    dispatch_async, new_dialect, set_naming_policy,
};
use sqlchain_query::{
    Arg, Clause, Condition, Expr, IntoArgs, Order, Search, expand_placeholders,
};
use std::any::Any;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

/// A database handle carrying one chain's accumulated state.
pub struct Session {
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) dialect: Arc<dyn Dialect>,
    pub(crate) callbacks: Arc<Callbacks>,
    pub(crate) settings: Settings,
    pub(crate) search: Search,
    pub(crate) value: Option<Arc<dyn Target>>,
    pub(crate) error: Option<Error>,
    rows_affected: u64,
    log_mode: LogMode,
    logger: Arc<dyn Logger>,
    pub(crate) block_global_update: bool,
    /// The template this session was cloned from; `None` on a root.
    parent: Option<Arc<Session>>,
}

impl Clone for Session {
    /// Every clone points at the root template, so chains never nest.
    fn clone(&self) -> Self {
        let parent = match &self.parent {
            Some(parent) => Arc::clone(parent),
            None => Arc::new(self.copy_with_parent(None)),
        };
        self.copy_with_parent(Some(parent))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.dialect.name())
            .field("in_transaction", &self.executor.is_transaction())
            .field("search", &self.search)
            .field("value", &self.value.as_ref().map(|v| v.target_schema().name))
            .field("error", &self.error)
            .field("rows_affected", &self.rows_affected)
            .field("log_mode", &self.log_mode)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A root session with the default callbacks.
    pub fn new(executor: Arc<dyn Executor>, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            executor,
            dialect,
            callbacks: Arc::new(Callbacks::default()),
            settings: Settings::new(),
            search: Search::new(),
            value: None,
            error: None,
            rows_affected: 0,
            log_mode: LogMode::default(),
            logger: Arc::new(TracingLogger),
            block_global_update: false,
            parent: None,
        }
    }

    fn copy_with_parent(&self, parent: Option<Arc<Session>>) -> Session {
        Session {
            executor: Arc::clone(&self.executor),
            dialect: Arc::clone(&self.dialect),
            callbacks: Arc::clone(&self.callbacks),
            settings: self.settings.clone(),
            search: self.search.clone(),
            value: self.value.clone(),
            error: self.error.clone(),
            rows_affected: self.rows_affected,
            log_mode: self.log_mode,
            logger: Arc::clone(&self.logger),
            block_global_update: self.block_global_update,
            parent,
        }
    }

    /// The session this one was cloned from, or `None` for a root.
    pub fn parent(&self) -> Option<&Session> {
        self.parent.as_deref()
    }

    /// Resolve `dialect_name` and check that the executor answers.
    pub fn open(dialect_name: &str, executor: Arc<dyn Executor>) -> Result<Self> {
        executor.ping()?;
        let dialect = new_dialect(dialect_name);
        tracing::debug!(dialect = dialect.name(), "Opened session");
        Ok(Self::new(executor, dialect))
    }

    pub(crate) fn chain(&self, f: impl FnOnce(&mut Session)) -> Session {
        let mut clone = self.clone();
        f(&mut clone);
        clone
    }

    // ========================================================================
    // Chainable calls
    // ========================================================================

    /// Add a condition; repeated calls are AND-ed.
    pub fn filter(&self, condition: impl Into<Condition>, args: impl IntoArgs) -> Session {
        self.chain(|s| {
            s.search.filter(condition, args);
        })
    }

    pub fn or(&self, condition: impl Into<Condition>, args: impl IntoArgs) -> Session {
        self.chain(|s| {
            s.search.or(condition, args);
        })
    }

    pub fn not(&self, condition: impl Into<Condition>, args: impl IntoArgs) -> Session {
        self.chain(|s| {
            s.search.not(condition, args);
        })
    }

    pub fn having(&self, condition: impl Into<Condition>, args: impl IntoArgs) -> Session {
        self.chain(|s| {
            s.search.having(condition, args);
        })
    }

    pub fn joins(&self, sql: impl Into<String>, args: impl IntoArgs) -> Session {
        self.chain(|s| {
            s.search.joins(sql, args);
        })
    }

    pub fn order(&self, value: impl Into<Order>) -> Session {
        self.chain(|s| {
            s.search.order(value, false);
        })
    }

    /// Replace every ORDER BY term with `value`.
    pub fn reorder(&self, value: impl Into<Order>) -> Session {
        self.chain(|s| {
            s.search.order(value, true);
        })
    }

    /// `-1` removes the limit.
    pub fn limit(&self, limit: i64) -> Session {
        self.chain(|s| {
            s.search.limit(limit);
        })
    }

    /// `-1` removes the offset.
    pub fn offset(&self, offset: i64) -> Session {
        self.chain(|s| {
            s.search.offset(offset);
        })
    }

    pub fn select(&self, query: impl Into<String>, args: impl IntoArgs) -> Session {
        self.chain(|s| {
            s.search.select(query, args);
        })
    }

    /// Select plain columns; they also restrict which columns are written.
    pub fn select_columns<I, S>(&self, columns: I) -> Session
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chain(|s| {
            s.search.select_columns(columns);
        })
    }

    /// Leave columns out of selects and writes.
    pub fn omit<I, S>(&self, columns: I) -> Session
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chain(|s| {
            s.search.omit(columns);
        })
    }

    /// Set GROUP BY. Only identifiers and column numbers are accepted;
    /// anything else records an invalid-SQL error.
    #[track_caller]
    pub fn group(&self, group: &str) -> Session {
        let mut clone = self.clone();
        if let Err(e) = clone.search.group(group) {
            clone.add_error(e);
        }
        clone
    }

    pub fn table(&self, name: impl Into<String>) -> Session {
        self.chain(|s| {
            s.search.table(name);
        })
    }

    /// Bind a value; operations without an explicit target use it.
    pub fn model<T: Target + ?Sized>(&self, value: &T) -> Session {
        let bound: Arc<dyn Target> = Arc::from(value.clone_target());
        self.chain(|s| s.value = Some(bound))
    }

    /// Use `sql` as the whole statement of the next query.
    pub fn raw(&self, sql: impl Into<String>, args: impl IntoArgs) -> Session {
        let sql: String = sql.into();
        self.chain(|s| {
            s.search.set_raw(true).filter(sql, args);
        })
    }

    /// Stop filtering soft-deleted rows and hard-delete instead.
    pub fn unscoped(&self) -> Session {
        self.chain(|s| {
            s.search.unscoped();
        })
    }

    /// Load a relation after the main query.
    pub fn preload(&self, path: impl Into<String>) -> Session {
        self.chain(|s| {
            s.search.preload(path, Vec::new());
        })
    }

    /// Load a relation after the main query, restricted by a condition.
    pub fn preload_where(
        &self,
        path: impl Into<String>,
        condition: impl Into<Condition>,
        args: impl IntoArgs,
    ) -> Session {
        let clause = Clause::new(condition, args);
        self.chain(|s| {
            s.search.preload(path, vec![clause]);
        })
    }

    /// Attributes applied by `first_or_init`/`first_or_create` when nothing matches.
    pub fn attrs(&self, attrs: impl Into<Condition>) -> Session {
        self.chain(|s| {
            s.search.attrs(attrs, ());
        })
    }

    /// Attributes applied by `first_or_init`/`first_or_create` in every case.
    pub fn assign(&self, attrs: impl Into<Condition>) -> Session {
        self.chain(|s| {
            s.search.assign(attrs, ());
        })
    }

    /// Apply reusable chain fragments in order.
    pub fn scopes(&self, funcs: &[&dyn Fn(Session) -> Session]) -> Session {
        funcs.iter().fold(self.clone(), |s, f| f(s))
    }

    /// A clone carrying an extra setting.
    pub fn set<T: Any + Send + Sync>(&self, name: &str, value: T) -> Session {
        self.chain(|s| s.settings.set(name, value))
    }

    /// A clone that logs every statement.
    pub fn debug(&self) -> Session {
        self.log_mode(LogMode::Verbose)
    }

    pub fn log_mode(&self, mode: LogMode) -> Session {
        self.chain(|s| s.log_mode = mode)
    }

    /// A clone that refuses updates and deletes without conditions.
    pub fn block_global_update(&self, enable: bool) -> Session {
        self.chain(|s| s.block_global_update = enable)
    }

    /// A clone with a fresh search and no bound value.
    pub fn new_session(&self) -> Session {
        self.chain(|s| {
            s.search = Search::new();
            s.value = None;
        })
    }

    pub(crate) fn nested(&self, executor: Arc<dyn Executor>) -> Session {
        let mut s = self.new_session();
        s.executor = executor;
        s.error = None;
        s.rows_affected = 0;
        s
    }

    /// A clone running on a new transaction.
    #[track_caller]
    pub fn begin(&self) -> Session {
        self.begin_with(None)
    }

    #[track_caller]
    pub fn begin_with(&self, isolation: Option<IsolationLevel>) -> Session {
        let mut clone = self.clone();
        match self.executor.begin(isolation) {
            Ok(tx) => clone.executor = tx,
            Err(e) => {
                clone.add_error(e);
            }
        }
        clone
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = logger;
    }

    /// Switch the process-wide table naming policy. Cached descriptors are
    /// rebuilt under the new policy.
    pub fn singular_table(&self, enable: bool) {
        set_naming_policy(NamingPolicy { singular: enable });
    }

    /// Store a setting on this session in place.
    pub fn instant_set<T: Any + Send + Sync>(&mut self, name: &str, value: T) -> &mut Self {
        self.settings.set(name, value);
        self
    }

    pub fn get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.settings.get::<T>(name)
    }

    /// This session's pipelines, copied first if they are shared.
    pub fn callback(&mut self) -> &mut Callbacks {
        Arc::make_mut(&mut self.callbacks)
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    // ========================================================================
    // Outcome
    // ========================================================================

    /// Record an error, aggregating it with any earlier one. The not-found
    /// sentinel is never aggregated: it replaces whatever was stored.
    #[track_caller]
    pub fn add_error(&mut self, err: Error) -> &mut Self {
        if matches!(err, Error::RecordNotFound) {
            self.error = Some(err);
            return self;
        }
        if !err.is_record_not_found() {
            self.log_error(&err, Location::caller());
        }
        self.error = Some(match self.error.take() {
            Some(existing) => existing.merge(err),
            None => err,
        });
        self
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The recorded error, as a `Result`.
    pub fn result(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Every recorded error, flattened.
    pub fn get_errors(&self) -> Vec<Error> {
        self.error.clone().map(Error::into_errors).unwrap_or_default()
    }

    pub fn record_not_found(&self) -> bool {
        self.error.as_ref().is_some_and(Error::is_record_not_found)
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// The bound value, if it is a single `M`.
    pub fn value_as<M: Model>(&self) -> Option<&M> {
        let value = self.value.as_deref()?;
        if value.is_collection() {
            return None;
        }
        let records = value.records();
        let first: &dyn Record = *records.first()?;
        first.as_any().downcast_ref::<M>()
    }

    /// Is the primary key of `value` blank?
    pub fn new_record(&self, value: &dyn Record) -> bool {
        let desc = value.record_schema().describe();
        desc.primary_field()
            .and_then(|pk| value.field_value(&pk.name))
            .is_none_or(|v| v.is_blank())
    }

    fn log_error(&self, err: &Error, location: &'static Location<'static>) {
        let record = LogRecord::error(err, Some(location));
        match self.log_mode {
            LogMode::Off => {}
            LogMode::Verbose => self.logger.print(&record),
            LogMode::ErrorsOnly => {
                dispatch_async(Arc::clone(&self.logger), record);
            }
        }
    }

    pub(crate) fn log_sql(&self, sql: &str, vars: &[Value], duration: Duration, rows: u64) {
        if self.log_mode == LogMode::Verbose {
            self.logger
                .print(&LogRecord::sql(sql, vars, duration, rows));
        }
    }

    // ========================================================================
    // Pipeline plumbing
    // ========================================================================

    fn bound_value(&self) -> Option<Box<dyn Target>> {
        self.value.as_ref().map(|v| v.clone_target())
    }

    #[track_caller]
    fn apply(&self, finished: Finished) -> Session {
        let mut out = self.clone();
        out.rows_affected = finished.rows_affected;
        if let Some(err) = finished.error {
            let unchanged = self
                .error
                .as_ref()
                .is_some_and(|prior| prior.to_string() == err.to_string());
            if !unchanged {
                out.error = None;
                out.add_error(err);
            }
        }
        out
    }

    #[track_caller]
    pub(crate) fn process(&self, operation: Operation, mut scope: Scope<'_>) -> (Session, Vec<Row>) {
        let callbacks = Arc::clone(&self.callbacks);
        callbacks.pipeline(operation).run(&mut scope);
        let mut finished = scope.finish();
        let rows = std::mem::take(&mut finished.rows);
        (self.apply(finished), rows)
    }

    /// Run `operation` with the bound value as target; the result carries
    /// the value as the callbacks left it.
    #[track_caller]
    fn process_bound(
        &self,
        operation: Operation,
        configure: impl FnOnce(&mut Scope<'_>),
    ) -> (Session, Vec<Row>) {
        let mut bound = self.bound_value();
        let target = match bound.as_deref_mut() {
            Some(value) => ScopeTarget::Value(value),
            None => ScopeTarget::Empty,
        };
        let mut scope = Scope::new(self, target);
        configure(&mut scope);
        let (mut out, rows) = self.process(operation, scope);
        out.value = bound.map(Arc::from);
        (out, rows)
    }

    #[track_caller]
    fn query_into(&self, out: &mut dyn Target, configure: impl FnOnce(&mut Scope<'_>)) -> Session {
        let mut scope = Scope::new(self, ScopeTarget::Value(out));
        configure(&mut scope);
        self.process(Operation::Query, scope).0
    }

    /// Save one record reached through another, inserting when its
    /// primary key is blank.
    pub(crate) fn save_record(&self, record: &mut dyn Record) -> Result<u64> {
        let operation = if self.new_record(record) {
            Operation::Create
        } else {
            Operation::Update
        };
        let scope = Scope::new(self, ScopeTarget::Record(record));
        let (out, _) = self.process(operation, scope);
        out.result().map(|()| out.rows_affected)
    }

    /// Rows of a query whose table and columns come from `schema`.
    pub(crate) fn schema_rows(&self, schema: &'static ModelSchema) -> Result<Vec<Row>> {
        let scope = Scope::new(self, ScopeTarget::Schema(schema));
        let (out, rows) = self.process(Operation::RowQuery, scope);
        out.result().map(|()| rows)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// First record by primary key.
    #[track_caller]
    pub fn first<T: Target>(&self, out: &mut T) -> Session {
        self.query_into(out, |scope| {
            scope.search.limit(1);
            scope.instance_set(ORDER_BY_PRIMARY_KEY, "ASC");
        })
    }

    #[track_caller]
    pub fn first_where<T: Target>(
        &self,
        out: &mut T,
        condition: impl Into<Condition>,
        args: impl IntoArgs,
    ) -> Session {
        self.filter(condition, args).first(out)
    }

    /// Last record by primary key.
    #[track_caller]
    pub fn last<T: Target>(&self, out: &mut T) -> Session {
        self.query_into(out, |scope| {
            scope.search.limit(1);
            scope.instance_set(ORDER_BY_PRIMARY_KEY, "DESC");
        })
    }

    #[track_caller]
    pub fn last_where<T: Target>(
        &self,
        out: &mut T,
        condition: impl Into<Condition>,
        args: impl IntoArgs,
    ) -> Session {
        self.filter(condition, args).last(out)
    }

    /// One record, in no particular order.
    #[track_caller]
    pub fn take<T: Target>(&self, out: &mut T) -> Session {
        self.query_into(out, |scope| {
            scope.search.limit(1);
        })
    }

    /// Every matching record. A list target with no rows is not an error.
    #[track_caller]
    pub fn find<T: Target>(&self, out: &mut T) -> Session {
        self.query_into(out, |_| {})
    }

    #[track_caller]
    pub fn find_where<T: Target>(
        &self,
        out: &mut T,
        condition: impl Into<Condition>,
        args: impl IntoArgs,
    ) -> Session {
        self.filter(condition, args).find(out)
    }

    /// Query the bound model's table (or `table`) and decode into `dest`.
    #[track_caller]
    pub fn scan<T: Target>(&self, dest: &mut T) -> Session {
        let mut bound = self.bound_value();
        let target = match bound.as_deref_mut() {
            Some(value) => ScopeTarget::Value(value),
            None if self.search.table_name.is_empty() => ScopeTarget::Schema(dest.target_schema()),
            None => ScopeTarget::Empty,
        };
        let scope = Scope::new(self, target).with_destination(dest);
        self.process(Operation::Query, scope).0
    }

    /// Raw rows of the current query.
    #[track_caller]
    pub fn rows(&self) -> Result<Vec<Row>> {
        let (out, rows) = self.process_bound(Operation::RowQuery, |_| {});
        out.result().map(|()| rows)
    }

    /// Decode rows fetched with [`Session::rows`] into `out`. No callbacks
    /// or hooks run.
    #[track_caller]
    pub fn scan_rows<T: Target>(&self, rows: &[Row], out: &mut T) -> Result<()> {
        match out.load_rows(rows) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.clone().add_error(e.clone());
                Err(e)
            }
        }
    }

    /// The first raw row of the current query.
    #[track_caller]
    pub fn row(&self) -> Result<Option<Row>> {
        Ok(self.rows()?.into_iter().next())
    }

    /// One column of every matching row.
    #[track_caller]
    pub fn pluck<V: FromValue>(&self, column: &str) -> Result<Vec<V>> {
        let column = column.to_string();
        let (out, rows) = self.process_bound(Operation::RowQuery, |scope| {
            scope.search.select(column, ());
        });
        out.result()?;
        rows.iter().map(|row| row.get_as::<V>(0)).collect()
    }

    /// Number of matching rows. Order, limit and offset are ignored; a
    /// grouped query counts its groups.
    #[track_caller]
    pub fn count(&self) -> Result<i64> {
        self.count_for(None)
    }

    #[track_caller]
    pub(crate) fn count_for(&self, schema: Option<&'static ModelSchema>) -> Result<i64> {
        let rows = if self.search.group.is_empty() {
            let mut bound = self.bound_value();
            let target = match (bound.as_deref_mut(), schema) {
                (Some(value), _) => ScopeTarget::Value(value),
                (None, Some(schema)) => ScopeTarget::Schema(schema),
                (None, None) => ScopeTarget::Empty,
            };
            let mut scope = Scope::new(self, target);
            scope.search.select("count(*)", ());
            scope.search.limit(-1).offset(-1);
            scope.search.ignore_order_query = true;
            let (out, rows) = self.process(Operation::RowQuery, scope);
            out.result()?;
            rows
        } else {
            let mut inner = self.reorder("").limit(-1).offset(-1);
            if inner.search.select.is_none() {
                inner.search.select(self.search.group.clone(), ());
            }
            let grouped = inner.query_expr();
            self.new_session()
                .raw("SELECT count(*) FROM (?) AS count_table", grouped)
                .rows()?
        };
        match rows.first() {
            Some(row) => row.get_as::<i64>(0),
            None => Ok(0),
        }
    }

    /// Load the first match into `out`, or fill `out` from the equality
    /// conditions and `attrs` when there is none. `assign` attributes are
    /// applied in both cases.
    #[track_caller]
    pub fn first_or_init<T: Target>(&self, out: &mut T) -> Session {
        let found = self.first(out);
        if let Some(err) = found.error() {
            if !err.is_record_not_found() {
                return found;
            }
            let mut result = self.clone();
            if let Err(e) = self.initialize(out) {
                result.add_error(e);
            }
            return result;
        }
        let mut result = found;
        if let Err(e) = assign_clauses(out, &self.search.assign_attrs) {
            result.add_error(e);
        }
        result
    }

    /// Like `first_or_init`, but creates the record when nothing matches
    /// and writes `assign` attributes to a found record.
    #[track_caller]
    pub fn first_or_create<T: Target>(&self, out: &mut T) -> Session {
        let found = self.first(out);
        if let Some(err) = found.error() {
            if !err.is_record_not_found() {
                return found;
            }
            if let Err(e) = self.initialize(out) {
                let mut result = self.clone();
                result.add_error(e);
                return result;
            }
            return self.new_session().create(out);
        }
        if self.search.assign_attrs.is_empty() {
            return found;
        }
        let pairs = clause_pairs(&self.search.assign_attrs);
        let mut scope = Scope::new(self, ScopeTarget::Value(out));
        scope.search = Search::new();
        scope.update_interface = Some(Condition::Map(pairs));
        self.process(Operation::Update, scope).0
    }

    fn initialize(&self, out: &mut dyn Target) -> Result<()> {
        let equalities: Vec<Clause> = self
            .search
            .where_conditions
            .iter()
            .filter(|c| matches!(c.condition, Condition::Map(_) | Condition::Record(_)))
            .cloned()
            .collect();
        assign_clauses(out, &equalities)?;
        assign_clauses(out, &self.search.init_attrs)?;
        assign_clauses(out, &self.search.assign_attrs)
    }

    /// The current query as an expression, without running it.
    pub fn query_expr(&self) -> Expr {
        let mut bound = self.bound_value();
        let target = match bound.as_deref_mut() {
            Some(value) => ScopeTarget::Value(value),
            None => ScopeTarget::Empty,
        };
        let mut scope = Scope::new(self, target);
        scope.prepare_query_sql();
        let args: Vec<Arg> = scope.sql_vars().iter().cloned().map(Arg::Value).collect();
        Expr::new(scope.sql().to_string(), args)
    }

    /// The current query as a parenthesized expression, for use inside
    /// another condition.
    pub fn sub_query(&self) -> Expr {
        self.query_expr().parenthesized()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert `value`, or update every column when its primary key is set.
    /// An update that matches no row is reported through `rows_affected`.
    #[track_caller]
    pub fn save<T: Target>(&self, value: &mut T) -> Session {
        let create = value.is_collection()
            || value
                .records()
                .first()
                .is_none_or(|r| self.new_record(*r));
        if create {
            return self.create(value);
        }
        let scope = Scope::new(self, ScopeTarget::Value(value));
        self.process(Operation::Update, scope).0
    }

    #[track_caller]
    pub fn create<T: Target>(&self, value: &mut T) -> Session {
        let scope = Scope::new(self, ScopeTarget::Value(value));
        self.process(Operation::Create, scope).0
    }

    /// Write one column of the bound value (or of every matching row),
    /// running hooks and stamping `updated_at`.
    #[track_caller]
    pub fn update(&self, column: &str, value: impl Into<Value>) -> Session {
        self.updates(Condition::Map(vec![(column.to_string(), value.into())]))
    }

    /// Write several columns. Only attributes that differ from the bound
    /// value are written; when none differ nothing is sent.
    #[track_caller]
    pub fn updates(&self, attrs: impl Into<Condition>) -> Session {
        let attrs = attrs.into();
        self.process_bound(Operation::Update, |scope| {
            scope.update_interface = Some(attrs);
        })
        .0
    }

    /// `update` without hooks or timestamps.
    #[track_caller]
    pub fn update_column(&self, column: &str, value: impl Into<Value>) -> Session {
        self.update_columns(Condition::Map(vec![(column.to_string(), value.into())]))
    }

    /// `updates` without hooks or timestamps.
    #[track_caller]
    pub fn update_columns(&self, attrs: impl Into<Condition>) -> Session {
        let attrs = attrs.into();
        self.process_bound(Operation::Update, |scope| {
            scope.update_interface = Some(attrs);
            scope.instance_set(UPDATE_COLUMN, true);
        })
        .0
    }

    /// Delete `value` (by primary key) and whatever the conditions match.
    /// Models with a `deleted_at` column are soft-deleted unless unscoped.
    #[track_caller]
    pub fn delete<T: Target>(&self, value: &mut T) -> Session {
        let scope = Scope::new(self, ScopeTarget::Value(value));
        self.process(Operation::Delete, scope).0
    }

    #[track_caller]
    pub fn delete_where<T: Target>(
        &self,
        value: &mut T,
        condition: impl Into<Condition>,
        args: impl IntoArgs,
    ) -> Session {
        self.filter(condition, args).delete(value)
    }

    /// Run raw SQL. One pair of parentheses around the whole statement is
    /// stripped.
    #[track_caller]
    pub fn exec(&self, sql: &str, args: impl IntoArgs) -> Session {
        let args = args.into_args();
        let mut vars = Vec::new();
        let mut scope = Scope::new(self, ScopeTarget::Empty);
        match expand_placeholders(strip_outer_parens(sql), &args, &mut vars) {
            Ok(expanded) => {
                scope.set_statement(expanded, vars);
                scope.exec();
            }
            Err(e) => scope.add_error(e),
        }
        self.apply(scope.finish())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    #[track_caller]
    pub fn commit(&self) -> Session {
        let mut out = self.clone();
        if !self.executor.is_transaction() {
            out.add_error(Error::InvalidTransaction);
        } else if let Err(e) = self.executor.commit() {
            out.add_error(e);
        }
        out
    }

    #[track_caller]
    pub fn rollback(&self) -> Session {
        let mut out = self.clone();
        if !self.executor.is_transaction() {
            out.add_error(Error::InvalidTransaction);
        } else if let Err(e) = self.executor.rollback() {
            out.add_error(e);
        }
        out
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back and return the
    /// error on `Err`.
    pub fn transaction<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Session) -> Result<()>,
    {
        self.transaction_with(None, f)
    }

    pub fn transaction_with<F>(&self, isolation: Option<IsolationLevel>, f: F) -> Result<()>
    where
        F: FnOnce(&Session) -> Result<()>,
    {
        let tx = self.begin_with(isolation);
        tx.result()?;
        match f(&tx) {
            Ok(()) => tx.commit().result(),
            Err(e) => {
                if let Err(rollback) = tx.rollback().result() {
                    tracing::warn!(error = %rollback, "Rollback failed after transaction error");
                }
                Err(e)
            }
        }
    }
}

/// `(SELECT 1)` -> `SELECT 1`, but `(a) UNION (b)` is left alone.
fn strip_outer_parens(sql: &str) -> &str {
    let trimmed = sql.trim();
    if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
        return trimmed;
    }
    let mut depth = 0_i32;
    for (i, c) in trimmed.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != trimmed.len() - 1 {
                    return trimmed;
                }
            }
            _ => {}
        }
    }
    &trimmed[1..trimmed.len() - 1]
}

/// Field/value pairs of map and record clauses, in clause order.
fn clause_pairs(clauses: &[Clause]) -> Vec<(String, Value)> {
    let mut pairs = Vec::new();
    for clause in clauses {
        match &clause.condition {
            Condition::Map(entries) => pairs.extend(entries.iter().cloned()),
            Condition::Record(record) => {
                let desc = record.record_schema().describe();
                for field in desc.columns() {
                    if let Some(v) = record.field_value(&field.name).filter(|v| !v.is_blank()) {
                        pairs.push((field.name.clone(), v));
                    }
                }
            }
            _ => {}
        }
    }
    pairs
}

/// Write map/record attributes onto every record of `target`. Keys may be
/// field or column names; unknown keys are ignored.
fn assign_clauses(target: &mut dyn Target, clauses: &[Clause]) -> Result<()> {
    let pairs = clause_pairs(clauses);
    if pairs.is_empty() {
        return Ok(());
    }
    let desc = target.target_schema().describe();
    for record in target.records_mut() {
        for (key, value) in &pairs {
            if let Some(field) = desc.field(key).filter(|f| f.is_normal()) {
                record.set_field_value(&field.name, value.clone())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Article, MockExecutor, User, mock_session, user_row};
    use sqlchain_core::CommonDialect;

    #[test]
    fn chained_calls_leave_source_untouched() {
        let (db, _) = mock_session(MockExecutor::new());
        let chained = db.filter("a = ?", 1).filter("b = ?", 2).order("id").limit(3);

        assert!(!db.search().has_conditions());
        assert!(db.search().orders.is_empty());
        assert_eq!(db.search().limit, -1);
        assert_eq!(db.search().offset, -1);
        assert_eq!(chained.search().where_conditions.len(), 2);

        let sibling = db.filter("c = ?", 3);
        assert_eq!(sibling.search().where_conditions.len(), 1);
        assert_eq!(chained.search().where_conditions.len(), 2);
    }

    #[test]
    fn where_arguments_reach_the_executor_in_order() {
        let exec = MockExecutor::new();
        let (db, state) = mock_session(exec);
        let mut users: Vec<User> = Vec::new();
        let out = db.filter("a = ?", 1).filter("b = ?", 2).find(&mut users);

        assert!(out.error().is_none());
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE a = ? AND b = ?"#);
        assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn not_found_replaces_earlier_errors() {
        let (db, _) = mock_session(MockExecutor::new());
        let mut s = db.clone();
        s.add_error(Error::Custom("first".into()));
        s.add_error(Error::Custom("second".into()));
        assert_eq!(s.get_errors().len(), 2);

        s.add_error(Error::RecordNotFound);
        assert!(matches!(s.error(), Some(Error::RecordNotFound)));
        assert_eq!(s.get_errors().len(), 1);

        s.add_error(Error::Custom("later".into()));
        assert!(s.record_not_found());
        assert_eq!(s.get_errors().len(), 2);
    }

    #[test]
    fn argument_count_mismatch_is_invalid_sql() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut users: Vec<User> = Vec::new();

        let out = db.filter("a = ? AND b = ?", 1).find(&mut users);
        assert!(matches!(out.error(), Some(Error::InvalidSql(_))));

        let out = db.filter("a = ?", (1, 2)).find(&mut users);
        assert!(matches!(out.error(), Some(Error::InvalidSql(_))));

        let out = db.exec("DELETE FROM users WHERE id = ?", ());
        assert!(matches!(out.error(), Some(Error::InvalidSql(_))));
        assert_eq!(state.statement_count(), 0);
    }

    #[test]
    fn clones_point_at_their_template() {
        let (db, _) = mock_session(MockExecutor::new());
        assert!(db.parent().is_none());

        let chained = db.filter("a = ?", 1).limit(2);
        let template = chained.parent().unwrap();
        assert!(template.parent().is_none());
        assert!(!template.search().has_conditions());

        let further = chained.order("id");
        assert!(std::ptr::eq(further.parent().unwrap(), template));
    }

    #[test]
    fn first_on_empty_table_is_not_found() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut user = User::default();
        let out = db.first_where(&mut user, "id = ?", 1);

        assert!(out.record_not_found());
        assert!(matches!(out.error(), Some(Error::RecordNotFound)));
        assert!(db.error().is_none());
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"SELECT * FROM "users" WHERE id = ? ORDER BY "users"."id" ASC LIMIT 1"#
        );
    }

    #[test]
    fn empty_collection_is_not_an_error() {
        let (db, _) = mock_session(MockExecutor::new());
        let mut users: Vec<User> = Vec::new();
        let out = db.find(&mut users);
        assert!(out.error().is_none());
        assert!(users.is_empty());
    }

    #[test]
    fn first_and_last_decode_rows() {
        let exec = MockExecutor::new().with_rows(vec![user_row(9, "jinzhu", 30)]);
        let (db, state) = mock_session(exec);
        let mut user = User::default();
        let out = db.last(&mut user);

        assert!(out.error().is_none());
        assert_eq!(out.rows_affected(), 1);
        assert_eq!(user.id, 9);
        assert_eq!(user.name, "jinzhu");
        let (sql, _) = state.last_statement().unwrap();
        assert!(sql.ends_with(r#"ORDER BY "users"."id" DESC LIMIT 1"#));
    }

    #[test]
    fn explicit_order_wins_over_primary_key() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut user = User::default();
        db.order("name").first(&mut user);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"SELECT * FROM "users" ORDER BY "name" LIMIT 1"#);

        db.take(&mut user);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"SELECT * FROM "users" LIMIT 1"#);
    }

    #[test]
    fn invalid_group_is_reported_and_chain_continues() {
        let (db, state) = mock_session(MockExecutor::new());
        let bad = db.group("bad;drop");
        assert!(matches!(bad.error(), Some(Error::InvalidSql(_))));
        assert_eq!(bad.search().group, "");

        let mut users: Vec<User> = Vec::new();
        let out = bad.filter("a = ?", 1).find(&mut users);
        assert!(matches!(out.error(), Some(Error::InvalidSql(_))));
        assert_eq!(state.statement_count(), 0);
    }

    #[test]
    fn errors_aggregate() {
        let (db, _) = mock_session(MockExecutor::new());
        let out = db.group("a;").group("b;");
        let errors = out.get_errors();
        assert_eq!(errors.len(), 2);
        assert!(matches!(out.error(), Some(Error::Multiple(_))));

        let same = db.group("a;").group("a;");
        assert_eq!(same.get_errors().len(), 1);
    }

    #[test]
    fn sub_query_embeds_verbatim() {
        let (db, state) = mock_session(MockExecutor::new());
        let inner = db
            .table("emails")
            .select("user_id", ())
            .filter("kind = ?", "work");
        let expr = inner.sub_query();
        assert_eq!(expr.sql(), r#"(SELECT user_id FROM "emails" WHERE kind = ?)"#);

        let mut users: Vec<User> = Vec::new();
        db.filter("id IN ?", expr).filter("age > ?", 3).find(&mut users);
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"SELECT * FROM "users" WHERE id IN (SELECT user_id FROM "emails" WHERE kind = ?) AND age > ?"#
        );
        assert_eq!(params, vec![Value::from("work"), Value::Int(3)]);

        assert_eq!(
            inner.query_expr().sql(),
            r#"SELECT user_id FROM "emails" WHERE kind = ?"#
        );
    }

    #[test]
    fn count_and_pluck() {
        let exec = MockExecutor::new()
            .with_rows(vec![Row::new(vec!["count".into()], vec![Value::BigInt(4)])])
            .with_rows(vec![
                Row::new(vec!["name".into()], vec![Value::from("a")]),
                Row::new(vec!["name".into()], vec![Value::from("b")]),
            ]);
        let (db, state) = mock_session(exec);
        let users = db.model(&User::default());

        assert_eq!(users.order("name").limit(2).count().unwrap(), 4);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"SELECT count(*) FROM "users""#);

        let names: Vec<String> = users.pluck("name").unwrap();
        assert_eq!(names, vec!["a", "b"]);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"SELECT name FROM "users""#);
    }

    #[test]
    fn grouped_count_wraps_query() {
        let exec = MockExecutor::new()
            .with_rows(vec![Row::new(vec!["count".into()], vec![Value::BigInt(2)])]);
        let (db, state) = mock_session(exec);
        let n = db
            .model(&User::default())
            .group("name")
            .filter("age > ?", 1)
            .count()
            .unwrap();
        assert_eq!(n, 2);
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"SELECT count(*) FROM (SELECT name FROM "users" WHERE age > ? GROUP BY name) AS count_table"#
        );
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[test]
    fn create_inserts_and_reads_back_key() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut user = User {
            name: "jinzhu".into(),
            age: 18,
            ..User::default()
        };
        let out = db.create(&mut user);

        assert!(out.error().is_none());
        assert_eq!(out.rows_affected(), 1);
        assert_eq!(user.id, 1);
        let statements = state.statements();
        assert_eq!(
            statements.last().unwrap().0,
            r#"INSERT INTO "users" ("name","age") VALUES (?,?)"#
        );
        assert_eq!(state.began(), 1);
        assert_eq!(state.committed(), 1);
    }

    #[test]
    fn create_stamps_times() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut article = Article {
            title: "hello".into(),
            ..Article::default()
        };
        db.create(&mut article);
        assert!(article.created_at > 0);
        assert_eq!(article.created_at, article.updated_at);
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"INSERT INTO "articles" ("title","created_at","updated_at","deleted_at") VALUES (?,?,?,?)"#
        );
        assert_eq!(params.len(), 4);
        assert_eq!(params[3], Value::Null);
    }

    #[test]
    fn save_with_key_updates_once() {
        let exec = MockExecutor::new().affecting(0);
        let (db, state) = mock_session(exec);
        let mut user = User {
            id: 5,
            name: "x".into(),
            age: 2,
        };
        let out = db.save(&mut user);

        assert!(out.error().is_none());
        assert_eq!(out.rows_affected(), 0);
        let statements = state.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].0,
            r#"UPDATE "users" SET "name" = ?, "age" = ? WHERE "users"."id" = ?"#
        );
        assert_eq!(
            statements[0].1,
            vec![Value::from("x"), Value::Int(2), Value::BigInt(5)]
        );
    }

    #[test]
    fn updates_write_only_changed_attributes() {
        let (db, state) = mock_session(MockExecutor::new());
        let user = User {
            id: 3,
            name: "same".into(),
            age: 1,
        };
        let bound = db.model(&user);

        let out = bound.updates(Condition::map([
            ("name", Value::from("same")),
            ("age", Value::Int(2)),
        ]));
        assert!(out.error().is_none());
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(sql, r#"UPDATE "users" SET "age" = ? WHERE "users"."id" = ?"#);
        assert_eq!(params, vec![Value::Int(2), Value::BigInt(3)]);
        assert_eq!(out.value_as::<User>().unwrap().age, 2);

        let before = state.statement_count();
        let noop = bound.update("name", "same");
        assert!(noop.error().is_none());
        assert_eq!(state.statement_count(), before);
    }

    #[test]
    fn update_column_skips_timestamps() {
        let (db, state) = mock_session(MockExecutor::new());
        let article = Article {
            id: 1,
            title: "a".into(),
            ..Article::default()
        };
        db.model(&article).update("title", "b");
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"UPDATE "articles" SET "title" = ?, "updated_at" = ? WHERE "articles"."id" = ? AND "articles"."deleted_at" IS NULL"#
        );

        db.model(&article).update_column("title", "c");
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"UPDATE "articles" SET "title" = ? WHERE "articles"."id" = ? AND "articles"."deleted_at" IS NULL"#
        );
    }

    #[test]
    fn table_updates_use_keys_as_columns() {
        let (db, state) = mock_session(MockExecutor::new());
        db.table("users")
            .filter("age < ?", 3)
            .update_column("name", "kid");
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(sql, r#"UPDATE "users" SET "name" = ? WHERE age < ?"#);
        assert_eq!(params, vec![Value::from("kid"), Value::Int(3)]);
    }

    #[test]
    fn global_updates_can_be_blocked() {
        let (db, state) = mock_session(MockExecutor::new());
        let guarded = db.block_global_update(true);

        let out = guarded.table("users").update_column("name", "x");
        assert!(matches!(out.error(), Some(Error::MissingWhereClause)));
        let mut user = User::default();
        let out = guarded.delete(&mut user);
        assert!(matches!(out.error(), Some(Error::MissingWhereClause)));
        assert_eq!(state.statement_count(), 0);

        let out = guarded.table("users").filter("id = ?", 1).update_column("name", "x");
        assert!(out.error().is_none());
    }

    #[test]
    fn soft_and_hard_delete() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut article = Article {
            id: 7,
            ..Article::default()
        };
        db.delete(&mut article);
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"UPDATE "articles" SET "deleted_at" = ? WHERE "articles"."id" = ? AND "articles"."deleted_at" IS NULL"#
        );
        assert_eq!(params.len(), 2);

        db.unscoped().delete(&mut article);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"DELETE FROM "articles" WHERE "articles"."id" = ?"#);

        let mut user = User::default();
        db.delete_where(&mut user, "age > ?", 90);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"DELETE FROM "users" WHERE age > ?"#);
    }

    #[test]
    fn soft_deleted_rows_are_filtered() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut articles: Vec<Article> = Vec::new();
        db.find(&mut articles);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"SELECT * FROM "articles" WHERE "articles"."deleted_at" IS NULL"#
        );

        db.filter("title = ?", "x").find(&mut articles);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(
            sql,
            r#"SELECT * FROM "articles" WHERE "articles"."deleted_at" IS NULL AND (title = ?)"#
        );

        db.unscoped().find(&mut articles);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"SELECT * FROM "articles""#);
    }

    #[test]
    fn exec_strips_parentheses() {
        let (db, state) = mock_session(MockExecutor::new().affecting(3));
        let out = db.exec("(UPDATE users SET age = age + ? WHERE id IN (?))", (1, vec![1_i64, 2]));
        assert_eq!(out.rows_affected(), 3);
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(sql, "UPDATE users SET age = age + ? WHERE id IN (?,?)");
        assert_eq!(params.len(), 3);

        assert_eq!(strip_outer_parens("(a) UNION (b)"), "(a) UNION (b)");
    }

    #[test]
    fn numbered_placeholders_for_positional_dialects() {
        struct Numbered;
        impl Dialect for Numbered {
            fn name(&self) -> &'static str {
                "numbered"
            }
            fn bind_var(&self, index: usize) -> String {
                format!("${}", index)
            }
        }
        let state_exec = MockExecutor::new();
        let state = state_exec.state();
        let db = Session::new(Arc::new(state_exec), Arc::new(Numbered));
        let mut users: Vec<User> = Vec::new();
        db.filter("a = ?", 1).or("b = ?", 2).find(&mut users);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE a = $1 OR b = $2"#);
    }

    #[test]
    fn transactions() {
        let (db, state) = mock_session(MockExecutor::new());
        assert!(matches!(db.commit().error(), Some(Error::InvalidTransaction)));
        assert!(matches!(db.rollback().error(), Some(Error::InvalidTransaction)));

        let tx = db.begin();
        assert!(tx.error().is_none());
        assert!(tx.executor().is_transaction());
        assert!(!db.executor().is_transaction());
        assert!(tx.commit().error().is_none());
        assert_eq!(state.committed(), 1);

        let err = db
            .transaction(|tx| {
                tx.exec("DELETE FROM users", ()).result()?;
                Err(Error::Custom("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Custom(_)));
        assert_eq!(state.rolled_back(), 1);

        db.transaction(|tx| tx.exec("DELETE FROM users", ()).result())
            .unwrap();
        assert_eq!(state.committed(), 2);
    }

    #[test]
    fn begin_without_transaction_support() {
        let exec = MockExecutor::new().without_transactions();
        let state = exec.state();
        let db = Session::new(Arc::new(exec), Arc::new(CommonDialect));
        let tx = db.begin();
        assert!(matches!(tx.error(), Some(Error::CantStartTransaction)));
        assert!(db.transaction(|_| Ok(())).is_err());

        // Writes still run, just outside a transaction.
        let mut user = User::default();
        assert!(db.create(&mut user).error().is_none());
        assert_eq!(state.began(), 0);
    }

    #[test]
    fn first_or_init_fills_from_conditions() {
        let (db, _) = mock_session(MockExecutor::new());
        let mut user = User::default();
        let out = db
            .filter(Condition::map([("name", "non_existing")]), ())
            .attrs(Condition::map([("age", 20)]))
            .first_or_init(&mut user);

        assert!(out.error().is_none());
        assert_eq!(user.name, "non_existing");
        assert_eq!(user.age, 20);
        assert_eq!(user.id, 0);
    }

    #[test]
    fn first_or_create_creates_or_assigns() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut user = User::default();
        let out = db
            .filter(Condition::map([("name", "new")]), ())
            .first_or_create(&mut user);
        assert!(out.error().is_none());
        assert_eq!(user.id, 1);
        let (sql, _) = state.last_statement().unwrap();
        assert!(sql.starts_with(r#"INSERT INTO "users""#));

        let exec = MockExecutor::new().with_rows(vec![user_row(4, "old", 50)]);
        let (db, state) = mock_session(exec);
        let mut user = User::default();
        db.filter(Condition::map([("name", "old")]), ())
            .assign(Condition::map([("age", 51)]))
            .first_or_create(&mut user);
        assert_eq!(user.age, 51);
        let (sql, params) = state.last_statement().unwrap();
        assert_eq!(sql, r#"UPDATE "users" SET "age" = ? WHERE "users"."id" = ?"#);
        assert_eq!(params, vec![Value::Int(51), Value::BigInt(4)]);
    }

    #[test]
    fn hooks_run_and_abort() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut article = Article {
            title: "  padded  ".into(),
            ..Article::default()
        };
        db.create(&mut article);
        assert_eq!(article.title, "padded");

        let mut rejected = Article {
            title: "forbidden".into(),
            ..Article::default()
        };
        let before = state.statement_count();
        let out = db.create(&mut rejected);
        assert!(matches!(out.error(), Some(Error::Custom(_))));
        assert_eq!(state.statement_count(), before);
        assert_eq!(state.rolled_back(), 1);
    }

    #[test]
    fn callbacks_are_private_to_a_clone() {
        let (db, state) = mock_session(MockExecutor::new());
        let mut custom = db.clone();
        custom
            .callback()
            .query()
            .before("sqlchain:query")
            .register("test:limit_two", |scope: &mut Scope<'_>| {
                scope.search_mut().limit(2);
            })
            .unwrap();

        let mut users: Vec<User> = Vec::new();
        custom.find(&mut users);
        assert!(state.last_statement().unwrap().0.ends_with("LIMIT 2"));
        db.find(&mut users);
        assert!(!state.last_statement().unwrap().0.ends_with("LIMIT 2"));
    }

    #[test]
    fn settings_flow_through_clones() {
        let (mut db, state) = mock_session(MockExecutor::new());
        db.instant_set("sqlchain:insert_option", "ON CONFLICT DO NOTHING".to_string());
        assert!(db.get::<String>("sqlchain:insert_option").is_some());

        let mut user = User::default();
        db.filter("a = ?", 1).create(&mut user);
        let (sql, _) = state.last_statement().unwrap();
        assert!(sql.ends_with("ON CONFLICT DO NOTHING"));

        let local = db.set("sqlchain:query_option", "FOR UPDATE".to_string());
        assert!(db.get::<String>("sqlchain:query_option").is_none());
        let mut users: Vec<User> = Vec::new();
        local.find(&mut users);
        assert!(state.last_statement().unwrap().0.ends_with("FOR UPDATE"));
    }

    #[test]
    fn new_record_checks_primary_key() {
        let (db, _) = mock_session(MockExecutor::new());
        assert!(db.new_record(&User::default()));
        assert!(!db.new_record(&User {
            id: 1,
            ..User::default()
        }));
    }

    #[test]
    fn scopes_compose() {
        let (db, _) = mock_session(MockExecutor::new());
        let adults = |s: Session| s.filter("age >= ?", 18);
        let named = |s: Session| s.filter("name <> ?", "");
        let out = db.scopes(&[&adults, &named]);
        assert_eq!(out.search().where_conditions.len(), 2);
        assert!(!db.search().has_conditions());
    }

    #[test]
    fn scan_into_other_shape() {
        let exec = MockExecutor::new().with_rows(vec![user_row(1, "a", 2)]);
        let (db, state) = mock_session(exec);
        let mut out: Vec<User> = Vec::new();
        db.table("people").select("id, name, age", ()).scan(&mut out);
        assert_eq!(out.len(), 1);
        let (sql, _) = state.last_statement().unwrap();
        assert_eq!(sql, r#"SELECT id, name, age FROM "people""#);
    }
}
