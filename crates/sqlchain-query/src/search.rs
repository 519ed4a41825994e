//! The per-query condition accumulator.

use crate::condition::{Clause, Condition};
use crate::expr::{Arg, Expr, IntoArgs};
use regex::Regex;
use sqlchain_core::{Error, Result};
use std::sync::OnceLock;

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    Text(String),
    Expr(Expr),
}

impl Order {
    pub fn is_empty(&self) -> bool {
        match self {
            Order::Text(s) => s.trim().is_empty(),
            Order::Expr(e) => e.sql().trim().is_empty(),
        }
    }
}

impl From<&str> for Order {
    fn from(s: &str) -> Self {
        Order::Text(s.to_string())
    }
}

impl From<String> for Order {
    fn from(s: String) -> Self {
        Order::Text(s)
    }
}

impl From<Expr> for Order {
    fn from(e: Expr) -> Self {
        Order::Expr(e)
    }
}

/// What to select instead of `*`.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A select list with its own placeholders.
    Text(String, Vec<Arg>),
    /// Plain column names, also used to restrict which columns are written.
    Columns(Vec<String>),
}

impl Selection {
    /// The column names of a `Columns` selection, or the comma-separated
    /// parts of a placeholder-free text selection.
    pub fn column_names(&self) -> Vec<String> {
        match self {
            Selection::Columns(cols) => cols.clone(),
            Selection::Text(text, args) if args.is_empty() => text
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Selection::Text(..) => Vec::new(),
        }
    }
}

/// An association to load after the main query, with its own conditions.
#[derive(Debug, Clone)]
pub struct Preload {
    pub path: String,
    pub conditions: Vec<Clause>,
}

/// Accumulated, not-yet-rendered query state.
///
/// Every list is owned, so a cloned `Search` never shares storage with
/// its source. `limit` and `offset` use `-1` for "unset".
#[derive(Debug, Clone)]
pub struct Search {
    pub where_conditions: Vec<Clause>,
    pub or_conditions: Vec<Clause>,
    pub not_conditions: Vec<Clause>,
    pub having_conditions: Vec<Clause>,
    pub join_conditions: Vec<Clause>,
    pub init_attrs: Vec<Clause>,
    pub assign_attrs: Vec<Clause>,
    pub select: Option<Selection>,
    pub omits: Vec<String>,
    pub orders: Vec<Order>,
    pub preload: Vec<Preload>,
    pub limit: i64,
    pub offset: i64,
    pub group: String,
    pub table_name: String,
    pub raw: bool,
    pub unscoped: bool,
    pub ignore_order_query: bool,
}

impl Default for Search {
    fn default() -> Self {
        Self::new()
    }
}

impl Search {
    pub fn new() -> Self {
        Self {
            where_conditions: Vec::new(),
            or_conditions: Vec::new(),
            not_conditions: Vec::new(),
            having_conditions: Vec::new(),
            join_conditions: Vec::new(),
            init_attrs: Vec::new(),
            assign_attrs: Vec::new(),
            select: None,
            omits: Vec::new(),
            orders: Vec::new(),
            preload: Vec::new(),
            limit: -1,
            offset: -1,
            group: String::new(),
            table_name: String::new(),
            raw: false,
            unscoped: false,
            ignore_order_query: false,
        }
    }

    pub fn filter(&mut self, condition: impl Into<Condition>, args: impl IntoArgs) -> &mut Self {
        push_clause(&mut self.where_conditions, Clause::new(condition, args));
        self
    }

    pub fn or(&mut self, condition: impl Into<Condition>, args: impl IntoArgs) -> &mut Self {
        push_clause(&mut self.or_conditions, Clause::new(condition, args));
        self
    }

    pub fn not(&mut self, condition: impl Into<Condition>, args: impl IntoArgs) -> &mut Self {
        push_clause(&mut self.not_conditions, Clause::new(condition, args));
        self
    }

    pub fn having(&mut self, condition: impl Into<Condition>, args: impl IntoArgs) -> &mut Self {
        push_clause(&mut self.having_conditions, Clause::new(condition, args));
        self
    }

    pub fn joins(&mut self, sql: impl Into<String>, args: impl IntoArgs) -> &mut Self {
        push_clause(&mut self.join_conditions, Clause::new(sql.into(), args));
        self
    }

    pub fn attrs(&mut self, condition: impl Into<Condition>, args: impl IntoArgs) -> &mut Self {
        push_clause(&mut self.init_attrs, Clause::new(condition, args));
        self
    }

    pub fn assign(&mut self, condition: impl Into<Condition>, args: impl IntoArgs) -> &mut Self {
        push_clause(&mut self.assign_attrs, Clause::new(condition, args));
        self
    }

    /// Append an ORDER BY term, first clearing existing terms when `reorder` is set.
    pub fn order(&mut self, value: impl Into<Order>, reorder: bool) -> &mut Self {
        if reorder {
            self.orders.clear();
        }
        let value = value.into();
        if !value.is_empty() {
            self.orders.push(value);
        }
        self
    }

    pub fn select(&mut self, query: impl Into<String>, args: impl IntoArgs) -> &mut Self {
        self.select = Some(Selection::Text(query.into(), args.into_args()));
        self
    }

    pub fn select_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(Selection::Columns(
            columns.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn omit<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omits = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = limit;
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = offset;
        self
    }

    /// Set the GROUP BY clause.
    ///
    /// Only comma-separated identifiers or a column number are accepted.
    /// Anything else clears the clause and returns [`Error::InvalidSql`].
    pub fn group(&mut self, group: &str) -> Result<()> {
        match sanitize_group(group) {
            Ok(g) => {
                self.group = g;
                Ok(())
            }
            Err(e) => {
                self.group.clear();
                Err(e)
            }
        }
    }

    /// Register a preload, replacing the conditions of an existing one with the same path.
    pub fn preload(&mut self, path: impl Into<String>, conditions: Vec<Clause>) -> &mut Self {
        let path = path.into();
        match self.preload.iter_mut().find(|p| p.path == path) {
            Some(existing) => existing.conditions = conditions,
            None => self.preload.push(Preload { path, conditions }),
        }
        self
    }

    pub fn set_raw(&mut self, raw: bool) -> &mut Self {
        self.raw = raw;
        self
    }

    pub fn unscoped(&mut self) -> &mut Self {
        self.unscoped = true;
        self
    }

    pub fn table(&mut self, name: impl Into<String>) -> &mut Self {
        self.table_name = name.into();
        self
    }

    /// Whether any row-restricting condition has been added.
    pub fn has_conditions(&self) -> bool {
        !(self.where_conditions.is_empty()
            && self.or_conditions.is_empty()
            && self.not_conditions.is_empty())
    }
}

fn push_clause(list: &mut Vec<Clause>, clause: Clause) {
    if clause.condition.is_empty() {
        tracing::trace!("Ignoring empty condition");
        return;
    }
    list.push(clause);
}

fn group_patterns() -> Option<&'static (Regex, Regex)> {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let idents =
                Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*(\s*,\s*[A-Za-z_][A-Za-z0-9_.]*)*$").ok()?;
            let number = Regex::new(r"^\d+$").ok()?;
            Some((idents, number))
        })
        .as_ref()
}

/// Check a GROUP BY fragment against the identifier/number allow-set.
///
/// `""` and `"-1"` mean "no grouping".
pub fn sanitize_group(group: &str) -> Result<String> {
    let trimmed = group.trim();
    if trimmed.is_empty() || trimmed == "-1" {
        return Ok(String::new());
    }
    let allowed = group_patterns()
        .is_some_and(|(idents, number)| idents.is_match(trimmed) || number.is_match(trimmed));
    if allowed {
        Ok(trimmed.to_string())
    } else {
        Err(Error::InvalidSql(format!("unsupported GROUP BY clause: {}", trimmed)))
    }
}
