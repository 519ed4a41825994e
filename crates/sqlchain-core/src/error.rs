//! Error types for sqlchain operations.

use std::fmt;
use std::sync::Arc;

/// The primary error type for all sqlchain operations.
///
/// Errors are `Clone` because every chained session carries a copy of the
/// error slot of the session it was cloned from.
#[derive(Debug, Clone)]
pub enum Error {
    /// A single-record fetch matched no row.
    RecordNotFound,
    /// A SQL fragment was rejected before reaching the database.
    InvalidSql(String),
    /// Commit or rollback on a session that is not inside a transaction.
    InvalidTransaction,
    /// The executor cannot open a transaction.
    CantStartTransaction,
    /// The operation needs a bound value but the session has none.
    Unaddressable,
    /// Update or delete without conditions while global updates are blocked.
    MissingWhereClause,
    /// Association lookup failures
    Association(AssociationError),
    /// Callback registration failures
    Callback(CallbackError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors reported by the executor
    Transaction(TransactionError),
    /// Schema/migration errors
    Schema(SchemaError),
    /// Connection setup and configuration errors
    Config(String),
    /// Two or more distinct errors recorded on one session
    Multiple(Errors),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct AssociationError {
    pub kind: AssociationErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationErrorKind {
    /// The owning record has a blank primary key
    BlankPrimaryKey,
    /// The named field does not exist or is not a relationship
    InvalidAssociation,
    /// A key column named by the relationship is missing
    MissingColumn,
}

#[derive(Debug, Clone)]
pub struct CallbackError {
    pub operation: &'static str,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
    /// Nested transaction not supported
    NestedNotSupported,
}

#[derive(Debug, Clone)]
pub struct SchemaError {
    pub table: Option<String>,
    pub message: String,
}

/// An aggregate of distinct errors.
///
/// Adding an error whose message matches one already present is a no-op,
/// so repeating the same failure on one session does not grow the list.
#[derive(Debug, Clone, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add an error, flattening nested aggregates.
    pub fn add(&mut self, err: Error) {
        match err {
            Error::Multiple(inner) => {
                for e in inner.0 {
                    self.add(e);
                }
            }
            err => {
                let rendered = err.to_string();
                if !self.0.iter().any(|e| e.to_string() == rendered) {
                    self.0.push(err);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Error> {
        self.0
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Error {
    /// Is this the not-found sentinel (or an aggregate containing it)?
    pub fn is_record_not_found(&self) -> bool {
        match self {
            Error::RecordNotFound => true,
            Error::Multiple(errors) => errors.iter().any(Error::is_record_not_found),
            _ => false,
        }
    }

    /// Is this a transactional-state error?
    pub fn is_transaction_state(&self) -> bool {
        matches!(
            self,
            Error::InvalidTransaction | Error::CantStartTransaction | Error::Transaction(_)
        )
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Flatten into the list of member errors.
    pub fn into_errors(self) -> Vec<Error> {
        match self {
            Error::Multiple(errors) => errors.into_vec(),
            err => vec![err],
        }
    }

    /// Combine two errors into one, aggregating when they differ.
    pub fn merge(self, other: Error) -> Error {
        let mut errors = Errors::new();
        errors.add(self);
        errors.add(other);
        if errors.len() == 1 {
            errors.0.remove(0)
        } else {
            Error::Multiple(errors)
        }
    }

    pub(crate) fn association(kind: AssociationErrorKind, message: impl Into<String>) -> Self {
        Error::Association(AssociationError {
            kind,
            message: message.into(),
        })
    }
}

impl AssociationError {
    pub fn blank_primary_key() -> Error {
        Error::association(
            AssociationErrorKind::BlankPrimaryKey,
            "primary key can't be nil",
        )
    }

    pub fn invalid(field: &str, model: &str) -> Error {
        Error::association(
            AssociationErrorKind::InvalidAssociation,
            format!("invalid association {} for {}", field, model),
        )
    }

    pub fn missing_column(table: &str, column: &str) -> Error {
        Error::association(
            AssociationErrorKind::MissingColumn,
            format!("{} doesn't have column {}", table, column),
        )
    }
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RecordNotFound => write!(f, "record not found"),
            Error::InvalidSql(sql) => write!(f, "invalid SQL: {}", sql),
            Error::InvalidTransaction => write!(f, "no valid transaction"),
            Error::CantStartTransaction => write!(f, "can't start transaction"),
            Error::Unaddressable => write!(f, "using unaddressable value"),
            Error::MissingWhereClause => write!(f, "missing WHERE clause while updating or deleting"),
            Error::Association(e) => write!(f, "{}", e.message),
            Error::Callback(e) => write!(f, "Callback error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Multiple(errors) => write!(f, "{}", errors),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} callback '{}': {}", self.operation, self.name, self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}: {}", table, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<AssociationError> for Error {
    fn from(err: AssociationError) -> Self {
        Error::Association(err)
    }
}

impl From<CallbackError> for Error {
    fn from(err: CallbackError) -> Self {
        Error::Callback(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<Errors> for Error {
    fn from(errors: Errors) -> Self {
        Error::Multiple(errors)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Type(TypeError {
            expected: "valid JSON",
            actual: err.to_string(),
            column: None,
        })
    }
}

/// Result type alias for sqlchain operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_predicate() {
        assert!(Error::RecordNotFound.is_record_not_found());
        assert!(!Error::InvalidTransaction.is_record_not_found());

        let merged = Error::InvalidSql("x".into()).merge(Error::RecordNotFound);
        assert!(matches!(merged, Error::Multiple(_)));
        assert!(merged.is_record_not_found());
    }

    #[test]
    fn errors_skip_duplicates() {
        let mut errors = Errors::new();
        errors.add(Error::InvalidTransaction);
        errors.add(Error::InvalidTransaction);
        errors.add(Error::Custom("boom".into()));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.to_string(), "no valid transaction; boom");
    }

    #[test]
    fn merge_of_same_error_stays_single() {
        let merged = Error::Custom("a".into()).merge(Error::Custom("a".into()));
        assert!(matches!(merged, Error::Custom(ref m) if m == "a"));
    }

    #[test]
    fn nested_aggregates_flatten() {
        let inner = Error::Custom("a".into()).merge(Error::Custom("b".into()));
        let outer = inner.merge(Error::Custom("c".into()));
        let members = outer.into_errors();
        assert_eq!(members.len(), 3);
    }

    #[test]
    fn association_messages() {
        assert_eq!(
            AssociationError::blank_primary_key().to_string(),
            "primary key can't be nil"
        );
        assert_eq!(
            AssociationError::invalid("Emails", "User").to_string(),
            "invalid association Emails for User"
        );
        assert_eq!(
            AssociationError::missing_column("emails", "user_id").to_string(),
            "emails doesn't have column user_id"
        );
    }

    #[test]
    fn query_error_carries_sql() {
        let err: Error = QueryError::new(QueryErrorKind::Syntax, "near FROM")
            .with_sql("SELECT FROM")
            .into();
        assert_eq!(err.sql(), Some("SELECT FROM"));
        assert!(!err.is_transaction_state());
        assert!(Error::CantStartTransaction.is_transaction_state());
    }
}
