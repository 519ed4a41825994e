//! The executor collaborator.
//!
//! An [`Executor`] runs SQL text with positional arguments. Sessions hold
//! one behind an `Arc` and never look past this trait: backends, pools and
//! test doubles all plug in here.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use std::sync::Arc;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }

    pub fn with_last_insert_id(mut self, id: i64) -> Self {
        self.last_insert_id = Some(id);
        self
    }
}

/// A pre-parsed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    sql: String,
    param_count: usize,
}

impl PreparedStatement {
    pub fn new(sql: impl Into<String>, param_count: usize) -> Self {
        Self {
            sql: sql.into(),
            param_count,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub const fn param_count(&self) -> usize {
        self.param_count
    }
}

/// Runs SQL against a backend.
///
/// Arguments are positional and match placeholder order exactly. A
/// transactional executor is obtained from [`Executor::begin`]; it answers
/// `true` from [`Executor::is_transaction`] and implements `commit` and
/// `rollback`. Non-transactional executors keep the default bodies, which
/// report [`Error::InvalidTransaction`].
pub trait Executor: Send + Sync {
    /// Run a statement that returns rows.
    #[allow(clippy::result_large_err)]
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement that does not return rows.
    #[allow(clippy::result_large_err)]
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    /// Parse a statement ahead of execution.
    #[allow(clippy::result_large_err)]
    fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        Ok(PreparedStatement::new(sql, sql.matches('?').count()))
    }

    /// Run a prepared statement that returns rows.
    #[allow(clippy::result_large_err)]
    fn query_prepared(&self, stmt: &PreparedStatement, params: &[Value]) -> Result<Vec<Row>> {
        check_param_count(stmt, params)?;
        self.query(stmt.sql(), params)
    }

    /// Run a prepared statement that does not return rows.
    #[allow(clippy::result_large_err)]
    fn execute_prepared(&self, stmt: &PreparedStatement, params: &[Value]) -> Result<ExecResult> {
        check_param_count(stmt, params)?;
        self.execute(stmt.sql(), params)
    }

    /// Check that the backend is reachable.
    #[allow(clippy::result_large_err)]
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Open a transaction.
    #[allow(clippy::result_large_err)]
    fn begin(&self, isolation: Option<IsolationLevel>) -> Result<Arc<dyn Executor>> {
        let _ = isolation;
        Err(Error::CantStartTransaction)
    }

    /// Is this executor a live transaction?
    fn is_transaction(&self) -> bool {
        false
    }

    #[allow(clippy::result_large_err)]
    fn commit(&self) -> Result<()> {
        Err(Error::InvalidTransaction)
    }

    #[allow(clippy::result_large_err)]
    fn rollback(&self) -> Result<()> {
        Err(Error::InvalidTransaction)
    }
}

#[allow(clippy::result_large_err)]
fn check_param_count(stmt: &PreparedStatement, params: &[Value]) -> Result<()> {
    if stmt.param_count() == params.len() {
        Ok(())
    } else {
        Err(Error::InvalidSql(format!(
            "statement expects {} parameters, got {}",
            stmt.param_count(),
            params.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Executor for Echo {
        fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            Ok(vec![Row::new(
                vec!["sql".to_string(), "n".to_string()],
                vec![Value::from(sql), Value::from(params.len() as i64)],
            )])
        }

        fn execute(&self, _sql: &str, params: &[Value]) -> Result<ExecResult> {
            Ok(ExecResult::new(params.len() as u64))
        }
    }

    #[test]
    fn defaults_are_not_transactional() {
        let exec = Echo;
        assert!(!exec.is_transaction());
        assert!(matches!(exec.begin(None), Err(Error::CantStartTransaction)));
        assert!(matches!(exec.commit(), Err(Error::InvalidTransaction)));
        assert!(matches!(exec.rollback(), Err(Error::InvalidTransaction)));
        assert!(exec.ping().is_ok());
    }

    #[test]
    fn prepared_statements_check_arity() {
        let exec = Echo;
        let stmt = exec.prepare("UPDATE t SET a = ? WHERE id = ?").unwrap();
        assert_eq!(stmt.param_count(), 2);

        let res = exec
            .execute_prepared(&stmt, &[Value::Int(1), Value::Int(2)])
            .unwrap();
        assert_eq!(res.rows_affected, 2);
        assert!(exec.execute_prepared(&stmt, &[Value::Int(1)]).is_err());

        let rows = exec
            .query_prepared(&exec.prepare("SELECT 1").unwrap(), &[])
            .unwrap();
        assert_eq!(rows[0].get_named::<i64>("n").unwrap(), 0);
    }

    #[test]
    fn isolation_sql() {
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }
}
