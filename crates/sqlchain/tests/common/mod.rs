//! Recording executor shared by the integration tests.

#![allow(dead_code)]

use sqlchain::{Error, ExecResult, Executor, IsolationLevel, Result, Row, Session, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct State {
    pub statements: Vec<(String, Vec<Value>)>,
    pub queued: VecDeque<Vec<Row>>,
    pub next_id: i64,
    pub committed: usize,
    pub rolled_back: usize,
    pub reachable: bool,
}

#[derive(Debug, Clone)]
pub struct Recorder {
    state: Arc<Mutex<State>>,
    in_transaction: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                reachable: true,
                ..State::default()
            })),
            in_transaction: false,
        }
    }

    pub fn unreachable() -> Self {
        let recorder = Self::new();
        recorder.lock().reachable = false;
        recorder
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer the next query with `rows`.
    pub fn queue(&self, rows: Vec<Row>) {
        self.lock().queued.push_back(rows);
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.lock().statements.clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn last(&self) -> (String, Vec<Value>) {
        self.lock()
            .statements
            .last()
            .cloned()
            .unwrap_or_default()
    }

    pub fn committed(&self) -> usize {
        self.lock().committed
    }

    pub fn rolled_back(&self) -> usize {
        self.lock().rolled_back
    }

    pub fn session(&self) -> Session {
        sqlchain::open("common", Arc::new(self.clone())).unwrap()
    }
}

impl Executor for Recorder {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.lock();
        state.statements.push((sql.to_string(), params.to_vec()));
        Ok(state.queued.pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let mut state = self.lock();
        state.statements.push((sql.to_string(), params.to_vec()));
        state.next_id += 1;
        Ok(ExecResult::new(1).with_last_insert_id(state.next_id))
    }

    fn ping(&self) -> Result<()> {
        if self.lock().reachable {
            Ok(())
        } else {
            Err(Error::Custom("connection refused".into()))
        }
    }

    fn begin(&self, _isolation: Option<IsolationLevel>) -> Result<Arc<dyn Executor>> {
        Ok(Arc::new(Self {
            state: Arc::clone(&self.state),
            in_transaction: true,
        }))
    }

    fn is_transaction(&self) -> bool {
        self.in_transaction
    }

    fn commit(&self) -> Result<()> {
        self.lock().committed += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.lock().rolled_back += 1;
        Ok(())
    }
}

pub fn row(columns: &[&str], values: Vec<Value>) -> Row {
    Row::new(columns.iter().map(|c| (*c).to_string()).collect(), values)
}
