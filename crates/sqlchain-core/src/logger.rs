//! Statement and error logging.
//!
//! Sessions hand [`LogRecord`]s to a [`Logger`]. The default
//! [`TracingLogger`] turns them into `tracing` events. Error records in
//! [`LogMode::ErrorsOnly`] go through [`dispatch_async`], a bounded channel
//! drained by one background thread; delivery there is best effort and a
//! dropped record never reaches the caller.

use crate::error::Error;
use crate::value::Value;
use crossbeam::channel::{self, TrySendError};
use std::panic::Location;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// How much a session logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    /// Errors only, delivered in the background.
    #[default]
    ErrorsOnly,
    /// Nothing.
    Off,
    /// Every statement and error, synchronously.
    Verbose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Sql,
    Log,
    Error,
}

/// One loggable event.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub kind: LogKind,
    pub location: Option<&'static Location<'static>>,
    pub message: String,
    pub sql: Option<String>,
    pub vars: Vec<Value>,
    pub duration: Option<Duration>,
    pub rows_affected: Option<u64>,
}

impl LogRecord {
    pub fn error(err: &Error, location: Option<&'static Location<'static>>) -> Self {
        Self {
            kind: LogKind::Error,
            location,
            message: err.to_string(),
            sql: err.sql().map(str::to_string),
            vars: Vec::new(),
            duration: None,
            rows_affected: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Log,
            location: None,
            message: message.into(),
            sql: None,
            vars: Vec::new(),
            duration: None,
            rows_affected: None,
        }
    }

    pub fn sql(sql: &str, vars: &[Value], duration: Duration, rows_affected: u64) -> Self {
        Self {
            kind: LogKind::Sql,
            location: None,
            message: String::new(),
            sql: Some(sql.to_string()),
            vars: vars.to_vec(),
            duration: Some(duration),
            rows_affected: Some(rows_affected),
        }
    }

    /// SQL text with arguments inlined, for display only.
    pub fn render_sql(&self) -> String {
        let Some(sql) = &self.sql else {
            return String::new();
        };
        let mut out = String::with_capacity(sql.len() + self.vars.len() * 4);
        let mut vars = self.vars.iter();
        for c in sql.chars() {
            match (c, vars.len()) {
                ('?', n) if n > 0 => {
                    if let Some(v) = vars.next() {
                        out.push_str(&v.to_string());
                    }
                }
                (c, _) => out.push(c),
            }
        }
        out
    }

    /// The record as a flat sequence of printable values.
    pub fn values(&self) -> Vec<String> {
        let mut values = Vec::with_capacity(4);
        if let Some(loc) = self.location {
            values.push(format!("{}:{}", loc.file(), loc.line()));
        }
        if let Some(d) = self.duration {
            values.push(format!("[{:.2}ms]", d.as_secs_f64() * 1000.0));
        }
        match self.kind {
            LogKind::Sql => values.push(self.render_sql()),
            LogKind::Log | LogKind::Error => values.push(self.message.clone()),
        }
        if let Some(rows) = self.rows_affected {
            values.push(format!("[{} rows affected or returned]", rows));
        }
        values
    }
}

pub trait Logger: Send + Sync {
    fn print(&self, record: &LogRecord);
}

/// Forwards records to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn print(&self, record: &LogRecord) {
        let location = record
            .location
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        match record.kind {
            LogKind::Sql => tracing::info!(
                target: "sqlchain::sql",
                sql = %record.render_sql(),
                elapsed_ms = record.duration.map_or(0.0, |d| d.as_secs_f64() * 1000.0),
                rows = record.rows_affected.unwrap_or(0),
                "Executed SQL"
            ),
            LogKind::Log => tracing::info!(target: "sqlchain", location = %location, "{}", record.message),
            LogKind::Error => tracing::error!(target: "sqlchain", location = %location, "{}", record.message),
        }
    }
}

const LOG_CHANNEL_CAPACITY: usize = 256;

type Envelope = (Arc<dyn Logger>, LogRecord);

fn log_sender() -> Option<&'static channel::Sender<Envelope>> {
    static SENDER: OnceLock<Option<channel::Sender<Envelope>>> = OnceLock::new();
    SENDER
        .get_or_init(|| {
            let (tx, rx) = channel::bounded::<Envelope>(LOG_CHANNEL_CAPACITY);
            let spawned = std::thread::Builder::new()
                .name("sqlchain-log".to_string())
                .spawn(move || {
                    for (logger, record) in rx {
                        logger.print(&record);
                    }
                });
            match spawned {
                Ok(_) => Some(tx),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not start log thread; error logs disabled");
                    None
                }
            }
        })
        .as_ref()
}

/// Queue a record for the background log thread.
///
/// Returns whether the record was queued. A full or closed channel drops it.
pub fn dispatch_async(logger: Arc<dyn Logger>, record: LogRecord) -> bool {
    let Some(tx) = log_sender() else {
        return false;
    };
    match tx.try_send((logger, record)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::debug!("Log channel full; dropping record");
            false
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct Capture {
        seen: Mutex<Vec<String>>,
    }

    impl Logger for Capture {
        fn print(&self, record: &LogRecord) {
            self.seen.lock().unwrap().push(record.values().join(" "));
        }
    }

    #[test]
    fn renders_sql_with_vars() {
        let record = LogRecord::sql(
            "SELECT * FROM users WHERE id = ? AND name = ?",
            &[Value::BigInt(1), Value::from("a")],
            Duration::from_millis(2),
            1,
        );
        assert_eq!(
            record.render_sql(),
            "SELECT * FROM users WHERE id = 1 AND name = 'a'"
        );
        let values = record.values();
        assert_eq!(values.len(), 3);
        assert!(values[2].contains("1 rows"));
    }

    #[test]
    fn missing_vars_keep_placeholders() {
        let record = LogRecord::sql("a = ? AND b = ?", &[Value::Int(1)], Duration::ZERO, 0);
        assert_eq!(record.render_sql(), "a = 1 AND b = ?");
    }

    #[test]
    fn error_record_carries_location() {
        let here = Location::caller();
        let record = LogRecord::error(&Error::InvalidTransaction, Some(here));
        assert_eq!(record.kind, LogKind::Error);
        assert!(record.values()[0].contains("logger.rs"));
        assert_eq!(record.values()[1], "no valid transaction");
    }

    #[test]
    fn async_dispatch_delivers() {
        let capture = Arc::new(Capture::default());
        assert!(dispatch_async(
            capture.clone(),
            LogRecord::message("background hello")
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while capture.seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(capture.seen.lock().unwrap()[0], "background hello");
    }

    #[test]
    fn tracing_logger_accepts_every_kind() {
        let logger = TracingLogger;
        logger.print(&LogRecord::message("hi"));
        logger.print(&LogRecord::error(&Error::RecordNotFound, None));
        logger.print(&LogRecord::sql("SELECT 1", &[], Duration::ZERO, 0));
    }
}
