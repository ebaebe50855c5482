//! Driver seam
//!
//! The engine never talks to a database driver directly. A [`ConnectionFactory`]
//! opens one [`ConnectionProvider`] per connection profile and the
//! [`ConnectionManager`](super::ConnectionManager) drives it through prepared
//! statement handles. Providers are forward-only: a statement is executed and
//! its rows are pulled one at a time with [`ConnectionProvider::fetch`].

use crate::config::ConnectionProfile;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A single result row keyed by column name
pub type Row = serde_json::Map<String, Value>;

/// Opaque handle to a statement prepared on one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(pub u64);

/// Driver options a statement is prepared with.
///
/// Part of the statement cache key: identical SQL prepared with different
/// options yields different handles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StatementOptions(BTreeMap<String, String>);

impl StatementOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Outcome of executing a statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Rows inserted, updated or deleted (MySQL semantics: an upsert that
    /// updates reports 2, an unchanged one 0)
    pub affected_rows: u64,
    /// Auto-increment value generated by the statement, if any
    pub last_insert_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The connection is gone or could not be opened
    Connection,
    /// The statement itself failed
    Statement,
}

/// Error reported by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    /// Five character SQLSTATE
    pub sql_state: String,
    pub message: String,
}

impl DriverError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self {
            kind: DriverErrorKind::Connection,
            sql_state: "08001".to_string(),
            message: message.into(),
        }
    }

    pub fn statement<S: Into<String>>(sql_state: &str, message: S) -> Self {
        Self {
            kind: DriverErrorKind::Statement,
            sql_state: sql_state.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.sql_state, self.message)
    }
}

impl std::error::Error for DriverError {}

/// A live driver connection
pub trait ConnectionProvider: Send {
    fn prepare(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<StatementHandle, DriverError>;

    /// Execute a prepared statement, discarding any rows left from a previous run
    fn execute(
        &mut self,
        statement: StatementHandle,
        params: &[Value],
    ) -> Result<ExecuteResult, DriverError>;

    /// Pull the next row of the last execution; `None` ends the result set
    fn fetch(&mut self, statement: StatementHandle) -> Result<Option<Row>, DriverError>;

    fn begin_transaction(&mut self) -> Result<(), DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;

    fn rollback(&mut self) -> Result<(), DriverError>;
}

/// Opens connections for profiles
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, profile: &ConnectionProfile)
        -> Result<Box<dyn ConnectionProvider>, DriverError>;
}
