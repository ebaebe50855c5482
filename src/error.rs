use crate::db_operations::provider::{DriverError, DriverErrorKind};
use crate::schema::SchemaError;
use thiserror::Error;

/// SQLSTATE reported when the number of bound parameters does not match the
/// placeholders of a prepared statement.
pub const SQLSTATE_PARAMETER_MISMATCH: &str = "HY093";

/// Unified error type for the entity-query engine.
///
/// Each variant represents a specific category of failure, with enough
/// context (SQL text, SQLSTATE, table) to be actionable by the caller.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Table or column introspection failed
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The filter could not be compiled
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The record handed to an upsert is unusable
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The driver rejected a statement
    #[error("Query failed [{sql_state}]: {message} (sql: {sql})")]
    Query {
        sql_state: String,
        message: String,
        sql: String,
    },

    /// An extend-existing upsert matched more than one row
    #[error("Ambiguous update on {table}: {matches} rows match keys {keys:?}")]
    AmbiguousUpdate {
        table: String,
        keys: Vec<String>,
        matches: usize,
    },

    /// No usable connection for the profile
    #[error("Connection error ({profile}): {message}")]
    Connection { profile: String, message: String },

    /// Virtual column payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NodeError {
    /// Create an invalid filter error with context
    pub fn invalid_filter<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFilter(msg.into())
    }

    /// Create an invalid record error with context
    pub fn invalid_record<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create a configuration error with context
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a driver error raised while running `sql` on `profile`.
    ///
    /// Connection-level failures become [`NodeError::Connection`]; the
    /// parameter-count SQLSTATE gets a clearer message than the driver's.
    pub fn from_driver(profile: &str, sql: &str, error: DriverError) -> Self {
        match error.kind {
            DriverErrorKind::Connection => Self::Connection {
                profile: profile.to_string(),
                message: error.message,
            },
            DriverErrorKind::Statement if error.sql_state == SQLSTATE_PARAMETER_MISMATCH => {
                Self::Query {
                    sql_state: error.sql_state,
                    message: format!(
                        "Number of bound parameters does not match the placeholders in the statement ({})",
                        error.message
                    ),
                    sql: sql.to_string(),
                }
            }
            DriverErrorKind::Statement => Self::Query {
                sql_state: error.sql_state,
                message: error.message,
                sql: sql.to_string(),
            },
        }
    }

    /// The SQLSTATE of a query failure, if this is one
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { sql_state, .. } => Some(sql_state),
            _ => None,
        }
    }

    /// Check if this error is recoverable by the caller without changing input
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Result type alias for operations that can result in a NodeError
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_mismatch_is_rewritten() {
        let err = NodeError::from_driver(
            "default",
            "SELECT * FROM `t` WHERE `a` = ?",
            DriverError::statement(SQLSTATE_PARAMETER_MISMATCH, "expected 1, got 0"),
        );
        match err {
            NodeError::Query { sql_state, message, sql } => {
                assert_eq!(sql_state, "HY093");
                assert!(message.starts_with("Number of bound parameters"));
                assert!(message.contains("expected 1, got 0"));
                assert!(sql.contains("`a` = ?"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn connection_failures_map_to_connection_errors() {
        let err = NodeError::from_driver("reports", "SHOW TABLES", DriverError::connection("refused"));
        assert!(matches!(err, NodeError::Connection { ref profile, .. } if profile == "reports"));
        assert!(err.is_recoverable());
        assert_eq!(err.sql_state(), None);
    }
}
