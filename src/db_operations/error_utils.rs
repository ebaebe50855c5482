//! Error handling utilities for database operations
//!
//! Common conversions used across the connection layer so driver failures are
//! reported with consistent context.

use super::provider::DriverError;
use crate::error::NodeError;
use crate::schema::SchemaError;

/// Utility functions for common error handling patterns in database operations
pub struct ErrorUtils;

impl ErrorUtils {
    /// Creates a connection error for a profile that is not configured
    pub fn unknown_profile(profile: &str) -> NodeError {
        NodeError::Connection {
            profile: profile.to_string(),
            message: format!("Connection profile '{}' is not configured", profile),
        }
    }

    /// Creates a schema introspection error with consistent formatting
    pub fn introspection_error(table: &str, error: NodeError) -> NodeError {
        match error {
            NodeError::Query { message, .. } => NodeError::Schema(SchemaError::Introspection {
                table: table.to_string(),
                message,
            }),
            other => other,
        }
    }

    /// Creates a lock acquisition error with consistent formatting
    pub fn lock_error(resource: &str) -> NodeError {
        NodeError::Connection {
            profile: resource.to_string(),
            message: format!("Failed to acquire lock for {}", resource),
        }
    }

    /// Helper for converting driver errors raised while running `sql`
    pub fn from_driver_error<'a>(
        profile: &'a str,
        sql: &'a str,
    ) -> impl Fn(DriverError) -> NodeError + 'a {
        move |e| NodeError::from_driver(profile, sql, e)
    }
}
