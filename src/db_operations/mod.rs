// Connection management and the driver boundary
pub mod core;
pub mod error_utils;
pub mod provider;

// In-memory MySQL subset used by tests and examples
#[cfg(any(test, feature = "mock"))]
pub mod memory;

pub use core::{ConnectionManager, LockMode};
pub use error_utils::ErrorUtils;
pub use provider::{
    ConnectionFactory, ConnectionProvider, DriverError, DriverErrorKind, ExecuteResult, Row,
    StatementHandle, StatementOptions,
};
