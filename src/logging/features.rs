//! Feature-specific logging targets and macros
//!
//! Each engine component logs under its own target so levels can be tuned per
//! feature from [`LogConfig`](super::config::LogConfig).

/// Feature categories for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFeature {
    Connection,
    Schema,
    Query,
    Mutation,
}

impl LogFeature {
    /// Get the target string for this feature
    pub fn target(&self) -> &'static str {
        match self {
            LogFeature::Connection => "nodestore::connection",
            LogFeature::Schema => "nodestore::schema",
            LogFeature::Query => "nodestore::query",
            LogFeature::Mutation => "nodestore::mutation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "connection" => Some(LogFeature::Connection),
            "schema" => Some(LogFeature::Schema),
            "query" => Some(LogFeature::Query),
            "mutation" => Some(LogFeature::Mutation),
            _ => None,
        }
    }
}

#[macro_export]
macro_rules! log_connection_info {
    ($($arg:tt)*) => {
        log::info!(target: "nodestore::connection", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_connection_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "nodestore::connection", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_schema_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "nodestore::schema", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_query_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "nodestore::query", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_mutation_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "nodestore::mutation", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_mutation_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "nodestore::mutation", $($arg)*)
    };
}
