//! # nodestore
//!
//! An entity store over a relational database. Records are JSON objects
//! grouped into collections. A collection with its own table keeps known
//! fields in physical columns and everything else in a JSON virtual column;
//! collections without a table share a base table and are told apart by a
//! discriminator column.
//!
//! ## Components
//!
//! * [`node::NodeStore`] - reads, upserts and deletes records
//! * [`node::EntityCursor`] - lazy, rewindable result iteration
//! * [`query`] - the filter DSL, SQL composition and in-process matching
//! * [`schema::SchemaCache`] - cached table and column metadata
//! * [`db_operations::ConnectionManager`] - profiles, connections and the
//!   prepared statement cache
//!
//! ## Example
//!
//! ```ignore
//! use nodestore::{EngineConfig, Filter, NodeStore};
//!
//! let store = NodeStore::new(EngineConfig::default(), factory)?;
//! let mut cursor = store.get(Filter::for_collection("Widgets").with_field("color", "red"))?;
//! for record in &mut cursor {
//!     println!("{}", serde_json::Value::Object(record?));
//! }
//! ```

pub mod config;
pub mod db_operations;
pub mod error;
pub mod logging;
pub mod node;
pub mod query;
pub mod schema;

/// A record: a JSON object keyed by field name
pub type Record = serde_json::Map<String, serde_json::Value>;

pub use config::{load_engine_config, ConnectionProfile, EngineConfig};
pub use db_operations::{ConnectionFactory, ConnectionManager, ConnectionProvider, LockMode};
pub use error::{NodeError, NodeResult};
pub use logging::LoggingSystem;
pub use node::{DeleteTarget, EntityCursor, NodeStore, UpsertResult};
pub use query::{Filter, Limit, SortDirective};
pub use schema::{Column, KeyRole, SchemaCache, SchemaError};
