//! Table metadata
//!
//! Column metadata is read with `SHOW TABLES` and `SHOW COLUMNS` and cached
//! per connection profile.

pub mod cache;
pub mod column;
pub mod errors;

pub use cache::SchemaCache;
pub use column::{Column, KeyRole};
pub use errors::SchemaError;
