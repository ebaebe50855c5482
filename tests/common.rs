//! Common test utilities and fixtures for NodeStore tests
//!
//! Every fixture runs against the in-memory database so tests can inspect
//! the statements the engine issued.

#![allow(dead_code)]

use nodestore::db_operations::memory::{ColumnDef, MemoryDatabase};
use nodestore::{EngineConfig, NodeStore, Record};
use serde_json::Value;
use std::sync::Arc;

/// Store and database shared by a test
pub struct NodeTestFixture {
    pub db: MemoryDatabase,
    pub store: NodeStore,
}

impl NodeTestFixture {
    /// Create a fixture with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let db = create_test_database();
        let store = NodeStore::new(config, Arc::new(db.clone()))
            .expect("Failed to create NodeStore");
        Self { db, store }
    }

    /// Insert a widget through the store
    pub fn insert_widget(&self, sku: &str, fields: Value) -> Option<u64> {
        let mut record = record(fields);
        record.insert("@collection".to_string(), Value::from("Widgets"));
        record.insert("sku".to_string(), Value::from(sku));
        self.store
            .set(record, false)
            .expect("Failed to insert widget")
            .inserted_id()
    }

    /// Number of executed statements starting with `prefix`
    pub fn statements_starting_with(&self, prefix: &str) -> usize {
        self.db
            .executed_sql()
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }
}

/// Create a database with dedicated `Widgets` and `Shipments` tables, the
/// shared `NodeBase` table and a `Plain` table with no keys and no virtual column
pub fn create_test_database() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    db.create_table(
        "Widgets",
        vec![
            ColumnDef::new("id").primary().auto_increment(),
            ColumnDef::new("sku").unique(),
            ColumnDef::new("age").with_type("int(11)"),
            ColumnDef::new("@contents").with_type("text"),
        ],
    );
    db.create_table(
        "Shipments",
        vec![
            ColumnDef::new("id").primary().auto_increment(),
            ColumnDef::new("ref").unique(),
            ColumnDef::new("shipped").with_type("datetime"),
            ColumnDef::new("@contents").with_type("text"),
        ],
    );
    db.create_table(
        "NodeBase",
        vec![
            ColumnDef::new("id").primary().auto_increment(),
            ColumnDef::new("@collection").indexed().not_null(),
            ColumnDef::new("@contents").with_type("text"),
        ],
    );
    db.create_table(
        "Plain",
        vec![ColumnDef::new("name"), ColumnDef::new("note")],
    );
    db
}

/// Build a record from a JSON object literal
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Values of `field` across records, in order
pub fn field_values(records: &[Record], field: &str) -> Vec<Value> {
    records
        .iter()
        .map(|r| r.get(field).cloned().unwrap_or(Value::Null))
        .collect()
}
