//! Connection profiles, statement caching, locking and driver failures

mod common;

use common::{create_test_database, NodeTestFixture};
use nodestore::db_operations::DriverError;
use nodestore::{ConnectionProfile, EngineConfig, Filter, LockMode, NodeError, NodeStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Test identical statements are prepared once per profile
#[test]
fn test_statement_cache() {
    let fixture = NodeTestFixture::new();
    let filter = || Filter::for_collection("Widgets").with_field("sku", "A1");

    fixture.store.get_count(filter()).unwrap();
    let prepared = fixture.db.prepare_count();
    fixture.store.get_count(filter()).unwrap();
    fixture.store.get_count(filter()).unwrap();

    assert_eq!(fixture.db.prepare_count(), prepared);
    assert_eq!(fixture.statements_starting_with("SELECT COUNT(*)"), 3);
    // SHOW TABLES, SHOW COLUMNS and the count
    assert_eq!(fixture.store.connections().cached_statements("default").unwrap(), 3);
}

/// Test column metadata is re-read once the TTL has passed
#[test]
fn test_schema_ttl() {
    let fixture = NodeTestFixture::new();
    fixture.store.get_count("Widgets").unwrap();
    fixture.store.get_count("Widgets").unwrap();
    assert_eq!(fixture.statements_starting_with("SHOW COLUMNS"), 1);

    let fixture =
        NodeTestFixture::with_config(EngineConfig::default().with_schema_ttl(Duration::ZERO));
    fixture.store.get_count("Widgets").unwrap();
    fixture.store.get_count("Widgets").unwrap();
    assert_eq!(fixture.statements_starting_with("SHOW COLUMNS"), 2);
    assert_eq!(fixture.statements_starting_with("SHOW TABLES"), 1);
}

/// Test UNLOCK TABLES is retried a bounded number of times
#[test]
fn test_unlock_retries() {
    let config = EngineConfig::default().with_unlock_retry(3, Duration::from_millis(1));
    let fixture = NodeTestFixture::with_config(config);

    fixture
        .store
        .lock(&[("Widgets", LockMode::Write), ("Gizmos", LockMode::Read)])
        .unwrap();
    assert_eq!(fixture.db.locked_tables(), vec!["Widgets", "NodeBase"]);

    fixture.db.fail_unlocks(2);
    fixture.store.unlock().unwrap();
    assert_eq!(fixture.statements_starting_with("UNLOCK TABLES"), 3);
    assert!(fixture.db.locked_tables().is_empty());

    fixture.db.fail_unlocks(5);
    let err = fixture.store.unlock().unwrap_err();
    assert_eq!(err.sql_state(), Some("HY000"));
    assert_eq!(fixture.statements_starting_with("UNLOCK TABLES"), 6);
}

/// Test a lost connection is reported and reopened on the next call
#[test]
fn test_connection_loss_and_reconnect() {
    let fixture = NodeTestFixture::new();
    fixture.insert_widget("A1", json!({}));
    assert_eq!(fixture.db.connections_opened(), 1);

    fixture.db.set_offline(true);
    let err = fixture.store.get_count("Widgets").unwrap_err();
    assert!(matches!(err, NodeError::Connection { ref profile, .. } if profile == "default"));
    assert!(err.is_recoverable());

    fixture.db.set_offline(false);
    assert_eq!(fixture.store.get_count("Widgets").unwrap(), 1);
    assert_eq!(fixture.db.connections_opened(), 2);
}

/// Test a parameter count mismatch gets a readable message
#[test]
fn test_parameter_mismatch_message() {
    let fixture = NodeTestFixture::new();
    let filter = Filter::for_collection("Widgets").raw("`age` > ?", vec![]);

    let err = fixture.store.get(filter).err().unwrap();
    assert_eq!(err.sql_state(), Some("HY093"));
    assert!(err
        .to_string()
        .contains("Number of bound parameters does not match"));
}

/// Test driver errors carry their SQLSTATE and statement
#[test]
fn test_driver_errors_are_wrapped() {
    let fixture = NodeTestFixture::new();
    fixture.store.get_count("Widgets").unwrap();

    fixture
        .db
        .fail_next_execute(DriverError::statement("40001", "Deadlock found"));
    match fixture.store.get_count("Widgets").unwrap_err() {
        NodeError::Query { sql_state, sql, .. } => {
            assert_eq!(sql_state, "40001");
            assert_eq!(sql, "SELECT COUNT(*) FROM `Widgets`");
        }
        other => panic!("expected a query error, got {:?}", other),
    }
}

/// Test stores for different profiles share one connection manager
#[test]
fn test_profiles() {
    let db = create_test_database();
    let config = EngineConfig::default()
        .with_profile(ConnectionProfile::new("reports", "memory://reports"));
    let store = NodeStore::new(config.clone(), Arc::new(db.clone())).unwrap();
    let reports =
        NodeStore::with_connections(config.clone(), store.connections().clone(), "reports").unwrap();

    assert_eq!(reports.profile(), "reports");
    reports.get_count("Widgets").unwrap();
    store.get_count("Widgets").unwrap();
    assert_eq!(db.connections_opened(), 2);

    let err = NodeStore::with_connections(config, store.connections().clone(), "missing")
        .err()
        .unwrap();
    assert!(matches!(err, NodeError::Connection { .. }));
}

/// Test an invalid configuration is refused
#[test]
fn test_invalid_config() {
    let mut config = EngineConfig::default();
    config.virtual_column = config.discriminator_field.clone();
    let result = NodeStore::new(config, Arc::new(create_test_database()));
    assert!(matches!(result, Err(NodeError::Config(_))));
}
