//! Filter DSL semantics against the in-memory database
//!
//! The same conditions are evaluated once against a physical column (in SQL)
//! and once against a virtual field (in process); both must agree.

mod common;

use common::{field_values, record, NodeTestFixture};
use nodestore::{Filter, NodeError};
use serde_json::{json, Value};

fn create_ranked_widgets(fixture: &NodeTestFixture) {
    let rows = (1..=20)
        .map(|n| {
            record(json!({
                "sku": format!("W{:02}", n),
                "age": n,
                "@contents": json!({ "rank": n, "label": format!("w{:02}", n) }).to_string()
            }))
        })
        .collect();
    fixture.db.seed("Widgets", rows);
}

fn skus(fixture: &NodeTestFixture, filter: Filter) -> Vec<Value> {
    let records = fixture.store.get(filter).unwrap().to_vec().unwrap();
    field_values(&records, "sku")
}

/// Test pushed and in-process evaluation agree for every operator
#[test]
fn test_operators_agree_in_sql_and_in_process() {
    let fixture = NodeTestFixture::new();
    create_ranked_widgets(&fixture);

    let conditions = vec![
        json!(">=10"),
        json!("<5"),
        json!("> 18"),
        json!("<=1"),
        json!("!=10"),
        json!("7"),
        json!(7),
        json!(["3", "5", "!=4"]),
        json!(["!=3", "!=5"]),
        json!(["<3", ">19"]),
    ];

    for condition in conditions {
        let pushed = skus(
            &fixture,
            Filter::for_collection("Widgets").with_field("age", condition.clone()),
        );
        let in_process = skus(
            &fixture,
            Filter::for_collection("Widgets").with_field("rank", condition.clone()),
        );
        assert_eq!(pushed, in_process, "results differ for {}", condition);
    }
}

/// Test a few operators produce the expected rows
#[test]
fn test_operator_results() {
    let fixture = NodeTestFixture::new();
    create_ranked_widgets(&fixture);

    let filter = Filter::for_collection("Widgets").with_field("age", ">=19");
    assert_eq!(skus(&fixture, filter), vec![json!("W19"), json!("W20")]);

    let filter = Filter::for_collection("Widgets").with_field("rank", json!(["!=3", "3", "<2"]));
    assert_eq!(skus(&fixture, filter), vec![json!("W01"), json!("W03")]);
}

/// Test wildcard and regex string matching
#[test]
fn test_string_patterns() {
    let fixture = NodeTestFixture::new();
    create_ranked_widgets(&fixture);

    let pushed = skus(&fixture, Filter::for_collection("Widgets").with_field("sku", "W1*"));
    let in_process = skus(&fixture, Filter::for_collection("Widgets").with_field("label", "w1*"));
    assert_eq!(pushed.len(), 10);
    assert_eq!(pushed, in_process);

    let pushed = skus(&fixture, Filter::for_collection("Widgets").with_field("sku", "/^W0[1-3]$/"));
    assert_eq!(pushed, vec![json!("W01"), json!("W02"), json!("W03")]);
    let in_process = skus(
        &fixture,
        Filter::for_collection("Widgets").with_field("label", json!({ "@regex": "^w0[1-3]$" })),
    );
    assert_eq!(in_process, pushed);

    let excluded = skus(&fixture, Filter::for_collection("Widgets").with_field("sku", "!=W0_"));
    assert_eq!(excluded.len(), 11);
}

/// Test NULL checks on physical and virtual fields
#[test]
fn test_null_checks() {
    let fixture = NodeTestFixture::new();
    fixture.insert_widget("A1", json!({ "color": "red" }));
    fixture.insert_widget("B2", json!({ "age": 3 }));

    let filter = Filter::for_collection("Widgets").with_field("age", Value::Null);
    assert_eq!(skus(&fixture, filter), vec![json!("A1")]);

    let filter = Filter::for_collection("Widgets").with_field("color", "!=null");
    assert_eq!(skus(&fixture, filter), vec![json!("A1")]);

    let filter = Filter::for_collection("Widgets").with_field("color", "==null");
    assert_eq!(skus(&fixture, filter), vec![json!("B2")]);
}

/// Test dates compare chronologically in process
#[test]
fn test_date_ranges() {
    let fixture = NodeTestFixture::new();
    fixture.insert_widget("A1", json!({ "made": "2024-01-15 08:00:00" }));
    fixture.insert_widget("B2", json!({ "made": "2024-03-01" }));
    fixture.insert_widget("C3", json!({ "made": "2023-12-31T23:00:00Z" }));

    let filter = Filter::for_collection("Widgets").with_field("made", ">= '2024-01-01'");
    assert_eq!(skus(&fixture, filter), vec![json!("A1"), json!("B2")]);
}

/// Test regex flags survive when the match is pushed to SQL
#[test]
fn test_regex_flags_agree_in_sql_and_in_process() {
    let fixture = NodeTestFixture::new();
    create_ranked_widgets(&fixture);
    fixture.db.seed(
        "Widgets",
        vec![record(json!({
            "sku": "X01",
            "@contents": json!({ "label": "W01" }).to_string()
        }))],
    );

    let filter = Filter::for_collection("Widgets").with_field("sku", "/^w01$/i");
    let cursor = fixture.store.get(filter.clone()).unwrap();
    assert!(cursor.plan().sql.contains("`sku` REGEXP ?"));
    assert_eq!(cursor.plan().params, vec![json!("(?i)^w01$")]);
    let pushed = skus(&fixture, filter);
    assert_eq!(pushed, vec![json!("W01")]);

    let in_process = skus(&fixture, Filter::for_collection("Widgets").with_field("label", "/^w01$/i"));
    assert_eq!(in_process, vec![json!("W01"), json!("X01")]);

    let case_sensitive = skus(&fixture, Filter::for_collection("Widgets").with_field("sku", "/^w01$/"));
    assert!(case_sensitive.is_empty());
}

/// Test dates compare chronologically against a physical datetime column
#[test]
fn test_pushed_date_ranges() {
    let fixture = NodeTestFixture::new();
    let rows = [
        ("S1", "2024-01-15 08:00:00"),
        ("S2", "2024-03-01 00:00:00"),
        ("S3", "2023-12-31 23:00:00"),
    ]
    .iter()
    .map(|(reference, shipped)| {
        record(json!({
            "ref": reference,
            "shipped": shipped,
            "@contents": json!({ "arrived": shipped }).to_string()
        }))
    })
    .collect();
    fixture.db.seed("Shipments", rows);

    let refs = |filter: Filter| {
        let records = fixture.store.get(filter).unwrap().to_vec().unwrap();
        field_values(&records, "ref")
    };

    let filter = Filter::for_collection("Shipments").with_field("shipped", ">= '2024-01-01'");
    let cursor = fixture.store.get(filter.clone()).unwrap();
    assert!(cursor.plan().sql.contains("`shipped` >= ?"));
    assert_eq!(cursor.plan().params, vec![json!("2024-01-01 00:00:00")]);
    assert_eq!(refs(filter), vec![json!("S1"), json!("S2")]);

    for condition in ["< '2024-03-01'", "'2024-03-01'", "!= '2024-03-01'", "> '2023-12-31T23:00:00Z'"] {
        let pushed = refs(Filter::for_collection("Shipments").with_field("shipped", condition));
        let in_process = refs(Filter::for_collection("Shipments").with_field("arrived", condition));
        assert_eq!(pushed, in_process, "results differ for {}", condition);
    }
    assert_eq!(
        refs(Filter::for_collection("Shipments").with_field("shipped", "'2024-03-01'")),
        vec![json!("S2")]
    );
}

/// Test raw fragments and index hints
#[test]
fn test_raw_fragments_and_index_hints() {
    let fixture = NodeTestFixture::new();
    create_ranked_widgets(&fixture);

    let filter = Filter::for_collection("Widgets")
        .raw("`age` BETWEEN ? AND ?", vec![])
        .use_index("sku");
    // BETWEEN is outside the supported subset
    assert!(fixture.store.get(filter).is_err());

    let filter = Filter::from_value(&json!({
        "@collection": "Widgets",
        "@raw": { "sql": "`age` > ? AND `age` < ?", "params": [17, 20] },
        "@index": "sku"
    }))
    .unwrap();
    assert_eq!(skus(&fixture, filter), vec![json!("W18"), json!("W19")]);
}

/// Test malformed filters are rejected before any SQL runs
#[test]
fn test_invalid_filters() {
    let fixture = NodeTestFixture::new();

    let err = fixture.store.get(Filter::new()).err().unwrap();
    assert!(matches!(err, NodeError::InvalidFilter(_)));

    let err = fixture
        .store
        .get(Filter::for_collection("Widgets").with_field("age", json!([[1, 2]])))
        .err()
        .unwrap();
    assert!(matches!(err, NodeError::InvalidFilter(_)));

    let err = fixture
        .store
        .get_count(Filter::for_collection("Widgets").with_field("color", json!({ "x": 1 })))
        .unwrap_err();
    assert!(matches!(err, NodeError::InvalidFilter(_)));
}
