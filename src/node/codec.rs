//! Packing of schemaless fields into the virtual column

use crate::db_operations::provider::Row;
use crate::error::{NodeError, NodeResult};
use crate::schema::Column;
use crate::{log_mutation_warn, Record};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Column values of an encoded record, in insert order
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    pub columns: Vec<(String, Value)>,
    /// Fields with no physical column and no virtual column to hold them
    pub dropped: Vec<String>,
}

/// Moves fields without a physical column into a JSON object stored in the
/// virtual column, and back.
#[derive(Debug, Clone)]
pub struct VirtualFieldCodec {
    virtual_column: String,
    discriminator: String,
}

impl VirtualFieldCodec {
    pub fn new(virtual_column: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            virtual_column: virtual_column.into(),
            discriminator: discriminator.into(),
        }
    }

    pub fn virtual_column(&self) -> &str {
        &self.virtual_column
    }

    /// Turn a fetched row into a record. NULL columns are omitted, the
    /// virtual column is merged in (physical values win) and the
    /// discriminator is set when the row does not carry it.
    pub fn decode(&self, mut row: Row, collection: &str) -> NodeResult<Record> {
        let contents = row.remove(&self.virtual_column);

        let mut record = Map::new();
        record.insert(
            self.discriminator.clone(),
            Value::String(collection.to_string()),
        );
        for (column, value) in row {
            if !value.is_null() {
                record.insert(column, value);
            }
        }

        let extra = match contents {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                match serde_json::from_str::<Value>(&text)? {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        return Err(NodeError::invalid_record(format!(
                            "virtual column of {} holds {} instead of an object",
                            collection, other
                        )))
                    }
                }
            }
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (field, value) in extra {
            record.entry(field).or_insert(value);
        }

        Ok(record)
    }

    /// Split a record into column values for `columns`. Fields without a
    /// physical column are serialized with sorted keys into the virtual
    /// column, or dropped with a warning when the table has none.
    pub fn encode(&self, record: &Record, columns: &[Column]) -> NodeResult<EncodedRecord> {
        let is_physical = |name: &str| name != self.virtual_column && columns.iter().any(|c| c.name == name);
        let has_virtual = columns.iter().any(|c| c.name == self.virtual_column);

        let mut physical = Vec::new();
        let mut overflow = BTreeMap::new();
        for (field, value) in record {
            if is_physical(field) {
                physical.push((field.clone(), value.clone()));
            } else if field == &self.discriminator || field == &self.virtual_column {
                // implied by the table
            } else {
                overflow.insert(field.clone(), value.clone());
            }
        }

        let mut dropped = Vec::new();
        if has_virtual {
            let contents = if overflow.is_empty() {
                Value::Null
            } else {
                Value::String(serde_json::to_string(&overflow)?)
            };
            physical.push((self.virtual_column.clone(), contents));
        } else if !overflow.is_empty() {
            dropped = overflow.into_keys().collect();
            log_mutation_warn!(
                "Dropping fields without a column ({}): {}",
                self.virtual_column,
                dropped.join(", ")
            );
        }

        Ok(EncodedRecord {
            columns: physical,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::KeyRole;
    use serde_json::json;

    fn codec() -> VirtualFieldCodec {
        VirtualFieldCodec::new("@contents", "@collection")
    }

    fn widget_columns() -> Vec<Column> {
        vec![
            Column::new("id").with_role(KeyRole::Primary),
            Column::new("sku").with_role(KeyRole::Unique),
            Column::new("@contents"),
        ]
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn encode_packs_unknown_fields_with_sorted_keys() {
        let record = object(json!({
            "@collection": "Widgets", "sku": "A1", "weight": 1.2, "color": "red"
        }));
        let encoded = codec().encode(&record, &widget_columns()).unwrap();
        assert_eq!(
            encoded.columns,
            vec![
                ("sku".to_string(), json!("A1")),
                ("@contents".to_string(), json!(r#"{"color":"red","weight":1.2}"#)),
            ]
        );
        assert!(encoded.dropped.is_empty());
    }

    #[test]
    fn encode_drops_fields_without_a_virtual_column() {
        let columns = vec![Column::new("id").with_role(KeyRole::Primary)];
        let record = object(json!({ "@collection": "Plain", "id": 1, "note": "x" }));
        let encoded = codec().encode(&record, &columns).unwrap();
        assert_eq!(encoded.columns, vec![("id".to_string(), json!(1))]);
        assert_eq!(encoded.dropped, vec!["note".to_string()]);
    }

    #[test]
    fn decode_merges_contents_and_physical_wins() {
        let row = object(json!({
            "id": 1, "sku": "A1", "note": null,
            "@contents": r#"{"sku":"shadowed","color":"red"}"#
        }));
        let record = codec().decode(row, "Widgets").unwrap();
        assert_eq!(
            Value::Object(record),
            json!({ "@collection": "Widgets", "id": 1, "sku": "A1", "color": "red" })
        );
    }

    #[test]
    fn round_trip_preserves_fields() {
        let record = object(json!({
            "@collection": "Widgets", "id": 4, "sku": "B2", "tags": ["a", "b"], "weight": 2.5
        }));
        let encoded = codec().encode(&record, &widget_columns()).unwrap();
        let row: Map<String, Value> = encoded.columns.into_iter().collect();
        assert_eq!(codec().decode(row, "Widgets").unwrap(), record);
    }

    #[test]
    fn decode_rejects_non_object_contents() {
        let row = object(json!({ "id": 1, "@contents": "[1, 2]" }));
        assert!(codec().decode(row, "Widgets").is_err());
    }
}
