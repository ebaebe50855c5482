//! Filter documents
//!
//! A [`Filter`] is the typed form of a JSON filter document. Meta keys carry
//! the target collection, projection, index hints, raw SQL, limits and sort
//! directives; every other key is a field condition.

use crate::error::{NodeError, NodeResult};
use crate::Record;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub const COLLECTION_KEY: &str = "@collection";
pub const SELECT_KEY: &str = "@select";
pub const INDEX_KEY: &str = "@index";
pub const RAW_KEY: &str = "@raw";
pub const LIMITS_KEY: &str = "@limits";
pub const SORTER_KEY: &str = "@sorter";
/// Object marker for a regular expression value: `{"@regex": "..."}`
pub const REGEX_MARKER: &str = "@regex";

/// Offset and optional length applied to a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limit {
    pub offset: u64,
    pub length: Option<u64>,
}

impl Limit {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Accepts `n`, `[n]`, `[offset, n]` or `[offset, null]`
    pub fn from_value(value: &Value) -> NodeResult<Self> {
        let invalid = || {
            NodeError::invalid_filter(format!(
                "{} must be a length or an [offset, length] pair",
                LIMITS_KEY
            ))
        };
        let non_negative = |v: &Value| v.as_u64().ok_or_else(invalid);

        match value {
            Value::Number(_) => Ok(Self::new(0, Some(non_negative(value)?))),
            Value::Array(items) => match items.as_slice() {
                [length] => Ok(Self::new(0, Some(non_negative(length)?))),
                [offset, Value::Null] => Ok(Self::new(non_negative(offset)?, None)),
                [offset, length] => Ok(Self::new(non_negative(offset)?, Some(non_negative(length)?))),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }

    /// Apply this window to a total number of rows
    pub fn clamp(&self, total: u64) -> u64 {
        let remaining = total.saturating_sub(self.offset);
        match self.length {
            Some(length) => remaining.min(length),
            None => remaining,
        }
    }

    /// Whether the window is exhausted after `seen` matching rows
    pub fn is_past_end(&self, seen: u64) -> bool {
        self.length
            .map_or(false, |length| seen >= self.offset.saturating_add(length))
    }

    /// `LIMIT offset, length` with an unbounded length written as `u64::MAX`
    pub fn to_sql(&self) -> String {
        format!("LIMIT {}, {}", self.offset, self.length.unwrap_or(u64::MAX))
    }
}

/// A verbatim SQL condition AND'ed into the WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub struct RawFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl RawFragment {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    fn from_value(value: &Value) -> NodeResult<Self> {
        match value {
            Value::String(sql) => Ok(Self::new(sql.clone(), Vec::new())),
            Value::Object(map) => {
                let sql = map
                    .get("sql")
                    .and_then(Value::as_str)
                    .ok_or_else(|| NodeError::invalid_filter("raw fragment requires 'sql'"))?;
                let params = match map.get("params") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(params)) => params.clone(),
                    Some(other) => vec![other.clone()],
                };
                Ok(Self::new(sql, params))
            }
            _ => Err(NodeError::invalid_filter(
                "raw fragments must be strings or {\"sql\", \"params\"} objects",
            )),
        }
    }
}

/// Caller supplied record ordering
pub type RecordComparator = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

/// One entry of the sort chain
#[derive(Clone)]
pub enum SortDirective {
    Field { field: String, ascending: bool },
    Custom(RecordComparator),
}

impl SortDirective {
    pub fn is_custom(&self) -> bool {
        matches!(self, SortDirective::Custom(_))
    }

    fn parse_direction(field: &str, value: &Value) -> NodeResult<Self> {
        let ascending = match value {
            Value::String(dir) if dir.eq_ignore_ascii_case("asc") => true,
            Value::String(dir) if dir.eq_ignore_ascii_case("desc") => false,
            Value::Bool(asc) => *asc,
            Value::Number(n) => n.as_i64().map_or(true, |n| n >= 0),
            _ => {
                return Err(NodeError::invalid_filter(format!(
                    "invalid sort direction for '{}'",
                    field
                )))
            }
        };
        Ok(SortDirective::Field {
            field: field.to_string(),
            ascending,
        })
    }

    /// `"field"`, `"-field"` (descending) or `{"field": "asc" | "desc"}`
    fn from_value(value: &Value, out: &mut Vec<SortDirective>) -> NodeResult<()> {
        match value {
            Value::String(name) => {
                let (field, ascending) = match name.strip_prefix('-') {
                    Some(field) => (field, false),
                    None => (name.as_str(), true),
                };
                out.push(SortDirective::Field {
                    field: field.to_string(),
                    ascending,
                });
            }
            Value::Object(map) => {
                for (field, dir) in map {
                    out.push(Self::parse_direction(field, dir)?);
                }
            }
            Value::Array(items) => {
                for item in items {
                    if item.is_array() {
                        return Err(NodeError::invalid_filter("nested sort lists are not allowed"));
                    }
                    Self::from_value(item, out)?;
                }
            }
            _ => return Err(NodeError::invalid_filter("invalid sort directive")),
        }
        Ok(())
    }
}

impl fmt::Debug for SortDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirective::Field { field, ascending } => f
                .debug_struct("Field")
                .field("field", field)
                .field("ascending", ascending)
                .finish(),
            SortDirective::Custom(_) => f.write_str("Custom(<comparator>)"),
        }
    }
}

/// A parsed filter document
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub collection: Option<String>,
    pub select: Vec<String>,
    pub index_hints: Vec<String>,
    pub raw: Vec<RawFragment>,
    pub limit: Option<Limit>,
    pub sort: Vec<SortDirective>,
    /// Field conditions in document order
    pub fields: Map<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    /// Add a field condition using the filter DSL
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn select<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.select = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    pub fn use_index(mut self, index: impl Into<String>) -> Self {
        self.index_hints.push(index.into());
        self
    }

    pub fn raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.raw.push(RawFragment::new(sql, params));
        self
    }

    pub fn limit(mut self, length: u64) -> Self {
        let offset = self.limit.map_or(0, |l| l.offset);
        self.limit = Some(Limit::new(offset, Some(length)));
        self
    }

    pub fn range(mut self, offset: u64, length: Option<u64>) -> Self {
        self.limit = Some(Limit::new(offset, length));
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortDirective::Field {
            field: field.into(),
            ascending,
        });
        self
    }

    pub fn sort_with<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&Record, &Record) -> Ordering + Send + Sync + 'static,
    {
        self.sort.push(SortDirective::Custom(Arc::new(comparator)));
        self
    }

    pub fn has_custom_sort(&self) -> bool {
        self.sort.iter().any(SortDirective::is_custom)
    }

    /// Parse a JSON filter document
    pub fn from_value(value: &Value) -> NodeResult<Self> {
        let document = value
            .as_object()
            .ok_or_else(|| NodeError::invalid_filter("filter must be a JSON object"))?;
        let mut filter = Filter::new();

        for (key, value) in document {
            match key.as_str() {
                COLLECTION_KEY => {
                    let name = value.as_str().filter(|s| !s.is_empty()).ok_or_else(|| {
                        NodeError::invalid_filter(format!("{} must be a non-empty string", COLLECTION_KEY))
                    })?;
                    filter.collection = Some(name.to_string());
                }
                SELECT_KEY => filter.select = string_list(SELECT_KEY, value)?,
                INDEX_KEY => filter.index_hints = string_list(INDEX_KEY, value)?,
                RAW_KEY => match value {
                    Value::Array(items) => {
                        for item in items {
                            filter.raw.push(RawFragment::from_value(item)?);
                        }
                    }
                    single => filter.raw.push(RawFragment::from_value(single)?),
                },
                LIMITS_KEY => filter.limit = Some(Limit::from_value(value)?),
                SORTER_KEY => SortDirective::from_value(value, &mut filter.sort)?,
                meta if meta.starts_with('@') => {
                    return Err(NodeError::invalid_filter(format!(
                        "unknown meta key '{}'",
                        meta
                    )))
                }
                field => {
                    filter.fields.insert(field.to_string(), value.clone());
                }
            }
        }

        Ok(filter)
    }
}

impl From<&str> for Filter {
    fn from(collection: &str) -> Self {
        Filter::for_collection(collection)
    }
}

impl From<String> for Filter {
    fn from(collection: String) -> Self {
        Filter::for_collection(collection)
    }
}

impl TryFrom<Value> for Filter {
    type Error = NodeError;

    fn try_from(value: Value) -> NodeResult<Self> {
        Filter::from_value(&value)
    }
}

fn string_list(key: &str, value: &Value) -> NodeResult<Vec<String>> {
    let invalid = || NodeError::invalid_filter(format!("{} must be a string or a list of strings", key));
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_meta_keys_and_fields() {
        let filter = Filter::from_value(&json!({
            "@collection": "Widgets",
            "@select": ["sku", "color"],
            "@index": "sku_idx",
            "@raw": { "sql": "`weight` > ?", "params": [1] },
            "@limits": [5, 10],
            "@sorter": ["-sku", { "color": "asc" }],
            "color": "red"
        }))
        .unwrap();

        assert_eq!(filter.collection.as_deref(), Some("Widgets"));
        assert_eq!(filter.select, vec!["sku", "color"]);
        assert_eq!(filter.index_hints, vec!["sku_idx"]);
        assert_eq!(filter.raw, vec![RawFragment::new("`weight` > ?", vec![json!(1)])]);
        assert_eq!(filter.limit, Some(Limit::new(5, Some(10))));
        assert_eq!(filter.sort.len(), 2);
        assert!(matches!(&filter.sort[0], SortDirective::Field { field, ascending: false } if field == "sku"));
        assert_eq!(filter.fields.get("color"), Some(&json!("red")));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(Filter::from_value(&json!([1])).is_err());
        assert!(Filter::from_value(&json!({ "@collection": 5 })).is_err());
        assert!(Filter::from_value(&json!({ "@limits": "ten" })).is_err());
        assert!(Filter::from_value(&json!({ "@limits": [1, 2, 3] })).is_err());
        assert!(Filter::from_value(&json!({ "@unknown": 1 })).is_err());
    }

    #[test]
    fn limit_windows() {
        assert_eq!(Limit::from_value(&json!(3)).unwrap(), Limit::new(0, Some(3)));
        assert_eq!(Limit::from_value(&json!([2, null])).unwrap(), Limit::new(2, None));
        assert_eq!(Limit::new(2, Some(3)).clamp(4), 2);
        assert_eq!(Limit::new(5, None).clamp(4), 0);
        assert_eq!(Limit::new(0, None).to_sql(), format!("LIMIT 0, {}", u64::MAX));
        assert!(Limit::new(1, Some(2)).is_past_end(3));
        assert!(!Limit::new(1, None).is_past_end(100));
    }

    #[test]
    fn builder_composes_conditions() {
        let filter = Filter::for_collection("Widgets")
            .with_field("color", "red")
            .range(1, Some(2))
            .limit(5)
            .sort_with(|a, b| a.len().cmp(&b.len()));

        assert_eq!(filter.limit, Some(Limit::new(1, Some(5))));
        assert!(filter.has_custom_sort());
        assert_eq!(filter.fields.len(), 1);
    }
}
