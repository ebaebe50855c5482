//! In-process evaluation of filter conditions
//!
//! Fields that have no physical column cannot be pushed into SQL. Their
//! conditions are compiled once into a [`RecordMatcher`] and evaluated against
//! every decoded record, with the same term grouping the SQL compiler uses.

use crate::error::{NodeError, NodeResult};
use crate::query::expression::{build_regex, like_to_regex, parse_datetime, Expression, ExpressionParser, Term};
use crate::query::filter::{Filter, SortDirective};
use crate::Record;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// An expression with its pattern compiled
#[derive(Debug)]
struct CompiledExpression {
    expression: Expression,
    pattern: Option<Regex>,
}

impl CompiledExpression {
    fn new(expression: Expression) -> NodeResult<Self> {
        let pattern = match &expression {
            Expression::Regex { pattern, flags } => Some(build_regex(pattern, flags)),
            Expression::StringLike { pattern, .. } => Some(like_to_regex(pattern)),
            _ => None,
        }
        .transpose()
        .map_err(|e| NodeError::invalid_filter(format!("invalid pattern: {}", e)))?;

        Ok(Self {
            expression,
            pattern,
        })
    }

    fn test(&self, value: &Value) -> bool {
        match &self.expression {
            Expression::Bool(expected) => !value.is_null() && truthy(value) == *expected,
            Expression::NumRange(op, number) => match (as_f64(value), number.as_f64()) {
                (Some(actual), Some(expected)) => actual
                    .partial_cmp(&expected)
                    .map_or(false, |ordering| op.matches(ordering)),
                _ => false,
            },
            Expression::DateRange(op, expected) => value
                .as_str()
                .and_then(parse_datetime)
                .map_or(false, |actual| op.matches(actual.cmp(expected))),
            Expression::NullCheck(is_null) => value.is_null() == *is_null,
            Expression::Regex { .. } => self.pattern_matches(value),
            Expression::StringLike { negated, .. } => {
                !value.is_null() && self.pattern_matches(value) != *negated
            }
            Expression::StringExact(op, expected) => match text_of(value) {
                Some(actual) => op.matches(actual.as_str().cmp(expected.as_str())),
                None => false,
            },
        }
    }

    fn pattern_matches(&self, value: &Value) -> bool {
        match (&self.pattern, text_of(value)) {
            (Some(pattern), Some(text)) => pattern.is_match(&text),
            _ => false,
        }
    }
}

#[derive(Debug)]
enum CompiledTerm {
    In(Vec<CompiledExpression>),
    NotIn(Vec<CompiledExpression>),
    Single(CompiledExpression),
}

impl CompiledTerm {
    fn new(term: Term) -> NodeResult<Self> {
        let compile_all = |expressions: Vec<Expression>| {
            expressions
                .into_iter()
                .map(CompiledExpression::new)
                .collect::<NodeResult<Vec<_>>>()
        };
        Ok(match term {
            Term::In(expressions) => CompiledTerm::In(compile_all(expressions)?),
            Term::NotIn(expressions) => CompiledTerm::NotIn(compile_all(expressions)?),
            Term::Single(expression) => CompiledTerm::Single(CompiledExpression::new(expression)?),
        })
    }

    fn test_scalar(&self, value: &Value) -> bool {
        match self {
            CompiledTerm::In(expressions) => expressions.iter().any(|e| e.test(value)),
            CompiledTerm::NotIn(expressions) => {
                !value.is_null() && expressions.iter().all(|e| e.test(value))
            }
            CompiledTerm::Single(expression) => expression.test(value),
        }
    }

    /// Array values match when any element matches
    fn test(&self, value: &Value) -> bool {
        match value {
            Value::Array(items) => items.iter().any(|item| self.test_scalar(item)),
            scalar => self.test_scalar(scalar),
        }
    }
}

#[derive(Debug)]
struct FieldMatcher {
    field: String,
    terms: Vec<CompiledTerm>,
}

/// Evaluates the field conditions of a filter against decoded records
#[derive(Debug, Default)]
pub struct RecordMatcher {
    fields: Vec<FieldMatcher>,
}

impl RecordMatcher {
    pub fn new(filter: &Filter) -> NodeResult<Self> {
        let fields = filter
            .fields
            .iter()
            .map(|(field, value)| {
                let terms = ExpressionParser::group(ExpressionParser::parse_set(field, value)?)
                    .into_iter()
                    .map(CompiledTerm::new)
                    .collect::<NodeResult<Vec<_>>>()?;
                Ok(FieldMatcher {
                    field: field.clone(),
                    terms,
                })
            })
            .collect::<NodeResult<Vec<_>>>()?;

        Ok(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields are AND'ed, terms within a field OR'ed. A missing field is NULL.
    pub fn matches(&self, record: &Record) -> bool {
        self.fields.iter().all(|matcher| {
            let value = record.get(&matcher.field).unwrap_or(&Value::Null);
            matcher.terms.iter().any(|term| term.test(value))
        })
    }
}

/// Orders two JSON values the way a result set sorts: NULL first, numbers
/// numerically, strings lexically
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => left.to_string().cmp(&right.to_string()),
        },
    }
}

/// Apply a sort chain; the first non-equal directive decides
pub fn compare_records(sorters: &[SortDirective], left: &Record, right: &Record) -> Ordering {
    for directive in sorters {
        let ordering = match directive {
            SortDirective::Field { field, ascending } => {
                let ordering = compare_values(
                    left.get(field).unwrap_or(&Value::Null),
                    right.get(field).unwrap_or(&Value::Null),
                );
                if *ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            }
            SortDirective::Custom(comparator) => comparator(left, right),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test records must be objects"),
        }
    }

    fn matcher(conditions: Value) -> RecordMatcher {
        let mut document = conditions;
        document["@collection"] = json!("Widgets");
        RecordMatcher::new(&Filter::from_value(&document).unwrap()).unwrap()
    }

    #[test]
    fn numeric_operators() {
        let m = matcher(json!({ "weight": ">=1.5" }));
        assert!(m.matches(&record(json!({ "weight": 1.5 }))));
        assert!(m.matches(&record(json!({ "weight": "2" }))));
        assert!(!m.matches(&record(json!({ "weight": 1.2 }))));
        assert!(!m.matches(&record(json!({}))));
    }

    #[test]
    fn in_and_not_in_groups() {
        let m = matcher(json!({ "color": ["red", "blue"] }));
        assert!(m.matches(&record(json!({ "color": "blue" }))));
        assert!(!m.matches(&record(json!({ "color": "green" }))));

        let m = matcher(json!({ "color": ["!=red", "!=blue"] }));
        assert!(m.matches(&record(json!({ "color": "green" }))));
        assert!(!m.matches(&record(json!({ "color": "red" }))));
        // NULL is never NOT IN anything
        assert!(!m.matches(&record(json!({ "color": null }))));
    }

    #[test]
    fn patterns_and_null_checks() {
        let m = matcher(json!({ "name": "wid*" }));
        assert!(m.matches(&record(json!({ "name": "Widget" }))));
        assert!(!m.matches(&record(json!({ "name": "gadget" }))));

        let m = matcher(json!({ "name": "/^g.d/" }));
        assert!(m.matches(&record(json!({ "name": "gadget" }))));

        let m = matcher(json!({ "note": null }));
        assert!(m.matches(&record(json!({ "name": "x" }))));
        assert!(!m.matches(&record(json!({ "note": "set" }))));
    }

    #[test]
    fn dates_and_booleans() {
        let m = matcher(json!({ "created": "< '2024-06-01'", "active": true }));
        assert!(m.matches(&record(json!({ "created": "2024-05-31 23:59:59", "active": true }))));
        assert!(!m.matches(&record(json!({ "created": "2024-06-01", "active": true }))));
        assert!(!m.matches(&record(json!({ "created": "2024-01-01", "active": false }))));
    }

    #[test]
    fn array_values_match_any_element() {
        let m = matcher(json!({ "tags": "sale" }));
        assert!(m.matches(&record(json!({ "tags": ["new", "sale"] }))));
        assert!(!m.matches(&record(json!({ "tags": ["new"] }))));
    }

    #[test]
    fn sort_chain_falls_through_on_ties() {
        let sorters = vec![
            SortDirective::Field { field: "a".into(), ascending: true },
            SortDirective::Field { field: "b".into(), ascending: false },
        ];
        let x = record(json!({ "a": 1, "b": 1 }));
        let y = record(json!({ "a": 1, "b": 2 }));
        assert_eq!(compare_records(&sorters, &x, &y), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
    }
}
