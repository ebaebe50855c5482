//! Filter value classification
//!
//! A raw filter value is classified exactly once into an [`Expression`]. Both
//! SQL emission and in-process evaluation switch on the variant instead of
//! re-reading the original string.

use crate::error::{NodeError, NodeResult};
use crate::query::filter::REGEX_MARKER;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;

static BOOL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(==|!=)\s*(true|false)$").expect("valid bool pattern"));
static NUMERIC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(<=|>=|==|!=|<|>)?\s*(-?\d+(?:\.\d+)?)$").expect("valid numeric pattern")
});
static DATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(<=|>=|==|!=|<|>)?\s*'(.+)'$").expect("valid date pattern"));
static NULL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(==|!=)=?\s*null$").expect("valid null pattern"));
static DELIMITED_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^/(.+)/([imsux]*)$").expect("valid delimiter pattern"));
static EQUALITY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(==|!=)\s*(.*)$").expect("valid prefix pattern"));

/// Format dates are bound with
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Comparison operators understood by the filter DSL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl Operator {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            "==" | "=" => Some(Operator::Eq),
            "!=" | "<>" => Some(Operator::Ne),
            ">=" => Some(Operator::Ge),
            ">" => Some(Operator::Gt),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Ge => ">=",
            Operator::Gt => ">",
        }
    }

    /// Comparator dispatch table
    pub fn comparator(self) -> fn(Ordering) -> bool {
        match self {
            Operator::Lt => Ordering::is_lt,
            Operator::Le => Ordering::is_le,
            Operator::Eq => Ordering::is_eq,
            Operator::Ne => Ordering::is_ne,
            Operator::Ge => Ordering::is_ge,
            Operator::Gt => Ordering::is_gt,
        }
    }

    /// Whether `left <op> right` holds given `left.cmp(right)`
    pub fn matches(self, ordering: Ordering) -> bool {
        (self.comparator())(ordering)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// One classified filter value
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Bool(bool),
    NumRange(Operator, Number),
    DateRange(Operator, NaiveDateTime),
    /// `true` tests for NULL, `false` for NOT NULL
    NullCheck(bool),
    Regex { pattern: String, flags: String },
    /// Only `Eq` and `Ne`
    StringExact(Operator, String),
    /// SQL LIKE pattern, `*` already rewritten to `%`
    StringLike { pattern: String, negated: bool },
}

impl Expression {
    /// The operator and bound value when this expression can join an
    /// `IN` / `NOT IN` group
    pub fn equality(&self) -> Option<(Operator, Value)> {
        match self {
            Expression::NumRange(op @ (Operator::Eq | Operator::Ne), n) => {
                Some((*op, Value::Number(n.clone())))
            }
            Expression::DateRange(op @ (Operator::Eq | Operator::Ne), d) => {
                Some((*op, Value::String(d.format(DATETIME_FORMAT).to_string())))
            }
            Expression::StringExact(op, s) => Some((*op, Value::String(s.clone()))),
            _ => None,
        }
    }

    /// The parameter bound for this expression in a standalone term
    pub fn param(&self) -> Option<Value> {
        match self {
            Expression::Bool(b) => Some(Value::Bool(*b)),
            Expression::NumRange(_, n) => Some(Value::Number(n.clone())),
            Expression::DateRange(_, d) => {
                Some(Value::String(d.format(DATETIME_FORMAT).to_string()))
            }
            Expression::NullCheck(_) => None,
            Expression::Regex { pattern, flags } => Some(Value::String(inline_flags(pattern, flags))),
            Expression::StringExact(_, s) => Some(Value::String(s.clone())),
            Expression::StringLike { pattern, .. } => Some(Value::String(pattern.clone())),
        }
    }

    /// Standalone SQL term for this expression against an already quoted column
    pub fn to_sql(&self, column: &str) -> String {
        match self {
            Expression::Bool(_) => format!("{} = ?", column),
            Expression::NumRange(op, _)
            | Expression::DateRange(op, _)
            | Expression::StringExact(op, _) => format!("{} {} ?", column, op.sql()),
            Expression::NullCheck(true) => format!("{} IS NULL", column),
            Expression::NullCheck(false) => format!("{} IS NOT NULL", column),
            Expression::Regex { .. } => format!("{} REGEXP ?", column),
            Expression::StringLike { negated: false, .. } => format!("{} LIKE ?", column),
            Expression::StringLike { negated: true, .. } => format!("{} NOT LIKE ?", column),
        }
    }
}

/// One OR'd term of a field's expression set
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    In(Vec<Expression>),
    NotIn(Vec<Expression>),
    Single(Expression),
}

impl Term {
    /// Append this term's SQL and parameters
    pub fn to_sql(&self, column: &str, params: &mut Vec<Value>) -> String {
        match self {
            Term::In(expressions) | Term::NotIn(expressions) => {
                let keyword = if matches!(self, Term::In(_)) { "IN" } else { "NOT IN" };
                let placeholders = expressions
                    .iter()
                    .filter_map(Expression::equality)
                    .map(|(_, value)| {
                        params.push(value);
                        "?"
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} {} ({})", column, keyword, placeholders)
            }
            Term::Single(expression) => {
                if let Some(param) = expression.param() {
                    params.push(param);
                }
                expression.to_sql(column)
            }
        }
    }
}

/// Classifies filter values and groups them into SQL terms
pub struct ExpressionParser;

impl ExpressionParser {
    /// Classify a single scalar filter value
    pub fn parse(value: &Value) -> NodeResult<Expression> {
        match value {
            Value::Bool(b) => Ok(Expression::Bool(*b)),
            Value::Number(n) => Ok(Expression::NumRange(Operator::Eq, n.clone())),
            Value::Null => Ok(Expression::NullCheck(true)),
            Value::String(text) => Ok(Self::parse_str(text)),
            Value::Object(map) => match (map.len(), map.get(REGEX_MARKER)) {
                (1, Some(Value::String(pattern))) => Self::regex_marker(pattern),
                _ => Err(NodeError::invalid_filter(format!(
                    "object filter values must be {{\"{}\": pattern}}",
                    REGEX_MARKER
                ))),
            },
            Value::Array(_) => Err(NodeError::invalid_filter(
                "nested arrays are not valid filter values",
            )),
        }
    }

    /// Classify every value of a field; arrays are OR'd alternatives
    pub fn parse_set(field: &str, value: &Value) -> NodeResult<Vec<Expression>> {
        let values = match value {
            Value::Array(items) if items.is_empty() => {
                return Err(NodeError::invalid_filter(format!(
                    "field '{}' has an empty value list",
                    field
                )))
            }
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            single => vec![single],
        };

        values
            .into_iter()
            .map(|v| {
                Self::parse(v).map_err(|e| match e {
                    NodeError::InvalidFilter(msg) => {
                        NodeError::invalid_filter(format!("field '{}': {}", field, msg))
                    }
                    other => other,
                })
            })
            .collect()
    }

    /// Merge equality expressions into `IN`, inequality into `NOT IN`.
    /// A value in both groups is dropped from `NOT IN`.
    pub fn group(expressions: Vec<Expression>) -> Vec<Term> {
        let mut equal = Vec::new();
        let mut not_equal = Vec::new();
        let mut singles = Vec::new();

        for expression in expressions {
            match expression.equality() {
                Some((Operator::Eq, _)) => equal.push(expression),
                Some(_) => not_equal.push(expression),
                None => singles.push(Term::Single(expression)),
            }
        }

        let equal_values: Vec<Value> = equal
            .iter()
            .filter_map(|e| e.equality().map(|(_, v)| v))
            .collect();
        not_equal.retain(|e| {
            e.equality()
                .map_or(true, |(_, v)| !equal_values.contains(&v))
        });

        let mut terms = Vec::new();
        if !equal.is_empty() {
            terms.push(Term::In(equal));
        }
        if !not_equal.is_empty() {
            terms.push(Term::NotIn(not_equal));
        }
        terms.extend(singles);
        terms
    }

    /// Compile one field into a parenthesised OR of its terms
    pub fn compile_field(column: &str, terms: &[Term], params: &mut Vec<Value>) -> String {
        let parts: Vec<String> = terms.iter().map(|t| t.to_sql(column, params)).collect();
        format!("({})", parts.join(" OR "))
    }

    fn parse_str(text: &str) -> Expression {
        if let Some(caps) = BOOL_PATTERN.captures(text) {
            let value = caps[2].eq_ignore_ascii_case("true");
            return Expression::Bool(if &caps[1] == "!=" { !value } else { value });
        }

        if let Some(caps) = NUMERIC_PATTERN.captures(text) {
            if let Some(number) = parse_number(&caps[2]) {
                let op = caps
                    .get(1)
                    .and_then(|m| Operator::parse(m.as_str()))
                    .unwrap_or(Operator::Eq);
                return Expression::NumRange(op, number);
            }
        }

        if let Some(caps) = DATE_PATTERN.captures(text) {
            if let Some(date) = parse_datetime(&caps[2]) {
                let op = caps
                    .get(1)
                    .and_then(|m| Operator::parse(m.as_str()))
                    .unwrap_or(Operator::Eq);
                return Expression::DateRange(op, date);
            }
        }

        if let Some(caps) = NULL_PATTERN.captures(text) {
            return Expression::NullCheck(&caps[1] == "==");
        }

        if let Some(caps) = DELIMITED_REGEX.captures(text) {
            if build_regex(&caps[1], &caps[2]).is_ok() {
                return Expression::Regex {
                    pattern: caps[1].to_string(),
                    flags: caps[2].to_string(),
                };
            }
        }

        let (op, body) = match EQUALITY_PREFIX.captures(text) {
            Some(caps) => (
                Operator::parse(&caps[1]).unwrap_or(Operator::Eq),
                caps.get(2).map_or("", |m| m.as_str()).to_string(),
            ),
            None => (Operator::Eq, text.to_string()),
        };

        let scanned = scan_wildcards(&body);
        if scanned.has_wildcard {
            Expression::StringLike {
                pattern: scanned.like_pattern,
                negated: op == Operator::Ne,
            }
        } else {
            Expression::StringExact(op, scanned.literal)
        }
    }

    fn regex_marker(pattern: &str) -> NodeResult<Expression> {
        let (body, flags) = match DELIMITED_REGEX.captures(pattern) {
            Some(caps) => (caps[1].to_string(), caps[2].to_string()),
            None => (pattern.to_string(), String::new()),
        };
        build_regex(&body, &flags).map_err(|e| {
            NodeError::invalid_filter(format!("invalid regular expression '{}': {}", pattern, e))
        })?;
        Ok(Expression::Regex {
            pattern: body,
            flags,
        })
    }
}

fn parse_number(text: &str) -> Option<Number> {
    if text.contains('.') {
        return text.parse::<f64>().ok().and_then(Number::from_f64);
    }
    text.parse::<i64>()
        .map(Number::from)
        .ok()
        .or_else(|| text.parse::<f64>().ok().and_then(Number::from_f64))
}

/// Parse the date formats the filter DSL accepts
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in [DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Compile a delimited regex body with its trailing flags
pub fn build_regex(body: &str, flags: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(body)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .unicode(true)
        .build()
}

/// A regex body with its flags moved into a leading `(?flags)` group, the
/// form a `REGEXP` operand accepts
pub fn inline_flags(body: &str, flags: &str) -> String {
    let inline: String = flags.chars().filter(|f| "imsx".contains(*f)).collect();
    if inline.is_empty() {
        body.to_string()
    } else {
        format!("(?{}){}", inline, body)
    }
}

struct Scanned {
    has_wildcard: bool,
    like_pattern: String,
    literal: String,
}

/// Split a DSL string into its LIKE form and its literal form.
/// Backslash escapes a wildcard; `*` is an alias for `%`.
fn scan_wildcards(text: &str) -> Scanned {
    let mut scanned = Scanned {
        has_wildcard: false,
        like_pattern: String::with_capacity(text.len()),
        literal: String::with_capacity(text.len()),
    };
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('%' | '_' | '\\')) => {
                    scanned.like_pattern.push('\\');
                    scanned.like_pattern.push(escaped);
                    scanned.literal.push(escaped);
                }
                Some(escaped) => {
                    scanned.like_pattern.push(escaped);
                    scanned.literal.push(escaped);
                }
                None => {
                    scanned.like_pattern.push_str("\\\\");
                    scanned.literal.push('\\');
                }
            },
            '*' => {
                scanned.has_wildcard = true;
                scanned.like_pattern.push('%');
                scanned.literal.push('*');
            }
            '%' | '_' => {
                scanned.has_wildcard = true;
                scanned.like_pattern.push(c);
                scanned.literal.push(c);
            }
            other => {
                scanned.like_pattern.push(other);
                scanned.literal.push(other);
            }
        }
    }

    scanned
}

/// Translate a SQL LIKE pattern into an anchored, case-insensitive regex
pub fn like_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::from("(?is)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => source.push_str(&regex::escape(&escaped.to_string())),
                None => source.push_str(r"\\"),
            },
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Expression {
        ExpressionParser::parse(&value).unwrap()
    }

    #[test]
    fn classifies_booleans() {
        assert_eq!(parse(json!(true)), Expression::Bool(true));
        assert_eq!(parse(json!("== false")), Expression::Bool(false));
        assert_eq!(parse(json!("!=true")), Expression::Bool(false));
    }

    #[test]
    fn classifies_numeric_ranges() {
        assert_eq!(parse(json!(">=10")), Expression::NumRange(Operator::Ge, 10.into()));
        assert_eq!(parse(json!("< 3")), Expression::NumRange(Operator::Lt, 3.into()));
        assert_eq!(parse(json!("42")), Expression::NumRange(Operator::Eq, 42.into()));
        assert_eq!(parse(json!(7)), Expression::NumRange(Operator::Eq, 7.into()));
        assert!(matches!(parse(json!("!=1.5")), Expression::NumRange(Operator::Ne, _)));
    }

    #[test]
    fn classifies_dates() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            parse(json!(">= '2024-01-31'")),
            Expression::DateRange(Operator::Ge, expected)
        );
        assert!(matches!(
            parse(json!("'2024-01-31 12:30:00'")),
            Expression::DateRange(Operator::Eq, _)
        ));
        // quoted text that is not a date stays a string
        assert_eq!(
            parse(json!("'hello'")),
            Expression::StringExact(Operator::Eq, "'hello'".to_string())
        );
    }

    #[test]
    fn classifies_null_checks() {
        assert_eq!(parse(Value::Null), Expression::NullCheck(true));
        assert_eq!(parse(json!("== NULL")), Expression::NullCheck(true));
        assert_eq!(parse(json!("!==null")), Expression::NullCheck(false));
    }

    #[test]
    fn classifies_regular_expressions() {
        assert_eq!(
            parse(json!("/^ab+c$/i")),
            Expression::Regex {
                pattern: "^ab+c$".to_string(),
                flags: "i".to_string()
            }
        );
        assert_eq!(
            parse(json!({ "@regex": "^x" })),
            Expression::Regex {
                pattern: "^x".to_string(),
                flags: String::new()
            }
        );
        // an unbalanced body is not a regex, and has no wildcard either
        assert_eq!(
            parse(json!("/(/")),
            Expression::StringExact(Operator::Eq, "/(/".to_string())
        );
    }

    #[test]
    fn regex_flags_travel_with_the_bound_pattern() {
        let expression = parse(json!("/^w01$/iu"));
        assert_eq!(expression.to_sql("`sku`"), "`sku` REGEXP ?");
        assert_eq!(expression.param(), Some(json!("(?i)^w01$")));
        assert_eq!(parse(json!({ "@regex": "^x" })).param(), Some(json!("^x")));
        assert!(Regex::new(&inline_flags("^w01$", "ims")).unwrap().is_match("W01"));
    }

    #[test]
    fn rejects_invalid_regex_markers_and_objects() {
        assert!(ExpressionParser::parse(&json!({ "@regex": "(" })).is_err());
        assert!(ExpressionParser::parse(&json!({ "a": 1 })).is_err());
    }

    #[test]
    fn classifies_plain_strings() {
        assert_eq!(
            parse(json!("open")),
            Expression::StringExact(Operator::Eq, "open".to_string())
        );
        assert_eq!(
            parse(json!("!=closed")),
            Expression::StringExact(Operator::Ne, "closed".to_string())
        );
        assert_eq!(
            parse(json!("wid*")),
            Expression::StringLike {
                pattern: "wid%".to_string(),
                negated: false
            }
        );
        assert_eq!(
            parse(json!("!= a_c")),
            Expression::StringLike {
                pattern: "a_c".to_string(),
                negated: true
            }
        );
        assert_eq!(
            parse(json!(r"100\%")),
            Expression::StringExact(Operator::Eq, "100%".to_string())
        );
    }

    #[test]
    fn nested_arrays_are_rejected() {
        let err = ExpressionParser::parse_set("tags", &json!([["a", "b"]])).unwrap_err();
        assert!(matches!(err, NodeError::InvalidFilter(msg) if msg.contains("tags")));
    }

    #[test]
    fn equality_values_merge_into_in() {
        let expressions = ExpressionParser::parse_set("status", &json!(["open", "pending"])).unwrap();
        let terms = ExpressionParser::group(expressions);
        let mut params = Vec::new();
        let sql = ExpressionParser::compile_field("`status`", &terms, &mut params);
        assert_eq!(sql, "(`status` IN (?, ?))");
        assert_eq!(params, vec![json!("open"), json!("pending")]);
    }

    #[test]
    fn equality_wins_over_inequality() {
        let expressions =
            ExpressionParser::parse_set("n", &json!(["!=3", "3", "!=4", ">10"])).unwrap();
        let terms = ExpressionParser::group(expressions);
        let mut params = Vec::new();
        let sql = ExpressionParser::compile_field("`n`", &terms, &mut params);
        assert_eq!(sql, "(`n` IN (?) OR `n` NOT IN (?) OR `n` > ?)");
        assert_eq!(params, vec![json!(3), json!(4), json!(10)]);
    }

    #[test]
    fn standalone_terms_keep_their_operators() {
        let expressions =
            ExpressionParser::parse_set("name", &json!(["a*", null, "/^z/"])).unwrap();
        let terms = ExpressionParser::group(expressions);
        let mut params = Vec::new();
        let sql = ExpressionParser::compile_field("`name`", &terms, &mut params);
        assert_eq!(sql, "(`name` LIKE ? OR `name` IS NULL OR `name` REGEXP ?)");
        assert_eq!(params, vec![json!("a%"), json!("^z")]);
    }

    #[test]
    fn comparator_table_dispatches_by_operator() {
        assert!(Operator::Ge.matches(Ordering::Equal));
        assert!(!Operator::Gt.matches(Ordering::Equal));
        assert!(Operator::Ne.matches(Ordering::Less));
        assert!(Operator::Le.matches(Ordering::Less));
    }

    #[test]
    fn like_patterns_translate_to_regex() {
        let re = like_to_regex("wid%_x").unwrap();
        assert!(re.is_match("WIDGETS_x"));
        assert!(!re.is_match("wid"));
        let escaped = like_to_regex(r"100\%").unwrap();
        assert!(escaped.is_match("100%"));
        assert!(!escaped.is_match("1000"));
    }
}
