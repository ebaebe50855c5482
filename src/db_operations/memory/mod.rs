//! In-memory connection provider
//!
//! Executes the MySQL-flavored statements the engine emits against tables
//! held in memory. Used by the test suites and by callers that want an engine
//! without a server. The database is shared between every connection the
//! factory opens, and records an execution log plus prepare counter so tests
//! can observe caching behavior.

mod parser;

use super::provider::{
    ConnectionFactory, ConnectionProvider, DriverError, ExecuteResult, Row, StatementHandle,
    StatementOptions,
};
use crate::config::ConnectionProfile;
use crate::query::like_to_regex;
use parser::{Expr, Operand, ParsedStatement, Projection, Statement};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

const TABLE_MISSING: &str = "42S02";
const COLUMN_MISSING: &str = "42S22";
const DUPLICATE_KEY: &str = "23000";
const GENERAL_ERROR: &str = "HY000";
const PARAMETER_MISMATCH: &str = "HY093";
const COLUMN_COUNT_MISMATCH: &str = "21S01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKey {
    Primary,
    Unique,
    Index,
    None,
}

/// Column definition of an in-memory table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub key: ColumnKey,
    pub auto_increment: bool,
}

impl ColumnDef {
    /// A nullable, unkeyed `varchar(255)` column
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: "varchar(255)".to_string(),
            nullable: true,
            key: ColumnKey::None,
            auto_increment: false,
        }
    }

    pub fn with_type(mut self, sql_type: &str) -> Self {
        self.sql_type = sql_type.to_string();
        self
    }

    pub fn primary(mut self) -> Self {
        self.key = ColumnKey::Primary;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.key = ColumnKey::Unique;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.key = ColumnKey::Index;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.sql_type = "int(11)".to_string();
        self
    }

    fn key_text(&self) -> &'static str {
        match self.key {
            ColumnKey::Primary => "PRI",
            ColumnKey::Unique => "UNI",
            ColumnKey::Index => "MUL",
            ColumnKey::None => "",
        }
    }

    fn is_unique(&self) -> bool {
        matches!(self.key, ColumnKey::Primary | ColumnKey::Unique)
    }
}

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
    next_id: u64,
}

impl MemoryTable {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn blank_row(&self) -> Row {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), Value::Null))
            .collect()
    }

    fn bump_auto_increment(&mut self, row: &Row) {
        for column in self.columns.iter().filter(|c| c.auto_increment) {
            if let Some(id) = row.get(&column.name).and_then(Value::as_u64) {
                self.next_id = self.next_id.max(id + 1);
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    log: Vec<String>,
    prepared: usize,
    connections_opened: usize,
    offline: bool,
    unlock_failures: u32,
    pending_failure: Option<DriverError>,
    locked_tables: Vec<String>,
}

/// Shared in-memory database
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create (or replace) a table
    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) {
        self.state().tables.insert(
            name.to_string(),
            MemoryTable {
                columns,
                rows: Vec::new(),
                next_id: 1,
            },
        );
    }

    pub fn drop_table(&self, name: &str) {
        self.state().tables.remove(name);
    }

    /// Insert rows directly, bypassing key constraints
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut state = self.state();
        if let Some(table) = state.tables.get_mut(table) {
            for row in rows {
                let mut stored = table.blank_row();
                for (column, value) in row {
                    if table.has_column(&column) {
                        stored.insert(column, value);
                    }
                }
                for column in table.columns.iter().filter(|c| c.auto_increment) {
                    if stored.get(&column.name).map_or(true, Value::is_null) {
                        stored.insert(column.name.clone(), Value::from(table.next_id));
                    }
                }
                table.bump_auto_increment(&stored);
                table.rows.push(stored);
            }
        }
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Every statement executed so far, in order
    pub fn executed_sql(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Number of statements prepared across all connections
    pub fn prepare_count(&self) -> usize {
        self.state().prepared
    }

    pub fn connections_opened(&self) -> usize {
        self.state().connections_opened
    }

    /// While offline, connecting and executing fail with connection errors
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make the next `count` `UNLOCK TABLES` statements fail
    pub fn fail_unlocks(&self, count: u32) {
        self.state().unlock_failures = count;
    }

    /// Make the next executed statement fail with `error`
    pub fn fail_next_execute(&self, error: DriverError) {
        self.state().pending_failure = Some(error);
    }

    pub fn locked_tables(&self) -> Vec<String> {
        self.state().locked_tables.clone()
    }
}

impl ConnectionFactory for MemoryDatabase {
    fn connect(
        &self,
        _profile: &ConnectionProfile,
    ) -> Result<Box<dyn ConnectionProvider>, DriverError> {
        let mut state = self.state();
        if state.offline {
            return Err(DriverError::connection("in-memory database is offline"));
        }
        state.connections_opened += 1;
        Ok(Box::new(MemoryConnection {
            db: self.clone(),
            statements: HashMap::new(),
            next_handle: 1,
            snapshot: None,
        }))
    }
}

struct PreparedStatement {
    parsed: ParsedStatement,
    sql: String,
    pending: VecDeque<Row>,
}

/// One connection to a [`MemoryDatabase`]
pub struct MemoryConnection {
    db: MemoryDatabase,
    statements: HashMap<u64, PreparedStatement>,
    next_handle: u64,
    snapshot: Option<BTreeMap<String, MemoryTable>>,
}

impl MemoryConnection {
    fn online(&self) -> Result<MutexGuard<'_, MemoryState>, DriverError> {
        let state = self.db.state();
        if state.offline {
            return Err(DriverError::connection("in-memory database is offline"));
        }
        Ok(state)
    }

    fn statement(&mut self, handle: StatementHandle) -> Result<&mut PreparedStatement, DriverError> {
        self.statements
            .get_mut(&handle.0)
            .ok_or_else(|| DriverError::statement(GENERAL_ERROR, "unknown statement handle"))
    }
}

impl ConnectionProvider for MemoryConnection {
    fn prepare(
        &mut self,
        sql: &str,
        _options: &StatementOptions,
    ) -> Result<StatementHandle, DriverError> {
        let parsed = parser::parse(sql)?;
        self.online()?.prepared += 1;

        let handle = self.next_handle;
        self.next_handle += 1;
        self.statements.insert(
            handle,
            PreparedStatement {
                parsed,
                sql: sql.to_string(),
                pending: VecDeque::new(),
            },
        );
        Ok(StatementHandle(handle))
    }

    fn execute(
        &mut self,
        handle: StatementHandle,
        params: &[Value],
    ) -> Result<ExecuteResult, DriverError> {
        let db = self.db.clone();
        let statement = self.statement(handle)?;
        statement.pending.clear();

        if statement.parsed.placeholders != params.len() {
            return Err(DriverError::statement(
                PARAMETER_MISMATCH,
                format!(
                    "statement expects {} parameters, {} bound",
                    statement.parsed.placeholders,
                    params.len()
                ),
            ));
        }

        let mut state = db.state();
        if state.offline {
            return Err(DriverError::connection("in-memory database is offline"));
        }
        state.log.push(statement.sql.clone());
        if let Some(error) = state.pending_failure.take() {
            return Err(error);
        }

        let (rows, result) = run(&mut state, &statement.parsed.statement, params)?;
        statement.pending = rows.into();
        Ok(result)
    }

    fn fetch(&mut self, handle: StatementHandle) -> Result<Option<Row>, DriverError> {
        self.online()?;
        Ok(self.statement(handle)?.pending.pop_front())
    }

    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        let tables = self.online()?.tables.clone();
        if self.snapshot.is_some() {
            return Err(DriverError::statement(
                GENERAL_ERROR,
                "a transaction is already active",
            ));
        }
        self.snapshot = Some(tables);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.online()?;
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| DriverError::statement(GENERAL_ERROR, "no active transaction"))
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| DriverError::statement(GENERAL_ERROR, "no active transaction"))?;
        self.online()?.tables = snapshot;
        Ok(())
    }
}

fn table_missing(name: &str) -> DriverError {
    DriverError::statement(TABLE_MISSING, format!("Table '{}' doesn't exist", name))
}

fn run(
    state: &mut MemoryState,
    statement: &Statement,
    params: &[Value],
) -> Result<(Vec<Row>, ExecuteResult), DriverError> {
    match statement {
        Statement::ShowTables => {
            let rows = state
                .tables
                .keys()
                .map(|name| {
                    let mut row = Row::new();
                    row.insert("Tables_in_memory".to_string(), Value::String(name.clone()));
                    row
                })
                .collect();
            Ok((rows, ExecuteResult::default()))
        }
        Statement::ShowColumns { table } => {
            let table = state.tables.get(table).ok_or_else(|| table_missing(table))?;
            let rows = table
                .columns
                .iter()
                .map(|c| {
                    let mut row = Row::new();
                    row.insert("Field".to_string(), Value::String(c.name.clone()));
                    row.insert("Type".to_string(), Value::String(c.sql_type.clone()));
                    row.insert(
                        "Null".to_string(),
                        Value::String(if c.nullable { "YES" } else { "NO" }.to_string()),
                    );
                    row.insert("Key".to_string(), Value::String(c.key_text().to_string()));
                    row.insert("Default".to_string(), Value::Null);
                    row.insert(
                        "Extra".to_string(),
                        Value::String(if c.auto_increment { "auto_increment" } else { "" }.to_string()),
                    );
                    row
                })
                .collect();
            Ok((rows, ExecuteResult::default()))
        }
        Statement::Select {
            table,
            projection,
            filter,
            order,
            limit,
        } => {
            let table_name = table;
            let table = state
                .tables
                .get(table_name)
                .ok_or_else(|| table_missing(table_name))?;

            let mut rows = Vec::new();
            for row in &table.rows {
                if matches_filter(filter.as_ref(), row, params)? {
                    rows.push(row.clone());
                }
            }

            for (column, _) in order {
                if !table.has_column(column) {
                    return Err(unknown_column(column));
                }
            }
            rows.sort_by(|a, b| {
                for (column, ascending) in order {
                    let ordering = order_values(
                        a.get(column).unwrap_or(&Value::Null),
                        b.get(column).unwrap_or(&Value::Null),
                    );
                    let ordering = if *ascending { ordering } else { ordering.reverse() };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });

            if let Projection::Count = projection {
                let mut row = Row::new();
                row.insert("COUNT(*)".to_string(), Value::from(rows.len() as u64));
                return Ok((vec![row], ExecuteResult::default()));
            }

            if let Some((offset, count)) = limit {
                rows = rows
                    .into_iter()
                    .skip(usize::try_from(*offset).unwrap_or(usize::MAX))
                    .take(usize::try_from(*count).unwrap_or(usize::MAX))
                    .collect();
            }

            if let Projection::Columns(columns) = projection {
                for column in columns {
                    if !table.has_column(column) {
                        return Err(unknown_column(column));
                    }
                }
                rows = rows
                    .into_iter()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                            .collect()
                    })
                    .collect();
            }

            Ok((rows, ExecuteResult::default()))
        }
        Statement::Insert {
            table,
            columns,
            values,
            on_duplicate,
        } => {
            let table_name = table;
            let table = state
                .tables
                .get_mut(table_name)
                .ok_or_else(|| table_missing(table_name))?;
            if columns.len() != values.len() {
                return Err(DriverError::statement(
                    COLUMN_COUNT_MISMATCH,
                    "Column count doesn't match value count",
                ));
            }

            let blank = table.blank_row();
            let mut inserted = blank.clone();
            for (column, operand) in columns.iter().zip(values) {
                if !table.has_column(column) {
                    return Err(unknown_column(column));
                }
                inserted.insert(column.clone(), operand_value(operand, &blank, params));
            }

            let conflict = table.rows.iter().position(|existing| {
                table.columns.iter().filter(|c| c.is_unique()).any(|c| {
                    let new_value = inserted.get(&c.name).unwrap_or(&Value::Null);
                    !new_value.is_null()
                        && compare_values(new_value, existing.get(&c.name).unwrap_or(&Value::Null))
                            == Some(Ordering::Equal)
                })
            });

            match conflict {
                Some(index) if !on_duplicate.is_empty() => {
                    let before = table.rows[index].clone();
                    let mut updated = before.clone();
                    for (column, operand) in on_duplicate {
                        if !table.has_column(column) {
                            return Err(unknown_column(column));
                        }
                        let value = match operand {
                            Operand::Inserted(source) => {
                                inserted.get(source).cloned().unwrap_or(Value::Null)
                            }
                            other => operand_value(other, &before, params),
                        };
                        updated.insert(column.clone(), value);
                    }
                    let changed = updated != before;
                    table.rows[index] = updated;
                    Ok((
                        Vec::new(),
                        ExecuteResult {
                            affected_rows: if changed { 2 } else { 0 },
                            last_insert_id: None,
                        },
                    ))
                }
                Some(_) => Err(DriverError::statement(DUPLICATE_KEY, "Duplicate entry")),
                None => {
                    for column in &table.columns {
                        let value = inserted.get(&column.name).unwrap_or(&Value::Null);
                        if value.is_null() && !column.nullable && !column.auto_increment {
                            return Err(DriverError::statement(
                                DUPLICATE_KEY,
                                format!("Column '{}' cannot be null", column.name),
                            ));
                        }
                    }

                    let mut last_insert_id = None;
                    for column in table.columns.iter().filter(|c| c.auto_increment) {
                        if inserted.get(&column.name).map_or(true, Value::is_null) {
                            inserted.insert(column.name.clone(), Value::from(table.next_id));
                            last_insert_id = Some(table.next_id);
                        }
                    }
                    table.bump_auto_increment(&inserted);
                    table.rows.push(inserted);
                    Ok((
                        Vec::new(),
                        ExecuteResult {
                            affected_rows: 1,
                            last_insert_id,
                        },
                    ))
                }
            }
        }
        Statement::Delete { table, filter } => {
            let table_name = table;
            let table = state
                .tables
                .get_mut(table_name)
                .ok_or_else(|| table_missing(table_name))?;
            let before = table.rows.len();
            let mut kept = Vec::with_capacity(before);
            for row in table.rows.drain(..) {
                if !matches_filter(filter.as_ref(), &row, params)? {
                    kept.push(row);
                }
            }
            let removed = before - kept.len();
            table.rows = kept;
            Ok((
                Vec::new(),
                ExecuteResult {
                    affected_rows: removed as u64,
                    last_insert_id: None,
                },
            ))
        }
        Statement::LockTables { tables } => {
            for table in tables {
                if !state.tables.contains_key(table) {
                    return Err(table_missing(table));
                }
            }
            state.locked_tables = tables.clone();
            Ok((Vec::new(), ExecuteResult::default()))
        }
        Statement::UnlockTables => {
            if state.unlock_failures > 0 {
                state.unlock_failures -= 1;
                return Err(DriverError::statement(
                    GENERAL_ERROR,
                    "Lock wait timeout exceeded while releasing tables",
                ));
            }
            state.locked_tables.clear();
            Ok((Vec::new(), ExecuteResult::default()))
        }
    }
}

fn unknown_column(name: &str) -> DriverError {
    DriverError::statement(COLUMN_MISSING, format!("Unknown column '{}'", name))
}

fn operand_value(operand: &Operand, row: &Row, params: &[Value]) -> Value {
    match operand {
        Operand::Column(name) | Operand::Inserted(name) => {
            row.get(name).cloned().unwrap_or(Value::Null)
        }
        Operand::Param(index) => params.get(*index).cloned().unwrap_or(Value::Null),
        Operand::Literal(value) => value.clone(),
    }
}

fn matches_filter(filter: Option<&Expr>, row: &Row, params: &[Value]) -> Result<bool, DriverError> {
    match filter {
        Some(expr) => Ok(eval(expr, row, params)? == Some(true)),
        None => Ok(true),
    }
}

/// Three-valued evaluation; `None` is SQL UNKNOWN
fn eval(expr: &Expr, row: &Row, params: &[Value]) -> Result<Option<bool>, DriverError> {
    Ok(match expr {
        Expr::And(left, right) => match (eval(left, row, params)?, eval(right, row, params)?) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Expr::Or(left, right) => match (eval(left, row, params)?, eval(right, row, params)?) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Expr::Not(inner) => eval(inner, row, params)?.map(|b| !b),
        Expr::Compare(left, op, right) => {
            let left = operand_value(left, row, params);
            let right = operand_value(right, row, params);
            compare_values(&left, &right).map(|ordering| op.matches(ordering))
        }
        Expr::InList {
            operand,
            list,
            negated,
        } => {
            let value = operand_value(operand, row, params);
            if value.is_null() {
                None
            } else {
                let mut saw_null = false;
                let mut found = false;
                for item in list {
                    let item = operand_value(item, row, params);
                    match compare_values(&value, &item) {
                        Some(Ordering::Equal) => {
                            found = true;
                            break;
                        }
                        None => saw_null = true,
                        _ => {}
                    }
                }
                if found {
                    Some(!negated)
                } else if saw_null {
                    None
                } else {
                    Some(*negated)
                }
            }
        }
        Expr::IsNull { operand, negated } => {
            Some(operand_value(operand, row, params).is_null() != *negated)
        }
        Expr::Like {
            operand,
            pattern,
            negated,
        } => {
            let value = operand_value(operand, row, params);
            let pattern = operand_value(pattern, row, params);
            match (text_of(&value), text_of(&pattern)) {
                (Some(value), Some(pattern)) => {
                    let regex = like_to_regex(&pattern).map_err(|e| {
                        DriverError::statement(GENERAL_ERROR, format!("bad LIKE pattern: {}", e))
                    })?;
                    Some(regex.is_match(&value) != *negated)
                }
                _ => None,
            }
        }
        Expr::Regexp {
            operand,
            pattern,
            negated,
        } => {
            let value = operand_value(operand, row, params);
            let pattern = operand_value(pattern, row, params);
            match (text_of(&value), text_of(&pattern)) {
                (Some(value), Some(pattern)) => {
                    let regex = Regex::new(&pattern).map_err(|e| {
                        DriverError::statement(GENERAL_ERROR, format!("bad regular expression: {}", e))
                    })?;
                    Some(regex.is_match(&value) != *negated)
                }
                _ => None,
            }
        }
    })
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// SQL comparison: NULL compares as unknown, numbers compare numerically
/// (numeric strings included), everything else as text.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (numeric(left), numeric(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(text_of(left)?.cmp(&text_of(right)?)),
        },
    }
}

fn order_values(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => compare_values(left, right).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widgets() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_table(
            "Widgets",
            vec![
                ColumnDef::new("id").primary().auto_increment(),
                ColumnDef::new("sku").unique(),
                ColumnDef::new("age").with_type("int(11)"),
            ],
        );
        db
    }

    fn connect(db: &MemoryDatabase) -> Box<dyn ConnectionProvider> {
        db.connect(&ConnectionProfile::new("default", "")).unwrap()
    }

    fn all(conn: &mut dyn ConnectionProvider, handle: StatementHandle) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Some(row) = conn.fetch(handle).unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn insert_assigns_ids_and_upserts_on_unique_keys() {
        let db = widgets();
        let mut conn = connect(&db);
        let sql = "INSERT INTO `Widgets` (`sku`, `age`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `age` = VALUES(`age`)";
        let stmt = conn.prepare(sql, &StatementOptions::new()).unwrap();

        let first = conn.execute(stmt, &[json!("A1"), json!(5)]).unwrap();
        assert_eq!(first, ExecuteResult { affected_rows: 1, last_insert_id: Some(1) });

        let second = conn.execute(stmt, &[json!("A1"), json!(7)]).unwrap();
        assert_eq!(second.affected_rows, 2);

        let unchanged = conn.execute(stmt, &[json!("A1"), json!(7)]).unwrap();
        assert_eq!(unchanged.affected_rows, 0);

        let rows = db.rows("Widgets");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["age"], json!(7));
    }

    #[test]
    fn select_filters_orders_and_limits() {
        let db = widgets();
        db.seed(
            "Widgets",
            [5, 20, 10, 15]
                .iter()
                .map(|age| json!({ "age": age }).as_object().cloned().unwrap())
                .collect(),
        );
        let mut conn = connect(&db);
        let stmt = conn
            .prepare(
                "SELECT `age` FROM `Widgets` WHERE (`age` >= ?) ORDER BY `age` DESC LIMIT 1, 2",
                &StatementOptions::new(),
            )
            .unwrap();
        conn.execute(stmt, &[json!(10)]).unwrap();
        let ages: Vec<Value> = all(conn.as_mut(), stmt).into_iter().map(|r| r["age"].clone()).collect();
        assert_eq!(ages, vec![json!(15), json!(10)]);
    }

    #[test]
    fn null_semantics_follow_sql() {
        let db = widgets();
        db.seed("Widgets", vec![json!({ "sku": null }).as_object().cloned().unwrap()]);
        let mut conn = connect(&db);
        let stmt = conn
            .prepare(
                "SELECT COUNT(*) FROM `Widgets` WHERE `sku` NOT IN (?)",
                &StatementOptions::new(),
            )
            .unwrap();
        conn.execute(stmt, &[json!("A1")]).unwrap();
        assert_eq!(all(conn.as_mut(), stmt)[0]["COUNT(*)"], json!(0));
    }

    #[test]
    fn parameter_count_is_checked() {
        let db = widgets();
        let mut conn = connect(&db);
        let stmt = conn
            .prepare("DELETE FROM `Widgets` WHERE `id` = ?", &StatementOptions::new())
            .unwrap();
        let err = conn.execute(stmt, &[]).unwrap_err();
        assert_eq!(err.sql_state, "HY093");
    }

    #[test]
    fn rollback_restores_tables() {
        let db = widgets();
        let mut conn = connect(&db);
        conn.begin_transaction().unwrap();
        let stmt = conn
            .prepare("INSERT INTO `Widgets` (`sku`) VALUES (?)", &StatementOptions::new())
            .unwrap();
        conn.execute(stmt, &[json!("B2")]).unwrap();
        assert_eq!(db.rows("Widgets").len(), 1);
        conn.rollback().unwrap();
        assert!(db.rows("Widgets").is_empty());
    }

    #[test]
    fn offline_database_refuses_connections() {
        let db = widgets();
        db.set_offline(true);
        assert!(db.connect(&ConnectionProfile::new("default", "")).is_err());
    }
}
