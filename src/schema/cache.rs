use super::column::{Column, KeyRole};
use super::errors::SchemaError;
use crate::db_operations::error_utils::ErrorUtils;
use crate::db_operations::ConnectionManager;
use crate::error::NodeResult;
use crate::query::quote_identifier;
use crate::log_schema_debug;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct CacheState {
    tables: Option<BTreeSet<String>>,
    columns: HashMap<String, Vec<Column>>,
    refreshed_at: Instant,
}

impl CacheState {
    fn new() -> Self {
        Self {
            tables: None,
            columns: HashMap::new(),
            refreshed_at: Instant::now(),
        }
    }
}

/// Per-profile cache of table names and column metadata.
///
/// Column metadata expires after the configured TTL; the table list lives
/// until explicitly invalidated.
pub struct SchemaCache {
    connections: Arc<ConnectionManager>,
    profile: String,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl SchemaCache {
    pub fn new(connections: Arc<ConnectionManager>, profile: impl Into<String>, ttl: Duration) -> Self {
        Self {
            connections,
            profile: profile.into(),
            ttl,
            state: Mutex::new(CacheState::new()),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// All table names, loaded with `SHOW TABLES` on first use
    pub fn tables(&self) -> NodeResult<Vec<String>> {
        let mut state = self.lock_state()?;
        Ok(self.load_tables(&mut state)?.iter().cloned().collect())
    }

    pub fn has_table(&self, table: &str) -> NodeResult<bool> {
        let mut state = self.lock_state()?;
        Ok(self.load_tables(&mut state)?.contains(table))
    }

    /// Columns of `table` in table order, optionally narrowed to columns
    /// holding one of the given key roles
    pub fn get_columns(&self, table: &str, key_filter: Option<&[KeyRole]>) -> NodeResult<Vec<Column>> {
        let mut state = self.lock_state()?;

        if state.refreshed_at.elapsed() >= self.ttl {
            log_schema_debug!("Column cache for profile '{}' expired", self.profile);
            state.columns.clear();
            state.refreshed_at = Instant::now();
        }

        if !self.load_tables(&mut state)?.contains(table) {
            return Err(SchemaError::TableNotFound(table.to_string()).into());
        }

        if !state.columns.contains_key(table) {
            let columns = self.introspect(table)?;
            state.columns.insert(table.to_string(), columns);
        }

        let columns = state.columns.get(table).cloned().unwrap_or_default();
        Ok(match key_filter {
            Some(roles) => columns
                .into_iter()
                .filter(|c| roles.iter().any(|role| c.key_roles.contains(role)))
                .collect(),
            None => columns,
        })
    }

    /// Drop cached metadata for one table, or everything when `table` is None
    pub fn invalidate(&self, table: Option<&str>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match table {
            Some(table) => {
                state.columns.remove(table);
            }
            None => {
                state.tables = None;
                state.columns.clear();
                state.refreshed_at = Instant::now();
            }
        }
    }

    fn load_tables<'a>(&self, state: &'a mut CacheState) -> NodeResult<&'a BTreeSet<String>> {
        if state.tables.is_none() {
            let rows = self
                .connections
                .query(&self.profile, "SHOW TABLES", &[])
                .map_err(|e| ErrorUtils::introspection_error("*", e))?;
            let tables: BTreeSet<String> = rows
                .iter()
                .filter_map(|row| row.values().next().and_then(Value::as_str).map(str::to_string))
                .collect();
            log_schema_debug!("Loaded {} tables for profile '{}'", tables.len(), self.profile);
            state.tables = Some(tables);
        }
        Ok(state.tables.get_or_insert_with(BTreeSet::new))
    }

    fn introspect(&self, table: &str) -> NodeResult<Vec<Column>> {
        let sql = format!("SHOW COLUMNS FROM {}", quote_identifier(table));
        let rows = self
            .connections
            .query(&self.profile, &sql, &[])
            .map_err(|e| ErrorUtils::introspection_error(table, e))?;
        let columns = rows
            .iter()
            .map(|row| Column::from_row(table, row))
            .collect::<Result<Vec<_>, _>>()?;
        log_schema_debug!("Introspected {} columns of {}", columns.len(), table);
        Ok(columns)
    }

    fn lock_state(&self) -> NodeResult<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| ErrorUtils::lock_error("schema cache"))
    }
}
