use super::error_utils::ErrorUtils;
use super::provider::{
    ConnectionFactory, ConnectionProvider, DriverErrorKind, ExecuteResult, Row, StatementHandle,
    StatementOptions,
};
use crate::config::{ConnectionProfile, EngineConfig};
use crate::error::{NodeError, NodeResult};
use crate::{log_connection_info, log_connection_warn};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lock mode for `LOCK TABLES`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "READ"),
            LockMode::Write => write!(f, "WRITE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StatementKey {
    sql: String,
    options: StatementOptions,
}

/// Connection state of one profile
struct ProfileSlot {
    profile: ConnectionProfile,
    connection: Option<Box<dyn ConnectionProvider>>,
    statements: HashMap<StatementKey, StatementHandle>,
    sql_by_handle: HashMap<StatementHandle, String>,
}

impl ProfileSlot {
    fn new(profile: ConnectionProfile) -> Self {
        Self {
            profile,
            connection: None,
            statements: HashMap::new(),
            sql_by_handle: HashMap::new(),
        }
    }

    /// Opens the driver connection on first use
    fn connection(
        &mut self,
        factory: &dyn ConnectionFactory,
    ) -> NodeResult<&mut (dyn ConnectionProvider + 'static)> {
        if self.connection.is_none() {
            let connection = factory.connect(&self.profile).map_err(|e| NodeError::Connection {
                profile: self.profile.name.clone(),
                message: e.message,
            })?;
            log_connection_info!("Opened connection for profile '{}'", self.profile.name);
            self.connection = Some(connection);
        }

        match self.connection.as_deref_mut() {
            Some(connection) => Ok(connection),
            None => Err(ErrorUtils::unknown_profile(&self.profile.name)),
        }
    }

    /// Drops the connection and every statement prepared on it
    fn reset(&mut self) {
        self.connection = None;
        self.statements.clear();
        self.sql_by_handle.clear();
    }

    fn sql_for(&self, handle: StatementHandle) -> String {
        self.sql_by_handle
            .get(&handle)
            .cloned()
            .unwrap_or_else(|| format!("<statement {}>", handle.0))
    }

    /// Run `op` against the connection, resetting the slot when the driver
    /// reports the connection as lost.
    fn run<T>(
        &mut self,
        factory: &dyn ConnectionFactory,
        sql: &str,
        op: impl FnOnce(&mut dyn ConnectionProvider) -> Result<T, super::provider::DriverError>,
    ) -> NodeResult<T> {
        let name = self.profile.name.clone();
        let connection = self.connection(factory)?;
        match op(connection) {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.kind == DriverErrorKind::Connection {
                    log_connection_warn!("Connection for profile '{}' lost: {}", name, e);
                    self.reset();
                }
                Err(ErrorUtils::from_driver_error(&name, sql)(e))
            }
        }
    }
}

/// Owns connection profiles, their lazily opened connections and the
/// prepared statement cache.
///
/// Statements are cached per profile keyed by SQL text plus driver options
/// and are never evicted while the connection lives. Handles are shared:
/// executing a cached statement discards rows still pending from a previous
/// execution of the same SQL.
pub struct ConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    slots: Mutex<HashMap<String, ProfileSlot>>,
    default_profile: String,
    unlock_retries: u32,
    unlock_retry_interval: Duration,
}

impl ConnectionManager {
    /// Creates a manager for every profile in `config`. The default profile
    /// is registered with an empty DSN when the configuration omits it.
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: &EngineConfig) -> Self {
        let mut slots = HashMap::new();
        for profile in &config.profiles {
            slots.insert(profile.name.clone(), ProfileSlot::new(profile.clone()));
        }
        slots
            .entry(config.default_profile.clone())
            .or_insert_with(|| ProfileSlot::new(ConnectionProfile::new(&config.default_profile, "")));

        Self {
            factory,
            slots: Mutex::new(slots),
            default_profile: config.default_profile.clone(),
            unlock_retries: config.unlock_retries.max(1),
            unlock_retry_interval: config.unlock_retry_interval(),
        }
    }

    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    /// Register a profile; an existing profile of that name is replaced and
    /// its connection closed
    pub fn add_profile(&self, profile: ConnectionProfile) -> NodeResult<()> {
        let mut slots = self.lock_slots()?;
        slots.insert(profile.name.clone(), ProfileSlot::new(profile));
        Ok(())
    }

    pub fn has_profile(&self, profile: &str) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.contains_key(profile))
            .unwrap_or(false)
    }

    /// Close the connection of a profile. The next call reconnects.
    pub fn disconnect(&self, profile: &str) -> NodeResult<()> {
        self.with_slot(profile, |slot, _| {
            slot.reset();
            Ok(())
        })
    }

    /// Number of statements currently cached for a profile
    pub fn cached_statements(&self, profile: &str) -> NodeResult<usize> {
        self.with_slot(profile, |slot, _| Ok(slot.statements.len()))
    }

    /// Prepare `sql`, reusing the cached handle for identical SQL and options
    pub fn prepare(
        &self,
        profile: &str,
        sql: &str,
        options: &StatementOptions,
    ) -> NodeResult<StatementHandle> {
        self.with_slot(profile, |slot, factory| {
            let key = StatementKey {
                sql: sql.to_string(),
                options: options.clone(),
            };
            if let Some(handle) = slot.statements.get(&key) {
                return Ok(*handle);
            }

            let handle = slot.run(factory, sql, |conn| conn.prepare(sql, options))?;
            slot.statements.insert(key, handle);
            slot.sql_by_handle.insert(handle, sql.to_string());
            Ok(handle)
        })
    }

    pub fn execute(
        &self,
        profile: &str,
        statement: StatementHandle,
        params: &[Value],
    ) -> NodeResult<ExecuteResult> {
        self.with_slot(profile, |slot, factory| {
            let sql = slot.sql_for(statement);
            slot.run(factory, &sql, |conn| conn.execute(statement, params))
        })
    }

    pub fn fetch(&self, profile: &str, statement: StatementHandle) -> NodeResult<Option<Row>> {
        self.with_slot(profile, |slot, factory| {
            let sql = slot.sql_for(statement);
            slot.run(factory, &sql, |conn| conn.fetch(statement))
        })
    }

    /// Prepare, execute and drain a statement
    pub fn query(&self, profile: &str, sql: &str, params: &[Value]) -> NodeResult<Vec<Row>> {
        let statement = self.prepare(profile, sql, &StatementOptions::default())?;
        self.execute(profile, statement, params)?;

        let mut rows = Vec::new();
        while let Some(row) = self.fetch(profile, statement)? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Prepare and execute a statement that returns no rows
    pub fn exec(&self, profile: &str, sql: &str, params: &[Value]) -> NodeResult<ExecuteResult> {
        let statement = self.prepare(profile, sql, &StatementOptions::default())?;
        self.execute(profile, statement, params)
    }

    pub fn begin_transaction(&self, profile: &str) -> NodeResult<()> {
        self.with_slot(profile, |slot, factory| {
            slot.run(factory, "BEGIN", |conn| conn.begin_transaction())
        })
    }

    pub fn commit(&self, profile: &str) -> NodeResult<()> {
        self.with_slot(profile, |slot, factory| {
            slot.run(factory, "COMMIT", |conn| conn.commit())
        })
    }

    pub fn rollback(&self, profile: &str) -> NodeResult<()> {
        self.with_slot(profile, |slot, factory| {
            slot.run(factory, "ROLLBACK", |conn| conn.rollback())
        })
    }

    /// Issue `LOCK TABLES` for the given tables
    pub fn lock_tables(&self, profile: &str, tables: &[(&str, LockMode)]) -> NodeResult<()> {
        if tables.is_empty() {
            return Ok(());
        }

        let list = tables
            .iter()
            .map(|(table, mode)| format!("{} {}", crate::query::quote_identifier(table), mode))
            .collect::<Vec<_>>()
            .join(", ");
        self.exec(profile, &format!("LOCK TABLES {}", list), &[])?;
        Ok(())
    }

    /// Issue `UNLOCK TABLES`, retrying a bounded number of times with a fixed
    /// interval. Every failed attempt is logged as a warning.
    pub fn unlock_tables(&self, profile: &str) -> NodeResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.exec(profile, "UNLOCK TABLES", &[]) {
                Ok(_) => return Ok(()),
                Err(e) if attempt < self.unlock_retries => {
                    log_connection_warn!(
                        "UNLOCK TABLES failed on '{}' (attempt {}/{}): {}",
                        profile,
                        attempt,
                        self.unlock_retries,
                        e
                    );
                    std::thread::sleep(self.unlock_retry_interval);
                }
                Err(e) => {
                    log_connection_warn!(
                        "Giving up on UNLOCK TABLES for '{}' after {} attempts: {}",
                        profile,
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    fn lock_slots(&self) -> NodeResult<std::sync::MutexGuard<'_, HashMap<String, ProfileSlot>>> {
        self.slots
            .lock()
            .map_err(|_| ErrorUtils::lock_error("connection slots"))
    }

    fn with_slot<T>(
        &self,
        profile: &str,
        f: impl FnOnce(&mut ProfileSlot, &dyn ConnectionFactory) -> NodeResult<T>,
    ) -> NodeResult<T> {
        let mut slots = self.lock_slots()?;
        let slot = slots
            .get_mut(profile)
            .ok_or_else(|| ErrorUtils::unknown_profile(profile))?;
        f(slot, self.factory.as_ref())
    }
}
