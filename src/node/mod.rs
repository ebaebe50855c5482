//! The entity store
//!
//! [`NodeStore`] is the entry point for reading and writing records. It is
//! bound to one connection profile and shares the [`ConnectionManager`] with
//! any other store created from it.

pub mod codec;
pub mod cursor;
pub mod mutation;

pub use codec::{EncodedRecord, VirtualFieldCodec};
pub use cursor::EntityCursor;
pub use mutation::{DeleteTarget, UpsertResult};

use crate::config::EngineConfig;
use crate::db_operations::error_utils::ErrorUtils;
use crate::db_operations::provider::ConnectionFactory;
use crate::db_operations::{ConnectionManager, LockMode};
use crate::error::NodeResult;
use crate::query::{Filter, Limit, QueryCompiler};
use crate::schema::SchemaCache;
use crate::{log_query_debug, Record};
use std::sync::Arc;

pub struct NodeStore {
    config: EngineConfig,
    profile: String,
    connections: Arc<ConnectionManager>,
    compiler: QueryCompiler,
    codec: VirtualFieldCodec,
}

impl NodeStore {
    /// Create a store on the default profile with its own connection manager
    pub fn new(config: EngineConfig, factory: Arc<dyn ConnectionFactory>) -> NodeResult<Self> {
        config.validate()?;
        let connections = Arc::new(ConnectionManager::new(factory, &config));
        let profile = config.default_profile.clone();
        Self::with_connections(config, connections, &profile)
    }

    /// Create a store for `profile` on an existing connection manager
    pub fn with_connections(
        config: EngineConfig,
        connections: Arc<ConnectionManager>,
        profile: &str,
    ) -> NodeResult<Self> {
        if !connections.has_profile(profile) {
            return Err(ErrorUtils::unknown_profile(profile));
        }
        let schema = Arc::new(SchemaCache::new(
            connections.clone(),
            profile,
            config.schema_ttl(),
        ));
        Ok(Self::with_schema_cache(config, connections, schema))
    }

    /// Create a store from explicit components; the profile is the cache's
    pub fn with_schema_cache(
        config: EngineConfig,
        connections: Arc<ConnectionManager>,
        schema: Arc<SchemaCache>,
    ) -> Self {
        let codec = VirtualFieldCodec::new(&config.virtual_column, &config.discriminator_field);
        Self {
            profile: schema.profile().to_string(),
            compiler: QueryCompiler::new(schema, &config),
            codec,
            config,
            connections,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn schema(&self) -> &Arc<SchemaCache> {
        self.compiler.schema()
    }

    pub fn codec(&self) -> &VirtualFieldCodec {
        &self.codec
    }

    pub(crate) fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    /// Open a cursor over the records matching `filter`
    pub fn get(&self, filter: impl Into<Filter>) -> NodeResult<EntityCursor<'_>> {
        let plan = self.compiler.compose(&filter.into())?;
        log_query_debug!(
            "Opening cursor on {} ({} pushed, {} in process)",
            plan.table,
            plan.pushed_fields.len(),
            plan.leftover.fields.len()
        );
        EntityCursor::open(self, plan)
    }

    /// First matching record, honouring any offset in the filter
    pub fn get_one(&self, filter: impl Into<Filter>) -> NodeResult<Option<Record>> {
        let mut filter = filter.into();
        let offset = filter.limit.map_or(0, |l| l.offset);
        filter.limit = Some(Limit::new(offset, Some(1)));
        let cursor = self.get(filter)?;
        Ok(cursor.current().cloned())
    }

    /// Number of matching records
    pub fn get_count(&self, filter: impl Into<Filter>) -> NodeResult<usize> {
        let plan = self.compiler.compose(&filter.into())?;
        if plan.is_countable_in_sql() {
            cursor::count_in_sql(self, &plan)
        } else {
            EntityCursor::open(self, plan)?.total()
        }
    }

    pub fn begin_transaction(&self) -> NodeResult<()> {
        self.connections.begin_transaction(&self.profile)
    }

    pub fn commit(&self) -> NodeResult<()> {
        self.connections.commit(&self.profile)
    }

    pub fn rollback(&self) -> NodeResult<()> {
        self.connections.rollback(&self.profile)
    }

    /// Lock the tables backing the given collections
    pub fn lock(&self, collections: &[(&str, LockMode)]) -> NodeResult<()> {
        let mut tables: Vec<(String, LockMode)> = Vec::new();
        for (collection, mode) in collections {
            let table = self.compiler.resolve(collection)?.table;
            match tables.iter_mut().find(|entry| entry.0 == table) {
                Some(entry) if *mode == LockMode::Write => entry.1 = LockMode::Write,
                Some(_) => {}
                None => tables.push((table, *mode)),
            }
        }
        let tables: Vec<(&str, LockMode)> = tables.iter().map(|(t, m)| (t.as_str(), *m)).collect();
        self.connections.lock_tables(&self.profile, &tables)
    }

    pub fn unlock(&self) -> NodeResult<()> {
        self.connections.unlock_tables(&self.profile)
    }

    /// Forget cached metadata for a table, or for every table
    pub fn invalidate_schema(&self, table: Option<&str>) {
        self.schema().invalidate(table);
    }
}
