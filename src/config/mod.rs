//! Engine configuration
//!
//! Settings are read from a TOML file. Everything has a default so an absent
//! file yields a working configuration against the `default` profile.

use crate::error::{NodeError, NodeResult};
use crate::logging::config::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "NODESTORE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/nodestore.toml";

/// A named set of connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    /// Driver specific connection string
    #[serde(default)]
    pub dsn: String,
    /// Extra driver options, passed through untouched
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ConnectionProfile {
    pub fn new(name: &str, dsn: &str) -> Self {
        Self {
            name: name.to_string(),
            dsn: dsn.to_string(),
            options: BTreeMap::new(),
        }
    }
}

/// Configuration for a NodeStore instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Table holding every collection that has no dedicated table
    #[serde(default = "default_base_collection")]
    pub base_collection: String,
    /// Field naming a record's collection
    #[serde(default = "default_discriminator_field")]
    pub discriminator_field: String,
    /// JSON column holding fields without a physical column
    #[serde(default = "default_virtual_column")]
    pub virtual_column: String,
    /// Lifetime of cached column metadata
    #[serde(default = "default_schema_ttl_secs")]
    pub schema_ttl_secs: u64,
    /// Attempts made by `unlock_tables` before giving up
    #[serde(default = "default_unlock_retries")]
    pub unlock_retries: u32,
    #[serde(default = "default_unlock_retry_interval_ms")]
    pub unlock_retry_interval_ms: u64,
    /// Profile used when callers do not name one
    #[serde(default = "default_profile_name")]
    pub default_profile: String,
    #[serde(default)]
    pub profiles: Vec<ConnectionProfile>,
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_base_collection() -> String {
    "NodeBase".to_string()
}

fn default_discriminator_field() -> String {
    "@collection".to_string()
}

fn default_virtual_column() -> String {
    "@contents".to_string()
}

fn default_schema_ttl_secs() -> u64 {
    30 * 60
}

fn default_unlock_retries() -> u32 {
    3
}

fn default_unlock_retry_interval_ms() -> u64 {
    500
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_collection: default_base_collection(),
            discriminator_field: default_discriminator_field(),
            virtual_column: default_virtual_column(),
            schema_ttl_secs: default_schema_ttl_secs(),
            unlock_retries: default_unlock_retries(),
            unlock_retry_interval_ms: default_unlock_retry_interval_ms(),
            default_profile: default_profile_name(),
            profiles: Vec::new(),
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }

    pub fn unlock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.unlock_retry_interval_ms)
    }

    /// Set the schema cache lifetime
    pub fn with_schema_ttl(mut self, ttl: Duration) -> Self {
        self.schema_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the unlock retry policy
    pub fn with_unlock_retry(mut self, retries: u32, interval: Duration) -> Self {
        self.unlock_retries = retries;
        self.unlock_retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Add a connection profile, replacing one with the same name
    pub fn with_profile(mut self, profile: ConnectionProfile) -> Self {
        self.profiles.retain(|p| p.name != profile.name);
        self.profiles.push(profile);
        self
    }

    /// Look up a profile by name
    pub fn profile(&self, name: &str) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> NodeResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NodeResult<()> {
        for (field, value) in [
            ("base_collection", &self.base_collection),
            ("discriminator_field", &self.discriminator_field),
            ("virtual_column", &self.virtual_column),
            ("default_profile", &self.default_profile),
        ] {
            if value.trim().is_empty() {
                return Err(NodeError::config(format!("'{}' must not be empty", field)));
            }
        }
        if self.discriminator_field == self.virtual_column {
            return Err(NodeError::config(
                "discriminator_field and virtual_column must differ",
            ));
        }
        if self.unlock_retries == 0 {
            return Err(NodeError::config("unlock_retries must be at least 1"));
        }
        let mut seen = std::collections::HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(NodeError::config(format!(
                    "duplicate connection profile '{}'",
                    profile.name
                )));
            }
        }
        self.logging.validate()
    }
}

/// Load the engine configuration from the given path or from the
/// `NODESTORE_CONFIG` environment variable.
///
/// If the file does not exist, a default [`EngineConfig`] is returned.
pub fn load_engine_config(path: Option<&str>) -> NodeResult<EngineConfig> {
    use std::fs;

    let config_path = path
        .map(|p| p.to_string())
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    match fs::read_to_string(&config_path) {
        Ok(content) => EngineConfig::from_toml_str(&content).map_err(|e| {
            log::error!("Failed to load configuration from {}: {}", config_path, e);
            e
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No configuration at {}, using defaults", config_path);
            Ok(EngineConfig::default())
        }
        Err(e) => Err(NodeError::config(format!(
            "Failed to read {}: {}",
            config_path, e
        ))),
    }
}
