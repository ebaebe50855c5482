//! Configuration for the logging system
//!
//! Levels are plain strings (`TRACE` .. `ERROR`) so the section can live in the
//! engine's TOML file and be overridden from the environment.

use crate::error::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const VALID_LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level for all modules
    #[serde(default = "default_level")]
    pub default_level: String,
    /// Feature-specific log levels, keyed by feature name (`query`, `schema`, ...)
    #[serde(default = "LogConfig::default_features")]
    pub features: BTreeMap<String, String>,
}

fn default_level() -> String {
    "INFO".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: default_level(),
            features: Self::default_features(),
        }
    }
}

impl LogConfig {
    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("NODESTORE_LOG_LEVEL") {
            self.default_level = level.to_uppercase();
        }

        for (key, value) in std::env::vars() {
            if let Some(feature) = key.strip_prefix("NODESTORE_LOG_FEATURE_") {
                self.features
                    .insert(feature.to_lowercase(), value.to_uppercase());
            }
        }
    }

    fn default_features() -> BTreeMap<String, String> {
        let mut features = BTreeMap::new();
        features.insert("connection".to_string(), "INFO".to_string());
        features.insert("schema".to_string(), "INFO".to_string());
        features.insert("query".to_string(), "INFO".to_string());
        features.insert("mutation".to_string(), "INFO".to_string());
        features
    }

    /// Validate the configuration
    pub fn validate(&self) -> NodeResult<()> {
        if !VALID_LEVELS.contains(&self.default_level.as_str()) {
            return Err(NodeError::config(format!(
                "Invalid log level: {}",
                self.default_level
            )));
        }

        for (feature, level) in &self.features {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(NodeError::config(format!(
                    "Invalid log level for feature '{}': {}",
                    feature, level
                )));
            }
        }

        Ok(())
    }
}

/// Map a configured level string to a filter
pub fn parse_level(level: &str) -> log::LevelFilter {
    match level {
        "TRACE" => log::LevelFilter::Trace,
        "DEBUG" => log::LevelFilter::Debug,
        "INFO" => log::LevelFilter::Info,
        "WARN" => log::LevelFilter::Warn,
        "ERROR" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_levels() {
        let mut config = LogConfig::default();
        assert!(config.validate().is_ok());

        config.features.insert("query".to_string(), "LOUD".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_level_strings_fall_back_to_info() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("verbose"), log::LevelFilter::Info);
    }
}
