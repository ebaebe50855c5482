//! # Logging System
//!
//! The engine logs through the `log` facade. [`LoggingSystem`] installs an
//! `env_logger` backend configured from [`LogConfig`], with one filter
//! directive per feature target.

pub mod config;
pub mod features;

use config::{parse_level, LogConfig};
use features::LogFeature;

pub struct LoggingSystem;

impl LoggingSystem {
    /// Initialize the logging system with default configuration
    pub fn init_default() -> Result<(), LoggingError> {
        Self::init_with_config(LogConfig::default())
    }

    /// Initialize the logging system with a custom configuration
    pub fn init_with_config(mut config: LogConfig) -> Result<(), LoggingError> {
        config.apply_env_overrides();
        config
            .validate()
            .map_err(|e| LoggingError::Config(e.to_string()))?;

        let mut builder = Self::builder(&config);
        builder
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)
    }

    fn builder(config: &LogConfig) -> env_logger::Builder {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(parse_level(&config.default_level));
        for (feature, level) in &config.features {
            match LogFeature::from_name(feature) {
                Some(feature) => {
                    builder.filter_module(feature.target(), parse_level(level));
                }
                None => log::warn!("Ignoring log level for unknown feature '{}'", feature),
            }
        }
        builder
    }
}

/// Logging system errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging system already initialized")]
    AlreadyInitialized,
    #[error("Configuration error: {0}")]
    Config(String),
}
