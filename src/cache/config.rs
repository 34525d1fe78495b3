//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Environment variable prefix read by [`CacheConfig::from_env`]
pub const ENV_PREFIX: &str = "REQUEST_CACHE_";

/// Configuration for the cache, loading registry and loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Longest key accepted by any operation, in bytes
    pub max_key_length: usize,

    /// Enable statistics collection
    pub enable_metrics: bool,

    /// When the loader starts a load, cancel older in-flight loads for the
    /// same key so only the newest result is committed
    pub abort_superseded_loads: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_key_length: 4096,
            enable_metrics: true,
            abort_superseded_loads: false,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_key_length == 0 {
            return Err(CacheError::Config(
                "max_key_length must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from the environment (and a `.env` file if present).
    ///
    /// Recognised variables: `REQUEST_CACHE_MAX_KEY_LENGTH`,
    /// `REQUEST_CACHE_ENABLE_METRICS`, `REQUEST_CACHE_ABORT_SUPERSEDED_LOADS`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            max_key_length: env_or("MAX_KEY_LENGTH", defaults.max_key_length)?,
            enable_metrics: env_or("ENABLE_METRICS", defaults.enable_metrics)?,
            abort_superseded_loads: env_or(
                "ABORT_SUPERSEDED_LOADS",
                defaults.abort_superseded_loads,
            )?,
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    let var = format!("{}{}", ENV_PREFIX, name);
    match env::var(&var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CacheError::Config(format!("{} has an invalid value: {}", var, raw))),
        Err(_) => Ok(default),
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_key_length: Option<usize>,
    enable_metrics: Option<bool>,
    abort_superseded_loads: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set the maximum key length
    pub fn max_key_length(mut self, max: usize) -> Self {
        self.max_key_length = Some(max);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Cancel superseded in-flight loads when a newer one starts
    pub fn abort_superseded_loads(mut self, enable: bool) -> Self {
        self.abort_superseded_loads = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_key_length: self.max_key_length.unwrap_or(defaults.max_key_length),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
            abort_superseded_loads: self
                .abort_superseded_loads
                .unwrap_or(defaults.abort_superseded_loads),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Only the most recently started load for a key may commit
    pub fn latest_wins() -> Self {
        Self {
            abort_superseded_loads: true,
            ..Default::default()
        }
    }

    /// No statistics bookkeeping
    pub fn minimal() -> Self {
        Self {
            enable_metrics: false,
            ..Default::default()
        }
    }
}
