//! Configuration management for kvguard.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{KvGuardError, Result};
use crate::ratelimit::RateLimitRules;

/// Prefix for environment variable overrides (`KVGUARD__STORE__URL`, ...).
pub const ENV_PREFIX: &str = "KVGUARD";

/// Main configuration for kvguard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvGuardConfig {
    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Prefix scan configuration
    #[serde(default)]
    pub scan: ScanConfig,

    /// Named rate limiting policies
    #[serde(default)]
    pub rate_limiting: RateLimitRules,
}

/// Backing store reachability.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Password, overriding any password in the URL
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index, overriding any index in the URL
    #[serde(default)]
    pub db: Option<i64>,

    /// Bound on connecting and the initial PING, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Default deadline handed out for each operation, in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

impl StoreConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default operation timeout as a [`Duration`].
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            password: None,
            db: None,
            connect_timeout_ms: default_connect_timeout(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_operation_timeout() -> u64 {
    1000
}

/// Prefix scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// COUNT hint passed to each SCAN call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

impl KvGuardConfig {
    /// Load configuration from an optional YAML file, then apply `KVGUARD__*`
    /// environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: KvGuardConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: KvGuardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| KvGuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.store.operation_timeout_ms == 0 {
            return Err(KvGuardError::Config(
                "store.operation_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.scan.batch_size == 0 {
            return Err(KvGuardError::Config(
                "scan.batch_size must be > 0".to_string(),
            ));
        }
        self.rate_limiting.validate()
    }
}
