/// Configuration for the registrar service
use crate::error::RegistrarError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Path of the SQLite catalog file
    pub database_path: PathBuf,
    /// Default tracing filter when `RUST_LOG` is not set
    pub log_level: String,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub bidding: BiddingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

/// Transaction and connection settings for the catalog store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a transaction waits for the write lock before failing
    pub busy_timeout_ms: u64,
    /// Retries of a whole transaction after a transient failure
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff with jitter)
    pub retry_backoff_ms: u64,
    /// Idle connections kept for reuse
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiddingConfig {
    /// Maximum points a single bid may carry
    pub max_bid_points: i64,
    /// Points granted to newly registered students
    pub initial_points: i64,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/registrar.db"),
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            bidding: BiddingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            max_retries: 1,
            retry_backoff_ms: 50,
            pool_size: 8,
        }
    }
}

impl Default for BiddingConfig {
    fn default() -> Self {
        Self {
            max_bid_points: 100,
            initial_points: 200,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl RegistrarConfig {
    /// Loads configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Arguments
    /// * `path` - Path to the JSON configuration file
    ///
    /// # Returns
    /// * `Ok(RegistrarConfig)` - Loaded configuration
    /// * `Err` - If the file can't be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self, RegistrarError> {
        let content = fs::read_to_string(path).map_err(|e| RegistrarError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        let config: RegistrarConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the service misbehave.
    pub fn validate(&self) -> Result<(), RegistrarError> {
        if self.bidding.max_bid_points < 1 {
            return Err(RegistrarError::Config {
                message: "bidding.max_bid_points must be at least 1".to_string(),
            });
        }
        if self.bidding.initial_points < 0 {
            return Err(RegistrarError::Config {
                message: "bidding.initial_points must not be negative".to_string(),
            });
        }
        if self.store.busy_timeout_ms == 0 {
            return Err(RegistrarError::Config {
                message: "store.busy_timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }
}
