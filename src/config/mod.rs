//! # Configuration Management Module
//!
//! Centralized configuration for the meshdot service: type-safe TOML with
//! serde, sensible defaults for every value, and validation on load.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - key-value store location and batch-read timeout
//! - [`EngineConfig`] - aggregation tuning (debounce, caches, log caps)
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshdot::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Data dir: {}", config.storage.data_dir);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! batch_timeout_secs = 30
//!
//! [engine]
//! debounce_ms = 3000
//! cache_ttl_secs = 30
//! message_cap = 200
//!
//! [logging]
//! level = "info"
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::engine::EngineOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the embedded key-value store.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Caller-side timeout racing each pipelined bulk read.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Window during which an unchanged repeat observation is suppressed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: i64,
    /// TTL for the derived all-dots and map-view caches.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum records per (category, device) message log.
    #[serde(default = "default_message_cap")]
    pub message_cap: usize,
    /// Duplicate-suppression window for message logs.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: i64,
    /// Fixed expiry for MeshCore dots.
    #[serde(default = "default_meshcore_ttl_secs")]
    pub meshcore_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; when set, log lines are appended there as well.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_batch_timeout_secs() -> u64 {
    30
}
fn default_debounce_ms() -> i64 {
    3000
}
fn default_cache_ttl_secs() -> u64 {
    30
}
fn default_message_cap() -> usize {
    200
}
fn default_dedup_window_ms() -> i64 {
    30_000
}
fn default_meshcore_ttl_secs() -> u64 {
    3 * 60 * 60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            batch_timeout_secs: default_batch_timeout_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            message_cap: default_message_cap(),
            dedup_window_ms: default_dedup_window_ms(),
            meshcore_ttl_secs: default_meshcore_ttl_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file.
    pub async fn create_default(path: &str) -> Result<Self> {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config)?;
        fs::write(path, serialized).await?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir must not be empty"));
        }
        if self.storage.batch_timeout_secs == 0 {
            return Err(anyhow!("storage.batch_timeout_secs must be positive"));
        }
        if self.engine.debounce_ms < 0 {
            return Err(anyhow!("engine.debounce_ms must not be negative"));
        }
        if self.engine.message_cap == 0 {
            return Err(anyhow!("engine.message_cap must be positive"));
        }
        if self.engine.dedup_window_ms < 0 {
            return Err(anyhow!("engine.dedup_window_ms must not be negative"));
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(anyhow!("logging.level '{}' is not a valid level", other)),
        }
        Ok(())
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.batch_timeout_secs)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            debounce_ms: self.engine.debounce_ms,
            cache_ttl: Duration::from_secs(self.engine.cache_ttl_secs),
            message_cap: self.engine.message_cap,
            dedup_window_ms: self.engine.dedup_window_ms,
            meshcore_ttl: Duration::from_secs(self.engine.meshcore_ttl_secs),
        }
    }
}
