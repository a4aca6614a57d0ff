//! Configuration management for Courier.
//!
//! Provides persistent settings with schema versioning and migrations.
//! Configuration is stored in `~/.courier/config.json`. The loaded value is
//! owned by the composition root and passed to the components that need it;
//! there is no global cached instance.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::net::BackoffPolicy;

/// Current config schema version
const CURRENT_VERSION: u32 = 1;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version for migrations
    pub version: u32,
    /// Storage locations
    pub storage: StorageConfig,
    /// Network retry behaviour
    pub retry: RetryConfig,
    /// Display view limits
    pub display: DisplayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            storage: StorageConfig::default(),
            retry: RetryConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory override (None for ~/.courier)
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| home_dir_or_fallback().join(".courier"))
    }

    /// The database path under the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("courier.db")
    }
}

/// Network retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempt budget per external call
    pub max_retries: u32,
    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Cap on a single backoff delay in milliseconds
    pub max_delay_ms: u64,
    /// Per-request timeout in seconds (transcription, connector calls)
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            request_timeout_secs: 30,
        }
    }
}

impl RetryConfig {
    /// The backoff policy this configuration describes.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Cap on list-returning queue views
    pub recent_limit: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { recent_limit: 30 }
    }
}

/// Get the path to the config file (~/.courier/config.json)
pub fn get_config_path() -> PathBuf {
    home_dir_or_fallback().join(".courier").join("config.json")
}

/// Get the home directory, falling back to /tmp if unavailable
fn home_dir_or_fallback() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        tracing::error!("Could not determine home directory, using /tmp");
        PathBuf::from("/tmp")
    })
}

impl Config {
    /// Loads configuration from the default location.
    pub fn load() -> Result<Config> {
        Self::load_from(&get_config_path())
    }

    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist yet.
    pub fn load_from(path: &Path) -> Result<Config> {
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config: {}", e))?;

        migrate_config(config)
    }

    /// Saves configuration to `path`, creating the parent directory if
    /// needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialise config: {}", e))?;

        fs::write(path, contents).map_err(|e| anyhow!("Failed to write config file: {}", e))?;

        tracing::info!("Config saved to {:?}", path);
        Ok(())
    }
}

/// Migrate configuration from older schema versions
fn migrate_config(mut config: Config) -> Result<Config> {
    let original_version = config.version;

    while config.version < CURRENT_VERSION {
        config = apply_migration(config)?;
    }

    if config.version != original_version {
        tracing::info!(
            "Migrated config from version {} to {}",
            original_version,
            config.version
        );
    }

    Ok(config)
}

/// Apply a single migration step
fn apply_migration(config: Config) -> Result<Config> {
    match config.version {
        // Version 0 -> 1: Initial migration (add any new fields)
        0 => {
            let mut migrated = config;
            migrated.version = 1;
            Ok(migrated)
        }
        v => Err(anyhow!("Unknown config version: {}", v)),
    }
}
