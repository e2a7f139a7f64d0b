//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/corona/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/corona/` (~/.config/corona/)
//! - Data: `$XDG_DATA_HOME/corona/` (~/.local/share/corona/)
//! - State/Logs: `$XDG_STATE_HOME/corona/` (~/.local/state/corona/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Collector behaviour (destination, debug output, enabled)
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Durable store location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Collector configuration
///
/// The same shape is accepted by [`crate::Collector::init`] and by a recorded
/// `init` call during loader replay, so every field has a default.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Ingestion endpoint; flush is a no-op until this is set
    #[serde(default)]
    pub url: Option<String>,

    /// Emit verbose diagnostics
    #[serde(default)]
    pub debug: bool,

    /// When false, buffered events are purged and `log` does nothing
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Largest payload the beacon transport accepts
    #[serde(default = "default_beacon_max_bytes")]
    pub beacon_max_bytes: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            debug: false,
            enabled: default_enabled(),
            timeout_secs: default_timeout_secs(),
            beacon_max_bytes: default_beacon_max_bytes(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_beacon_max_bytes() -> usize {
    64 * 1024
}

impl CollectorConfig {
    /// Configuration pointing at `url` with everything else defaulted.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Check if the collector can deliver events
    pub fn is_ready(&self) -> bool {
        self.enabled && self.url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| Error::Config(format!("collector.url is invalid: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "collector.url must be http or https, got {}",
                    parsed.scheme()
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "collector.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.beacon_max_bytes == 0 {
            return Err(Error::Config(
                "collector.beacon_max_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Durable store configuration
#[derive(Debug, Deserialize, Default)]
pub struct StorageConfig {
    /// Override for the SQLite store path
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured store path, or the XDG default
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::store_path)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.collector.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/corona/config.toml` (~/.config/corona/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("corona").join("config.toml")
    }

    /// Returns the data directory path (for the durable store)
    ///
    /// `$XDG_DATA_HOME/corona/` (~/.local/share/corona/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("corona")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/corona/` (~/.local/state/corona/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("corona")
    }

    /// Returns the default durable store path
    ///
    /// `$XDG_DATA_HOME/corona/store.db` (~/.local/share/corona/store.db)
    pub fn store_path() -> PathBuf {
        Self::data_dir().join("store.db")
    }
}
