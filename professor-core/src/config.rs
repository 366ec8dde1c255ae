//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/professor/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/professor/` (~/.config/professor/)
//! - Data: `$XDG_DATA_HOME/professor/` (~/.local/share/professor/)
//! - State/Logs: `$XDG_STATE_HOME/professor/` (~/.local/state/professor/)

use crate::db::repo::DEFAULT_PAGE_SIZE;
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
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Incremental sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Aggregation read-back configuration
    #[serde(default)]
    pub aggregate: AggregateConfig,
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

/// What a sync does when one record fails to ingest or persist
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the pass and return the error; the watermark is not advanced
    #[default]
    Abort,
    /// Log the record, count it as rejected and continue
    Skip,
}

/// Sync configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Per-record error policy
    #[serde(default)]
    pub on_error: ErrorPolicy,

    /// Seconds between passes for a periodic driver
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            on_error: ErrorPolicy::default(),
            interval_secs: default_sync_interval(),
        }
    }
}

fn default_sync_interval() -> u64 {
    60
}

/// Aggregation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AggregateConfig {
    /// Stored records fetched per round trip by the sorted read-back
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
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

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.aggregate.page_size == 0 {
            return Err(Error::Config(
                "aggregate.page_size must be at least 1".to_string(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(Error::Config(
                "sync.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.logging.max_files == 0 {
            return Err(Error::Config(
                "logging.max_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/professor/config.toml` (~/.config/professor/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("professor").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/professor/` (~/.local/share/professor/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("professor")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/professor/` (~/.local/state/professor/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("professor")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/professor/profiles.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("profiles.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/professor/professor.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("professor.log")
    }
}
