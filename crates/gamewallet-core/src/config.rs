//! Application configuration and persistence utilities.
//!
//! Covers:
//! - Target delegatee for the "delegate everything" action
//! - Retry schedules for session restore and profile lookup
//! - Delay before the first delegation fetch after connecting
//! - Platform paths for the config file and the session marker

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration error type.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Other configuration error.
    #[error("{0}")]
    Other(String),
}

/// A linear retry schedule: attempt `k` waits `(k - 1) * base_delay_ms` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff unit in milliseconds.
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    fn restore_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }

    fn profile_default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Delegatee that receives 100% of the weight.
    #[serde(default = "default_target_delegatee")]
    pub target_delegatee: String,
    /// Schedule for reconnect attempts during start-up restore.
    #[serde(default = "RetryConfig::restore_default")]
    pub restore: RetryConfig,
    /// Schedule for profile lookups.
    #[serde(default = "RetryConfig::profile_default")]
    pub profile_retry: RetryConfig,
    /// Delay before fetching delegations once a session is connected.
    #[serde(default = "default_delegation_fetch_delay_ms")]
    pub delegation_fetch_delay_ms: u64,
    /// Restore a previous session on startup.
    #[serde(default = "default_auto_restore")]
    pub auto_restore: bool,
}

fn default_target_delegatee() -> String {
    "GAME".to_string()
}

fn default_delegation_fetch_delay_ms() -> u64 {
    500
}

fn default_auto_restore() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_delegatee: default_target_delegatee(),
            restore: RetryConfig::restore_default(),
            profile_retry: RetryConfig::profile_default(),
            delegation_fetch_delay_ms: default_delegation_fetch_delay_ms(),
            auto_restore: default_auto_restore(),
        }
    }
}

impl AppConfig {
    pub fn delegation_fetch_delay(&self) -> Duration {
        Duration::from_millis(self.delegation_fetch_delay_ms)
    }

    /// Reject configurations the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_delegatee.trim().is_empty() {
            return Err(ConfigError::Other(
                "target_delegatee must not be empty".to_string(),
            ));
        }
        if self.restore.max_attempts == 0 || self.profile_retry.max_attempts == 0 {
            return Err(ConfigError::Other(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Path Utilities ====================

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("io", "permagame", "gamewallet")
        .ok_or_else(|| ConfigError::Other("Could not determine home directory".to_string()))
}

/// Get the application data directory.
pub fn get_data_dir() -> Result<PathBuf, ConfigError> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the config directory.
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the config file path.
pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Get the session marker file path.
pub fn get_marker_path() -> Result<PathBuf, ConfigError> {
    get_data_dir().map(|dir| dir.join("session.json"))
}

// ==================== Config I/O ====================

/// Load configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path()?)
}

/// Load configuration from `path`, falling back to defaults if it is missing.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path()?)
}

/// Save configuration to `path`.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Backup a corrupted config file for debugging.
pub fn backup_corrupted_config(path: &Path) -> Result<PathBuf, ConfigError> {
    let parent = path
        .parent()
        .ok_or_else(|| ConfigError::Other("Config path has no parent".to_string()))?;
    let backup_path = parent.join(format!(
        "config.backup.{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ));
    fs::copy(path, &backup_path)?;
    Ok(backup_path)
}
