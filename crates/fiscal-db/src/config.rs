//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FISCAL_DB_PATH=/var/lib/pos/fiscal.db                              │
//! │     FISCAL_BUSY_TIMEOUT_MS=5000                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fiscal-pos/fiscal.toml (Linux)                           │
//! │     ~/Library/Application Support/do.fiscal.pos/fiscal.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "./fiscal.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [locking]
//! initial_backoff_ms = 25
//! max_backoff_ms = 500
//! max_elapsed_ms = 10000
//!
//! [fiscal]
//! low_sequence_warning = 50
//! require_rnc = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pool::DbConfig;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// `[database]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long SQLite itself waits on a locked database before
    /// reporting busy.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./fiscal.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// `[locking]` - retry of a whole write transaction after SQLite gave up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingSettings {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Total budget after which the operation fails with `LockTimeout`.
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

fn default_initial_backoff() -> u64 {
    25
}

fn default_max_backoff() -> u64 {
    500
}

fn default_max_elapsed() -> u64 {
    10_000
}

impl Default for LockingSettings {
    fn default() -> Self {
        LockingSettings {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

/// `[fiscal]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalSettings {
    /// Warn when an active sequence has this many numbers left or fewer.
    #[serde(default = "default_low_sequence_warning")]
    pub low_sequence_warning: i64,

    /// Refuse tax-credit and government NCFs without a valid customer RNC.
    #[serde(default = "default_true")]
    pub require_rnc: bool,
}

fn default_true() -> bool {
    true
}

fn default_low_sequence_warning() -> i64 {
    50
}

impl Default for FiscalSettings {
    fn default() -> Self {
        FiscalSettings {
            low_sequence_warning: default_low_sequence_warning(),
            require_rnc: true,
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiscalConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub locking: LockingSettings,

    #[serde(default)]
    pub fiscal: FiscalSettings,
}

impl FiscalConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (fiscal.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading fiscal config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load fiscal config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(
                "database.min_connections cannot exceed max_connections".into(),
            ));
        }
        if self.locking.initial_backoff_ms == 0
            || self.locking.initial_backoff_ms > self.locking.max_backoff_ms
        {
            return Err(ConfigError::Invalid(
                "locking.initial_backoff_ms must be in 1..=max_backoff_ms".into(),
            ));
        }
        if self.fiscal.low_sequence_warning < 0 {
            return Err(ConfigError::Invalid(
                "fiscal.low_sequence_warning cannot be negative".into(),
            ));
        }
        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FISCAL_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("FISCAL_DB_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(m) => self.database.max_connections = m,
                Err(_) => warn!(value = %max, "Ignoring invalid FISCAL_DB_MAX_CONNECTIONS"),
            }
        }

        if let Ok(ms) = std::env::var("FISCAL_BUSY_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                debug!(busy_timeout_ms = ms, "Overriding busy timeout from environment");
                self.database.busy_timeout_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("FISCAL_LOCK_MAX_ELAPSED_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.locking.max_elapsed_ms = ms;
            }
        }

        if let Ok(n) = std::env::var("FISCAL_LOW_SEQUENCE_WARNING") {
            if let Ok(n) = n.parse::<i64>() {
                self.fiscal.low_sequence_warning = n;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("do", "fiscal", "pos")
            .map(|dirs| dirs.config_dir().join("fiscal.toml"))
    }

    /// Connection pool settings derived from `[database]`.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    /// Retry policy derived from `[locking]`.
    pub fn lock_retry(&self) -> LockRetry {
        LockRetry {
            initial_backoff: Duration::from_millis(self.locking.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.locking.max_backoff_ms),
            max_elapsed: Duration::from_millis(self.locking.max_elapsed_ms),
        }
    }
}

/// Bounded exponential retry of a write transaction on `database is locked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_elapsed: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        FiscalConfig::default().lock_retry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FiscalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.lock_retry().max_elapsed, Duration::from_secs(10));
    }

    #[test]
    fn test_config_validation() {
        let mut config = FiscalConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = FiscalConfig::default();
        config.locking.initial_backoff_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: FiscalConfig = toml::from_str(
            r#"
            [database]
            path = "/tmp/pos.db"
            busy_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/pos.db"));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.fiscal.low_sequence_warning, 50);
        assert!(config.fiscal.require_rnc);

        let db = config.db_config();
        assert_eq!(db.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_toml_serialization() {
        let toml_str = toml::to_string_pretty(&FiscalConfig::default()).unwrap();
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[locking]"));
    }
}
