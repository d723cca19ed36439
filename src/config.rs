//! Configuration for the sleep monitor agent.

use crate::storage::{RetryPolicy, TimestampMode};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Rows accumulated before a rollover: one per minute for 24 hours.
pub const DEFAULT_EXPORT_THRESHOLD: u64 = 1440;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval between collection ticks
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Row count that triggers export and reset
    pub export_threshold: u64,

    /// Which sensor channels to sample
    pub sources: SourceConfig,

    /// Path for the database, failure log, stats and status flag
    pub data_path: PathBuf,

    /// Directory receiving exported CSV files
    pub export_path: PathBuf,

    /// IANA timezone for stored timestamps and export filenames
    pub timezone: String,

    /// How the store assigns row timestamps
    pub timestamp_mode: TimestampMode,

    /// Insert retry policy
    pub retry: RetryPolicy,

    /// Whether collection is currently paused
    pub paused: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sleep-monitor-agent");
        let export_dir = dirs::document_dir()
            .unwrap_or_else(|| data_dir.clone())
            .join("SleepData");

        Self {
            tick_interval: Duration::from_secs(60),
            export_threshold: DEFAULT_EXPORT_THRESHOLD,
            sources: SourceConfig::default(),
            data_path: data_dir,
            export_path: export_dir,
            timezone: "UTC".to_string(),
            timestamp_mode: TimestampMode::default(),
            retry: RetryPolicy::default(),
            paused: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "tick_interval must be at least 1 second".to_string(),
            ));
        }
        if self.export_threshold == 0 {
            return Err(ConfigError::Invalid(
                "export_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sleep-monitor-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_path.join("sleep_data.db")
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.data_path.join("insertion_failures.txt")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_path.join("status.json")
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }
}

/// Configuration for which sensor channels to sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub light: bool,
    pub proximity: bool,
    pub accelerometer: bool,
    pub gyroscope: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            light: true,
            proximity: true,
            accelerometer: true,
            gyroscope: true,
        }
    }
}

impl SourceConfig {
    /// Parse source configuration from a comma-separated string.
    pub fn from_csv(s: &str) -> Self {
        let sources: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let has = |name: &str| sources.iter().any(|s| s == name || s == "all");

        Self {
            light: has("light"),
            proximity: has("proximity"),
            accelerometer: has("accelerometer"),
            gyroscope: has("gyroscope"),
        }
    }

    /// Check if at least one source is enabled.
    pub fn any_enabled(&self) -> bool {
        self.light || self.proximity || self.accelerometer || self.gyroscope
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),
    #[error("Unknown timezone: {0}")]
    Timezone(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
