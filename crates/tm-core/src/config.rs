//! Configuration system for cell-tm

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub poll: PollConfig,
    pub timeouts: TimeoutConfig,
    pub exit_codes: ExitCodeConfig,
    pub debug: DebugConfig,
}

/// Polling loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Sleep quantum when a pump pass found nothing to do
    pub interval_ms: u64,
    /// Delay before the final drain pass after the loop exits
    pub grace_ms: u64,
    /// Upper bound on notifications drained in one iteration
    pub max_drain: usize,
}

/// Timeout settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle timeout, reset whenever a notification is delivered
    pub idle_ms: Option<u64>,
    /// Absolute timeout, fixed at loop entry
    pub absolute_ms: Option<u64>,
    pub on_timeout: TimeoutPolicy,
}

/// What to do with operations still pending when a timeout fires
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Leave them running on the target
    #[default]
    Abandon,
    /// Ask the target manager to cancel them
    Cancel,
}

/// Process exit codes per terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitCodeConfig {
    pub success: i32,
    /// Loop succeeded but at least one operation failed
    pub operation_failure: i32,
    pub abort_match_failure: i32,
    pub timeout: i32,
    pub fatal: i32,
    pub cancelled: i32,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_json: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(ConfigError::Invalid {
                field: "debug.log_level",
                reason: format!("unknown level '{}'", other),
            }),
        }
    }
}

// Default implementations

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 20,
            grace_ms: 50,
            max_drain: 256,
        }
    }
}

impl Default for ExitCodeConfig {
    fn default() -> Self {
        Self {
            success: 0,
            operation_failure: 1,
            abort_match_failure: 1,
            timeout: 2,
            fatal: 3,
            cancelled: 130,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl TimeoutConfig {
    pub fn idle(&self) -> Option<Duration> {
        self.idle_ms.map(Duration::from_millis)
    }

    pub fn absolute(&self) -> Option<Duration> {
        self.absolute_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from the default location, or create it if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cell-tm")
            .join("config.toml")
    }

    /// Reject values the polling loop cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll.max_drain == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.max_drain",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.timeouts.idle_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "timeouts.idle_ms",
                reason: "use no value to disable the idle timeout".to_string(),
            });
        }
        Ok(())
    }
}
