//! Configuration system for agentdock
//!
//! Supports loading configuration from:
//! 1. CLI --config argument
//! 2. ~/.config/agentdock/config.{AGENTDOCK_ENV}.json (or .toml)
//! 3. Default values
//!
//! Where AGENTDOCK_ENV can be: production (default), development, test
//!
//! # Examples
//!
//! ```no_run
//! use agentdock::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! println!("Backend: {} / {}", config.api_url, config.ws_url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variables
//!
//! Environment variables override config file values:
//! - AGENTDOCK_API_URL
//! - AGENTDOCK_WS_URL
//! - AGENTDOCK_REQUEST_TIMEOUT
//! - AGENTDOCK_DEBUG
//! - AGENTDOCK_LOG_LEVEL

use crate::logging::{Level, UnknownLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Failed to parse config TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Health probing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between periodic health checks once the app is ready
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Consecutive failures during startup before declaring a connection failure
    #[serde(default = "default_failure_threshold")]
    pub startup_failure_threshold: u32,

    /// Delay between startup health checks
    #[serde(default = "default_startup_retry")]
    pub startup_retry_ms: u64,
}

fn default_health_interval() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_startup_retry() -> u64 {
    2000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            startup_failure_threshold: default_failure_threshold(),
            startup_retry_ms: default_startup_retry(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn startup_retry(&self) -> Duration {
        Duration::from_millis(self.startup_retry_ms)
    }
}

/// Realtime channel reconnect policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the task backend REST API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL of the realtime websocket endpoint
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Upper bound for plan/status/detail requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// Minimum level written to the session log
    #[serde(default)]
    pub log_level: Level,

    /// File the configuration was read from; `None` for defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            request_timeout_secs: default_request_timeout(),
            health: HealthConfig::default(),
            realtime: RealtimeConfig::default(),
            debug: false,
            log_level: Level::default(),
            source: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a `.json` or `.toml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };

        config.source = Some(path.to_path_buf());
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration with standard priority:
    /// 1. Explicit path
    /// 2. ~/.config/agentdock/config.{AGENTDOCK_ENV}.{json,toml}
    /// 3. Defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            if path.exists() {
                return Self::from_file(path);
            } else {
                return Err(ConfigError::ValidationError(format!(
                    "Config file not found: {:?}",
                    path
                )));
            }
        }

        let env = std::env::var("AGENTDOCK_ENV").unwrap_or_else(|_| "production".to_string());

        if let Some(config_dir) = Self::config_dir() {
            for ext in ["json", "toml"] {
                let config_path = config_dir.join(format!("config.{}.{}", env, ext));
                if config_path.exists() {
                    return Self::from_file(&config_path);
                }
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("AGENTDOCK_API_URL") {
            self.api_url = url;
        }

        if let Ok(url) = std::env::var("AGENTDOCK_WS_URL") {
            self.ws_url = url;
        }

        if let Ok(timeout) = std::env::var("AGENTDOCK_REQUEST_TIMEOUT") {
            self.request_timeout_secs = timeout.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "AGENTDOCK_REQUEST_TIMEOUT must be a number of seconds, got: {}",
                    timeout
                ))
            })?;
        }

        if let Ok(debug) = std::env::var("AGENTDOCK_DEBUG") {
            self.debug = debug.eq_ignore_ascii_case("true")
                || debug == "1"
                || debug.eq_ignore_ascii_case("yes");
        }

        if let Ok(level) = std::env::var("AGENTDOCK_LOG_LEVEL") {
            self.log_level = level
                .parse()
                .map_err(|e: UnknownLevel| ConfigError::ValidationError(e.to_string()))?;
        }

        Ok(())
    }

    /// One line describing where this configuration came from
    pub fn describe_source(&self) -> String {
        match &self.source {
            Some(path) => format!("Loaded config from {}", path.display()),
            None => "Using default configuration with environment overrides".to_string(),
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("api_url", &self.api_url, &["http", "https"])?;
        validate_url("ws_url", &self.ws_url, &["ws", "wss"])?;

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.health.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "health.interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.health.startup_failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.startup_failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.realtime.initial_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "realtime.initial_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.realtime.initial_delay_ms > self.realtime.max_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "realtime.initial_delay_ms ({}) exceeds realtime.max_delay_ms ({})",
                self.realtime.initial_delay_ms, self.realtime.max_delay_ms
            )));
        }

        if self.realtime.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "realtime.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("agentdock"))
    }

    /// Save configuration to file (JSON)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn validate_url(field: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("{} is not a valid URL: {}", field, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::ValidationError(format!(
            "{} must use one of {:?}, got: {}",
            field,
            schemes,
            url.scheme()
        )));
    }
    Ok(())
}
