// Configuration File Support
//
// This module provides configuration file parsing for the device auth
// rate limiter. Supports TOML format with environment variable overrides.
// Configuration files are loaded from the XDG config directory:
// ~/.config/deviceauth/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::rate_limit::{ConfigError, RateLimitConfig};

/// Enables per-tenant device rate limiting
pub const SETTING_RATELIMITS_DEVICES_ENABLE: &str = "ratelimits.devices.enable";

/// Per-plan quotas, as a `plan=value` string or a mapping
pub const SETTING_RATELIMITS_DEVICES_QUOTA_PLAN: &str = "ratelimits.devices.quota_plan";

/// Quota for tenants whose plan has no override
pub const SETTING_RATELIMITS_DEVICES_QUOTA_DEFAULT: &str = "ratelimits.devices.quota_default";

/// Replenishment interval in seconds
pub const SETTING_RATELIMITS_DEVICES_INTERVAL: &str = "ratelimits.devices.interval";

/// Prefix of every environment variable override
pub const ENV_PREFIX: &str = "DEVICEAUTH";

/// Raw settings that may be overridden from the environment
const ENV_SETTINGS: &[&str] = &[
    SETTING_RATELIMITS_DEVICES_ENABLE,
    SETTING_RATELIMITS_DEVICES_QUOTA_PLAN,
    SETTING_RATELIMITS_DEVICES_QUOTA_DEFAULT,
    SETTING_RATELIMITS_DEVICES_INTERVAL,
];

/// Raw configuration tree addressed by dotted keys
///
/// Values keep the shape they were given in: a TOML table stays a mapping,
/// an environment variable is always a string. Typed interpretation is left
/// to the consumer of each key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    root: Map<String, Value>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a parsed document; the top level must be a table
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            Value::Null => Ok(Self::default()),
            other => anyhow::bail!("Configuration root must be a table, got {}", other),
        }
    }

    /// Look up a dotted key such as `ratelimits.devices.enable`
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        parts.try_fold(self.root.get(first)?, |value, part| value.as_object()?.get(part))
    }

    /// Set a dotted key, creating intermediate tables as needed
    ///
    /// Intermediate values that are not tables are replaced.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let mut parts: Vec<&str> = key.split('.').collect();
        let last = match parts.pop() {
            Some(last) => last,
            None => return,
        };

        let mut table = &mut self.root;
        for part in parts {
            let entry = table
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            table = map;
        }
        table.insert(last.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Apply `DEVICEAUTH_*` overrides from the given variables
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            if let Some(key) = ENV_SETTINGS
                .iter()
                .find(|key| env_var_name(key) == name.as_ref())
            {
                self.set(key, Value::String(value.into()));
            }
        }
    }
}

/// Environment variable overriding a dotted key
///
/// `ratelimits.devices.quota_plan` becomes
/// `DEVICEAUTH_RATELIMITS_DEVICES_QUOTA_PLAN`.
pub fn env_var_name(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.to_uppercase().replace('.', "_"))
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// The whole document as raw settings
    #[serde(skip)]
    pub settings: Settings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve the metrics endpoint
    pub enabled: bool,

    /// Port for metrics server
    pub port: u16,

    /// Idle limiter eviction period in seconds
    pub cleanup_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
            cleanup_interval_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. If the config file does not exist, returns default
    /// configuration with environment overrides applied.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        // Apply environment variable overrides
        let config = config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse a TOML document without applying overrides or validation
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        let raw: Value = toml::from_str(content)?;
        config.settings = Settings::from_value(raw)?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/deviceauth/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("io", "deviceauth", "deviceauth") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("deviceauth")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - DEVICEAUTH_LOG_LEVEL
    /// - DEVICEAUTH_LOG_FORMAT
    /// - DEVICEAUTH_METRICS_ENABLED
    /// - DEVICEAUTH_METRICS_PORT
    /// - DEVICEAUTH_RATELIMITS_DEVICES_* for every rate limit setting
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides(std::env::vars())
    }

    /// Apply overrides from an explicit set of variables
    pub fn apply_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(name, _)| name.starts_with(ENV_PREFIX))
            .collect();

        for (name, value) in &vars {
            match name.as_str() {
                "DEVICEAUTH_LOG_LEVEL" => self.logging.level = value.clone(),
                "DEVICEAUTH_LOG_FORMAT" => self.logging.format = value.clone(),
                "DEVICEAUTH_METRICS_ENABLED" => {
                    self.metrics.enabled = value.parse().unwrap_or(self.metrics.enabled);
                }
                "DEVICEAUTH_METRICS_PORT" => {
                    if let Ok(port) = value.parse::<u16>() {
                        self.metrics.port = port;
                    }
                }
                _ => {}
            }
        }

        self.settings.apply_overrides(vars);
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate metrics configuration
        if self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }
        if self.metrics.cleanup_interval_secs == 0 {
            anyhow::bail!("Cleanup interval must be > 0");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Extract the device rate limit configuration
    pub fn rate_limits(&self) -> std::result::Result<RateLimitConfig, ConfigError> {
        RateLimitConfig::from_settings(&self.settings)
    }
}
