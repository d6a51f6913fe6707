//! Rate Limit Configuration
//!
//! Typed view of the `ratelimits.devices.*` settings.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::error::{ConfigError, REASON_NOT_POSITIVE};
use super::plan::{self, PlanQuotaTable, QuotaDefault};
use super::quota::{QuotaSource, TenantQuota};
use crate::config::{
    Settings, SETTING_RATELIMITS_DEVICES_ENABLE, SETTING_RATELIMITS_DEVICES_INTERVAL,
    SETTING_RATELIMITS_DEVICES_QUOTA_DEFAULT, SETTING_RATELIMITS_DEVICES_QUOTA_PLAN,
};

/// Default replenishment interval: quotas are requests per second
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Per-plan quota overrides
    pub plans: PlanQuotaTable,

    /// Quota for tenants without an override
    pub default_quota: QuotaDefault,

    /// Window a quota is replenished over
    pub interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            plans: PlanQuotaTable::new(),
            default_quota: QuotaDefault::default(),
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl RateLimitConfig {
    /// Disable rate limiting
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build the configuration from raw settings
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found. Quota settings are only
    /// examined when limiting is enabled.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let enabled = parse_enable(settings.get(SETTING_RATELIMITS_DEVICES_ENABLE))?;
        if !enabled {
            debug!("Device rate limiting disabled");
            return Ok(Self::disabled());
        }

        let (plans, default_quota) = plan::parse(
            settings.get(SETTING_RATELIMITS_DEVICES_QUOTA_PLAN),
            settings.get(SETTING_RATELIMITS_DEVICES_QUOTA_DEFAULT),
        )?;
        let interval = parse_interval(settings.get(SETTING_RATELIMITS_DEVICES_INTERVAL))?;

        Ok(Self {
            enabled,
            plans,
            default_quota,
            interval,
        })
    }

    /// Resolve the quota of a tenant on the given plan
    pub fn tenant_quota(&self, plan: Option<&str>) -> TenantQuota {
        match plan.and_then(|name| self.plans.get(name).map(|value| (name, value))) {
            Some((name, value)) => TenantQuota {
                value,
                source: QuotaSource::Plan(name.to_string()),
            },
            None => TenantQuota {
                value: self.default_quota.get(),
                source: QuotaSource::Default,
            },
        }
    }
}

/// Accepts booleans and the usual textual spellings of them
fn parse_enable(raw: Option<&Value>) -> Result<bool, ConfigError> {
    let key = SETTING_RATELIMITS_DEVICES_ENABLE;
    match raw {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(enabled)) => Ok(*enabled),
        Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" | "" => Ok(false),
            _ => Err(ConfigError::value(key, "not a boolean value")),
        },
        Some(Value::Number(number)) => match number.as_i64() {
            Some(1) => Ok(true),
            Some(0) => Ok(false),
            _ => Err(ConfigError::value(key, "not a boolean value")),
        },
        Some(_) => Err(ConfigError::type_error(key, "not a boolean value")),
    }
}

/// Interval in seconds, integer or fractional
fn parse_interval(raw: Option<&Value>) -> Result<Duration, ConfigError> {
    let key = SETTING_RATELIMITS_DEVICES_INTERVAL;
    let seconds = match raw {
        None | Some(Value::Null) => return Ok(DEFAULT_INTERVAL),
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| ConfigError::type_error(key, "not a numeric value"))?,
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .map_err(|e| ConfigError::value(key, format!("error parsing interval: {}", e)))?,
        Some(_) => return Err(ConfigError::type_error(key, "not a numeric value")),
    };

    if seconds.is_nan() || seconds <= 0.0 {
        return Err(ConfigError::value(key, REASON_NOT_POSITIVE));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| ConfigError::value(key, format!("invalid interval: {}", e)))
}
