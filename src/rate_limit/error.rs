//! Rate Limit Configuration Errors
//!
//! Every error here is raised while turning raw settings into a quota table.
//! None of them can happen on the admission path.

use std::num::ParseFloatError;

/// Reason reported for zero, negative or NaN quotas
pub const REASON_NOT_POSITIVE: &str = "must be a positive value";

/// Reason reported for infinite quotas
pub const REASON_NOT_FINITE: &str = "must be a finite value";

/// Reason reported for mapping values that are not numbers
pub const REASON_NOT_NUMERIC: &str = "not a numeric value";

/// Reason reported for a string item without `=`
pub const REASON_MISSING_SEPARATOR: &str = "missing key/value separator '='";

/// Reason reported for `=value` items and empty mapping keys
pub const REASON_EMPTY_PLAN: &str = "empty plan name";

/// Reason reported when a plan is listed twice in the string encoding
pub const REASON_DUPLICATE_PLAN: &str = "duplicate plan name";

/// Coarse classification of configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed string encoding
    Syntax,
    /// Value present but semantically invalid
    Value,
    /// Unsupported shape or element type
    Type,
}

/// Error types for quota configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An item of the delimited string encoding is malformed
    #[error("invalid config {key}: value [{items}] item #{index}: {reason}")]
    Syntax {
        key: String,
        /// All tokenized items, space separated
        items: String,
        /// 1-based position of the offending item
        index: usize,
        reason: &'static str,
    },

    /// The value is present but not acceptable
    #[error("invalid config value {setting}: {reason}")]
    Value { setting: String, reason: String },

    /// A quota given as text is not a real number
    #[error("invalid config value {setting}: error parsing quota value")]
    ParseQuota {
        setting: String,
        #[source]
        source: ParseFloatError,
    },

    /// The value has a shape the parser does not accept
    #[error("invalid config value {setting}: {reason}")]
    Type { setting: String, reason: String },
}

impl ConfigError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Syntax { .. } => ErrorKind::Syntax,
            ConfigError::Value { .. } | ConfigError::ParseQuota { .. } => ErrorKind::Value,
            ConfigError::Type { .. } => ErrorKind::Type,
        }
    }

    /// The offending setting, including the plan suffix where one applies
    pub fn setting(&self) -> &str {
        match self {
            ConfigError::Syntax { key, .. } => key,
            ConfigError::Value { setting, .. }
            | ConfigError::ParseQuota { setting, .. }
            | ConfigError::Type { setting, .. } => setting,
        }
    }

    pub(crate) fn value(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Value {
            setting: setting.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn type_error(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Type {
            setting: setting.into(),
            reason: reason.into(),
        }
    }
}

/// Format `key[plan]`, the setting path used in plan-level errors
pub(crate) fn plan_setting(key: &str, plan: &str) -> String {
    format!("{}[{}]", key, plan)
}
