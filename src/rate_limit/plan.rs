//! Quota Plan Parsing
//!
//! Turns the raw `quota_plan` and `quota_default` settings into a validated
//! [`PlanQuotaTable`] and [`QuotaDefault`].
//!
//! Two encodings are accepted for the plan table:
//!
//! ```text
//! quota_plan = "enterprise=1.5 professional=0.75 os=0.5"
//!
//! [ratelimits.devices.quota_plan]
//! enterprise = 2.5
//! professional = 2
//! ```
//!
//! Both are first normalized into `(plan, RawQuota)` pairs so that numeric
//! validation, and the errors it reports, are identical for either shape.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use super::error::{
    plan_setting, ConfigError, REASON_DUPLICATE_PLAN, REASON_EMPTY_PLAN, REASON_MISSING_SEPARATOR,
    REASON_NOT_FINITE, REASON_NOT_NUMERIC, REASON_NOT_POSITIVE,
};
use crate::config::{SETTING_RATELIMITS_DEVICES_QUOTA_DEFAULT, SETTING_RATELIMITS_DEVICES_QUOTA_PLAN};

/// Quota applied to tenants without a plan override when none is configured
pub const DEFAULT_QUOTA: f64 = 10.0;

/// Baseline quota for tenants without a plan override
///
/// Always positive and finite.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct QuotaDefault(f64);

impl QuotaDefault {
    /// Wrap a quota, rejecting anything that is not positive and finite
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    /// Get the quota value
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for QuotaDefault {
    fn default() -> Self {
        Self(DEFAULT_QUOTA)
    }
}

impl fmt::Display for QuotaDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-plan quota overrides
///
/// Plan names are case-sensitive and every value is positive and finite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanQuotaTable {
    plans: HashMap<String, f64>,
}

impl PlanQuotaTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the quota for a plan
    pub fn get(&self, plan: &str) -> Option<f64> {
        self.plans.get(plan).copied()
    }

    /// Number of plans with an override
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Iterate over `(plan, quota)` pairs in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.plans.iter().map(|(plan, quota)| (plan.as_str(), *quota))
    }

    /// Plans sorted by name, for display
    pub fn sorted(&self) -> BTreeMap<&str, f64> {
        self.iter().collect()
    }
}

/// A quota value before numeric validation
#[derive(Debug, Clone, PartialEq)]
enum RawQuota<'a> {
    /// Text taken from the delimited string encoding
    Text(&'a str),
    /// Any integer or floating point number from a mapping
    Number(f64),
    /// A mapping value that is not a number
    NotNumeric,
}

/// Parse both quota settings
///
/// `raw_plan` and `raw_default` are the values found under
/// `ratelimits.devices.quota_plan` and `ratelimits.devices.quota_default`.
pub fn parse(
    raw_plan: Option<&Value>,
    raw_default: Option<&Value>,
) -> Result<(PlanQuotaTable, QuotaDefault), ConfigError> {
    let default = parse_quota_default(raw_default)?;
    let plans = parse_quota_plan(raw_plan)?;
    Ok((plans, default))
}

/// Parse the plan table from either of its encodings
pub fn parse_quota_plan(raw: Option<&Value>) -> Result<PlanQuotaTable, ConfigError> {
    let key = SETTING_RATELIMITS_DEVICES_QUOTA_PLAN;
    let pairs = match raw {
        Some(raw) => normalize(key, raw)?,
        None => Vec::new(),
    };

    let mut plans = HashMap::with_capacity(pairs.len());
    for (plan, raw_quota) in pairs {
        let setting = plan_setting(key, &plan);
        let quota = validate_quota(&setting, raw_quota)?;
        plans.insert(plan, quota);
    }

    Ok(PlanQuotaTable { plans })
}

/// Parse the default quota, falling back to [`DEFAULT_QUOTA`] when unset
pub fn parse_quota_default(raw: Option<&Value>) -> Result<QuotaDefault, ConfigError> {
    let key = SETTING_RATELIMITS_DEVICES_QUOTA_DEFAULT;
    let raw_quota = match raw {
        None | Some(Value::Null) => return Ok(QuotaDefault::default()),
        Some(Value::String(text)) => RawQuota::Text(text.trim()),
        Some(Value::Number(number)) => number_to_raw(number),
        Some(_) => RawQuota::NotNumeric,
    };

    let quota = validate_quota(key, raw_quota)?;
    Ok(QuotaDefault(quota))
}

/// Map any accepted encoding onto `(plan, RawQuota)` pairs
fn normalize<'a>(key: &str, raw: &'a Value) -> Result<Vec<(String, RawQuota<'a>)>, ConfigError> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::String(text) => normalize_delimited(key, text),
        Value::Object(map) => map
            .iter()
            .map(|(plan, value)| {
                if plan.is_empty() {
                    return Err(ConfigError::value(plan_setting(key, plan), REASON_EMPTY_PLAN));
                }
                let raw_quota = match value {
                    Value::Number(number) => number_to_raw(number),
                    _ => RawQuota::NotNumeric,
                };
                Ok((plan.clone(), raw_quota))
            })
            .collect(),
        other => Err(ConfigError::type_error(
            key,
            format!("unsupported value type {}", value_kind(other)),
        )),
    }
}

fn normalize_delimited<'a>(
    key: &str,
    text: &'a str,
) -> Result<Vec<(String, RawQuota<'a>)>, ConfigError> {
    let items: Vec<&str> = text.split_whitespace().collect();
    let syntax_error = |index: usize, reason: &'static str| ConfigError::Syntax {
        key: key.to_string(),
        items: items.join(" "),
        index: index + 1,
        reason,
    };

    let mut seen = HashSet::with_capacity(items.len());
    let mut pairs = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let (plan, value) = item
            .split_once('=')
            .ok_or_else(|| syntax_error(index, REASON_MISSING_SEPARATOR))?;
        if plan.is_empty() {
            return Err(syntax_error(index, REASON_EMPTY_PLAN));
        }
        if !seen.insert(plan) {
            return Err(syntax_error(index, REASON_DUPLICATE_PLAN));
        }
        pairs.push((plan.to_string(), RawQuota::Text(value)));
    }

    Ok(pairs)
}

fn number_to_raw(number: &serde_json::Number) -> RawQuota<'static> {
    number
        .as_f64()
        .map(RawQuota::Number)
        .unwrap_or(RawQuota::NotNumeric)
}

/// The single validation step shared by every encoding
fn validate_quota(setting: &str, raw: RawQuota<'_>) -> Result<f64, ConfigError> {
    let quota = match raw {
        RawQuota::Number(quota) => quota,
        RawQuota::Text(text) => text.parse::<f64>().map_err(|source| ConfigError::ParseQuota {
            setting: setting.to_string(),
            source,
        })?,
        RawQuota::NotNumeric => return Err(ConfigError::type_error(setting, REASON_NOT_NUMERIC)),
    };

    if quota.is_nan() || quota <= 0.0 {
        return Err(ConfigError::value(setting, REASON_NOT_POSITIVE));
    }
    if quota.is_infinite() {
        return Err(ConfigError::value(setting, REASON_NOT_FINITE));
    }

    Ok(quota)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_parse_delimited_string() {
        let raw = json!("enterprise=1.5 professional=0.75 os=0.5");
        let table = parse_quota_plan(Some(&raw)).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get("enterprise"), Some(1.5));
        assert_eq!(table.get("professional"), Some(0.75));
        assert_eq!(table.get("os"), Some(0.5));
    }

    #[test]
    fn test_parse_mapping_with_mixed_numbers() {
        let raw = json!({
            "enterprise": 2.5_f64,
            "professional": 2_i64,
            "os": 1_u64,
        });
        let table = parse_quota_plan(Some(&raw)).unwrap();

        assert_eq!(table.get("enterprise"), Some(2.5));
        assert_eq!(table.get("professional"), Some(2.0));
        assert_eq!(table.get("os"), Some(1.0));
    }

    #[test]
    fn test_absent_and_empty_plans() {
        assert!(parse_quota_plan(None).unwrap().is_empty());
        assert!(parse_quota_plan(Some(&Value::Null)).unwrap().is_empty());
        assert!(parse_quota_plan(Some(&json!(""))).unwrap().is_empty());
        assert!(parse_quota_plan(Some(&json!("   \t "))).unwrap().is_empty());
        assert!(parse_quota_plan(Some(&json!({}))).unwrap().is_empty());
    }

    #[test]
    fn test_plan_names_are_case_sensitive() {
        let raw = json!("Enterprise=1 enterprise=2");
        let table = parse_quota_plan(Some(&raw)).unwrap();
        assert_eq!(table.get("Enterprise"), Some(1.0));
        assert_eq!(table.get("enterprise"), Some(2.0));
        assert_eq!(table.get("ENTERPRISE"), None);
    }

    #[test]
    fn test_missing_separator_reports_index() {
        let raw = json!("ok=1 broken also=2");
        let err = parse_quota_plan(Some(&raw)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert_eq!(
            err.to_string(),
            "invalid config ratelimits.devices.quota_plan: value [ok=1 broken also=2] item #2: \
             missing key/value separator '='"
        );
    }

    #[test]
    fn test_empty_plan_name_in_string() {
        let err = parse_quota_plan(Some(&json!("=1.5"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(err.to_string().contains("item #1: empty plan name"));
    }

    #[test]
    fn test_duplicate_plan_in_string() {
        let err = parse_quota_plan(Some(&json!("os=1 os=2"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(err.to_string().contains("item #2: duplicate plan name"));
    }

    #[test]
    fn test_unparseable_value() {
        let err = parse_quota_plan(Some(&json!("enterprise=many"))).unwrap_err();
        assert!(matches!(err, ConfigError::ParseQuota { .. }));
        assert_eq!(err.setting(), "ratelimits.devices.quota_plan[enterprise]");
        assert!(err.to_string().contains("error parsing quota value"));
    }

    #[test]
    fn test_non_positive_values() {
        for raw in [json!("os=0"), json!("os=-2"), json!({"os": 0}), json!({"os": -1.0})] {
            let err = parse_quota_plan(Some(&raw)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Value);
            assert_eq!(
                err.to_string(),
                "invalid config value ratelimits.devices.quota_plan[os]: must be a positive value"
            );
        }
    }

    #[test]
    fn test_nan_and_infinity_are_rejected() {
        let err = parse_quota_plan(Some(&json!("os=NaN"))).unwrap_err();
        assert!(err.to_string().ends_with(REASON_NOT_POSITIVE));

        let err = parse_quota_plan(Some(&json!("os=inf"))).unwrap_err();
        assert!(err.to_string().ends_with(REASON_NOT_FINITE));
    }

    #[test]
    fn test_non_numeric_mapping_value() {
        for value in [json!("123"), json!(true), json!([1]), json!({"nested": 1})] {
            let raw = json!({ "foo": value });
            let err = parse_quota_plan(Some(&raw)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Type);
            assert_eq!(
                err.to_string(),
                "invalid config value ratelimits.devices.quota_plan[foo]: not a numeric value"
            );
        }
    }

    #[test]
    fn test_empty_mapping_key() {
        let err = parse_quota_plan(Some(&json!({"": 1.0}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
        assert!(err.to_string().ends_with(REASON_EMPTY_PLAN));
    }

    #[test]
    fn test_unsupported_shape() {
        for raw in [json!(true), json!(1.5), json!(["os=1"])] {
            let err = parse_quota_plan(Some(&raw)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Type);
            assert!(err
                .to_string()
                .starts_with("invalid config value ratelimits.devices.quota_plan: unsupported value type"));
        }
    }

    #[test]
    fn test_default_quota() {
        assert_eq!(parse_quota_default(None).unwrap().get(), DEFAULT_QUOTA);
        assert_eq!(parse_quota_default(Some(&json!(3))).unwrap().get(), 3.0);
        assert_eq!(parse_quota_default(Some(&json!(0.25))).unwrap().get(), 0.25);
        assert_eq!(parse_quota_default(Some(&json!(" 7.5 "))).unwrap().get(), 7.5);
    }

    #[test]
    fn test_bad_default_quota() {
        let err = parse_quota_default(Some(&json!(-1))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
        assert_eq!(
            err.to_string(),
            "invalid config value ratelimits.devices.quota_default: must be a positive value"
        );

        let err = parse_quota_default(Some(&json!("lots"))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid config value ratelimits.devices.quota_default: error parsing quota value"
        );

        let err = parse_quota_default(Some(&json!({"a": 1}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn test_parse_checks_default_without_plans() {
        let err = parse(None, Some(&json!(-1))).unwrap_err();
        assert_eq!(err.setting(), "ratelimits.devices.quota_default");
    }

    #[test]
    fn test_quota_default_new() {
        assert!(QuotaDefault::new(1.0).is_some());
        assert!(QuotaDefault::new(0.0).is_none());
        assert!(QuotaDefault::new(-3.0).is_none());
        assert!(QuotaDefault::new(f64::INFINITY).is_none());
        assert!(QuotaDefault::new(f64::NAN).is_none());
    }

    #[test]
    fn test_sorted_view() {
        let table = parse_quota_plan(Some(&json!("b=2 a=1 c=3"))).unwrap();
        let names: Vec<&str> = table.sorted().keys().copied().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
