//! Property-Based Tests for Quota Parsing and Admission
//!
//! # Test Strategies
//!
//! - **Encodings**: a plan table written as `plan=value` items and the same
//!   table written as a mapping parse to identical quota tables
//! - **Validation**: every non-positive quota is rejected and the error names
//!   the offending plan
//! - **Syntax errors**: the reported item number points at the item missing
//!   its `=` separator
//! - **Buckets**: a fresh bucket admits `floor(quota)` requests back to back
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib rate_limit::proptests
//! ```

use proptest::collection::btree_map;
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::error::{ConfigError, ErrorKind, REASON_MISSING_SEPARATOR};
use super::plan::{parse_quota_default, parse_quota_plan};
use super::quota::TokenBucket;

fn arb_plan_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,11}"
}

fn arb_quota() -> impl Strategy<Value = f64> {
    prop_oneof![
        (1u32..100_000).prop_map(|n| n as f64 / 100.0),
        1.0e-3..1.0e3f64,
        // Just below and just above whole numbers
        (1u32..1_000, -1.0e-6..1.0e-6f64).prop_map(|(n, offset)| n as f64 + offset),
    ]
}

fn arb_plan_table() -> impl Strategy<Value = BTreeMap<String, f64>> {
    btree_map(arb_plan_name(), arb_quota(), 0..8)
}

fn delimited(table: &BTreeMap<String, f64>) -> String {
    table
        .iter()
        .map(|(plan, quota)| format!("{}={}", plan, quota))
        .collect::<Vec<_>>()
        .join(" ")
}

fn mapping(table: &BTreeMap<String, f64>) -> Value {
    let map: Map<String, Value> = table
        .iter()
        .map(|(plan, quota)| (plan.clone(), Value::from(*quota)))
        .collect();
    Value::Object(map)
}

proptest! {
    #[test]
    fn prop_delimited_string_matches_table(table in arb_plan_table()) {
        let parsed = parse_quota_plan(Some(&Value::String(delimited(&table)))).unwrap();

        prop_assert_eq!(parsed.len(), table.len());
        for (plan, quota) in &table {
            prop_assert_eq!(parsed.get(plan), Some(*quota));
        }
    }

    #[test]
    fn prop_string_and_mapping_agree(table in arb_plan_table()) {
        let from_string = parse_quota_plan(Some(&Value::String(delimited(&table)))).unwrap();
        let from_mapping = parse_quota_plan(Some(&mapping(&table))).unwrap();
        prop_assert_eq!(from_string, from_mapping);
    }

    #[test]
    fn prop_extra_whitespace_is_ignored(table in arb_plan_table(), pad in "[ \t\n]{1,4}") {
        let spaced = table
            .iter()
            .map(|(plan, quota)| format!("{}{}={}", pad, plan, quota))
            .collect::<String>();

        let parsed = parse_quota_plan(Some(&Value::String(spaced))).unwrap();
        let expected = parse_quota_plan(Some(&Value::String(delimited(&table)))).unwrap();
        prop_assert_eq!(parsed, expected);
    }

    #[test]
    fn prop_non_positive_quota_rejected(
        table in arb_plan_table(),
        plan in "bad[a-z]{1,4}",
        quota in prop_oneof![Just(0.0), -1.0e6..0.0f64],
    ) {
        let mut table = table;
        table.insert(plan.clone(), quota);

        for raw in [Value::String(delimited(&table)), mapping(&table)] {
            let err = parse_quota_plan(Some(&raw)).unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::Value);
            let expected = format!("ratelimits.devices.quota_plan[{}]", plan);
            prop_assert_eq!(err.setting(), expected.as_str());
            prop_assert!(err.to_string().ends_with("must be a positive value"));
        }
    }

    #[test]
    fn prop_missing_separator_reports_item(
        table in btree_map(arb_plan_name(), arb_quota(), 1..8),
        position in any::<prop::sample::Index>(),
    ) {
        let mut items: Vec<String> = table
            .iter()
            .map(|(plan, quota)| format!("{}={}", plan, quota))
            .collect();
        let index = position.index(items.len());
        items[index] = items[index].replace('=', "");

        let err = parse_quota_plan(Some(&Value::String(items.join(" ")))).unwrap_err();
        match err {
            ConfigError::Syntax { index: reported, reason, .. } => {
                prop_assert_eq!(reported, index + 1);
                prop_assert_eq!(reason, REASON_MISSING_SEPARATOR);
            }
            other => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn prop_positive_default_accepted(quota in arb_quota()) {
        let from_number = parse_quota_default(Some(&Value::from(quota))).unwrap();
        let from_text = parse_quota_default(Some(&Value::String(quota.to_string()))).unwrap();
        prop_assert_eq!(from_number.get(), quota);
        prop_assert_eq!(from_text.get(), quota);
    }

    #[test]
    fn prop_fresh_bucket_burst(quota in arb_quota()) {
        let bucket = TokenBucket::new(quota, Duration::from_secs(1));

        let admitted = (0..2_000u64)
            .take_while(|_| bucket.try_acquire_at(0).is_allowed())
            .count();
        prop_assert_eq!(admitted, quota.max(1.0).floor() as usize);
    }
}
