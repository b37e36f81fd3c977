//! Comparisons between a condition value and its target.
//!
//! Every comparison fails closed: values that cannot be coerced to what the operator needs make the
//! condition fail instead of erroring.
use std::{cmp::Ordering, collections::HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::spec::Operator;

/// Numeric dates below this are epoch seconds rather than milliseconds.
const EPOCH_SECONDS_THRESHOLD: f64 = 100_000_000_000.0;

/// Evaluate `operator` for a value-based condition.
///
/// Returns `None` for operators that are not value comparisons (segment lists, unknown operators).
pub(crate) fn compare(operator: &Operator, value: Option<&Value>, target: &Value) -> Option<bool> {
    let result = match operator {
        Operator::Gt => numeric(value, target, |a, b| a > b),
        Operator::Gte => numeric(value, target, |a, b| a >= b),
        Operator::Lt => numeric(value, target, |a, b| a < b),
        Operator::Lte => numeric(value, target, |a, b| a <= b),

        Operator::VersionGt => version(value, target, Ordering::is_gt),
        Operator::VersionGte => version(value, target, Ordering::is_ge),
        Operator::VersionLt => version(value, target, Ordering::is_lt),
        Operator::VersionLte => version(value, target, Ordering::is_le),
        Operator::VersionEq => version(value, target, Ordering::is_eq),
        Operator::VersionNeq => version(value, target, Ordering::is_ne),

        Operator::Any => any(value, target, false),
        Operator::None => !any(value, target, false),
        Operator::AnyCaseSensitive => any(value, target, true),
        Operator::NoneCaseSensitive => !any(value, target, true),

        Operator::StrStartsWithAny => string_any(value, target, |v, t| v.starts_with(t)),
        Operator::StrEndsWithAny => string_any(value, target, |v, t| v.ends_with(t)),
        Operator::StrContainsAny => string_any(value, target, |v, t| v.contains(t)),
        Operator::StrContainsNone => !string_any(value, target, |v, t| v.contains(t)),
        Operator::StrMatches => matches(value, target),

        Operator::Eq => equals(value, target),
        Operator::Neq => !equals(value, target),

        Operator::Before => date(value, target, |a, b| a < b),
        Operator::After => date(value, target, |a, b| a > b),
        Operator::On => date(value, target, |a, b| a.date_naive() == b.date_naive()),

        Operator::ArrayContainsAny => array_contains(value, target, ArrayMode::Any),
        Operator::ArrayContainsNone => array_contains(value, target, ArrayMode::None),
        Operator::ArrayContainsAll => array_contains(value, target, ArrayMode::All),
        Operator::NotArrayContainsAll => array_contains(value, target, ArrayMode::NotAll),

        Operator::InSegmentList | Operator::NotInSegmentList | Operator::Unknown(_) => {
            return None
        }
    };
    Some(result)
}

/// String form used by string and membership operators. Objects, arrays and null have none.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn numeric(value: Option<&Value>, target: &Value, f: impl Fn(f64, f64) -> bool) -> bool {
    match (value.and_then(to_f64), to_f64(target)) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// Parse a dotted version, ignoring anything after the first `-`.
fn parse_version(value: &Value) -> Option<Vec<u64>> {
    let s = value_to_string(value)?;
    let s = s.split('-').next()?.trim();
    if s.is_empty() {
        return None;
    }
    s.split('.').map(|part| part.parse().ok()).collect()
}

fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let a = a.get(i).copied().unwrap_or(0);
            let b = b.get(i).copied().unwrap_or(0);
            a.cmp(&b)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn version(value: Option<&Value>, target: &Value, f: impl Fn(Ordering) -> bool) -> bool {
    match (value.and_then(parse_version), parse_version(target)) {
        (Some(a), Some(b)) => f(compare_versions(&a, &b)),
        _ => false,
    }
}

fn target_strings(target: &Value) -> Vec<String> {
    match target {
        Value::Array(items) => items.iter().filter_map(value_to_string).collect(),
        other => value_to_string(other).into_iter().collect(),
    }
}

fn any(value: Option<&Value>, target: &Value, case_sensitive: bool) -> bool {
    let Some(value) = value.and_then(value_to_string) else {
        return false;
    };
    target_strings(target).iter().any(|t| {
        if case_sensitive {
            *t == value
        } else {
            t.eq_ignore_ascii_case(&value)
        }
    })
}

/// Case-insensitive substring operators.
fn string_any(value: Option<&Value>, target: &Value, f: impl Fn(&str, &str) -> bool) -> bool {
    let Some(value) = value.and_then(value_to_string) else {
        return false;
    };
    let value = value.to_lowercase();
    target_strings(target)
        .iter()
        .any(|t| f(&value, &t.to_lowercase()))
}

fn matches(value: Option<&Value>, target: &Value) -> bool {
    let (Some(value), Some(pattern)) = (value.and_then(value_to_string), target.as_str()) else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(regex) => regex.is_match(&value),
        Err(err) => {
            log::warn!(target: "featuregate", "invalid str_matches pattern {pattern:?}: {err}");
            false
        }
    }
}

fn equals(value: Option<&Value>, target: &Value) -> bool {
    let value = value.unwrap_or(&Value::Null);
    match (value, target) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(n) => Some(n),
                Err(_) => return parse_date_string(s),
            }
        }
        _ => None,
    }?;

    let millis = if millis.abs() < EPOCH_SECONDS_THRESHOLD {
        millis * 1000.0
    } else {
        millis
    };
    DateTime::from_timestamp_millis(millis as i64)
}

fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(s) {
        return Some(datetime.with_timezone(&Utc));
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(datetime.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|datetime| datetime.and_utc())
}

fn date(
    value: Option<&Value>,
    target: &Value,
    f: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
) -> bool {
    match (value.and_then(parse_date), parse_date(target)) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

enum ArrayMode {
    Any,
    None,
    All,
    NotAll,
}

fn array_contains(value: Option<&Value>, target: &Value, mode: ArrayMode) -> bool {
    let (Some(Value::Array(values)), Value::Array(targets)) = (value, target) else {
        return false;
    };
    let values: HashSet<String> = values.iter().filter_map(value_to_string).collect();
    let mut targets = targets.iter().filter_map(value_to_string);

    match mode {
        ArrayMode::Any => targets.any(|t| values.contains(&t)),
        ArrayMode::None => !targets.any(|t| values.contains(&t)),
        ArrayMode::All => targets.all(|t| values.contains(&t)),
        ArrayMode::NotAll => !targets.all(|t| values.contains(&t)),
    }
}
