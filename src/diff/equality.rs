//! Field equality used when deciding whether a value changed.
//!
//! Values that differ only by floating-point drift, or by a number having
//! round-tripped through its string form, are treated as unchanged.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::Value;

/// Largest absolute difference at which two numbers still compare equal.
pub const NUMERIC_TOLERANCE: f64 = 0.001;

// Optional digits, an optional single decimal point, then digits. No sign,
// no exponent, no thousands separators.
static MONETARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d*\.?\d+$").expect("monetary pattern compiles"));

/// Returns the numeric value of `s` when it looks like a plain decimal amount.
pub fn monetary_value(s: &str) -> Option<f64> {
    if !MONETARY.is_match(s) {
        return None;
    }
    s.parse::<f64>().ok()
}

/// Returns true when `s` matches the decimal-amount heuristic.
pub fn is_monetary_string(s: &str) -> bool {
    monetary_value(s).is_some()
}

/// Compares one field across two snapshots.
///
/// `None` stands for a field absent from its snapshot and is treated the
/// same as an explicit `null`.
pub fn values_equal(original: Option<&Value>, updated: Option<&Value>) -> bool {
    match (original, updated) {
        (None | Some(Value::Null), None | Some(Value::Null)) => true,
        (None | Some(Value::Null), Some(_)) | (Some(_), None | Some(Value::Null)) => false,
        (Some(a), Some(b)) => present_values_equal(a, b),
    }
}

fn present_values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => within_tolerance(x.as_f64(), y.as_f64()),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            within_tolerance(n.as_f64(), monetary_value(s))
        }
        _ => false,
    }
}

fn within_tolerance(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if (a - b).abs() < NUMERIC_TOLERANCE)
}
