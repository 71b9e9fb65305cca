//! Gate comparisons
//!
//! Gated calls compare a variable against a constant with the comparison
//! semantics clients of the protocol already rely on:
//!
//! - `=` and `!` use loose equality: numbers, numeric strings and booleans
//!   compare by numeric value, `null` only equals `null`, and two arrays or
//!   objects are never equal. An array or object compared with a scalar is
//!   first rendered as a string (`[1, 2]` becomes `"1,2"`).
//! - `>` and `>=` compare two strings lexicographically and everything else
//!   numerically, treating `null` as `0`. A value with no numeric meaning
//!   makes the comparison false.

use std::cmp::Ordering;

use arpc_common::Operator;
use serde_json::Value;

/// Evaluates `left op right`.
///
/// # Example
///
/// ```
/// use arpc_common::Operator;
/// use arpc_server::atomic::compare;
/// use serde_json::json;
///
/// assert!(compare(&json!(3), Operator::Gt, &json!(2)));
/// assert!(compare(&json!("3"), Operator::Eq, &json!(3)));
/// assert!(!compare(&json!(null), Operator::Eq, &json!(0)));
/// ```
pub fn compare(left: &Value, op: Operator, right: &Value) -> bool {
    match op {
        Operator::Gt => relational(left, right) == Some(Ordering::Greater),
        Operator::Gte => matches!(relational(left, right), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Eq => loose_eq(left, right),
        Operator::Ne => !loose_eq(left, right),
    }
}

/// A scalar after arrays and objects have been rendered to strings.
enum Primitive<'a> {
    Null,
    Bool(bool),
    Number(f64),
    Str(std::borrow::Cow<'a, str>),
}

fn to_primitive(value: &Value) -> Primitive<'_> {
    match value {
        Value::Null => Primitive::Null,
        Value::Bool(b) => Primitive::Bool(*b),
        Value::Number(n) => Primitive::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => Primitive::Str(s.as_str().into()),
        Value::Array(_) | Value::Object(_) => Primitive::Str(render(value).into()),
    }
}

fn relational(left: &Value, right: &Value) -> Option<Ordering> {
    match (to_primitive(left), to_primitive(right)) {
        (Primitive::Str(a), Primitive::Str(b)) => Some(a.cmp(&b)),
        (a, b) => number_of(&a).partial_cmp(&number_of(&b)),
    }
}

fn number_of(value: &Primitive<'_>) -> f64 {
    match value {
        Primitive::Null => 0.0,
        Primitive::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Primitive::Number(n) => *n,
        Primitive::Str(s) => parse_number(s),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => match (to_primitive(left), to_primitive(right)) {
            (Primitive::Str(a), Primitive::Str(b)) => a == b,
            (a, b) => number_of(&a) == number_of(&b),
        },
    }
}

/// Parses a string the way numeric coercion does: surrounding whitespace is
/// ignored, an empty string is `0`, and anything unparseable is NaN.
fn parse_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }

    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }

    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = s.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix).map_or(f64::NAN, |n| n as f64);
        }
    }

    // Rust accepts "inf" and "nan" spellings that do not coerce to numbers
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

/// Renders a value the way string coercion does.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) => render_float(f),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn render_float(f: f64) -> String {
    if f == 0.0 {
        "0".to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{:.0}", f)
    } else {
        f.to_string()
    }
}
