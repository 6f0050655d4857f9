//! Condition DSL evaluator
//!
//! Conditions gate workflow edges and triggers. They are plain JSON values:
//!
//! ```json
//! {"op": "and", "conditions": [
//!     {"op": "eq", "path": "lead.source", "value": "LinkedIn"},
//!     {"op": "gt", "path": "lead.score", "value": 75}
//! ]}
//! ```
//!
//! Evaluation is total: malformed conditions, missing paths, failed numeric
//! coercions, and invalid regexes all evaluate to a boolean rather than an
//! error.

use regex::Regex;
use serde_json::Value;

/// Resolve a dotted path against nested JSON objects.
///
/// Returns `None` when any segment is missing or an intermediate value is
/// not an object.
pub fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Evaluate a condition against a context value.
///
/// `and`/`or` evaluate every child (empty `and` is true, empty `or` is
/// false), `not` negates its child and is false when the child is missing.
/// Comparison ops resolve `path` against the context, treating a missing
/// path as null. A condition with an unknown or absent `op` evaluates to
/// its own truthiness, so `{}` is false.
pub fn evaluate(cond: &Value, ctx: &Value) -> bool {
    let op = cond.get("op").and_then(Value::as_str);

    match op {
        Some(op @ ("and" | "or")) => {
            let results: Vec<bool> = cond
                .get("conditions")
                .and_then(Value::as_array)
                .map(|children| children.iter().map(|c| evaluate(c, ctx)).collect())
                .unwrap_or_default();
            if op == "and" {
                results.iter().all(|r| *r)
            } else {
                results.iter().any(|r| *r)
            }
        }
        Some("not") => match cond.get("condition") {
            Some(child) => !evaluate(child, ctx),
            None => false,
        },
        Some(op @ ("eq" | "neq" | "gt" | "gte" | "lt" | "lte" | "contains" | "regex")) => {
            let left = cond
                .get("path")
                .and_then(Value::as_str)
                .and_then(|path| lookup_path(ctx, path))
                .unwrap_or(&Value::Null);
            let value = cond.get("value").unwrap_or(&Value::Null);
            compare(op, left, value)
        }
        _ => truthy(cond),
    }
}

fn compare(op: &str, left: &Value, value: &Value) -> bool {
    match op {
        "eq" => left == value,
        "neq" => left != value,
        "gt" | "gte" | "lt" | "lte" => match (as_number(left), as_number(value)) {
            (Some(l), Some(r)) => match op {
                "gt" => l > r,
                "gte" => l >= r,
                "lt" => l < r,
                _ => l <= r,
            },
            _ => false,
        },
        "contains" => stringify(left)
            .to_lowercase()
            .contains(&stringify(value).to_lowercase()),
        "regex" => match Regex::new(&stringify(value)) {
            Ok(re) => re.is_match(&stringify(left)),
            Err(_) => false,
        },
        _ => false,
    }
}

/// Coerce a JSON value to a float for ordered comparisons.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Render a value the way a user would write it: strings without quotes,
/// everything else as JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Python-style truthiness for JSON values.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
