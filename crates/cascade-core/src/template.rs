//! `{{path}}` parameter templating
//!
//! Node params may reference the execution context with dotted-path
//! placeholders, e.g. `{"to": "{{user_email}}"}`. Substitution happens
//! before the action handler is invoked; a placeholder whose path does not
//! resolve becomes the empty string.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::condition::lookup_path;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid pattern"))
}

/// Render every string inside `params` against the context.
pub fn render_params(params: &Map<String, Value>, ctx: &Value) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v, ctx)))
        .collect()
}

/// Recursively substitute placeholders in strings, arrays, and objects.
pub fn render_value(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(render_str(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_str(input: &str, ctx: &Value) -> String {
    placeholder_re()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            match lookup_path(ctx, &caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}
