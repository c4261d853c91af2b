//! Message helpers.
//!
//! Messages are JSON objects. Attributes whose name ends in `$` are
//! control attributes: they carry dispatch metadata (`id$`, `tx$`,
//! `gate$`, `timeout$`, ...) and never participate in pattern
//! matching.

use pact_pattern::CONTROL_SUFFIX;
use serde_json::{Map, Value};

/// Returns `true` for control attribute names (`$`-suffixed).
#[must_use]
pub fn is_control_key(key: &str) -> bool {
    key.ends_with(CONTROL_SUFFIX)
}

/// Clones `msg` without its control attributes; the result is what
/// pattern matching and validation see.
#[must_use]
pub fn strip_controls(msg: &Map<String, Value>) -> Map<String, Value> {
    msg.iter()
        .filter(|(k, _)| !is_control_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Inserts every `src` pair into `dst`, overwriting existing keys.
pub fn merge_over(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (k, v) in src {
        dst.insert(k.clone(), v.clone());
    }
}

/// Inserts `src` pairs into `dst` only where the key is absent.
pub fn merge_missing(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (k, v) in src {
        if !dst.contains_key(k) {
            dst.insert(k.clone(), v.clone());
        }
    }
}

/// Control-attribute truthiness: absent, `null`, `false`, `0` and
/// `""` are false, everything else true.
#[must_use]
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// String accessor.
#[must_use]
pub fn get_str<'a>(msg: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    msg.get(key).and_then(Value::as_str)
}

/// Unsigned integer accessor.
#[must_use]
pub fn get_u64(msg: &Map<String, Value>, key: &str) -> Option<u64> {
    msg.get(key).and_then(Value::as_u64)
}

/// Returns `true` for results the dispatcher accepts under
/// `strict.result`.
#[must_use]
pub fn is_obj_or_arr(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

/// JSON type name, for error messages.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Renders a message for log output. With `short` set the rendering
/// is truncated to 111 characters.
#[must_use]
pub fn render(msg: &Map<String, Value>, short: bool) -> String {
    let full = Value::Object(msg.clone()).to_string();
    if short && full.len() > 111 {
        let cut = full
            .char_indices()
            .take_while(|(i, _)| *i < 108)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}...", &full[..cut])
    } else {
        full
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
