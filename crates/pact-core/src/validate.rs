//! Attribute rules.
//!
//! When a raw `add` pattern carries object-valued attributes, those
//! objects become per-attribute rules instead of match literals:
//!
//! ```ignore
//! instance.add(json!({
//!     "role": "math", "cmd": "sum",
//!     "x": { "required$": true, "type$": "number" },
//! }), sum)?;
//! ```
//!
//! Rules understand `required$` (attribute must be present) and
//! `type$` (JSON type name: `string`, `number`, `integer`,
//! `boolean`, `object`, `array`).

use crate::msg::{truthy, type_name};
use serde_json::{Map, Value};

/// Checks `msg` against the extracted rules. Returns a description
/// of the first violation.
pub fn validate_rules(rules: &Map<String, Value>, msg: &Map<String, Value>) -> Result<(), String> {
    for (attr, rule) in rules {
        let Some(spec) = rule.as_object() else {
            continue;
        };
        match msg.get(attr) {
            None => {
                if truthy(spec.get("required$")) {
                    return Err(format!("attribute '{attr}' is required"));
                }
            }
            Some(value) => {
                if let Some(expected) = spec.get("type$").and_then(Value::as_str) {
                    if !type_matches(expected, value) {
                        return Err(format!(
                            "attribute '{attr}' must be {expected}, got {}",
                            type_name(value)
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        // Unknown type names never match, so typos fail loudly.
        _ => false,
    }
}
