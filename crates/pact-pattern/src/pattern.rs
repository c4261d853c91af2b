//! The pattern type: parsing, canonical form, matching.

use crate::glob::{glob_match, is_glob};
use crate::PatternError;
use serde_json::{Map, Value};
use std::fmt;

/// Suffix marking control attributes, which never participate in
/// matching (`id$`, `tx$`, `gate$`, ...).
pub const CONTROL_SUFFIX: char = '$';

/// A message template: the `(key, literal)` pairs a message must
/// contain for the pattern to match.
///
/// Keys are kept sorted, so two patterns with the same pairs compare
/// equal regardless of construction order, and the canonical
/// `k:v,k:v` string form is stable.
///
/// # Example
///
/// ```
/// use pact_pattern::Pattern;
/// use serde_json::json;
///
/// let a = Pattern::from_value(&json!({"cmd": "sum", "role": "math"})).unwrap();
/// let b = Pattern::parse("role:math,cmd:sum").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.canonical(), "cmd:sum,role:math");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pairs: Vec<(String, Value)>,
    canonical: String,
}

impl Pattern {
    /// Builds a pattern from a JSON object.
    ///
    /// # Errors
    ///
    /// [`PatternError::NotAnObject`] for non-object input,
    /// [`PatternError::ControlKey`] if a `$`-suffixed attribute is
    /// present (callers strip control attributes first).
    pub fn from_value(value: &Value) -> Result<Self, PatternError> {
        let Some(map) = value.as_object() else {
            return Err(PatternError::NotAnObject(type_name(value).to_string()));
        };
        Self::from_map(map)
    }

    /// Builds a pattern from a JSON object map.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, PatternError> {
        let mut pairs: Vec<(String, Value)> = Vec::with_capacity(map.len());
        for (k, v) in map {
            if k.ends_with(CONTROL_SUFFIX) {
                return Err(PatternError::ControlKey(k.clone()));
            }
            pairs.push((k.clone(), v.clone()));
        }
        Ok(Self::from_pairs(pairs))
    }

    /// Parses the `"k:v,k:v"` string form. Values are taken as raw
    /// strings; whitespace around keys and values is trimmed. An
    /// empty string yields the empty (catch-all) pattern.
    ///
    /// # Errors
    ///
    /// [`PatternError::InvalidPair`] for a segment without `:` or
    /// with an empty key, [`PatternError::ControlKey`] for control
    /// attributes.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        let mut pairs = Vec::new();
        for segment in trimmed.split(',') {
            let Some((k, v)) = segment.split_once(':') else {
                return Err(PatternError::InvalidPair(segment.trim().to_string()));
            };
            let key = k.trim();
            if key.is_empty() {
                return Err(PatternError::InvalidPair(segment.trim().to_string()));
            }
            if key.ends_with(CONTROL_SUFFIX) {
                return Err(PatternError::ControlKey(key.to_string()));
            }
            pairs.push((key.to_string(), Value::String(v.trim().to_string())));
        }
        Ok(Self::from_pairs(pairs))
    }

    /// The empty pattern, matching every message.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            pairs: Vec::new(),
            canonical: String::new(),
        }
    }

    fn from_pairs(mut pairs: Vec<(String, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.dedup_by(|a, b| a.0 == b.0);
        let canonical = pairs
            .iter()
            .map(|(k, v)| format!("{k}:{}", canonical_value(v)))
            .collect::<Vec<_>>()
            .join(",");
        Self { pairs, canonical }
    }

    /// The sorted `k:v,k:v` canonical form.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Number of keys; the pattern's specificity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// `true` for the catch-all pattern.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates the sorted `(key, value)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Renders the pattern back into a JSON object.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        self.pairs.iter().cloned().collect()
    }

    /// Returns `true` if every pair is present in `msg` with a
    /// matching value.
    ///
    /// When `glob` is set, string pattern values containing `*`/`?`
    /// match string message values as wildcards; everything else is
    /// exact equality.
    #[must_use]
    pub fn matches(&self, msg: &Map<String, Value>, glob: bool) -> bool {
        self.pairs.iter().all(|(k, want)| {
            msg.get(k)
                .is_some_and(|got| value_matches(want, got, glob))
        })
    }

    /// Returns `true` if this pattern's keys are a superset of
    /// `partial`'s keys with equal values; used to enumerate
    /// registrations from a partial pattern.
    #[must_use]
    pub fn covers(&self, partial: &Pattern) -> bool {
        partial.pairs.iter().all(|(k, want)| {
            self.pairs
                .iter()
                .any(|(have_k, have_v)| have_k == k && have_v == want)
        })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

fn value_matches(want: &Value, got: &Value, glob: bool) -> bool {
    if glob {
        if let (Value::String(w), Value::String(g)) = (want, got) {
            if is_glob(w) {
                return glob_match(w, g);
            }
        }
    }
    want == got
}

/// Canonical string rendering of a pattern value: strings bare,
/// everything else compact JSON.
#[must_use]
pub fn canonical_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(v: Value) -> Map<String, Value> {
        v.as_object().expect("test message must be an object").clone()
    }

    // ── Construction ─────────────────────────────────────────

    #[test]
    fn canonical_is_sorted() {
        let p = Pattern::from_value(&json!({"role": "math", "cmd": "sum"}))
            .expect("object pattern should build");
        assert_eq!(p.canonical(), "cmd:sum,role:math");
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn string_and_object_forms_agree() {
        let a = Pattern::parse("role:math,cmd:sum").expect("string form should parse");
        let b = Pattern::from_value(&json!({"cmd": "sum", "role": "math"}))
            .expect("object form should build");
        assert_eq!(a, b);
    }

    #[test]
    fn non_string_values_render_as_json() {
        let p = Pattern::from_value(&json!({"n": 5, "flag": true}))
            .expect("non-string values should build");
        assert_eq!(p.canonical(), "flag:true,n:5");
    }

    #[test]
    fn parse_trims_whitespace() {
        let p = Pattern::parse(" role : math , cmd : sum ").expect("padded form should parse");
        assert_eq!(p.canonical(), "cmd:sum,role:math");
    }

    #[test]
    fn parse_empty_is_catch_all() {
        let p = Pattern::parse("").expect("empty string should parse");
        assert!(p.is_empty());
        assert_eq!(p.canonical(), "");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(matches!(
            Pattern::parse("rolemath"),
            Err(PatternError::InvalidPair(_))
        ));
    }

    #[test]
    fn construction_rejects_control_keys() {
        assert!(matches!(
            Pattern::from_value(&json!({"role": "math", "id$": "X"})),
            Err(PatternError::ControlKey(_))
        ));
        assert!(matches!(
            Pattern::parse("tx$:T"),
            Err(PatternError::ControlKey(_))
        ));
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            Pattern::from_value(&json!([1, 2])),
            Err(PatternError::NotAnObject(_))
        ));
    }

    // ── Matching ─────────────────────────────────────────────

    #[test]
    fn matches_when_all_pairs_present() {
        let p = Pattern::parse("role:math,cmd:sum").expect("pattern should parse");
        assert!(p.matches(&msg(json!({"role": "math", "cmd": "sum", "x": 1})), false));
        assert!(!p.matches(&msg(json!({"role": "math"})), false));
        assert!(!p.matches(&msg(json!({"role": "math", "cmd": "product"})), false));
    }

    #[test]
    fn matching_ignores_key_order() {
        let p = Pattern::from_value(&json!({"b": "2", "a": "1"})).expect("should build");
        assert!(p.matches(&msg(json!({"a": "1", "b": "2"})), false));
    }

    #[test]
    fn non_string_values_compare_exactly() {
        let p = Pattern::from_value(&json!({"n": 5})).expect("should build");
        assert!(p.matches(&msg(json!({"n": 5})), false));
        assert!(!p.matches(&msg(json!({"n": "5"})), false));
        assert!(!p.matches(&msg(json!({"n": 6})), false));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let p = Pattern::empty();
        assert!(p.matches(&msg(json!({})), false));
        assert!(p.matches(&msg(json!({"anything": "goes"})), false));
    }

    #[test]
    fn glob_values_match_in_glob_mode_only() {
        let p = Pattern::from_value(&json!({"cmd": "get-*"})).expect("should build");
        let m = msg(json!({"cmd": "get-user"}));
        assert!(p.matches(&m, true));
        assert!(!p.matches(&m, false));
    }

    #[test]
    fn glob_mode_leaves_plain_strings_exact() {
        let p = Pattern::from_value(&json!({"cmd": "sum"})).expect("should build");
        assert!(p.matches(&msg(json!({"cmd": "sum"})), true));
        assert!(!p.matches(&msg(json!({"cmd": "summary"})), true));
    }

    // ── covers ───────────────────────────────────────────────

    #[test]
    fn covers_superset_with_equal_values() {
        let full = Pattern::parse("role:math,cmd:sum").expect("should parse");
        let partial = Pattern::parse("role:math").expect("should parse");
        assert!(full.covers(&partial));
        assert!(!partial.covers(&full));
        assert!(full.covers(&Pattern::empty()));
    }

    #[test]
    fn covers_requires_equal_values() {
        let full = Pattern::parse("role:math,cmd:sum").expect("should parse");
        let other = Pattern::parse("role:text").expect("should parse");
        assert!(!full.covers(&other));
    }
}
