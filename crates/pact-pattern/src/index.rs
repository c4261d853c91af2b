//! Pattern index: payload storage with most-specific-match queries.

use crate::Pattern;
use serde_json::{Map, Value};
use std::collections::HashMap;

struct Entry<T> {
    pattern: Pattern,
    payload: T,
    seq: u64,
}

/// Stores `(pattern, payload)` registrations and answers three
/// queries:
///
/// - [`add`](Self::add): install a payload; an identical pattern is
///   overwritten and the previous payload returned so callers can
///   chain overrides
/// - [`find`](Self::find): the payload of the most-specific matching
///   pattern — most matched keys wins, ties go to the latest
///   registration; the empty (catch-all) pattern is defeated by any
///   non-empty match
/// - [`list`](Self::list): every registration whose keys are a
///   superset of a partial pattern with equal values
///
/// Built in glob mode, string pattern values containing `*`/`?`
/// match message strings as wildcards.
pub struct PatternIndex<T> {
    entries: Vec<Entry<T>>,
    by_canonical: HashMap<String, usize>,
    glob: bool,
    seq: u64,
}

impl<T> PatternIndex<T> {
    /// Creates an index; `glob` enables wildcard string values.
    #[must_use]
    pub fn new(glob: bool) -> Self {
        Self {
            entries: Vec::new(),
            by_canonical: HashMap::new(),
            glob,
            seq: 0,
        }
    }

    /// Returns `true` if wildcard matching is enabled.
    #[must_use]
    pub fn is_glob(&self) -> bool {
        self.glob
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Installs `payload` under `pattern`. If an identical pattern is
    /// already registered its payload is replaced and returned; the
    /// replacement counts as the latest registration for tie-breaking.
    pub fn add(&mut self, pattern: Pattern, payload: T) -> Option<T> {
        self.seq += 1;
        let seq = self.seq;
        match self.by_canonical.get(pattern.canonical()) {
            Some(&i) => {
                let slot = &mut self.entries[i];
                slot.seq = seq;
                Some(std::mem::replace(&mut slot.payload, payload))
            }
            None => {
                self.by_canonical
                    .insert(pattern.canonical().to_string(), self.entries.len());
                self.entries.push(Entry {
                    pattern,
                    payload,
                    seq,
                });
                None
            }
        }
    }

    /// Returns the payload of the most-specific pattern matching
    /// `msg`, or `None`.
    #[must_use]
    pub fn find(&self, msg: &Map<String, Value>) -> Option<&T> {
        self.find_entry(msg).map(|e| &e.payload)
    }

    /// Like [`find`](Self::find), also returning the winning pattern.
    #[must_use]
    pub fn find_with_pattern(&self, msg: &Map<String, Value>) -> Option<(&Pattern, &T)> {
        self.find_entry(msg).map(|e| (&e.pattern, &e.payload))
    }

    fn find_entry(&self, msg: &Map<String, Value>) -> Option<&Entry<T>> {
        self.entries
            .iter()
            .filter(|e| e.pattern.matches(msg, self.glob))
            .max_by_key(|e| (e.pattern.len(), e.seq))
    }

    /// Exact lookup by canonical pattern string.
    #[must_use]
    pub fn find_exact(&self, canonical: &str) -> Option<&T> {
        self.by_canonical
            .get(canonical)
            .map(|&i| &self.entries[i].payload)
    }

    /// Enumerates registrations covering `partial` (keys a superset,
    /// values equal), in registration order.
    #[must_use]
    pub fn list(&self, partial: &Pattern) -> Vec<(&Pattern, &T)> {
        self.entries
            .iter()
            .filter(|e| e.pattern.covers(partial))
            .map(|e| (&e.pattern, &e.payload))
            .collect()
    }

    /// Iterates all `(pattern, payload)` registrations.
    pub fn iter(&self) -> impl Iterator<Item = (&Pattern, &T)> {
        self.entries.iter().map(|e| (&e.pattern, &e.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pat(s: &str) -> Pattern {
        Pattern::parse(s).expect("test pattern should parse")
    }

    fn msg(v: Value) -> Map<String, Value> {
        v.as_object().expect("test message must be an object").clone()
    }

    // ── add / overwrite ──────────────────────────────────────

    #[test]
    fn add_returns_previous_payload_on_identical_pattern() {
        let mut idx = PatternIndex::new(false);
        assert_eq!(idx.add(pat("role:math"), 1), None);
        assert_eq!(idx.add(pat("role:math"), 2), Some(1));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.find(&msg(json!({"role": "math"}))), Some(&2));
    }

    #[test]
    fn identical_means_canonical_equality() {
        let mut idx = PatternIndex::new(false);
        let a = Pattern::from_value(&json!({"role": "math", "cmd": "sum"}))
            .expect("should build");
        let b = pat("cmd:sum,role:math");
        idx.add(a, 1);
        assert_eq!(idx.add(b, 2), Some(1));
    }

    // ── find / specificity ───────────────────────────────────

    #[test]
    fn more_keys_beat_fewer() {
        let mut idx = PatternIndex::new(false);
        idx.add(pat("role:math"), "broad");
        idx.add(pat("role:math,cmd:sum"), "narrow");
        assert_eq!(
            idx.find(&msg(json!({"role": "math", "cmd": "sum"}))),
            Some(&"narrow")
        );
        assert_eq!(idx.find(&msg(json!({"role": "math"}))), Some(&"broad"));
    }

    #[test]
    fn specificity_ignores_registration_order() {
        let mut idx = PatternIndex::new(false);
        idx.add(pat("role:math,cmd:sum"), "narrow");
        idx.add(pat("role:math"), "broad");
        assert_eq!(
            idx.find(&msg(json!({"role": "math", "cmd": "sum"}))),
            Some(&"narrow")
        );
    }

    #[test]
    fn equal_specificity_latest_wins() {
        let mut idx = PatternIndex::new(false);
        idx.add(pat("role:math,slow:true"), "first");
        idx.add(pat("role:math,cmd:sum"), "second");
        assert_eq!(
            idx.find(&msg(json!({"role": "math", "cmd": "sum", "slow": "true"}))),
            Some(&"second")
        );
    }

    #[test]
    fn overwrite_refreshes_tie_break_position() {
        let mut idx = PatternIndex::new(false);
        idx.add(pat("a:1,b:2"), "ab");
        idx.add(pat("a:1,c:3"), "ac");
        // Re-adding the first pattern makes it the latest again.
        idx.add(pat("a:1,b:2"), "ab2");
        assert_eq!(
            idx.find(&msg(json!({"a": "1", "b": "2", "c": "3"}))),
            Some(&"ab2")
        );
    }

    #[test]
    fn no_match_returns_none() {
        let mut idx = PatternIndex::new(false);
        idx.add(pat("role:math"), 1);
        assert_eq!(idx.find(&msg(json!({"role": "text"}))), None);
    }

    // ── catch-all ────────────────────────────────────────────

    #[test]
    fn catch_all_matches_everything_but_loses_every_tie() {
        let mut idx = PatternIndex::new(false);
        idx.add(Pattern::empty(), "any");
        idx.add(pat("role:math"), "math");
        assert_eq!(idx.find(&msg(json!({"role": "text"}))), Some(&"any"));
        assert_eq!(idx.find(&msg(json!({"role": "math"}))), Some(&"math"));
        assert_eq!(idx.find(&msg(json!({}))), Some(&"any"));
    }

    // ── glob mode ────────────────────────────────────────────

    #[test]
    fn glob_mode_wildcards() {
        let mut idx = PatternIndex::new(true);
        idx.add(
            Pattern::from_value(&json!({"cmd": "get-*"})).expect("should build"),
            "getter",
        );
        assert_eq!(idx.find(&msg(json!({"cmd": "get-user"}))), Some(&"getter"));
        assert_eq!(idx.find(&msg(json!({"cmd": "put-user"}))), None);
    }

    #[test]
    fn exact_value_beats_nothing_special_in_glob_mode() {
        // Specificity is still key count: a glob pattern with two keys
        // beats an exact pattern with one.
        let mut idx = PatternIndex::new(true);
        idx.add(pat("role:store"), "broad");
        idx.add(
            Pattern::from_value(&json!({"role": "store", "cmd": "load-*"}))
                .expect("should build"),
            "narrow",
        );
        assert_eq!(
            idx.find(&msg(json!({"role": "store", "cmd": "load-user"}))),
            Some(&"narrow")
        );
    }

    // ── find_exact / list ────────────────────────────────────

    #[test]
    fn find_exact_by_canonical() {
        let mut idx = PatternIndex::new(false);
        idx.add(pat("role:math,cmd:sum"), 7);
        assert_eq!(idx.find_exact("cmd:sum,role:math"), Some(&7));
        assert_eq!(idx.find_exact("cmd:sum"), None);
    }

    #[test]
    fn list_enumerates_covering_patterns() {
        let mut idx = PatternIndex::new(false);
        idx.add(pat("role:math,cmd:sum"), 1);
        idx.add(pat("role:math,cmd:product"), 2);
        idx.add(pat("role:text,cmd:sum"), 3);

        let hits = idx.list(&pat("role:math"));
        let payloads: Vec<i32> = hits.iter().map(|(_, p)| **p).collect();
        assert_eq!(payloads, vec![1, 2]);

        let all = idx.list(&Pattern::empty());
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn find_with_pattern_reports_winner() {
        let mut idx = PatternIndex::new(false);
        idx.add(pat("role:math,cmd:sum"), 1);
        let (p, _) = idx
            .find_with_pattern(&msg(json!({"role": "math", "cmd": "sum"})))
            .expect("registered pattern should match");
        assert_eq!(p.canonical(), "cmd:sum,role:math");
    }
}
