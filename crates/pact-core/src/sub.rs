//! Subscription bus — observer fan-out by pattern.
//!
//! `sub(pattern, fn)` registers an observer invoked on every
//! matching dispatch at its `act-in` boundary (`in$`, the default)
//! and/or `act-out` boundary (`out$`). Observers fire only for entry
//! dispatches, so prior hops and nested calls do not re-notify.
//!
//! Observers are isolated: a panicking observer is caught and
//! logged, never propagated to the dispatching caller. The bus
//! matches in glob mode, so `{"cmd": "get-*"}` observes a family of
//! patterns.

use crate::error::ActError;
use crate::msg::{is_control_key, truthy};
use pact_pattern::Pattern;
use pact_types::short_id;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Which dispatch boundary an observer is seeing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPhase {
    /// Dispatch entering its handler; the message carries `meta$`.
    In,
    /// Dispatch completed successfully.
    Out,
}

/// Observer callback: the call message and the boundary.
pub type SubFn = Arc<dyn Fn(&Map<String, Value>, SubPhase) + Send + Sync>;

/// Registration record for one observer.
#[derive(Debug, Clone)]
pub struct SubMeta {
    /// Generated subscriber id.
    pub id: String,
    /// Canonical observed pattern.
    pub pattern: String,
    /// Observe `act-in`.
    pub inward: bool,
    /// Observe `act-out`.
    pub outward: bool,
}

struct SubEntry {
    pattern: Pattern,
    meta: SubMeta,
    func: SubFn,
}

/// Pattern-keyed observer registry.
pub struct SubRegistry {
    entries: Vec<SubEntry>,
}

impl SubRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers an observer. `in$`/`out$` in the raw pattern select
    /// the boundaries; with neither given, `act-in` is observed.
    ///
    /// # Errors
    ///
    /// Propagates pattern construction failures as dispatch errors.
    pub fn add(
        &mut self,
        raw: &Map<String, Value>,
        func: SubFn,
        idlen: usize,
    ) -> Result<SubMeta, ActError> {
        let inward_given = raw.contains_key("in$");
        let outward = truthy(raw.get("out$"));
        let inward = if inward_given {
            truthy(raw.get("in$"))
        } else {
            // Default boundary when only out$ is requested stays off.
            !outward
        };

        let plain: Map<String, Value> = raw
            .iter()
            .filter(|(k, _)| !is_control_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let pattern = Pattern::from_map(&plain)
            .map_err(|e| ActError::invalid_msg("sub", e.to_string()))?;

        let meta = SubMeta {
            id: short_id(idlen),
            pattern: pattern.canonical().to_string(),
            inward,
            outward,
        };
        self.entries.push(SubEntry {
            pattern,
            meta: meta.clone(),
            func,
        });
        Ok(meta)
    }

    /// Collects the observers interested in `msg` at `phase`.
    /// Returned handles are invoked outside the registry lock.
    #[must_use]
    pub fn matching(&self, msg: &Map<String, Value>, phase: SubPhase) -> Vec<(SubMeta, SubFn)> {
        self.entries
            .iter()
            .filter(|e| match phase {
                SubPhase::In => e.meta.inward,
                SubPhase::Out => e.meta.outward,
            })
            .filter(|e| e.pattern.matches(msg, true))
            .map(|e| (e.meta.clone(), e.func.clone()))
            .collect()
    }
}

impl Default for SubRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Invokes one observer, catching panics so a broken observer never
/// breaks the dispatch.
pub fn notify(meta: &SubMeta, func: &SubFn, msg: &Map<String, Value>, phase: SubPhase) {
    let outcome = catch_unwind(AssertUnwindSafe(|| func(msg, phase)));
    if outcome.is_err() {
        warn!(
            target: "pact::sub",
            sub = %meta.id,
            pattern = %meta.pattern,
            "subscriber panicked; isolated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().expect("test value must be an object").clone()
    }

    fn counter_sub() -> (SubFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let func: SubFn = Arc::new(move |_msg, _phase| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        (func, count)
    }

    #[test]
    fn default_boundary_is_inward() {
        let mut reg = SubRegistry::new();
        let (func, _) = counter_sub();
        let meta = reg
            .add(&map(json!({"role": "x"})), func, 12)
            .expect("sub should register");
        assert!(meta.inward);
        assert!(!meta.outward);
        assert_eq!(meta.pattern, "role:x");
    }

    #[test]
    fn out_flag_selects_outward_only() {
        let mut reg = SubRegistry::new();
        let (func, _) = counter_sub();
        let meta = reg
            .add(&map(json!({"role": "x", "out$": true})), func, 12)
            .expect("sub should register");
        assert!(!meta.inward);
        assert!(meta.outward);
    }

    #[test]
    fn both_boundaries() {
        let mut reg = SubRegistry::new();
        let (func, _) = counter_sub();
        let meta = reg
            .add(
                &map(json!({"role": "x", "in$": true, "out$": true})),
                func,
                12,
            )
            .expect("sub should register");
        assert!(meta.inward);
        assert!(meta.outward);
    }

    #[test]
    fn matching_filters_by_pattern_and_phase() {
        let mut reg = SubRegistry::new();
        let (f1, _) = counter_sub();
        let (f2, _) = counter_sub();
        reg.add(&map(json!({"role": "x"})), f1, 12)
            .expect("sub should register");
        reg.add(&map(json!({"role": "y", "out$": true})), f2, 12)
            .expect("sub should register");

        let m = map(json!({"role": "x", "cmd": "go"}));
        assert_eq!(reg.matching(&m, SubPhase::In).len(), 1);
        assert_eq!(reg.matching(&m, SubPhase::Out).len(), 0);

        let m = map(json!({"role": "y"}));
        assert_eq!(reg.matching(&m, SubPhase::In).len(), 0);
        assert_eq!(reg.matching(&m, SubPhase::Out).len(), 1);
    }

    #[test]
    fn glob_patterns_observe_families() {
        let mut reg = SubRegistry::new();
        let (func, _) = counter_sub();
        reg.add(&map(json!({"cmd": "get-*"})), func, 12)
            .expect("sub should register");

        assert_eq!(
            reg.matching(&map(json!({"cmd": "get-user"})), SubPhase::In)
                .len(),
            1
        );
        assert_eq!(
            reg.matching(&map(json!({"cmd": "put-user"})), SubPhase::In)
                .len(),
            0
        );
    }

    #[test]
    fn notify_isolates_panics() {
        let func: SubFn = Arc::new(|_msg, _phase| panic!("observer exploded"));
        let meta = SubMeta {
            id: "s1".into(),
            pattern: "role:x".into(),
            inward: true,
            outward: false,
        };
        // Must not propagate.
        notify(&meta, &func, &map(json!({"role": "x"})), SubPhase::In);
    }

    #[test]
    fn notify_invokes_observer() {
        let (func, count) = counter_sub();
        let meta = SubMeta {
            id: "s1".into(),
            pattern: "role:x".into(),
            inward: true,
            outward: false,
        };
        notify(&meta, &func, &map(json!({"role": "x"})), SubPhase::In);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
