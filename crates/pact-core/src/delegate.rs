//! Delegates — scoped views of an instance.
//!
//! A delegate is cheap: it shares the registry, cache, executor and
//! subscription bus with its root instance and differs only in its
//! scope — fixed arguments merged into outgoing messages, a pattern
//! prefix applied to registrations (`fix`), an implicit `gate$` on
//! dispatches (`gate`), a pinned transaction, and the prior
//! reference inside a running handler.

use crate::actmeta::{ActMeta, Action, ArcAction, PluginRef};
use crate::error::ActError;
use crate::events::InstanceEvent;
use crate::gate::Gate;
use crate::instance::Shared;
use crate::msg::{merge_over, strip_controls};
use crate::options::Options;
use crate::stats::{GlobalSnapshot, PatternSnapshot};
use crate::sub::SubPhase;
use pact_pattern::Pattern;
use pact_types::{short_id, InstanceId};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// A scoped view of a dispatcher instance.
///
/// All mutating operations forward to the shared root state;
/// cloning a delegate never copies registrations or cached results.
#[derive(Clone)]
pub struct Delegate {
    pub(crate) shared: Arc<Shared>,
    pub(crate) did: String,
    /// Merged into every outgoing message; direction controlled by
    /// `strict.fixedargs`.
    pub(crate) fixedargs: Map<String, Value>,
    /// Merged into every registered pattern (`fix`).
    pub(crate) add_prefix: Map<String, Value>,
    pub(crate) gate: Gate,
    pub(crate) gated: bool,
    pub(crate) tx: Option<String>,
    pub(crate) prior_node: Option<Arc<ActMeta>>,
    pub(crate) current_action: Option<String>,
    pub(crate) plugin: Option<PluginRef>,
    pub(crate) depth: usize,
    pub(crate) chain: Vec<String>,
}

impl Delegate {
    // ── Registration ─────────────────────────────────────────

    /// Registers `action` under `pattern` (a JSON object or a
    /// `"k:v,k:v"` string). Returns `self` for chaining.
    ///
    /// # Errors
    ///
    /// `AddEmptyPattern` when nothing matchable remains after
    /// control stripping; pattern construction failures otherwise.
    #[track_caller]
    pub fn add<A>(&self, pattern: Value, action: A) -> Result<&Self, ActError>
    where
        A: Action + 'static,
    {
        let callpoint = std::panic::Location::caller().to_string();
        self.add_at(pattern, Arc::new(action), callpoint)
    }

    /// [`add`](Self::add) with a pre-shared handler, as used by
    /// `wrap` to install one wrapper over many patterns.
    #[track_caller]
    pub fn add_arc(&self, pattern: Value, action: ArcAction) -> Result<&Self, ActError> {
        let callpoint = std::panic::Location::caller().to_string();
        self.add_at(pattern, action, callpoint)
    }

    fn add_at(
        &self,
        pattern: Value,
        action: ArcAction,
        callpoint: String,
    ) -> Result<&Self, ActError> {
        let opts = self.opts();
        let mut raw = raw_pattern(&pattern)?;
        if !self.add_prefix.is_empty() {
            merge_over(&mut raw, &self.add_prefix);
        }
        let callpoint = opts.debug.callpoint.then_some(callpoint);
        self.shared
            .registry
            .write()
            .add(&raw, action, &opts, self.plugin.clone(), callpoint)?;
        Ok(self)
    }

    /// Re-registers every action covering `pin` with `wrapper`; the
    /// wrapper reaches each original through `prior()`. Returns the
    /// number of wrapped registrations.
    ///
    /// # Errors
    ///
    /// Pattern construction or registration failures.
    pub fn wrap<A>(&self, pin: Value, wrapper: A) -> Result<usize, ActError>
    where
        A: Action + 'static,
    {
        let arc: ArcAction = Arc::new(wrapper);
        let raw = raw_pattern(&pin)?;
        let partial = Pattern::from_map(&strip_controls(&raw))
            .map_err(|e| ActError::invalid_msg("wrap", e.to_string()))?;

        let patterns: Vec<Map<String, Value>> = {
            let registry = self.shared.registry.read();
            registry
                .list(&partial)
                .iter()
                .map(|meta| meta.parsed.to_map())
                .collect()
        };
        for map in &patterns {
            self.add_arc(Value::Object(map.clone()), arc.clone())?;
        }
        debug!(
            target: "pact::add",
            pin = %partial,
            count = patterns.len(),
            "wrapped"
        );
        Ok(patterns.len())
    }

    /// Registers an observer for matching dispatches; `in$`/`out$`
    /// in the pattern select the boundaries (`act-in` by default).
    /// Observers fire only for entry dispatches and are isolated
    /// from the caller.
    ///
    /// # Errors
    ///
    /// Pattern construction failures.
    pub fn sub<F>(&self, pattern: Value, func: F) -> Result<&Self, ActError>
    where
        F: Fn(&Map<String, Value>, SubPhase) + Send + Sync + 'static,
    {
        let raw = raw_pattern(&pattern)?;
        let opts = self.opts();
        let meta = self
            .shared
            .subs
            .write()
            .add(&raw, Arc::new(func), opts.idlen)?;
        debug!(target: "pact::sub", sub = %meta.id, pattern = %meta.pattern, "sub");
        Ok(self)
    }

    // ── Lookup ───────────────────────────────────────────────

    /// Most-specific metadata for `msg`, without dispatching.
    #[must_use]
    pub fn find(&self, msg: &Value) -> Option<Arc<ActMeta>> {
        let map = msg.as_object()?;
        let cleaned = strip_controls(map);
        self.shared.registry.read().find(&cleaned)
    }

    /// Registrations whose pattern covers `partial`.
    #[must_use]
    pub fn list(&self, partial: &Value) -> Vec<Arc<ActMeta>> {
        let Ok(raw) = raw_pattern(partial) else {
            return Vec::new();
        };
        let Ok(p) = Pattern::from_map(&strip_controls(&raw)) else {
            return Vec::new();
        };
        self.shared.registry.read().list(&p)
    }

    /// `true` when exactly `pattern` is registered.
    #[must_use]
    pub fn has(&self, pattern: &Value) -> bool {
        let Ok(raw) = raw_pattern(pattern) else {
            return false;
        };
        let Ok(p) = Pattern::from_map(&strip_controls(&raw)) else {
            return false;
        };
        self.shared.registry.read().find_exact(p.canonical()).is_some()
    }

    // ── Scoping ──────────────────────────────────────────────

    /// Creates a delegate with additional fixed arguments merged
    /// into every outgoing message. A fixed `tx$` pins the
    /// transaction.
    #[must_use]
    pub fn delegate(&self, fixedargs: Option<Value>) -> Delegate {
        let mut child = self.clone();
        child.did = format!("{}/{}", self.did, short_id(4));
        if let Some(Value::Object(map)) = fixedargs {
            if let Some(tx) = map.get("tx$").and_then(Value::as_str) {
                child.tx = Some(tx.to_string());
            }
            merge_over(&mut child.fixedargs, &map);
        }
        child
    }

    /// Creates a delegate that prefixes every registration with
    /// `pattern` and merges it into every outgoing message.
    #[must_use]
    pub fn fix(&self, pattern: Value) -> Delegate {
        let mut child = self.delegate(None);
        if let Some(map) = pattern.as_object() {
            merge_over(&mut child.add_prefix, map);
            merge_over(&mut child.fixedargs, map);
        }
        child
    }

    /// Creates a delegate whose dispatches implicitly set `gate$`,
    /// executing inside a dedicated sub-gate.
    #[must_use]
    pub fn gate(&self) -> Delegate {
        let mut child = self.delegate(None);
        child.gated = true;
        child
    }

    /// Creates a delegate whose registrations are attributed to the
    /// given plugin.
    #[must_use]
    pub fn for_plugin(&self, name: &str, tag: Option<&str>) -> Delegate {
        let mut child = self.delegate(None);
        child.plugin = Some(PluginRef::new(name, tag));
        child
    }

    // ── Readiness / configuration ────────────────────────────

    /// Resolves when the root gate is quiescent: no task queued or
    /// running on it or any sub-gate. Fires on the next tick when
    /// already idle.
    pub async fn ready(&self) {
        self.shared.root_gate.wait_clear().await;
        tokio::task::yield_now().await;
        self.shared.events.emit(InstanceEvent::Ready);
    }

    /// Current options snapshot.
    #[must_use]
    pub fn options(&self) -> Arc<Options> {
        self.opts()
    }

    /// Deep-merges `patch` into the options and returns the new
    /// tree.
    ///
    /// # Errors
    ///
    /// Merge or validation failures; the previous tree stays in
    /// effect.
    pub fn options_patch(&self, patch: Value) -> Result<Arc<Options>, crate::error::OptionsError> {
        let mut guard = self.shared.options.write();
        let merged = guard.merged_with(&patch)?;
        *guard = Arc::new(merged);
        Ok(guard.clone())
    }

    /// Installs the instance-wide error handler. The handler sees
    /// every dispatch failure; returning `true` consumes the error,
    /// suppressing delivery to `act_with` continuations.
    pub fn error<F>(&self, handler: F) -> &Self
    where
        F: Fn(&ActError) -> bool + Send + Sync + 'static,
    {
        *self.shared.errhandler.write() = Some(Arc::new(handler));
        self
    }

    // ── Plugin collaboration surface ─────────────────────────

    /// Publishes a value under `key` for other plugins.
    pub fn set_export(&self, key: impl Into<String>, value: Value) {
        self.shared.exports.write().insert(key.into(), value);
    }

    /// Looks up a published export.
    #[must_use]
    pub fn export(&self, key: &str) -> Option<Value> {
        self.shared.exports.read().get(key).cloned()
    }

    /// Looks up a published export, failing with `ExportNotFound`.
    ///
    /// # Errors
    ///
    /// [`ActError`] with kind `ExportNotFound`.
    pub fn require_export(&self, key: &str) -> Result<Value, ActError> {
        self.export(key)
            .ok_or_else(|| ActError::export_not_found(key))
    }

    /// Records a plugin as registered.
    pub fn declare_plugin(&self, name: impl Into<String>) {
        self.shared.plugins.write().insert(name.into());
    }

    /// `true` when the named plugin is registered.
    #[must_use]
    pub fn has_plugin(&self, name: &str) -> bool {
        self.shared.plugins.read().contains(name)
    }

    /// Checks that every dependency of `plugin` is registered.
    ///
    /// # Errors
    ///
    /// [`ActError`] with kind `PluginRequired` naming the first
    /// missing dependency.
    pub fn depends(&self, plugin: &str, deps: &[&str]) -> Result<(), ActError> {
        for dep in deps {
            if !self.has_plugin(dep) {
                return Err(ActError::plugin_required(plugin, dep));
            }
        }
        Ok(())
    }

    // ── Introspection ────────────────────────────────────────

    /// Subscribes to the instance event stream.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<InstanceEvent> {
        self.shared.events.subscribe()
    }

    /// Global counter snapshot.
    #[must_use]
    pub fn stats(&self) -> GlobalSnapshot {
        self.shared.stats.snapshot()
    }

    /// Counter snapshot for one canonical pattern.
    #[must_use]
    pub fn stats_for(&self, pattern: &str) -> Option<PatternSnapshot> {
        self.shared.stats.snapshot_for(pattern)
    }

    /// Identity of the owning instance.
    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        &self.shared.id
    }

    /// This delegate's id.
    #[must_use]
    pub fn did(&self) -> &str {
        &self.did
    }

    /// `true` once the instance has closed (or died).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared
            .closed
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    // ── Internals ────────────────────────────────────────────

    pub(crate) fn opts(&self) -> Arc<Options> {
        self.shared.options.read().clone()
    }

    pub(crate) fn notify_subs(&self, msg: &Map<String, Value>, phase: SubPhase) {
        let targets = self.shared.subs.read().matching(msg, phase);
        for (meta, func) in targets {
            crate::sub::notify(&meta, &func, msg, phase);
        }
    }
}

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate")
            .field("did", &self.did)
            .field("depth", &self.depth)
            .field("gated", &self.gated)
            .field("tx", &self.tx)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.did)
    }
}

/// Accepts a pattern as a JSON object or as the `"k:v,k:v"` string
/// form, yielding the raw attribute map.
pub(crate) fn raw_pattern(pattern: &Value) -> Result<Map<String, Value>, ActError> {
    match pattern {
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) => Ok(Pattern::parse(text)
            .map_err(|e| ActError::invalid_msg("add", e.to_string()))?
            .to_map()),
        other => Err(ActError::invalid_msg(
            "add",
            format!(
                "pattern must be an object or string, got {}",
                crate::msg::type_name(other)
            ),
        )),
    }
}
