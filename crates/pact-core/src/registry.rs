//! Action registry — pattern-keyed action metadata with override
//! chains.
//!
//! Wraps the pattern index. Registration strips control attributes,
//! extracts object-valued attributes into validation rules,
//! canonicalizes the remainder, and applies the override policy: the
//! previous registration for the matched pattern becomes the new
//! metadata's `prior`, unless the catch-all policy or `strict.add`
//! forbids it, or the previous handler consumes the registration
//! through its override hook.

use crate::actmeta::{ActMeta, ArcAction, PluginRef};
use crate::error::ActError;
use crate::msg::is_control_key;
use crate::options::Options;
use pact_pattern::{Pattern, PatternIndex};
use pact_types::short_id;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Pure transform applied to freshly built metadata before install.
pub type ActMetaModifier = Box<dyn Fn(&mut ActMeta) + Send + Sync>;

/// Pattern-keyed store of [`ActMeta`].
pub struct Registry {
    index: PatternIndex<Arc<ActMeta>>,
    modifiers: Vec<ActMetaModifier>,
}

impl Registry {
    /// Creates an empty registry. The action router matches exact
    /// values only; glob subscriptions live on the subscription bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: PatternIndex::new(false),
            modifiers: Vec::new(),
        }
    }

    /// Number of live registrations (superseded entries excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Appends a metadata modifier, run on every subsequent `add`.
    pub fn add_modifier(&mut self, modifier: ActMetaModifier) {
        self.modifiers.push(modifier);
    }

    /// Registers `action` under the cleaned form of `raw`.
    ///
    /// # Errors
    ///
    /// [`ActError`] with kind `AddEmptyPattern` when nothing
    /// matchable remains after stripping control attributes.
    pub fn add(
        &mut self,
        raw: &Map<String, Value>,
        action: ArcAction,
        opts: &Options,
        plugin: Option<PluginRef>,
        callpoint: Option<String>,
    ) -> Result<Arc<ActMeta>, ActError> {
        // Control attributes carry registration metadata; object
        // values become per-attribute rules.
        let mut plain = Map::new();
        let mut rules = Map::new();
        for (k, v) in raw {
            if is_control_key(k) {
                continue;
            }
            if v.is_object() {
                rules.insert(k.clone(), v.clone());
            } else {
                plain.insert(k.clone(), v.clone());
            }
        }
        if plain.is_empty() {
            return Err(ActError::add_empty_pattern());
        }
        let deprecate = raw
            .get("deprecate$")
            .and_then(Value::as_str)
            .map(str::to_string);

        let pattern = Pattern::from_map(&plain)
            .map_err(|e| ActError::invalid_msg("add", e.to_string()))?;

        let prior = self.prior_for(&pattern, opts);

        if let Some(ref existing) = prior {
            if existing.func.handle_override(&pattern, &action) {
                debug!(
                    target: "pact::add",
                    pattern = %pattern,
                    prior = %existing.id,
                    "registration delegated to existing handler"
                );
                return Ok(existing.clone());
            }
        }

        let priorpath = match &prior {
            Some(p) if p.priorpath.is_empty() => p.id.clone(),
            Some(p) => format!("{};{}", p.id, p.priorpath),
            None => String::new(),
        };

        let mut meta = ActMeta {
            id: short_id(opts.idlen),
            pattern: pattern.canonical().to_string(),
            parsed: pattern.clone(),
            func: action,
            rules,
            plugin,
            callpoint,
            prior,
            priorpath,
            deprecate,
            sub: false,
        };
        for modifier in &self.modifiers {
            modifier(&mut meta);
        }

        let meta = Arc::new(meta);
        self.index.add(pattern, meta.clone());
        debug!(
            target: "pact::add",
            pattern = %meta.pattern,
            action = %meta.id,
            priorpath = %meta.priorpath,
            "add"
        );
        Ok(meta)
    }

    /// Override policy: look up what the new pattern would currently
    /// dispatch to, then filter.
    fn prior_for(&self, pattern: &Pattern, opts: &Options) -> Option<Arc<ActMeta>> {
        let as_msg = pattern.to_map();
        let (matched, meta) = self.index.find_with_pattern(&as_msg)?;
        if matched.is_empty() && !opts.internal.catchall {
            return None;
        }
        if opts.strict.add && matched.canonical() != pattern.canonical() {
            return None;
        }
        Some(meta.clone())
    }

    /// Most-specific metadata for a cleaned message.
    #[must_use]
    pub fn find(&self, cleaned: &Map<String, Value>) -> Option<Arc<ActMeta>> {
        self.index.find(cleaned).cloned()
    }

    /// Exact lookup by canonical pattern.
    #[must_use]
    pub fn find_exact(&self, canonical: &str) -> Option<Arc<ActMeta>> {
        self.index.find_exact(canonical).cloned()
    }

    /// Registrations whose pattern covers `partial`.
    #[must_use]
    pub fn list(&self, partial: &Pattern) -> Vec<Arc<ActMeta>> {
        self.index
            .list(partial)
            .into_iter()
            .map(|(_, meta)| meta.clone())
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
