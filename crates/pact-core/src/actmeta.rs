//! Action metadata and the handler trait.
//!
//! Every registration produces an immutable [`ActMeta`] node. When a
//! pattern is re-registered, the new node keeps a back-reference to
//! the node it shadows (`prior`), forming the override chain a
//! handler walks with `prior()`. Superseded nodes stay reachable
//! through that chain until the instance is closed.

use crate::error::ActResult;
use crate::Delegate;
use pact_pattern::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by action handlers.
pub type ActionFuture = Pin<Box<dyn Future<Output = ActResult> + Send>>;

/// Shared handle to a registered handler.
pub type ArcAction = Arc<dyn Action>;

/// A message handler bound to a pattern.
///
/// Implemented automatically for async closures of the shape
/// `Fn(Delegate, Value) -> impl Future<Output = ActResult>`:
///
/// ```ignore
/// instance.add(json!({"role": "math", "cmd": "sum"}), |_ctx, msg: Value| async move {
///     let x = msg["x"].as_f64().unwrap_or(0.0);
///     let y = msg["y"].as_f64().unwrap_or(0.0);
///     Ok(json!({ "a": x + y }))
/// })?;
/// ```
///
/// The delegate passed to [`call`](Self::call) is scoped to this
/// dispatch: it carries the transaction id, and `prior()` reaches the
/// overridden handler when one exists.
pub trait Action: Send + Sync {
    /// Handles one dispatched message. Returning from the future is
    /// the continuation; errors are wrapped once by the dispatcher.
    fn call(&self, ctx: Delegate, msg: Value) -> ActionFuture;

    /// Override delegation hook, consulted when a new action is
    /// registered over this one. Returning `true` means this handler
    /// consumed the registration and no new metadata is installed.
    fn handle_override(&self, _pattern: &Pattern, _action: &ArcAction) -> bool {
        false
    }
}

impl<F, Fut> Action for F
where
    F: Fn(Delegate, Value) -> Fut + Send + Sync,
    Fut: Future<Output = ActResult> + Send + 'static,
{
    fn call(&self, ctx: Delegate, msg: Value) -> ActionFuture {
        Box::pin(self(ctx, msg))
    }
}

/// Identity of the plugin that registered an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRef {
    /// Plugin base name.
    pub name: String,
    /// Instance tag, when the plugin is registered more than once.
    pub tag: Option<String>,
    /// `name` or `name$tag`.
    pub fullname: String,
}

impl PluginRef {
    /// Creates a plugin reference; `fullname` is derived.
    #[must_use]
    pub fn new(name: impl Into<String>, tag: Option<&str>) -> Self {
        let name = name.into();
        let fullname = match tag {
            Some(t) => format!("{name}${t}"),
            None => name.clone(),
        };
        Self {
            name,
            tag: tag.map(str::to_string),
            fullname,
        }
    }
}

/// Immutable metadata for one registration.
pub struct ActMeta {
    /// Generated action identifier.
    pub id: String,
    /// Canonical `k:v,k:v` pattern string.
    pub pattern: String,
    /// Parsed pattern, kept for re-registration by `wrap`.
    pub parsed: Pattern,
    /// The handler.
    pub func: ArcAction,
    /// Per-attribute validation rules extracted from the raw pattern.
    pub rules: Map<String, Value>,
    /// Registering plugin, when any.
    pub plugin: Option<PluginRef>,
    /// Source location of the `add` call (`debug.callpoint`).
    pub callpoint: Option<String>,
    /// The metadata this registration overrides.
    pub prior: Option<Arc<ActMeta>>,
    /// Flattened `id;id;id` chain of overridden ancestors.
    pub priorpath: String,
    /// Deprecation note; logged on every dispatch when set.
    pub deprecate: Option<String>,
    /// `true` when this metadata represents a subscriber.
    pub sub: bool,
}

impl ActMeta {
    /// Number of overridden ancestors.
    #[must_use]
    pub fn prior_depth(&self) -> usize {
        if self.priorpath.is_empty() {
            0
        } else {
            self.priorpath.split(';').count()
        }
    }
}

impl fmt::Debug for ActMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActMeta")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("priorpath", &self.priorpath)
            .field("plugin", &self.plugin)
            .field("deprecate", &self.deprecate)
            .field("sub", &self.sub)
            .finish_non_exhaustive()
    }
}

/// Per-dispatch metadata, serialized into the message as `meta$`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMeta {
    /// Full action id, `<local>/<tx>`.
    pub id: String,
    /// Transaction correlation id.
    pub tx: String,
    /// Dispatch start, milliseconds since epoch.
    pub start: u64,
    /// Canonical pattern of the selected action.
    pub pattern: String,
    /// Selected action's metadata id.
    pub action: String,
    /// `true` for user-initiated dispatches (depth 1); controls
    /// subscriber fan-out and statistics booking.
    pub entry: bool,
    /// Ancestor action ids, extended by one on each prior hop.
    pub chain: Vec<String>,
    /// `true` when a continuation was supplied.
    pub sync: bool,
    /// Registering plugin name, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    /// Registering plugin tag, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_tag: Option<String>,
    /// `act` call site (`debug.act_caller`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_ref_fullname() {
        let plain = PluginRef::new("store", None);
        assert_eq!(plain.fullname, "store");

        let tagged = PluginRef::new("store", Some("pg"));
        assert_eq!(tagged.fullname, "store$pg");
        assert_eq!(tagged.tag.as_deref(), Some("pg"));
    }

    #[test]
    fn prior_depth_counts_chain() {
        let base = ActMeta {
            id: "a1".into(),
            pattern: "cmd:x".into(),
            parsed: Pattern::parse("cmd:x").expect("pattern should parse"),
            func: Arc::new(|_ctx: Delegate, _msg: Value| async move {
                Ok(Value::Object(Map::new()))
            }),
            rules: Map::new(),
            plugin: None,
            callpoint: None,
            prior: None,
            priorpath: String::new(),
            deprecate: None,
            sub: false,
        };
        assert_eq!(base.prior_depth(), 0);

        let chained = ActMeta {
            priorpath: "b2;c3".into(),
            ..ActMeta {
                id: "d4".into(),
                pattern: base.pattern.clone(),
                parsed: base.parsed.clone(),
                func: base.func.clone(),
                rules: Map::new(),
                plugin: None,
                callpoint: None,
                prior: None,
                priorpath: String::new(),
                deprecate: None,
                sub: false,
            }
        };
        assert_eq!(chained.prior_depth(), 2);
    }

    #[test]
    fn call_meta_serializes_without_empty_plugin() {
        let meta = CallMeta {
            id: "a/b".into(),
            tx: "b".into(),
            start: 1,
            pattern: "cmd:x".into(),
            action: "a1".into(),
            entry: true,
            chain: vec![],
            sync: true,
            plugin_name: None,
            plugin_tag: None,
            caller: None,
        };
        let json = serde_json::to_value(&meta).expect("CallMeta should serialize");
        assert!(json.get("plugin_name").is_none());
        assert_eq!(json["entry"], true);
    }
}
