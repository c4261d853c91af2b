//! The dispatch pipeline.
//!
//! `act` runs each message through: normalization (fixed-argument
//! merge, action-id extraction), cache replay, gate selection,
//! admission, resolution, loop detection, validation, `meta$`
//! construction, observer fan-out, handler invocation, result
//! policing, caching and error handling. Entry dispatches (depth 1)
//! queue through the gate's FIFO; nested dispatches and priors run
//! inline inside the slot their entry dispatch already holds.

use crate::actmeta::{ActMeta, CallMeta};
use crate::cache::CacheEntry;
use crate::delegate::Delegate;
use crate::error::{ActError, GateError};
use crate::events::InstanceEvent;
use crate::msg::{
    epoch_ms, get_str, get_u64, is_obj_or_arr, merge_missing, merge_over, render, strip_controls,
    truthy, type_name,
};
use crate::options::Options;
use crate::sub::SubPhase;
use crate::validate::validate_rules;
use pact_pattern::Pattern;
use pact_types::{short_id, ActionId, ErrorCode};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, warn, Instrument};

/// Commands exempt from `strict.result` for historical callers.
const LEGACY_RESULT_CMDS: &[&str] = &["generate_id", "native"];

/// Reserved attributes a prior call must not inherit, so each hop
/// gets a fresh action id and stays on the caller's gate.
const PRIOR_STRIPPED: &[&str] = &["id$", "gate$", "actid$", "meta$", "transport$"];

pub(crate) struct DispatchOutcome {
    pub result: Result<Value, ActError>,
    /// The error handler consumed the failure; `act_with` skips the
    /// user continuation.
    pub suppress: bool,
}

struct BodyOut {
    result: Result<Value, ActError>,
    meta: Option<Arc<ActMeta>>,
    msg: Map<String, Value>,
    started: Instant,
    /// Entry dispatch that reached its handler; `act-out` observers
    /// fire on success.
    entry_notify: bool,
}

impl Delegate {
    /// Dispatches `msg` to the most-specific matching action and
    /// resolves with its result.
    ///
    /// # Errors
    ///
    /// Any [`ActError`]; see the error table in [`crate::error`].
    #[track_caller]
    pub fn act(&self, msg: Value) -> impl Future<Output = Result<Value, ActError>> + Send + 'static {
        let caller = self.act_caller();
        let me = self.clone();
        async move { me.dispatch(msg, caller).await.result }
    }

    /// Continuation-passing dispatch: `done` receives the `(err,
    /// result)` tuple. A panicking continuation is reported once as
    /// an `act_callback` failure and never re-entered. An installed
    /// error handler returning `true` consumes failures before they
    /// reach `done`.
    #[track_caller]
    pub fn act_with<F>(&self, msg: Value, done: F)
    where
        F: FnOnce(Result<Value, ActError>) + Send + 'static,
    {
        let caller = self.act_caller();
        let me = self.clone();
        tokio::spawn(async move {
            let outcome = me.dispatch(msg, caller).await;
            if outcome.suppress {
                return;
            }
            if catch_unwind(AssertUnwindSafe(move || done(outcome.result))).is_err() {
                let err = ActError::callback("user continuation panicked".into());
                warn!(target: "pact::act", code = %err.code(), error = %err, "act-err");
                me.shared
                    .events
                    .emit(InstanceEvent::ActErr { msg: None, err: err.clone() });
                let handler = me.shared.errhandler.read().clone();
                if let Some(h) = handler {
                    let _ = h(&err);
                }
            }
        });
    }

    /// Invokes the action this handler's registration overrode,
    /// bypassing the router. Without a prior, resolves with the
    /// message's `default$` (object or array) or `null`.
    ///
    /// # Errors
    ///
    /// Any [`ActError`] from the prior dispatch, or `DefaultBad`
    /// for an unusable `default$`.
    pub async fn prior(&self, msg: Value) -> Result<Value, ActError> {
        let Some(node) = self.prior_node.clone() else {
            if let Some(obj) = msg.as_object() {
                if let Some(d) = obj.get("default$") {
                    return if is_obj_or_arr(d) {
                        Ok(d.clone())
                    } else {
                        Err(ActError::default_bad(type_name(d)))
                    };
                }
            }
            return Ok(Value::Null);
        };

        let mut call = msg.as_object().cloned().unwrap_or_default();
        for key in PRIOR_STRIPPED {
            call.remove(*key);
        }
        if let Some(tx) = &self.tx {
            call.entry("tx$".to_string())
                .or_insert_with(|| Value::String(tx.clone()));
        }

        let mut hop = self.clone();
        if let Some(current) = &hop.current_action {
            hop.chain.push(current.clone());
        }
        hop.dispatch_core(call, Some(node), None).await.result
    }

    #[track_caller]
    fn act_caller(&self) -> Option<String> {
        if self.opts().debug.act_caller {
            Some(std::panic::Location::caller().to_string())
        } else {
            None
        }
    }

    pub(crate) async fn dispatch(&self, msg: Value, caller: Option<String>) -> DispatchOutcome {
        match msg {
            Value::Object(map) => self.dispatch_core(map, None, caller).await,
            other => {
                let opts = self.opts();
                let err = ActError::invalid_msg(
                    "act",
                    format!("message must be an object, got {}", type_name(&other)),
                );
                self.error_tail(err, None, None, self.depth == 0, false, &opts)
            }
        }
    }

    async fn dispatch_core(
        &self,
        mut call: Map<String, Value>,
        forced: Option<Arc<ActMeta>>,
        caller: Option<String>,
    ) -> DispatchOutcome {
        let opts = self.opts();

        if !self.fixedargs.is_empty() {
            if opts.strict.fixedargs {
                merge_over(&mut call, &self.fixedargs);
            } else {
                merge_missing(&mut call, &self.fixedargs);
            }
        }
        if self.gated && !call.contains_key("gate$") {
            call.insert("gate$".into(), Value::Bool(true));
        }

        let raw_id = get_str(&call, "id$")
            .or_else(|| get_str(&call, "actid$"))
            .map(str::to_string);
        let actid = match raw_id {
            Some(raw) => ActionId::parse(&raw, opts.idlen)
                .unwrap_or_else(|| ActionId::generate(opts.idlen)),
            None => match get_str(&call, "tx$")
                .map(str::to_string)
                .or_else(|| self.tx.clone())
            {
                Some(tx) => ActionId::in_tx(opts.idlen, tx),
                None => ActionId::generate(opts.idlen),
            },
        };
        let actid_str = actid.to_string();
        let entry_call = self.depth == 0;
        let fatal = truthy(call.get("fatal$"));

        if entry_call {
            self.shared.stats.inc_calls();
        }

        // Replay: a completed dispatch with the same action id is
        // delivered verbatim on the next tick, handler untouched.
        if opts.actcache.active {
            let hit = self.shared.cache.lock().get(&actid_str);
            if let Some(entry) = hit {
                self.shared.stats.inc_cache();
                tokio::task::yield_now().await;
                debug!(target: "pact::act", id = %actid_str, "cache replay");
                return DispatchOutcome {
                    result: entry.result,
                    suppress: false,
                };
            }
        }

        let gate = if truthy(call.get("gate$")) {
            self.gate.subgate(format!("gate${}", actid.local))
        } else {
            self.gate.clone()
        };
        let timeout = get_u64(&call, "timeout$").map(Duration::from_millis);
        let description = format!("act:{actid_str}");

        let body = run_call(
            self.clone(),
            opts.clone(),
            call,
            actid,
            forced,
            gate.clone(),
            caller,
        );
        let admitted = if entry_call {
            gate.run(description, timeout, body).await
        } else {
            gate.run_unqueued(description, timeout, body).await
        };

        match admitted {
            Ok(body) => {
                let elapsed_ms = body.started.elapsed().as_secs_f64() * 1000.0;
                let pattern = body.meta.as_ref().map(|m| m.pattern.clone());
                self.cache_outcome(&actid_str, &body.result, body.meta.clone(), &opts);
                match body.result {
                    Ok(value) => {
                        if entry_call {
                            self.shared
                                .stats
                                .record_done(pattern.as_deref(), elapsed_ms);
                        }
                        self.shared.events.emit(InstanceEvent::ActOut {
                            msg: Value::Object(body.msg.clone()),
                            result: value.clone(),
                        });
                        if body.entry_notify {
                            self.notify_subs(&body.msg, SubPhase::Out);
                        }
                        if opts.trace.act {
                            debug!(target: "pact::act", id = %actid_str, "act-out");
                        }
                        DispatchOutcome {
                            result: Ok(value),
                            suppress: false,
                        }
                    }
                    Err(err) => {
                        self.error_tail(err, Some(body.msg), pattern, entry_call, fatal, &opts)
                    }
                }
            }
            Err(GateError::Timeout { timeout_ms, .. }) => {
                let err = ActError::timeout(&actid_str, timeout_ms);
                self.cache_outcome(&actid_str, &Err(err.clone()), None, &opts);
                self.error_tail(err, None, None, entry_call, fatal, &opts)
            }
            Err(GateError::TaskPanicked { .. }) => {
                let err = ActError::execute_panic(&actid_str);
                self.cache_outcome(&actid_str, &Err(err.clone()), None, &opts);
                self.error_tail(err, None, None, entry_call, fatal, &opts)
            }
        }
    }

    fn cache_outcome(
        &self,
        actid: &str,
        result: &Result<Value, ActError>,
        meta: Option<Arc<ActMeta>>,
        opts: &Options,
    ) {
        if !opts.actcache.active {
            return;
        }
        self.shared.cache.lock().set(
            actid,
            CacheEntry {
                result: result.clone(),
                actmeta: meta,
                when: epoch_ms(),
            },
        );
    }

    fn error_tail(
        &self,
        err: ActError,
        msg: Option<Map<String, Value>>,
        pattern: Option<String>,
        entry: bool,
        fatal: bool,
        opts: &Options,
    ) -> DispatchOutcome {
        if entry {
            self.shared.stats.record_fail(pattern.as_deref());
        }
        let code = if opts.legacy.error_codes {
            err.legacy_code()
        } else {
            err.code()
        };
        warn!(target: "pact::act", code = %code, error = %err, "act-err");
        self.shared.events.emit(InstanceEvent::ActErr {
            msg: msg.map(Value::Object),
            err: err.clone(),
        });
        let handler = self.shared.errhandler.read().clone();
        let suppress = handler.is_some_and(|h| h(&err));
        if fatal || opts.debug.fragile {
            self.die(err.clone());
        }
        DispatchOutcome {
            result: Err(err),
            suppress,
        }
    }
}

/// The gated task body: resolve, police, invoke.
async fn run_call(
    origin: Delegate,
    opts: Arc<Options>,
    call: Map<String, Value>,
    actid: ActionId,
    forced: Option<Arc<ActMeta>>,
    gate: crate::gate::Gate,
    caller: Option<String>,
) -> BodyOut {
    let started = Instant::now();
    let depth = origin.depth + 1;
    let entry = depth == 1;
    let cleaned = strip_controls(&call);

    let meta = match forced {
        Some(meta) => meta,
        None => {
            let found = origin.shared.registry.read().find(&cleaned);
            match found {
                Some(meta) => meta,
                None => {
                    if opts.trace.unknown {
                        warn!(
                            target: "pact::act",
                            msg = %render(&cleaned, opts.debug.short_logs),
                            "no matching action"
                        );
                    }
                    let result = match call.get("default$") {
                        Some(d) if is_obj_or_arr(d) => Ok(d.clone()),
                        Some(d) => Err(ActError::default_bad(type_name(d))),
                        None if !opts.strict.find => Ok(Value::Object(Map::new())),
                        None => Err(ActError::not_found(&describe(&cleaned))),
                    };
                    return BodyOut {
                        result,
                        meta: None,
                        msg: call,
                        started,
                        entry_notify: false,
                    };
                }
            }
        }
    };

    if entry {
        origin.shared.stats.pattern_call(&meta.pattern);
    }

    if let Some(history) = call.get("history$").and_then(Value::as_array) {
        let visits = history
            .iter()
            .filter(|h| visit_action(h) == Some(meta.id.as_str()))
            .count();
        if visits > opts.strict.maxloop {
            let err = ActError::loop_detected(&meta.id, visits, opts.strict.maxloop)
                .with_plugin(meta.plugin.clone());
            return BodyOut {
                result: Err(err),
                meta: Some(meta),
                msg: call,
                started,
                entry_notify: false,
            };
        }
    }

    if !opts.legacy.validate && !meta.rules.is_empty() {
        if let Err(detail) = validate_rules(&meta.rules, &cleaned) {
            let err = ActError::invalid_msg(&meta.pattern, detail).with_plugin(meta.plugin.clone());
            return BodyOut {
                result: Err(err),
                meta: Some(meta),
                msg: call,
                started,
                entry_notify: false,
            };
        }
    }

    if let Some(note) = &meta.deprecate {
        warn!(
            target: "pact::act",
            pattern = %meta.pattern,
            action = %meta.id,
            note = %note,
            "deprecated action"
        );
    }

    let call_meta = CallMeta {
        id: actid.to_string(),
        tx: actid.tx.clone(),
        start: epoch_ms(),
        pattern: meta.pattern.clone(),
        action: meta.id.clone(),
        entry,
        chain: origin.chain.clone(),
        sync: true,
        plugin_name: meta.plugin.as_ref().map(|p| p.name.clone()),
        plugin_tag: meta.plugin.as_ref().and_then(|p| p.tag.clone()),
        caller,
    };

    let mut msg_out = call;
    msg_out.insert(
        "meta$".into(),
        serde_json::to_value(&call_meta).unwrap_or(Value::Null),
    );
    let visit = json!({ "action": meta.id, "when": call_meta.start });
    match msg_out.get_mut("history$") {
        Some(Value::Array(history)) => history.push(visit),
        _ => {
            msg_out.insert("history$".into(), Value::Array(vec![visit]));
        }
    }

    let ctx = Delegate {
        shared: origin.shared.clone(),
        did: format!("{}/{}", origin.did, short_id(4)),
        fixedargs: Map::new(),
        add_prefix: Map::new(),
        gate: gate.clone(),
        gated: false,
        tx: Some(actid.tx.clone()),
        prior_node: meta.prior.clone(),
        current_action: Some(meta.id.clone()),
        plugin: meta.plugin.clone(),
        depth,
        chain: origin.chain.clone(),
    };

    if entry {
        origin.notify_subs(&msg_out, SubPhase::In);
    }
    origin.shared.events.emit(InstanceEvent::ActIn {
        msg: Value::Object(msg_out.clone()),
    });
    if opts.trace.act {
        if opts.trace.stack {
            debug!(
                target: "pact::act",
                id = %call_meta.id,
                pattern = %meta.pattern,
                chain = ?call_meta.chain,
                priorpath = %meta.priorpath,
                "act-in"
            );
        } else if opts.legacy.logging {
            // Historical flat form: the whole message on one line.
            debug!(
                target: "pact::act",
                id = %call_meta.id,
                msg = %render(&msg_out, opts.debug.short_logs),
                "act-in"
            );
        } else {
            debug!(
                target: "pact::act",
                id = %call_meta.id,
                pattern = %meta.pattern,
                "act-in"
            );
        }
    }

    if origin
        .shared
        .closed
        .load(std::sync::atomic::Ordering::SeqCst)
        && !truthy(msg_out.get("closing$"))
    {
        return BodyOut {
            result: Err(ActError::instance_closed().with_meta(call_meta)),
            meta: Some(meta),
            msg: msg_out,
            started,
            entry_notify: false,
        };
    }

    let span = debug_span!(target: "pact::act", "act", id = %call_meta.id, pattern = %meta.pattern);
    let raw = meta
        .func
        .call(ctx, Value::Object(msg_out.clone()))
        .instrument(span)
        .await;

    let result = match raw {
        Ok(value) => {
            if !value.is_null()
                && !is_obj_or_arr(&value)
                && opts.strict.result
                && !legacy_result_allowed(&cleaned)
            {
                Err(ActError::result_not_objarr(&meta.pattern, type_name(&value))
                    .with_plugin(meta.plugin.clone()))
            } else {
                Ok(value)
            }
        }
        Err(boxed) => match boxed.downcast::<ActError>() {
            // A handler re-raising a dispatch failure keeps it as-is.
            Ok(inner) => Err(*inner),
            Err(other) => Err(ActError::execute(&meta.pattern, other.to_string())
                .with_plugin(meta.plugin.clone())),
        },
    };
    let result = result.map_err(|e| e.with_meta(call_meta));

    BodyOut {
        result,
        meta: Some(meta),
        msg: msg_out,
        started,
        entry_notify: entry,
    }
}

fn visit_action(entry: &Value) -> Option<&str> {
    entry
        .as_str()
        .or_else(|| entry.get("action").and_then(Value::as_str))
}

fn legacy_result_allowed(cleaned: &Map<String, Value>) -> bool {
    get_str(cleaned, "cmd").is_some_and(|cmd| LEGACY_RESULT_CMDS.contains(&cmd))
}

fn describe(cleaned: &Map<String, Value>) -> String {
    Pattern::from_map(cleaned)
        .map(|p| p.canonical().to_string())
        .unwrap_or_else(|_| render(cleaned, true))
}
