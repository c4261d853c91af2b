//! The dispatcher instance: shared state, lifecycle, signals.
//!
//! An [`Instance`] owns the shared state every delegate forwards to:
//! registry, cache, root gate, subscription bus, event hub, stats,
//! options. It dereferences to its root [`Delegate`], so the full
//! dispatch API is available directly on the instance.
//!
//! # Lifecycle
//!
//! - `ready().await` — resolves when the root gate is quiescent
//! - `close().await` — awaits readiness, marks the instance closed,
//!   stops background tasks, then dispatches the close action
//!   (`role:pact,cmd:close`) so plugins that wrapped it can run
//!   their own teardown via `prior()`
//! - fatal failures (`fatal$`, `debug.fragile`) terminate the
//!   instance once, emitting an `error` event first
//!
//! Process signals listed in `internal.close_signals` trigger
//! `close` exactly once; the listeners are scoped to the instance
//! and removed on close.

use crate::cache::ActCache;
use crate::delegate::Delegate;
use crate::error::{ActError, OptionsError};
use crate::events::{EventHub, InstanceEvent};
use crate::gate::Gate;
use crate::options::Options;
use crate::registry::Registry;
use crate::stats::Stats;
use crate::sub::SubRegistry;
use pact_types::{ErrorCode, InstanceId};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Instance-wide error handler; `true` consumes the error.
pub type ErrHandler = Arc<dyn Fn(&ActError) -> bool + Send + Sync>;

/// State shared by an instance and all of its delegates.
pub(crate) struct Shared {
    pub id: InstanceId,
    pub options: RwLock<Arc<Options>>,
    pub registry: RwLock<Registry>,
    pub cache: Mutex<ActCache>,
    pub root_gate: Gate,
    pub subs: RwLock<SubRegistry>,
    pub events: EventHub,
    pub stats: Stats,
    pub errhandler: RwLock<Option<ErrHandler>>,
    pub exports: RwLock<HashMap<String, Value>>,
    pub plugins: RwLock<HashSet<String>>,
    pub closed: AtomicBool,
    pub dying: AtomicBool,
    pub background: Mutex<Vec<JoinHandle<()>>>,
}

/// A pattern-matched action dispatcher.
///
/// # Example
///
/// ```ignore
/// let instance = Instance::new();
/// instance.add(json!({"role": "math", "cmd": "sum"}), |_ctx, msg: Value| async move {
///     let x = msg["x"].as_f64().unwrap_or(0.0);
///     let y = msg["y"].as_f64().unwrap_or(0.0);
///     Ok(json!({ "a": x + y }))
/// })?;
///
/// let out = instance.act(json!({"role": "math", "cmd": "sum", "x": 2, "y": 3})).await?;
/// assert_eq!(out["a"], 5.0);
/// ```
pub struct Instance {
    root: Delegate,
}

impl Instance {
    /// Creates an instance with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(Options::default()).expect("default options are valid")
    }

    /// Creates an instance with the given options.
    ///
    /// # Errors
    ///
    /// [`OptionsError`] when the tree fails validation.
    pub fn with_options(options: Options) -> Result<Self, OptionsError> {
        options.validate()?;

        let start_time = crate::msg::epoch_ms();
        let id = InstanceId::generate(options.idlen, start_time, options.tag.as_deref());
        let root_gate = Gate::new(
            "root",
            Duration::from_millis(options.timeout),
            options.trace.act,
        );
        let shared = Arc::new(Shared {
            id: id.clone(),
            cache: Mutex::new(ActCache::new(
                options.actcache.active,
                options.actcache.size,
            )),
            stats: Stats::new(options.stats.size),
            options: RwLock::new(Arc::new(options)),
            registry: RwLock::new(Registry::new()),
            root_gate: root_gate.clone(),
            subs: RwLock::new(SubRegistry::new()),
            events: EventHub::new(),
            errhandler: RwLock::new(None),
            exports: RwLock::new(HashMap::new()),
            plugins: RwLock::new(HashSet::new()),
            closed: AtomicBool::new(false),
            dying: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        });

        let root = Delegate {
            shared,
            did: id.idgen.clone(),
            fixedargs: Map::new(),
            add_prefix: Map::new(),
            gate: root_gate,
            gated: false,
            tx: None,
            prior_node: None,
            current_action: None,
            plugin: None,
            depth: 0,
            chain: Vec::new(),
        };

        let instance = Self { root };
        instance.register_builtins();
        instance.spawn_signal_traps();
        instance.spawn_interval_tasks();
        info!(target: "pact::instance", id = %instance.root.shared.id, "instance created");
        Ok(instance)
    }

    /// Identity of this instance.
    #[must_use]
    pub fn id(&self) -> &InstanceId {
        &self.root.shared.id
    }

    /// Close is an ordinary action so plugins can wrap it and run
    /// teardown through `prior()`.
    fn register_builtins(&self) {
        self.root
            .add(
                json!({"role": "pact", "cmd": "close"}),
                |_ctx: Delegate, _msg: Value| async move { Ok(json!({ "closed": true })) },
            )
            .expect("builtin close pattern is non-empty");
    }

    fn spawn_signal_traps(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let opts = self.root.opts();
            let wanted = [
                (
                    SignalKind::interrupt(),
                    opts.internal.close_signals.sigint,
                    "SIGINT",
                ),
                (
                    SignalKind::terminate(),
                    opts.internal.close_signals.sigterm,
                    "SIGTERM",
                ),
                (
                    SignalKind::hangup(),
                    opts.internal.close_signals.sighup,
                    "SIGHUP",
                ),
            ];
            if !wanted.iter().any(|(_, enabled, _)| *enabled) {
                return;
            }
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                tracing::debug!(
                    target: "pact::instance",
                    "no async runtime at construction; close signals not installed"
                );
                return;
            };
            for (kind, enabled, name) in wanted {
                if !enabled {
                    continue;
                }
                let delegate = self.root.clone();
                let task = handle.spawn(async move {
                    let Ok(mut stream) = signal(kind) else {
                        return;
                    };
                    if stream.recv().await.is_some() {
                        info!(
                            target: "pact::instance",
                            signal = name,
                            "close signal received"
                        );
                        let _ = delegate.close().await;
                    }
                });
                self.root.shared.background.lock().push(task);
            }
        }
    }

    fn spawn_interval_tasks(&self) {
        let opts = self.root.opts();
        if !opts.stats.running && !opts.status.running {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if opts.stats.running {
            let delegate = self.root.clone();
            let every = Duration::from_millis(opts.stats.interval.max(1));
            let task = handle.spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let snap = delegate.stats();
                    info!(
                        target: "pact::stats",
                        calls = snap.calls,
                        done = snap.done,
                        fails = snap.fails,
                        cache = snap.cache,
                        "stats"
                    );
                }
            });
            self.root.shared.background.lock().push(task);
        }
        if opts.status.running {
            let delegate = self.root.clone();
            let every = Duration::from_millis(opts.status.interval.max(1));
            let task = handle.spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let snap = delegate.stats();
                    info!(
                        target: "pact::status",
                        id = %delegate.instance_id(),
                        pending = delegate.shared.root_gate.pending(),
                        calls = snap.calls,
                        fails = snap.fails,
                        "status"
                    );
                }
            });
            self.root.shared.background.lock().push(task);
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Instance {
    type Target = Delegate;

    fn deref(&self) -> &Delegate {
        &self.root
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.root.shared.id.to_string())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Delegate {
    /// Graceful shutdown: awaits readiness, marks the instance
    /// closed, stops background tasks, then dispatches the close
    /// action with `closing$` set. Idempotent.
    ///
    /// # Errors
    ///
    /// Failures from the (possibly wrapped) close action.
    pub async fn close(&self) -> Result<Value, ActError> {
        self.shared.root_gate.wait_clear().await;
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(Value::Object(Map::new()));
        }
        for task in self.shared.background.lock().drain(..) {
            task.abort();
        }
        let result = self
            .act(json!({"role": "pact", "cmd": "close", "closing$": true}))
            .await;
        self.shared.events.emit(InstanceEvent::Close);
        info!(target: "pact::instance", id = %self.shared.id, "closed");
        result
    }

    /// One-shot fatal termination: emits the `error` event, then —
    /// unless `debug.undead` — closes the instance hard (no close
    /// action, background tasks stopped).
    pub(crate) fn die(&self, err: ActError) {
        if self.shared.dying.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(
            target: "pact::instance",
            id = %self.shared.id,
            code = %err.code(),
            error = %err,
            "fatal error, terminating instance"
        );
        self.shared.events.emit(InstanceEvent::Error { err });
        let opts = self.opts();
        if !opts.debug.undead {
            self.shared.closed.store(true, Ordering::SeqCst);
            for task in self.shared.background.lock().drain(..) {
                task.abort();
            }
        }
    }
}
