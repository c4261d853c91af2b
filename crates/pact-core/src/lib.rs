//! PACT — a pattern-matched action dispatcher.
//!
//! Applications compose their logic as `(pattern, action)` pairs.
//! Callers dispatch plain JSON messages without naming handlers; the
//! dispatcher selects the most-specific matching action, enforces
//! timeouts, caches results for at-most-once replay, threads a prior
//! chain for override super-calls, tracks statistics and emits
//! lifecycle events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Instance                          │
//! │  ┌─────────────┐  ┌────────────┐  ┌───────────────────┐  │
//! │  │  Registry   │  │  ActCache  │  │    Gate (FIFO)    │  │
//! │  │ (PatternIdx)│  │   (LRU)    │  │ timeouts/subgates │  │
//! │  └─────────────┘  └────────────┘  └───────────────────┘  │
//! │  ┌─────────────┐  ┌────────────┐  ┌───────────────────┐  │
//! │  │ SubRegistry │  │  EventHub  │  │      Stats        │  │
//! │  └─────────────┘  └────────────┘  └───────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!        ▲ forwards              ▲ forwards
//!   ┌──────────┐            ┌──────────┐
//!   │ Delegate │            │ Delegate │   (fix / gate / tx scope)
//!   └──────────┘            └──────────┘
//! ```
//!
//! # Dispatch Flow
//!
//! ```text
//! act(msg)
//!   │ merge fixedargs, extract <id>/<tx>
//!   ├─ cache hit? ──► replay (err, result) verbatim, next tick
//!   │ select gate (gate$ → fresh sub-gate)
//!   ▼ FIFO admission + per-task timer
//! resolve most-specific pattern ── none ──► default$ | empty | not-found
//!   │ loop check (history$) · attribute rules · meta$
//!   │ act-in (subscribers at entry only)
//!   ▼
//! handler(ctx, msg) ── ctx.prior() reaches the overridden action
//!   │ strict.result policing · wrap-once error handling
//!   │ cache (errors included) · stats · act-out / act-err
//!   ▼
//! continuation
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pact_core::Instance;
//! use serde_json::{json, Value};
//!
//! let instance = Instance::new();
//! instance.add(json!({"role": "math", "cmd": "sum"}), |_ctx, msg: Value| async move {
//!     let x = msg["x"].as_f64().unwrap_or(0.0);
//!     let y = msg["y"].as_f64().unwrap_or(0.0);
//!     Ok(json!({ "a": x + y }))
//! })?;
//!
//! let out = instance
//!     .act(json!({"role": "math", "cmd": "sum", "x": 2, "y": 3}))
//!     .await?;
//! assert_eq!(out["a"], 5.0);
//! ```

mod actmeta;
mod cache;
mod delegate;
mod dispatch;
mod error;
mod events;
mod gate;
mod instance;
mod msg;
mod options;
mod registry;
mod stats;
mod sub;
mod validate;

pub use actmeta::{ActMeta, Action, ActionFuture, ArcAction, CallMeta, PluginRef};
pub use cache::{ActCache, CacheEntry};
pub use delegate::Delegate;
pub use error::{ActError, ActErrorKind, ActResult, BoxError, GateError, OptionsError};
pub use events::InstanceEvent;
pub use gate::Gate;
pub use instance::{ErrHandler, Instance};
pub use options::{
    CacheOptions, CloseSignals, DebugOptions, InternalOptions, LegacyOptions, Options,
    OptionsLoader, StatsOptions, StatusOptions, StrictOptions, TraceOptions,
};
pub use registry::{ActMetaModifier, Registry};
pub use stats::{GlobalSnapshot, PatternSnapshot, Stats, TimeSummary, TimeWindow};
pub use sub::{SubFn, SubMeta, SubPhase, SubRegistry};
pub use validate::validate_rules;

// Re-export the companion crates for convenience.
pub use pact_pattern::{glob_match, Pattern, PatternError, PatternIndex};
pub use pact_types::{short_id, ActionId, ErrorCode, InstanceId};
