//! Dispatcher errors.
//!
//! Every failure is delivered exactly once through the continuation
//! and always emitted as an `act-err` event. [`ActError`] is a
//! uniform value: a kind, a rendered message, and whatever context
//! was known at the failure point (pattern, plugin, call metadata).
//! Handler failures are wrapped once as [`ActErrorKind::Execute`]
//! with the original retained in `orig` — never double-wrapped.
//!
//! # Error Codes
//!
//! | Kind | Code | Legacy | Recoverable |
//! |------|------|--------|-------------|
//! | `AddEmptyPattern` | `ACT_ADD_EMPTY_PATTERN` | `add_empty_pattern` | No |
//! | `NotFound` | `ACT_NOT_FOUND` | `act_not_found` | No |
//! | `DefaultBad` | `ACT_DEFAULT_BAD` | `act_default_bad` | No |
//! | `InvalidMsg` | `ACT_INVALID_MSG` | `act_invalid_msg` | No |
//! | `Loop` | `ACT_LOOP` | `act_loop` | No |
//! | `ResultNotObjArr` | `ACT_RESULT_NOT_OBJARR` | `result_not_objarr` | No |
//! | `Execute` | `ACT_EXECUTE` | `act_execute` | No |
//! | `Callback` | `ACT_CALLBACK` | `act_callback` | No |
//! | `InstanceClosed` | `ACT_INSTANCE_CLOSED` | `instance-closed` | No |
//! | `Timeout` | `ACT_TIMEOUT` | `TIMEOUT` | Yes |
//! | `PluginRequired` | `ACT_PLUGIN_REQUIRED` | `plugin_required` | No |
//! | `ExportNotFound` | `ACT_EXPORT_NOT_FOUND` | `export_not_found` | No |

use crate::actmeta::{CallMeta, PluginRef};
use pact_types::ErrorCode;
use thiserror::Error;

/// Boxed error type action handlers may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What an action handler returns.
pub type ActResult = Result<serde_json::Value, BoxError>;

/// Classification of dispatch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActErrorKind {
    /// `add` with no matchable keys after control stripping.
    AddEmptyPattern,
    /// No pattern matched and no usable `default$`.
    NotFound,
    /// `default$` present but not an object or array.
    DefaultBad,
    /// Message failed the registered attribute rules.
    InvalidMsg,
    /// `history$` visits of one action exceeded `strict.maxloop`.
    Loop,
    /// Success result violated `strict.result`.
    ResultNotObjArr,
    /// Handler failed or panicked.
    Execute,
    /// User continuation panicked.
    Callback,
    /// Dispatch attempted after close.
    InstanceClosed,
    /// The gate timed out the task.
    Timeout,
    /// Plugin dependency not registered.
    PluginRequired,
    /// Plugin export missing.
    ExportNotFound,
}

/// A dispatch failure with its context.
///
/// `Clone` so the action cache can replay failures verbatim for
/// retried messages carrying the same `id$`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActError {
    /// Failure classification.
    pub kind: ActErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Canonical pattern, when resolution got that far.
    pub pattern: Option<String>,
    /// Registering plugin of the failing action, when known.
    pub plugin: Option<PluginRef>,
    /// Call metadata of the failing dispatch, when known.
    pub meta: Option<Box<CallMeta>>,
    /// Original failure from inside a handler; retained, never
    /// re-wrapped.
    pub orig: Option<String>,
}

impl ActError {
    fn new(kind: ActErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            pattern: None,
            plugin: None,
            meta: None,
            orig: None,
        }
    }

    pub(crate) fn add_empty_pattern() -> Self {
        Self::new(
            ActErrorKind::AddEmptyPattern,
            "add requires at least one non-control attribute".into(),
        )
    }

    pub(crate) fn not_found(pattern: &str) -> Self {
        let mut e = Self::new(
            ActErrorKind::NotFound,
            format!("no matching action for message {{{pattern}}}"),
        );
        e.pattern = Some(pattern.to_string());
        e
    }

    pub(crate) fn default_bad(got: &str) -> Self {
        Self::new(
            ActErrorKind::DefaultBad,
            format!("default$ must be an object or array, got {got}"),
        )
    }

    pub(crate) fn invalid_msg(pattern: &str, detail: String) -> Self {
        let mut e = Self::new(
            ActErrorKind::InvalidMsg,
            format!("invalid message for {{{pattern}}}: {detail}"),
        );
        e.pattern = Some(pattern.to_string());
        e
    }

    pub(crate) fn loop_detected(action: &str, count: usize, maxloop: usize) -> Self {
        Self::new(
            ActErrorKind::Loop,
            format!("action {action} repeated {count} times, exceeding maxloop {maxloop}"),
        )
    }

    pub(crate) fn result_not_objarr(pattern: &str, got: &str) -> Self {
        let mut e = Self::new(
            ActErrorKind::ResultNotObjArr,
            format!("action {{{pattern}}} returned {got}; results must be objects or arrays"),
        );
        e.pattern = Some(pattern.to_string());
        e
    }

    pub(crate) fn execute(pattern: &str, orig: String) -> Self {
        let mut e = Self::new(
            ActErrorKind::Execute,
            format!("action {{{pattern}}} failed: {orig}"),
        );
        e.pattern = Some(pattern.to_string());
        e.orig = Some(orig);
        e
    }

    pub(crate) fn execute_panic(action_id: &str) -> Self {
        let mut e = Self::new(
            ActErrorKind::Execute,
            format!("action {action_id} panicked"),
        );
        e.orig = Some("panic".into());
        e
    }

    pub(crate) fn callback(detail: String) -> Self {
        let mut e = Self::new(
            ActErrorKind::Callback,
            format!("act callback panicked: {detail}"),
        );
        e.orig = Some(detail);
        e
    }

    pub(crate) fn instance_closed() -> Self {
        Self::new(ActErrorKind::InstanceClosed, "instance closed".into())
    }

    pub(crate) fn timeout(action_id: &str, timeout_ms: u64) -> Self {
        Self::new(
            ActErrorKind::Timeout,
            format!("action {action_id} timed out after {timeout_ms}ms"),
        )
    }

    pub(crate) fn plugin_required(plugin: &str, dependency: &str) -> Self {
        Self::new(
            ActErrorKind::PluginRequired,
            format!("plugin {plugin} requires {dependency}"),
        )
    }

    pub(crate) fn export_not_found(key: &str) -> Self {
        Self::new(
            ActErrorKind::ExportNotFound,
            format!("export not found: {key}"),
        )
    }

    /// Attaches call context. An error propagated from an inner
    /// dispatch keeps its original context.
    pub(crate) fn with_meta(mut self, meta: CallMeta) -> Self {
        if self.pattern.is_none() {
            self.pattern = Some(meta.pattern.clone());
        }
        if self.meta.is_none() {
            self.meta = Some(Box::new(meta));
        }
        self
    }

    pub(crate) fn with_plugin(mut self, plugin: Option<PluginRef>) -> Self {
        if self.plugin.is_none() {
            self.plugin = plugin;
        }
        self
    }
}

impl ErrorCode for ActError {
    fn code(&self) -> &'static str {
        match self.kind {
            ActErrorKind::AddEmptyPattern => "ACT_ADD_EMPTY_PATTERN",
            ActErrorKind::NotFound => "ACT_NOT_FOUND",
            ActErrorKind::DefaultBad => "ACT_DEFAULT_BAD",
            ActErrorKind::InvalidMsg => "ACT_INVALID_MSG",
            ActErrorKind::Loop => "ACT_LOOP",
            ActErrorKind::ResultNotObjArr => "ACT_RESULT_NOT_OBJARR",
            ActErrorKind::Execute => "ACT_EXECUTE",
            ActErrorKind::Callback => "ACT_CALLBACK",
            ActErrorKind::InstanceClosed => "ACT_INSTANCE_CLOSED",
            ActErrorKind::Timeout => "ACT_TIMEOUT",
            ActErrorKind::PluginRequired => "ACT_PLUGIN_REQUIRED",
            ActErrorKind::ExportNotFound => "ACT_EXPORT_NOT_FOUND",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self.kind, ActErrorKind::Timeout)
    }

    fn legacy_code(&self) -> &'static str {
        match self.kind {
            ActErrorKind::AddEmptyPattern => "add_empty_pattern",
            ActErrorKind::NotFound => "act_not_found",
            ActErrorKind::DefaultBad => "act_default_bad",
            ActErrorKind::InvalidMsg => "act_invalid_msg",
            ActErrorKind::Loop => "act_loop",
            ActErrorKind::ResultNotObjArr => "result_not_objarr",
            ActErrorKind::Execute => "act_execute",
            ActErrorKind::Callback => "act_callback",
            ActErrorKind::InstanceClosed => "instance-closed",
            ActErrorKind::Timeout => "TIMEOUT",
            ActErrorKind::PluginRequired => "plugin_required",
            ActErrorKind::ExportNotFound => "export_not_found",
        }
    }
}

/// Gated executor failures.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    /// The per-task timer expired before the task completed.
    #[error("task '{description}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Task description, for logs.
        description: String,
        /// Effective timeout.
        timeout_ms: u64,
    },

    /// The task panicked.
    #[error("task '{description}' panicked")]
    TaskPanicked {
        /// Task description, for logs.
        description: String,
    },
}

impl ErrorCode for GateError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "GATE_TIMEOUT",
            Self::TaskPanicked { .. } => "GATE_TASK_PANICKED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Options layer failures.
#[derive(Debug, Error)]
pub enum OptionsError {
    /// A field failed validation.
    #[error("invalid option {field}: {detail}")]
    Invalid {
        /// Dotted option path.
        field: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// An options file could not be read.
    #[error("cannot read options file {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// An options file could not be parsed.
    #[error("cannot parse options file {path}: {detail}")]
    Parse {
        /// File path.
        path: String,
        /// Parser message.
        detail: String,
    },

    /// An environment variable held an unusable value.
    #[error("invalid environment variable {var}: {detail}")]
    InvalidEnvVar {
        /// Variable name.
        var: &'static str,
        /// What was expected.
        detail: String,
    },

    /// A patch did not merge into a valid options tree.
    #[error("invalid options patch: {detail}")]
    Patch {
        /// Merge or deserialization message.
        detail: String,
    },
}

impl ErrorCode for OptionsError {
    fn code(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "OPTIONS_INVALID",
            Self::Read { .. } => "OPTIONS_READ",
            Self::Parse { .. } => "OPTIONS_PARSE",
            Self::InvalidEnvVar { .. } => "OPTIONS_INVALID_ENV_VAR",
            Self::Patch { .. } => "OPTIONS_PATCH",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}
