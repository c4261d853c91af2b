//! Options — the instance configuration tree.
//!
//! # Load Order
//!
//! 1. Built-in defaults (compile-time)
//! 2. Options file (TOML), when configured
//! 3. Constructor patch
//! 4. Environment variables (`PACT_*`)
//! 5. Later `options(patch)` calls
//!
//! Each layer overrides the previous; patches are deep-merged per
//! key. The tree is validated after every merge, so an instance
//! never runs with an unusable configuration.

use crate::error::OptionsError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Dispatcher configuration. See the field types for the individual
/// switches; everything has a working default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Instance tag, included in the instance id.
    pub tag: Option<String>,
    /// Length of generated identifiers.
    pub idlen: usize,
    /// Default per-action timeout, milliseconds.
    pub timeout: u64,
    /// Strictness switches.
    pub strict: StrictOptions,
    /// Action cache switches.
    pub actcache: CacheOptions,
    /// Trace logging switches.
    pub trace: TraceOptions,
    /// Statistics switches.
    pub stats: StatsOptions,
    /// Periodic status log switches.
    pub status: StatusOptions,
    /// Debug switches.
    pub debug: DebugOptions,
    /// Internal behavior switches.
    pub internal: InternalOptions,
    /// Backwards-compatibility switches.
    pub legacy: LegacyOptions,
}

/// Strictness switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrictOptions {
    /// Require action results to be objects or arrays.
    pub result: bool,
    /// Delegate fixed arguments win over caller-supplied values.
    pub fixedargs: bool,
    /// Overrides require exact pattern equality.
    pub add: bool,
    /// With this off, a missing action yields an empty object
    /// instead of an error.
    pub find: bool,
    /// Loop-depth ceiling for repeated visits of one action.
    pub maxloop: usize,
}

impl Default for StrictOptions {
    fn default() -> Self {
        Self {
            result: true,
            fixedargs: true,
            add: false,
            find: true,
            maxloop: 11,
        }
    }
}

/// Action cache switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Enable result caching (idempotent replay by `id$`).
    pub active: bool,
    /// Maximum cached entries.
    pub size: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            active: true,
            size: 11_111,
        }
    }
}

/// Trace logging switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceOptions {
    /// Log each dispatch, and late gate completions.
    pub act: bool,
    /// Include prior chains in dispatch logs.
    pub stack: bool,
    /// Log messages that match no pattern.
    pub unknown: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            act: false,
            stack: false,
            unknown: true,
        }
    }
}

/// Statistics switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsOptions {
    /// Rolling timing window size per pattern.
    pub size: usize,
    /// Periodic stats log interval, milliseconds.
    pub interval: u64,
    /// Run the periodic stats log task.
    pub running: bool,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            size: 1024,
            interval: 60_000,
            running: false,
        }
    }
}

/// Periodic status log switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusOptions {
    /// Status line interval, milliseconds.
    pub interval: u64,
    /// Run the periodic status task.
    pub running: bool,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            interval: 60_000,
            running: false,
        }
    }
}

/// Debug switches.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    /// Treat every dispatch error as fatal.
    pub fragile: bool,
    /// Fatal errors do not actually terminate the instance.
    pub undead: bool,
    /// Record the `act` call site into `meta$`.
    pub act_caller: bool,
    /// Record the `add` call site into action metadata.
    pub callpoint: bool,
    /// Truncate logged messages.
    pub short_logs: bool,
}

/// Internal behavior switches.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalOptions {
    /// Treat the empty (catch-all) pattern as overridable; off by
    /// default, so a catch-all never becomes an implicit prior.
    pub catchall: bool,
    /// Process signals that trigger `close`.
    pub close_signals: CloseSignals,
}

/// Which process signals trigger `close`. All off by default; signal
/// handlers are only installed when configured.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseSignals {
    /// Trap SIGINT.
    pub sigint: bool,
    /// Trap SIGTERM.
    pub sigterm: bool,
    /// Trap SIGHUP.
    pub sighup: bool,
}

/// Backwards-compatibility switches.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyOptions {
    /// Report the historical lower-case error token set.
    pub error_codes: bool,
    /// Skip attribute-rule validation.
    pub validate: bool,
    /// Render log payloads in the historical flat form.
    pub logging: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tag: None,
            idlen: 12,
            timeout: 22_222,
            strict: StrictOptions::default(),
            actcache: CacheOptions::default(),
            trace: TraceOptions::default(),
            stats: StatsOptions::default(),
            status: StatusOptions::default(),
            debug: DebugOptions::default(),
            internal: InternalOptions::default(),
            legacy: LegacyOptions::default(),
        }
    }
}

impl Options {
    /// Checks the tree for unusable values.
    ///
    /// # Errors
    ///
    /// [`OptionsError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !(2..=64).contains(&self.idlen) {
            return Err(OptionsError::Invalid {
                field: "idlen",
                detail: format!("must be between 2 and 64, got {}", self.idlen),
            });
        }
        if self.timeout == 0 {
            return Err(OptionsError::Invalid {
                field: "timeout",
                detail: "must be at least 1ms".into(),
            });
        }
        if self.strict.maxloop == 0 {
            return Err(OptionsError::Invalid {
                field: "strict.maxloop",
                detail: "must be at least 1".into(),
            });
        }
        if self.actcache.size == 0 {
            return Err(OptionsError::Invalid {
                field: "actcache.size",
                detail: "must be at least 1".into(),
            });
        }
        if self.stats.size < 2 {
            return Err(OptionsError::Invalid {
                field: "stats.size",
                detail: "must be at least 2".into(),
            });
        }
        Ok(())
    }

    /// Returns a copy with `patch` deep-merged over this tree, then
    /// validated.
    ///
    /// # Errors
    ///
    /// [`OptionsError::Patch`] when the merged tree does not
    /// deserialize, or the validation error.
    pub fn merged_with(&self, patch: &Value) -> Result<Options, OptionsError> {
        let mut tree = serde_json::to_value(self).map_err(|e| OptionsError::Patch {
            detail: e.to_string(),
        })?;
        deep_merge(&mut tree, patch);
        let merged: Options = serde_json::from_value(tree).map_err(|e| OptionsError::Patch {
            detail: e.to_string(),
        })?;
        merged.validate()?;
        Ok(merged)
    }
}

/// Deep-merges `patch` into `tree`: objects recurse, everything else
/// replaces.
fn deep_merge(tree: &mut Value, patch: &Value) {
    match (tree, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                match dst.get_mut(k) {
                    Some(slot) if slot.is_object() && v.is_object() => deep_merge(slot, v),
                    _ => {
                        dst.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, v) => *slot = v.clone(),
    }
}

/// Options loader with builder pattern.
///
/// # Example
///
/// ```ignore
/// let opts = OptionsLoader::new()
///     .with_file(".pact/options.toml")
///     .with_patch(json!({ "timeout": 5000 }))
///     .skip_env_vars() // for deterministic tests
///     .load()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct OptionsLoader {
    file: Option<PathBuf>,
    patch: Option<Value>,
    skip_env: bool,
}

impl OptionsLoader {
    /// Creates a loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the options file. A missing file is silently ignored; a
    /// present but unparsable one is an error.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Sets the constructor patch, deep-merged over file contents.
    #[must_use]
    pub fn with_patch(mut self, patch: Value) -> Self {
        self.patch = Some(patch);
        self
    }

    /// Skips environment variable loading.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Loads and merges all configured layers.
    ///
    /// # Errors
    ///
    /// Any [`OptionsError`] from reading, parsing, merging or
    /// validating.
    pub fn load(&self) -> Result<Options, OptionsError> {
        let mut opts = Options::default();

        if let Some(ref path) = self.file {
            if let Some(file_patch) = load_file(path)? {
                debug!(path = %path.display(), "loaded options file");
                opts = opts.merged_with(&file_patch)?;
            }
        }

        if let Some(ref patch) = self.patch {
            opts = opts.merged_with(patch)?;
        }

        if !self.skip_env {
            apply_env_vars(&mut opts)?;
            opts.validate()?;
        }

        Ok(opts)
    }
}

fn load_file(path: &Path) -> Result<Option<Value>, OptionsError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| OptionsError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    let parsed: toml::Value = toml::from_str(&content).map_err(|e| OptionsError::Parse {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let json = serde_json::to_value(parsed).map_err(|e| OptionsError::Parse {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    Ok(Some(json))
}

fn apply_env_vars(opts: &mut Options) -> Result<(), OptionsError> {
    if let Ok(val) = std::env::var("PACT_TAG") {
        opts.tag = Some(val);
    }
    if let Ok(val) = std::env::var("PACT_TIMEOUT") {
        opts.timeout = val.parse().map_err(|_| OptionsError::InvalidEnvVar {
            var: "PACT_TIMEOUT",
            detail: "expected milliseconds as an integer".into(),
        })?;
    }
    if let Ok(val) = std::env::var("PACT_DEBUG_SHORT_LOGS") {
        opts.debug.short_logs =
            parse_bool(&val).ok_or(OptionsError::InvalidEnvVar {
                var: "PACT_DEBUG_SHORT_LOGS",
                detail: "expected a boolean".into(),
            })?;
    }
    Ok(())
}

/// Parses a boolean from an environment value.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off"
/// (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
