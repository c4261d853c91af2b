//! Identifier generation and formats.
//!
//! PACT correlates everything — dispatches, transactions, cache entries,
//! delegates — through short random identifiers rather than full UUIDs,
//! so that log lines and prior chains stay readable. The raw entropy
//! still comes from UUID v4.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default length of generated short identifiers.
pub const DEFAULT_ID_LEN: usize = 12;

/// Crate version baked into instance identifiers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Generates a random lowercase hex identifier of the given length.
///
/// Entropy is drawn from UUID v4 (122 random bits per draw); longer
/// identifiers concatenate additional draws.
///
/// # Example
///
/// ```
/// use pact_types::short_id;
///
/// let id = short_id(12);
/// assert_eq!(id.len(), 12);
/// assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
#[must_use]
pub fn short_id(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let hex = Uuid::new_v4().as_simple().to_string();
        let take = (len - out.len()).min(hex.len());
        out.push_str(&hex[..take]);
    }
    out
}

/// Identity of one dispatcher instance.
///
/// Rendered as five slash-delimited fields:
///
/// ```text
/// <idgen>/<start_time>/<pid>/<version>/<tag>
/// ```
///
/// `start_time` is milliseconds since the Unix epoch, `tag` is the
/// user-supplied instance tag (`-` when unset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceId {
    /// Random per-instance component.
    pub idgen: String,
    /// Instance start time, milliseconds since epoch.
    pub start_time: u64,
    /// Operating-system process id.
    pub pid: u32,
    /// Library version at instance creation.
    pub version: String,
    /// User-supplied tag, or `-`.
    pub tag: String,
}

impl InstanceId {
    /// Creates an instance id for the current process.
    #[must_use]
    pub fn generate(idlen: usize, start_time: u64, tag: Option<&str>) -> Self {
        Self {
            idgen: short_id(idlen),
            start_time,
            pid: std::process::id(),
            version: VERSION.to_string(),
            tag: tag.unwrap_or("-").to_string(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.idgen, self.start_time, self.pid, self.version, self.tag
        )
    }
}

/// Identifier of one dispatch in flight: `<local_id>/<tx>`.
///
/// The local part names the call itself; the transaction part is
/// propagated through prior chains and nested dispatches so that all
/// work triggered by one inbound message shares a correlation id.
/// The rendered form is the action-cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId {
    /// Identifies this particular call.
    pub local: String,
    /// Transaction correlation id, shared across a call tree.
    pub tx: String,
}

impl ActionId {
    /// Creates a fresh action id with a new transaction.
    #[must_use]
    pub fn generate(idlen: usize) -> Self {
        Self {
            local: short_id(idlen),
            tx: short_id(idlen),
        }
    }

    /// Creates an action id joining an existing transaction.
    #[must_use]
    pub fn in_tx(idlen: usize, tx: impl Into<String>) -> Self {
        Self {
            local: short_id(idlen),
            tx: tx.into(),
        }
    }

    /// Parses a caller-supplied `<local>/<tx>` form.
    ///
    /// A bare `<local>` (no slash) gets a fresh transaction of the
    /// given length. Empty input returns `None`.
    #[must_use]
    pub fn parse(raw: &str, idlen: usize) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        match raw.split_once('/') {
            Some((local, tx)) if !local.is_empty() && !tx.is_empty() => Some(Self {
                local: local.to_string(),
                tx: tx.to_string(),
            }),
            Some(_) => None,
            None => Some(Self {
                local: raw.to_string(),
                tx: short_id(idlen),
            }),
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.local, self.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── short_id ─────────────────────────────────────────────

    #[test]
    fn short_id_length() {
        for len in [1, 4, 12, 32, 40, 64] {
            assert_eq!(short_id(len).len(), len);
        }
    }

    #[test]
    fn short_id_is_lower_hex() {
        let id = short_id(40);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn short_id_unique() {
        let a = short_id(12);
        let b = short_id(12);
        assert_ne!(a, b);
    }

    // ── InstanceId ───────────────────────────────────────────

    #[test]
    fn instance_id_five_fields() {
        let id = InstanceId::generate(12, 1_722_000_000_000, Some("api"));
        let rendered = id.to_string();
        let fields: Vec<&str> = rendered.split('/').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0].len(), 12);
        assert_eq!(fields[1], "1722000000000");
        assert_eq!(fields[3], VERSION);
        assert_eq!(fields[4], "api");
    }

    #[test]
    fn instance_id_untagged() {
        let id = InstanceId::generate(8, 0, None);
        assert_eq!(id.tag, "-");
        assert!(id.to_string().ends_with("/-"));
    }

    // ── ActionId ─────────────────────────────────────────────

    #[test]
    fn action_id_generate() {
        let id = ActionId::generate(12);
        assert_eq!(id.local.len(), 12);
        assert_eq!(id.tx.len(), 12);
        assert_ne!(id.local, id.tx);
    }

    #[test]
    fn action_id_in_tx() {
        let id = ActionId::in_tx(12, "T1");
        assert_eq!(id.tx, "T1");
        assert_eq!(id.to_string(), format!("{}/T1", id.local));
    }

    #[test]
    fn action_id_parse_full() {
        let id = ActionId::parse("X/T", 12).expect("'X/T' should parse");
        assert_eq!(id.local, "X");
        assert_eq!(id.tx, "T");
    }

    #[test]
    fn action_id_parse_bare_local() {
        let id = ActionId::parse("X", 12).expect("bare 'X' should parse");
        assert_eq!(id.local, "X");
        assert_eq!(id.tx.len(), 12);
    }

    #[test]
    fn action_id_parse_rejects_malformed() {
        assert!(ActionId::parse("", 12).is_none());
        assert!(ActionId::parse("/T", 12).is_none());
        assert!(ActionId::parse("X/", 12).is_none());
    }

    #[test]
    fn action_id_serde_roundtrip() {
        let id = ActionId::generate(12);
        let json = serde_json::to_string(&id).expect("ActionId should serialize");
        let restored: ActionId =
            serde_json::from_str(&json).expect("ActionId should deserialize");
        assert_eq!(id, restored);
    }
}
