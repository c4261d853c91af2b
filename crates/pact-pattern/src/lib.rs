//! Message-pattern model and index for PACT.
//!
//! A pattern is a set of `(key, literal)` pairs a message must contain
//! to match. Matching is order-independent over keys; specificity is
//! the number of matched keys. This crate provides:
//!
//! - [`Pattern`] — parsing (JSON object or `"k:v,k:v"` string form),
//!   canonicalization (sorted `k:v,k:v`), matching
//! - [`glob_match`] — `*`/`?` wildcard matching for indexes built in
//!   glob mode
//! - [`PatternIndex`] — payload storage answering most-specific-match
//!   queries with later-wins tie-breaking
//!
//! Control attributes (names ending in `$`) never participate in
//! matching and are rejected by [`Pattern`] construction; callers
//! strip them first.

mod error;
mod glob;
mod index;
mod pattern;

pub use error::PatternError;
pub use glob::{glob_match, is_glob};
pub use index::PatternIndex;
pub use pattern::{canonical_value, Pattern, CONTROL_SUFFIX};
