//! Core types for PACT (Pattern-Action Coordination Toolkit).
//!
//! This crate is the leaf of the PACT workspace and provides the
//! building blocks the other crates share:
//!
//! - [`short_id`] and the identifier types ([`InstanceId`], [`ActionId`])
//!   used to correlate dispatches, transactions and cache entries
//! - [`ErrorCode`], the unified error interface every PACT error
//!   type implements, plus the [`assert_error_codes`] test helper
//!
//! # Identifier Formats
//!
//! | Identifier | Format | Example |
//! |---|---|---|
//! | Instance | `<idgen>/<start_time>/<pid>/<version>/<tag>` | `3kf8a2.../1722....../4711/0.1.0/api` |
//! | Action (in flight) | `<local_id>/<tx>` | `b2k91xm04pfa/h3n8wq72ks01` |
//! | Prior chain | `id;id;id` | `a1;b2;c3` |

mod error;
mod id;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{short_id, ActionId, InstanceId, DEFAULT_ID_LEN, VERSION};
