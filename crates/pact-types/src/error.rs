//! Unified error interface for PACT.
//!
//! Every error type in the workspace implements [`ErrorCode`] so that
//! the dispatcher, the error handler hook and the event stream can
//! treat failures uniformly:
//!
//! - **Machine-readable codes** for programmatic handling and logs
//! - **Recoverability** for retry decisions (a timed-out action may be
//!   retried with the same `id$` and replay from the cache; an empty
//!   pattern never becomes valid)
//! - **Legacy codes** for deployments that match on the historical
//!   lower-case token set (`legacy.error_codes`)
//!
//! # Example
//!
//! ```
//! use pact_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum LookupError {
//!     NotFound,
//!     Timeout,
//! }
//!
//! impl ErrorCode for LookupError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::NotFound => "LOOKUP_NOT_FOUND",
//!             Self::Timeout => "LOOKUP_TIMEOUT",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Timeout)
//!     }
//! }
//!
//! assert_eq!(LookupError::Timeout.code(), "LOOKUP_TIMEOUT");
//! assert!(LookupError::Timeout.is_recoverable());
//! ```

/// Machine-readable error classification.
///
/// Codes are UPPER_SNAKE_CASE, prefixed with the originating layer
/// (`PATTERN_`, `ACT_`, `GATE_`, `OPTIONS_`), and stable once defined.
pub trait ErrorCode {
    /// Returns the stable machine-readable code for this error.
    fn code(&self) -> &'static str;

    /// Returns whether retrying the operation may succeed.
    fn is_recoverable(&self) -> bool;

    /// Returns the historical lower-case token for this error.
    ///
    /// Defaults to [`code`](Self::code); error types that predate the
    /// current code set override this to serve `legacy.error_codes`
    /// deployments.
    fn legacy_code(&self) -> &'static str {
        self.code()
    }
}

/// Asserts that an error code follows PACT conventions: non-empty,
/// UPPER_SNAKE_CASE, starting with the expected layer prefix.
///
/// # Panics
///
/// Panics with a descriptive message on violation. Intended for use
/// in error-contract tests.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();
    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{code}' must start with prefix '{expected_prefix}'"
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{code}' must be UPPER_SNAKE_CASE"
    );
}

/// Asserts conventions over every variant of an error enum.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('_')
        && !s.ends_with('_')
        && !s.contains("__")
        && s.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestError {
        Soft,
        Hard,
    }

    impl ErrorCode for TestError {
        fn code(&self) -> &'static str {
            match self {
                Self::Soft => "TEST_SOFT",
                Self::Hard => "TEST_HARD",
            }
        }

        fn is_recoverable(&self) -> bool {
            matches!(self, Self::Soft)
        }

        fn legacy_code(&self) -> &'static str {
            match self {
                Self::Soft => "soft",
                Self::Hard => "hard",
            }
        }
    }

    #[test]
    fn code_and_recoverability() {
        assert_eq!(TestError::Soft.code(), "TEST_SOFT");
        assert!(TestError::Soft.is_recoverable());
        assert!(!TestError::Hard.is_recoverable());
    }

    #[test]
    fn legacy_code_override() {
        assert_eq!(TestError::Soft.legacy_code(), "soft");
    }

    #[test]
    fn legacy_code_defaults_to_code() {
        struct Plain;
        impl ErrorCode for Plain {
            fn code(&self) -> &'static str {
                "PLAIN_CODE"
            }
            fn is_recoverable(&self) -> bool {
                false
            }
        }
        assert_eq!(Plain.legacy_code(), "PLAIN_CODE");
    }

    #[test]
    fn assert_error_codes_accepts_valid() {
        assert_error_codes(&[TestError::Soft, TestError::Hard], "TEST_");
    }

    #[test]
    #[should_panic(expected = "must start with prefix")]
    fn assert_error_code_rejects_wrong_prefix() {
        assert_error_code(&TestError::Soft, "OTHER_");
    }

    #[test]
    fn upper_snake_case_rules() {
        assert!(is_upper_snake_case("ACT_NOT_FOUND"));
        assert!(is_upper_snake_case("GATE_TIMEOUT"));
        assert!(!is_upper_snake_case(""));
        assert!(!is_upper_snake_case("act_not_found"));
        assert!(!is_upper_snake_case("_ACT"));
        assert!(!is_upper_snake_case("ACT_"));
        assert!(!is_upper_snake_case("ACT__X"));
    }
}
