//! Pattern layer errors.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`PatternError::InvalidPair`] | `PATTERN_INVALID_PAIR` | No |
//! | [`PatternError::ControlKey`] | `PATTERN_CONTROL_KEY` | No |
//! | [`PatternError::NotAnObject`] | `PATTERN_NOT_AN_OBJECT` | No |

use pact_types::ErrorCode;
use thiserror::Error;

/// Failure constructing a [`Pattern`](crate::Pattern).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// A `"k:v,k:v"` string segment had no key or no separator.
    #[error("invalid pattern pair: '{0}'")]
    InvalidPair(String),

    /// A control attribute (`$`-suffixed) was passed to pattern
    /// construction; control attributes never match.
    #[error("control attribute '{0}' cannot appear in a pattern")]
    ControlKey(String),

    /// Pattern source was not a JSON object.
    #[error("pattern must be a JSON object, got {0}")]
    NotAnObject(String),
}

impl ErrorCode for PatternError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidPair(_) => "PATTERN_INVALID_PAIR",
            Self::ControlKey(_) => "PATTERN_CONTROL_KEY",
            Self::NotAnObject(_) => "PATTERN_NOT_AN_OBJECT",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pact_types::assert_error_codes;

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(
            &[
                PatternError::InvalidPair("x".into()),
                PatternError::ControlKey("id$".into()),
                PatternError::NotAnObject("null".into()),
            ],
            "PATTERN_",
        );
    }

    #[test]
    fn none_recoverable() {
        assert!(!PatternError::InvalidPair("x".into()).is_recoverable());
    }
}
