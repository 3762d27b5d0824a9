//! # Error Types
//!
//! Defines error types shared across crates.

use thiserror::Error;

/// Reasons a string is rejected as a key expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyExprError {
    /// The expression is the empty string.
    #[error("Key expression cannot be empty")]
    Empty,

    /// A segment between two separators is empty (`a//b`, `/a`, `a/`).
    #[error("Empty segment at position {position}")]
    EmptySegment { position: usize },

    /// A wildcard is mixed with literal characters inside one segment.
    #[error("Wildcards must be standalone segments, found '{segment}'")]
    PartialWildcard { segment: String },

    /// `**/**` matches nothing `**` alone would not.
    #[error("Redundant '**/**' at position {position}")]
    RedundantMultiWildcard { position: usize },

    /// The segment contains a reserved or non-printable character.
    #[error("Invalid character {character:?} in segment '{segment}'")]
    InvalidCharacter { segment: String, character: char },
}

/// Errors from encoding or decoding a network envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Frame could not be serialized.
    #[error("Failed to encode envelope: {0}")]
    Encode(String),

    /// Frame bytes are not a valid envelope.
    #[error("Failed to decode envelope: {0}")]
    Decode(String),

    /// Frame was produced by an incompatible protocol version.
    #[error("Unsupported version: received {received}, supported {supported}")]
    UnsupportedVersion { received: u16, supported: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyexpr_error_display() {
        let err = KeyExprError::EmptySegment { position: 2 };
        assert_eq!(err.to_string(), "Empty segment at position 2");

        let err = KeyExprError::InvalidCharacter {
            segment: "a#b".to_string(),
            character: '#',
        };
        assert_eq!(err.to_string(), "Invalid character '#' in segment 'a#b'");
    }

    #[test]
    fn test_envelope_error_display() {
        let err = EnvelopeError::UnsupportedVersion {
            received: 9,
            supported: 1,
        };
        assert_eq!(err.to_string(), "Unsupported version: received 9, supported 1");
    }
}
