//! Query engine errors.

use thiserror::Error;

/// A cancel policy name that is neither `discard` nor `deliver`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown cancel policy '{0}' (expected 'discard' or 'deliver')")]
pub struct ParsePolicyError(pub String);
