//! # Payload
//!
//! Immutable, reference-counted message bodies.
//!
//! A [`Payload`] wraps a [`bytes::Bytes`] buffer: cloning shares the
//! underlying allocation, slicing yields a zero-copy view, and the memory is
//! released when the last view is dropped.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Number of bytes shown by the `Debug` representation.
const DEBUG_PREVIEW_LEN: usize = 16;

/// An immutable, shareable byte sequence.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Bytes);

impl Payload {
    /// An empty payload (no allocation).
    #[must_use]
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Create a payload by copying caller-owned bytes.
    #[must_use]
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    /// Number of bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Zero-copy view of `range`, sharing this payload's buffer.
    ///
    /// Returns `None` if the range is out of bounds or inverted.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Option<Self> {
        if range.start > range.end || range.end > self.0.len() {
            return None;
        }
        Some(Self(self.0.slice(range)))
    }

    /// Owned copy of the contents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Decode the contents as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns the UTF-8 error if the bytes are not valid UTF-8.
    pub fn try_to_string(&self) -> Result<String, std::str::Utf8Error> {
        std::str::from_utf8(&self.0).map(str::to_owned)
    }

    /// The underlying shared buffer.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = &self.0[..self.0.len().min(DEBUG_PREVIEW_LEN)];
        f.debug_struct("Payload")
            .field("len", &self.0.len())
            .field("head", &preview)
            .finish()
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Self::copy_from_slice(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::copy_from_slice(value.as_bytes())
    }
}
