//! # Core Domain Entities
//!
//! Identity and message values that flow between sessions.
//!
//! ## Clusters
//!
//! - **Identity**: `PeerId`, `WhatAmI`
//! - **Publications**: `Sample`, `SampleKind`
//! - **Queries**: `QueryId`, `Reply`, `ReplyError`

use crate::keyexpr::KeyExpr;
use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// =============================================================================
// IDENTITY
// =============================================================================

/// Unique identifier of a session in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a random peer id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The role a session plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhatAmI {
    /// Connects to and accepts connections from other peers.
    #[default]
    Peer,
    /// Only connects out; requires a reachable endpoint.
    Client,
}

impl fmt::Display for WhatAmI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer => write!(f, "peer"),
            Self::Client => write!(f, "client"),
        }
    }
}

// =============================================================================
// PUBLICATIONS
// =============================================================================

/// Whether a sample carries a value or announces its removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleKind {
    /// A new value for the key.
    #[default]
    Put,
    /// The key's value was removed.
    Delete,
}

/// A publication as delivered to subscribers and queriers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Concrete key the value was published on.
    pub key_expr: KeyExpr,
    /// Published bytes (empty for deletes).
    pub payload: Payload,
    /// Put or delete.
    pub kind: SampleKind,
    /// Originating session, or `None` when published locally.
    pub source: Option<PeerId>,
    /// Milliseconds since the Unix epoch at publication time.
    pub timestamp_ms: u64,
}

impl Sample {
    /// Create a `Put` sample stamped with the current time.
    #[must_use]
    pub fn put(key_expr: KeyExpr, payload: Payload) -> Self {
        Self {
            key_expr,
            payload,
            kind: SampleKind::Put,
            source: None,
            timestamp_ms: now_ms(),
        }
    }

    /// Create a `Delete` sample stamped with the current time.
    #[must_use]
    pub fn delete(key_expr: KeyExpr) -> Self {
        Self {
            key_expr,
            payload: Payload::empty(),
            kind: SampleKind::Delete,
            source: None,
            timestamp_ms: now_ms(),
        }
    }

    /// Set the originating session.
    #[must_use]
    pub fn with_source(mut self, source: PeerId) -> Self {
        self.source = Some(source);
        self
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Identifier of a query, unique within the issuing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub u64);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// An error answer produced by a queryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    /// Error description supplied by the queryable.
    pub payload: Payload,
}

/// One answer to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// The answered sample, or an error answer.
    pub result: Result<Sample, ReplyError>,
    /// Session that produced the answer.
    pub replier: PeerId,
}

impl Reply {
    /// Whether this reply carries a sample.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The sample, if this is a successful reply.
    #[must_use]
    pub fn sample(&self) -> Option<&Sample> {
        self.result.as_ref().ok()
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
