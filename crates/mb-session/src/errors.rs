//! Error types for sessions
//!
//! `TimedOut` and `Cancelled` are query statuses, not errors: they arrive in
//! the normal outcome of a `get`.

use mb_transport::{LinkId, TransportError};
use shared_types::{EnvelopeError, KeyExpr, KeyExprError, PeerId, QueryId};
use std::convert::Infallible;
use thiserror::Error;

/// All errors returned by the session API
#[derive(Debug, Error)]
pub enum SessionError {
    /// The key expression string is malformed
    #[error("Invalid key expression: {0}")]
    InvalidExpression(#[from] KeyExprError),

    /// No usable link could be established at open
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A configured listen endpoint could not be bound
    #[error("Failed to listen on '{endpoint}': {source}")]
    Listen {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// The session is closing or closed
    #[error("Session is closed")]
    SessionClosed,

    /// Remote targets existed and none accepted the message
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// The configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A reply was rejected
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<Infallible> for SessionError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// Failures forwarding a message to linked peers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// Every link that should have received the message refused it
    #[error("No link accepted {message} on '{key_expr}' ({targets} target(s))")]
    Unrouted {
        key_expr: KeyExpr,
        message: &'static str,
        targets: usize,
    },

    /// One link refused a frame
    #[error("Failed to send {message} over {link} (peer {peer:?}): {source}")]
    SendFailed {
        link: LinkId,
        peer: Option<PeerId>,
        message: &'static str,
        #[source]
        source: TransportError,
    },

    /// The message could not be encoded
    #[error("Failed to encode {message}: {source}")]
    Encode {
        message: &'static str,
        #[source]
        source: EnvelopeError,
    },
}

/// Rejected replies
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// `finish` was already called on this query
    #[error("Query {query} is already finalized")]
    Finalized { query: String },

    /// The reply key cannot answer the query
    #[error("Reply key '{reply}' does not intersect query key '{query}'")]
    KeyMismatch { reply: KeyExpr, query: KeyExpr },
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The text is not valid JSON
    #[error("Invalid JSON: {0}")]
    Parse(String),

    /// The configuration root must be a JSON object
    #[error("Configuration root must be a JSON object")]
    NotAnObject,

    /// A dotted path is empty, has an empty component, or runs through a
    /// non-object value
    #[error("Invalid configuration path '{0}'")]
    InvalidPath(String),

    /// A recognized key holds a value of the wrong type or range
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Label for a remote query in error messages.
pub(crate) fn query_label(id: Option<QueryId>) -> String {
    id.map_or_else(|| "remote".to_string(), |id| id.to_string())
}
