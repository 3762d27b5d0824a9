//! # Network Envelope
//!
//! The wrapper for every frame exchanged between two sessions.
//!
//! ## Properties
//!
//! - **Versioning**: every envelope carries `version`; decoders reject
//!   anything but [`PROTOCOL_VERSION`].
//! - **Sender Authority**: `sender` is the only source of the remote
//!   session's identity; message bodies never repeat it.
//! - **Opaque to Transports**: [`Envelope::encode`] produces the bytes a
//!   transport carries; transports never look inside.

use crate::entities::{PeerId, QueryId, Reply, SampleKind, WhatAmI};
use crate::errors::EnvelopeError;
use crate::keyexpr::KeyExpr;
use crate::payload::Payload;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Current protocol version for network envelopes.
pub const PROTOCOL_VERSION: u16 = 1;

/// Messages exchanged between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMessage {
    // =========================================================================
    // LINK LIFECYCLE
    // =========================================================================
    /// First message on a new link; announces the sender's role.
    Hello { mode: WhatAmI },

    /// The sender is closing; the link will carry nothing further.
    Close,

    // =========================================================================
    // INTEREST DECLARATIONS
    // =========================================================================
    /// The sender has a subscriber on `key_expr`.
    DeclareSubscriber { id: u64, key_expr: KeyExpr },

    /// The sender's subscriber `id` is gone.
    UndeclareSubscriber { id: u64 },

    /// The sender has a queryable on `key_expr`.
    DeclareQueryable { id: u64, key_expr: KeyExpr },

    /// The sender's queryable `id` is gone.
    UndeclareQueryable { id: u64 },

    // =========================================================================
    // DATA
    // =========================================================================
    /// A publication.
    Push {
        key_expr: KeyExpr,
        payload: Payload,
        kind: SampleKind,
        timestamp_ms: u64,
    },

    /// A query issued by the sender.
    Request {
        query_id: QueryId,
        key_expr: KeyExpr,
        parameters: String,
        payload: Option<Payload>,
    },

    /// One answer to the receiver's query `query_id`.
    Reply { query_id: QueryId, reply: Reply },

    /// The sender will produce no more answers to `query_id`.
    ResponseFinal { query_id: QueryId },
}

impl NetworkMessage {
    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Close => "close",
            Self::DeclareSubscriber { .. } => "declare_subscriber",
            Self::UndeclareSubscriber { .. } => "undeclare_subscriber",
            Self::DeclareQueryable { .. } => "declare_queryable",
            Self::UndeclareQueryable { .. } => "undeclare_queryable",
            Self::Push { .. } => "push",
            Self::Request { .. } => "request",
            Self::Reply { .. } => "reply",
            Self::ResponseFinal { .. } => "response_final",
        }
    }
}

/// A versioned, sender-stamped network message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for forward compatibility.
    pub version: u16,
    /// The session that produced this envelope.
    pub sender: PeerId,
    /// The message itself.
    pub body: NetworkMessage,
}

impl Envelope {
    /// Wrap a message from `sender` at the current protocol version.
    #[must_use]
    pub fn new(sender: PeerId, body: NetworkMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sender,
            body,
        }
    }

    /// Serialize into a transport frame.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Parse a transport frame.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] for malformed bytes and
    /// [`EnvelopeError::UnsupportedVersion`] for a foreign protocol version.
    pub fn decode(frame: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            bincode::deserialize(frame).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                received: envelope.version,
                supported: PROTOCOL_VERSION,
            });
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Sample;

    #[test]
    fn test_push_frame_decodes() {
        let sender = PeerId::random();
        let envelope = Envelope::new(
            sender,
            NetworkMessage::Push {
                key_expr: KeyExpr::new("robot/arm").unwrap(),
                payload: Payload::from("42"),
                kind: SampleKind::Put,
                timestamp_ms: 7,
            },
        );

        let frame = envelope.encode().unwrap();
        let decoded = Envelope::decode(&frame).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.body.kind(), "push");
    }

    #[test]
    fn test_reply_frame_keeps_error_answers() {
        let replier = PeerId::random();
        let envelope = Envelope::new(
            replier,
            NetworkMessage::Reply {
                query_id: QueryId(3),
                reply: Reply {
                    result: Err(crate::entities::ReplyError {
                        payload: Payload::from("not found"),
                    }),
                    replier,
                },
            },
        );
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        let NetworkMessage::Reply { reply, .. } = decoded.body else {
            panic!("expected reply");
        };
        assert!(reply.result.is_err());

        let ok = Reply {
            result: Ok(Sample::put(KeyExpr::new("a").unwrap(), Payload::empty())),
            replier,
        };
        assert!(ok.is_ok());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Envelope::decode(&[0xde, 0xad]),
            Err(EnvelopeError::Decode(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut envelope = Envelope::new(PeerId::random(), NetworkMessage::Close);
        envelope.version = 99;
        let frame = envelope.encode().unwrap();
        assert_eq!(
            Envelope::decode(&frame),
            Err(EnvelopeError::UnsupportedVersion {
                received: 99,
                supported: PROTOCOL_VERSION,
            })
        );
    }
}
