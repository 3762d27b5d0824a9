//! # Incoming Queries
//!
//! The [`Query`] a queryable callback receives. A query may be answered any
//! number of times; it is finalized exactly once, by [`Query::finish`] or by
//! drop, whichever comes first.

use crate::errors::{query_label, QueryError, RoutingError, SessionError};
use mb_query::QueryEngine;
use mb_telemetry::ROUTING_ERRORS;
use mb_transport::Transport;
use shared_types::{
    Envelope, KeyExpr, NetworkMessage, Payload, PeerId, QueryId, Reply, ReplyError, Sample,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Answers going back to a peer that sent a `Request` over one link.
///
/// Shared by every local queryable addressed by that request. It starts
/// with one outstanding slot held by the dispatcher itself, so
/// `ResponseFinal` cannot be sent before dispatch is over; the last slot
/// released sends it.
pub(crate) struct RemoteResponder {
    local_id: PeerId,
    query_id: QueryId,
    link: Arc<dyn Transport>,
    remaining: AtomicUsize,
}

impl RemoteResponder {
    pub(crate) fn new(local_id: PeerId, query_id: QueryId, link: Arc<dyn Transport>) -> Self {
        Self {
            local_id,
            query_id,
            link,
            remaining: AtomicUsize::new(1),
        }
    }

    /// One more query object will report to this responder.
    pub(crate) fn add_responder(&self) {
        self.remaining.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn send(&self, body: NetworkMessage) {
        let message = body.kind();
        let result = Envelope::new(self.local_id, body)
            .encode()
            .map_err(|source| RoutingError::Encode { message, source })
            .and_then(|frame| {
                self.link
                    .send(frame)
                    .map_err(|source| RoutingError::SendFailed {
                        link: self.link.id(),
                        peer: None,
                        message,
                        source,
                    })
            });

        if let Err(err) = result {
            ROUTING_ERRORS.inc();
            warn!(query_id = %self.query_id, error = %err, "Failed to answer remote query");
        }
    }

    /// Release one slot.
    pub(crate) fn finish_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.send(NetworkMessage::ResponseFinal {
                query_id: self.query_id,
            });
        }
    }
}

/// Where a query's answers go.
pub(crate) enum ReplySink {
    /// A `get` issued by this session.
    Local { engine: QueryEngine, id: QueryId },
    /// A `Request` received from a peer.
    Remote(Arc<RemoteResponder>),
}

/// A query delivered to a queryable callback.
pub struct Query {
    key_expr: KeyExpr,
    parameters: String,
    payload: Option<Payload>,
    replier: PeerId,
    sink: ReplySink,
    finished: AtomicBool,
}

impl Query {
    pub(crate) fn new(
        key_expr: KeyExpr,
        parameters: String,
        payload: Option<Payload>,
        replier: PeerId,
        sink: ReplySink,
    ) -> Self {
        Self {
            key_expr,
            parameters,
            payload,
            replier,
            sink,
            finished: AtomicBool::new(false),
        }
    }

    /// Key expression being queried; may be wild.
    #[must_use]
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// Free-form parameters supplied by the querier.
    #[must_use]
    pub fn parameters(&self) -> &str {
        &self.parameters
    }

    /// Optional payload supplied by the querier.
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Answer with a value on `key_expr`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidExpression`] if the key does not parse
    /// - [`QueryError::KeyMismatch`] if it does not intersect the query key
    /// - [`QueryError::Finalized`] after [`finish`](Self::finish)
    pub fn reply<K>(&self, key_expr: K, payload: impl Into<Payload>) -> Result<(), SessionError>
    where
        K: TryInto<KeyExpr>,
        SessionError: From<K::Error>,
    {
        let key_expr = key_expr.try_into()?;
        if !key_expr.intersects(&self.key_expr) {
            return Err(QueryError::KeyMismatch {
                reply: key_expr,
                query: self.key_expr.clone(),
            }
            .into());
        }
        self.send_reply(Ok(Sample::put(key_expr, payload.into())))
    }

    /// Answer with an error.
    ///
    /// # Errors
    ///
    /// [`QueryError::Finalized`] after [`finish`](Self::finish).
    pub fn reply_err(&self, payload: impl Into<Payload>) -> Result<(), SessionError> {
        self.send_reply(Err(ReplyError {
            payload: payload.into(),
        }))
    }

    /// Declare that no more answers follow.
    pub fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.sink {
            ReplySink::Local { engine, id } => {
                engine.on_final(*id);
            }
            ReplySink::Remote(responder) => responder.finish_one(),
        }
    }

    fn send_reply(&self, result: Result<Sample, ReplyError>) -> Result<(), SessionError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(QueryError::Finalized {
                query: query_label(self.local_id()),
            }
            .into());
        }

        let reply = Reply {
            result,
            replier: self.replier,
        };
        match &self.sink {
            ReplySink::Local { engine, id } => {
                if !engine.on_reply(*id, reply) {
                    debug!(query_id = %id, "Reply after query resolved, dropped");
                }
            }
            ReplySink::Remote(responder) => responder.send(NetworkMessage::Reply {
                query_id: responder.query_id,
                reply,
            }),
        }
        Ok(())
    }

    fn local_id(&self) -> Option<QueryId> {
        match &self.sink {
            ReplySink::Local { id, .. } => Some(*id),
            ReplySink::Remote(_) => None,
        }
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key_expr", &self.key_expr)
            .field("parameters", &self.parameters)
            .field("remote", &matches!(self.sink, ReplySink::Remote(_)))
            .finish()
    }
}
