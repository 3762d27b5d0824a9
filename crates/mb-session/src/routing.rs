//! # Routing
//!
//! Links to other sessions and the messages exchanged over them.
//!
//! Each link records what the remote peer declared, so publications and
//! queries are only forwarded where someone is interested. Peers are fully
//! connected: a push received from a link is delivered locally and never
//! forwarded again.

use crate::errors::RoutingError;
use crate::query::{Query, RemoteResponder, ReplySink};
use crate::session::{SessionInner, SessionState};
use bytes::Bytes;
use mb_telemetry::{LINKS_ACTIVE, ROUTING_ERRORS};
use mb_transport::{LinkEvent, LinkId, ReceiveCallback, Transport};
use shared_types::{Envelope, KeyExpr, NetworkMessage, PeerId, QueryId, Sample, WhatAmI};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// One transport plus what the peer behind it declared.
pub(crate) struct Link {
    pub(crate) transport: Arc<dyn Transport>,
    /// Learned from the first envelope received
    pub(crate) peer: Option<PeerId>,
    pub(crate) mode: Option<WhatAmI>,
    subscribers: HashMap<u64, KeyExpr>,
    queryables: HashMap<u64, KeyExpr>,
    /// Queries forwarded here whose `ResponseFinal` is outstanding
    awaiting: HashSet<QueryId>,
}

impl Link {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            peer: None,
            mode: None,
            subscribers: HashMap::new(),
            queryables: HashMap::new(),
            awaiting: HashSet::new(),
        }
    }

    pub(crate) fn has_subscriber_for(&self, key_expr: &KeyExpr) -> bool {
        self.subscribers.values().any(|k| k.intersects(key_expr))
    }

    fn has_queryable_for(&self, key_expr: &KeyExpr) -> bool {
        self.queryables.values().any(|k| k.intersects(key_expr))
    }
}

/// How a forward went.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Forwarded {
    /// Links that should have received the message
    pub(crate) targets: usize,
    /// Links that accepted it
    pub(crate) sent: usize,
}

impl SessionInner {
    // =========================================================================
    // LINK LIFECYCLE
    // =========================================================================

    /// Adopt a freshly opened or accepted transport.
    pub(crate) fn attach_link(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let link_id = transport.id();
        {
            let state = self.state.read();
            if *state != SessionState::Open {
                transport.close();
                return;
            }
            self.links.write().insert(link_id, Link::new(transport.clone()));
        }
        LINKS_ACTIVE.inc();

        let weak = Arc::downgrade(self);
        let on_event: ReceiveCallback = Arc::new(move |event| {
            if let Some(session) = weak.upgrade() {
                session.on_link_event(link_id, event);
            }
        });
        if let Err(err) = transport.on_receive(on_event) {
            warn!(session = %self.id, link = %link_id, error = %err, "Link unusable");
            self.detach_link(link_id);
            return;
        }
        debug!(
            session = %self.id,
            link = %link_id,
            endpoint = %transport.endpoint(),
            "Link attached"
        );

        let mut greeting = vec![NetworkMessage::Hello {
            mode: self.settings.mode,
        }];
        greeting.extend(self.subscribers.entries().into_iter().map(|(id, key_expr)| {
            NetworkMessage::DeclareSubscriber {
                id: id.as_u64(),
                key_expr,
            }
        }));
        greeting.extend(self.queryables.entries().into_iter().map(|(id, key_expr)| {
            NetworkMessage::DeclareQueryable {
                id: id.as_u64(),
                key_expr,
            }
        }));
        for body in greeting {
            let message = body.kind();
            if let Some(frame) = self.encode(body) {
                self.send_frame(transport.as_ref(), None, frame, message);
            }
        }
    }

    /// Remove a link from the table and release it.
    fn detach_link(&self, link_id: LinkId) -> Option<PeerId> {
        let link = self.links.write().remove(&link_id)?;
        let peer = link.peer;
        self.release_link(link);
        peer
    }

    /// Close a link already removed from the table. Queries still waiting
    /// on it count it as finished.
    pub(crate) fn release_link(&self, link: Link) {
        link.transport.close();
        LINKS_ACTIVE.dec();
        for query_id in link.awaiting {
            self.queries.on_final(query_id);
        }
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    fn encode(&self, body: NetworkMessage) -> Option<Bytes> {
        let message = body.kind();
        match Envelope::new(self.id, body).encode() {
            Ok(frame) => Some(frame),
            Err(source) => {
                self.report(RoutingError::Encode { message, source });
                None
            }
        }
    }

    fn send_frame(
        &self,
        transport: &dyn Transport,
        peer: Option<PeerId>,
        frame: Bytes,
        message: &'static str,
    ) -> bool {
        match transport.send(frame) {
            Ok(()) => true,
            Err(source) => {
                self.report(RoutingError::SendFailed {
                    link: transport.id(),
                    peer,
                    message,
                    source,
                });
                false
            }
        }
    }

    /// Send one message over one link.
    pub(crate) fn send_to(&self, link: &Link, body: NetworkMessage) -> bool {
        let message = body.kind();
        self.encode(body)
            .is_some_and(|frame| self.send_frame(link.transport.as_ref(), link.peer, frame, message))
    }

    /// Send a message to every link.
    pub(crate) fn broadcast(&self, body: NetworkMessage) {
        self.forward(body, |_| true);
    }

    /// Send a message to every link accepted by `filter`.
    pub(crate) fn forward(&self, body: NetworkMessage, filter: impl Fn(&Link) -> bool) -> Forwarded {
        let message = body.kind();
        let links = self.links.read();
        let targets: Vec<&Link> = links.values().filter(|link| filter(link)).collect();
        if targets.is_empty() {
            return Forwarded::default();
        }

        let mut forwarded = Forwarded {
            targets: targets.len(),
            sent: 0,
        };
        if let Some(frame) = self.encode(body) {
            forwarded.sent = targets
                .iter()
                .filter(|link| {
                    self.send_frame(link.transport.as_ref(), link.peer, frame.clone(), message)
                })
                .count();
        }
        forwarded
    }

    /// Forward a query to links with an intersecting queryable and record
    /// that their `ResponseFinal` is awaited. Returns the number of links
    /// that accepted the request.
    pub(crate) fn forward_request(
        &self,
        query_id: QueryId,
        body: NetworkMessage,
        key_expr: &KeyExpr,
    ) -> usize {
        let message = body.kind();
        let mut links = self.links.write();
        if !links.values().any(|link| link.has_queryable_for(key_expr)) {
            return 0;
        }
        let Some(frame) = self.encode(body) else {
            return 0;
        };

        // A query resolved before this point would never be forgotten.
        let track = self.queries.is_pending(query_id);
        let mut sent = 0;
        for link in links.values_mut().filter(|link| link.has_queryable_for(key_expr)) {
            if self.send_frame(link.transport.as_ref(), link.peer, frame.clone(), message) {
                if track {
                    link.awaiting.insert(query_id);
                }
                sent += 1;
            }
        }
        sent
    }

    /// Drop a resolved query from every link's awaiting set.
    pub(crate) fn forget_query(&self, query_id: QueryId) {
        for link in self.links.write().values_mut() {
            link.awaiting.remove(&query_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn awaiting_total(&self) -> usize {
        self.links.read().values().map(|link| link.awaiting.len()).sum()
    }

    /// Count, log and publish a routing failure.
    pub(crate) fn report(&self, err: RoutingError) {
        ROUTING_ERRORS.inc();
        warn!(session = %self.id, error = %err, "Routing failure");
        // No receivers is fine.
        let _ = self.routing_errors.send(err);
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    fn on_link_event(self: &Arc<Self>, link_id: LinkId, event: LinkEvent) {
        match event {
            LinkEvent::Frame(frame) => self.on_frame(link_id, &frame),
            LinkEvent::Closed => {
                if let Some(peer) = self.detach_link(link_id) {
                    info!(session = %self.id, peer = %peer, link = %link_id, "Peer disconnected");
                }
            }
        }
    }

    /// Run `f` on the link, recording `sender` as its peer.
    fn with_link<R>(&self, link_id: LinkId, sender: PeerId, f: impl FnOnce(&mut Link) -> R) -> Option<R> {
        let mut links = self.links.write();
        let link = links.get_mut(&link_id)?;
        link.peer.get_or_insert(sender);
        Some(f(link))
    }

    fn on_frame(self: &Arc<Self>, link_id: LinkId, frame: &[u8]) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(session = %self.id, link = %link_id, error = %err, "Dropping undecodable frame");
                return;
            }
        };
        if *self.state.read() != SessionState::Open {
            return;
        }
        let sender = envelope.sender;
        if sender == self.id {
            debug!(session = %self.id, link = %link_id, "Ignoring frame from self");
            return;
        }
        trace!(session = %self.id, peer = %sender, message = envelope.body.kind(), "Frame received");

        match envelope.body {
            NetworkMessage::Hello { mode } => {
                if self
                    .with_link(link_id, sender, |link| link.mode = Some(mode))
                    .is_some()
                {
                    info!(session = %self.id, peer = %sender, mode = %mode, link = %link_id, "Peer linked");
                }
            }
            NetworkMessage::Close => {
                if self.detach_link(link_id).is_some() {
                    info!(session = %self.id, peer = %sender, link = %link_id, "Peer closed link");
                }
            }
            NetworkMessage::DeclareSubscriber { id, key_expr } => {
                self.with_link(link_id, sender, |link| link.subscribers.insert(id, key_expr));
            }
            NetworkMessage::UndeclareSubscriber { id } => {
                self.with_link(link_id, sender, |link| link.subscribers.remove(&id));
            }
            NetworkMessage::DeclareQueryable { id, key_expr } => {
                self.with_link(link_id, sender, |link| link.queryables.insert(id, key_expr));
            }
            NetworkMessage::UndeclareQueryable { id } => {
                self.with_link(link_id, sender, |link| link.queryables.remove(&id));
            }
            NetworkMessage::Push {
                key_expr,
                payload,
                kind,
                timestamp_ms,
            } => {
                self.deliver_local(&Sample {
                    key_expr,
                    payload,
                    kind,
                    source: Some(sender),
                    timestamp_ms,
                });
            }
            NetworkMessage::Request {
                query_id,
                key_expr,
                parameters,
                payload,
            } => {
                let Some(transport) = self.with_link(link_id, sender, |link| link.transport.clone())
                else {
                    return;
                };
                let responder = Arc::new(RemoteResponder::new(self.id, query_id, transport));
                let answered = self
                    .queryables
                    .dispatch_with(&key_expr, |_| {
                        responder.add_responder();
                        Query::new(
                            key_expr.clone(),
                            parameters.clone(),
                            payload.clone(),
                            self.id,
                            ReplySink::Remote(responder.clone()),
                        )
                    })
                    .matched;
                debug!(
                    session = %self.id,
                    peer = %sender,
                    query_id = %query_id,
                    queryables = answered,
                    "Remote query dispatched"
                );
                responder.finish_one();
            }
            NetworkMessage::Reply {
                query_id,
                mut reply,
            } => {
                let awaited = self
                    .with_link(link_id, sender, |link| link.awaiting.contains(&query_id))
                    .unwrap_or(false);
                if awaited {
                    if let Ok(sample) = reply.result.as_mut() {
                        sample.source = Some(sender);
                    }
                    self.queries.on_reply(query_id, reply);
                } else {
                    trace!(query_id = %query_id, peer = %sender, "Unsolicited reply dropped");
                }
            }
            NetworkMessage::ResponseFinal { query_id } => {
                let awaited = self
                    .with_link(link_id, sender, |link| link.awaiting.remove(&query_id))
                    .unwrap_or(false);
                if awaited {
                    self.queries.on_final(query_id);
                }
            }
        }
    }
}
