//! # Session
//!
//! Owns a peer identity, the subscriber and queryable dispatchers, the query
//! engine and the links to other sessions.
//!
//! ## Lifecycle
//!
//! `Open → Closing → Closed`, monotonic. Declarations and queries check the
//! state under a read lock and `close` flips it under the write lock, so no
//! handler is ever registered after closing began.

use crate::config::{Config, SessionConfig};
use crate::errors::{RoutingError, SessionError};
use crate::handles::{Queryable, Subscriber};
use crate::query::{Query, ReplySink};
use crate::routing::Link;
use mb_query::{CancelPolicy, PendingQuery, QueryEngine, QueryStats};
use mb_telemetry::{QUERIES_ISSUED, SAMPLES_DELIVERED, SAMPLES_DROPPED, SAMPLES_PUBLISHED};
use mb_transport::{AcceptCallback, Connector, LinkId, Listener, MemoryConnector};
use parking_lot::{Mutex, RwLock};
use shared_bus::{Dispatcher, HandlerId};
use shared_types::{KeyExpr, NetworkMessage, Payload, PeerId, Sample, WhatAmI};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the routing error side channel.
const ROUTING_ERROR_CAPACITY: usize = 64;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Accepting declarations, publications and queries.
    Open,
    /// `close` is tearing things down.
    Closing,
    /// Fully closed.
    Closed,
}

/// Options for [`Session::get_with`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Free-form parameters passed to queryables
    pub parameters: String,
    /// Optional payload passed to queryables
    pub payload: Option<Payload>,
    /// Overrides `queries.default_timeout_ms`
    pub timeout: Option<Duration>,
    /// Overrides `queries.cancel_policy`
    pub cancel_policy: Option<CancelPolicy>,
}

impl GetOptions {
    /// Set the parameters.
    #[must_use]
    pub fn parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = parameters.into();
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the cancel policy.
    #[must_use]
    pub fn cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel_policy = Some(policy);
        self
    }
}

pub(crate) struct SessionInner {
    pub(crate) id: PeerId,
    pub(crate) settings: SessionConfig,
    raw_config: Config,
    pub(crate) state: RwLock<SessionState>,
    pub(crate) subscribers: Dispatcher<Sample>,
    pub(crate) queryables: Dispatcher<Query>,
    pub(crate) queries: QueryEngine,
    pub(crate) links: RwLock<BTreeMap<LinkId, Link>>,
    listeners: Mutex<Vec<Box<dyn Listener>>>,
    pub(crate) routing_errors: broadcast::Sender<RoutingError>,
}

impl SessionInner {
    fn is_open(&self) -> bool {
        *self.state.read() == SessionState::Open
    }

    pub(crate) fn undeclare_subscriber(&self, id: HandlerId) {
        if self.subscribers.unregister(id).is_some() && self.is_open() {
            self.broadcast(NetworkMessage::UndeclareSubscriber { id: id.as_u64() });
        }
    }

    pub(crate) fn undeclare_queryable(&self, id: HandlerId) {
        if self.queryables.unregister(id).is_some() && self.is_open() {
            self.broadcast(NetworkMessage::UndeclareQueryable { id: id.as_u64() });
        }
    }

    /// Deliver a sample to matching local subscribers.
    pub(crate) fn deliver_local(&self, sample: &Sample) {
        let outcome = self.subscribers.dispatch(&sample.key_expr, sample.clone());
        SAMPLES_DELIVERED.inc_by(outcome.queued as f64);
        SAMPLES_DROPPED.inc_by((outcome.matched - outcome.queued) as f64);
    }

    /// Local delivery, then forwarding to peers with an intersecting
    /// subscriber.
    fn route_sample(&self, sample: Sample) -> Result<(), SessionError> {
        SAMPLES_PUBLISHED.inc();
        self.deliver_local(&sample);

        let key_expr = sample.key_expr.clone();
        let push = NetworkMessage::Push {
            key_expr: sample.key_expr,
            payload: sample.payload,
            kind: sample.kind,
            timestamp_ms: sample.timestamp_ms,
        };
        let forward = self.forward(push, |link| link.has_subscriber_for(&key_expr));

        if forward.targets > 0 && forward.sent == 0 {
            return Err(RoutingError::Unrouted {
                key_expr,
                message: "push",
                targets: forward.targets,
            }
            .into());
        }
        Ok(())
    }

    /// Release everything. Idempotent.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.write();
            if *state != SessionState::Open {
                return;
            }
            *state = SessionState::Closing;
        }
        info!(session = %self.id, "Closing session");

        let subscribers = self.subscribers.seal();
        let queryables = self.queryables.seal();
        let cancelled = self.queries.cancel_all();

        for listener in self.listeners.lock().drain(..) {
            listener.close();
        }

        let links = std::mem::take(&mut *self.links.write());
        let closed_links = links.len();
        for (_, link) in links {
            self.send_to(&link, NetworkMessage::Close);
            self.release_link(link);
        }

        *self.state.write() = SessionState::Closed;
        info!(
            session = %self.id,
            subscribers,
            queryables,
            cancelled,
            links = closed_links,
            "Session closed"
        );
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// A Meshbus session. Clones share the same session; it closes when
/// [`close`](Self::close) is called or the last clone drops.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open a session over the process-wide memory connector.
    ///
    /// # Errors
    ///
    /// See [`open_with_connector`](Self::open_with_connector).
    pub async fn open(config: Config) -> Result<Self, SessionError> {
        Self::open_with_connector(config, Arc::new(MemoryConnector::global())).await
    }

    /// Open a session, binding listeners and connecting through `connector`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Config`] for an unusable configuration
    /// - [`SessionError::Listen`] if a listen endpoint cannot be bound
    /// - [`SessionError::Connection`] if connect endpoints were configured
    ///   and none was reachable, or a client reached nothing, and scouting
    ///   is disabled
    pub async fn open_with_connector(
        config: Config,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SessionError> {
        let settings = config.session_config()?;
        let id = settings.id.unwrap_or_else(PeerId::random);
        let (routing_errors, _) = broadcast::channel(ROUTING_ERROR_CAPACITY);

        let inner = Arc::new(SessionInner {
            id,
            subscribers: Dispatcher::with_capacity("subscriber", settings.channel_capacity),
            queryables: Dispatcher::with_capacity("queryable", settings.channel_capacity),
            settings,
            raw_config: config,
            state: RwLock::new(SessionState::Open),
            queries: QueryEngine::new(),
            links: RwLock::new(BTreeMap::new()),
            listeners: Mutex::new(Vec::new()),
            routing_errors,
        });
        let weak = Arc::downgrade(&inner);
        inner.queries.set_resolve_hook(Arc::new(move |query_id| {
            if let Some(session) = weak.upgrade() {
                session.forget_query(query_id);
            }
        }));
        let settings = &inner.settings;

        if settings.mode == WhatAmI::Client && !settings.listen_endpoints.is_empty() {
            warn!(session = %id, "Client sessions do not listen; listen endpoints ignored");
        } else {
            for endpoint in &settings.listen_endpoints {
                let weak = Arc::downgrade(&inner);
                let on_accept: AcceptCallback = Arc::new(move |transport| match weak.upgrade() {
                    Some(session) => session.attach_link(transport),
                    None => transport.close(),
                });
                let listener = connector.listen(endpoint, on_accept).await.map_err(|source| {
                    SessionError::Listen {
                        endpoint: endpoint.clone(),
                        source,
                    }
                })?;
                debug!(session = %id, endpoint = %endpoint, "Listening");
                inner.listeners.lock().push(listener);
            }
        }

        let mut connected = 0usize;
        for endpoint in &settings.connect_endpoints {
            match connector.connect(endpoint).await {
                Ok(transport) => {
                    inner.attach_link(transport);
                    connected += 1;
                }
                Err(err) => {
                    warn!(session = %id, endpoint = %endpoint, error = %err, "Connect failed");
                }
            }
        }

        if connected == 0 && !settings.scouting_multicast {
            if !settings.connect_endpoints.is_empty() {
                return Err(SessionError::Connection(format!(
                    "none of {} connect endpoint(s) reachable",
                    settings.connect_endpoints.len()
                )));
            }
            if settings.mode == WhatAmI::Client {
                return Err(SessionError::Connection(
                    "client mode requires a reachable connect endpoint".to_string(),
                ));
            }
        }

        info!(
            session = %id,
            mode = %settings.mode,
            links = connected,
            listeners = inner.listeners.lock().len(),
            "Session opened"
        );
        Ok(Self { inner })
    }

    /// This session's peer id.
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Configuration the session was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.raw_config
    }

    /// Resolved settings.
    #[must_use]
    pub fn settings(&self) -> &SessionConfig {
        &self.inner.settings
    }

    /// Peers currently linked, sorted.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .inner
            .links
            .read()
            .values()
            .filter_map(|link| link.peer)
            .collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }

    /// Subscribe to routing failures that `publish` does not report.
    #[must_use]
    pub fn routing_errors(&self) -> broadcast::Receiver<RoutingError> {
        self.inner.routing_errors.subscribe()
    }

    /// Query engine statistics.
    #[must_use]
    pub fn query_stats(&self) -> &QueryStats {
        self.inner.queries.stats()
    }

    /// Subscribe `callback` to publications matching `key_expr`.
    ///
    /// The callback runs on the subscriber's own delivery worker.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidExpression`] or [`SessionError::SessionClosed`].
    pub fn declare_subscriber<K, F>(&self, key_expr: K, callback: F) -> Result<Subscriber, SessionError>
    where
        K: TryInto<KeyExpr>,
        SessionError: From<K::Error>,
        F: Fn(Sample) + Send + Sync + 'static,
    {
        let key_expr = key_expr.try_into()?;
        let id = {
            let state = self.inner.state.read();
            if *state != SessionState::Open {
                return Err(SessionError::SessionClosed);
            }
            self.inner
                .subscribers
                .register(key_expr.clone(), Arc::new(callback))
        };

        self.inner.broadcast(NetworkMessage::DeclareSubscriber {
            id: id.as_u64(),
            key_expr: key_expr.clone(),
        });
        Ok(Subscriber {
            id,
            key_expr,
            session: Arc::downgrade(&self.inner),
        })
    }

    /// Answer queries matching `key_expr` with `callback`.
    ///
    /// The query is finalized when the callback drops it or calls
    /// [`Query::finish`].
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidExpression`] or [`SessionError::SessionClosed`].
    pub fn declare_queryable<K, F>(&self, key_expr: K, callback: F) -> Result<Queryable, SessionError>
    where
        K: TryInto<KeyExpr>,
        SessionError: From<K::Error>,
        F: Fn(Query) + Send + Sync + 'static,
    {
        let key_expr = key_expr.try_into()?;
        let id = {
            let state = self.inner.state.read();
            if *state != SessionState::Open {
                return Err(SessionError::SessionClosed);
            }
            self.inner
                .queryables
                .register(key_expr.clone(), Arc::new(callback))
        };

        self.inner.broadcast(NetworkMessage::DeclareQueryable {
            id: id.as_u64(),
            key_expr: key_expr.clone(),
        });
        Ok(Queryable {
            id,
            key_expr,
            session: Arc::downgrade(&self.inner),
        })
    }

    /// Publish `payload` on `key_expr`.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidExpression`], [`SessionError::SessionClosed`],
    /// or [`SessionError::Routing`] when linked peers wanted the sample and
    /// none accepted it. Local delivery happens regardless.
    pub fn publish<K>(&self, key_expr: K, payload: impl Into<Payload>) -> Result<(), SessionError>
    where
        K: TryInto<KeyExpr>,
        SessionError: From<K::Error>,
    {
        let key_expr = key_expr.try_into()?;
        let _state = self.open_guard()?;
        self.inner.route_sample(Sample::put(key_expr, payload.into()))
    }

    /// Publish a deletion of `key_expr`.
    ///
    /// # Errors
    ///
    /// As [`publish`](Self::publish).
    pub fn delete<K>(&self, key_expr: K) -> Result<(), SessionError>
    where
        K: TryInto<KeyExpr>,
        SessionError: From<K::Error>,
    {
        let key_expr = key_expr.try_into()?;
        let _state = self.open_guard()?;
        self.inner.route_sample(Sample::delete(key_expr))
    }

    /// Query `key_expr`, waiting at most `timeout` for answers.
    ///
    /// # Errors
    ///
    /// As [`get_with`](Self::get_with).
    pub fn get<K>(&self, key_expr: K, timeout: Duration) -> Result<PendingQuery, SessionError>
    where
        K: TryInto<KeyExpr>,
        SessionError: From<K::Error>,
    {
        self.get_with(key_expr, GetOptions::default().timeout(timeout))
    }

    /// Query `key_expr`. Returns immediately; the handle resolves when every
    /// addressed queryable finished, at the deadline, or on cancel.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidExpression`] or [`SessionError::SessionClosed`].
    pub fn get_with<K>(&self, key_expr: K, options: GetOptions) -> Result<PendingQuery, SessionError>
    where
        K: TryInto<KeyExpr>,
        SessionError: From<K::Error>,
    {
        let key_expr = key_expr.try_into()?;
        let _state = self.open_guard()?;
        let inner = &self.inner;

        let pending = inner.queries.register(
            key_expr.clone(),
            options.timeout.unwrap_or(inner.settings.query_timeout),
            options.cancel_policy.unwrap_or(inner.settings.cancel_policy),
        );
        let query_id = pending.id();
        QUERIES_ISSUED.inc();

        let local = inner
            .queryables
            .dispatch_with(&key_expr, |_| {
                Query::new(
                    key_expr.clone(),
                    options.parameters.clone(),
                    options.payload.clone(),
                    inner.id,
                    ReplySink::Local {
                        engine: inner.queries.clone(),
                        id: query_id,
                    },
                )
            })
            .matched;

        let remote = inner.forward_request(
            query_id,
            NetworkMessage::Request {
                query_id,
                key_expr: key_expr.clone(),
                parameters: options.parameters,
                payload: options.payload,
            },
            &key_expr,
        );

        debug!(
            query_id = %query_id,
            key_expr = %key_expr,
            local,
            remote,
            "Query dispatched"
        );
        inner.queries.set_expected(query_id, local + remote);
        Ok(pending)
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Read guard proving the session is open for the duration of a call.
    fn open_guard(&self) -> Result<parking_lot::RwLockReadGuard<'_, SessionState>, SessionError> {
        let state = self.inner.state.read();
        if *state == SessionState::Open {
            Ok(state)
        } else {
            Err(SessionError::SessionClosed)
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
