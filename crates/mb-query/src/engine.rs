//! # Query Engine
//!
//! Maps query ids to in-flight queries and resolves them.
//!
//! Flow:
//! 1. The session calls [`QueryEngine::register`] and gets a [`PendingQuery`]
//! 2. The session dispatches the query and reports the addressed count via
//!    [`QueryEngine::set_expected`]
//! 3. Replies and finals arrive through [`QueryEngine::on_reply`] and
//!    [`QueryEngine::on_final`]
//! 4. A deadline task fires [`QueryEvent::Deadline`] independently of any
//!    arrival
//! 5. The first terminal transition removes the query and sends its outcome
//!    to the caller's handle

use crate::state::{CancelPolicy, PendingQueryState, QueryEvent, QueryOutcome, QueryStatus};
use dashmap::DashMap;
use mb_telemetry::QUERIES_RESOLVED;
use shared_types::{KeyExpr, QueryId, Reply};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// Called with the id of every query as it resolves, before its outcome is
/// sent to the caller.
pub type ResolveHook = Arc<dyn Fn(QueryId) + Send + Sync + 'static>;

/// One in-flight query.
struct Entry {
    key_expr: KeyExpr,
    state: PendingQueryState,
    policy: CancelPolicy,
    /// Where the outcome goes
    sender: oneshot::Sender<QueryOutcome>,
    created_at: Instant,
}

/// Statistics for the query engine
#[derive(Debug, Default)]
pub struct QueryStats {
    /// Total queries registered
    pub total_registered: AtomicU64,
    /// Total queries completed
    pub total_completed: AtomicU64,
    /// Total queries timed out
    pub total_timeouts: AtomicU64,
    /// Total queries cancelled
    pub total_cancelled: AtomicU64,
    /// Events for queries no longer pending
    pub total_late_events: AtomicU64,
}

struct Inner {
    pending: DashMap<QueryId, Entry>,
    next_id: AtomicU64,
    stats: QueryStats,
    on_resolve: OnceLock<ResolveHook>,
}

impl Inner {
    fn apply(&self, id: QueryId, event: QueryEvent) -> bool {
        let outcome = match self.pending.get_mut(&id) {
            Some(mut guard) => {
                let entry = &mut *guard;
                entry.state.apply(event, entry.policy)
            }
            None => {
                self.stats.total_late_events.fetch_add(1, Ordering::Relaxed);
                trace!(query_id = %id, "Event for unknown or resolved query ignored");
                return false;
            }
        };

        if let Some(outcome) = outcome {
            self.resolve(id, outcome);
        }
        true
    }

    fn resolve(&self, id: QueryId, outcome: QueryOutcome) {
        let Some((_, entry)) = self.pending.remove(&id) else {
            return;
        };

        let counter = match outcome.status {
            QueryStatus::Completed => &self.stats.total_completed,
            QueryStatus::TimedOut => &self.stats.total_timeouts,
            _ => &self.stats.total_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        QUERIES_RESOLVED
            .with_label_values(&[outcome.status.as_str()])
            .inc();

        debug!(
            query_id = %id,
            key_expr = %entry.key_expr,
            status = %outcome.status,
            replies = outcome.replies.len(),
            elapsed_ms = entry.created_at.elapsed().as_millis(),
            "Query resolved"
        );

        if let Some(hook) = self.on_resolve.get() {
            hook(id);
        }
        // The caller may have dropped its handle; the outcome is then unused.
        let _ = entry.sender.send(outcome);
    }
}

/// Registry of in-flight queries. Clones share state.
#[derive(Clone)]
pub struct QueryEngine {
    inner: Arc<Inner>,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                stats: QueryStats::default(),
                on_resolve: OnceLock::new(),
            }),
        }
    }

    /// Install the hook run for every resolved query. Only the first
    /// installation takes effect; returns `false` if one was already set.
    ///
    /// The hook runs on whichever thread resolved the query and must not
    /// call back into the engine.
    pub fn set_resolve_hook(&self, hook: ResolveHook) -> bool {
        self.inner.on_resolve.set(hook).is_ok()
    }

    /// Register a query in `Pending` and start its deadline timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        key_expr: KeyExpr,
        timeout: Duration,
        policy: CancelPolicy,
    ) -> PendingQuery {
        let id = QueryId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = oneshot::channel();
        let created_at = Instant::now();

        debug!(
            query_id = %id,
            key_expr = %key_expr,
            timeout_ms = timeout.as_millis(),
            "Registered pending query"
        );
        self.inner.pending.insert(
            id,
            Entry {
                key_expr: key_expr.clone(),
                state: PendingQueryState::default(),
                policy,
                sender,
                created_at,
            },
        );
        self.inner
            .stats
            .total_registered
            .fetch_add(1, Ordering::Relaxed);

        let deadline = created_at + timeout;
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.apply(id, QueryEvent::Deadline);
            }
        });

        PendingQuery {
            id,
            key_expr,
            engine: Arc::downgrade(&self.inner),
            receiver: Some(receiver),
            outcome: None,
        }
    }

    /// Apply `event` to query `id`.
    ///
    /// Returns `false` if the query is unknown or already resolved.
    pub fn apply(&self, id: QueryId, event: QueryEvent) -> bool {
        self.inner.apply(id, event)
    }

    /// Record a reply.
    pub fn on_reply(&self, id: QueryId, reply: Reply) -> bool {
        self.apply(id, QueryEvent::Reply(reply))
    }

    /// Record one final response.
    pub fn on_final(&self, id: QueryId) -> bool {
        self.apply(id, QueryEvent::Final)
    }

    /// Set how many finals complete the query. Zero leaves it to the
    /// deadline.
    pub fn set_expected(&self, id: QueryId, count: usize) -> bool {
        self.apply(id, QueryEvent::Expect(count))
    }

    /// Cancel one query.
    pub fn cancel(&self, id: QueryId) -> bool {
        self.apply(id, QueryEvent::Cancel)
    }

    /// Cancel every pending query. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<QueryId> = self.inner.pending.iter().map(|e| *e.key()).collect();
        let cancelled = ids.into_iter().filter(|id| self.cancel(*id)).count();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled all pending queries");
        }
        cancelled
    }

    /// Whether `id` is still pending.
    #[must_use]
    pub fn is_pending(&self, id: QueryId) -> bool {
        self.inner.pending.contains_key(&id)
    }

    /// Number of pending queries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> &QueryStats {
        &self.inner.stats
    }
}

/// Caller's handle to one query.
///
/// The outcome can be polled with [`try_outcome`](Self::try_outcome),
/// awaited with [`wait`](Self::wait) or handed to a continuation with
/// [`on_complete`](Self::on_complete). Dropping the handle does not cancel
/// the query.
pub struct PendingQuery {
    id: QueryId,
    key_expr: KeyExpr,
    engine: Weak<Inner>,
    receiver: Option<oneshot::Receiver<QueryOutcome>>,
    outcome: Option<QueryOutcome>,
}

impl PendingQuery {
    /// Query id.
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Key expression queried.
    #[must_use]
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// The outcome if the query is terminal, without waiting.
    pub fn try_outcome(&mut self) -> Option<&QueryOutcome> {
        if self.outcome.is_none() {
            if let Some(receiver) = self.receiver.as_mut() {
                match receiver.try_recv() {
                    Ok(outcome) => {
                        self.outcome = Some(outcome);
                        self.receiver = None;
                    }
                    Err(oneshot::error::TryRecvError::Empty) => {}
                    Err(oneshot::error::TryRecvError::Closed) => {
                        self.outcome = Some(QueryOutcome::empty(QueryStatus::Cancelled));
                        self.receiver = None;
                    }
                }
            }
        }
        self.outcome.as_ref()
    }

    /// Wait for the terminal outcome.
    ///
    /// If the engine is dropped first, the query reports `Cancelled`.
    pub async fn wait(mut self) -> QueryOutcome {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        match self.receiver.take() {
            Some(receiver) => receiver
                .await
                .unwrap_or_else(|_| QueryOutcome::empty(QueryStatus::Cancelled)),
            None => QueryOutcome::empty(QueryStatus::Cancelled),
        }
    }

    /// Run `callback` with the outcome once the query is terminal.
    ///
    /// The callback runs on a spawned task, never on the caller's thread.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(QueryOutcome) + Send + 'static,
    {
        tokio::spawn(async move {
            callback(self.wait().await);
        });
    }

    /// Cancel the query. Returns `false` if it was already terminal.
    pub fn cancel(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|inner| inner.apply(self.id, QueryEvent::Cancel))
    }
}

impl std::fmt::Debug for PendingQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQuery")
            .field("id", &self.id)
            .field("key_expr", &self.key_expr)
            .field("resolved", &self.outcome.is_some())
            .finish()
    }
}
