//! # Dispatcher
//!
//! Registry of key-expression handlers and the fan-out that feeds them.

use crate::worker::spawn_worker;
use crate::DEFAULT_CHANNEL_CAPACITY;
use parking_lot::RwLock;
use shared_types::KeyExpr;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Callback invoked on a handler's delivery worker.
pub type Callback<M> = Arc<dyn Fn(M) + Send + Sync + 'static>;

/// Identifier of a registered handler. Ids grow monotonically, so ordering
/// by id is registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// The raw id.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatched {
    /// Handlers whose key expression matched.
    pub matched: usize,
    /// Handlers whose queue accepted the message.
    pub queued: usize,
}

/// Counters kept by a dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Messages passed to `dispatch`.
    pub dispatched: AtomicU64,
    /// Messages accepted by a handler queue.
    pub queued: AtomicU64,
    /// Messages dropped because a handler queue was full.
    pub dropped: AtomicU64,
    /// Callback invocations that panicked.
    pub panicked: AtomicU64,
}

struct HandlerEntry<M> {
    key_expr: KeyExpr,
    queue: mpsc::Sender<M>,
    active: Arc<AtomicBool>,
}

impl<M> HandlerEntry<M> {
    fn accepts(&self, key: &KeyExpr) -> bool {
        if key.is_wild() {
            self.key_expr.intersects(key)
        } else {
            self.key_expr.matches(key)
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

struct Registry<M> {
    handlers: BTreeMap<HandlerId, HandlerEntry<M>>,
    sealed: bool,
}

/// Key-expression dispatcher.
///
/// Lookups take a read lock and may run concurrently; registration,
/// removal and sealing take the write lock.
pub struct Dispatcher<M> {
    /// Handler kind, for logs ("subscriber", "queryable").
    kind: &'static str,
    registry: RwLock<Registry<M>>,
    next_id: AtomicU64,
    capacity: usize,
    stats: Arc<DispatchStats>,
}

impl<M: Send + 'static> Dispatcher<M> {
    /// Create a dispatcher with default queue capacity.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self::with_capacity(kind, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a dispatcher whose handler queues hold `capacity` messages.
    #[must_use]
    pub fn with_capacity(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            registry: RwLock::new(Registry {
                handlers: BTreeMap::new(),
                sealed: false,
            }),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Register a handler and start its delivery worker.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher has been sealed. Owners check their own
    /// lifecycle before registering; reaching a sealed dispatcher means that
    /// check was bypassed.
    pub fn register(&self, key_expr: KeyExpr, callback: Callback<M>) -> HandlerId {
        let mut registry = self.registry.write();
        assert!(
            !registry.sealed,
            "{} registered on a sealed dispatcher ({key_expr})",
            self.kind
        );

        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (queue, receiver) = mpsc::channel(self.capacity);
        let active = Arc::new(AtomicBool::new(true));

        spawn_worker(
            self.kind,
            id,
            receiver,
            active.clone(),
            callback,
            self.stats.clone(),
        );

        debug!(kind = self.kind, id = %id, key_expr = %key_expr, "Handler registered");
        registry.handlers.insert(
            id,
            HandlerEntry {
                key_expr,
                queue,
                active,
            },
        );
        id
    }

    /// Remove a handler. Its worker finishes any running callback and then
    /// stops without starting another.
    ///
    /// Returns the handler's key expression, or `None` if it was unknown.
    pub fn unregister(&self, id: HandlerId) -> Option<KeyExpr> {
        let entry = self.registry.write().handlers.remove(&id)?;
        entry.deactivate();
        debug!(kind = self.kind, id = %id, key_expr = %entry.key_expr, "Handler removed");
        Some(entry.key_expr)
    }

    /// Offer `message` to every matching handler, cloning it per handler.
    pub fn dispatch(&self, key: &KeyExpr, message: M) -> Dispatched
    where
        M: Clone,
    {
        self.dispatch_with(key, |_| message.clone())
    }

    /// Offer a message built by `make` to every matching handler.
    ///
    /// `make` runs exactly once per matching handler, in registration order,
    /// whether or not the handler's queue accepts the result.
    pub fn dispatch_with(&self, key: &KeyExpr, mut make: impl FnMut(HandlerId) -> M) -> Dispatched {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let registry = self.registry.read();
        if registry.sealed {
            return Dispatched::default();
        }

        let mut outcome = Dispatched::default();
        for (id, entry) in registry.handlers.iter().filter(|(_, e)| e.accepts(key)) {
            outcome.matched += 1;
            match entry.queue.try_send(make(*id)) {
                Ok(()) => {
                    outcome.queued += 1;
                    self.stats.queued.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        kind = self.kind,
                        id = %id,
                        key_expr = %key,
                        "Handler queue full, message dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(kind = self.kind, id = %id, "Handler worker already stopped");
                }
            }
        }

        outcome
    }

    /// Number of handlers whose key expression matches `key`.
    #[must_use]
    pub fn count_matching(&self, key: &KeyExpr) -> usize {
        self.registry
            .read()
            .handlers
            .values()
            .filter(|e| e.accepts(key))
            .count()
    }

    /// Snapshot of registered handlers in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<(HandlerId, KeyExpr)> {
        self.registry
            .read()
            .handlers
            .iter()
            .map(|(id, e)| (*id, e.key_expr.clone()))
            .collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.read().handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deactivate and remove every handler and refuse further registration.
    ///
    /// Callbacks already running are left to finish; queued messages are
    /// never delivered. Returns the number of handlers removed.
    pub fn seal(&self) -> usize {
        let mut registry = self.registry.write();
        registry.sealed = true;
        let handlers = std::mem::take(&mut registry.handlers);
        for entry in handlers.values() {
            entry.deactivate();
        }
        debug!(kind = self.kind, removed = handlers.len(), "Dispatcher sealed");
        handlers.len()
    }

    /// Whether [`seal`](Self::seal) has been called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.registry.read().sealed
    }

    /// Per-handler queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dispatch counters.
    #[must_use]
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}
