//! Per-handler delivery worker.

use crate::dispatcher::{Callback, DispatchStats, HandlerId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, trace};

/// Spawn the task that feeds `callback` from `receiver` in FIFO order.
///
/// Each invocation runs on the blocking pool and is awaited before the next
/// one starts, so a callback that blocks holds up its own queue only, never
/// the runtime workers driving timers, links and other handlers.
///
/// The task exits when the queue closes or `active` is cleared. A message
/// taken off the queue after deactivation is dropped undelivered.
pub(crate) fn spawn_worker<M: Send + 'static>(
    kind: &'static str,
    id: HandlerId,
    mut receiver: mpsc::Receiver<M>,
    active: Arc<AtomicBool>,
    callback: Callback<M>,
    stats: Arc<DispatchStats>,
) {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if !active.load(Ordering::Acquire) {
                break;
            }

            let callback = callback.clone();
            let invocation = task::spawn_blocking(move || {
                catch_unwind(AssertUnwindSafe(|| callback(message))).is_ok()
            });
            match invocation.await {
                Ok(true) => {}
                Ok(false) => {
                    stats.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(kind, id = %id, "Handler callback panicked; continuing with next message");
                }
                // Runtime shutting down.
                Err(err) if err.is_cancelled() => break,
                Err(err) => {
                    stats.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(kind, id = %id, error = %err, "Handler invocation failed");
                }
            }
        }

        // Undelivered messages are dropped here, running their destructors.
        receiver.close();
        while receiver.try_recv().is_ok() {}
        trace!(kind, id = %id, "Delivery worker stopped");
    });
}
