//! # Shared Bus - Key-Expression Dispatch Engine
//!
//! Routes messages to every handler whose key expression matches, with one
//! delivery worker per handler.
//!
//! ## Dispatch Rules
//!
//! - The set of matching handlers is computed once per message, so a handler
//!   is offered a message at most once no matter how many ways its pattern
//!   matches the key.
//! - Handlers are visited in registration order.
//! - Each handler owns a bounded queue and a worker task. Callbacks run on
//!   the blocking pool, so a slow, blocking or panicking callback only ever
//!   stalls its own queue.
//! - When a handler's queue is full the message is dropped for that handler
//!   alone and counted.
//!
//! ```text
//! ┌──────────┐  dispatch(key)   ┌────────────┐   queue   ┌──────────┐
//! │  caller  │ ───────────────▶ │ Dispatcher │ ────────▶ │ worker A │──▶ callback A
//! └──────────┘                  │ (RwLock)   │ ────────▶ │ worker B │──▶ callback B
//!                               └────────────┘           └──────────┘
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod dispatcher;
mod worker;

pub use dispatcher::{Callback, DispatchStats, Dispatched, Dispatcher, HandlerId};

/// Maximum messages to buffer per handler before dropping.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
