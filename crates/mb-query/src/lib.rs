//! # Query Engine
//!
//! Tracks every in-flight `get` from registration to its terminal state.
//!
//! ## Lifecycle
//!
//! ```text
//!             reply / final
//!              ┌────────┐
//!              ▼        │
//!  register ─▶ Pending ─┘──── all addressed finals ──▶ Completed
//!                 │ ─────────── deadline ───────────▶ TimedOut
//!                 └─────────── cancel ─────────────▶ Cancelled
//! ```
//!
//! Every transition goes through [`PendingQueryState::apply`]. Terminal
//! states are final: the query leaves the engine as soon as it reaches one,
//! so anything arriving later is dropped.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod engine;
pub mod errors;
pub mod state;

pub use engine::{PendingQuery, QueryEngine, QueryStats, ResolveHook};
pub use errors::ParsePolicyError;
pub use state::{CancelPolicy, PendingQueryState, QueryEvent, QueryOutcome, QueryStatus};
