//! # Transport Ports
//!
//! The session's view of the wire: point-to-point links carrying opaque
//! frames, and connectors that open or accept them.
//!
//! ## Architecture
//!
//! - `ports`: the [`Transport`], [`Listener`] and [`Connector`] traits
//! - `adapters::memory`: [`MemoryConnector`], links within one process over
//!   `mem/<name>` endpoints
//!
//! Transports never interpret frames. Encoding lives in
//! `shared_types::Envelope`.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod errors;
pub mod ports;

pub use adapters::memory::{MemoryConnector, MemoryTransport, MEMORY_SCHEME};
pub use errors::TransportError;
pub use ports::{AcceptCallback, Connector, LinkEvent, LinkId, Listener, ReceiveCallback, Transport};
