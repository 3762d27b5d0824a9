//! # Shared Types Crate
//!
//! This crate contains the addressing and message types every Meshbus crate
//! agrees on.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: key expressions, payloads and the network
//!   envelope are defined once, here.
//! - **Pure Values**: nothing in this crate performs I/O or holds shared state.
//! - **Opaque Frames**: transports only ever see the bytes produced by
//!   [`Envelope::encode`]; the encoding is private to sessions.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod keyexpr;
pub mod payload;

pub use entities::*;
pub use envelope::{Envelope, NetworkMessage, PROTOCOL_VERSION};
pub use errors::*;
pub use keyexpr::KeyExpr;
pub use payload::Payload;
