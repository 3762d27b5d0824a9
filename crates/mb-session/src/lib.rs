//! # Meshbus Session
//!
//! The caller-facing API: open a session, declare subscribers and
//! queryables, publish, query and close.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mb_session::{Config, Session};
//! use std::time::Duration;
//!
//! let mut config = Config::new();
//! config.insert("listen.endpoints", serde_json::json!(["mem/home"]))?;
//! let session = Session::open(config).await?;
//!
//! let _sub = session.declare_subscriber("home/**", |sample| {
//!     println!("{} = {:?}", sample.key_expr, sample.payload);
//! })?;
//! session.publish("home/kitchen/temp", "21.5")?;
//!
//! let outcome = session.get("home/*/temp", Duration::from_secs(1))?.wait().await;
//! session.close();
//! ```
//!
//! ## Module Map
//!
//! - `config`: JSON configuration tree and resolved settings
//! - `session`: lifecycle, declarations, publish and get
//! - `routing`: links, remote interest tables, inbound messages
//! - `query`: the [`Query`] handed to queryable callbacks
//! - `handles`: [`Subscriber`] and [`Queryable`] handles

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod errors;
mod handles;
mod query;
mod routing;
mod session;

pub use config::{Config, SessionConfig, DEFAULT_QUERY_TIMEOUT_MS};
pub use errors::{ConfigError, QueryError, RoutingError, SessionError};
pub use handles::{Queryable, Subscriber};
pub use query::Query;
pub use session::{GetOptions, Session, SessionState};

pub use mb_query::{CancelPolicy, PendingQuery, QueryOutcome, QueryStatus};
pub use shared_types::{KeyExpr, Payload, PeerId, Reply, Sample, SampleKind, WhatAmI};
