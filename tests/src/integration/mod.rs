//! Cross-session flows. Every test builds its own [`fixtures::Mesh`] so
//! endpoint names never collide between tests.

pub mod fixtures;

mod lifecycle_flows;
mod pubsub_flows;
mod query_flows;
