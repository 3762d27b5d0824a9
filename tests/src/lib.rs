//! # Meshbus Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/   # Sessions linked over the in-memory transport
//! │   ├── fixtures.rs    # Mesh builder, sample collectors
//! │   ├── pubsub_flows.rs
//! │   ├── query_flows.rs
//! │   └── lifecycle_flows.rs
//! └── benches/           # Key expression and dispatch throughput
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mb-tests
//! cargo test -p mb-tests integration::query_flows
//! cargo bench -p mb-tests
//! ```

pub mod integration;
