//! # Relay Retrieval
//!
//! HTTP access to a running relay for telemetry producers and tooling.
//!
//! - **`relay_client`**: a `reqwest` client with retry middleware that posts
//!   telemetry and reads back decisions, audit records and geometry.

/// Retrying HTTP client for the relay endpoints.
pub mod relay_client;

pub use relay_client::{ApiResponse, RelayClient, UpdateReply};
