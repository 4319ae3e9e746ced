//! # Relay Core
//!
//! Everything between "a producer sent some JSON" and "every dashboard got a
//! frame". The components are plain owned values wired together by the
//! caller; nothing in here is global.
//!
//! ## Core Components:
//!
//! - **`decision_engine`**: Pure policy. Maps validated telemetry to a
//!   `ControlDecision` using configurable ETA tiers and a proximity trigger.
//!
//! - **`registry`**: The subscriber fan-out. Bounded per-subscriber queues,
//!   snapshot-then-send broadcasts, and lazy removal of subscribers that stop
//!   draining.
//!
//! - **`relay`**: The orchestrator. Validates, audits, decides and broadcasts,
//!   holding a per-EV turn so one vehicle's decisions stay in order.
//!
//! - **`audit`**: The append-only trail. JSON Lines on disk plus an in-memory
//!   tail for the HTTP log endpoint.
//!
//! - **`sequencer`** and **`clock`**: Small ordering helpers used by the relay.

/// Telemetry-to-decision policy.
pub mod decision_engine;
/// Subscriber bookkeeping and fan-out.
pub mod registry;
/// The submit pipeline.
pub mod relay;
/// Append-only audit trail.
pub mod audit;
/// Per-EV FIFO turnstiles.
pub mod sequencer;
/// Strictly increasing decision timestamps.
pub mod clock;

// --- Public API Re-exports ---
pub use decision_engine::{DecisionEngine, Policy, PolicyError};
pub use registry::{BroadcastReport, SubscriberId, SubscriberRegistry, SubscriberState, Subscription};
pub use relay::{EventRelay, InboundMessage, RelayError, RelayStats};
pub use audit::{AuditError, AuditLog, AuditPolicy, AuditRecord, AuditSink, JsonLinesAuditSink};
pub use sequencer::{EvSequencer, Turn};
pub use clock::DecisionClock;
