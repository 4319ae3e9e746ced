//! # Relay Data Model
//!
//! Types that cross component boundaries: the validated EV telemetry record,
//! the control decision produced for it, and the frame envelope pushed to
//! dashboard subscribers.

/// Validated EV telemetry and its parser.
pub mod telemetry;
/// Control decisions and actions.
pub mod decision;
/// Broadcast topics and the shared wire frame.
pub mod frame;

pub use telemetry::{EvTelemetry, InvalidTelemetry, Location};
pub use decision::{Action, ControlDecision};
pub use frame::{Frame, Topic};
