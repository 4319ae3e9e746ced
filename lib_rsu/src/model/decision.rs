use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier used for decisions that originate from the relay itself.
pub const SERVER_TLS_ID: &str = "RSU_SERVER";

/// What the RSU asks the signal controller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Hold the current green phase for `duration_seconds`.
    ExtendGreen,
    /// Acknowledge the request without changing the signal.
    Ack,
    /// Connection acknowledgement sent to a newly registered subscriber.
    Connected,
}

/// A control decision as delivered to dashboards and producers.
///
/// `duration_seconds > 0` holds exactly when `action` is
/// [`Action::ExtendGreen`]; the constructors are the only way the relay
/// builds one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDecision {
    /// Target signal, echoed from the telemetry when known.
    pub tls_id: Option<String>,
    /// Requested action.
    pub action: Action,
    /// Green extension in seconds; zero unless extending.
    pub duration_seconds: u32,
    /// Human-readable reason shown on dashboards.
    pub reason: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl ControlDecision {
    /// An `extend_green` decision. A zero duration is bumped to one second.
    pub fn extend_green(
        tls_id: Option<String>,
        duration_seconds: u32,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tls_id,
            action: Action::ExtendGreen,
            duration_seconds: duration_seconds.max(1),
            reason: reason.into(),
            timestamp,
        }
    }

    /// An `ack` decision, always with zero duration.
    pub fn ack(tls_id: Option<String>, reason: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            tls_id,
            action: Action::Ack,
            duration_seconds: 0,
            reason: reason.into(),
            timestamp,
        }
    }

    /// The synthetic acknowledgement a subscriber receives on registration.
    pub fn connected(timestamp: DateTime<Utc>) -> Self {
        Self {
            tls_id: Some(SERVER_TLS_ID.to_string()),
            action: Action::Connected,
            duration_seconds: 0,
            reason: "Server is live and ready".to_string(),
            timestamp,
        }
    }

    /// Whether this decision asks for a green extension.
    pub fn extends_green(&self) -> bool {
        self.action == Action::ExtendGreen
    }
}
