use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Logical broadcast channels dashboards listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// The telemetry that triggered a decision.
    EvEvent,
    /// A control decision (or connection acknowledgement).
    RsuDecision,
}

impl Topic {
    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::EvEvent => "ev_event",
            Topic::RsuDecision => "rsu_decision",
        }
    }
}

/// One broadcast message, serialized once and shared by every subscriber
/// through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel the frame belongs to.
    pub topic: Topic,
    /// Structured payload.
    pub payload: Value,
    /// `{"event": <topic>, "data": <payload>}` as JSON text.
    pub wire: String,
}

impl Frame {
    /// Builds the frame and its wire text.
    pub fn new(topic: Topic, payload: Value) -> Self {
        let wire = json!({ "event": topic.as_str(), "data": &payload }).to_string();
        Self { topic, payload, wire }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_text_is_event_envelope() {
        let frame = Frame::new(Topic::EvEvent, json!({"ev_id": "ev1"}));
        let parsed: Value = serde_json::from_str(&frame.wire).unwrap();
        assert_eq!(parsed, json!({"event": "ev_event", "data": {"ev_id": "ev1"}}));
    }
}
