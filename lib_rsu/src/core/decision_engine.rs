//! # Decision Engine
//!
//! Pure mapping from validated telemetry to a [`ControlDecision`]. The engine
//! never touches a clock, a lock or the network: the relay hands it the
//! decision timestamp, which keeps every outcome reproducible in tests.
//!
//! Two policies exist:
//!
//! - **ETA tiering** always produces a decision (`extend_green` or `ack`).
//!   Boundaries are inclusive on the lower tier.
//! - **Proximity** only produces a decision on a positive trigger: a known
//!   target signal closer than the configured distance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{ControlDecision, EvTelemetry, InvalidTelemetry};

/// Reason attached to the shortest-ETA tier.
pub const REASON_ARRIVING_SOON: &str = "EV arriving soon";
/// Reason attached to the middle ETA tier.
pub const REASON_EXPECTED: &str = "EV expected";
/// Reason attached to acknowledgements.
pub const REASON_ETA_TOO_LARGE: &str = "ETA too large";
/// Reason attached to proximity-triggered extensions.
pub const REASON_APPROACHING: &str = "EV approaching intersection";

/// Rejected policy settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// The tiers overlap or are inverted.
    #[error("arriving_soon_eta ({soon}) must not exceed expected_eta ({expected})")]
    TierOrder {
        /// Upper bound of the first tier.
        soon: f64,
        /// Upper bound of the second tier.
        expected: f64,
    },
    /// A threshold is negative or not finite.
    #[error("{0} must be a finite, non-negative number")]
    Threshold(&'static str),
    /// An extension duration is zero.
    #[error("{0} must be greater than zero")]
    ZeroExtension(&'static str),
}

/// Thresholds and green extensions used by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Policy {
    /// ETAs up to and including this value get the long extension.
    pub arriving_soon_eta: f64,
    /// ETAs up to and including this value get the short extension.
    pub expected_eta: f64,
    /// Extension for the first tier.
    pub arriving_soon_extension: u32,
    /// Extension for the second tier.
    pub expected_extension: u32,
    /// Distances strictly below this trigger a proximity extension.
    pub proximity_distance: f64,
    /// Extension granted on a proximity trigger.
    pub proximity_extension: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            arriving_soon_eta: 15.0,
            expected_eta: 40.0,
            arriving_soon_extension: 10,
            expected_extension: 5,
            proximity_distance: 100.0,
            proximity_extension: 5,
        }
    }
}

impl Policy {
    /// Checks tier ordering, finiteness and non-zero extensions.
    pub fn validate(&self) -> Result<(), PolicyError> {
        for (name, value) in [
            ("arriving_soon_eta", self.arriving_soon_eta),
            ("expected_eta", self.expected_eta),
            ("proximity_distance", self.proximity_distance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PolicyError::Threshold(name));
            }
        }
        if self.arriving_soon_eta > self.expected_eta {
            return Err(PolicyError::TierOrder {
                soon: self.arriving_soon_eta,
                expected: self.expected_eta,
            });
        }
        for (name, value) in [
            ("arriving_soon_extension", self.arriving_soon_extension),
            ("expected_extension", self.expected_extension),
            ("proximity_extension", self.proximity_extension),
        ] {
            if value == 0 {
                return Err(PolicyError::ZeroExtension(name));
            }
        }
        Ok(())
    }
}

/// Stateless decision maker bound to a [`Policy`].
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    policy: Policy,
}

impl DecisionEngine {
    /// Builds an engine after validating the policy.
    pub fn new(policy: Policy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    /// The active policy.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Validates a raw payload and applies the ETA policy.
    pub fn decide(&self, raw: &Value, at: DateTime<Utc>) -> Result<ControlDecision, InvalidTelemetry> {
        let telemetry = EvTelemetry::from_value(raw, at)?;
        self.decide_eta(&telemetry, at)
    }

    /// ETA tiering for an already validated record.
    pub fn decide_eta(
        &self,
        telemetry: &EvTelemetry,
        at: DateTime<Utc>,
    ) -> Result<ControlDecision, InvalidTelemetry> {
        let eta = telemetry.require_eta()?;
        let tls_id = telemetry.tls_id.clone();
        let p = &self.policy;

        let decision = if eta <= p.arriving_soon_eta {
            ControlDecision::extend_green(tls_id, p.arriving_soon_extension, REASON_ARRIVING_SOON, at)
        } else if eta <= p.expected_eta {
            ControlDecision::extend_green(tls_id, p.expected_extension, REASON_EXPECTED, at)
        } else {
            ControlDecision::ack(tls_id, REASON_ETA_TOO_LARGE, at)
        };
        Ok(decision)
    }

    /// Proximity trigger. `Ok(None)` means "no decision", not even an ack.
    pub fn decide_proximity(
        &self,
        telemetry: &EvTelemetry,
        at: DateTime<Utc>,
    ) -> Result<Option<ControlDecision>, InvalidTelemetry> {
        let distance = telemetry.require_distance()?;
        let Some(tls_id) = telemetry.tls_id.clone() else {
            return Ok(None);
        };
        if distance < self.policy.proximity_distance {
            Ok(Some(ControlDecision::extend_green(
                Some(tls_id),
                self.policy.proximity_extension,
                REASON_APPROACHING,
                at,
            )))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;
    use serde_json::json;

    fn engine() -> DecisionEngine {
        DecisionEngine::default()
    }

    fn eta(value: f64) -> ControlDecision {
        engine()
            .decide(&json!({"ev_id": "ev1", "eta_seconds": value}), Utc::now())
            .unwrap()
    }

    #[test]
    fn first_tier_is_inclusive() {
        for value in [0.0, 7.5, 15.0] {
            let d = eta(value);
            assert_eq!(d.action, Action::ExtendGreen, "eta {value}");
            assert_eq!(d.duration_seconds, 10);
            assert_eq!(d.reason, REASON_ARRIVING_SOON);
        }
    }

    #[test]
    fn second_tier_is_inclusive() {
        for value in [15.000_001, 20.0, 40.0] {
            let d = eta(value);
            assert_eq!(d.action, Action::ExtendGreen, "eta {value}");
            assert_eq!(d.duration_seconds, 5);
            assert_eq!(d.reason, REASON_EXPECTED);
        }
    }

    #[test]
    fn large_eta_is_acknowledged() {
        for value in [40.000_001, 41.0, 3600.0] {
            let d = eta(value);
            assert_eq!(d.action, Action::Ack, "eta {value}");
            assert_eq!(d.duration_seconds, 0);
            assert_eq!(d.reason, REASON_ETA_TOO_LARGE);
        }
    }

    #[test]
    fn tls_is_echoed_or_null() {
        let at = Utc::now();
        let with = engine()
            .decide(&json!({"ev_id": "ev1", "eta_seconds": 3, "next_tls": "tls_1"}), at)
            .unwrap();
        assert_eq!(with.tls_id.as_deref(), Some("tls_1"));

        let without = engine().decide(&json!({"ev_id": "ev1", "eta_seconds": 3}), at).unwrap();
        assert_eq!(without.tls_id, None);
    }

    #[test]
    fn deterministic_for_same_input() {
        let at = Utc::now();
        let raw = json!({"ev_id": "ev1", "eta_seconds": 22, "tls_id": "J5"});
        assert_eq!(engine().decide(&raw, at), engine().decide(&raw, at));
    }

    #[test]
    fn rejects_missing_eta() {
        let err = engine().decide(&json!({"ev_id": "ev1"}), Utc::now()).unwrap_err();
        assert_eq!(err, InvalidTelemetry::MissingEta);
    }

    #[test]
    fn proximity_only_emits_on_trigger() {
        let at = Utc::now();
        let near = EvTelemetry::from_value(&json!({"ev_id": "a", "tls_id": "J1", "distance": 99.9}), at).unwrap();
        let far = EvTelemetry::from_value(&json!({"ev_id": "a", "tls_id": "J1", "distance": 100}), at).unwrap();
        let untargeted = EvTelemetry::from_value(&json!({"ev_id": "a", "distance": 5}), at).unwrap();

        let d = engine().decide_proximity(&near, at).unwrap().unwrap();
        assert_eq!(d.action, Action::ExtendGreen);
        assert_eq!(d.duration_seconds, 5);
        assert_eq!(d.reason, REASON_APPROACHING);
        assert_eq!(engine().decide_proximity(&far, at).unwrap(), None);
        assert_eq!(engine().decide_proximity(&untargeted, at).unwrap(), None);
    }

    #[test]
    fn policy_validation() {
        let inverted = Policy { arriving_soon_eta: 50.0, ..Policy::default() };
        assert!(matches!(DecisionEngine::new(inverted), Err(PolicyError::TierOrder { .. })));

        let zero = Policy { expected_extension: 0, ..Policy::default() };
        assert_eq!(
            DecisionEngine::new(zero).unwrap_err(),
            PolicyError::ZeroExtension("expected_extension")
        );
        assert!(DecisionEngine::new(Policy::default()).is_ok());
    }
}
