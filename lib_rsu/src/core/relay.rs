//! # Event Relay
//!
//! Orchestrates one inbound EV event: validate, audit, decide, audit,
//! broadcast. Every transport (WebSocket, HTTP, tests) funnels into
//! [`EventRelay::handle`] or one of the `submit*` methods.
//!
//! For a single EV the whole pipeline runs under that EV's [`Turn`], so
//! subscribers observe its decisions in submission order. Different EVs only
//! share the registry and audit locks, which are held per record or per
//! fan-out. Each `ev_event` is immediately followed by its `rsu_decision` in
//! every subscriber's stream.
//!
//! [`Turn`]: super::sequencer::Turn

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::audit::{AuditError, AuditLog, AuditPolicy, AuditRecord};
use super::clock::DecisionClock;
use super::decision_engine::DecisionEngine;
use super::registry::{BroadcastReport, SubscriberRegistry};
use super::sequencer::EvSequencer;
use crate::model::{ControlDecision, EvTelemetry, InvalidTelemetry, Topic};

/// Why a submit did not produce a result.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The payload was rejected; nothing was broadcast.
    #[error("invalid telemetry: {0}")]
    InvalidTelemetry(#[from] InvalidTelemetry),
    /// A strict audit write failed; nothing after it was broadcast.
    #[error("audit write failed: {0}")]
    AuditWrite(#[from] AuditError),
}

/// Telemetry pushed by a producer, tagged with the path it takes.
///
/// On the wire this is the `{"event": ..., "data": ...}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundMessage {
    /// ETA-based priority request.
    EvPriority(Value),
    /// Distance-based position update.
    EvUpdate(Value),
}

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Payloads that passed validation.
    pub accepted: u64,
    /// Payloads that failed validation.
    pub rejected: u64,
    /// Decisions broadcast.
    pub decisions: u64,
    /// Audit writes that failed.
    pub audit_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    decisions: AtomicU64,
    audit_failures: AtomicU64,
}

/// The relay core.
pub struct EventRelay {
    engine: DecisionEngine,
    registry: Arc<SubscriberRegistry>,
    audit: Arc<AuditLog>,
    sequencer: EvSequencer,
    clock: DecisionClock,
    counters: Counters,
}

impl EventRelay {
    /// Wires an engine, a registry and an audit log together.
    pub fn new(engine: DecisionEngine, registry: Arc<SubscriberRegistry>, audit: Arc<AuditLog>) -> Self {
        Self {
            engine,
            registry,
            audit,
            sequencer: EvSequencer::new(),
            clock: DecisionClock::new(),
            counters: Counters::default(),
        }
    }

    /// The registry decisions are broadcast to.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// The audit log.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// The decision engine.
    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Single entry point for transports.
    ///
    /// `EvPriority` always yields a decision; `EvUpdate` yields one only when
    /// the proximity policy triggers.
    pub async fn handle(&self, message: InboundMessage) -> Result<Option<ControlDecision>, RelayError> {
        match message {
            InboundMessage::EvPriority(raw) => self.submit(&raw).await.map(Some),
            InboundMessage::EvUpdate(raw) => self.submit_proximity(&raw).await,
        }
    }

    /// # ETA submit
    ///
    /// Validates, audits, decides and broadcasts `ev_event` followed by
    /// `rsu_decision`. Returns the broadcast decision.
    pub async fn submit(&self, raw: &Value) -> Result<ControlDecision, RelayError> {
        let telemetry = self.validate(raw, |t| t.require_eta().map(|_| ())).await?;
        let _turn = self.sequencer.acquire(&telemetry.ev_id).await;

        self.record(AuditRecord::TelemetryReceived { ts: Utc::now(), ev: telemetry.clone() })
            .await?;
        let decision = self.engine.decide_eta(&telemetry, self.clock.next())?;
        self.record(AuditRecord::DecisionMade {
            ts: Utc::now(),
            ev_id: telemetry.ev_id.clone(),
            decision: decision.clone(),
        })
        .await?;

        let report = self.publish(&telemetry, &decision);
        self.counters.decisions.fetch_add(1, Ordering::Relaxed);

        log::info!(
            "EV {} -> {:?} {}s ({}) to {} subscriber(s)",
            telemetry.ev_id,
            decision.action,
            decision.duration_seconds,
            decision.reason,
            report.delivered
        );
        Ok(decision)
    }

    /// # Proximity submit
    ///
    /// Requires `distance`. The telemetry is always audited. Only a trigger is
    /// broadcast, as `ev_event` followed by `rsu_decision`; an update that
    /// does not trigger reaches no subscriber.
    pub async fn submit_proximity(&self, raw: &Value) -> Result<Option<ControlDecision>, RelayError> {
        let telemetry = self.validate(raw, |t| t.require_distance().map(|_| ())).await?;
        let _turn = self.sequencer.acquire(&telemetry.ev_id).await;

        self.record(AuditRecord::TelemetryReceived { ts: Utc::now(), ev: telemetry.clone() })
            .await?;
        let decision = self.engine.decide_proximity(&telemetry, self.clock.next())?;
        if let Some(decision) = &decision {
            self.record(AuditRecord::DecisionMade {
                ts: Utc::now(),
                ev_id: telemetry.ev_id.clone(),
                decision: decision.clone(),
            })
            .await?;
            self.publish(&telemetry, decision);
            self.counters.decisions.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "EV {} near {}: extend green {}s",
                telemetry.ev_id,
                decision.tls_id.as_deref().unwrap_or("-"),
                decision.duration_seconds
            );
        } else {
            log::debug!("EV {} update, no proximity trigger", telemetry.ev_id);
        }
        Ok(decision)
    }

    /// Decodes a raw body. Undecodable input is audited with its lossy text.
    pub async fn parse_body(&self, body: &[u8]) -> Result<Value, RelayError> {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Ok(value),
            Err(e) => {
                let payload = Value::String(String::from_utf8_lossy(body).into_owned());
                Err(self.reject(InvalidTelemetry::MalformedJson(e.to_string()), payload).await)
            }
        }
    }

    /// [`EventRelay::submit`] for an undecoded JSON body.
    pub async fn submit_json(&self, body: &[u8]) -> Result<ControlDecision, RelayError> {
        let raw = self.parse_body(body).await?;
        self.submit(&raw).await
    }

    /// Current counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            decisions: self.counters.decisions.load(Ordering::Relaxed),
            audit_failures: self.counters.audit_failures.load(Ordering::Relaxed),
        }
    }

    /// Broadcasts the `ev_event`/`rsu_decision` pair as one unit.
    fn publish(&self, telemetry: &EvTelemetry, decision: &ControlDecision) -> BroadcastReport {
        let frames: Vec<_> = [
            SubscriberRegistry::encode(Topic::EvEvent, telemetry),
            SubscriberRegistry::encode(Topic::RsuDecision, decision),
        ]
        .into_iter()
        .flatten()
        .collect();
        self.registry.broadcast_frames(&frames)
    }

    async fn validate<F>(&self, raw: &Value, require: F) -> Result<EvTelemetry, RelayError>
    where
        F: FnOnce(&EvTelemetry) -> Result<(), InvalidTelemetry>,
    {
        let parsed = EvTelemetry::from_value(raw, Utc::now()).and_then(|t| require(&t).map(|_| t));
        match parsed {
            Ok(telemetry) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(telemetry)
            }
            Err(e) => Err(self.reject(e, raw.clone()).await),
        }
    }

    async fn reject(&self, error: InvalidTelemetry, payload: Value) -> RelayError {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        log::warn!("Rejected EV message: {}", error);
        // The rejection is reported either way; a failed write is only counted.
        let _ = self
            .record(AuditRecord::InvalidInput { ts: Utc::now(), error: error.to_string(), payload })
            .await;
        RelayError::InvalidTelemetry(error)
    }

    async fn record(&self, record: AuditRecord) -> Result<(), RelayError> {
        match self.audit.append(record).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.counters.audit_failures.fetch_add(1, Ordering::Relaxed);
                match self.audit.policy() {
                    AuditPolicy::Strict => Err(RelayError::AuditWrite(e)),
                    AuditPolicy::BestEffort => Ok(()),
                }
            }
        }
    }
}
