use crate::rsu_logic::config::Settings;
use crate::rsu_logic::model::StatusReport;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lib_rsu::core::{AuditLog, DecisionEngine, EventRelay, JsonLinesAuditSink, SubscriberRegistry};
use lib_rsu::geometry::{GeometryCache, NetworkSource, RSU_PREFIX};
use lib_rsu::model::EvTelemetry;
use serde_json::Value;
use std::sync::Arc;

/// Everything the handlers share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<EventRelay>,
    pub geometry: Arc<GeometryCache>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(relay: Arc<EventRelay>, geometry: Arc<GeometryCache>) -> Self {
        Self { relay, geometry, started_at: Utc::now() }
    }

    /// Builds the relay, audit trail and geometry cache from settings.
    pub async fn build(settings: &Settings) -> Result<Self> {
        let engine = DecisionEngine::new(settings.policy.clone())?;
        let sink = JsonLinesAuditSink::open(&settings.audit_log_path)
            .await
            .with_context(|| format!("Cannot open audit log {}", settings.audit_log_path.display()))?;
        let audit = AuditLog::in_memory(settings.audit_tail)
            .with_sink(Arc::new(sink))
            .with_policy(settings.audit_policy);
        let registry = Arc::new(SubscriberRegistry::new(settings.subscriber_buffer));
        let relay = Arc::new(EventRelay::new(engine, registry, Arc::new(audit)));

        let geometry = Arc::new(GeometryCache::new(
            settings.network_path.clone().map(NetworkSource::File),
            settings.traffic_lights.clone(),
        ));

        Ok(Self::new(relay, geometry))
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            subscribers: self.relay.registry().len(),
            network_loaded: self.geometry.get().is_ok(),
            relay: self.relay.stats(),
        }
    }

    /// Fills in `distance` for a position update that carries a planar
    /// location but no distance: measured to the target traffic light, or
    /// to the nearest RSU whose junction then becomes the target. Payloads
    /// that cannot be resolved are left untouched for the relay to judge.
    pub async fn derive_distance(&self, raw: &mut Value) {
        let Ok(telemetry) = EvTelemetry::from_value(raw, Utc::now()) else { return };
        if telemetry.distance.is_some() || !self.geometry.has_source() {
            return;
        }
        let Some((x, y)) = telemetry.location.and_then(|l| l.planar()) else { return };
        let network = match self.geometry.load().await {
            Ok(network) => network,
            Err(e) => {
                log::debug!("No geometry for distance derivation: {}", e);
                return;
            }
        };

        let resolved = match telemetry.tls_id.as_deref() {
            Some(tls_id) => network.traffic_light(tls_id).map(|t| (t.id.clone(), t.distance_to(x, y))),
            None => network.nearest_rsu(x, y).map(|(rsu, distance)| {
                let junction = rsu.id.strip_prefix(RSU_PREFIX).unwrap_or(&rsu.id).to_string();
                (junction, distance)
            }),
        };

        if let (Some((tls_id, distance)), Some(obj)) = (resolved, raw.as_object_mut()) {
            log::debug!("EV {} is {:.1} from {}", telemetry.ev_id, distance, tls_id);
            obj.insert("distance".to_string(), Value::from(distance));
            obj.entry("tls_id").or_insert(Value::String(tls_id));
        }
    }
}
