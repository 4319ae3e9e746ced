//! # EV Telemetry
//!
//! Producers send loosely-typed JSON (simulators, mock senders and the SUMO
//! bridge all disagree on field names). [`EvTelemetry::from_value`] is the one
//! place that turns such a payload into a validated record; anything that
//! fails here never reaches the decision engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::RSU_PREFIX;

/// Fields the parser consumes; everything else is kept in `extra`.
const CONSUMED: [&str; 10] = [
    "ev_id",
    "eta_seconds",
    "eta",
    "location",
    "position",
    "speed",
    "tls_id",
    "next_tls",
    "distance",
    "timestamp",
];

/// Reasons a telemetry payload is rejected before entering the pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidTelemetry {
    /// The body could not be decoded as JSON at all.
    #[error("telemetry body is not valid JSON: {0}")]
    MalformedJson(String),
    /// The payload decoded, but is not a JSON object.
    #[error("telemetry must be a JSON object")]
    NotAnObject,
    /// `ev_id` is absent, null or blank.
    #[error("ev_id is missing or empty")]
    MissingEvId,
    /// `eta_seconds` (or `eta`) is absent.
    #[error("eta_seconds is missing")]
    MissingEta,
    /// A distance-based update carried no `distance`.
    #[error("distance is missing")]
    MissingDistance,
    /// A numeric field holds something that is not a number.
    #[error("{field} is not a number")]
    NotNumeric {
        /// Offending field name.
        field: &'static str,
    },
    /// A numeric field is negative or not finite.
    #[error("{field} must be a finite, non-negative number (got {value})")]
    OutOfRange {
        /// Offending field name.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// `location`/`position` is present but has no recognizable shape.
    #[error("location must be [x, y], {{x, y}} or {{lat, lon}}")]
    BadLocation,
}

/// A 2D position, either in network coordinates or geographic degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    /// Network (SUMO) coordinates, same units as the geometry.
    Planar {
        /// Easting.
        x: f64,
        /// Northing.
        y: f64,
    },
    /// WGS84 coordinates.
    Geo {
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lon: f64,
    },
}

impl Location {
    /// Accepts `[x, y]`, `{ "x", "y" }` or `{ "lat", "lon" }`.
    pub fn from_value(value: &Value) -> Result<Self, InvalidTelemetry> {
        let num = |v: Option<&Value>| v.and_then(Value::as_f64).filter(|n| n.is_finite());
        match value {
            Value::Array(items) if items.len() == 2 => {
                match (num(items.first()), num(items.get(1))) {
                    (Some(x), Some(y)) => Ok(Location::Planar { x, y }),
                    _ => Err(InvalidTelemetry::BadLocation),
                }
            }
            Value::Object(map) => {
                if let (Some(x), Some(y)) = (num(map.get("x")), num(map.get("y"))) {
                    Ok(Location::Planar { x, y })
                } else if let (Some(lat), Some(lon)) = (num(map.get("lat")), num(map.get("lon"))) {
                    Ok(Location::Geo { lat, lon })
                } else {
                    Err(InvalidTelemetry::BadLocation)
                }
            }
            _ => Err(InvalidTelemetry::BadLocation),
        }
    }

    /// Network coordinates, if this is a planar location.
    pub fn planar(&self) -> Option<(f64, f64)> {
        match *self {
            Location::Planar { x, y } => Some((x, y)),
            Location::Geo { .. } => None,
        }
    }
}

/// A validated EV telemetry record.
///
/// Only `ev_id` is guaranteed by construction. The ETA path additionally
/// requires `eta_seconds` ([`EvTelemetry::require_eta`]) and the proximity
/// path requires `distance` ([`EvTelemetry::require_distance`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvTelemetry {
    /// Emergency vehicle identifier.
    pub ev_id: String,
    /// Estimated seconds until the EV reaches its target signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    /// Current position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Current speed in m/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Target traffic light.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_id: Option<String>,
    /// Distance to the target signal, in geometry units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Receipt time, stamped by the relay.
    pub timestamp: DateTime<Utc>,
    /// Producer fields the relay does not interpret, forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EvTelemetry {
    /// Validates a raw payload received at `received_at`.
    ///
    /// `ev_id` must be a non-empty string (numbers are stringified). Every
    /// optional numeric field that is present must be a finite, non-negative
    /// number or numeric string; a malformed optional field rejects the whole
    /// record. A producer-supplied `timestamp` is kept as `source_timestamp`.
    pub fn from_value(raw: &Value, received_at: DateTime<Utc>) -> Result<Self, InvalidTelemetry> {
        let obj = raw.as_object().ok_or(InvalidTelemetry::NotAnObject)?;

        let ev_id = match present(obj, "ev_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(InvalidTelemetry::MissingEvId),
        };

        let eta_seconds = present(obj, "eta_seconds")
            .or_else(|| present(obj, "eta"))
            .map(|v| non_negative("eta_seconds", v))
            .transpose()?;
        let speed = present(obj, "speed").map(|v| non_negative("speed", v)).transpose()?;
        let distance = present(obj, "distance").map(|v| non_negative("distance", v)).transpose()?;
        let location = present(obj, "location")
            .or_else(|| present(obj, "position"))
            .map(Location::from_value)
            .transpose()?;

        let tls_id = text(obj, "tls_id").or_else(|| text(obj, "next_tls")).or_else(|| {
            text(obj, "rsu").and_then(|rsu| rsu.strip_prefix(RSU_PREFIX).map(str::to_string))
        });

        let mut extra: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| !CONSUMED.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(sent) = present(obj, "timestamp") {
            extra.insert("source_timestamp".to_string(), sent.clone());
        }

        Ok(Self {
            ev_id,
            eta_seconds,
            location,
            speed,
            tls_id,
            distance,
            timestamp: received_at,
            extra,
        })
    }

    /// The ETA, or [`InvalidTelemetry::MissingEta`].
    pub fn require_eta(&self) -> Result<f64, InvalidTelemetry> {
        self.eta_seconds.ok_or(InvalidTelemetry::MissingEta)
    }

    /// The distance, or [`InvalidTelemetry::MissingDistance`].
    pub fn require_distance(&self) -> Result<f64, InvalidTelemetry> {
        self.distance.ok_or(InvalidTelemetry::MissingDistance)
    }
}

/// A field that exists and is not `null`.
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    present(obj, key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn non_negative(field: &'static str, value: &Value) -> Result<f64, InvalidTelemetry> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or(InvalidTelemetry::NotNumeric { field })?;

    if !n.is_finite() || n < 0.0 {
        return Err(InvalidTelemetry::OutOfRange { field, value: n });
    }
    Ok(n)
}
