//! # lib_rsu
//!
//! Decision core for the roadside-unit (RSU) signal-priority relay. Modules are
//! gated by cargo features so producers, the relay server and tooling only pull
//! in what they use.
//!
//! - **`model`** (`core`): EV telemetry, control decisions and wire frames.
//! - **`core`** (`core`): decision engine, subscriber registry, event relay and
//!   audit log.
//! - **`geometry`** (`geometry`): SUMO network parsing and the geometry cache.
//! - **`retrieve`** (`retrieve`): HTTP client for telemetry producers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Prefix of synthesized RSU ids (`RSU_<junction_id>`), shared by telemetry
/// parsing and network geometry.
pub const RSU_PREFIX: &str = "RSU_";

/// Telemetry, decision and frame types shared by every component.
#[cfg(feature = "core")]
pub mod model;

/// The relay pipeline: engine, registry, relay, audit.
#[cfg(feature = "core")]
pub mod core;

/// Road-network geometry parsing and caching.
#[cfg(feature = "geometry")]
pub mod geometry;

/// HTTP client for pushing telemetry into a relay.
#[cfg(feature = "retrieve")]
pub mod retrieve;
