//! # Network Geometry
//!
//! Static road-network context for dashboards and for distance derivation:
//! lane polylines, traffic-light and RSU positions, and the bounding box.
//! The network is parsed from a SUMO `.net.xml` once and cached until
//! explicitly invalidated.

use std::path::PathBuf;
use thiserror::Error;

/// SUMO network parsing and geometry types.
pub mod network;
/// Load-once cache around a network source.
pub mod cache;

pub use cache::{GeometryCache, NetworkSource};
pub use network::{parse_network, Bounds, Lane, NetworkGeometry, Point, Site};

pub use crate::RSU_PREFIX;

/// Why geometry is unavailable.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// The network file could not be read.
    #[error("cannot read network {path}: {source}")]
    Io {
        /// Network file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The network is not well-formed XML.
    #[error("network is not valid XML: {0}")]
    Xml(#[from] roxmltree::Error),
    /// The network has no usable lane points, so bounds are undefined.
    #[error("network contains no usable lane geometry")]
    Empty,
    /// Nothing has been loaded yet.
    #[error("network geometry not loaded")]
    NotLoaded,
    /// No network source is configured.
    #[error("no network source configured")]
    NoSource,
}
