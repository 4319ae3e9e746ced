//! SUMO `.net.xml` to [`NetworkGeometry`].
//!
//! Only what dashboards draw is kept: non-internal lane polylines, signalized
//! junctions and one synthesized RSU per junction. Malformed shape points are
//! dropped one by one, and a lane that ends up with no points is omitted.

use serde::{Deserialize, Serialize};

use super::GeometryError;
use crate::RSU_PREFIX;

/// A point in network coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
}

/// One lane polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    /// SUMO lane id.
    pub id: String,
    /// Parsed shape points, in source order.
    pub shape: Vec<Point>,
}

/// A traffic light or RSU position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Junction id, or `RSU_<junction id>` for RSUs.
    pub id: String,
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
}

impl Site {
    /// Euclidean distance to `(x, y)`.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Bounding box over every parsed lane point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    /// Smallest x.
    pub min_x: f64,
    /// Largest x.
    pub max_x: f64,
    /// Smallest y.
    pub min_y: f64,
    /// Largest y.
    pub max_y: f64,
}

impl Bounds {
    fn around(p: Point) -> Self {
        Self { min_x: p.x, max_x: p.x, min_y: p.y, max_y: p.y }
    }

    fn include(&mut self, p: Point) {
        self.min_x = self.min_x.min(p.x);
        self.max_x = self.max_x.max(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_y = self.max_y.max(p.y);
    }
}

/// Decoded road network, immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkGeometry {
    /// Lanes in source order.
    pub lanes: Vec<Lane>,
    /// Signalized junctions.
    pub tls: Vec<Site>,
    /// One RSU per traffic light.
    pub rsus: Vec<Site>,
    /// Extent of all lane points.
    pub bounds: Bounds,
}

impl NetworkGeometry {
    /// Traffic light by junction id.
    pub fn traffic_light(&self, id: &str) -> Option<&Site> {
        self.tls.iter().find(|t| t.id == id)
    }

    /// The RSU closest to `(x, y)` and its distance.
    pub fn nearest_rsu(&self, x: f64, y: f64) -> Option<(&Site, f64)> {
        self.rsus
            .iter()
            .map(|r| (r, r.distance_to(x, y)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Number of lane points across all lanes.
    pub fn point_count(&self) -> usize {
        self.lanes.iter().map(|l| l.shape.len()).sum()
    }
}

/// Parses a SUMO network.
///
/// With `allow_list` set, traffic lights are exactly the listed junctions
/// that exist in the network; otherwise every `type="traffic_light"` junction.
pub fn parse_network(xml: &str, allow_list: Option<&[String]>) -> Result<NetworkGeometry, GeometryError> {
    let doc = roxmltree::Document::parse(xml)?;
    let root = doc.root_element();

    let mut lanes = Vec::new();
    let mut bounds: Option<Bounds> = None;
    let mut skipped_points = 0usize;

    for edge in root.children().filter(|n| n.has_tag_name("edge")) {
        if edge.attribute("function") == Some("internal") {
            continue;
        }
        for lane in edge.children().filter(|n| n.has_tag_name("lane")) {
            let Some(id) = lane.attribute("id") else { continue };
            let (shape, bad) = parse_shape(lane.attribute("shape").unwrap_or(""));
            skipped_points += bad;
            if shape.is_empty() {
                log::debug!("Lane {} has no usable shape points; omitted", id);
                continue;
            }
            for &p in &shape {
                match bounds.as_mut() {
                    Some(b) => b.include(p),
                    None => bounds = Some(Bounds::around(p)),
                }
            }
            lanes.push(Lane { id: id.to_string(), shape });
        }
    }

    let bounds = bounds.ok_or(GeometryError::Empty)?;
    if skipped_points > 0 {
        log::warn!("Skipped {} malformed lane shape point(s)", skipped_points);
    }

    let mut tls = Vec::new();
    for junction in root.children().filter(|n| n.has_tag_name("junction")) {
        let Some(id) = junction.attribute("id") else { continue };
        let wanted = match allow_list {
            Some(list) => list.iter().any(|allowed| allowed == id),
            None => junction.attribute("type") == Some("traffic_light"),
        };
        if !wanted {
            continue;
        }
        match (coordinate(junction.attribute("x")), coordinate(junction.attribute("y"))) {
            (Some(x), Some(y)) => tls.push(Site { id: id.to_string(), x, y }),
            _ => log::warn!("Junction {} has no usable position; skipped", id),
        }
    }

    if let Some(list) = allow_list {
        for wanted in list.iter().filter(|w| !tls.iter().any(|t| &t.id == *w)) {
            log::warn!("Traffic light {} is not in the network", wanted);
        }
    }

    let rsus = tls
        .iter()
        .map(|t| Site { id: format!("{RSU_PREFIX}{}", t.id), x: t.x, y: t.y })
        .collect();

    Ok(NetworkGeometry { lanes, tls, rsus, bounds })
}

/// Whitespace separated `x,y` (or `x,y,z`) tokens. Returns the good points
/// and the number of tokens that did not parse.
fn parse_shape(shape: &str) -> (Vec<Point>, usize) {
    let mut points = Vec::new();
    let mut bad = 0;
    for token in shape.split_whitespace() {
        let mut parts = token.split(',');
        let x = coordinate(parts.next());
        let y = coordinate(parts.next());
        match (x, y) {
            (Some(x), Some(y)) => points.push(Point { x, y }),
            _ => bad += 1,
        }
    }
    (points, bad)
}

fn coordinate(text: Option<&str>) -> Option<f64> {
    text.and_then(|t| t.trim().parse::<f64>().ok()).filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<net version="1.16">
    <location netOffset="0.00,0.00" convBoundary="0.00,0.00,10.00,10.00"/>
    <edge id=":J1_0" function="internal">
        <lane id=":J1_0_0" index="0" speed="13.89" length="3.00" shape="-50,-50 500,500"/>
    </edge>
    <edge id="E0" from="J0" to="J1" priority="-1">
        <lane id="E0_0" index="0" speed="13.89" length="20.00" shape="0,0 10,0 10,10"/>
    </edge>
    <junction id="J0" type="priority" x="0.00" y="0.00"/>
    <junction id="J1" type="traffic_light" x="10.00" y="0.00"/>
    <junction id="J4" type="traffic_light" x="10.00" y="10.00"/>
</net>"#;

    #[test]
    fn single_lane_example() {
        let net = parse_network(NET, None).unwrap();
        assert_eq!(net.lanes.len(), 1);
        assert_eq!(net.lanes[0].id, "E0_0");
        assert_eq!(net.lanes[0].shape.len(), 3);
        assert_eq!(net.bounds, Bounds { min_x: 0.0, max_x: 10.0, min_y: 0.0, max_y: 10.0 });
    }

    #[test]
    fn bounds_serialize_camel_case() {
        let net = parse_network(NET, None).unwrap();
        let value = serde_json::to_value(net.bounds).unwrap();
        assert_eq!(value["minX"], 0.0);
        assert_eq!(value["maxY"], 10.0);
    }

    #[test]
    fn traffic_lights_default_to_signalized_junctions() {
        let net = parse_network(NET, None).unwrap();
        let ids: Vec<_> = net.tls.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["J1", "J4"]);
        let rsus: Vec<_> = net.rsus.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(rsus, vec!["RSU_J1", "RSU_J4"]);
    }

    #[test]
    fn allow_list_selects_junctions() {
        let allow = vec!["J0".to_string(), "J9".to_string()];
        let net = parse_network(NET, Some(&allow)).unwrap();
        assert_eq!(net.tls.len(), 1);
        assert_eq!(net.tls[0].id, "J0");
        assert_eq!(net.rsus[0].id, "RSU_J0");
    }

    #[test]
    fn malformed_points_are_dropped_individually() {
        let xml = r#"<net>
            <edge id="E0"><lane id="a" shape="0,0 oops,1 5,5"/></edge>
            <edge id="E1"><lane id="b" shape="x,y"/></edge>
            <edge id="E2"><lane id="c" shape="1,2,3 -4,8"/></edge>
        </net>"#;
        let net = parse_network(xml, None).unwrap();
        let ids: Vec<_> = net.lanes.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(net.lanes[0].shape, vec![Point { x: 0.0, y: 0.0 }, Point { x: 5.0, y: 5.0 }]);
        assert_eq!(net.bounds, Bounds { min_x: -4.0, max_x: 5.0, min_y: 0.0, max_y: 8.0 });
    }

    #[test]
    fn no_points_is_a_failure() {
        let xml = r#"<net><edge id=":i" function="internal"><lane id=":i_0" shape="0,0 1,1"/></edge></net>"#;
        assert!(matches!(parse_network(xml, None), Err(GeometryError::Empty)));
        assert!(matches!(parse_network("<net", None), Err(GeometryError::Xml(_))));
    }

    #[test]
    fn nearest_rsu_and_lookup() {
        let net = parse_network(NET, None).unwrap();
        let (rsu, distance) = net.nearest_rsu(10.0, 7.0).unwrap();
        assert_eq!(rsu.id, "RSU_J4");
        assert!((distance - 3.0).abs() < 1e-9);
        assert_eq!(net.traffic_light("J1").map(|t| t.x), Some(10.0));
        assert!(net.traffic_light("J0").is_none());
    }
}
