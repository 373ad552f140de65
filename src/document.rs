//! In-memory GPX document model
//!
//! A [`GpxDocument`] is the unit the parser produces and the normalizer
//! consumes. It has no identity of its own: it is always derived from, or
//! destined for, serialized GPX text. Optional GPX structure (vendor
//! extensions, elevations, names) is modeled with `Option` fields.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::{Coordinate, HasCoordinate};

/// GPX schema version declared on the document root.
#[derive(Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GpxVersion {
    #[default]
    #[strum(to_string = "1.0")]
    #[cfg_attr(feature = "serde", serde(rename = "1.0"))]
    V1_0,
    #[strum(to_string = "1.1")]
    #[cfg_attr(feature = "serde", serde(rename = "1.1"))]
    V1_1,
}

/// Track point telemetry carried by vendor track point extensions.
#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointExtensions {
    pub heart_rate: Option<i64>,
    pub cadence: Option<i64>,
    pub temperature: Option<f64>,
}

/// A route point or track point.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
    pub elevation: Option<f64>,
    /// ISO-8601 text, passed through without interpretation.
    pub time: Option<String>,
    pub extensions: Option<PointExtensions>,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            ..Default::default()
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }
}

impl HasCoordinate for Point {
    fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

impl From<Coordinate> for Point {
    fn from(value: Coordinate) -> Self {
        Point::new(value.lat, value.lon)
    }
}

/// A standalone point of interest.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub elevation: Option<f64>,
    pub time: Option<String>,
    pub symbol: Option<String>,
    pub type_: Option<String>,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl HasCoordinate for Waypoint {
    fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// An intermediate stop recorded by a routing engine in a vendor route
/// extension.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RouteExtensionWaypoint {
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
}

impl HasCoordinate for RouteExtensionWaypoint {
    fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// A planned route: an ordered list of points to travel between.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Route {
    pub name: Option<String>,
    pub description: Option<String>,
    pub points: Vec<Point>,
    /// Vendor route extension waypoints, or `None` when the route carried no
    /// usable extension block.
    pub extensions: Option<Vec<RouteExtensionWaypoint>>,
}

/// A contiguous run of track points.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Segment {
    pub points: Vec<Point>,
}

impl Segment {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }
}

/// A recorded or finalized path.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Track {
    pub name: Option<String>,
    pub description: Option<String>,
    pub segments: Vec<Segment>,
}

impl Track {
    /// All points of all segments, in order.
    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.segments.iter().flat_map(|s| s.points.iter())
    }
}

/// Document-level descriptive fields.
///
/// Populated from a GPX 1.1 `<metadata>` block when present, otherwise from
/// the GPX 1.0 children of the root element.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Metadata {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Always a plain string, even when the source nested it in a person
    /// element.
    pub author: Option<String>,
    pub time: Option<String>,
}

/// The contents of one GPX file.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GpxDocument {
    pub version: GpxVersion,
    pub metadata: Metadata,
    pub waypoints: Vec<Waypoint>,
    pub routes: Vec<Route>,
    pub tracks: Vec<Track>,
}

impl GpxDocument {
    /// Whether the document has no waypoints, routes or tracks at all.
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty() && self.routes.is_empty() && self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{GpxDocument, GpxVersion, Point, Segment, Track, Waypoint};

    #[test]
    fn test_version_strings() {
        assert_eq!(GpxVersion::from_str("1.1").ok(), Some(GpxVersion::V1_1));
        assert_eq!(GpxVersion::from_str("1.0").ok(), Some(GpxVersion::V1_0));
        assert!(GpxVersion::from_str("2.0").is_err());
        assert_eq!(GpxVersion::V1_1.to_string(), "1.1");
        assert_eq!(GpxVersion::default(), GpxVersion::V1_0);
    }

    #[test]
    fn test_track_points_span_segments() {
        let track = Track {
            segments: vec![
                Segment::new(vec![Point::new(1.0, 1.0), Point::new(1.0, 2.0)]),
                Segment::new(vec![Point::new(2.0, 1.0)]),
            ],
            ..Default::default()
        };
        let lats = track.points().map(|p| p.lat).collect::<Vec<_>>();
        assert_eq!(lats, vec![1.0, 1.0, 2.0]);
    }

    #[test]
    fn test_is_empty() {
        let mut doc = GpxDocument::default();
        assert!(doc.is_empty());
        doc.waypoints.push(Waypoint::new(1.0, 2.0).with_name("Fuel"));
        assert!(!doc.is_empty());
    }
}
