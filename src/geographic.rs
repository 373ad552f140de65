//! Great-circle distances and derived metrics
//!
//! Distances use the haversine formula on a sphere of radius
//! [`EARTH_RADIUS_KM`].

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::document::{GpxDocument, Route, Track};
use crate::types::HasCoordinate;

/// Mean Earth radius used by [`distance_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Cruising speed assumed when estimating the riding time of a stored file.
///
/// Independent of the per-strategy speeds used for routed
/// previews; see [`crate::routing::Strategy::speed`].
pub const DEFAULT_CRUISING_SPEED_KMH: f64 = 50.0;

/// Great-circle distance between two points, in kilometers.
pub fn distance_km<A, B>(a: &A, b: &B) -> f64
where
    A: HasCoordinate + ?Sized,
    B: HasCoordinate + ?Sized,
{
    let a = a.coordinate();
    let b = b.coordinate();

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h just past 1 for antipodal points.
    let h = h.min(1.0);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Sum of the distances between consecutive points, in kilometers.
///
/// Zero for fewer than two points.
pub fn path_length_km<P, I>(points: I) -> f64
where
    P: HasCoordinate,
    I: IntoIterator<Item = P>,
{
    let mut iter = points.into_iter();
    let Some(mut prev) = iter.next() else {
        return 0.0;
    };
    let mut total = 0.0;
    for p in iter {
        total += distance_km(&prev, &p);
        prev = p;
    }
    total
}

pub fn route_length_km(route: &Route) -> f64 {
    path_length_km(&route.points)
}

/// Length of a track, summing each segment separately.
///
/// Gaps between segments don't count toward the length.
pub fn track_length_km(track: &Track) -> f64 {
    track
        .segments
        .iter()
        .map(|s| path_length_km(&s.points))
        .sum()
}

/// Combined length of every track segment and every route in a document.
pub fn document_length_km(doc: &GpxDocument) -> f64 {
    let tracks: f64 = doc.tracks.iter().map(track_length_km).sum();
    let routes: f64 = doc.routes.iter().map(route_length_km).sum();
    tracks + routes
}

pub fn estimate_riding_time_hours(length_km: f64, speed_kmh: f64) -> f64 {
    length_km / speed_kmh
}

/// The metrics persisted alongside a stored GPX file.
#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct DocumentMetrics {
    pub length_km: f64,
    pub waypoint_count: usize,
    pub riding_time_hours: f64,
}

impl DocumentMetrics {
    pub fn from_document(doc: &GpxDocument) -> Self {
        Self::from_document_with_speed(doc, DEFAULT_CRUISING_SPEED_KMH)
    }

    pub fn from_document_with_speed(doc: &GpxDocument, speed_kmh: f64) -> Self {
        let length_km = document_length_km(doc);
        Self {
            length_km,
            waypoint_count: doc.waypoints.len(),
            riding_time_hours: estimate_riding_time_hours(length_km, speed_kmh),
        }
    }
}
