//! Road routing contract and straight-line fallback
//!
//! Turning a planned route into a road-following path needs an external
//! routing service, which this crate doesn't bundle. Instead it defines the
//! [`Router`] trait such a backend implements, and [`preview_route`], which
//! asks a router for a path and falls back to straight lines between the
//! route points whenever the router can't deliver one.
//!
//! Only [`Strategy::Road`] corresponds to a real routing profile of a public
//! driving router. The other strategies are accepted everywhere and change
//! the riding time estimate, but a backend may route them all like `Road`.

use std::time::Duration;

use dimensioned::f64prefixes::KILO;
use dimensioned::si::{HR, M, Meter, MeterPerSecond, Second};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::document::{Point, Route, Segment, Track};
use crate::geographic::path_length_km;
use crate::types::{Coordinate, HasCoordinate};

/// How long a routing request may take before it counts as failed.
pub const DEFAULT_ROUTING_TIMEOUT: Duration = Duration::from_secs(30);

/// Routing preference for a motorcycle route.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter, Debug)]
#[strum(serialize_all = "kebab-case")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[cfg_attr(feature = "cli", clap(rename_all = "kebab-case"))]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum Strategy {
    /// Any motorcycle-suitable road
    #[default]
    Road,
    /// Any road except motorways
    #[strum(to_string = "road-no-motorway")]
    #[cfg_attr(feature = "cli", value(name = "road-no-motorway"))]
    #[cfg_attr(feature = "serde", serde(rename = "road-no-motorway"))]
    RoadAvoidMotorway,
    /// Scenic roads with many curves
    Curvy,
    /// Like `Curvy`, including unpaved roads
    PreferUnpaved,
}

impl Strategy {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Road => "Road",
            Self::RoadAvoidMotorway => "Road - Avoid Motorway",
            Self::Curvy => "Curvy",
            Self::PreferUnpaved => "Prefer Unpaved",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Road => "Allows any motorcycle-suitable road, fastest route",
            Self::RoadAvoidMotorway => "Fastest route avoiding motorways",
            Self::Curvy => "Scenic route with many curves, avoiding cities",
            Self::PreferUnpaved => "Like Curvy but includes unpaved roads",
        }
    }

    /// Average speed assumed for riding time estimates, in km/h.
    pub fn speed_kmh(self) -> f64 {
        match self {
            Self::Road => 80.0,
            Self::RoadAvoidMotorway => 70.0,
            Self::Curvy => 60.0,
            Self::PreferUnpaved => 50.0,
        }
    }

    pub fn speed(self) -> MeterPerSecond<f64> {
        self.speed_kmh() * KILO * M / HR
    }
}

/// Estimate riding time over a distance at a strategy's average speed.
pub fn estimate_riding_time(distance: Meter<f64>, strategy: Strategy) -> Second<f64> {
    distance / strategy.speed()
}

/// Straight-line length of a path through the given points.
pub fn straight_line_distance<P, I>(points: I) -> Meter<f64>
where
    P: HasCoordinate,
    I: IntoIterator<Item = P>,
{
    path_length_km(points) * KILO * M
}

/// A request for a road-following path.
#[derive(Clone, PartialEq, Debug)]
pub struct RouteRequest {
    pub waypoints: Vec<Coordinate>,
    pub strategy: Strategy,
    /// After this long, the backend should give up and report
    /// [`RoutingError::Timeout`].
    pub timeout: Duration,
}

impl RouteRequest {
    pub fn new(waypoints: Vec<Coordinate>, strategy: Strategy) -> Self {
        Self {
            waypoints,
            strategy,
            timeout: DEFAULT_ROUTING_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A path produced by a routing backend.
#[derive(Clone, PartialEq, Debug)]
pub struct RoutedPath {
    pub coordinates: Vec<Coordinate>,
    pub distance: Meter<f64>,
    pub duration: Second<f64>,
}

#[derive(Error, Clone, PartialEq, Debug)]
pub enum RoutingError {
    #[error("At least 2 waypoints are required for routing (got {0})")]
    TooFewWaypoints(usize),
    #[error("Routing failed: {0}")]
    Unreachable(String),
    #[error("Routing timed out after {0:?}")]
    Timeout(Duration),
    #[error("No route found")]
    NoRoute,
}

pub type Result<T> = std::result::Result<T, RoutingError>;

/// A routing backend.
pub trait Router {
    /// Compute a road-following path through the request's waypoints, in
    /// order.
    fn calculate_route(&self, request: &RouteRequest) -> Result<RoutedPath>;

    /// Reject requests no backend could satisfy.
    fn validate_request(&self, request: &RouteRequest) -> Result<()> {
        if request.waypoints.len() < 2 {
            return Err(RoutingError::TooFewWaypoints(request.waypoints.len()));
        }
        Ok(())
    }
}

impl<R: Router + ?Sized> Router for &R {
    fn calculate_route(&self, request: &RouteRequest) -> Result<RoutedPath> {
        (**self).calculate_route(request)
    }

    fn validate_request(&self, request: &RouteRequest) -> Result<()> {
        (**self).validate_request(request)
    }
}

/// A router that connects the waypoints with straight lines.
///
/// Never fails for valid requests. Useful offline, and as the reference for
/// what a fallback preview contains.
#[derive(Clone, Copy, Default, Debug)]
pub struct StraightLineRouter;

impl Router for StraightLineRouter {
    fn calculate_route(&self, request: &RouteRequest) -> Result<RoutedPath> {
        self.validate_request(request)?;
        let distance = straight_line_distance(&request.waypoints);
        Ok(RoutedPath {
            coordinates: request.waypoints.clone(),
            distance,
            duration: estimate_riding_time(distance, request.strategy),
        })
    }
}

/// Options for [`preview_route`].
#[derive(Clone, Debug)]
pub struct PreviewOptions {
    pub timeout: Duration,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ROUTING_TIMEOUT,
        }
    }
}

impl PreviewOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A path to draw for a route.
#[derive(Clone, PartialEq, Debug)]
pub struct RoutePreview {
    pub coordinates: Vec<Coordinate>,
    pub distance: Meter<f64>,
    pub duration: Second<f64>,
    /// Whether this is the straight-line fallback rather than a routed path.
    pub fallback: bool,
    /// Why routing failed, for fallback previews.
    pub reason: Option<RoutingError>,
}

impl RoutePreview {
    /// The straight line through a route's points.
    ///
    /// Its duration comes from the strategy's riding time estimate, never
    /// from a routing service.
    pub fn straight_line(points: &[Point], strategy: Strategy, reason: RoutingError) -> Self {
        let coordinates = points.iter().map(|p| p.coordinate()).collect::<Vec<_>>();
        let distance = straight_line_distance(&coordinates);
        Self {
            coordinates,
            distance,
            duration: estimate_riding_time(distance, strategy),
            fallback: true,
            reason: Some(reason),
        }
    }
}

/// Route a planned route's points, falling back to straight lines.
///
/// Routing failures never escape; they are reported through
/// [`RoutePreview::reason`].
#[instrument(level = "debug", skip_all, fields(strategy = %strategy))]
pub fn preview_route<R: Router + ?Sized>(
    router: &R,
    route: &Route,
    strategy: Strategy,
    options: &PreviewOptions,
) -> RoutePreview {
    let request = RouteRequest::new(
        route.points.iter().map(|p| p.coordinate()).collect(),
        strategy,
    )
    .with_timeout(options.timeout);

    let result = router
        .validate_request(&request)
        .and_then(|_| router.calculate_route(&request));
    match result {
        Ok(path) => {
            debug!(
                "Routed {} waypoints into {} coordinates",
                request.waypoints.len(),
                path.coordinates.len()
            );
            RoutePreview {
                coordinates: path.coordinates,
                distance: path.distance,
                duration: path.duration,
                fallback: false,
                reason: None,
            }
        }
        Err(e) => {
            warn!("Routing failed, falling back to straight lines: {}", e);
            RoutePreview::straight_line(&route.points, strategy, e)
        }
    }
}

/// A track following a routed preview, to replace a route's stored track.
///
/// `None` for fallback previews: a straight line is not a routed path.
pub fn routed_track(preview: &RoutePreview, route: &Route) -> Option<Track> {
    if preview.fallback {
        return None;
    }
    Some(Track {
        name: route.name.clone(),
        description: route.description.clone(),
        segments: vec![Segment::new(
            preview.coordinates.iter().copied().map(Point::from).collect(),
        )],
    })
}
