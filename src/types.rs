use approx::{AbsDiffEq, RelativeEq, abs_diff_eq, relative_eq};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A position on the Earth's surface in decimal degrees.
///
/// Latitude and longitude are kept as parsed; out-of-range values are not
/// rejected. Use [`Coordinate::in_range`] to check.
#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both components lie within their nominal ranges.
    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Anything that has a position.
///
/// Lets the geodesic functions measure waypoints, route points and raw
/// coordinates alike.
pub trait HasCoordinate {
    fn coordinate(&self) -> Coordinate;
}

impl HasCoordinate for Coordinate {
    fn coordinate(&self) -> Coordinate {
        *self
    }
}

impl<T: HasCoordinate> HasCoordinate for &T {
    fn coordinate(&self) -> Coordinate {
        (*self).coordinate()
    }
}

impl AbsDiffEq for Coordinate {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        abs_diff_eq!(self.lat, other.lat, epsilon = epsilon)
            && abs_diff_eq!(self.lon, other.lon, epsilon = epsilon)
    }
}

impl RelativeEq for Coordinate {
    fn default_max_relative() -> Self::Epsilon {
        0.000_000_000_000_001
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        relative_eq!(
            self.lat,
            other.lat,
            epsilon = epsilon,
            max_relative = max_relative
        ) && relative_eq!(
            self.lon,
            other.lon,
            epsilon = epsilon,
            max_relative = max_relative
        )
    }
}

/// Instantiate a `Coordinate` with a tuple-like syntax.
#[macro_export]
macro_rules! coordinate {
    ( $lat:expr, $lon:expr ) => {
        $crate::types::Coordinate::new($lat, $lon)
    };
}

/// Instantiate a vec of `Coordinate` with tuple-like syntax.
#[macro_export]
macro_rules! coordinates {
    ( $( ( $lat:expr, $lon:expr $(,)? ) ),* $(,)? ) => {
        vec![ $( $crate::coordinate!($lat, $lon) ),* ]
    };
}
