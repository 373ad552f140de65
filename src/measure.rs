//! Display units for distances
//!
//! Distances are kept in SI [`Meter`]s internally. These wrappers only
//! exist to print a distance in the unit a user asked for.

use std::fmt::{Display, Formatter};

use dimensioned::f64prefixes::KILO;
use dimensioned::si::{M, Meter};

/// Meters per international mile.
const METERS_PER_MILE: f64 = 1609.344;

#[derive(Clone, Copy, PartialEq, PartialOrd, Default, Debug)]
pub struct Kilometer<T>(pub T);

#[derive(Clone, Copy, PartialEq, PartialOrd, Default, Debug)]
pub struct Mile<T>(pub T);

impl From<Meter<f64>> for Kilometer<f64> {
    fn from(value: Meter<f64>) -> Self {
        Kilometer((value / (KILO * M)).value_unsafe)
    }
}

impl From<Meter<f64>> for Mile<f64> {
    fn from(value: Meter<f64>) -> Self {
        Mile((value / (METERS_PER_MILE * M)).value_unsafe)
    }
}

impl Display for Kilometer<f64> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} km", self.0)
    }
}

impl Display for Mile<f64> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} mi", self.0)
    }
}

/// Meters, rounded for display.
#[derive(Clone, Copy, PartialEq, PartialOrd, Default, Debug)]
pub struct WholeMeter<T>(pub T);

impl From<Meter<f64>> for WholeMeter<f64> {
    fn from(value: Meter<f64>) -> Self {
        WholeMeter(value.value_unsafe)
    }
}

impl Display for WholeMeter<f64> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.0} m", self.0)
    }
}
