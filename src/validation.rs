//! Structural checks on a parsed document
//!
//! Validation never fails: problems are collected into a
//! [`ValidationReport`] so that a caller can present all of them at once.

use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::debug;

use crate::document::GpxDocument;

/// The outcome of [`validate`].
#[derive(Clone, PartialEq, Eq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ValidationReport {
    pub valid: bool,
    /// Human-readable problems, using 1-based route, track and segment
    /// numbers.
    pub errors: Vec<String>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            write!(f, "valid")
        } else {
            write!(f, "{}", self.errors.join(", "))
        }
    }
}

/// Checks that a document has content and that its routes and tracks have
/// enough points to describe a path.
pub fn validate(doc: &GpxDocument) -> ValidationReport {
    let mut errors = Vec::new();

    if doc.is_empty() {
        errors.push("GPX file must contain at least one waypoint, route, or track".to_owned());
    }

    for (i, route) in doc.routes.iter().enumerate() {
        if route.points.len() < 2 {
            errors.push(format!("Route {} must have at least 2 points", i + 1));
        }
    }

    for (i, track) in doc.tracks.iter().enumerate() {
        if track.segments.is_empty() {
            errors.push(format!("Track {} must have at least one segment", i + 1));
        }
        for (j, segment) in track.segments.iter().enumerate() {
            if segment.points.len() < 2 {
                errors.push(format!(
                    "Track {}, segment {} must have at least 2 points",
                    i + 1,
                    j + 1
                ));
            }
        }
    }

    if !errors.is_empty() {
        debug!("Document failed validation: {:?}", errors);
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}
