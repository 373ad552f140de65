//! Plain-text reports for the command line

use std::fmt::{Display, Write};

use dimensioned::f64prefixes::KILO;
use dimensioned::si::{M, Meter};

use crate::Result;
use crate::document::GpxDocument;
use crate::geographic::DocumentMetrics;
use crate::library::{IngestOutcome, LibraryStore};
use crate::validation::ValidationReport;

fn km_to_meters(km: f64) -> Meter<f64> {
    km * KILO * M
}

/// Formats a riding time as hours and minutes.
pub fn format_riding_time(hours: f64) -> String {
    if !hours.is_finite() || hours < 0.0 {
        return "unknown".to_owned();
    }
    let minutes = (hours * 60.0).round() as u64;
    format!("{} h {:02} min", minutes / 60, minutes % 60)
}

/// Summarize a batch import, one line per file.
///
/// Distances are shown in the display unit `T`.
pub fn import_report<T, S>(outcome: &IngestOutcome, store: &S) -> Result<String>
where
    T: From<Meter<f64>> + Display,
    S: LibraryStore + ?Sized,
{
    let mut r = String::new();
    for success in &outcome.success {
        let file = store.gpx_file(success.id)?;
        let tracks = store.tracks(success.id)?;
        writeln!(
            &mut r,
            "Imported {} as \"{}\" (id {})",
            success.file, file.name, success.id
        )?;
        writeln!(
            &mut r,
            "  {} tracks, {} waypoints, {}, about {}",
            tracks.len(),
            file.waypoint_count,
            T::from(km_to_meters(file.length_km)),
            format_riding_time(file.riding_time_hours)
        )?;
    }

    for failure in &outcome.errors {
        writeln!(&mut r, "Failed {}: {}", failure.file, failure.error)?;
    }

    writeln!(
        &mut r,
        "\n{} imported, {} failed",
        outcome.success.len(),
        outcome.errors.len()
    )?;
    Ok(r)
}

/// Describe a single parsed document.
pub fn inspect_report<T>(
    doc: &GpxDocument,
    validation: &ValidationReport,
    metrics: &DocumentMetrics,
) -> Result<String>
where
    T: From<Meter<f64>> + Display,
{
    let mut r = String::new();
    writeln!(&mut r, "GPX version {}", doc.version)?;
    if let Some(name) = &doc.metadata.name {
        writeln!(&mut r, "Name: {name}")?;
    }
    if let Some(author) = &doc.metadata.author {
        writeln!(&mut r, "Author: {author}")?;
    }
    writeln!(
        &mut r,
        "{} waypoints, {} routes, {} tracks",
        doc.waypoints.len(),
        doc.routes.len(),
        doc.tracks.len()
    )?;

    if validation.valid {
        writeln!(&mut r, "Valid")?;
    } else {
        writeln!(&mut r, "Invalid:")?;
        for e in &validation.errors {
            writeln!(&mut r, "  {e}")?;
        }
    }

    writeln!(
        &mut r,
        "Length: {}, riding time about {}",
        T::from(km_to_meters(metrics.length_km)),
        format_riding_time(metrics.riding_time_hours)
    )?;
    Ok(r)
}
