//! A library and CLI for normalizing GPX files in a motorcycle route library.
//!
//! GPX files from route planners, navigation devices and recording apps
//! differ wildly: GPX 1.0 or 1.1, routes or tracks, waypoints tucked away in
//! vendor extensions. This crate parses any of them into a [`GpxDocument`],
//! rewrites it into one canonical GPX 1.0 form, and computes the metrics a
//! route library shows for each file (length, riding time, waypoint count).
//!
//! See [`normalize_gpx`] for the one-shot conversion, and
//! [`library::ingest_batch`] for the full upload pipeline, which also
//! validates files and stores them through a [`library::LibraryStore`].
//!
//! Turning planned routes into road-following tracks needs a routing service;
//! the [`routing`] module defines the contract such a service implements and
//! the straight-line fallback used when it fails.
//!
//! # Feature flags
//!
//! - `cli` enables the additional dependencies needed by the CLI
//! - `rayon` (default) prepares files of a batch import in parallel
//! - `serde` derives `Serialize`/`Deserialize` for the document model

pub mod document;
pub mod geographic;
pub mod gpx;
pub mod library;
pub mod measure;
pub mod normalize;
pub mod report;
pub mod routing;
pub mod types;
pub mod validation;

pub use document::GpxDocument;
pub use geographic::DocumentMetrics;
pub use gpx::{GpxError, parse};
pub use normalize::{NormalizeError, normalize};
use thiserror::Error;
use tracing::instrument;
pub use types::Coordinate;
pub use validation::{ValidationReport, validate};

use crate::library::{IngestError, StoreError};
use crate::routing::RoutingError;

#[derive(Error, Debug)]
pub enum MotoGpxError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("GPX processing error")]
    Gpx(#[from] GpxError),
    #[error("GPX normalization error")]
    Normalize(#[from] NormalizeError),
    #[error("Routing error")]
    Routing(#[from] RoutingError),
    #[error("Storage error")]
    Store(#[from] StoreError),
    #[error("Import error")]
    Ingest(#[from] IngestError),
    #[error("Report formatting error")]
    Fmt(#[from] std::fmt::Error),
}

pub type Result<T> = std::result::Result<T, MotoGpxError>;

/// The result of [`normalize_gpx`].
#[derive(Clone, Debug)]
pub struct NormalizedGpx {
    /// Canonical GPX 1.0 text.
    pub content: String,
    /// The canonical text, parsed again.
    pub document: GpxDocument,
    /// Metrics of the canonical document.
    pub metrics: DocumentMetrics,
    /// Validation of the input document.
    pub validation: ValidationReport,
}

/// Normalize GPX text into canonical GPX 1.0.
///
/// Invalid documents are still normalized; check
/// [`NormalizedGpx::validation`] before storing the result.
#[instrument(level = "trace", skip_all)]
pub fn normalize_gpx(xml: &str) -> Result<NormalizedGpx> {
    let input = parse(xml)?;
    let validation = validate(&input);
    let content = normalize(&input)?;
    let document = parse(&content)?;
    let metrics = DocumentMetrics::from_document(&document);
    Ok(NormalizedGpx {
        content,
        document,
        metrics,
        validation,
    })
}
