//! Importing GPX files into a route library
//!
//! # Pipeline
//!
//! Each uploaded file goes through the same strictly ordered steps:
//!
//! 1. Reject it if it's larger than [`IngestOptions::max_file_size`].
//! 2. Parse and validate it.
//! 3. Normalize it to canonical GPX 1.0 and parse the result again.
//! 4. Compute metrics from the re-parsed canonical document.
//! 5. Persist the canonical text and its routes, tracks and waypoints through
//!    a [`LibraryStore`].
//!
//! Persisted rows always describe the canonical document, so a track that the
//! normalizer synthesized from a route is stored as a track.
//!
//! [`ingest_batch`] runs this for many files. A failing file never prevents
//! the others from being stored; each failure is reported with its reason.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::str::{self, Utf8Error};

use chrono::{DateTime, Utc};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::document::GpxDocument;
use crate::geographic::{
    DEFAULT_CRUISING_SPEED_KMH, DocumentMetrics, estimate_riding_time_hours, route_length_km,
    track_length_km,
};
use crate::gpx::{GpxError, parse};
use crate::normalize::{NormalizeError, NormalizeOptions, normalize_with};
use crate::validation::{ValidationReport, validate};

/// Row identifier assigned by a store.
pub type RecordId = i64;

/// Uploads larger than this are rejected.
pub const DEFAULT_MAX_FILE_SIZE: usize = 20 * 1024 * 1024;

pub const UNNAMED_ROUTE: &str = "Unnamed Route";
pub const UNNAMED_TRACK: &str = "Unnamed Track";
pub const UNNAMED_WAYPOINT: &str = "Waypoint";

#[derive(Clone, PartialEq, Debug)]
pub struct FolderRecord {
    pub id: RecordId,
    pub name: String,
    pub parent_id: Option<RecordId>,
    pub created_at: DateTime<Utc>,
}

/// A stored GPX file: canonical text plus its metrics.
#[derive(Clone, PartialEq, Debug)]
pub struct GpxFileRecord {
    pub id: RecordId,
    pub name: String,
    pub folder_id: Option<RecordId>,
    pub content: String,
    pub length_km: f64,
    pub waypoint_count: usize,
    pub riding_time_hours: f64,
    pub created_at: DateTime<Utc>,
}

/// A GPX file about to be stored; the store assigns its id and timestamp.
#[derive(Clone, PartialEq, Debug)]
pub struct NewGpxFile {
    pub name: String,
    pub folder_id: Option<RecordId>,
    pub content: String,
    pub metrics: DocumentMetrics,
}

#[derive(Clone, PartialEq, Debug)]
pub struct RouteRecord {
    pub gpx_file_id: RecordId,
    /// Position of the route among its file's routes, from zero.
    pub index_in_gpx: usize,
    pub name: String,
    pub length_km: f64,
    pub riding_time_hours: f64,
}

#[derive(Clone, PartialEq, Debug)]
pub struct TrackRecord {
    pub gpx_file_id: RecordId,
    pub index_in_gpx: usize,
    pub name: String,
    pub length_km: f64,
    pub riding_time_hours: f64,
}

#[derive(Clone, PartialEq, Debug)]
pub struct WaypointRecord {
    pub gpx_file_id: RecordId,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Error, Clone, PartialEq, Debug)]
pub enum StoreError {
    #[error("Folder {0} does not exist")]
    MissingFolder(RecordId),
    #[error("GPX file {0} does not exist")]
    MissingGpxFile(RecordId),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// The row-level capability the ingest pipeline needs from persistent
/// storage.
///
/// Child rows reference their GPX file, and deleting a file deletes them too.
pub trait LibraryStore {
    fn create_folder(
        &mut self,
        name: &str,
        parent_id: Option<RecordId>,
    ) -> Result<RecordId, StoreError>;

    fn insert_gpx_file(&mut self, file: NewGpxFile) -> Result<RecordId, StoreError>;

    fn insert_route(&mut self, route: RouteRecord) -> Result<(), StoreError>;

    fn insert_track(&mut self, track: TrackRecord) -> Result<(), StoreError>;

    fn insert_waypoint(&mut self, waypoint: WaypointRecord) -> Result<(), StoreError>;

    /// Delete a GPX file along with its routes, tracks and waypoints.
    fn delete_gpx_file(&mut self, id: RecordId) -> Result<(), StoreError>;

    fn gpx_file(&self, id: RecordId) -> Result<GpxFileRecord, StoreError>;

    /// Files directly inside a folder, or at the top level for `None`.
    fn gpx_files_in(&self, folder_id: Option<RecordId>) -> Result<Vec<GpxFileRecord>, StoreError>;

    fn routes(&self, gpx_file_id: RecordId) -> Result<Vec<RouteRecord>, StoreError>;

    fn tracks(&self, gpx_file_id: RecordId) -> Result<Vec<TrackRecord>, StoreError>;

    fn waypoints(&self, gpx_file_id: RecordId) -> Result<Vec<WaypointRecord>, StoreError>;
}

/// A [`LibraryStore`] that keeps everything in memory.
#[derive(Clone, Default, Debug)]
pub struct MemoryStore {
    next_id: RecordId,
    folders: BTreeMap<RecordId, FolderRecord>,
    files: BTreeMap<RecordId, GpxFileRecord>,
    routes: Vec<RouteRecord>,
    tracks: Vec<TrackRecord>,
    waypoints: Vec<WaypointRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }

    fn check_file(&self, id: RecordId) -> Result<(), StoreError> {
        if self.files.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::MissingGpxFile(id))
        }
    }

    fn check_folder(&self, id: Option<RecordId>) -> Result<(), StoreError> {
        match id {
            Some(id) if !self.folders.contains_key(&id) => Err(StoreError::MissingFolder(id)),
            _ => Ok(()),
        }
    }

    pub fn folders(&self) -> impl Iterator<Item = &FolderRecord> {
        self.folders.values()
    }

    pub fn gpx_files(&self) -> impl Iterator<Item = &GpxFileRecord> {
        self.files.values()
    }
}

impl LibraryStore for MemoryStore {
    fn create_folder(
        &mut self,
        name: &str,
        parent_id: Option<RecordId>,
    ) -> Result<RecordId, StoreError> {
        self.check_folder(parent_id)?;
        let id = self.allocate_id();
        self.folders.insert(
            id,
            FolderRecord {
                id,
                name: name.to_owned(),
                parent_id,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    fn insert_gpx_file(&mut self, file: NewGpxFile) -> Result<RecordId, StoreError> {
        self.check_folder(file.folder_id)?;
        let id = self.allocate_id();
        self.files.insert(
            id,
            GpxFileRecord {
                id,
                name: file.name,
                folder_id: file.folder_id,
                content: file.content,
                length_km: file.metrics.length_km,
                waypoint_count: file.metrics.waypoint_count,
                riding_time_hours: file.metrics.riding_time_hours,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    fn insert_route(&mut self, route: RouteRecord) -> Result<(), StoreError> {
        self.check_file(route.gpx_file_id)?;
        self.routes.push(route);
        Ok(())
    }

    fn insert_track(&mut self, track: TrackRecord) -> Result<(), StoreError> {
        self.check_file(track.gpx_file_id)?;
        self.tracks.push(track);
        Ok(())
    }

    fn insert_waypoint(&mut self, waypoint: WaypointRecord) -> Result<(), StoreError> {
        self.check_file(waypoint.gpx_file_id)?;
        self.waypoints.push(waypoint);
        Ok(())
    }

    fn delete_gpx_file(&mut self, id: RecordId) -> Result<(), StoreError> {
        self.files
            .remove(&id)
            .ok_or(StoreError::MissingGpxFile(id))?;
        self.routes.retain(|r| r.gpx_file_id != id);
        self.tracks.retain(|t| t.gpx_file_id != id);
        self.waypoints.retain(|w| w.gpx_file_id != id);
        Ok(())
    }

    fn gpx_file(&self, id: RecordId) -> Result<GpxFileRecord, StoreError> {
        self.files
            .get(&id)
            .cloned()
            .ok_or(StoreError::MissingGpxFile(id))
    }

    fn gpx_files_in(&self, folder_id: Option<RecordId>) -> Result<Vec<GpxFileRecord>, StoreError> {
        self.check_folder(folder_id)?;
        Ok(self
            .files
            .values()
            .filter(|f| f.folder_id == folder_id)
            .cloned()
            .collect())
    }

    fn routes(&self, gpx_file_id: RecordId) -> Result<Vec<RouteRecord>, StoreError> {
        self.check_file(gpx_file_id)?;
        Ok(self
            .routes
            .iter()
            .filter(|r| r.gpx_file_id == gpx_file_id)
            .cloned()
            .collect())
    }

    fn tracks(&self, gpx_file_id: RecordId) -> Result<Vec<TrackRecord>, StoreError> {
        self.check_file(gpx_file_id)?;
        Ok(self
            .tracks
            .iter()
            .filter(|t| t.gpx_file_id == gpx_file_id)
            .cloned()
            .collect())
    }

    fn waypoints(&self, gpx_file_id: RecordId) -> Result<Vec<WaypointRecord>, StoreError> {
        self.check_file(gpx_file_id)?;
        Ok(self
            .waypoints
            .iter()
            .filter(|w| w.gpx_file_id == gpx_file_id)
            .cloned()
            .collect())
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("File size exceeds {} limit", format_size_limit(.limit))]
    TooLarge { size: usize, limit: usize },
    #[error("Reading file failed: {0}")]
    Io(#[from] io::Error),
    #[error("File is not valid UTF-8 text")]
    Encoding(#[from] Utf8Error),
    #[error("Invalid GPX file: {0}")]
    Parse(#[from] GpxError),
    #[error("{0}")]
    Invalid(ValidationReport),
    #[error("Normalizing GPX failed")]
    Normalize(#[from] NormalizeError),
    #[error("Normalized GPX could not be read back: {0}")]
    Reparse(GpxError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

const MIB: usize = 1024 * 1024;

fn format_size_limit(limit: &usize) -> String {
    if *limit >= MIB && limit % MIB == 0 {
        format!("{}MB", limit / MIB)
    } else {
        format!("{limit} byte")
    }
}

/// Options for [`ingest_file`] and [`ingest_batch`].
#[derive(Clone, Debug)]
pub struct IngestOptions {
    /// Maximum accepted file size in bytes.
    pub max_file_size: usize,
    /// Speed used for the riding time of stored files, routes and tracks.
    pub cruising_speed_kmh: f64,
    pub normalize: NormalizeOptions,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            cruising_speed_kmh: DEFAULT_CRUISING_SPEED_KMH,
            normalize: NormalizeOptions::default(),
        }
    }
}

impl IngestOptions {
    pub fn with_max_file_size(mut self, max_file_size: usize) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_cruising_speed_kmh(mut self, speed: f64) -> Self {
        self.cruising_speed_kmh = speed;
        self
    }

    pub fn with_normalize_options(mut self, normalize: NormalizeOptions) -> Self {
        self.normalize = normalize;
        self
    }
}

/// An uploaded file: its original file name and raw bytes.
#[derive(Clone, PartialEq, Debug)]
pub struct SourceFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// The name a file is reported under: its file name, or the whole path
/// when it has none.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn check_size(size: usize, options: &IngestOptions) -> Result<(), IngestError> {
    if size > options.max_file_size {
        return Err(IngestError::TooLarge {
            size,
            limit: options.max_file_size,
        });
    }
    Ok(())
}

/// Read an upload from disk.
///
/// The size limit is checked against the file's metadata before any of it
/// is read.
pub fn read_source_file(path: &Path, options: &IngestOptions) -> Result<SourceFile, IngestError> {
    let size = usize::try_from(fs::metadata(path)?.len()).unwrap_or(usize::MAX);
    check_size(size, options)?;
    Ok(SourceFile::new(source_name(path), fs::read(path)?))
}

/// A file that made it through parsing and normalization, ready to persist.
#[derive(Clone, PartialEq, Debug)]
pub struct PreparedFile {
    /// Name to store, without the `.gpx` extension.
    pub name: String,
    /// Canonical GPX text.
    pub content: String,
    /// The canonical text, parsed.
    pub document: GpxDocument,
    pub metrics: DocumentMetrics,
}

/// Strips a trailing `.gpx`, in any letter case.
pub fn stored_name(file_name: &str) -> &str {
    let Some(split) = file_name.len().checked_sub(4) else {
        return file_name;
    };
    match (file_name.get(..split), file_name.get(split..)) {
        (Some(stem), Some(ext)) if ext.eq_ignore_ascii_case(".gpx") => stem,
        _ => file_name,
    }
}

/// Run every step of the pipeline that doesn't touch the store.
#[instrument(level = "debug", skip_all, fields(file = %file.name))]
pub fn prepare_file(file: &SourceFile, options: &IngestOptions) -> Result<PreparedFile, IngestError> {
    check_size(file.content.len(), options)?;

    let text = str::from_utf8(&file.content)?;
    let document = parse(text)?;

    let report = validate(&document);
    if !report.valid {
        return Err(IngestError::Invalid(report));
    }

    let content = normalize_with(&document, &options.normalize)?;
    debug!("Normalized content length: {}", content.len());
    let document = parse(&content).map_err(IngestError::Reparse)?;
    let metrics = DocumentMetrics::from_document_with_speed(&document, options.cruising_speed_kmh);

    Ok(PreparedFile {
        name: stored_name(&file.name).to_owned(),
        content,
        document,
        metrics,
    })
}

/// Store a prepared file and its child rows, returning the new file's id.
///
/// If a child row can't be written, the partially stored file is deleted
/// again before the error is returned.
pub fn persist_file<S: LibraryStore + ?Sized>(
    store: &mut S,
    prepared: PreparedFile,
    folder_id: Option<RecordId>,
    options: &IngestOptions,
) -> Result<RecordId, IngestError> {
    let id = store.insert_gpx_file(NewGpxFile {
        name: prepared.name,
        folder_id,
        content: prepared.content,
        metrics: prepared.metrics,
    })?;

    if let Err(e) = persist_children(store, id, &prepared.document, options) {
        if let Err(cleanup) = store.delete_gpx_file(id) {
            warn!("Failed to remove partially stored GPX file {}: {}", id, cleanup);
        }
        return Err(e.into());
    }
    Ok(id)
}

fn persist_children<S: LibraryStore + ?Sized>(
    store: &mut S,
    gpx_file_id: RecordId,
    doc: &GpxDocument,
    options: &IngestOptions,
) -> Result<(), StoreError> {
    let speed = options.cruising_speed_kmh;

    for (index_in_gpx, route) in doc.routes.iter().enumerate() {
        let length_km = route_length_km(route);
        store.insert_route(RouteRecord {
            gpx_file_id,
            index_in_gpx,
            name: route
                .name
                .clone()
                .unwrap_or_else(|| UNNAMED_ROUTE.to_owned()),
            length_km,
            riding_time_hours: estimate_riding_time_hours(length_km, speed),
        })?;
    }

    for (index_in_gpx, track) in doc.tracks.iter().enumerate() {
        let length_km = track_length_km(track);
        store.insert_track(TrackRecord {
            gpx_file_id,
            index_in_gpx,
            name: track
                .name
                .clone()
                .unwrap_or_else(|| UNNAMED_TRACK.to_owned()),
            length_km,
            riding_time_hours: estimate_riding_time_hours(length_km, speed),
        })?;
    }

    for wpt in &doc.waypoints {
        store.insert_waypoint(WaypointRecord {
            gpx_file_id,
            name: wpt
                .name
                .clone()
                .unwrap_or_else(|| UNNAMED_WAYPOINT.to_owned()),
            lat: wpt.lat,
            lon: wpt.lon,
        })?;
    }

    debug!(
        "Stored {} routes, {} tracks, {} waypoints for GPX file {}",
        doc.routes.len(),
        doc.tracks.len(),
        doc.waypoints.len(),
        gpx_file_id
    );
    Ok(())
}

/// Import one file into the library.
pub fn ingest_file<S: LibraryStore + ?Sized>(
    store: &mut S,
    file: &SourceFile,
    folder_id: Option<RecordId>,
    options: &IngestOptions,
) -> Result<RecordId, IngestError> {
    let prepared = prepare_file(file, options)?;
    let id = persist_file(store, prepared, folder_id, options)?;
    info!("Imported {:?} as GPX file {}", file.name, id);
    Ok(id)
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IngestSuccess {
    /// The uploaded file name.
    pub file: String,
    pub id: RecordId,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IngestFailure {
    pub file: String,
    /// Human-readable reason the file was not stored.
    pub error: String,
}

/// Per-file results of [`ingest_batch`], in input order.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct IngestOutcome {
    pub success: Vec<IngestSuccess>,
    pub errors: Vec<IngestFailure>,
}

impl IngestOutcome {
    fn record(&mut self, file: &SourceFile, result: Result<RecordId, IngestError>) {
        match result {
            Ok(id) => self.success.push(IngestSuccess {
                file: file.name.clone(),
                id,
            }),
            Err(e) => self.record_failure(&file.name, &e),
        }
    }

    fn record_failure(&mut self, file: &str, error: &IngestError) {
        warn!("Could not import {:?}: {}", file, error);
        self.errors.push(IngestFailure {
            file: file.to_owned(),
            error: error.to_string(),
        });
    }
}

/// Import many files, isolating failures per file.
///
/// With the `rayon` feature, files are parsed and normalized in parallel.
/// They are always persisted one at a time, in input order.
#[instrument(level = "debug", skip_all, fields(files = files.len()))]
pub fn ingest_batch<S: LibraryStore + ?Sized>(
    store: &mut S,
    files: &[SourceFile],
    folder_id: Option<RecordId>,
    options: &IngestOptions,
) -> IngestOutcome {
    #[cfg(feature = "rayon")]
    let prepared = files
        .par_iter()
        .map(|f| prepare_file(f, options))
        .collect::<Vec<_>>();
    #[cfg(not(feature = "rayon"))]
    let prepared = files
        .iter()
        .map(|f| prepare_file(f, options))
        .collect::<Vec<_>>();

    let mut outcome = IngestOutcome::default();
    for (file, prepared) in files.iter().zip(prepared) {
        let result = prepared.and_then(|p| persist_file(store, p, folder_id, options));
        if let Ok(id) = &result {
            info!("Imported {:?} as GPX file {}", file.name, id);
        }
        outcome.record(file, result);
    }

    info!(
        "Imported {} of {} files",
        outcome.success.len(),
        files.len()
    );
    outcome
}

/// Import files from disk, isolating failures per file.
///
/// Files that can't be read are reported in [`IngestOutcome::errors`] after
/// the failures of the files that were read.
pub fn ingest_paths<S, P>(
    store: &mut S,
    paths: &[P],
    folder_id: Option<RecordId>,
    options: &IngestOptions,
) -> IngestOutcome
where
    S: LibraryStore + ?Sized,
    P: AsRef<Path>,
{
    let mut files = Vec::with_capacity(paths.len());
    let mut unreadable = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match read_source_file(path, options) {
            Ok(file) => files.push(file),
            Err(e) => unreadable.push((source_name(path), e)),
        }
    }

    let mut outcome = ingest_batch(store, &files, folder_id, options);
    for (file, e) in &unreadable {
        outcome.record_failure(file, e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    const ROUTE_ONLY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="planner" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata><name>Alps</name></metadata>
  <rte>
    <name>Pass run</name>
    <rtept lat="50.0" lon="10.0"/>
    <rtept lat="50.0" lon="11.0"/>
    <extensions>
      <gpxx:RouteExtension xmlns:gpxx="http://www.garmin.com/xmlschemas/GpxExtensions/v3">
        <gpxx:Waypoint><gpxx:lat>50.0</gpxx:lat><gpxx:lon>10.0</gpxx:lon><gpxx:name>Start</gpxx:name></gpxx:Waypoint>
        <gpxx:Waypoint><gpxx:lat>50.0</gpxx:lat><gpxx:lon>11.0</gpxx:lon></gpxx:Waypoint>
      </gpxx:RouteExtension>
    </extensions>
  </rte>
</gpx>"#;

    const TRACK: &str = r#"<gpx version="1.0">
  <trk>
    <trkseg>
      <trkpt lat="47.0" lon="8.0"/>
      <trkpt lat="47.1" lon="8.1"/>
    </trkseg>
  </trk>
  <wpt lat="47.0" lon="8.0"/>
</gpx>"#;

    #[test]
    fn test_stored_name() {
        assert_eq!(stored_name("alps.gpx"), "alps");
        assert_eq!(stored_name("ALPS.GPX"), "ALPS");
        assert_eq!(stored_name("alps.gpx.bak"), "alps.gpx.bak");
        assert_eq!(stored_name("gpx"), "gpx");
        assert_eq!(stored_name(".gpx"), "");
        assert_eq!(stored_name("Ölberg.gpx"), "Ölberg");
    }

    #[test]
    fn test_ingest_route_only_file() -> Result<()> {
        let mut store = MemoryStore::new();
        let folder = store.create_folder("Trips", None)?;
        let id = ingest_file(
            &mut store,
            &SourceFile::new("alps.gpx", ROUTE_ONLY),
            Some(folder),
            &IngestOptions::default(),
        )?;

        let file = store.gpx_file(id)?;
        assert_eq!(file.name, "alps");
        assert_eq!(file.folder_id, Some(folder));
        assert!(file.content.contains(r#"version="1.0""#));
        assert!((71.0..=72.0).contains(&file.length_km), "got {}", file.length_km);
        assert_eq!(file.waypoint_count, 2);
        assert!((file.riding_time_hours - file.length_km / 50.0).abs() < 1e-12);

        // The route was stored as the track the normalizer made of it.
        assert!(store.routes(id)?.is_empty());
        let tracks = store.tracks(id)?;
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Pass run");
        assert_eq!(tracks[0].index_in_gpx, 0);
        assert!((tracks[0].length_km - file.length_km).abs() < 1e-9);

        let waypoints = store
            .waypoints(id)?
            .into_iter()
            .map(|w| (w.name, w.lat, w.lon))
            .collect::<Vec<_>>();
        assert_eq!(
            waypoints,
            vec![
                ("Start".to_owned(), 50.0, 10.0),
                ("Waypoint".to_owned(), 50.0, 11.0),
            ]
        );

        let folders = store.folders().collect::<Vec<_>>();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "Trips");
        assert_eq!(store.gpx_files_in(Some(folder))?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_normalize_options_reach_stored_content() -> Result<()> {
        let mut store = MemoryStore::new();
        let options = IngestOptions::default()
            .with_normalize_options(NormalizeOptions::default().with_creator("Garage PC"));
        let id = ingest_file(&mut store, &SourceFile::new("ride.gpx", TRACK), None, &options)?;
        assert!(store.gpx_file(id)?.content.contains(r#"creator="Garage PC""#));
        Ok(())
    }

    #[test]
    fn test_unnamed_rows() -> Result<()> {
        let mut store = MemoryStore::new();
        let id = ingest_file(
            &mut store,
            &SourceFile::new("ride.gpx", TRACK),
            None,
            &IngestOptions::default(),
        )?;
        assert_eq!(store.tracks(id)?[0].name, UNNAMED_TRACK);
        assert_eq!(store.waypoints(id)?[0].name, UNNAMED_WAYPOINT);
        assert_eq!(store.gpx_files_in(None)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_oversize_file_rejected() {
        let mut store = MemoryStore::new();
        let options = IngestOptions::default();
        let big = SourceFile::new("big.gpx", vec![b' '; DEFAULT_MAX_FILE_SIZE + 1]);
        let err = ingest_file(&mut store, &big, None, &options).unwrap_err();
        assert!(matches!(err, IngestError::TooLarge { .. }));
        assert_eq!(err.to_string(), "File size exceeds 20MB limit");
        assert_eq!(store.gpx_files().count(), 0);
    }

    #[test]
    fn test_size_limit_message() {
        let limit = |max_file_size| {
            IngestError::TooLarge {
                size: max_file_size + 1,
                limit: max_file_size,
            }
            .to_string()
        };
        assert_eq!(limit(5 * 1024 * 1024), "File size exceeds 5MB limit");
        assert_eq!(limit(1000), "File size exceeds 1000 byte limit");
        assert_eq!(limit(1024 * 1024 + 1), "File size exceeds 1048577 byte limit");

        let mut store = MemoryStore::new();
        let options = IngestOptions::default().with_max_file_size(16);
        let err = ingest_file(&mut store, &SourceFile::new("ride.gpx", TRACK), None, &options)
            .unwrap_err();
        assert_eq!(err.to_string(), "File size exceeds 16 byte limit");
    }

    /// A file in the system temp directory, removed on drop.
    struct TempGpx(std::path::PathBuf);

    impl TempGpx {
        fn new(name: &str, content: &str) -> Result<Self> {
            let path = std::env::temp_dir()
                .join(format!("motogpx-{}-{}", std::process::id(), name));
            fs::write(&path, content)?;
            Ok(Self(path))
        }
    }

    impl Drop for TempGpx {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn test_read_source_file() -> Result<()> {
        let file = TempGpx::new("read.gpx", TRACK)?;
        let source = read_source_file(&file.0, &IngestOptions::default())?;
        assert_eq!(source.name, source_name(&file.0));
        assert!(source.name.ends_with("read.gpx"));
        assert_eq!(source.content, TRACK.as_bytes());

        let err = read_source_file(&file.0, &IngestOptions::default().with_max_file_size(16))
            .unwrap_err();
        assert!(matches!(err, IngestError::TooLarge { limit: 16, .. }));
        Ok(())
    }

    #[test]
    fn test_ingest_paths_isolates_unreadable_files() -> Result<()> {
        let good = TempGpx::new("good.gpx", TRACK)?;
        let broken = TempGpx::new("broken.gpx", "<not-xml")?;
        let missing = std::env::temp_dir().join(format!(
            "motogpx-{}-missing.gpx",
            std::process::id()
        ));

        let mut store = MemoryStore::new();
        let outcome = ingest_paths(
            &mut store,
            &[good.0.clone(), missing.clone(), broken.0.clone()],
            None,
            &IngestOptions::default(),
        );

        assert_eq!(outcome.success.len(), 1);
        assert_eq!(outcome.success[0].file, source_name(&good.0));
        let failed = outcome
            .errors
            .iter()
            .map(|f| f.file.clone())
            .collect::<Vec<_>>();
        assert_eq!(failed, vec![source_name(&broken.0), source_name(&missing)]);
        assert!(outcome.errors[1].error.starts_with("Reading file failed"));
        assert_eq!(store.gpx_files().count(), 1);
        Ok(())
    }

    #[test]
    fn test_invalid_file_reasons() {
        let mut store = MemoryStore::new();
        let options = IngestOptions::default();

        let empty = SourceFile::new("empty.gpx", "<gpx></gpx>");
        let err = ingest_file(&mut store, &empty, None, &options).unwrap_err();
        assert_eq!(
            err.to_string(),
            "GPX file must contain at least one waypoint, route, or track"
        );

        let short = SourceFile::new(
            "short.gpx",
            r#"<gpx><rte><rtept lat="1" lon="1"/></rte><trk/></gpx>"#,
        );
        let err = ingest_file(&mut store, &short, None, &options).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Route 1 must have at least 2 points, Track 1 must have at least one segment"
        );

        let binary = SourceFile::new("binary.gpx", vec![0xff, 0xfe, 0x00]);
        assert!(matches!(
            ingest_file(&mut store, &binary, None, &options),
            Err(IngestError::Encoding(_))
        ));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let mut store = MemoryStore::new();
        let files = vec![
            SourceFile::new("alps.gpx", ROUTE_ONLY),
            SourceFile::new("broken.gpx", "<not-xml"),
            SourceFile::new("ride.gpx", TRACK),
        ];

        let outcome = ingest_batch(&mut store, &files, None, &IngestOptions::default());
        let stored = outcome
            .success
            .iter()
            .map(|s| s.file.as_str())
            .collect::<Vec<_>>();
        assert_eq!(stored, vec!["alps.gpx", "ride.gpx"]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].file, "broken.gpx");
        assert!(outcome.errors[0].error.starts_with("Invalid GPX file"));
        assert_eq!(store.gpx_files().count(), 2);

        // Persisted in input order.
        assert!(outcome.success[0].id < outcome.success[1].id);
    }

    #[test]
    fn test_missing_folder() {
        let mut store = MemoryStore::new();
        let err = ingest_file(
            &mut store,
            &SourceFile::new("ride.gpx", TRACK),
            Some(42),
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Store(StoreError::MissingFolder(42))
        ));
    }

    /// Fails every waypoint insert, to exercise cleanup.
    struct NoWaypoints(MemoryStore);

    impl LibraryStore for NoWaypoints {
        fn create_folder(&mut self, name: &str, parent_id: Option<RecordId>) -> std::result::Result<RecordId, StoreError> {
            self.0.create_folder(name, parent_id)
        }
        fn insert_gpx_file(&mut self, file: NewGpxFile) -> std::result::Result<RecordId, StoreError> {
            self.0.insert_gpx_file(file)
        }
        fn insert_route(&mut self, route: RouteRecord) -> std::result::Result<(), StoreError> {
            self.0.insert_route(route)
        }
        fn insert_track(&mut self, track: TrackRecord) -> std::result::Result<(), StoreError> {
            self.0.insert_track(track)
        }
        fn insert_waypoint(&mut self, _waypoint: WaypointRecord) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_owned()))
        }
        fn delete_gpx_file(&mut self, id: RecordId) -> std::result::Result<(), StoreError> {
            self.0.delete_gpx_file(id)
        }
        fn gpx_file(&self, id: RecordId) -> std::result::Result<GpxFileRecord, StoreError> {
            self.0.gpx_file(id)
        }
        fn gpx_files_in(&self, folder_id: Option<RecordId>) -> std::result::Result<Vec<GpxFileRecord>, StoreError> {
            self.0.gpx_files_in(folder_id)
        }
        fn routes(&self, id: RecordId) -> std::result::Result<Vec<RouteRecord>, StoreError> {
            self.0.routes(id)
        }
        fn tracks(&self, id: RecordId) -> std::result::Result<Vec<TrackRecord>, StoreError> {
            self.0.tracks(id)
        }
        fn waypoints(&self, id: RecordId) -> std::result::Result<Vec<WaypointRecord>, StoreError> {
            self.0.waypoints(id)
        }
    }

    #[test]
    fn test_partial_store_failure_rolls_back() {
        let mut store = NoWaypoints(MemoryStore::new());
        let err = ingest_file(
            &mut store,
            &SourceFile::new("ride.gpx", TRACK),
            None,
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Storage error: Storage backend error: disk full");
        assert_eq!(store.0.gpx_files().count(), 0);
        assert!(store.0.tracks.is_empty());
    }
}
