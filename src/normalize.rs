//! Canonical GPX 1.0 output
//!
//! Every stored file is rewritten into the same small GPX 1.0 subset: document
//! metadata, waypoints and tracks. Routes are not emitted. A document that
//! only has routes gets one straight track per route, and a document whose
//! waypoints exist only inside vendor route extensions gets those promoted to
//! real waypoints. The conversion is lossy, but it's idempotent for
//! documents without routes: normalizing the parsed output of [`normalize`]
//! reproduces it exactly.

use std::io;
use std::string::FromUtf8Error;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::document::{GpxDocument, GpxVersion, Point, Segment, Track, Waypoint};

/// Creator string stamped on every normalized document.
pub const DEFAULT_CREATOR: &str = "GPX Library - Motorcycle Route Manager";

const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/0";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str =
    "http://www.topografix.com/GPX/1/0 http://www.topografix.com/GPX/1/0/gpx.xsd";

/// Name given to a track synthesized from an unnamed route.
pub const SYNTHESIZED_TRACK_NAME: &str = "Track from Route";

/// Name given to a waypoint recovered from an unnamed route extension entry.
pub const SYNTHESIZED_WAYPOINT_NAME: &str = "Waypoint";

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("I/O error writing GPX")]
    Io(#[from] io::Error),
    #[error("XML writing error")]
    Xml(#[from] quick_xml::Error),
    #[error("Normalized output is not valid UTF-8")]
    Utf8(#[from] FromUtf8Error),
}

type Result<T> = std::result::Result<T, NormalizeError>;

/// Options for writing canonical GPX.
///
/// The defaults produce the canonical format stored by the library.
#[derive(Clone, Debug)]
pub struct NormalizeOptions {
    pub creator: String,
    /// Spaces per nesting level. Zero writes everything on one line.
    pub indent: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            creator: DEFAULT_CREATOR.to_owned(),
            indent: 2,
        }
    }
}

impl NormalizeOptions {
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }
}

/// Waypoints as they will appear in the normalized document.
///
/// These are the document's own waypoints, or, only when it has none, the
/// waypoints of every route's vendor extensions.
pub fn resolve_waypoints(doc: &GpxDocument) -> Vec<Waypoint> {
    if !doc.waypoints.is_empty() {
        return doc.waypoints.clone();
    }

    let recovered = doc
        .routes
        .iter()
        .filter_map(|r| r.extensions.as_ref())
        .flatten()
        .map(|ext| Waypoint {
            lat: ext.lat,
            lon: ext.lon,
            name: Some(
                ext.name
                    .clone()
                    .unwrap_or_else(|| SYNTHESIZED_WAYPOINT_NAME.to_owned()),
            ),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    if !recovered.is_empty() {
        info!(
            "Recovered {} waypoints from route extensions",
            recovered.len()
        );
    }
    recovered
}

/// Tracks as they will appear in the normalized document.
///
/// These are the document's own tracks, or, only when it has none, a
/// single-segment track per route following the route points directly.
pub fn resolve_tracks(doc: &GpxDocument) -> Vec<Track> {
    if !doc.tracks.is_empty() {
        return doc.tracks.iter().map(strip_track).collect();
    }

    if !doc.routes.is_empty() {
        info!("Converting {} routes to tracks", doc.routes.len());
    }
    doc.routes
        .iter()
        .map(|route| Track {
            name: Some(
                route
                    .name
                    .clone()
                    .unwrap_or_else(|| SYNTHESIZED_TRACK_NAME.to_owned()),
            ),
            description: route.description.clone(),
            segments: vec![Segment::new(
                route
                    .points
                    .iter()
                    .map(|p| Point {
                        lat: p.lat,
                        lon: p.lon,
                        elevation: p.elevation,
                        time: None,
                        extensions: None,
                    })
                    .collect(),
            )],
        })
        .collect()
}

/// Drops the parts of a track that canonical output doesn't carry.
fn strip_track(track: &Track) -> Track {
    Track {
        name: track.name.clone(),
        description: track.description.clone(),
        segments: track
            .segments
            .iter()
            .map(|s| {
                Segment::new(
                    s.points
                        .iter()
                        .map(|p| Point {
                            extensions: None,
                            ..p.clone()
                        })
                        .collect(),
                )
            })
            .collect(),
    }
}

/// The normalized view of a document, before serialization.
///
/// Coordinates and elevations are not yet rounded; everything else matches
/// what parsing the output of [`normalize`] would give.
pub fn normalized(doc: &GpxDocument) -> GpxDocument {
    GpxDocument {
        version: GpxVersion::V1_0,
        metadata: doc.metadata.clone(),
        waypoints: resolve_waypoints(doc),
        routes: Vec::new(),
        tracks: resolve_tracks(doc),
    }
}

/// Serialize a document to canonical GPX 1.0 text.
pub fn normalize(doc: &GpxDocument) -> Result<String> {
    normalize_with(doc, &NormalizeOptions::default())
}

/// Serialize a document to GPX 1.0 text with the given options.
#[instrument(level = "debug", skip_all)]
pub fn normalize_with(doc: &GpxDocument, options: &NormalizeOptions) -> Result<String> {
    let canonical = normalized(doc);

    let mut writer = if options.indent > 0 {
        Writer::new_with_indent(Vec::new(), b' ', options.indent)
    } else {
        Writer::new(Vec::new())
    };

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    if options.indent == 0 {
        // The indenting writer already breaks the line after the declaration.
        writer.get_mut().push(b'\n');
    }
    writer.write_event(Event::Start(BytesStart::new("gpx").with_attributes([
        ("version", "1.0"),
        ("creator", options.creator.as_str()),
        ("xmlns", GPX_NAMESPACE),
        ("xmlns:xsi", XSI_NAMESPACE),
        ("xsi:schemaLocation", SCHEMA_LOCATION),
    ])))?;

    let metadata = &canonical.metadata;
    write_text_element(&mut writer, "name", metadata.name.as_deref())?;
    write_text_element(&mut writer, "desc", metadata.description.as_deref())?;
    write_text_element(&mut writer, "author", metadata.author.as_deref())?;
    write_text_element(&mut writer, "time", metadata.time.as_deref())?;

    for wpt in &canonical.waypoints {
        write_waypoint(&mut writer, wpt)?;
    }
    for track in &canonical.tracks {
        write_track(&mut writer, track)?;
    }

    writer.write_event(Event::End(BytesEnd::new("gpx")))?;

    debug!(
        "Normalized {} waypoints and {} tracks",
        canonical.waypoints.len(),
        canonical.tracks.len()
    );
    Ok(String::from_utf8(writer.into_inner())?)
}

fn format_coordinate(value: f64) -> String {
    format!("{value:.6}")
}

fn format_elevation(value: f64) -> String {
    format!("{value:.1}")
}

fn point_start(name: &str, lat: f64, lon: f64) -> BytesStart<'_> {
    BytesStart::new(name).with_attributes([
        ("lat", format_coordinate(lat).as_str()),
        ("lon", format_coordinate(lon).as_str()),
    ])
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: Option<&str>,
) -> Result<()> {
    if let Some(text) = text {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
    }
    Ok(())
}

fn write_waypoint(writer: &mut Writer<Vec<u8>>, wpt: &Waypoint) -> Result<()> {
    let start = point_start("wpt", wpt.lat, wpt.lon);
    let elevation = wpt.elevation.map(format_elevation);
    let children = [
        ("name", wpt.name.as_deref()),
        ("desc", wpt.description.as_deref()),
        ("ele", elevation.as_deref()),
        ("time", wpt.time.as_deref()),
        ("sym", wpt.symbol.as_deref()),
        ("type", wpt.type_.as_deref()),
    ];

    if children.iter().all(|(_, text)| text.is_none()) {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for (name, text) in children {
        write_text_element(writer, name, text)?;
    }
    writer.write_event(Event::End(BytesEnd::new("wpt")))?;
    Ok(())
}

fn write_track(writer: &mut Writer<Vec<u8>>, track: &Track) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("trk")))?;
    write_text_element(writer, "name", track.name.as_deref())?;
    write_text_element(writer, "desc", track.description.as_deref())?;

    for segment in &track.segments {
        if segment.points.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new("trkseg")))?;
            continue;
        }
        writer.write_event(Event::Start(BytesStart::new("trkseg")))?;
        for point in &segment.points {
            write_track_point(writer, point)?;
        }
        writer.write_event(Event::End(BytesEnd::new("trkseg")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("trk")))?;
    Ok(())
}

fn write_track_point(writer: &mut Writer<Vec<u8>>, point: &Point) -> Result<()> {
    let start = point_start("trkpt", point.lat, point.lon);
    if point.elevation.is_none() && point.time.is_none() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    let elevation = point.elevation.map(format_elevation);
    write_text_element(writer, "ele", elevation.as_deref())?;
    write_text_element(writer, "time", point.time.as_deref())?;
    writer.write_event(Event::End(BytesEnd::new("trkpt")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::document::{Metadata, PointExtensions, Route, RouteExtensionWaypoint};
    use crate::gpx::parse;

    fn route(name: Option<&str>, coords: &[(f64, f64)]) -> Route {
        Route {
            name: name.map(str::to_owned),
            points: coords.iter().map(|&(lat, lon)| Point::new(lat, lon)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_canonical_header() -> Result<()> {
        let doc = GpxDocument {
            waypoints: vec![Waypoint::new(50.0, 10.0)],
            ..Default::default()
        };
        let xml = normalize(&doc)?;
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<gpx "));
        assert!(xml.contains(r#"version="1.0""#));
        assert!(xml.contains(r#"creator="GPX Library - Motorcycle Route Manager""#));
        assert!(xml.contains(r#"xmlns="http://www.topografix.com/GPX/1/0""#));
        assert!(xml.contains(r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#));
        assert!(xml.contains(
            r#"xsi:schemaLocation="http://www.topografix.com/GPX/1/0 http://www.topografix.com/GPX/1/0/gpx.xsd""#
        ));
        assert!(xml.contains(r#"<wpt lat="50.000000" lon="10.000000"/>"#));
        assert!(xml.trim_end().ends_with("</gpx>"));
        Ok(())
    }

    #[test]
    fn test_waypoint_formatting_and_order() -> Result<()> {
        let doc = GpxDocument {
            waypoints: vec![Waypoint {
                lat: 47.123456789,
                lon: 8.5,
                name: Some("Pass & summit".to_owned()),
                description: Some("Top".to_owned()),
                elevation: Some(2106.26),
                time: Some("2024-07-01T10:00:00Z".to_owned()),
                symbol: Some("Summit".to_owned()),
                type_: Some("poi".to_owned()),
            }],
            ..Default::default()
        };
        let xml = normalize_with(&doc, &NormalizeOptions::default().with_indent(0))?;
        assert!(xml.contains(
            "<wpt lat=\"47.123457\" lon=\"8.500000\">\
             <name>Pass &amp; summit</name>\
             <desc>Top</desc>\
             <ele>2106.3</ele>\
             <time>2024-07-01T10:00:00Z</time>\
             <sym>Summit</sym>\
             <type>poi</type>\
             </wpt>"
        ));
        Ok(())
    }

    #[test]
    fn test_metadata_only_when_present() -> Result<()> {
        let doc = GpxDocument {
            metadata: Metadata {
                name: Some("Alps".to_owned()),
                time: Some("2024-07-01T10:00:00Z".to_owned()),
                ..Default::default()
            },
            waypoints: vec![Waypoint::new(1.0, 2.0)],
            ..Default::default()
        };
        let xml = normalize(&doc)?;
        assert!(xml.contains("<name>Alps</name>"));
        assert!(xml.contains("<time>2024-07-01T10:00:00Z</time>"));
        assert!(!xml.contains("<desc>"));
        assert!(!xml.contains("<author>"));
        Ok(())
    }

    #[test]
    fn test_route_becomes_track() -> Result<()> {
        let coords = [(46.0, 11.0), (46.1, 11.1), (46.2, 11.2)];
        let mut r = route(Some("Alps"), &coords);
        r.points[0] = Point::new(46.0, 11.0).with_time("2024-07-01T10:00:00Z");
        r.points[1] = Point::new(46.1, 11.1).with_elevation(1500.04);
        let doc = GpxDocument {
            routes: vec![r],
            ..Default::default()
        };

        let reparsed = parse(&normalize(&doc)?)?;
        assert!(reparsed.routes.is_empty());
        assert_eq!(reparsed.tracks.len(), 1);
        let track = &reparsed.tracks[0];
        assert_eq!(track.name.as_deref(), Some("Alps"));
        assert_eq!(track.segments.len(), 1);
        let points = &track.segments[0].points;
        assert_eq!(
            points.iter().map(|p| (p.lat, p.lon)).collect::<Vec<_>>(),
            coords
        );
        assert_eq!(points[0].time, None);
        assert_eq!(
            points.iter().map(|p| p.elevation).collect::<Vec<_>>(),
            vec![None, Some(1500.0), None]
        );
        Ok(())
    }

    #[test]
    fn test_unnamed_route_track_name() {
        let doc = GpxDocument {
            routes: vec![route(None, &[(1.0, 1.0), (1.0, 2.0)])],
            ..Default::default()
        };
        let tracks = resolve_tracks(&doc);
        assert_eq!(tracks[0].name.as_deref(), Some(SYNTHESIZED_TRACK_NAME));
    }

    #[test]
    fn test_existing_tracks_win_over_routes() {
        let doc = GpxDocument {
            routes: vec![route(Some("Planned"), &[(1.0, 1.0), (1.0, 2.0)])],
            tracks: vec![Track {
                name: Some("Ridden".to_owned()),
                segments: vec![Segment::new(vec![Point::new(1.0, 1.0), Point::new(1.0, 3.0)])],
                ..Default::default()
            }],
            ..Default::default()
        };
        let tracks = resolve_tracks(&doc);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name.as_deref(), Some("Ridden"));
    }

    #[test]
    fn test_extension_waypoints_recovered() -> Result<()> {
        let mut r = route(Some("Alps"), &[(46.0, 11.0), (46.5, 11.5)]);
        r.extensions = Some(vec![
            RouteExtensionWaypoint {
                lat: 46.0,
                lon: 11.0,
                name: Some("A".to_owned()),
            },
            RouteExtensionWaypoint {
                lat: 46.5,
                lon: 11.5,
                name: None,
            },
        ]);
        let doc = GpxDocument {
            routes: vec![r],
            ..Default::default()
        };

        let reparsed = parse(&normalize(&doc)?)?;
        assert_eq!(reparsed.waypoints.len(), 2);
        let waypoints = reparsed
            .waypoints
            .iter()
            .map(|w| (w.name.as_deref(), w.lat, w.lon))
            .collect::<Vec<_>>();
        assert_eq!(
            waypoints,
            vec![
                (Some("A"), 46.0, 11.0),
                (Some(SYNTHESIZED_WAYPOINT_NAME), 46.5, 11.5),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_extension_waypoints_not_merged() {
        let mut r = route(None, &[(46.0, 11.0), (46.5, 11.5)]);
        r.extensions = Some(vec![RouteExtensionWaypoint {
            lat: 46.0,
            lon: 11.0,
            name: Some("A".to_owned()),
        }]);
        let doc = GpxDocument {
            waypoints: vec![Waypoint::new(1.0, 1.0).with_name("Own")],
            routes: vec![r],
            ..Default::default()
        };
        let waypoints = resolve_waypoints(&doc);
        assert_eq!(waypoints.len(), 1);
        assert_eq!(waypoints[0].name.as_deref(), Some("Own"));
    }

    #[test]
    fn test_telemetry_dropped() -> Result<()> {
        let mut point = Point::new(35.0, 139.0).with_elevation(10.0);
        point.extensions = Some(PointExtensions {
            heart_rate: Some(150),
            ..Default::default()
        });
        let doc = GpxDocument {
            tracks: vec![Track {
                segments: vec![Segment::new(vec![point, Point::new(35.1, 139.1)])],
                ..Default::default()
            }],
            ..Default::default()
        };
        let xml = normalize(&doc)?;
        assert!(!xml.contains("extensions"));
        assert!(!xml.contains("150"));
        Ok(())
    }

    #[test]
    fn test_idempotent_without_routes() -> Result<()> {
        let xml = r#"<?xml version="1.0"?>
<gpx version="1.1" creator="some device" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata>
    <name>Evening ride</name>
    <author><name>Jo</name></author>
  </metadata>
  <wpt lat="48.137154" lon="11.5761249"><ele>519.66</ele><name>Start</name><sym>Flag</sym></wpt>
  <trk>
    <name>Evening ride</name>
    <trkseg>
      <trkpt lat="48.1371549" lon="11.5761249"><ele>519.66</ele><time>2024-05-01T18:00:00Z</time></trkpt>
      <trkpt lat="48.1402" lon="11.5800"><time>2024-05-01T18:01:00Z</time></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="48.2" lon="11.6"/>
      <trkpt lat="48.3" lon="11.7"/>
    </trkseg>
  </trk>
</gpx>"#;

        let once = normalize(&parse(xml)?)?;
        let twice = normalize(&parse(&once)?)?;
        assert_eq!(once, twice);
        Ok(())
    }

    #[test]
    fn test_custom_creator() -> Result<()> {
        let doc = GpxDocument {
            waypoints: vec![Waypoint::new(1.0, 2.0)],
            ..Default::default()
        };
        let xml = normalize_with(&doc, &NormalizeOptions::default().with_creator("Tester"))?;
        assert!(xml.contains(r#"creator="Tester""#));
        Ok(())
    }
}
