//! GPX document reader
//!
//! # Usage
//!
//! Call [`parse`] with the text of a GPX 1.0 or 1.1 file to obtain a
//! [`GpxDocument`]. Parsing only fails when the text is not well-formed XML or
//! its root element is not `<gpx>`. Semantically incomplete content, such as a
//! route with a single point, parses fine and is reported by
//! [`crate::validation::validate`] instead.
//!
//! Elements are matched by local name, so namespace prefixes on vendor
//! extensions (`gpxx:`, `gpxtpx:`, ...) don't matter. Anything not modeled
//! by [`GpxDocument`] is skipped.

use std::str;

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::document::{
    GpxDocument, GpxVersion, Metadata, Point, PointExtensions, Route, RouteExtensionWaypoint,
    Segment, Track, Waypoint,
};

/// An error reading a GPX document.
#[derive(Error, Debug)]
pub enum GpxError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML attribute processing error: {0}")]
    XmlAttr(#[from] AttrError),
    #[error("UTF-8 decoding error")]
    Utf8(#[from] str::Utf8Error),
    #[error("no <gpx> root element found")]
    MissingRoot,
    #[error("root element is <{0}>, not <gpx>")]
    UnexpectedRoot(String),
    #[error("document ends inside <{0}>")]
    Unterminated(String),
    #[error("content outside the <gpx> root element: {0}")]
    StrayContent(String),
}

type Result<T> = std::result::Result<T, GpxError>;

/// Parse GPX text into a [`GpxDocument`].
#[instrument(level = "debug", skip_all, fields(len = xml.len()))]
pub fn parse(xml: &str) -> Result<GpxDocument> {
    let mut reader = Reader::from_str(xml);
    // Self-closing points like <wpt lat=".." lon=".."/> then produce the same
    // Start/End pair as their expanded form.
    reader.config_mut().expand_empty_elements = true;

    let mut document = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if document.is_some() {
                    return Err(GpxError::StrayContent(format!(
                        "<{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                let name = e.local_name();
                if name.as_ref() != b"gpx" {
                    return Err(GpxError::UnexpectedRoot(
                        String::from_utf8_lossy(name.as_ref()).into_owned(),
                    ));
                }
                document = Some(parse_root(&mut reader, &e)?);
            }
            Event::Text(e) if e.iter().all(u8::is_ascii_whitespace) => (),
            event @ (Event::Text(_) | Event::CData(_) | Event::GeneralRef(_)) => {
                let mut text = String::new();
                append_text(&mut text, &event)?;
                return Err(GpxError::StrayContent(format!("{:?}", text.trim())));
            }
            Event::End(e) => {
                return Err(GpxError::StrayContent(format!(
                    "</{}>",
                    String::from_utf8_lossy(e.name().as_ref())
                )));
            }
            Event::Eof => break,
            // Declaration, comments, processing instructions and DOCTYPE.
            _ => (),
        }
    }

    let document = document.ok_or(GpxError::MissingRoot)?;
    debug!(
        "Parsed GPX {} document with {} waypoints, {} routes, {} tracks",
        document.version,
        document.waypoints.len(),
        document.routes.len(),
        document.tracks.len()
    );
    Ok(document)
}

fn unterminated(start: &BytesStart) -> GpxError {
    GpxError::Unterminated(String::from_utf8_lossy(start.name().as_ref()).into_owned())
}

fn skip(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<()> {
    reader.read_to_end(start.name())?;
    Ok(())
}

fn parse_root(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<GpxDocument> {
    let mut document = GpxDocument::default();
    for attr in start.attributes() {
        let a = attr?;
        if a.key.local_name().as_ref() == b"version" {
            let version = str::from_utf8(&a.value)?.trim();
            document.version = match version.parse::<GpxVersion>() {
                Ok(v) => v,
                Err(_) => {
                    debug!("Unrecognized GPX version {:?}, treating as 1.0", version);
                    GpxVersion::V1_0
                }
            };
        }
    }

    // GPX 1.0 carries these directly under the root; they only count when
    // there is no GPX 1.1 <metadata> block.
    let mut root_fields = Metadata::default();
    let mut metadata_block = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"metadata" => metadata_block = Some(parse_metadata(reader, &e)?),
                b"name" => root_fields.name = read_text(reader, &e)?,
                b"desc" => root_fields.description = read_text(reader, &e)?,
                b"author" => root_fields.author = read_author(reader, &e)?,
                b"time" => root_fields.time = read_text(reader, &e)?,
                b"wpt" => {
                    if let Some(wpt) = parse_waypoint(reader, &e)? {
                        document.waypoints.push(wpt);
                    }
                }
                b"rte" => document.routes.push(parse_route(reader, &e)?),
                b"trk" => document.tracks.push(parse_track(reader, &e)?),
                _ => skip(reader, &e)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }

    document.metadata = metadata_block.unwrap_or(root_fields);
    Ok(document)
}

fn parse_metadata(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Metadata> {
    let mut metadata = Metadata::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => metadata.name = read_text(reader, &e)?,
                b"desc" => metadata.description = read_text(reader, &e)?,
                b"author" => metadata.author = read_author(reader, &e)?,
                b"time" => metadata.time = read_text(reader, &e)?,
                _ => skip(reader, &e)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }
    Ok(metadata)
}

/// Flattens `<author>` to a string.
///
/// GPX 1.0 authors are plain text, GPX 1.1 authors are a person element with a
/// nested `<name>`. The nested name wins when both are present.
fn read_author(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Option<String>> {
    let mut text = String::new();
    let mut name = None;
    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) if e.local_name().as_ref() == b"name" => {
                name = read_text(reader, e)?;
            }
            Event::Start(e) => skip(reader, e)?,
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => append_text(&mut text, &event)?,
        }
    }
    Ok(name.or_else(|| non_empty(text)))
}

fn parse_waypoint(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Option<Waypoint>> {
    let coords = parse_lat_lon(start)?;
    let mut wpt = Waypoint::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => wpt.name = read_text(reader, &e)?,
                b"desc" => wpt.description = read_text(reader, &e)?,
                b"ele" => wpt.elevation = read_text(reader, &e)?.as_deref().and_then(parse_f64),
                b"time" => wpt.time = read_text(reader, &e)?,
                b"sym" => wpt.symbol = read_text(reader, &e)?,
                b"type" => wpt.type_ = read_text(reader, &e)?,
                _ => skip(reader, &e)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }

    match coords {
        Some((lat, lon)) => {
            wpt.lat = lat;
            wpt.lon = lon;
            Ok(Some(wpt))
        }
        None => {
            warn!("Skipping waypoint {:?} without valid lat/lon", wpt.name);
            Ok(None)
        }
    }
}

/// Parses a `<rtept>` or `<trkpt>`, returning `None` when it lacks usable
/// coordinates.
fn parse_point(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Option<Point>> {
    let coords = parse_lat_lon(start)?;
    let mut point = Point::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"ele" => point.elevation = read_text(reader, &e)?.as_deref().and_then(parse_f64),
                b"time" => point.time = read_text(reader, &e)?,
                b"extensions" => {
                    if let Some(ext) = parse_point_extensions(reader, &e)? {
                        point.extensions = Some(ext);
                    }
                }
                _ => skip(reader, &e)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }

    match coords {
        Some((lat, lon)) => {
            point.lat = lat;
            point.lon = lon;
            Ok(Some(point))
        }
        None => {
            warn!(
                "Skipping <{}> without valid lat/lon",
                String::from_utf8_lossy(start.local_name().as_ref())
            );
            Ok(None)
        }
    }
}

/// Looks for a `TrackPointExtension` inside a point's `<extensions>`.
fn parse_point_extensions(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Option<PointExtensions>> {
    let mut found = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"TrackPointExtension" => {
                found = Some(parse_track_point_extension(reader, &e)?);
            }
            Event::Start(e) => skip(reader, &e)?,
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }
    Ok(found)
}

fn parse_track_point_extension(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<PointExtensions> {
    let mut ext = PointExtensions::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"hr" => ext.heart_rate = read_text(reader, &e)?.as_deref().and_then(parse_i64),
                b"cad" => ext.cadence = read_text(reader, &e)?.as_deref().and_then(parse_i64),
                b"atemp" => ext.temperature = read_text(reader, &e)?.as_deref().and_then(parse_f64),
                _ => skip(reader, &e)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }
    Ok(ext)
}

fn parse_route(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Route> {
    let mut route = Route::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => route.name = read_text(reader, &e)?,
                b"desc" => route.description = read_text(reader, &e)?,
                b"rtept" => {
                    if let Some(p) = parse_point(reader, &e)? {
                        route.points.push(p);
                    }
                }
                b"extensions" => {
                    if let Some(ext) = parse_route_extensions(reader, &e)? {
                        route.extensions = Some(ext);
                    }
                }
                _ => skip(reader, &e)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }
    debug!(
        "Found route {:?} with {} points",
        route.name,
        route.points.len()
    );
    Ok(route)
}

/// Extracts routing-engine waypoints from a route's `<extensions>`.
///
/// Returns `None` unless a `RouteExtension` block yielded at least one
/// waypoint with valid coordinates.
fn parse_route_extensions(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Option<Vec<RouteExtensionWaypoint>>> {
    let mut waypoints = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"RouteExtension" => {
                parse_route_extension(reader, &e, &mut waypoints)?;
            }
            Event::Start(e) => skip(reader, &e)?,
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }
    Ok(if waypoints.is_empty() {
        None
    } else {
        Some(waypoints)
    })
}

fn parse_route_extension(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
    waypoints: &mut Vec<RouteExtensionWaypoint>,
) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"Waypoint" => {
                if let Some(wpt) = parse_extension_waypoint(reader, &e)? {
                    waypoints.push(wpt);
                }
            }
            Event::Start(e) => skip(reader, &e)?,
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }
    Ok(())
}

/// Reads one extension waypoint, whose coordinates may be given either as
/// child elements or as attributes.
fn parse_extension_waypoint(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Option<RouteExtensionWaypoint>> {
    let (mut lat, mut lon) = match parse_lat_lon(start)? {
        Some((lat, lon)) => (Some(lat), Some(lon)),
        None => (None, None),
    };
    let mut name = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"lat" => lat = read_text(reader, &e)?.as_deref().and_then(parse_f64),
                b"lon" => lon = read_text(reader, &e)?.as_deref().and_then(parse_f64),
                b"name" => name = read_text(reader, &e)?,
                _ => skip(reader, &e)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }

    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(Some(RouteExtensionWaypoint { lat, lon, name })),
        _ => {
            warn!("Skipping route extension waypoint {:?} without coordinates", name);
            Ok(None)
        }
    }
}

fn parse_track(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Track> {
    let mut track = Track::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => track.name = read_text(reader, &e)?,
                b"desc" => track.description = read_text(reader, &e)?,
                b"trkseg" => track.segments.push(parse_segment(reader, &e)?),
                _ => skip(reader, &e)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }
    debug!(
        "Found track {:?} with {} segments",
        track.name,
        track.segments.len()
    );
    Ok(track)
}

fn parse_segment(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Segment> {
    let mut segment = Segment::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"trkpt" => {
                if let Some(p) = parse_point(reader, &e)? {
                    segment.points.push(p);
                }
            }
            Event::Start(e) => skip(reader, &e)?,
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => (),
        }
    }
    Ok(segment)
}

/// Reads the lat/lon attributes of a point element.
///
/// Missing or unparseable values yield `None` rather than an error.
fn parse_lat_lon(start: &BytesStart) -> Result<Option<(f64, f64)>> {
    let mut lat = None;
    let mut lon = None;
    for attr in start.attributes() {
        let a = attr?;
        match a.key.local_name().as_ref() {
            b"lat" => lat = parse_f64(str::from_utf8(&a.value)?),
            b"lon" => lon = parse_f64(str::from_utf8(&a.value)?),
            _ => (),
        }
    }
    Ok(lat.zip(lon))
}

/// Reads the text content of the element just started, skipping any nested
/// elements. Whitespace is trimmed and empty text is `None`.
fn read_text(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Option<String>> {
    let mut text = String::new();
    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) => skip(reader, e)?,
            Event::End(_) => break,
            Event::Eof => return Err(unterminated(start)),
            _ => append_text(&mut text, &event)?,
        }
    }
    Ok(non_empty(text))
}

/// Appends character data from text, CDATA, and entity reference events.
fn append_text(text: &mut String, event: &Event) -> Result<()> {
    match event {
        Event::Text(e) => text.push_str(str::from_utf8(e.as_ref())?),
        Event::CData(e) => text.push_str(str::from_utf8(e.as_ref())?),
        Event::GeneralRef(e) => {
            if let Some(ch) = e.resolve_char_ref()? {
                text.push(ch);
            } else {
                match str::from_utf8(e.as_ref())? {
                    "amp" => text.push('&'),
                    "lt" => text.push('<'),
                    "gt" => text.push('>'),
                    "quot" => text.push('"'),
                    "apos" => text.push('\''),
                    other => debug!("Dropping unknown entity reference &{};", other),
                }
            }
        }
        _ => (),
    }
    Ok(())
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == text.len() {
        Some(text)
    } else {
        Some(trimmed.to_owned())
    }
}

/// Lenient float parsing: anything unparseable or non-finite is absent.
fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_i64(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| parse_f64(s).map(|v| v.trunc() as i64))
}
