//! GPX track parser.
//!
//! Every `<trkpt>` with a readable `<time>` and valid coordinates becomes a
//! small set of records sharing its position: elevation, heart rate and
//! cadence when present (Garmin `TrackPointExtension` style), plus the
//! distance covered since the previous point of the same segment.

use chrono::{DateTime, Utc};
use health_core::error::ParseError;
use health_core::models::{GeoPoint, HealthRecord, MetricType};
use health_core::time_utils::TimestampParser;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{check_root, local_name, ParseContext};

const ROOT: &str = "gpx";

/// Child element of a track point whose text we keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Elevation,
    Time,
    HeartRate,
    Cadence,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name.to_ascii_lowercase().as_slice() {
            b"ele" => Some(Field::Elevation),
            b"time" => Some(Field::Time),
            b"cad" | b"cadence" => Some(Field::Cadence),
            b"heartrate" | b"heart_rate" => Some(Field::HeartRate),
            // Any extension tag naming heart rate: `hr`, `hrm`, `avghr`, ...
            name if name.windows(2).any(|w| w == b"hr") => Some(Field::HeartRate),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct PointBuilder {
    lat: Option<f64>,
    lon: Option<f64>,
    ele: Option<f64>,
    time: Option<String>,
    hr: Option<f64>,
    cad: Option<f64>,
}

impl PointBuilder {
    fn from_start(e: &BytesStart<'_>) -> Result<Self, ParseError> {
        let mut point = PointBuilder::default();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| ParseError::Xml(err.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::Xml(err.to_string()))?;
            match attr.key.as_ref() {
                b"lat" => point.lat = value.trim().parse().ok(),
                b"lon" => point.lon = value.trim().parse().ok(),
                _ => {}
            }
        }
        Ok(point)
    }

    fn set(&mut self, field: Field, text: &str) {
        let number = || text.trim().parse::<f64>().ok().filter(|v| v.is_finite());
        match field {
            Field::Elevation => self.ele = number(),
            Field::Time => self.time = Some(text.to_string()),
            Field::HeartRate => self.hr = number(),
            Field::Cadence => self.cad = number(),
        }
    }

    /// Position and timestamp, or `None` when the point cannot be used.
    fn locate(&self, timestamps: &TimestampParser) -> Option<(GeoPoint, DateTime<Utc>)> {
        let (lat, lon) = (self.lat?, self.lon?);
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        let ts = timestamps.parse(self.time.as_deref()?)?;
        Some((
            GeoPoint {
                latitude: lat,
                longitude: lon,
                elevation: self.ele,
            },
            ts,
        ))
    }
}

pub fn parse(input: &[u8], ctx: &ParseContext<'_>) -> Result<Vec<HealthRecord>, ParseError> {
    let timestamps = ctx.timestamps();
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut records = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;

    let mut point: Option<PointBuilder> = None;
    let mut field: Option<Field> = None;
    let mut previous: Option<GeoPoint> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Xml(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(e) => {
                check_root(&e, ROOT, &mut seen_root)?;
                depth += 1;
                match local_name(e.name().as_ref()) {
                    b"trkseg" | b"trk" => previous = None,
                    b"trkpt" => point = Some(PointBuilder::from_start(&e)?),
                    name if point.is_some() => field = Field::from_name(name),
                    _ => {}
                }
            }
            Event::Empty(e) => {
                check_root(&e, ROOT, &mut seen_root)?;
                // A self-closing trkpt has no time and is dropped.
            }
            Event::Text(t) => {
                if let (Some(p), Some(f)) = (point.as_mut(), field) {
                    let text = t.unescape().map_err(|err| ParseError::Xml(err.to_string()))?;
                    p.set(f, &text);
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                match local_name(e.name().as_ref()) {
                    b"trkpt" => {
                        if let Some(p) = point.take() {
                            emit_point(&p, &timestamps, &mut previous, &mut records);
                        }
                    }
                    _ => field = None,
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(ParseError::Xml("document has no root element".to_string()));
    }
    if depth != 0 {
        return Err(ParseError::Xml("unexpected end of document".to_string()));
    }
    Ok(records)
}

fn emit_point(
    point: &PointBuilder,
    timestamps: &TimestampParser,
    previous: &mut Option<GeoPoint>,
    records: &mut Vec<HealthRecord>,
) {
    let Some((geo, ts)) = point.locate(timestamps) else {
        return;
    };

    let mut values = Vec::with_capacity(4);
    if let Some(ele) = point.ele {
        values.push((MetricType::ELEVATION, ele));
    }
    if let Some(hr) = point.hr {
        values.push((MetricType::HEART_RATE, hr));
    }
    if let Some(cad) = point.cad {
        values.push((MetricType::CADENCE, cad));
    }
    if let Some(prev) = previous.as_ref() {
        values.push((MetricType::DISTANCE, prev.distance_to(&geo)));
    }

    for (name, value) in values {
        let metric = MetricType::new(name);
        let unit = metric.default_unit();
        if let Some(record) = HealthRecord::new(ts, metric, value, unit) {
            records.push(record.with_geo(Some(geo)).with_cadence(point.cad));
        }
    }
    *previous = Some(geo);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
