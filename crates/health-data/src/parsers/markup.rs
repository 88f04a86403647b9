//! Apple Health `export.xml` parser.
//!
//! Reads `<Record>` and `<Workout>` elements under the `<HealthData>` root.
//! Quantity records become one [`HealthRecord`] each; sleep-analysis category
//! records become their asleep duration in hours. Everything else is ignored.

use chrono::{DateTime, Utc};
use health_core::error::ParseError;
use health_core::models::{HealthRecord, MetricType};
use health_core::time_utils::TimestampParser;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{check_root, ParseContext};

const ROOT: &str = "HealthData";

pub fn parse(input: &[u8], ctx: &ParseContext<'_>) -> Result<Vec<HealthRecord>, ParseError> {
    let timestamps = ctx.timestamps();
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut records = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Xml(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(e) => {
                check_root(&e, ROOT, &mut seen_root)?;
                depth += 1;
                read_element(&e, &timestamps, &mut records)?;
            }
            Event::Empty(e) => {
                check_root(&e, ROOT, &mut seen_root)?;
                read_element(&e, &timestamps, &mut records)?;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
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

fn read_element(
    e: &BytesStart<'_>,
    timestamps: &TimestampParser,
    records: &mut Vec<HealthRecord>,
) -> Result<(), ParseError> {
    match e.local_name().as_ref() {
        b"Record" => {
            let attrs = Attrs::read(e)?;
            records.extend(record_from(&attrs, timestamps));
        }
        b"Workout" => {
            let attrs = Attrs::read(e)?;
            records.extend(workout_from(&attrs, timestamps));
        }
        _ => {}
    }
    Ok(())
}

// ── Attribute access ──────────────────────────────────────────────────────────

/// Attributes of one element, unescaped.
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn read(e: &BytesStart<'_>) -> Result<Self, ParseError> {
        let mut out = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| ParseError::Xml(err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::Xml(err.to_string()))?
                .into_owned();
            out.push((key, value));
        }
        Ok(Self(out))
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse::<f64>().ok()
    }

    fn time(&self, key: &str, timestamps: &TimestampParser) -> Option<DateTime<Utc>> {
        timestamps.parse(self.get(key)?)
    }
}

// ── Element mapping ───────────────────────────────────────────────────────────

fn record_from(attrs: &Attrs, timestamps: &TimestampParser) -> Option<HealthRecord> {
    let metric = MetricType::canonical(attrs.get("type")?);
    let start = attrs.time("startDate", timestamps)?;

    if let Some(value) = attrs.number("value") {
        let unit = attrs
            .get("unit")
            .map(str::to_string)
            .unwrap_or_else(|| metric.default_unit().to_string());
        return HealthRecord::new(start, metric, value, unit);
    }

    // Category samples carry a symbolic value; only asleep states are kept.
    if metric.as_str() == MetricType::SLEEP_ANALYSIS && attrs.get("value")?.contains("Asleep") {
        let end = attrs.time("endDate", timestamps)?;
        let hours = (end - start).num_seconds() as f64 / 3600.0;
        if hours > 0.0 {
            return HealthRecord::new(start, metric, hours, "hr");
        }
    }
    None
}

fn workout_from(attrs: &Attrs, timestamps: &TimestampParser) -> Vec<HealthRecord> {
    let Some(start) = attrs.time("startDate", timestamps) else {
        return Vec::new();
    };

    let fields = [
        (MetricType::WORKOUT_DURATION, "duration", "durationUnit"),
        (MetricType::WORKOUT_DISTANCE, "totalDistance", "totalDistanceUnit"),
        (MetricType::WORKOUT_ENERGY_BURNED, "totalEnergyBurned", "totalEnergyBurnedUnit"),
    ];

    fields
        .iter()
        .filter_map(|(name, value_key, unit_key)| {
            let metric = MetricType::new(*name);
            let value = attrs.number(value_key)?;
            let unit = attrs
                .get(unit_key)
                .map(str::to_string)
                .unwrap_or_else(|| metric.default_unit().to_string());
            HealthRecord::new(start, metric, value, unit)
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
