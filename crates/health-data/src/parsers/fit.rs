//! Garmin FIT activity parser.
//!
//! Decoding is done by [`fitparser`]; this module maps `record` messages to
//! per-sample metrics and `session` messages to workout totals. Any decoder
//! error (bad header, CRC mismatch, truncation) fails the whole file.

use chrono::{DateTime, Utc};
use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value};
use health_core::error::ParseError;
use health_core::models::{GeoPoint, HealthRecord, MetricType};

use super::ParseContext;

/// Degrees per semicircle (`180 / 2^31`).
const SEMICIRCLE_TO_DEG: f64 = 180.0 / 2_147_483_648.0;

pub fn parse(input: &[u8], _ctx: &ParseContext<'_>) -> Result<Vec<HealthRecord>, ParseError> {
    let mut reader = input;
    let messages =
        fitparser::from_reader(&mut reader).map_err(|e| ParseError::Fit(e.to_string()))?;

    let mut records = Vec::new();
    let mut last_distance: Option<f64> = None;

    for message in &messages {
        match message.kind() {
            MesgNum::Record => read_record(message, &mut last_distance, &mut records),
            MesgNum::Session => read_session(message, &mut records),
            _ => {}
        }
    }
    Ok(records)
}

// ── Message mapping ───────────────────────────────────────────────────────────

/// Field lookup over one decoded message.
struct Fields<'a>(&'a FitDataRecord);

impl<'a> Fields<'a> {
    fn value(&self, name: &str) -> Option<&'a Value> {
        self.0
            .fields()
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.value())
    }

    fn number(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(as_f64)
    }

    /// First of `names` that carries a number.
    fn first_number(&self, names: &[&str]) -> Option<f64> {
        names.iter().find_map(|n| self.number(n))
    }

    fn time(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.value(name)? {
            Value::Timestamp(ts) => Some(ts.with_timezone(&Utc)),
            _ => None,
        }
    }
}

fn read_record(
    message: &FitDataRecord,
    last_distance: &mut Option<f64>,
    records: &mut Vec<HealthRecord>,
) {
    let fields = Fields(message);
    let Some(ts) = fields.time("timestamp") else {
        return;
    };

    let elevation = fields.first_number(&["enhanced_altitude", "altitude"]);
    let geo = match (fields.number("position_lat"), fields.number("position_long")) {
        (Some(lat), Some(lon)) => Some(GeoPoint {
            latitude: lat * SEMICIRCLE_TO_DEG,
            longitude: lon * SEMICIRCLE_TO_DEG,
            elevation,
        }),
        _ => None,
    };
    let cadence = fields.number("cadence");

    let mut values = Vec::with_capacity(8);
    values.push((MetricType::HEART_RATE, fields.number("heart_rate")));
    values.push((MetricType::CADENCE, cadence));
    values.push((MetricType::SPEED, fields.first_number(&["enhanced_speed", "speed"])));
    values.push((MetricType::ELEVATION, elevation));
    values.push((MetricType::POWER, fields.number("power")));
    values.push((MetricType::TEMPERATURE, fields.number("temperature")));

    // Distance is cumulative in the file; emit the step since the last sample.
    if let Some(total) = fields.number("distance") {
        let step = total - last_distance.unwrap_or(0.0);
        *last_distance = Some(total);
        if step >= 0.0 {
            values.push((MetricType::DISTANCE, Some(step)));
        }
    }

    for (name, value) in values {
        let Some(value) = value else { continue };
        let metric = MetricType::new(name);
        let unit = metric.default_unit();
        if let Some(record) = HealthRecord::new(ts, metric, value, unit) {
            records.push(record.with_geo(geo).with_cadence(cadence));
        }
    }
}

fn read_session(message: &FitDataRecord, records: &mut Vec<HealthRecord>) {
    let fields = Fields(message);
    let Some(ts) = fields.time("start_time").or_else(|| fields.time("timestamp")) else {
        return;
    };

    if let Some(kcal) = fields.number("total_calories") {
        records.extend(HealthRecord::new(
            ts,
            MetricType::new(MetricType::ACTIVE_ENERGY_BURNED),
            kcal,
            "kcal",
        ));
    }
    if let Some(seconds) = fields.number("total_timer_time") {
        records.extend(HealthRecord::new(
            ts,
            MetricType::new(MetricType::WORKOUT_DURATION),
            seconds / 60.0,
            "min",
        ));
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    let v = match *value {
        Value::Byte(v) | Value::Enum(v) | Value::UInt8(v) | Value::UInt8z(v) => f64::from(v),
        Value::SInt8(v) => f64::from(v),
        Value::SInt16(v) => f64::from(v),
        Value::UInt16(v) | Value::UInt16z(v) => f64::from(v),
        Value::SInt32(v) => f64::from(v),
        Value::UInt32(v) | Value::UInt32z(v) => f64::from(v),
        Value::SInt64(v) => v as f64,
        Value::UInt64(v) | Value::UInt64z(v) => v as f64,
        Value::Float32(v) => f64::from(v),
        Value::Float64(v) => v,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
