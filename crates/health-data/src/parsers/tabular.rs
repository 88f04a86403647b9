//! CSV parser.
//!
//! Two layouts are understood:
//!
//! * **long**: one row per sample with `type`/`metric`, `value` and optional
//!   `unit` columns (the shape of most converted Apple Health exports);
//! * **wide**: one row per timestamp with a column per metric, where a header
//!   such as `Heart Rate (bpm)` carries the unit in parentheses.
//!
//! Rows whose timestamp cannot be read and cells that are not numbers are
//! dropped. Structural problems (ragged rows, broken quoting) fail the file.

use std::sync::OnceLock;

use health_core::error::ParseError;
use health_core::models::{HealthRecord, MetricType};
use regex::Regex;

use super::ParseContext;

/// Header names (after normalisation) accepted as the timestamp column.
const TIMESTAMP_COLUMNS: &[&str] = &[
    "date",
    "timestamp",
    "time",
    "datetime",
    "start_date",
    "startdate",
    "start",
    "creation_date",
    "creationdate",
];

/// Columns that describe a sample rather than measure something.
const IGNORED_COLUMNS: &[&str] = &[
    "end_date",
    "enddate",
    "end",
    "source",
    "source_name",
    "sourcename",
    "device",
    "notes",
];

pub fn parse(input: &[u8], ctx: &ParseContext<'_>) -> Result<Vec<HealthRecord>, ParseError> {
    let input = input.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(input);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    let normalised: Vec<String> = headers.iter().map(|h| normalise(h)).collect();

    let ts_col = normalised
        .iter()
        .position(|h| TIMESTAMP_COLUMNS.contains(&h.as_str()))
        .ok_or_else(|| ParseError::MissingColumn("date/timestamp".to_string()))?;

    let layout = Layout::detect(&headers, &normalised, ts_col);
    let timestamps = ctx.timestamps();
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row.map_err(csv_error)?;
        let Some(ts) = row.get(ts_col).and_then(|s| timestamps.parse(s)) else {
            continue;
        };

        match &layout {
            Layout::Long { metric, value, unit } => {
                let (Some(name), Some(raw)) = (row.get(*metric), row.get(*value)) else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                let Some(v) = parse_number(raw) else { continue };
                let metric = MetricType::canonical(name);
                let unit = unit
                    .and_then(|i| row.get(i))
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| metric.default_unit().to_string());
                records.extend(HealthRecord::new(ts, metric, v, unit));
            }
            Layout::Wide(columns) => {
                for col in columns {
                    let Some(v) = row.get(col.index).and_then(parse_number) else {
                        continue;
                    };
                    records.extend(HealthRecord::new(ts, col.metric.clone(), v, col.unit.clone()));
                }
            }
        }
    }

    Ok(records)
}

// ── Layout detection ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct WideColumn {
    index: usize,
    metric: MetricType,
    unit: String,
}

#[derive(Debug)]
enum Layout {
    Long {
        metric: usize,
        value: usize,
        unit: Option<usize>,
    },
    Wide(Vec<WideColumn>),
}

impl Layout {
    fn detect(headers: &[String], normalised: &[String], ts_col: usize) -> Self {
        let find = |names: &[&str]| normalised.iter().position(|h| names.contains(&h.as_str()));

        if let (Some(metric), Some(value)) = (find(&["type", "metric"]), find(&["value"])) {
            return Layout::Long {
                metric,
                value,
                unit: find(&["unit", "units"]),
            };
        }

        let columns = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != ts_col && !IGNORED_COLUMNS.contains(&normalised[*i].as_str()))
            .map(|(index, header)| {
                let (name, unit) = split_unit(header);
                let metric = MetricType::canonical(name);
                let unit = unit
                    .map(str::to_string)
                    .unwrap_or_else(|| metric.default_unit().to_string());
                WideColumn { index, metric, unit }
            })
            .collect();
        Layout::Wide(columns)
    }
}

/// `"Heart Rate (bpm)"` → `("Heart Rate", Some("bpm"))`.
fn split_unit(header: &str) -> (&str, Option<&str>) {
    let header = header.trim();
    if let Some(stripped) = header.strip_suffix(')') {
        if let Some(open) = stripped.rfind('(') {
            let unit = stripped[open + 1..].trim();
            let name = stripped[..open].trim();
            if !name.is_empty() && !unit.is_empty() {
                return (name, Some(unit));
            }
        }
    }
    (header, None)
}

fn normalise(header: &str) -> String {
    header
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Parse a numeric cell. Commas are accepted only as thousands grouping.
fn parse_number(raw: &str) -> Option<f64> {
    static GROUPED: OnceLock<Regex> = OnceLock::new();
    let grouped = GROUPED
        .get_or_init(|| Regex::new(r"^[+-]?\d{1,3}(,\d{3})+(\.\d+)?$").expect("regex is valid"));

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let value = if grouped.is_match(raw) {
        raw.replace(',', "").parse::<f64>().ok()
    } else {
        raw.parse::<f64>().ok()
    };
    value.filter(|v| v.is_finite())
}

fn csv_error(err: csv::Error) -> ParseError {
    ParseError::Csv(err.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
