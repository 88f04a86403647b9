use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ── DataFormat ────────────────────────────────────────────────────────────────

/// The input formats the parsers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Apple Health `export.xml` (structured markup).
    Markup,
    /// Comma-separated tabular data.
    Tabular,
    /// GPS-track exchange format.
    Gpx,
    /// Garmin/ANT+ Flexible and Interoperable data Transfer binary.
    Fit,
}

impl DataFormat {
    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xml" => Some(DataFormat::Markup),
            "csv" => Some(DataFormat::Tabular),
            "gpx" => Some(DataFormat::Gpx),
            "fit" => Some(DataFormat::Fit),
            _ => None,
        }
    }

    /// Human-readable name used in logs and in the LLM prompt.
    pub fn display_name(&self) -> &'static str {
        match self {
            DataFormat::Markup => "Apple Health XML",
            DataFormat::Tabular => "CSV",
            DataFormat::Gpx => "GPX",
            DataFormat::Fit => "FIT",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ── MetricType ────────────────────────────────────────────────────────────────

/// Canonical snake_case name of a measured quantity, e.g. `"step_count"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricType(String);

impl MetricType {
    pub const STEP_COUNT: &'static str = "step_count";
    pub const HEART_RATE: &'static str = "heart_rate";
    pub const DISTANCE: &'static str = "distance";
    pub const ELEVATION: &'static str = "elevation";
    pub const CADENCE: &'static str = "cadence";
    pub const SPEED: &'static str = "speed";
    pub const POWER: &'static str = "power";
    pub const TEMPERATURE: &'static str = "temperature";
    pub const ACTIVE_ENERGY_BURNED: &'static str = "active_energy_burned";
    pub const SLEEP_ANALYSIS: &'static str = "sleep_analysis";
    pub const WORKOUT_DURATION: &'static str = "workout_duration";
    pub const WORKOUT_DISTANCE: &'static str = "workout_distance";
    pub const WORKOUT_ENERGY_BURNED: &'static str = "workout_energy_burned";
    pub const BODY_MASS: &'static str = "body_mass";

    /// Wrap an already-canonical name without normalising it.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Normalise a raw identifier from any source into its canonical name.
    ///
    /// HealthKit prefixes are stripped, CamelCase and spaced headers become
    /// snake_case, and common aliases collapse onto one name:
    ///
    /// ```
    /// use health_core::models::MetricType;
    ///
    /// assert_eq!(MetricType::canonical("HKQuantityTypeIdentifierStepCount").as_str(), "step_count");
    /// assert_eq!(MetricType::canonical("Heart Rate").as_str(), "heart_rate");
    /// assert_eq!(MetricType::canonical("Steps").as_str(), "step_count");
    /// ```
    pub fn canonical(raw: &str) -> Self {
        let trimmed = raw.trim();
        let stripped = HEALTHKIT_PREFIXES
            .iter()
            .find_map(|p| trimmed.strip_prefix(p))
            .unwrap_or(trimmed);

        let snake = to_snake_case(stripped);
        let name = alias_for(&snake).map(str::to_string).unwrap_or(snake);
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unit assumed when a source names the metric but not its unit.
    pub fn default_unit(&self) -> &'static str {
        match self.0.as_str() {
            Self::STEP_COUNT => "count",
            Self::HEART_RATE | Self::CADENCE => "count/min",
            Self::DISTANCE | Self::ELEVATION | Self::WORKOUT_DISTANCE => "m",
            Self::SPEED => "m/s",
            Self::POWER => "W",
            Self::TEMPERATURE => "degC",
            Self::ACTIVE_ENERGY_BURNED | Self::WORKOUT_ENERGY_BURNED => "kcal",
            Self::SLEEP_ANALYSIS => "hr",
            Self::WORKOUT_DURATION => "min",
            Self::BODY_MASS => "kg",
            _ => "",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricType {
    fn from(raw: &str) -> Self {
        MetricType::canonical(raw)
    }
}

const HEALTHKIT_PREFIXES: &[&str] = &[
    "HKQuantityTypeIdentifier",
    "HKCategoryTypeIdentifier",
    "HKDataType",
];

fn alias_for(snake: &str) -> Option<&'static str> {
    let canonical = match snake {
        "steps" | "step" | "stepcount" => MetricType::STEP_COUNT,
        "hr" | "heartrate" | "heart_rate_bpm" | "bpm" | "pulse" => MetricType::HEART_RATE,
        "cad" | "cadence_rpm" => MetricType::CADENCE,
        "ele" | "altitude" | "enhanced_altitude" => MetricType::ELEVATION,
        "calories" | "active_calories" | "active_energy" | "total_calories" => {
            MetricType::ACTIVE_ENERGY_BURNED
        }
        "weight" => MetricType::BODY_MASS,
        "enhanced_speed" => MetricType::SPEED,
        "sleep" => MetricType::SLEEP_ANALYSIS,
        _ => return None,
    };
    Some(canonical)
}

fn to_snake_case(raw: &str) -> String {
    static LOWER_UPPER: OnceLock<Regex> = OnceLock::new();
    static ACRONYM: OnceLock<Regex> = OnceLock::new();
    let lower_upper =
        LOWER_UPPER.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("regex is valid"));
    let acronym =
        ACRONYM.get_or_init(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("regex is valid"));

    let split = acronym.replace_all(raw, "${1}_${2}");
    let split = lower_upper.replace_all(&split, "${1}_${2}");

    let mut out = String::with_capacity(split.len());
    for ch in split.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

// ── HealthRecord ──────────────────────────────────────────────────────────────

/// A geographic position attached to GPS-derived records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl GeoPoint {
    /// Great-circle distance in metres (haversine, mean Earth radius).
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_008.8;
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// A single normalised data point read from one source file.
///
/// Fields are private so a record cannot change after a parser produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    timestamp: DateTime<Utc>,
    metric: MetricType,
    value: f64,
    unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geo: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cadence: Option<f64>,
}

impl HealthRecord {
    /// Build a record, or `None` when `value` is NaN or infinite.
    pub fn new(
        timestamp: DateTime<Utc>,
        metric: MetricType,
        value: f64,
        unit: impl Into<String>,
    ) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Some(Self {
            timestamp,
            metric,
            value,
            unit: unit.into(),
            source: None,
            geo: None,
            cadence: None,
        })
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_geo(mut self, geo: Option<GeoPoint>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_cadence(mut self, cadence: Option<f64>) -> Self {
        self.cadence = cadence.filter(|c| c.is_finite());
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metric(&self) -> &MetricType {
        &self.metric
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn geo(&self) -> Option<&GeoPoint> {
        self.geo.as_ref()
    }

    pub fn cadence(&self) -> Option<f64> {
        self.cadence
    }
}

// ── TimeWindow ────────────────────────────────────────────────────────────────

/// Half-open `[start, end)` range of instants; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// The window covering every instant.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Build a window from calendar dates in `tz`.
    ///
    /// `since` starts at local midnight; `until` is inclusive, so the window
    /// ends at the local midnight that follows it.
    pub fn from_dates(since: Option<NaiveDate>, until: Option<NaiveDate>, tz: Tz) -> Self {
        let start = since.and_then(|d| local_midnight(d, tz));
        let end = until
            .and_then(|d| d.succ_opt())
            .and_then(|d| local_midnight(d, tz));
        Self { start, end }
    }

    /// The `days` days leading up to `now`.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: Some(now - Duration::days(i64::from(days))),
            end: None,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }
}

fn local_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Bucket ────────────────────────────────────────────────────────────────────

/// Calendar period used to sub-divide a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Day,
    Week,
    Month,
}

impl Bucket {
    /// Period key for `ts` as seen in `tz`: `2024-01-15`, `2024-W03` or `2024-01`.
    pub fn key(&self, ts: DateTime<Utc>, tz: Tz) -> String {
        let local = ts.with_timezone(&tz);
        match self {
            Bucket::Day => local.format("%Y-%m-%d").to_string(),
            Bucket::Week => local.format("%G-W%V").to_string(),
            Bucket::Month => local.format("%Y-%m").to_string(),
        }
    }

    /// Adjective used when labelling bucket rows (`daily`, `weekly`, `monthly`).
    pub fn label(&self) -> &'static str {
        match self {
            Bucket::Day => "daily",
            Bucket::Week => "weekly",
            Bucket::Month => "monthly",
        }
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Bucket::Day),
            "week" | "weekly" => Ok(Bucket::Week),
            "month" | "monthly" => Ok(Bucket::Month),
            other => Err(format!("unknown bucket: {other}")),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Bucket::Day => "day",
            Bucket::Week => "week",
            Bucket::Month => "month",
        };
        f.write_str(s)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    // ── DataFormat ────────────────────────────────────────────────────────────

    #[test]
    fn test_format_from_extension_is_case_insensitive() {
        assert_eq!(DataFormat::from_extension("CSV"), Some(DataFormat::Tabular));
        assert_eq!(DataFormat::from_extension("gpx"), Some(DataFormat::Gpx));
        assert_eq!(DataFormat::from_extension("Fit"), Some(DataFormat::Fit));
        assert_eq!(DataFormat::from_extension("xml"), Some(DataFormat::Markup));
        assert_eq!(DataFormat::from_extension("txt"), None);
    }

    #[test]
    fn test_format_display() {
        assert_eq!(DataFormat::Fit.to_string(), "FIT");
        assert_eq!(DataFormat::Markup.to_string(), "Apple Health XML");
    }

    // ── MetricType ────────────────────────────────────────────────────────────

    #[test]
    fn test_canonical_strips_healthkit_prefix() {
        assert_eq!(
            MetricType::canonical("HKQuantityTypeIdentifierActiveEnergyBurned").as_str(),
            "active_energy_burned"
        );
        assert_eq!(
            MetricType::canonical("HKCategoryTypeIdentifierSleepAnalysis").as_str(),
            "sleep_analysis"
        );
    }

    #[test]
    fn test_canonical_handles_acronyms() {
        assert_eq!(
            MetricType::canonical("HKQuantityTypeIdentifierHeartRateVariabilitySDNN").as_str(),
            "heart_rate_variability_sdnn"
        );
        assert_eq!(MetricType::canonical("VO2Max").as_str(), "vo2_max");
    }

    #[test]
    fn test_canonical_normalises_headers() {
        assert_eq!(MetricType::canonical("  Heart-Rate ").as_str(), "heart_rate");
        assert_eq!(MetricType::canonical("step count").as_str(), "step_count");
        assert_eq!(MetricType::canonical("HR").as_str(), "heart_rate");
        assert_eq!(MetricType::canonical("Weight").as_str(), "body_mass");
    }

    #[test]
    fn test_default_units() {
        assert_eq!(MetricType::canonical("steps").default_unit(), "count");
        assert_eq!(MetricType::new("heart_rate").default_unit(), "count/min");
        assert_eq!(MetricType::new("mystery").default_unit(), "");
    }

    // ── HealthRecord ──────────────────────────────────────────────────────────

    #[test]
    fn test_record_rejects_non_finite_values() {
        let t = ts("2024-01-15T08:00:00Z");
        assert!(HealthRecord::new(t, MetricType::new("x"), f64::NAN, "").is_none());
        assert!(HealthRecord::new(t, MetricType::new("x"), f64::INFINITY, "").is_none());
        assert!(HealthRecord::new(t, MetricType::new("x"), 1.5, "").is_some());
    }

    #[test]
    fn test_record_builders() {
        let geo = GeoPoint {
            latitude: 47.0,
            longitude: 8.0,
            elevation: Some(400.0),
        };
        let rec = HealthRecord::new(ts("2024-01-15T08:00:00Z"), MetricType::new("heart_rate"), 140.0, "count/min")
            .unwrap()
            .with_source("/data/ride.gpx")
            .with_geo(Some(geo))
            .with_cadence(Some(85.0));
        assert_eq!(rec.source(), Some(Path::new("/data/ride.gpx")));
        assert_eq!(rec.geo(), Some(&geo));
        assert_eq!(rec.cadence(), Some(85.0));
        assert_eq!(rec.unit(), "count/min");
    }

    #[test]
    fn test_geo_distance_one_degree_latitude() {
        let a = GeoPoint { latitude: 0.0, longitude: 0.0, elevation: None };
        let b = GeoPoint { latitude: 1.0, longitude: 0.0, elevation: None };
        let d = a.distance_to(&b);
        assert!((d - 111_195.0).abs() < 50.0, "got {d}");
        assert_eq!(a.distance_to(&a), 0.0);
    }

    // ── TimeWindow ────────────────────────────────────────────────────────────

    #[test]
    fn test_window_is_half_open() {
        let w = TimeWindow::new(Some(ts("2024-01-01T00:00:00Z")), Some(ts("2024-01-02T00:00:00Z")));
        assert!(w.contains(ts("2024-01-01T00:00:00Z")));
        assert!(w.contains(ts("2024-01-01T23:59:59Z")));
        assert!(!w.contains(ts("2024-01-02T00:00:00Z")));
        assert!(!w.contains(ts("2023-12-31T23:59:59Z")));
    }

    #[test]
    fn test_window_from_dates_until_inclusive() {
        let since = NaiveDate::from_ymd_opt(2024, 1, 1);
        let until = NaiveDate::from_ymd_opt(2024, 1, 31);
        let w = TimeWindow::from_dates(since, until, Tz::UTC);
        assert_eq!(w.start, Some(ts("2024-01-01T00:00:00Z")));
        assert_eq!(w.end, Some(ts("2024-02-01T00:00:00Z")));
        assert!(w.contains(ts("2024-01-31T22:00:00Z")));
    }

    #[test]
    fn test_window_from_dates_respects_timezone() {
        let since = NaiveDate::from_ymd_opt(2024, 1, 1);
        let w = TimeWindow::from_dates(since, None, chrono_tz::America::New_York);
        assert_eq!(w.start, Some(ts("2024-01-01T05:00:00Z")));
        assert!(w.end.is_none());
    }

    #[test]
    fn test_window_last_days() {
        let now = ts("2024-01-15T12:00:00Z");
        let w = TimeWindow::last_days(7, now);
        assert_eq!(w.start, Some(ts("2024-01-08T12:00:00Z")));
        assert!(w.contains(now));
        assert_eq!(w.end, None);
    }

    // ── Bucket ────────────────────────────────────────────────────────────────

    #[test]
    fn test_bucket_keys() {
        let t = ts("2024-01-15T08:00:00Z");
        assert_eq!(Bucket::Day.key(t, Tz::UTC), "2024-01-15");
        assert_eq!(Bucket::Week.key(t, Tz::UTC), "2024-W03");
        assert_eq!(Bucket::Month.key(t, Tz::UTC), "2024-01");
    }

    #[test]
    fn test_bucket_key_uses_local_day() {
        let t = ts("2024-01-15T03:00:00Z");
        assert_eq!(Bucket::Day.key(t, chrono_tz::America::New_York), "2024-01-14");
    }

    #[test]
    fn test_bucket_from_str() {
        assert_eq!("day".parse::<Bucket>(), Ok(Bucket::Day));
        assert_eq!("Monthly".parse::<Bucket>(), Ok(Bucket::Month));
        assert!("hour".parse::<Bucket>().is_err());
    }
}
