use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

// ── System timezone detection ─────────────────────────────────────────────────

/// Detect the IANA timezone name of the running system.
///
/// Falls back to `"UTC"` if detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

/// Resolve a timezone name (or `"auto"`) to a [`Tz`].
///
/// Unknown names fall back to UTC with a warning.
pub fn resolve_timezone(name: &str) -> Tz {
    let name = if name.eq_ignore_ascii_case("auto") {
        get_system_timezone()
    } else {
        name.to_string()
    };
    name.parse::<Tz>().unwrap_or_else(|_| {
        warn!("Unrecognised timezone \"{}\", falling back to UTC", name);
        Tz::UTC
    })
}

/// Validate that `tz_name` is a recognised IANA timezone identifier.
pub fn validate_timezone(tz_name: &str) -> bool {
    tz_name.parse::<Tz>().is_ok()
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

// ── TimestampParser ───────────────────────────────────────────────────────────

/// Offset-carrying layouts, tried before the naive ones.
const OFFSET_FORMATS: &[&str] = &[
    // Apple Health export: `2024-01-15 08:00:00 -0500`
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
];

/// Layouts without an offset; interpreted in the parser's timezone.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    // Slash dates are month-first, same as DATE_FORMATS.
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Parses the timestamp spellings found across health exports.
///
/// Strings that carry an offset are honoured as-is; naive date-times and bare
/// dates are taken to be wall-clock time in `tz`.
#[derive(Debug, Clone, Copy)]
pub struct TimestampParser {
    tz: Tz,
}

impl Default for TimestampParser {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl TimestampParser {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Parse `s` into a UTC instant; `None` for empty or unrecognised input.
    pub fn parse(&self, s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        // Replace trailing 'Z' with '+00:00' for RFC 3339 compatibility.
        let normalised = match s.strip_suffix('Z') {
            Some(stripped) => format!("{}+00:00", stripped),
            None => s.to_string(),
        };
        if let Ok(dt) = DateTime::parse_from_rfc3339(&normalised) {
            return Some(dt.with_timezone(&Utc));
        }

        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
        }

        if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
            return Some(dt.with_timezone(&Utc));
        }

        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return self.localize(naive);
            }
        }

        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
                return self.localize(date.and_hms_opt(0, 0, 0)?);
            }
        }

        if let Some(dt) = parse_epoch(s) {
            return Some(dt);
        }

        debug!("Could not parse timestamp \"{}\"", s);
        None
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Unix seconds (10 digits) or milliseconds (13 digits).
fn parse_epoch(s: &str) -> Option<DateTime<Utc>> {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: i64 = s.parse().ok()?;
    match s.len() {
        10 => DateTime::from_timestamp(n, 0),
        13 => DateTime::from_timestamp_millis(n),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
