//! Format parsers.
//!
//! Every parser turns the raw bytes of one file into zero or more
//! [`HealthRecord`]s or fails with a [`ParseError`]. A failing parser never
//! hands back the records it had produced before the failure.

pub mod fit;
pub mod gpx;
pub mod markup;
pub mod tabular;

use std::path::Path;

use chrono_tz::Tz;
use health_core::error::ParseError;
use health_core::models::{DataFormat, HealthRecord};
use health_core::time_utils::TimestampParser;
use quick_xml::events::BytesStart;

/// Per-file information a parser may need besides the bytes themselves.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    /// File the bytes were read from; stamped onto every record.
    pub source: &'a Path,
    /// Zone used for timestamps that carry no offset.
    pub timezone: Tz,
}

impl<'a> ParseContext<'a> {
    pub fn new(source: &'a Path, timezone: Tz) -> Self {
        Self { source, timezone }
    }

    pub fn timestamps(&self) -> TimestampParser {
        TimestampParser::new(self.timezone)
    }
}

/// Parse `input` as `format`.
pub fn parse(
    format: DataFormat,
    input: &[u8],
    ctx: &ParseContext<'_>,
) -> Result<Vec<HealthRecord>, ParseError> {
    if input.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }

    let records = match format {
        DataFormat::Markup => markup::parse(input, ctx)?,
        DataFormat::Tabular => tabular::parse(input, ctx)?,
        DataFormat::Gpx => gpx::parse(input, ctx)?,
        DataFormat::Fit => fit::parse(input, ctx)?,
    };

    Ok(records
        .into_iter()
        .map(|r| r.with_source(ctx.source))
        .collect())
}

/// Name of an XML element or attribute without its namespace prefix.
pub(crate) fn local_name(qualified: &[u8]) -> &[u8] {
    match qualified.iter().rposition(|&b| b == b':') {
        Some(idx) => &qualified[idx + 1..],
        None => qualified,
    }
}

/// Fail unless the first element of a document is `<expected>`.
///
/// Call for every start tag; only the first one is checked.
pub(crate) fn check_root(
    e: &BytesStart<'_>,
    expected: &str,
    seen_root: &mut bool,
) -> Result<(), ParseError> {
    if *seen_root {
        return Ok(());
    }
    *seen_root = true;
    let found = String::from_utf8_lossy(local_name(e.name().as_ref())).into_owned();
    if found != expected {
        return Err(ParseError::UnexpectedRoot {
            expected: expected.to_string(),
            found,
        });
    }
    Ok(())
}
