//! Shared building blocks for health-query.
//!
//! Holds the normalised data model, the error taxonomy, timestamp handling,
//! number formatting and the command-line settings used by every other crate.

pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;
pub mod time_utils;

pub use error::{HealthError, ParseError, Result};
pub use models::{Bucket, DataFormat, GeoPoint, HealthRecord, MetricType, TimeWindow};
