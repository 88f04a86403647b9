use std::path::PathBuf;
use thiserror::Error;

/// Why a single input file could not be turned into health records.
///
/// A parser that returns one of these has produced no records at all; the
/// pipeline logs a warning and moves on to the next file.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The file has no content (or only whitespace).
    #[error("file is empty")]
    Empty,

    /// Malformed XML in a health export or GPX track.
    #[error("malformed XML: {0}")]
    Xml(String),

    /// Structural CSV problem (ragged rows, bad quoting, invalid UTF-8).
    #[error("malformed CSV: {0}")]
    Csv(String),

    /// The FIT decoder rejected the file (bad header, CRC mismatch, truncation).
    #[error("malformed FIT file: {0}")]
    Fit(String),

    /// The document parsed but its root element is not the one expected.
    #[error("unexpected root element <{found}>, expected <{expected}>")]
    UnexpectedRoot { expected: String, found: String },

    /// A required column is absent from a tabular file.
    #[error("missing required column: {0}")]
    MissingColumn(String),
}

/// All errors produced by the health-query crates.
#[derive(Error, Debug)]
pub enum HealthError {
    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file was read but could not be parsed.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// The directory to scan does not exist.
    #[error("Data path not found: {0}")]
    DataPathNotFound(PathBuf),

    /// No supported health files were found under the given directory.
    #[error("No .xml, .csv, .gpx or .fit files found in {0}")]
    NoDataFiles(PathBuf),

    /// Files were found but none of them produced a record.
    #[error("No health records could be parsed from {0}")]
    NoRecords(PathBuf),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A JSON document could not be produced or parsed.
    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A CSV export could not be written.
    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HealthError {
    /// `true` for the per-file errors that the pipeline skips with a warning.
    pub fn is_skippable(&self) -> bool {
        matches!(self, HealthError::FileRead { .. } | HealthError::Parse { .. })
    }
}

/// Convenience alias used throughout the health crates.
pub type Result<T> = std::result::Result<T, HealthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = HealthError::FileRead {
            path: PathBuf::from("/exports/steps.csv"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("/exports/steps.csv"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_error_display_parse() {
        let err = HealthError::Parse {
            path: PathBuf::from("ride.gpx"),
            source: ParseError::Empty,
        };
        assert_eq!(err.to_string(), "Failed to parse ride.gpx: file is empty");
    }

    #[test]
    fn test_error_display_unexpected_root() {
        let err = ParseError::UnexpectedRoot {
            expected: "HealthData".to_string(),
            found: "ClinicalDocument".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected root element <ClinicalDocument>, expected <HealthData>"
        );
    }

    #[test]
    fn test_error_display_missing_column() {
        let err = ParseError::MissingColumn("date".to_string());
        assert_eq!(err.to_string(), "missing required column: date");
    }

    #[test]
    fn test_error_display_data_path_not_found() {
        let err = HealthError::DataPathNotFound(PathBuf::from("/missing/dir"));
        assert_eq!(err.to_string(), "Data path not found: /missing/dir");
    }

    #[test]
    fn test_error_display_no_data_files() {
        let err = HealthError::NoDataFiles(PathBuf::from("/empty/dir"));
        assert_eq!(
            err.to_string(),
            "No .xml, .csv, .gpx or .fit files found in /empty/dir"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = HealthError::Config("unknown provider".to_string());
        assert_eq!(err.to_string(), "Configuration error: unknown provider");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: HealthError = io_err.into();
        assert!(err.to_string().contains("denied"));
        assert!(!err.is_skippable());
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
        let err: HealthError = json_err.into();
        assert!(err.to_string().contains("Failed to serialize JSON"));
    }

    #[test]
    fn test_per_file_errors_are_skippable() {
        let parse = HealthError::Parse {
            path: PathBuf::from("a.fit"),
            source: ParseError::Fit("crc".to_string()),
        };
        let read = HealthError::FileRead {
            path: PathBuf::from("b.csv"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "x"),
        };
        assert!(parse.is_skippable());
        assert!(read.is_skippable());
        assert!(!HealthError::NoRecords(PathBuf::from(".")).is_skippable());
    }
}
