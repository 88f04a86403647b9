//! Main analysis pipeline.
//!
//! Orchestrates discovery, per-file parsing and summarization, returning an
//! [`AnalysisResult`] ready for the prompt composer and the exporters.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use health_core::error::{HealthError, Result};
use health_core::models::{Bucket, DataFormat, HealthRecord, MetricType, TimeWindow};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::discovery::{discover_files, DiscoveredFile};
use crate::parsers::{self, ParseContext};
use crate::summarizer::{Summarizer, Summary};

// ── Public types ──────────────────────────────────────────────────────────────

/// Inputs of [`analyze_directory`].
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub root: PathBuf,
    pub recursive: bool,
    pub window: TimeWindow,
    pub bucket: Option<Bucket>,
    /// Zone for naive timestamps and bucket boundaries.
    pub timezone: Tz,
    /// Records kept per file for display.
    pub sample_size: usize,
}

impl AnalysisOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            window: TimeWindow::all(),
            bucket: None,
            timezone: Tz::UTC,
            sample_size: 5,
        }
    }
}

/// What happened to one discovered file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileStatus {
    Parsed,
    Skipped { reason: String },
}

/// Per-file outcome, in discovery order.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub format: DataFormat,
    #[serde(flatten)]
    pub status: FileStatus,
    pub record_count: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    /// Distinct metrics found in the file, sorted.
    pub metrics: Vec<MetricType>,
    /// The first few records of the file.
    pub samples: Vec<HealthRecord>,
}

impl FileReport {
    fn parsed(file: &DiscoveredFile, records: &[HealthRecord], sample_size: usize) -> Self {
        let mut metrics: Vec<MetricType> = records.iter().map(|r| r.metric().clone()).collect();
        metrics.sort();
        metrics.dedup();
        Self {
            path: file.path.clone(),
            format: file.format,
            status: FileStatus::Parsed,
            record_count: records.len(),
            first: records.iter().map(|r| r.timestamp()).min(),
            last: records.iter().map(|r| r.timestamp()).max(),
            metrics,
            samples: records.iter().take(sample_size).cloned().collect(),
        }
    }

    fn skipped(file: &DiscoveredFile, reason: String) -> Self {
        Self {
            path: file.path.clone(),
            format: file.format,
            status: FileStatus::Skipped { reason },
            record_count: 0,
            first: None,
            last: None,
            metrics: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.status == FileStatus::Parsed
    }

    /// File name for display; falls back to the full path.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Metadata produced alongside the analysis result.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisMetadata {
    /// ISO-8601 timestamp when this result was generated.
    pub generated_at: String,
    pub files_discovered: usize,
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub records_parsed: usize,
    /// Wall-clock seconds spent reading and parsing files.
    pub load_time_seconds: f64,
    /// Wall-clock seconds spent summarizing.
    pub summarize_time_seconds: f64,
}

/// The complete output of [`analyze_directory`].
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub files: Vec<FileReport>,
    /// Every parsed record, in file order.
    pub records: Vec<HealthRecord>,
    pub summary: Summary,
    /// One message per skipped file or entry.
    pub warnings: Vec<String>,
    pub metadata: AnalysisMetadata,
}

// ── Public function ───────────────────────────────────────────────────────────

/// Run the full pipeline over `options.root`.
///
/// 1. Discover supported files.
/// 2. Read and parse each one; unreadable or unparsable files are skipped
///    with a warning.
/// 3. Summarize every parsed record.
///
/// Fails only when the directory is missing or holds no supported file.
pub fn analyze_directory(options: &AnalysisOptions) -> Result<AnalysisResult> {
    // ── Step 1: Discover ──────────────────────────────────────────────────────
    let discovery = discover_files(&options.root, options.recursive)?;
    if discovery.files.is_empty() {
        return Err(HealthError::NoDataFiles(options.root.clone()));
    }
    info!(
        "Found {} health file(s) in {}",
        discovery.files.len(),
        options.root.display()
    );

    // ── Step 2: Parse ─────────────────────────────────────────────────────────
    let load_start = std::time::Instant::now();
    let mut warnings = discovery.warnings;
    let mut files = Vec::with_capacity(discovery.files.len());
    let mut records = Vec::new();

    for file in &discovery.files {
        match load_file(file, options.timezone) {
            Ok(parsed) => {
                debug!(
                    "Parsed {} record(s) from {} ({})",
                    parsed.len(),
                    file.path.display(),
                    file.format
                );
                files.push(FileReport::parsed(file, &parsed, options.sample_size));
                records.extend(parsed);
            }
            Err(e) if e.is_skippable() => {
                let msg = format!("Skipping {}", e);
                warn!("{}", msg);
                warnings.push(msg);
                files.push(FileReport::skipped(file, e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    let load_time = load_start.elapsed().as_secs_f64();

    // ── Step 3: Summarize ─────────────────────────────────────────────────────
    let summarize_start = std::time::Instant::now();
    let summary =
        Summarizer::new(options.window, options.bucket, options.timezone).summarize(&records);
    let summarize_time = summarize_start.elapsed().as_secs_f64();

    let files_parsed = files.iter().filter(|f| f.is_parsed()).count();
    info!(
        "Loaded {} record(s) from {} of {} file(s); {} in window",
        records.len(),
        files_parsed,
        files.len(),
        summary.records_in_window
    );

    let metadata = AnalysisMetadata {
        generated_at: Utc::now().to_rfc3339(),
        files_discovered: files.len(),
        files_parsed,
        files_skipped: files.len() - files_parsed,
        records_parsed: records.len(),
        load_time_seconds: load_time,
        summarize_time_seconds: summarize_time,
    };

    Ok(AnalysisResult {
        files,
        records,
        summary,
        warnings,
        metadata,
    })
}

/// Read and parse one file.
pub fn load_file(file: &DiscoveredFile, timezone: Tz) -> Result<Vec<HealthRecord>> {
    let bytes = std::fs::read(&file.path).map_err(|source| HealthError::FileRead {
        path: file.path.clone(),
        source,
    })?;
    parse_bytes(&file.path, file.format, &bytes, timezone)
}

fn parse_bytes(
    path: &Path,
    format: DataFormat,
    bytes: &[u8],
    timezone: Tz,
) -> Result<Vec<HealthRecord>> {
    let ctx = ParseContext::new(path, timezone);
    parsers::parse(format, bytes, &ctx).map_err(|source| HealthError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
