//! Summary exports (JSON and CSV).

use std::path::Path;

use health_core::error::Result;
use health_core::formatting::format_timestamp;
use tracing::info;

use crate::summarizer::{MetricStats, Summary};

const CSV_HEADER: [&str; 10] = [
    "metric", "bucket", "unit", "count", "sum", "mean", "min", "max", "first", "last",
];

/// Write `summary` as pretty-printed JSON.
pub fn write_summary_json(summary: &Summary, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json + "\n")?;
    info!("Wrote summary JSON to {}", path.display());
    Ok(())
}

/// Write `summary` as CSV: one row per metric, then one per bucket.
///
/// Metric-level rows leave the `bucket` column empty.
pub fn write_summary_csv(summary: &Summary, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(CSV_HEADER)?;

    for (metric, stats) in &summary.metrics {
        writer.write_record(row(metric.as_str(), "", stats))?;
        if let Some(per_bucket) = summary.buckets.get(metric) {
            for (key, stats) in per_bucket {
                writer.write_record(row(metric.as_str(), key, stats))?;
            }
        }
    }

    writer.flush()?;
    info!("Wrote summary CSV to {}", path.display());
    Ok(())
}

fn row(metric: &str, bucket: &str, s: &MetricStats) -> [String; 10] {
    [
        metric.to_string(),
        bucket.to_string(),
        s.unit.clone(),
        s.count.to_string(),
        s.sum.to_string(),
        s.mean.to_string(),
        s.min.to_string(),
        s.max.to_string(),
        format_timestamp(s.first),
        format_timestamp(s.last),
    ]
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
