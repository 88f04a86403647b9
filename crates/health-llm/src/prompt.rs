//! Prompt composition.
//!
//! Turns the per-file reports and the metric summary into the system and user
//! messages sent to the model. Output depends only on the inputs, so the same
//! data and date always produce the same prompt.

use chrono::NaiveDate;
use health_core::formatting::{format_metric_value, format_range, format_timestamp};
use health_core::models::TimeWindow;
use health_data::analysis::FileReport;
use health_data::summarizer::{MetricStats, Summary};

pub const SYSTEM_PROMPT: &str =
    "You are a health data analyst. Provide detailed analysis and actionable insights.";

const INTRO: &str = "Analyze this personal health data and provide insights.";

const DEFAULT_REQUEST: &str = "Please provide a comprehensive analysis including:\n\
1. Notable patterns or trends\n\
2. Unusual findings\n\
3. Actionable health insights\n\
4. Areas for improvement\n";

/// Width of the rule separating file blocks.
const RULE_WIDTH: usize = 40;

/// The two messages of a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Everything a prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    /// The user's question; `None` asks for the default analysis.
    pub text: Option<&'a str>,
    pub files: &'a [FileReport],
    pub summary: &'a Summary,
    /// Date the model is told to treat as today.
    pub today: NaiveDate,
}

/// Builds [`Prompt`]s from [`Query`]s.
#[derive(Debug, Clone, Copy)]
pub struct QueryComposer {
    /// Most recent bucket rows listed per metric.
    pub max_bucket_rows: usize,
}

impl Default for QueryComposer {
    fn default() -> Self {
        Self { max_bucket_rows: 14 }
    }
}

impl QueryComposer {
    pub fn new(max_bucket_rows: usize) -> Self {
        Self { max_bucket_rows }
    }

    pub fn compose(&self, query: &Query<'_>) -> Prompt {
        let mut out = String::new();
        out.push_str(&format!(
            "Today's date is {}. Always use this as the current date.\n\n",
            query.today.format("%Y-%m-%d")
        ));
        out.push_str(INTRO);
        out.push_str("\n\n");

        let parsed = query.files.iter().filter(|f| f.is_parsed()).count();
        out.push_str(&format!("Data window: {}\n", describe_window(&query.summary.window)));
        out.push_str(&format!(
            "Files analyzed: {} ({} skipped)\n\n",
            parsed,
            query.files.len() - parsed
        ));

        for file in query.files.iter().filter(|f| f.is_parsed()) {
            file_block(&mut out, file);
            out.push('\n');
            out.push_str(&"=".repeat(RULE_WIDTH));
            out.push('\n');
        }

        out.push('\n');
        self.summary_block(&mut out, query.summary);

        match query.text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => out.push_str(&format!("\nUser Query: {}\n", text)),
            None => {
                out.push('\n');
                out.push_str(DEFAULT_REQUEST);
            }
        }

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user: out,
        }
    }

    fn summary_block(&self, out: &mut String, summary: &Summary) {
        out.push_str("Metric summary:\n");
        if summary.is_empty() {
            out.push_str("(no records in the selected window)\n");
            return;
        }

        for (metric, stats) in &summary.metrics {
            out.push_str(&format!("- {}: {}\n", metric, stats_line(stats)));

            if let (Some(bucket), Some(per_key)) = (summary.bucket, summary.buckets.get(metric)) {
                let skip = per_key.len().saturating_sub(self.max_bucket_rows);
                if skip > 0 {
                    out.push_str(&format!(
                        "  {} (last {} of {}):\n",
                        bucket.label(),
                        per_key.len() - skip,
                        per_key.len()
                    ));
                } else {
                    out.push_str(&format!("  {}:\n", bucket.label()));
                }
                for (key, s) in per_key.iter().skip(skip) {
                    out.push_str(&format!(
                        "    {}: total {}, mean {}, n={}\n",
                        key,
                        format_metric_value(s.sum),
                        format_metric_value(s.mean),
                        s.count
                    ));
                }
            }

            if let Some(dropped) = summary.unit_mismatches.get(metric) {
                out.push_str(&format!(
                    "  ({} record(s) in other units excluded)\n",
                    dropped
                ));
            }
        }
    }
}

fn file_block(out: &mut String, file: &FileReport) {
    out.push_str(&format!("File: {}\n", file.name()));
    out.push_str(&format!("Type: {}\n", file.format.display_name()));
    out.push_str(&format!("Total Records: {}\n", file.record_count));
    out.push_str(&format!("Date Range: {}\n", format_range(file.first, file.last)));

    let metrics: Vec<&str> = file.metrics.iter().map(|m| m.as_str()).collect();
    out.push_str(&format!("Metrics: {}\n", metrics.join(", ")));

    if !file.samples.is_empty() {
        out.push_str("Sample Records:\n");
        for r in &file.samples {
            out.push_str(&format!(
                "  {} {} = {} {}\n",
                format_timestamp(r.timestamp()),
                r.metric(),
                format_metric_value(r.value()),
                r.unit()
            ));
        }
    }
}

fn stats_line(s: &MetricStats) -> String {
    format!(
        "{} records, total {}, mean {}, min {}, max {} ({}), {}",
        s.count,
        format_metric_value(s.sum),
        format_metric_value(s.mean),
        format_metric_value(s.min),
        format_metric_value(s.max),
        s.unit,
        format_range(Some(s.first), Some(s.last))
    )
}

fn describe_window(window: &TimeWindow) -> String {
    match (window.start, window.end) {
        (None, None) => "all available data".to_string(),
        (Some(s), None) => format!("from {}", format_timestamp(s)),
        (None, Some(e)) => format!("before {}", format_timestamp(e)),
        (Some(s), Some(e)) => format!("{} to {} (exclusive)", format_timestamp(s), format_timestamp(e)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use chrono_tz::Tz;
    use health_core::models::{Bucket, DataFormat, HealthRecord, MetricType};
    use health_data::analysis::FileStatus;
    use health_data::summarizer::Summarizer;
    use std::path::PathBuf;

    fn rec(at: &str, value: f64) -> HealthRecord {
        let ts = DateTime::parse_from_rfc3339(at).unwrap().with_timezone(&Utc);
        HealthRecord::new(ts, MetricType::new("step_count"), value, "count").unwrap()
    }

    fn records() -> Vec<HealthRecord> {
        (1..=20)
            .map(|d| rec(&format!("2024-01-{:02}T12:00:00Z", d), 1000.0))
            .collect()
    }

    fn report(records: &[HealthRecord]) -> FileReport {
        FileReport {
            path: PathBuf::from("/data/steps.csv"),
            format: DataFormat::Tabular,
            status: FileStatus::Parsed,
            record_count: records.len(),
            first: records.first().map(|r| r.timestamp()),
            last: records.last().map(|r| r.timestamp()),
            metrics: vec![MetricType::new("step_count")],
            samples: records.iter().take(2).cloned().collect(),
        }
    }

    fn skipped() -> FileReport {
        FileReport {
            path: PathBuf::from("/data/ride.gpx"),
            format: DataFormat::Gpx,
            status: FileStatus::Skipped {
                reason: "file is empty".to_string(),
            },
            record_count: 0,
            first: None,
            last: None,
            metrics: vec![],
            samples: vec![],
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_compose_default_request() {
        let recs = records();
        let summary = Summarizer::default().summarize(&recs);
        let files = vec![report(&recs), skipped()];
        let prompt = QueryComposer::default().compose(&Query {
            text: None,
            files: &files,
            summary: &summary,
            today: today(),
        });

        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert!(prompt
            .user
            .starts_with("Today's date is 2024-03-01. Always use this as the current date.\n\n"));
        assert!(prompt.user.contains("File: steps.csv\nType: CSV\nTotal Records: 20\n"));
        assert!(prompt.user.contains(&"=".repeat(40)));
        assert!(!prompt.user.contains("ride.gpx"));
        assert!(prompt.user.contains("Files analyzed: 1 (1 skipped)"));
        assert!(prompt
            .user
            .contains("- step_count: 20 records, total 20,000, mean 1,000"));
        assert!(prompt.user.ends_with(DEFAULT_REQUEST));
        assert!(!prompt.user.contains("User Query:"));
    }

    #[test]
    fn test_compose_user_query() {
        let recs = records();
        let summary = Summarizer::default().summarize(&recs);
        let files = vec![report(&recs)];
        let prompt = QueryComposer::default().compose(&Query {
            text: Some("How active was I in January?"),
            files: &files,
            summary: &summary,
            today: today(),
        });
        assert!(prompt
            .user
            .ends_with("\nUser Query: How active was I in January?\n"));
        assert!(!prompt.user.contains("comprehensive analysis"));
    }

    #[test]
    fn test_blank_query_falls_back_to_default() {
        let summary = Summarizer::default().summarize(&[]);
        let prompt = QueryComposer::default().compose(&Query {
            text: Some("   "),
            files: &[],
            summary: &summary,
            today: today(),
        });
        assert!(prompt.user.ends_with(DEFAULT_REQUEST));
        assert!(prompt.user.contains("(no records in the selected window)"));
    }

    #[test]
    fn test_bucket_rows_are_capped_to_most_recent() {
        let recs = records();
        let summary =
            Summarizer::new(TimeWindow::all(), Some(Bucket::Day), Tz::UTC).summarize(&recs);
        let prompt = QueryComposer::new(3).compose(&Query {
            text: None,
            files: &[],
            summary: &summary,
            today: today(),
        });
        assert!(prompt.user.contains("  daily (last 3 of 20):\n"));
        assert!(prompt.user.contains("    2024-01-20: total 1,000"));
        assert!(prompt.user.contains("    2024-01-18:"));
        assert!(!prompt.user.contains("    2024-01-17:"));
    }

    #[test]
    fn test_samples_listed() {
        let recs = records();
        let summary = Summarizer::default().summarize(&recs);
        let files = vec![report(&recs)];
        let prompt = QueryComposer::default().compose(&Query {
            text: None,
            files: &files,
            summary: &summary,
            today: today(),
        });
        assert!(prompt
            .user
            .contains("Sample Records:\n  2024-01-01 12:00 UTC step_count = 1,000 count\n"));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let recs = records();
        let summary = Summarizer::default().summarize(&recs);
        let files = vec![report(&recs), skipped()];
        let query = Query {
            text: Some("trends?"),
            files: &files,
            summary: &summary,
            today: today(),
        };
        let composer = QueryComposer::default();
        assert_eq!(composer.compose(&query), composer.compose(&query));
    }

    #[test]
    fn test_describe_window() {
        assert_eq!(describe_window(&TimeWindow::all()), "all available data");
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            describe_window(&TimeWindow::new(Some(start), None)),
            "from 2024-01-01 00:00 UTC"
        );
    }
}
