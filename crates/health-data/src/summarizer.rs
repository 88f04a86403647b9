//! Per-metric statistics over a time window, optionally split into buckets.
//!
//! Modelled as a pure fold: the same set of records always yields the same
//! [`Summary`], whatever order they arrive in.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use health_core::models::{Bucket, HealthRecord, MetricType, TimeWindow};
use serde::Serialize;
use tracing::debug;

// ── MetricStats ───────────────────────────────────────────────────────────────

/// Running statistics of one metric in its canonical unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStats {
    pub unit: String,
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

impl MetricStats {
    fn start(record: &HealthRecord) -> Self {
        Self {
            unit: record.unit().to_string(),
            count: 1,
            sum: record.value(),
            mean: record.value(),
            min: record.value(),
            max: record.value(),
            first: record.timestamp(),
            last: record.timestamp(),
        }
    }

    fn add(&mut self, record: &HealthRecord) {
        let v = record.value();
        self.count += 1;
        self.sum += v;
        self.mean = self.sum / self.count as f64;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.first = self.first.min(record.timestamp());
        self.last = self.last.max(record.timestamp());
    }
}

fn accumulate(slot: &mut Option<MetricStats>, record: &HealthRecord) {
    match slot {
        Some(stats) => stats.add(record),
        None => *slot = Some(MetricStats::start(record)),
    }
}

// ── Summary ───────────────────────────────────────────────────────────────────

/// Everything the prompt and the exports need to know about a set of records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub window: TimeWindow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<Bucket>,
    /// Records that fell inside the window, before unit filtering.
    pub records_in_window: usize,
    pub metrics: BTreeMap<MetricType, MetricStats>,
    /// `metric -> bucket key -> stats`; empty without a bucket.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub buckets: BTreeMap<MetricType, BTreeMap<String, MetricStats>>,
    /// Records left out because their unit differs from the metric's canonical unit.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unit_mismatches: BTreeMap<MetricType, usize>,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

// ── Summarizer ────────────────────────────────────────────────────────────────

/// Configuration for [`Summarizer::summarize`].
#[derive(Debug, Clone, Copy)]
pub struct Summarizer {
    pub window: TimeWindow,
    pub bucket: Option<Bucket>,
    /// Zone in which bucket boundaries are drawn.
    pub timezone: Tz,
}

impl Default for Summarizer {
    fn default() -> Self {
        Self {
            window: TimeWindow::all(),
            bucket: None,
            timezone: Tz::UTC,
        }
    }
}

impl Summarizer {
    pub fn new(window: TimeWindow, bucket: Option<Bucket>, timezone: Tz) -> Self {
        Self {
            window,
            bucket,
            timezone,
        }
    }

    pub fn summarize(&self, records: &[HealthRecord]) -> Summary {
        let mut in_window: Vec<&HealthRecord> = records
            .iter()
            .filter(|r| self.window.contains(r.timestamp()))
            .collect();
        in_window.sort_by(|a, b| {
            a.metric()
                .cmp(b.metric())
                .then_with(|| a.timestamp().cmp(&b.timestamp()))
                .then_with(|| a.value().total_cmp(&b.value()))
                .then_with(|| a.unit().cmp(b.unit()))
                .then_with(|| a.source().cmp(&b.source()))
        });

        let units = canonical_units(&in_window);

        let mut metrics: BTreeMap<MetricType, Option<MetricStats>> = BTreeMap::new();
        let mut buckets: BTreeMap<MetricType, BTreeMap<String, Option<MetricStats>>> =
            BTreeMap::new();
        let mut unit_mismatches: BTreeMap<MetricType, usize> = BTreeMap::new();

        for record in &in_window {
            let metric = record.metric();
            if units.get(metric).map(String::as_str) != Some(record.unit()) {
                *unit_mismatches.entry(metric.clone()).or_default() += 1;
                continue;
            }

            accumulate(metrics.entry(metric.clone()).or_default(), record);

            if let Some(bucket) = self.bucket {
                let key = bucket.key(record.timestamp(), self.timezone);
                accumulate(
                    buckets
                        .entry(metric.clone())
                        .or_default()
                        .entry(key)
                        .or_default(),
                    record,
                );
            }
        }

        for (metric, dropped) in &unit_mismatches {
            debug!(
                "Excluded {} {} record(s) not in {}",
                dropped,
                metric,
                units.get(metric).map(String::as_str).unwrap_or("?")
            );
        }

        Summary {
            window: self.window,
            bucket: self.bucket,
            records_in_window: in_window.len(),
            metrics: metrics
                .into_iter()
                .filter_map(|(m, s)| s.map(|s| (m, s)))
                .collect(),
            buckets: buckets
                .into_iter()
                .map(|(m, per_key)| {
                    let per_key = per_key
                        .into_iter()
                        .filter_map(|(k, s)| s.map(|s| (k, s)))
                        .collect();
                    (m, per_key)
                })
                .collect(),
            unit_mismatches,
        }
    }
}

/// The most frequent unit of every metric; ties go to the smallest string.
fn canonical_units(records: &[&HealthRecord]) -> BTreeMap<MetricType, String> {
    let mut counts: BTreeMap<&MetricType, BTreeMap<&str, usize>> = BTreeMap::new();
    for r in records {
        *counts.entry(r.metric()).or_default().entry(r.unit()).or_default() += 1;
    }

    counts
        .into_iter()
        .filter_map(|(metric, per_unit)| {
            // Iteration is in ascending unit order, so strict `>` keeps the smallest on ties.
            let mut best: Option<(&str, usize)> = None;
            for (unit, n) in per_unit {
                if best.map_or(true, |(_, m)| n > m) {
                    best = Some((unit, n));
                }
            }
            best.map(|(unit, _)| (metric.clone(), unit.to_string()))
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
