//! File discovery, format parsers, summarization and exports for health-query.

pub mod analysis;
pub mod discovery;
pub mod export;
pub mod parsers;
pub mod summarizer;

pub use analysis::{analyze_directory, AnalysisOptions, AnalysisResult, FileReport, FileStatus};
pub use summarizer::{MetricStats, Summarizer, Summary};
