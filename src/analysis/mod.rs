//! Offline Analysis Module
//!
//! Statistics over recorded series and timing logs.
//!
//! # Components
//!
//! - [`stats`]: summaries, percentiles and the bootstrap median CI
//! - [`MetricExtractor`]: regex-based timing extraction from text logs
//! - [`SeriesReport`] / [`LogReport`]: rendered summaries

pub mod extract;
pub mod report;
pub mod stats;

pub use extract::{LogExtraction, MetricExtractor, MetricObservations, MetricPattern, ObservationSet};
pub use report::{real_cpu_average, LogReport, MetricReport, SeriesReport};
pub use stats::{bootstrap_ci95_median, percentile, summarize, ConfidenceInterval, Summary};
