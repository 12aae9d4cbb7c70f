//! Reports
//!
//! Turns recorded series and extracted log timings into summaries, and
//! renders them as aligned text tables or JSON.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::analysis::extract::{LogExtraction, ObservationSet};
use crate::analysis::stats::{bootstrap_ci95_median, summarize, ConfidenceInterval, Summary};
use crate::config::AnalysisConfig;
use crate::monitoring::series::Sample;

/// Value the timing logs write for "not measured".
pub const TIMING_SENTINEL: f64 = 0.0;

const RULE_WIDTH: usize = 150;

/// Average utilisation over the whole series from the cumulative counter.
///
/// Uses only the first and last sample, so it is not skewed by idle ticks.
/// Returns 0 when the series spans no time.
pub fn real_cpu_average(samples: &[Sample], logical_cpus: usize) -> f64 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return 0.0;
    };
    let wall_secs = (last.timestamp_ms - first.timestamp_ms) as f64 / 1000.0;
    if wall_secs <= 0.0 {
        return 0.0;
    }
    let cpu_secs = last.cpu_time_usec.saturating_sub(first.cpu_time_usec) as f64 / 1_000_000.0;
    (cpu_secs / wall_secs) * 100.0 / logical_cpus.max(1) as f64
}

/// Summary of one recorded series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesReport {
    pub name: String,
    pub samples: usize,
    pub cpu_real_avg: f64,
    /// Ticks with non-zero utilisation only
    pub cpu_active: Summary,
    pub cpu_all: Summary,
    pub cpu_median_ci: ConfidenceInterval,
    pub mem_mib: Summary,
}

impl SeriesReport {
    /// Builds the report, or `None` for a series without samples.
    pub fn from_samples(
        name: &str,
        samples: &[Sample],
        logical_cpus: usize,
        config: &AnalysisConfig,
    ) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let cpu: Vec<f64> = samples.iter().map(|s| s.cpu_percent).collect();
        let active: Vec<f64> = cpu.iter().copied().filter(|p| *p > 0.0).collect();
        let mem: Vec<f64> = samples.iter().map(Sample::mem_mib).collect();

        Some(Self {
            name: name.to_string(),
            samples: samples.len(),
            cpu_real_avg: real_cpu_average(samples, logical_cpus),
            cpu_active: summarize(&active, &config.percentiles),
            cpu_all: summarize(&cpu, &config.percentiles),
            cpu_median_ci: bootstrap_ci95_median(
                &cpu,
                config.bootstrap_resamples,
                config.bootstrap_seed,
            ),
            mem_mib: summarize(&mem, &config.percentiles),
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n=== {} ===", self.name);
        let _ = writeln!(out, "Samples          :  {}", self.samples);
        let _ = writeln!(out, "CPU (real)       :  Avg {:7.3}", self.cpu_real_avg);
        let _ = writeln!(out, "CPU (active >0%) :  {}", summary_row(&self.cpu_active));
        let _ = writeln!(out, "CPU (all samples):  {}", summary_row(&self.cpu_all));
        let ci = &self.cpu_median_ci;
        let _ = writeln!(
            out,
            "CPU median CI95  :  {:.3} [{:.3}, {:.3}]",
            ci.median, ci.low, ci.high
        );
        let _ = write!(out, "MEM (MB)         :  {}", summary_row(&self.mem_mib));
        out
    }
}

fn percentile_label(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("p{}", p as u64)
    } else {
        format!("p{}", p)
    }
}

fn summary_row(summary: &Summary) -> String {
    if summary.is_empty() {
        return "no data".to_string();
    }
    let mut row = format!(
        "Avg {:7.3} | Med {:7.3} | Min {:7.3} | Max {:7.3} | Std {:7.3}",
        summary.mean, summary.median, summary.min, summary.max, summary.std_dev
    );
    for pv in &summary.percentiles {
        let _ = write!(row, " | {} {:7.3}", percentile_label(pv.percentile), pv.value);
    }
    row
}

/// Robust summary of one timing metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub name: String,
    pub unit: String,
    pub summary: Summary,
    pub ci: ConfidenceInterval,
}

impl MetricReport {
    pub fn from_observations(
        name: &str,
        unit: &str,
        observations: &ObservationSet,
        config: &AnalysisConfig,
    ) -> Self {
        let values = observations.values();
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            summary: summarize(values, &config.percentiles),
            ci: bootstrap_ci95_median(values, config.bootstrap_resamples, config.bootstrap_seed),
        }
    }

    pub fn render(&self) -> String {
        if self.summary.is_empty() {
            return format!("> {:<12} | No data", self.name);
        }
        format!(
            "> {:<12} | Median:{:.3},{:.3}  (CI95:[{:8.3}, {:8.3}])  Mean:{:8.3}  Min:{:8.3}  Max:{:8.3}  n={}",
            self.name,
            self.ci.median,
            self.ci.half_width(),
            self.ci.low,
            self.ci.high,
            self.summary.mean,
            self.summary.min,
            self.summary.max,
            self.summary.count
        )
    }
}

/// Timing report over a directory of logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogReport {
    pub directory: String,
    pub files: usize,
    pub metrics: Vec<MetricReport>,
}

impl LogReport {
    /// Summarises every metric, in its own unit, after dropping
    /// [`TIMING_SENTINEL`] values.
    pub fn build(extraction: &LogExtraction, config: &AnalysisConfig) -> Self {
        let metrics = extraction
            .metrics
            .iter()
            .map(|metric| {
                let measured = metric.observations.exclude_sentinel(TIMING_SENTINEL);
                MetricReport::from_observations(&metric.name, &metric.unit, &measured, config)
            })
            .collect();

        Self {
            directory: display_path(&extraction.directory),
            files: extraction.files,
            metrics,
        }
    }

    pub fn render(&self) -> String {
        let rule = "-".repeat(RULE_WIDTH);
        let mut out = format!(
            "> Analysing {} files in '{}'...\n{}\n",
            self.files, self.directory, rule
        );
        for metric in &self.metrics {
            out.push_str(&metric.render());
            out.push('\n');
        }
        out.push_str(&rule);
        out
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
