//! Timing Log Extraction
//!
//! Pulls per-operation latency observations out of free-form text logs.
//! Each metric is a regular expression whose first capture group is the
//! numeric value; a line contributes to at most one metric, the first
//! one in table order that matches.

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::error::AnalysisError;

/// Metric names and log tags of the TLS timing logs, in report order.
pub const TLS_TIMINGS: [(&str, &str); 6] = [
    ("Keypair", "genkey"),
    ("Encap", "encap"),
    ("Decap", "decap"),
    ("Sign", "sign"),
    ("Verify", "verify"),
    ("Handshake", "hshake"),
];

/// A bag of scalar observations for one metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservationSet {
    values: Vec<f64>,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy without observations exactly equal to `sentinel`.
    ///
    /// Logs write `0` when a measurement did not happen; dropping those
    /// is a domain decision of the caller and biases the statistics.
    pub fn exclude_sentinel(&self, sentinel: f64) -> ObservationSet {
        self.values.iter().copied().filter(|v| *v != sentinel).collect()
    }
}

impl FromIterator<f64> for ObservationSet {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// One named metric and the pattern that recognises it.
#[derive(Debug, Clone)]
pub struct MetricPattern {
    name: String,
    unit: String,
    regex: Regex,
}

impl MetricPattern {
    /// Pattern from a raw expression; capture group 1 must hold the value.
    pub fn new(name: &str, unit: &str, pattern: &str) -> Result<Self, AnalysisError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| AnalysisError::InvalidPattern {
                metric: name.to_string(),
                reason: e.to_string(),
            })?;

        if regex.captures_len() < 2 {
            return Err(AnalysisError::InvalidPattern {
                metric: name.to_string(),
                reason: "pattern has no capture group for the value".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            unit: unit.to_string(),
            regex,
        })
    }

    /// Matches lines of the form `<tag>,<number>,ms`.
    pub fn timing(name: &str, tag: &str) -> Result<Self, AnalysisError> {
        let pattern = format!(r"^\s*{},([0-9]+(?:\.[0-9]+)?),ms\b", regex::escape(tag));
        Self::new(name, "ms", &pattern)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Value captured from `line`, if the line matches.
    pub fn capture(&self, line: &str) -> Option<f64> {
        self.regex
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Observations of one metric together with its unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricObservations {
    pub name: String,
    pub unit: String,
    pub observations: ObservationSet,
}

/// Observations collected from a directory of logs.
#[derive(Debug, Clone, PartialEq)]
pub struct LogExtraction {
    pub directory: PathBuf,
    /// Number of `*.log` files considered, including unreadable ones
    pub files: usize,
    /// Per-metric observations, in table order
    pub metrics: Vec<MetricObservations>,
}

impl LogExtraction {
    pub fn observations(&self, metric: &str) -> Option<&ObservationSet> {
        self.metrics
            .iter()
            .find(|m| m.name == metric)
            .map(|m| &m.observations)
    }
}

/// Ordered table of metric patterns.
#[derive(Debug, Clone)]
pub struct MetricExtractor {
    patterns: Vec<MetricPattern>,
}

impl MetricExtractor {
    pub fn new(patterns: Vec<MetricPattern>) -> Self {
        Self { patterns }
    }

    /// Extractor for the TLS operation timings.
    pub fn tls_timings() -> Result<Self, AnalysisError> {
        let patterns = TLS_TIMINGS
            .iter()
            .map(|(name, tag)| MetricPattern::timing(name, tag))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(patterns))
    }

    pub fn patterns(&self) -> &[MetricPattern] {
        &self.patterns
    }

    /// Index of the first matching metric and its value.
    pub fn match_line(&self, line: &str) -> Option<(usize, f64)> {
        let line = line.trim();
        self.patterns
            .iter()
            .enumerate()
            .find_map(|(i, p)| p.capture(line).map(|v| (i, v)))
    }

    fn empty_buckets(&self) -> Vec<ObservationSet> {
        vec![ObservationSet::new(); self.patterns.len()]
    }

    fn collect_lines<'a>(&self, lines: impl Iterator<Item = &'a str>, buckets: &mut [ObservationSet]) {
        for line in lines {
            if let Some((index, value)) = self.match_line(line) {
                buckets[index].push(value);
            }
        }
    }

    /// Extracts observations from one reader.
    pub fn extract_reader<R: BufRead>(&self, reader: R) -> std::io::Result<Vec<ObservationSet>> {
        let mut buckets = self.empty_buckets();
        for line in reader.lines() {
            let line = line?;
            self.collect_lines(std::iter::once(line.as_str()), &mut buckets);
        }
        Ok(buckets)
    }

    /// Extracts observations from every `*.log` file directly in `dir`.
    ///
    /// Files are visited in sorted order. Invalid UTF-8 sequences are
    /// dropped, and a file that cannot be read is logged and skipped.
    ///
    /// # Errors
    ///
    /// * [`AnalysisError::NotADirectory`] - `dir` is missing or not a directory
    /// * [`AnalysisError::NoLogFiles`] - no `*.log` file exists in it
    pub fn extract_dir(&self, dir: impl AsRef<Path>) -> Result<LogExtraction, AnalysisError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(AnalysisError::NotADirectory(dir.to_path_buf()));
        }

        let files = log_files(dir)?;
        if files.is_empty() {
            return Err(AnalysisError::NoLogFiles(dir.to_path_buf()));
        }

        let mut buckets = self.empty_buckets();
        for path in &files {
            match fs::read(path) {
                Ok(bytes) => {
                    let text = decode_skipping_invalid(&bytes);
                    self.collect_lines(text.lines(), &mut buckets);
                    debug!("Scanned {}", path.display());
                }
                Err(e) => warn!("Error reading {}: {}", path.display(), e),
            }
        }

        Ok(LogExtraction {
            directory: dir.to_path_buf(),
            files: files.len(),
            metrics: self
                .patterns
                .iter()
                .zip(buckets)
                .map(|(p, observations)| MetricObservations {
                    name: p.name.clone(),
                    unit: p.unit.clone(),
                    observations,
                })
                .collect(),
        })
    }
}

/// UTF-8 decode that drops invalid sequences instead of replacing them.
fn decode_skipping_invalid(mut bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                text.push_str(valid);
                return text;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let skip = e.error_len().unwrap_or(rest.len());
                bytes = &rest[skip..];
            }
        }
    }
}

/// Sorted `*.log` files in `dir`.
fn log_files(dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = format!("{}/*.log", escaped.trim_end_matches('/'));

    let entries = glob::glob(&pattern).map_err(|e| AnalysisError::InvalidPattern {
        metric: pattern.clone(),
        reason: e.to_string(),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}
