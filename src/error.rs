//! Error Types
//!
//! Failure taxonomy for monitoring runs, offline analysis and
//! configuration loading.
//!
//! Only startup and sink failures abort a monitoring run. The
//! `CounterUnavailable` and `CleanupFailure` variants exist so that
//! recovered conditions can be logged with a consistent message; they
//! are never returned from a run.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while resolving, admitting and sampling a workload.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// No process matched the selector before the start timeout.
    #[error("no process matching '{selector}' appeared within {timeout:?}")]
    ResolutionTimeout { selector: String, timeout: Duration },

    /// The workload selector is not a valid regular expression.
    #[error("invalid workload selector '{selector}': {source}")]
    InvalidSelector {
        selector: String,
        #[source]
        source: regex::Error,
    },

    /// The accounting group directory could not be created.
    #[error("failed to create accounting group '{group}': {source}")]
    GroupCreation {
        group: String,
        #[source]
        source: io::Error,
    },

    /// Not a single process could be moved into the accounting group.
    #[error("could not admit any of {requested} processes into accounting group '{group}' (processes terminated?)")]
    AdmissionFailed { group: String, requested: usize },

    /// A counter could not be read for one tick.
    #[error("counter '{counter}' of group '{group}' unavailable: {source}")]
    CounterUnavailable {
        group: String,
        counter: &'static str,
        #[source]
        source: io::Error,
    },

    /// A record could not be persisted to the series file.
    #[error("failed to write series record to {}: {source}", path.display())]
    SinkWriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The run was stopped before sampling began.
    #[error("interrupted while {stage}")]
    Interrupted { stage: &'static str },

    /// Group removal or ownership restoration failed.
    #[error("cleanup step '{step}' failed: {reason}")]
    CleanupFailure { step: &'static str, reason: String },
}

/// Errors raised while reading series files or timing logs.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: missing columns {missing:?}", path.display())]
    MissingColumns { path: PathBuf, missing: Vec<String> },

    #[error("{}: malformed record on line {line}: {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("directory not found: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("no .log files found in: {}", .0.display())]
    NoLogFiles(PathBuf),

    #[error("invalid pattern for metric '{metric}': {reason}")]
    InvalidPattern { metric: String, reason: String },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
