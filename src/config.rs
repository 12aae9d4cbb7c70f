//! Run Configuration
//!
//! Explicit configuration passed into every component at construction.
//! Values can come from a YAML file and be overridden on the command line.
//!
//! # Example YAML Format
//!
//! ```yaml
//! monitor:
//!   selector: "open5gs-"
//!   expected_count: 13
//!   interval_ms: 100
//!   duration_secs: 360
//!   wait_for_nonzero: true
//!
//! analysis:
//!   percentiles: [95, 99]
//!   bootstrap_resamples: 5000
//!   bootstrap_seed: 123
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Complete configuration for the binary.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Validates both sections, as required before a monitoring run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.monitor.validate()?;
        self.analysis.validate()
    }
}

/// Settings for one monitoring run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Regular expression matched against each process's full command line
    pub selector: String,

    /// Number of processes the workload is expected to consist of
    pub expected_count: usize,

    /// How long to wait for the workload to start
    pub start_timeout_secs: u64,

    /// Poll interval while waiting for the workload
    pub poll_interval_ms: u64,

    /// Sampling interval
    pub interval_ms: u64,

    /// Run length; 0 runs until interrupted
    pub duration_secs: u64,

    /// Name of the accounting group under `cgroup_root`
    pub group_name: String,

    /// Mount point of the unified cgroup hierarchy
    pub cgroup_root: PathBuf,

    /// Series output file
    pub output: PathBuf,

    /// Hold off sampling until the group's counters are non-zero
    pub wait_for_nonzero: bool,

    /// Chown output artifacts back to the invoking user
    pub restore_ownership: bool,

    /// Log a series report when the run finishes
    pub summarize: bool,

    /// Print a live progress line per tick
    pub progress: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            selector: String::new(),
            expected_count: 1,
            start_timeout_secs: 20,
            poll_interval_ms: 100,
            interval_ms: 1000,
            duration_secs: 0,
            group_name: "cgmon_monitor".to_string(),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            output: PathBuf::from("server_metrics/usage.csv"),
            wait_for_nonzero: false,
            restore_ownership: true,
            summarize: true,
            progress: true,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Checks the settings a monitoring run cannot work without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selector.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "workload selector must not be empty".to_string(),
            ));
        }
        if self.expected_count == 0 {
            return Err(ConfigError::Invalid(
                "expected process count must be at least 1".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sampling interval must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.group_name.is_empty() || self.group_name.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "invalid accounting group name '{}'",
                self.group_name
            )));
        }
        Ok(())
    }
}

/// Settings for the statistics engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Percentiles reported next to the basic summary
    pub percentiles: Vec<f64>,

    /// Number of bootstrap resamples for the median CI
    pub bootstrap_resamples: usize,

    /// Seed of the bootstrap random source
    pub bootstrap_seed: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            percentiles: vec![95.0, 99.0],
            bootstrap_resamples: 5000,
            bootstrap_seed: 123,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(p) = self
            .percentiles
            .iter()
            .find(|p| !(0.0..=100.0).contains(*p))
        {
            return Err(ConfigError::Invalid(format!(
                "percentile {} is outside [0, 100]",
                p
            )));
        }
        Ok(())
    }
}

/// Loads configuration from a YAML file.
///
/// Missing sections and fields fall back to their defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Config content loaded ({} bytes)", content.len());

    let config: AppConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    config.analysis.validate()?;
    Ok(config)
}
