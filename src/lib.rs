//! cgmon - Cgroup Resource Telemetry
//!
//! Measures what a running multi-process workload costs in CPU and
//! memory, and summarises recorded measurements with robust statistics.
//! Built for benchmarking server deployments where many cooperating
//! processes must be accounted as one unit.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`monitoring`]: process discovery, cgroup v2 accounting and the sampling loop
//! - [`analysis`]: summary statistics, bootstrap intervals and reports
//! - [`config`]: YAML-backed run configuration
//! - [`error`]: error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use cgmon::config::MonitorConfig;
//! use cgmon::monitoring::{MonitorSession, StopFlag};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MonitorConfig {
//!         selector: "open5gs-".to_string(),
//!         expected_count: 13,
//!         duration_secs: 360,
//!         ..MonitorConfig::default()
//!     };
//!     config.validate()?;
//!
//!     let mut session = MonitorSession::from_config(config);
//!     let report = session.run(&StopFlag::new())?;
//!     println!("{} samples in {}", report.run.samples, report.output.display());
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod monitoring;

// Re-export commonly used types
pub use config::{load_config, AnalysisConfig, AppConfig, MonitorConfig};
pub use error::{AnalysisError, ConfigError, MonitorError};
pub use monitoring::{MonitorReport, MonitorSession, StopFlag};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "cgmon";
