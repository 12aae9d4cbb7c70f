//! Workload Monitoring Module
//!
//! Finds a multi-process workload, accounts it in a cgroup v2 group and
//! samples the group's CPU and memory counters into a time series.
//!
//! # Components
//!
//! - [`ProcessSetResolver`]: selector to process-set resolution
//! - [`AccountingGroupController`]: accounting group lifecycle and counters
//! - [`SamplingLoop`]: drift-corrected sampling state machine
//! - [`SeriesWriter`]: append-only CSV series sink
//! - [`MonitorSession`]: one end-to-end run

pub mod cgroup;
pub mod interrupt;
pub mod ownership;
pub mod resolver;
pub mod sampler;
pub mod series;
pub mod session;

#[cfg(test)]
mod testing;

pub use cgroup::{AccountingBackend, AccountingGroup, AccountingGroupController, CgroupV2Backend, CounterReading};
pub use resolver::{ProcessFinder, ProcessSetResolver, SysinfoProcessFinder, WorkloadHandle};
pub use sampler::{Clock, RunSummary, SamplerSettings, SamplerState, SamplingLoop, StopFlag, StopReason, SystemClock};
pub use series::{read_series, Sample, SeriesWriter};
pub use session::{MonitorReport, MonitorSession};
