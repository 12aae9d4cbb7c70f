//! Drift-Corrected Sampling Loop
//!
//! Reads the accounting group's counters at a fixed cadence, turns the
//! cumulative CPU counter into a utilisation rate and persists one
//! [`Sample`] per tick.
//!
//! # States
//!
//! ```text
//! WaitingStart --(policy off, or counters non-zero)--> Running
//! Running --(duration reached)--> Stopping --> Done
//! any state --(interrupt)--> Stopping --> Done
//! ```
//!
//! Tick `i` is scheduled at `start + i * interval` rather than by
//! sleeping `interval` repeatedly, so the overhead of each tick does
//! not accumulate into drift.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::MonitorError;
use crate::monitoring::cgroup::{
    AccountingBackend, AccountingGroup, AccountingGroupController, CounterReading,
};
use crate::monitoring::series::{Sample, SeriesWriter};

/// Longest uninterrupted sleep; bounds how late an interrupt is noticed.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancellation flag, set from a signal handler thread.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Time source for the sampling loop.
pub trait Clock {
    /// Monotonic time, used for all interval arithmetic.
    fn now(&self) -> Instant;
    /// Wall-clock time in milliseconds since the Unix epoch, used for timestamps only.
    fn wall_millis(&self) -> i64;
    fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Lifecycle of one sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    WaitingStart,
    Running,
    Stopping,
    Done,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured duration elapsed
    DurationElapsed,
    /// The stop flag was raised
    Interrupted,
}

/// Timing settings of the loop.
#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub interval: Duration,
    /// Zero runs until interrupted
    pub duration: Duration,
    pub wait_for_nonzero: bool,
    pub logical_cpus: usize,
    pub progress: bool,
}

impl SamplerSettings {
    pub fn new(interval: Duration, duration: Duration) -> Self {
        Self {
            interval,
            duration,
            wait_for_nonzero: false,
            logical_cpus: num_cpus::get().max(1),
            progress: false,
        }
    }

    /// Number of samples a bounded run emits, `None` when unbounded.
    pub fn total_ticks(&self) -> Option<u64> {
        if self.duration.is_zero() {
            return None;
        }
        let interval = self.interval.as_nanos().max(1);
        let ticks = (self.duration.as_nanos() / interval).max(1);
        Some(u64::try_from(ticks).unwrap_or(u64::MAX))
    }
}

/// Outcome of a completed (or interrupted) run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub samples: u64,
    pub reason: StopReason,
    /// Ticks spent waiting for the workload's counters to become non-zero
    pub warmup_ticks: u64,
}

/// CPU utilisation over one interval, normalised by the number of logical CPUs.
///
/// A zero wall-clock delta is replaced by one nanosecond.
pub fn cpu_utilization_percent(delta_cpu_usec: u64, delta_wall: Duration, logical_cpus: usize) -> f64 {
    let wall_ns = delta_wall.as_nanos().max(1) as f64;
    let cpus = logical_cpus.max(1) as f64;
    (delta_cpu_usec as f64 * 1000.0 / wall_ns / cpus) * 100.0
}

/// Previous reading the next delta is computed against.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    cpu_time_usec: u64,
    at: Instant,
    timestamp_ms: i64,
}

/// Samples one accounting group until the duration elapses or the run is interrupted.
///
/// # Example
///
/// ```rust,ignore
/// let settings = SamplerSettings::new(Duration::from_millis(100), Duration::from_secs(360));
/// let mut sampler = SamplingLoop::new(&controller, &group, &SystemClock, settings, stop);
/// let summary = sampler.run(&mut writer)?;
/// println!("{} samples", summary.samples);
/// ```
pub struct SamplingLoop<'a, B: AccountingBackend, C: Clock> {
    controller: &'a AccountingGroupController<B>,
    group: &'a AccountingGroup,
    clock: &'a C,
    settings: SamplerSettings,
    stop: StopFlag,
    state: SamplerState,
}

impl<'a, B: AccountingBackend, C: Clock> SamplingLoop<'a, B, C> {
    pub fn new(
        controller: &'a AccountingGroupController<B>,
        group: &'a AccountingGroup,
        clock: &'a C,
        settings: SamplerSettings,
        stop: StopFlag,
    ) -> Self {
        Self {
            controller,
            group,
            clock,
            settings,
            stop,
            state: SamplerState::WaitingStart,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Runs the loop, appending every sample to `writer`.
    ///
    /// Counter problems never end the run; they show up as zero readings.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SinkWriteFailure`] when a sample cannot be persisted.
    pub fn run<W: Write>(&mut self, writer: &mut SeriesWriter<W>) -> Result<RunSummary, MonitorError> {
        let interval = self.settings.interval;
        let total_ticks = self.settings.total_ticks();

        let mut schedule_start = self.clock.now();
        let mut tick: u64 = 0;
        let mut samples: u64 = 0;
        let mut warmup_ticks: u64 = 0;

        let mut baseline = if self.settings.wait_for_nonzero {
            info!("Waiting for non-zero counters before sampling");
            None
        } else {
            let reading = self.controller.read_counters(self.group);
            self.state = SamplerState::Running;
            Some(self.baseline_from(reading, schedule_start))
        };

        let reason = loop {
            if self.stop.is_triggered() {
                break StopReason::Interrupted;
            }

            tick += 1;
            let deadline = tick_deadline(schedule_start, interval, tick);
            if !self.sleep_until(deadline) {
                break StopReason::Interrupted;
            }

            let now = self.clock.now();
            let reading = self.controller.read_counters(self.group);

            let Some(prev) = baseline.as_mut() else {
                warmup_ticks += 1;
                if reading.is_nonzero() {
                    info!(
                        "Counters non-zero after {} tick(s); sampling started",
                        warmup_ticks
                    );
                    baseline = Some(self.baseline_from(reading, now));
                    self.state = SamplerState::Running;
                    schedule_start = now;
                    tick = 0;
                }
                continue;
            };

            let sample = self.next_sample(prev, reading, now);
            if let Err(e) = writer.append(&sample) {
                self.finish_progress(samples);
                self.state = SamplerState::Done;
                return Err(e);
            }
            samples += 1;

            debug!(
                "tick {}: cpu={}usec ({:.2}%) mem={}B",
                samples, sample.cpu_time_usec, sample.cpu_percent, sample.mem_bytes
            );
            self.report_progress(samples, total_ticks, &sample);

            if total_ticks.is_some_and(|total| samples >= total) {
                break StopReason::DurationElapsed;
            }
        };

        self.state = SamplerState::Stopping;
        self.finish_progress(samples);
        match reason {
            StopReason::Interrupted => info!("Sampling interrupted after {} samples", samples),
            StopReason::DurationElapsed => info!("Sampling finished: {} samples", samples),
        }
        self.state = SamplerState::Done;

        Ok(RunSummary {
            samples,
            reason,
            warmup_ticks,
        })
    }

    fn baseline_from(&self, reading: CounterReading, at: Instant) -> Baseline {
        Baseline {
            cpu_time_usec: reading.cpu_time_usec,
            at,
            timestamp_ms: self.clock.wall_millis(),
        }
    }

    /// Builds the sample for `reading` and advances the baseline.
    fn next_sample(&self, prev: &mut Baseline, reading: CounterReading, now: Instant) -> Sample {
        // A zero or regressed read (counter unavailable) carries the last value forward
        if reading.cpu_time_usec < prev.cpu_time_usec {
            debug!(
                "CPU counter read {} below previous {}; holding previous value",
                reading.cpu_time_usec, prev.cpu_time_usec
            );
        }
        let cpu_time_usec = reading.cpu_time_usec.max(prev.cpu_time_usec);
        let delta_cpu = cpu_time_usec - prev.cpu_time_usec;
        let delta_wall = now.saturating_duration_since(prev.at);

        let cpu_percent =
            cpu_utilization_percent(delta_cpu, delta_wall, self.settings.logical_cpus);
        let timestamp_ms = self.clock.wall_millis().max(prev.timestamp_ms);

        *prev = Baseline {
            cpu_time_usec,
            at: now,
            timestamp_ms,
        };

        Sample {
            timestamp_ms,
            cpu_time_usec,
            cpu_percent,
            mem_bytes: reading.memory_bytes,
        }
    }

    /// Sleeps until `deadline`, waking periodically to check the stop flag.
    ///
    /// Returns `false` if the run was interrupted.
    fn sleep_until(&self, deadline: Instant) -> bool {
        loop {
            if self.stop.is_triggered() {
                return false;
            }
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            self.clock.sleep((deadline - now).min(STOP_CHECK_INTERVAL));
        }
    }

    fn report_progress(&self, samples: u64, total: Option<u64>, sample: &Sample) {
        if !self.settings.progress {
            return;
        }
        let total = total.map_or_else(|| "∞".to_string(), |t| t.to_string());
        let mut stdout = io::stdout();
        // Progress output is cosmetic
        let _ = write!(
            stdout,
            "\r[{}/{}] CPU: {} usec ({:.2}%) | MEM: {} bytes   ",
            samples, total, sample.cpu_time_usec, sample.cpu_percent, sample.mem_bytes
        );
        let _ = stdout.flush();
    }

    fn finish_progress(&self, samples: u64) {
        if self.settings.progress && samples > 0 {
            println!();
        }
    }
}

/// Absolute deadline of tick `tick`.
fn tick_deadline(start: Instant, interval: Duration, tick: u64) -> Instant {
    let offset_ns = interval.as_nanos().saturating_mul(u128::from(tick));
    let offset = Duration::from_nanos(u64::try_from(offset_ns).unwrap_or(u64::MAX));
    start.checked_add(offset).unwrap_or(start)
}
