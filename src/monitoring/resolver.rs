//! Workload Process Discovery
//!
//! Finds the processes that make up a monitored workload, waiting
//! a bounded time for the workload to finish starting up.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use regex::Regex;
use sysinfo::{get_current_pid, Pid, System};

use crate::error::MonitorError;
use crate::monitoring::sampler::StopFlag;

/// Source of process identifiers matching a pattern.
pub trait ProcessFinder {
    /// Returns the identifiers of all processes whose command line matches `pattern`.
    fn find_processes(&mut self, pattern: &Regex) -> Vec<u32>;
}

/// Process finder backed by the system process table.
///
/// Matches against the full command line, like `pgrep -f`, and never
/// reports the calling process itself.
pub struct SysinfoProcessFinder {
    system: System,
    own_pid: Option<Pid>,
}

impl SysinfoProcessFinder {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            own_pid: get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProcessFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFinder for SysinfoProcessFinder {
    fn find_processes(&mut self, pattern: &Regex) -> Vec<u32> {
        self.system.refresh_processes();
        let own_pid = self.own_pid;

        let matched: Vec<(&Pid, &sysinfo::Process)> = self
            .system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != own_pid)
            .filter(|(_, process)| {
                let cmdline = process.cmd().join(" ");
                let haystack = if cmdline.is_empty() {
                    process.name()
                } else {
                    cmdline.as_str()
                };
                pattern.is_match(haystack)
            })
            .collect();

        // Threads show up next to their owning process on Linux
        let threads: HashSet<Pid> = matched
            .iter()
            .filter_map(|(pid, process)| {
                process
                    .tasks()
                    .map(|tasks| tasks.iter().filter(|t| **t != **pid).copied().collect::<Vec<_>>())
            })
            .flatten()
            .collect();

        let mut pids: Vec<u32> = matched
            .iter()
            .filter(|(pid, _)| !threads.contains(*pid))
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }
}

/// The resolved process set of one workload instance.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadHandle {
    pids: Vec<u32>,
    expected: usize,
    degraded: bool,
}

impl WorkloadHandle {
    pub(crate) fn new(mut pids: Vec<u32>, expected: usize) -> Self {
        pids.sort_unstable();
        pids.dedup();
        let degraded = pids.len() < expected;
        Self {
            pids,
            expected,
            degraded,
        }
    }

    /// Process identifiers in ascending order.
    pub fn pids(&self) -> &[u32] {
        &self.pids
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Number of processes the caller asked for.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// True when fewer processes than expected were found before the timeout.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// Polls a [`ProcessFinder`] until the workload is complete or a timeout expires.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use cgmon::monitoring::{ProcessSetResolver, SysinfoProcessFinder};
///
/// let mut resolver = ProcessSetResolver::new(SysinfoProcessFinder::new());
/// let handle = resolver.resolve("open5gs-", 13, Duration::from_secs(20))?;
/// if handle.is_degraded() {
///     println!("only {} of 13 processes found", handle.len());
/// }
/// ```
pub struct ProcessSetResolver<F: ProcessFinder> {
    finder: F,
    poll_interval: Duration,
    stop: StopFlag,
}

impl<F: ProcessFinder> ProcessSetResolver<F> {
    pub fn new(finder: F) -> Self {
        Self {
            finder,
            poll_interval: Duration::from_millis(100),
            stop: StopFlag::new(),
        }
    }

    /// Sets the delay between two discovery attempts.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Abandons the wait once `stop` is raised.
    pub fn set_stop_flag(&mut self, stop: StopFlag) {
        self.stop = stop;
    }

    /// Resolves the process set for `selector`.
    ///
    /// Returns as soon as `expected_count` processes are present. Otherwise
    /// keeps polling until `timeout` and returns the last non-empty result as
    /// a degraded handle, or [`MonitorError::ResolutionTimeout`] if nothing
    /// was ever found. A raised stop flag ends the wait with
    /// [`MonitorError::Interrupted`].
    pub fn resolve(
        &mut self,
        selector: &str,
        expected_count: usize,
        timeout: Duration,
    ) -> Result<WorkloadHandle, MonitorError> {
        let pattern = Regex::new(selector).map_err(|source| MonitorError::InvalidSelector {
            selector: selector.to_string(),
            source,
        })?;

        let start = Instant::now();
        let mut attempts = 0u32;

        let pids = loop {
            if self.stop.is_triggered() {
                info!("Interrupted while waiting for '{}'", selector);
                return Err(MonitorError::Interrupted {
                    stage: "waiting for the workload",
                });
            }

            let found = self.finder.find_processes(&pattern);
            attempts += 1;

            if found.len() >= expected_count {
                debug!(
                    "Found all {} expected processes after {} attempt(s)",
                    expected_count, attempts
                );
                break found;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break found;
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        };

        if pids.is_empty() {
            return Err(MonitorError::ResolutionTimeout {
                selector: selector.to_string(),
                timeout,
            });
        }

        let handle = WorkloadHandle::new(pids, expected_count);
        if handle.is_degraded() {
            warn!(
                "Only {} of {} expected processes matching '{}' found within {:?}",
                handle.len(),
                expected_count,
                selector,
                timeout
            );
        } else {
            info!("Found {} processes: {:?}", handle.len(), handle.pids());
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed sequence of discovery results, repeating the last one.
    struct ScriptedFinder {
        script: VecDeque<Vec<u32>>,
        last: Vec<u32>,
        calls: usize,
    }

    impl ScriptedFinder {
        fn new(script: Vec<Vec<u32>>) -> Self {
            Self {
                script: script.into(),
                last: Vec::new(),
                calls: 0,
            }
        }
    }

    impl ProcessFinder for ScriptedFinder {
        fn find_processes(&mut self, _pattern: &Regex) -> Vec<u32> {
            self.calls += 1;
            if let Some(next) = self.script.pop_front() {
                self.last = next;
            }
            self.last.clone()
        }
    }

    fn resolver(script: Vec<Vec<u32>>) -> ProcessSetResolver<ScriptedFinder> {
        ProcessSetResolver::new(ScriptedFinder::new(script))
            .with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_full_match_short_circuits() {
        let mut resolver = resolver(vec![vec![], vec![10, 11], vec![10, 11, 12]]);
        let start = Instant::now();

        let handle = resolver
            .resolve("worker", 3, Duration::from_secs(10))
            .unwrap();

        assert_eq!(handle.pids(), &[10, 11, 12]);
        assert!(!handle.is_degraded());
        assert_eq!(resolver.finder.calls, 3);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_partial_match_is_degraded() {
        let found: Vec<u32> = (100..108).collect();
        let mut resolver = resolver(vec![found.clone()]);

        let handle = resolver
            .resolve("open5gs-", 13, Duration::from_millis(60))
            .unwrap();

        assert_eq!(handle.len(), 8);
        assert_eq!(handle.expected(), 13);
        assert!(handle.is_degraded());
        assert_eq!(handle.pids(), found.as_slice());
        // Kept polling until the timeout instead of accepting the first partial result
        assert!(resolver.finder.calls > 1);
    }

    #[test]
    fn test_nothing_found_times_out() {
        let mut resolver = resolver(vec![]);

        let result = resolver.resolve("missing", 2, Duration::from_millis(30));
        assert!(matches!(
            result,
            Err(MonitorError::ResolutionTimeout { .. })
        ));
    }

    #[test]
    fn test_invalid_selector() {
        let mut resolver = resolver(vec![vec![1]]);

        let result = resolver.resolve("open5gs-(", 1, Duration::from_millis(10));
        assert!(matches!(result, Err(MonitorError::InvalidSelector { .. })));
    }

    #[test]
    fn test_resolve_is_not_cached() {
        let mut resolver = resolver(vec![vec![1], vec![2]]);

        let first = resolver.resolve("w", 1, Duration::from_millis(10)).unwrap();
        let second = resolver.resolve("w", 1, Duration::from_millis(10)).unwrap();
        assert_eq!(first.pids(), &[1]);
        assert_eq!(second.pids(), &[2]);
    }

    #[test]
    fn test_more_than_expected_counts_as_full() {
        let mut resolver = resolver(vec![vec![1, 2, 3]]);

        let handle = resolver.resolve("w", 2, Duration::from_secs(5)).unwrap();
        assert_eq!(handle.len(), 3);
        assert!(!handle.is_degraded());
    }

    #[test]
    fn test_raised_stop_flag_ends_wait() {
        let mut resolver = resolver(vec![vec![1]]);
        let stop = StopFlag::new();
        stop.trigger();
        resolver.set_stop_flag(stop);
        let start = Instant::now();

        let result = resolver.resolve("w", 3, Duration::from_secs(2));
        assert!(matches!(result, Err(MonitorError::Interrupted { .. })));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(resolver.finder.calls, 0);
    }

    #[test]
    fn test_stop_during_wait() {
        let mut resolver = resolver(vec![vec![1]]);
        let stop = StopFlag::new();
        resolver.set_stop_flag(stop.clone());

        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop.trigger();
        });
        let start = Instant::now();
        let result = resolver.resolve("w", 3, Duration::from_secs(10));
        trigger.join().unwrap();

        assert!(matches!(result, Err(MonitorError::Interrupted { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sysinfo_finder_skips_self() {
        let mut finder = SysinfoProcessFinder::new();
        let pattern = Regex::new(".*").unwrap();

        let pids = finder.find_processes(&pattern);
        assert!(!pids.contains(&std::process::id()));
    }
}
