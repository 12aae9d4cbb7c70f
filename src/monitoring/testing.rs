//! Scripted collaborators shared by the monitoring tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use regex::Regex;

use super::cgroup::AccountingBackend;
use super::resolver::ProcessFinder;
use super::sampler::{Clock, StopFlag};

/// What the scripted backend returns for one tick.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Tick {
    Value { cpu_usec: u64, mem_bytes: u64 },
    Missing,
    Error,
}

impl Tick {
    pub(crate) fn value(cpu_usec: u64, mem_bytes: u64) -> Self {
        Tick::Value {
            cpu_usec,
            mem_bytes,
        }
    }
}

/// Accounting backend that replays scripted counter values.
///
/// Each CPU read advances the script; the memory read of the same tick
/// returns the matching value. The last entry repeats once the script ends.
pub(crate) struct ScriptedBackend {
    script: RefCell<VecDeque<Tick>>,
    current: Cell<Tick>,
    rejected: Vec<u32>,
    exists: Cell<bool>,
    pub(crate) creations: Cell<u32>,
    pub(crate) removals: Cell<u32>,
    pub(crate) cpu_reads: Cell<u32>,
}

impl ScriptedBackend {
    pub(crate) fn new(script: Vec<Tick>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            current: Cell::new(Tick::Missing),
            rejected: Vec::new(),
            exists: Cell::new(false),
            creations: Cell::new(0),
            removals: Cell::new(0),
            cpu_reads: Cell::new(0),
        }
    }

    pub(crate) fn rejecting(mut self, pids: Vec<u32>) -> Self {
        self.rejected = pids;
        self
    }
}

impl AccountingBackend for ScriptedBackend {
    fn create(&self, _name: &str) -> io::Result<()> {
        self.creations.set(self.creations.get() + 1);
        self.exists.set(true);
        Ok(())
    }

    fn remove(&self, _name: &str) -> io::Result<()> {
        self.removals.set(self.removals.get() + 1);
        self.exists.set(false);
        Ok(())
    }

    fn exists(&self, _name: &str) -> bool {
        self.exists.get()
    }

    fn admit(&self, _name: &str, pid: u32) -> io::Result<()> {
        if self.rejected.contains(&pid) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "No such process"));
        }
        Ok(())
    }

    fn read_cpu_time_usec(&self, _name: &str) -> io::Result<Option<u64>> {
        self.cpu_reads.set(self.cpu_reads.get() + 1);
        if let Some(next) = self.script.borrow_mut().pop_front() {
            self.current.set(next);
        }
        match self.current.get() {
            Tick::Value { cpu_usec, .. } => Ok(Some(cpu_usec)),
            Tick::Missing => Ok(None),
            Tick::Error => Err(io::Error::new(io::ErrorKind::InvalidData, "garbled")),
        }
    }

    fn read_memory_bytes(&self, _name: &str) -> io::Result<Option<u64>> {
        match self.current.get() {
            Tick::Value { mem_bytes, .. } => Ok(Some(mem_bytes)),
            Tick::Missing => Ok(None),
            Tick::Error => Err(io::Error::new(io::ErrorKind::InvalidData, "garbled")),
        }
    }
}

/// Clock whose time only moves when the code under test sleeps.
pub(crate) struct FakeClock {
    base: Instant,
    wall_base_ms: i64,
    offset: Cell<Duration>,
    sleeps: Cell<u64>,
    interrupt: Option<(StopFlag, Duration)>,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            wall_base_ms: 1_700_000_000_000,
            offset: Cell::new(Duration::ZERO),
            sleeps: Cell::new(0),
            interrupt: None,
        }
    }

    /// Triggers `flag` once fake time reaches `at`.
    pub(crate) fn interrupting_at(mut self, flag: StopFlag, at: Duration) -> Self {
        self.interrupt = Some((flag, at));
        self
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    pub(crate) fn sleeps(&self) -> u64 {
        self.sleeps.get()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn wall_millis(&self) -> i64 {
        self.wall_base_ms + self.offset.get().as_millis() as i64
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.set(self.sleeps.get() + 1);
        self.offset.set(self.offset.get() + duration);
        if let Some((flag, at)) = &self.interrupt {
            if self.offset.get() >= *at {
                flag.trigger();
            }
        }
    }
}

/// Finder that always reports the same processes.
pub(crate) struct FixedFinder(pub(crate) Vec<u32>);

impl ProcessFinder for FixedFinder {
    fn find_processes(&mut self, _pattern: &Regex) -> Vec<u32> {
        self.0.clone()
    }
}
