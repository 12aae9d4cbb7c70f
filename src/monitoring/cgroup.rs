//! Accounting Group Control
//!
//! Creates an isolated cgroup for the workload, moves its processes in,
//! and reads the group's cumulative CPU time and current memory.
//!
//! # Lifecycle
//!
//! 1. Any stale group of the same name is emptied and removed
//! 2. A fresh group is created and each process is admitted individually
//! 3. Counters are read once per sampling tick
//! 4. The group is removed when the run ends (best-effort, idempotent)

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::MonitorError;
use crate::monitoring::resolver::WorkloadHandle;

const PROCS_FILE: &str = "cgroup.procs";
const CPU_STAT_FILE: &str = "cpu.stat";
const MEMORY_CURRENT_FILE: &str = "memory.current";
const CPU_USAGE_KEY: &str = "usage_usec";

/// Low-level operations on named accounting groups.
///
/// Counter reads return `Ok(None)` when the group or counter has not
/// materialised yet, and `Err` for any other read failure.
pub trait AccountingBackend {
    fn create(&self, name: &str) -> io::Result<()>;
    fn remove(&self, name: &str) -> io::Result<()>;
    fn exists(&self, name: &str) -> bool;
    fn admit(&self, name: &str, pid: u32) -> io::Result<()>;
    fn read_cpu_time_usec(&self, name: &str) -> io::Result<Option<u64>>;
    fn read_memory_bytes(&self, name: &str) -> io::Result<Option<u64>>;
}

/// Accounting backend for the cgroup v2 unified hierarchy.
#[derive(Debug, Clone)]
pub struct CgroupV2Backend {
    root: PathBuf,
}

impl CgroupV2Backend {
    /// Creates a backend rooted at the cgroup2 mount point (normally `/sys/fs/cgroup`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn group_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl AccountingBackend for CgroupV2Backend {
    /// Fails with `AlreadyExists` if the group is still there.
    fn create(&self, name: &str) -> io::Result<()> {
        fs::create_dir(self.group_path(name))
    }

    /// Moves remaining members up to the root group, then removes the group.
    fn remove(&self, name: &str) -> io::Result<()> {
        let group = self.group_path(name);
        if let Some(procs) = read_optional(&group.join(PROCS_FILE))? {
            let root_procs = self.root.join(PROCS_FILE);
            for pid in procs.split_whitespace().filter_map(|p| p.parse::<u32>().ok()) {
                if let Err(e) = write_pid(&root_procs, pid) {
                    debug!("Could not move process {} out of '{}': {}", pid, name, e);
                }
            }
        }
        // cgroupfs directories are removed with rmdir even though they list files
        fs::remove_dir(group)
    }

    fn exists(&self, name: &str) -> bool {
        self.group_path(name).is_dir()
    }

    fn admit(&self, name: &str, pid: u32) -> io::Result<()> {
        write_pid(&self.group_path(name).join(PROCS_FILE), pid)
    }

    fn read_cpu_time_usec(&self, name: &str) -> io::Result<Option<u64>> {
        let Some(content) = read_optional(&self.group_path(name).join(CPU_STAT_FILE))? else {
            return Ok(None);
        };
        parse_cpu_stat(&content)
    }

    fn read_memory_bytes(&self, name: &str) -> io::Result<Option<u64>> {
        let Some(content) = read_optional(&self.group_path(name).join(MEMORY_CURRENT_FILE))?
        else {
            return Ok(None);
        };
        parse_counter(content.trim()).map(Some)
    }
}

/// Writes one pid to a `cgroup.procs` file, which moves that process.
fn write_pid(procs: &Path, pid: u32) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(procs)?;
    file.write_all(pid.to_string().as_bytes())
}

/// Reads a file, mapping "not found" to `None`.
fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Extracts `usage_usec` from a `cpu.stat` body.
fn parse_cpu_stat(content: &str) -> io::Result<Option<u64>> {
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() == Some(CPU_USAGE_KEY) {
            let value = fields.next().unwrap_or_default();
            return parse_counter(value).map(Some);
        }
    }
    Ok(None)
}

fn parse_counter(value: &str) -> io::Result<u64> {
    value.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid counter value '{}': {}", value, e),
        )
    })
}

/// A live accounting group and the processes admitted into it.
#[derive(Debug)]
pub struct AccountingGroup {
    name: String,
    members: Vec<u32>,
    destroyed: bool,
}

impl AccountingGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Processes that were successfully admitted.
    pub fn members(&self) -> &[u32] {
        &self.members
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// One point-in-time read of the group's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterReading {
    /// Cumulative CPU time consumed by the group, in microseconds
    pub cpu_time_usec: u64,
    /// Current memory charged to the group, in bytes
    pub memory_bytes: u64,
}

impl CounterReading {
    /// True once the workload has consumed CPU and holds memory.
    pub fn is_nonzero(&self) -> bool {
        self.cpu_time_usec > 0 && self.memory_bytes > 0
    }
}

/// Owns the accounting group for one monitoring run.
pub struct AccountingGroupController<B: AccountingBackend> {
    backend: B,
    group_name: String,
}

impl<B: AccountingBackend> AccountingGroupController<B> {
    pub fn new(backend: B, group_name: impl Into<String>) -> Self {
        Self {
            backend,
            group_name: group_name.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates a fresh group and moves the workload's processes into it.
    ///
    /// A stale group of the same name is removed first; if that fails,
    /// creation fails too rather than reusing the stale group and its
    /// counters. Processes that cannot be
    /// admitted (typically because they already exited) are skipped.
    ///
    /// # Errors
    ///
    /// * [`MonitorError::GroupCreation`] - the group directory cannot be created
    /// * [`MonitorError::AdmissionFailed`] - no process could be admitted
    pub fn create_and_admit(&self, handle: &WorkloadHandle) -> Result<AccountingGroup, MonitorError> {
        let name = self.group_name.as_str();

        if self.backend.exists(name) {
            match self.backend.remove(name) {
                Ok(()) => debug!("Removed stale accounting group '{}'", name),
                Err(e) => warn!("Could not remove stale accounting group '{}': {}", name, e),
            }
        }

        self.backend
            .create(name)
            .map_err(|source| MonitorError::GroupCreation {
                group: name.to_string(),
                source,
            })?;

        let mut members = Vec::with_capacity(handle.len());
        for &pid in handle.pids() {
            match self.backend.admit(name, pid) {
                Ok(()) => members.push(pid),
                Err(e) => warn!("Could not admit process {} into '{}': {}", pid, name, e),
            }
        }

        let mut group = AccountingGroup {
            name: name.to_string(),
            members,
            destroyed: false,
        };

        if group.members.is_empty() {
            self.destroy(&mut group);
            return Err(MonitorError::AdmissionFailed {
                group: name.to_string(),
                requested: handle.len(),
            });
        }

        info!(
            "Accounting group '{}' created with {}/{} processes",
            name,
            group.members.len(),
            handle.len()
        );
        Ok(group)
    }

    /// Reads both counters; an unavailable counter reads as zero.
    pub fn read_counters(&self, group: &AccountingGroup) -> CounterReading {
        CounterReading {
            cpu_time_usec: self.read_or_zero(
                group,
                "cpu_time_usec",
                self.backend.read_cpu_time_usec(&group.name),
            ),
            memory_bytes: self.read_or_zero(
                group,
                "memory_bytes",
                self.backend.read_memory_bytes(&group.name),
            ),
        }
    }

    fn read_or_zero(
        &self,
        group: &AccountingGroup,
        counter: &'static str,
        result: io::Result<Option<u64>>,
    ) -> u64 {
        match result {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!("Counter '{}' of '{}' not present yet", counter, group.name);
                0
            }
            Err(source) => {
                let err = MonitorError::CounterUnavailable {
                    group: group.name.clone(),
                    counter,
                    source,
                };
                warn!("{}", err);
                0
            }
        }
    }

    /// Removes the group. Failures are logged, and a second call is a no-op.
    pub fn destroy(&self, group: &mut AccountingGroup) {
        if group.destroyed {
            return;
        }
        group.destroyed = true;

        match self.backend.remove(&group.name) {
            Ok(()) => info!("Accounting group '{}' removed", group.name),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Accounting group '{}' already gone", group.name)
            }
            Err(e) => {
                let err = MonitorError::CleanupFailure {
                    step: "remove accounting group",
                    reason: format!("'{}': {}", group.name, e),
                };
                warn!("{}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn handle(pids: Vec<u32>) -> WorkloadHandle {
        let expected = pids.len();
        WorkloadHandle::new(pids, expected)
    }

    /// Backend over a temp directory that refuses to admit the given pids.
    /// A busy backend refuses every removal, like a group with live members.
    struct RejectingBackend {
        inner: CgroupV2Backend,
        rejected: Vec<u32>,
        busy: bool,
    }

    impl AccountingBackend for RejectingBackend {
        fn create(&self, name: &str) -> io::Result<()> {
            self.inner.create(name)
        }
        fn remove(&self, name: &str) -> io::Result<()> {
            if self.busy {
                return Err(io::Error::new(io::ErrorKind::Other, "Device or resource busy"));
            }
            fs::remove_dir_all(self.inner.group_path(name))
        }
        fn exists(&self, name: &str) -> bool {
            self.inner.exists(name)
        }
        fn admit(&self, name: &str, pid: u32) -> io::Result<()> {
            if self.rejected.contains(&pid) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "No such process"));
            }
            fs::write(self.inner.group_path(name).join(PROCS_FILE), pid.to_string())
        }
        fn read_cpu_time_usec(&self, name: &str) -> io::Result<Option<u64>> {
            self.inner.read_cpu_time_usec(name)
        }
        fn read_memory_bytes(&self, name: &str) -> io::Result<Option<u64>> {
            self.inner.read_memory_bytes(name)
        }
    }

    fn rejecting(root: &Path, rejected: Vec<u32>) -> RejectingBackend {
        RejectingBackend {
            inner: CgroupV2Backend::new(root),
            rejected,
            busy: false,
        }
    }

    fn busy(root: &Path) -> RejectingBackend {
        RejectingBackend {
            busy: true,
            ..rejecting(root, vec![])
        }
    }

    #[test]
    fn test_parse_cpu_stat() {
        let content = "usage_usec 1500000\nuser_usec 1000000\nsystem_usec 500000\n";
        assert_eq!(parse_cpu_stat(content).unwrap(), Some(1_500_000));
    }

    #[test]
    fn test_parse_cpu_stat_missing_key() {
        assert_eq!(parse_cpu_stat("user_usec 10\n").unwrap(), None);
    }

    #[test]
    fn test_parse_cpu_stat_garbage() {
        assert!(parse_cpu_stat("usage_usec abc\n").is_err());
    }

    #[test]
    fn test_backend_reads_counters() {
        let root = tempdir().unwrap();
        let backend = CgroupV2Backend::new(root.path());
        backend.create("grp").unwrap();
        fs::write(backend.group_path("grp").join(CPU_STAT_FILE), "usage_usec 42\n").unwrap();
        fs::write(backend.group_path("grp").join(MEMORY_CURRENT_FILE), "4096\n").unwrap();

        assert_eq!(backend.read_cpu_time_usec("grp").unwrap(), Some(42));
        assert_eq!(backend.read_memory_bytes("grp").unwrap(), Some(4096));
    }

    #[test]
    fn test_backend_missing_counters_are_absent() {
        let root = tempdir().unwrap();
        let backend = CgroupV2Backend::new(root.path());

        assert_eq!(backend.read_cpu_time_usec("nope").unwrap(), None);
        assert_eq!(backend.read_memory_bytes("nope").unwrap(), None);
    }

    #[test]
    fn test_backend_admit_writes_pid() {
        let root = tempdir().unwrap();
        let backend = CgroupV2Backend::new(root.path());
        backend.create("grp").unwrap();
        fs::write(backend.group_path("grp").join(PROCS_FILE), "").unwrap();

        backend.admit("grp", 4242).unwrap();
        let procs = fs::read_to_string(backend.group_path("grp").join(PROCS_FILE)).unwrap();
        assert_eq!(procs, "4242");
    }

    #[test]
    fn test_backend_admit_without_procs_file_fails() {
        let root = tempdir().unwrap();
        let backend = CgroupV2Backend::new(root.path());
        backend.create("grp").unwrap();

        assert!(backend.admit("grp", 1).is_err());
    }

    #[test]
    fn test_backend_create_rejects_existing_group() {
        let root = tempdir().unwrap();
        let backend = CgroupV2Backend::new(root.path());
        backend.create("grp").unwrap();

        let err = backend.create("grp").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_backend_remove_moves_members_to_root() {
        let root = tempdir().unwrap();
        let backend = CgroupV2Backend::new(root.path());
        fs::write(root.path().join(PROCS_FILE), "").unwrap();
        backend.create("grp").unwrap();
        fs::write(backend.group_path("grp").join(PROCS_FILE), "12\n").unwrap();

        // A plain directory with files cannot be rmdir'ed, cgroupfs can
        assert!(backend.remove("grp").is_err());
        assert_eq!(fs::read_to_string(root.path().join(PROCS_FILE)).unwrap(), "12");
    }

    #[test]
    fn test_backend_remove_empty_group() {
        let root = tempdir().unwrap();
        let backend = CgroupV2Backend::new(root.path());
        backend.create("grp").unwrap();

        backend.remove("grp").unwrap();
        assert!(!backend.exists("grp"));
    }

    #[test]
    fn test_create_and_admit_skips_exited_processes() {
        let root = tempdir().unwrap();
        let controller =
            AccountingGroupController::new(rejecting(root.path(), vec![2, 4]), "grp");

        let group = controller.create_and_admit(&handle(vec![1, 2, 3, 4, 5])).unwrap();
        assert_eq!(group.members(), &[1, 3, 5]);
        assert_eq!(group.name(), "grp");
    }

    #[test]
    fn test_zero_admissions_fail() {
        let root = tempdir().unwrap();
        let controller =
            AccountingGroupController::new(rejecting(root.path(), vec![1, 2, 3, 4, 5]), "grp");

        let result = controller.create_and_admit(&handle(vec![1, 2, 3, 4, 5]));
        assert!(matches!(
            result,
            Err(MonitorError::AdmissionFailed { requested: 5, .. })
        ));
        // The unusable group does not linger
        assert!(!controller.backend().exists("grp"));
    }

    #[test]
    fn test_stale_group_is_replaced() {
        let root = tempdir().unwrap();
        let backend = rejecting(root.path(), vec![]);
        backend.create("grp").unwrap();
        fs::write(backend.inner.group_path("grp").join(PROCS_FILE), "999").unwrap();
        fs::write(backend.inner.group_path("grp").join(CPU_STAT_FILE), "usage_usec 7\n").unwrap();

        let controller = AccountingGroupController::new(backend, "grp");
        let group = controller.create_and_admit(&handle(vec![10])).unwrap();

        assert_eq!(group.members(), &[10]);
        // Previous counters did not survive the reset
        let reading = controller.read_counters(&group);
        assert_eq!(reading.cpu_time_usec, 0);
    }

    #[test]
    fn test_stale_group_that_cannot_be_removed_is_not_reused() {
        let root = tempdir().unwrap();
        let backend = CgroupV2Backend::new(root.path());
        let dir = backend.group_path("grp");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(PROCS_FILE), "999").unwrap();
        fs::write(dir.join(CPU_STAT_FILE), "usage_usec 7000000\n").unwrap();

        let controller = AccountingGroupController::new(backend, "grp");
        let result = controller.create_and_admit(&handle(vec![10]));

        assert!(matches!(result, Err(MonitorError::GroupCreation { .. })));
        assert_eq!(fs::read_to_string(dir.join(PROCS_FILE)).unwrap(), "999");
    }

    #[test]
    fn test_stale_busy_group_fails_creation() {
        let root = tempdir().unwrap();
        let backend = busy(root.path());
        backend.create("grp").unwrap();

        let controller = AccountingGroupController::new(backend, "grp");
        let result = controller.create_and_admit(&handle(vec![10]));
        assert!(matches!(result, Err(MonitorError::GroupCreation { .. })));
    }

    #[test]
    fn test_read_counters_missing_is_zero() {
        let root = tempdir().unwrap();
        let controller = AccountingGroupController::new(rejecting(root.path(), vec![]), "grp");
        let group = controller.create_and_admit(&handle(vec![1])).unwrap();

        assert_eq!(controller.read_counters(&group), CounterReading::default());
    }

    #[test]
    fn test_read_counters_garbage_is_zero() {
        let root = tempdir().unwrap();
        let controller = AccountingGroupController::new(rejecting(root.path(), vec![]), "grp");
        let group = controller.create_and_admit(&handle(vec![1])).unwrap();
        let dir = controller.backend().inner.group_path("grp");
        fs::write(dir.join(CPU_STAT_FILE), "usage_usec ???\n").unwrap();
        fs::write(dir.join(MEMORY_CURRENT_FILE), "2048\n").unwrap();

        let reading = controller.read_counters(&group);
        assert_eq!(reading.cpu_time_usec, 0);
        assert_eq!(reading.memory_bytes, 2048);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let root = tempdir().unwrap();
        let controller = AccountingGroupController::new(rejecting(root.path(), vec![]), "grp");
        let mut group = controller.create_and_admit(&handle(vec![1])).unwrap();

        controller.destroy(&mut group);
        assert!(group.is_destroyed());
        assert!(!controller.backend().exists("grp"));

        // Second call must not panic or error
        controller.destroy(&mut group);
        assert!(group.is_destroyed());
    }

    #[test]
    fn test_destroy_failure_is_swallowed() {
        let root = tempdir().unwrap();
        let controller = AccountingGroupController::new(busy(root.path()), "grp");
        let dir = controller.backend().inner.group_path("grp");

        let mut group = controller.create_and_admit(&handle(vec![1])).unwrap();
        controller.destroy(&mut group);
        assert!(group.is_destroyed());
        assert!(dir.exists());
    }

    #[test]
    fn test_counter_reading_nonzero() {
        assert!(!CounterReading::default().is_nonzero());
        assert!(!CounterReading { cpu_time_usec: 5, memory_bytes: 0 }.is_nonzero());
        assert!(CounterReading { cpu_time_usec: 5, memory_bytes: 1 }.is_nonzero());
    }
}
