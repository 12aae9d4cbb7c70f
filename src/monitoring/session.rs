//! Monitoring Session
//!
//! One end-to-end monitoring run: find the workload, account it in a
//! fresh group, sample until done, then tear everything down.
//!
//! The accounting group is removed on every path once it exists,
//! including sink failures and interrupts.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::monitoring::cgroup::{AccountingBackend, AccountingGroupController, CgroupV2Backend};
use crate::monitoring::ownership::{restore_ownership, Owner};
use crate::monitoring::resolver::{ProcessFinder, ProcessSetResolver, SysinfoProcessFinder};
use crate::monitoring::sampler::{Clock, RunSummary, SamplerSettings, SamplingLoop, StopFlag, SystemClock};
use crate::monitoring::series::SeriesWriter;

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    /// Series file
    pub output: PathBuf,
    pub processes_expected: usize,
    pub processes_found: usize,
    pub processes_admitted: usize,
    pub run: RunSummary,
}

impl MonitorReport {
    /// True when fewer processes were accounted than expected.
    pub fn is_degraded(&self) -> bool {
        self.processes_admitted < self.processes_expected
    }
}

/// Wires resolver, accounting group, sampler and sink together.
pub struct MonitorSession<F: ProcessFinder, B: AccountingBackend, C: Clock> {
    config: MonitorConfig,
    resolver: ProcessSetResolver<F>,
    controller: AccountingGroupController<B>,
    clock: C,
}

impl MonitorSession<SysinfoProcessFinder, CgroupV2Backend, SystemClock> {
    /// Session against the live process table and cgroup hierarchy.
    pub fn from_config(config: MonitorConfig) -> Self {
        let backend = CgroupV2Backend::new(config.cgroup_root.clone());
        Self::new(config, SysinfoProcessFinder::new(), backend, SystemClock)
    }
}

impl<F: ProcessFinder, B: AccountingBackend, C: Clock> MonitorSession<F, B, C> {
    pub fn new(config: MonitorConfig, finder: F, backend: B, clock: C) -> Self {
        let resolver = ProcessSetResolver::new(finder).with_poll_interval(config.poll_interval());
        let controller = AccountingGroupController::new(backend, config.group_name.clone());
        Self {
            config,
            resolver,
            controller,
            clock,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn controller(&self) -> &AccountingGroupController<B> {
        &self.controller
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Runs the session until the duration elapses or `stop` is raised.
    ///
    /// # Errors
    ///
    /// Resolution, group creation, admission and sink errors end the run.
    /// A stop request before sampling starts ends it with
    /// [`MonitorError::Interrupted`] and leaves no group or series behind.
    /// Counter and cleanup problems are only logged.
    pub fn run(&mut self, stop: &StopFlag) -> Result<MonitorReport, MonitorError> {
        self.resolver.set_stop_flag(stop.clone());
        let config = &self.config;
        info!(
            "Waiting for {} process(es) matching '{}' (timeout {}s)",
            config.expected_count, config.selector, config.start_timeout_secs
        );
        let handle = self.resolver.resolve(
            &config.selector,
            config.expected_count,
            config.start_timeout(),
        )?;

        if stop.is_triggered() {
            return Err(MonitorError::Interrupted {
                stage: "starting the group",
            });
        }
        let mut group = self.controller.create_and_admit(&handle)?;

        let created_dir = new_parent_dir(&config.output);
        let mut writer = match SeriesWriter::create(&config.output) {
            Ok(writer) => writer,
            Err(e) => {
                self.controller.destroy(&mut group);
                return Err(e);
            }
        };

        let mut settings = SamplerSettings::new(config.interval(), config.duration());
        settings.wait_for_nonzero = config.wait_for_nonzero;
        settings.progress = config.progress;

        info!(
            "Sampling every {}ms {} into {}",
            config.interval_ms,
            match config.duration_secs {
                0 => "until interrupted".to_string(),
                secs => format!("for {}s", secs),
            },
            config.output.display()
        );

        let result = SamplingLoop::new(
            &self.controller,
            &group,
            &self.clock,
            settings,
            stop.clone(),
        )
        .run(&mut writer);
        drop(writer);

        self.controller.destroy(&mut group);

        if config.restore_ownership {
            let mut paths = vec![config.output.as_path()];
            if let Some(dir) = created_dir.as_deref() {
                paths.push(dir);
            }
            let failures = restore_ownership(&paths, Owner::invoking_user());
            if failures > 0 {
                warn!("Ownership of {} path(s) not restored", failures);
            }
        }

        let run = result?;
        info!("Series written to {}", config.output.display());

        Ok(MonitorReport {
            output: config.output.clone(),
            processes_expected: handle.expected(),
            processes_found: handle.len(),
            processes_admitted: group.members().len(),
            run,
        })
    }
}

/// Parent directory of `path` if it does not exist yet.
fn new_parent_dir(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty() && !dir.exists())
        .map(Path::to_path_buf)
}
