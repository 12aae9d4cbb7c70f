//! Output Ownership
//!
//! Monitoring runs as root, but the series it writes belongs to whoever
//! launched it. Files are handed back to the `sudo` caller, or to the
//! real user when not started through `sudo`.

use std::path::Path;

use log::{debug, warn};
use nix::unistd::{chown, geteuid, getgid, getuid, Gid, Uid};

use crate::error::MonitorError;

/// User and group that should own the run's artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: Uid,
    pub gid: Gid,
}

impl Owner {
    /// Resolves the invoking user from `SUDO_UID`/`SUDO_GID`.
    pub fn invoking_user() -> Self {
        Self::from_sudo_env(
            std::env::var("SUDO_UID").ok().as_deref(),
            std::env::var("SUDO_GID").ok().as_deref(),
        )
    }

    /// Uses the sudo ids when both parse, the real ids otherwise.
    pub fn from_sudo_env(sudo_uid: Option<&str>, sudo_gid: Option<&str>) -> Self {
        let parsed = sudo_uid
            .and_then(|u| u.trim().parse::<u32>().ok())
            .zip(sudo_gid.and_then(|g| g.trim().parse::<u32>().ok()));

        match parsed {
            Some((uid, gid)) => Self {
                uid: Uid::from_raw(uid),
                gid: Gid::from_raw(gid),
            },
            None => Self {
                uid: getuid(),
                gid: getgid(),
            },
        }
    }
}

/// True when running with an effective uid of root.
pub fn is_privileged() -> bool {
    geteuid().is_root()
}

/// Chowns every path to `owner`, logging failures.
///
/// Returns the number of paths that could not be changed.
pub fn restore_ownership(paths: &[&Path], owner: Owner) -> usize {
    let mut failures = 0;
    for path in paths {
        match chown(*path, Some(owner.uid), Some(owner.gid)) {
            Ok(()) => debug!(
                "Ownership of {} set to {}:{}",
                path.display(),
                owner.uid,
                owner.gid
            ),
            Err(e) => {
                failures += 1;
                let err = MonitorError::CleanupFailure {
                    step: "restore ownership",
                    reason: format!("{}: {}", path.display(), e),
                };
                warn!("{}", err);
            }
        }
    }
    failures
}
