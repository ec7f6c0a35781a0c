/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::info;

use crate::config::Config;
use crate::error::{GitcacheError, Result};

/// Poll interval while waiting for the initial, silent acquisition phase.
const INITIAL_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// The acquisition policy of a mirror lock.
#[derive(Clone, Copy, Debug)]
pub struct LockPolicy {
    pub warn_after: Duration,
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl LockPolicy {
    pub fn from_config(config: &Config) -> Self {
        LockPolicy {
            warn_after: config_duration(config, "WarnIfLockedFor"),
            check_interval: config_duration(config, "CheckInterval").max(Duration::from_millis(100)),
            timeout: config_duration(config, "LockTimeout"),
        }
    }
}

fn config_duration(config: &Config, option: &str) -> Duration {
    Duration::from_secs(config.get_seconds("Command", option).max(0) as u64)
}

/// An advisory file lock serializing all operations on one mirror.
///
/// Acquisition first tries silently for `warn_after`, then logs a single
/// info line and keeps polling every `check_interval` until `timeout`.
/// The lock is released when the guard is dropped.
pub struct MirrorLock {
    file: File,
}

impl MirrorLock {
    pub fn acquire(name: &str, lockfile: &Path, policy: &LockPolicy) -> Result<Self> {
        let file = open_lockfile(lockfile)?;

        if try_acquire(&file, policy.warn_after, INITIAL_CHECK_INTERVAL) {
            return Ok(MirrorLock { file });
        }

        info!(
            "{} is locked. Waiting up to {} seconds.",
            name,
            policy.timeout.as_secs()
        );
        if try_acquire(&file, policy.timeout, policy.check_interval) {
            return Ok(MirrorLock { file });
        }

        Err(GitcacheError::LockTimeout(name.to_string()))
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_lockfile(lockfile: &Path) -> Result<File> {
    if let Some(parent) = lockfile.parent() {
        fs::create_dir_all(parent).map_err(|source| GitcacheError::Filesystem {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lockfile)
        .map_err(|source| GitcacheError::Filesystem {
            path: lockfile.to_path_buf(),
            source,
        })
}

fn try_acquire(file: &File, timeout: Duration, check_interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if file.try_lock_exclusive().is_ok() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(check_interval.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LockPolicy {
        LockPolicy {
            warn_after: Duration::from_millis(100),
            check_interval: Duration::from_millis(50),
            timeout: Duration::from_millis(300),
        }
    }

    #[test]
    fn lock_can_be_acquired_and_reacquired() {
        let tmp = tempfile::tempdir().unwrap();
        let lockfile = tmp.path().join(".lock").join("repo");

        let lock = MirrorLock::acquire("Mirror repo", &lockfile, &policy()).unwrap();
        drop(lock);
        let _lock = MirrorLock::acquire("Mirror repo", &lockfile, &policy()).unwrap();
    }

    #[test]
    fn concurrent_acquisition_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let lockfile = tmp.path().join(".lock").join("repo");

        let held = open_lockfile(&lockfile).unwrap();
        held.try_lock_exclusive().unwrap();

        let result = MirrorLock::acquire("Mirror repo", &lockfile, &policy());
        assert!(matches!(result, Err(GitcacheError::LockTimeout(_))));
    }

    #[test]
    fn lock_policy_defaults() {
        let policy = LockPolicy::from_config(&Config::new());
        assert_eq!(policy.warn_after, Duration::from_secs(10));
        assert_eq!(policy.check_interval, Duration::from_secs(2));
        assert_eq!(policy.timeout, Duration::from_secs(3600));
    }
}
