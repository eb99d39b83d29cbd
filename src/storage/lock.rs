//! Cross-process sync lock
//!
//! Two processes syncing the same queue file would both deliver its entries.
//! The lock file records `pid=<pid> at=<rfc3339>` so a lock left behind by a
//! crashed process can be recovered.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, Process, ProcessesToUpdate, System};

use super::open_private_file_new;

const STALE_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

/// Start times within this window of the lock timestamp count as the same process.
const START_TIME_SLACK_SECS: i64 = 5;

/// Held while a sync pass runs. Removes the lock file on drop.
pub struct SyncLock {
    path: PathBuf,
    file: Option<File>,
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        // Windows refuses to delete a file that is still open.
        self.file = None;
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %err, "Could not remove sync lock");
        }
    }
}

/// What a lock file says about its holder
#[derive(Debug, Default, PartialEq)]
struct LockInfo {
    pid: Option<u32>,
    written_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: Some(std::process::id()),
            written_at: Some(Utc::now()),
        }
    }

    fn parse(contents: &str) -> Self {
        let mut info = Self::default();
        for (key, value) in contents.split_whitespace().filter_map(|part| part.split_once('=')) {
            match key {
                "pid" => info.pid = value.parse().ok(),
                "at" => {
                    info.written_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc))
                }
                _ => {}
            }
        }
        info
    }

    fn render(&self) -> String {
        let pid = self.pid.map(|pid| pid.to_string()).unwrap_or_default();
        let at = self.written_at.map(|at| at.to_rfc3339()).unwrap_or_default();
        format!("pid={pid} at={at}")
    }

    /// A lock is stale once it is too old or its holder no longer runs.
    fn is_stale(&self, file_age: Option<Duration>) -> bool {
        let age = self
            .written_at
            .and_then(|at| Utc::now().signed_duration_since(at).to_std().ok())
            .or(file_age)
            .unwrap_or_default();
        if age > STALE_AFTER {
            return true;
        }

        match self.pid {
            Some(pid) => !holder_is_alive(pid, self.written_at),
            None => false,
        }
    }
}

pub(super) fn try_acquire(lock_path: &Path) -> Result<Option<SyncLock>> {
    match create_sync_lock(lock_path) {
        Ok(lock) => return Ok(Some(lock)),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to create sync lock at {}", lock_path.display()))
        }
    }

    if !sync_lock_is_stale(lock_path) {
        return Ok(None);
    }

    tracing::info!(path = %lock_path.display(), "Recovering stale sync lock");
    let _ = fs::remove_file(lock_path);
    match create_sync_lock(lock_path) {
        Ok(lock) => Ok(Some(lock)),
        // Another process recovered it first.
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(err)
            .with_context(|| format!("Failed to recover sync lock at {}", lock_path.display())),
    }
}

fn create_sync_lock(path: &Path) -> std::io::Result<SyncLock> {
    let mut lock = SyncLock {
        path: path.to_path_buf(),
        file: Some(open_private_file_new(path)?),
    };
    // On error the lock drops and removes the half-written file.
    if let Some(file) = lock.file.as_mut() {
        writeln!(file, "{}", LockInfo::current().render())?;
    }
    Ok(lock)
}

fn sync_lock_is_stale(path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(path) else {
        return false;
    };
    let file_age = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok());

    LockInfo::parse(&contents).is_stale(file_age)
}

/// `false` if the pid is gone or now belongs to a process started after the lock was written.
fn holder_is_alive(pid: u32, written_at: Option<DateTime<Utc>>) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    let Some(process) = system.process(pid) else {
        return false;
    };
    match (written_at, started_at(process)) {
        (Some(written_at), Some(started)) => {
            started <= written_at + ChronoDuration::seconds(START_TIME_SLACK_SECS)
        }
        _ => true,
    }
}

fn started_at(process: &Process) -> Option<DateTime<Utc>> {
    // Some platforms report seconds since boot rather than since the epoch.
    let boot = System::boot_time();
    let start = match process.start_time() {
        secs if secs < boot => boot.saturating_add(secs),
        secs => secs,
    };
    DateTime::<Utc>::from_timestamp(i64::try_from(start).ok()?, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_lock(path: &Path, pid: u32, written_at: DateTime<Utc>) {
        let info = LockInfo {
            pid: Some(pid),
            written_at: Some(written_at),
        };
        fs::write(path, info.render()).unwrap();
    }

    #[test]
    fn test_sync_lock_allows_only_one_holder() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("offlineReports.sync.lock");

        let lock = try_acquire(&lock_path)
            .unwrap()
            .expect("first lock should acquire");
        assert!(try_acquire(&lock_path).unwrap().is_none());

        drop(lock);
        assert!(!lock_path.exists());
        assert!(try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn test_lock_info_parses_pid_and_timestamp() {
        let info = LockInfo::parse("pid=4242 at=2024-06-10T08:30:00+00:00\n");
        assert_eq!(info.pid, Some(4242));
        assert_eq!(
            info.written_at.map(|at| at.timestamp()),
            Some(1_718_008_200)
        );

        assert_eq!(LockInfo::parse("garbage"), LockInfo::default());
        assert_eq!(LockInfo::parse("pid=abc at=yesterday"), LockInfo::default());
    }

    #[test]
    fn test_old_lock_is_stale_even_with_running_pid() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(".sync.lock");
        write_lock(&lock_path, std::process::id(), Utc::now() - ChronoDuration::hours(8));

        assert!(sync_lock_is_stale(&lock_path));
        assert!(try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn test_fresh_lock_held_by_this_process_is_not_stale() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(".sync.lock");
        write_lock(&lock_path, std::process::id(), Utc::now());

        assert!(!sync_lock_is_stale(&lock_path));
    }

    #[test]
    fn test_lock_of_missing_process_is_stale() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(".sync.lock");
        write_lock(&lock_path, u32::MAX - 1, Utc::now());

        assert!(sync_lock_is_stale(&lock_path));
    }

    #[test]
    fn test_lock_without_pid_waits_for_age() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(".sync.lock");
        fs::write(&lock_path, "").unwrap();

        assert!(!sync_lock_is_stale(&lock_path));
    }
}
