//! Advisory lock on an output partition directory.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::{AssayError, Result};

/// Lock file name inside the locked directory.
pub const LOCK_FILE: &str = ".assay.lock";

static RECLAIM_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: String,
}

/// Exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct PartitionLock {
    path: PathBuf,
}

impl PartitionLock {
    /// Acquire the lock for `dir`, waiting up to `timeout`.
    ///
    /// A lock whose recorded holder process is no longer running is
    /// reclaimed. An unreadable lock file is treated as held.
    pub fn acquire(dir: &Path, timeout: Duration, poll: Duration) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| AssayError::io(dir, e))?;
        let path = dir.join(LOCK_FILE);
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        acquired_at: Utc::now().to_rfc3339(),
                    };
                    serde_json::to_writer(&mut file, &info)?;
                    file.flush().map_err(|e| AssayError::io(&path, e))?;
                    debug!(lock = %path.display(), "acquired partition lock");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_holder(&path);
                    if let Some(pid) = holder {
                        if !process_alive(pid) {
                            warn!(lock = %path.display(), pid, "reclaiming stale partition lock");
                            reclaim_stale(&path, pid)?;
                            continue;
                        }
                    }
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(AssayError::LockTimeout {
                            path,
                            waited_ms: waited.as_millis() as u64,
                            holder,
                        });
                    }
                    thread::sleep(poll.min(timeout - waited));
                }
                Err(e) => return Err(AssayError::io(&path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PartitionLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(lock = %self.path.display(), error = %e, "failed to release partition lock");
            }
        }
    }
}

/// Move a stale lock aside before deleting it.
///
/// The rename is atomic, so only one waiter takes the file. If the file
/// taken no longer names `stale_pid`, another waiter already reclaimed the
/// lock and this one grabbed a live lock; it is linked back in place.
fn reclaim_stale(path: &Path, stale_pid: u32) -> Result<()> {
    let aside = path.with_file_name(format!(
        "{}.stale-{}-{}",
        LOCK_FILE,
        std::process::id(),
        RECLAIM_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(AssayError::io(path, e)),
    }

    if read_holder(&aside) != Some(stale_pid) {
        match fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(lock = %path.display(), "live partition lock replaced during reclaim");
            }
            Err(e) => return Err(AssayError::io(path, e)),
        }
    }
    fs::remove_file(&aside).map_err(|e| AssayError::io(&aside, e))
}

fn read_holder(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str::<LockInfo>(&contents)
        .ok()
        .map(|info| info.pid)
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SHORT: Duration = Duration::from_millis(50);
    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let lock = PartitionLock::acquire(dir.path(), SHORT, POLL).unwrap();
        assert!(lock.path().exists());

        let err = PartitionLock::acquire(dir.path(), SHORT, POLL).unwrap_err();
        match err {
            AssayError::LockTimeout { holder, .. } => {
                assert_eq!(holder, Some(std::process::id()))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
        PartitionLock::acquire(dir.path(), SHORT, POLL).unwrap();
    }

    #[test]
    fn test_stale_lock_reclaimed() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(LOCK_FILE),
            r#"{"pid": 999999999, "acquired_at": "2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let lock = PartitionLock::acquire(dir.path(), SHORT, POLL).unwrap();
        assert_eq!(read_holder(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn test_reclaim_restores_lock_taken_over_by_live_holder() {
        let dir = TempDir::new().unwrap();
        let lock = PartitionLock::acquire(dir.path(), SHORT, POLL).unwrap();

        // Another waiter saw a dead pid, but the lock has since been retaken.
        reclaim_stale(lock.path(), 999_999_999).unwrap();

        assert_eq!(read_holder(lock.path()), Some(std::process::id()));
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name.as_os_str() != LOCK_FILE)
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[test]
    fn test_reclaim_removes_lock_of_dead_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE);
        fs::write(&path, r#"{"pid": 999999999, "acquired_at": "2025-01-01T00:00:00Z"}"#)
            .unwrap();

        reclaim_stale(&path, 999_999_999).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        // Already gone: a second reclaim is a no-op.
        reclaim_stale(&path, 999_999_999).unwrap();
    }

    #[test]
    fn test_corrupt_lock_is_held() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "not json").unwrap();
        let err = PartitionLock::acquire(dir.path(), SHORT, POLL).unwrap_err();
        assert!(matches!(err, AssayError::LockTimeout { holder: None, .. }));
    }
}
