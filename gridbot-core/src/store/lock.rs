//! Instance lock with stale-owner takeover (§4.2).

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::StoreError;

pub struct InstanceLock {
    path: PathBuf,
}

pub struct LockOptions {
    pub takeover: bool,
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self { takeover: false, stale_after: Duration::from_secs(600) }
    }
}

#[derive(Debug, Default)]
struct LockFileContents {
    pid: Option<i32>,
    started_at: Option<i64>,
}

fn parse_lock_file(body: &str) -> LockFileContents {
    let mut out = LockFileContents::default();
    for line in body.lines() {
        if let Some(v) = line.strip_prefix("pid=") {
            out.pid = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("started_at=") {
            out.started_at = v.trim().parse().ok();
        }
    }
    out
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Signal-0 liveness probe: delivering signal 0 validates existence/permission
/// without actually signaling the process. Permission-denied counts as alive
/// (another user's live process we can't inspect further).
fn process_alive(pid: i32) -> bool {
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    let err = std::io::Error::last_os_error();
    matches!(err.kind(), ErrorKind::PermissionDenied)
}

impl InstanceLock {
    /// Attempts to acquire `<dir>/.instance.lock`, with bounded stale-owner
    /// takeover per `opts`.
    pub fn acquire(dir: &Path, opts: &LockOptions) -> Result<Self, StoreError> {
        let path = dir.join(".instance.lock");
        fs::create_dir_all(dir)?;

        for _attempt in 0..3 {
            match try_create(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !opts.takeover {
                        return Err(StoreError::InstanceLockExists);
                    }
                    match inspect_with_staleness(&path, opts.stale_after)? {
                        Inspection::OwnerAlive => return Err(StoreError::OwnerProcessRunning),
                        Inspection::StaleRemoved => continue,
                        Inspection::NotStaleYet => return Err(StoreError::LockNotStale),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::OwnerProcessRunning)
    }

    pub fn release(self) {
        let _ = fs::remove_file(&self.path);
    }
}

enum Inspection {
    OwnerAlive,
    StaleRemoved,
    NotStaleYet,
}

fn inspect_with_staleness(path: &Path, stale_after: Duration) -> Result<Inspection, StoreError> {
    let mut body = String::new();
    File::open(path)?.read_to_string(&mut body)?;
    let parsed = parse_lock_file(&body);

    if let Some(pid) = parsed.pid {
        if process_alive(pid) {
            return Ok(Inspection::OwnerAlive);
        }
        fs::remove_file(path)?;
        return Ok(Inspection::StaleRemoved);
    }

    if let Some(started_at) = parsed.started_at {
        if now_unix() - started_at >= stale_after.as_secs() as i64 {
            fs::remove_file(path)?;
            return Ok(Inspection::StaleRemoved);
        }
    }
    Ok(Inspection::NotStaleYet)
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).create_new(true).mode(0o644).open(path)?;
    let pid = std::process::id();
    writeln!(f, "pid={pid}")?;
    writeln!(f, "started_at={}", now_unix())?;
    f.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_second_acquire_without_takeover_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = InstanceLock::acquire(dir.path(), &LockOptions::default()).unwrap();
        let err = InstanceLock::acquire(dir.path(), &LockOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::InstanceLockExists));
    }

    #[test]
    fn takeover_of_dead_owner_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".instance.lock");
        std::fs::write(&lock_path, "pid=999999\nstarted_at=1\n").unwrap();

        let lock = InstanceLock::acquire(
            dir.path(),
            &LockOptions { takeover: true, stale_after: Duration::from_secs(600) },
        );
        assert!(lock.is_ok());
    }

    #[test]
    fn takeover_with_live_owner_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".instance.lock");
        let my_pid = std::process::id() as i32;
        std::fs::write(&lock_path, format!("pid={my_pid}\nstarted_at=1\n")).unwrap();

        let err = InstanceLock::acquire(
            dir.path(),
            &LockOptions { takeover: true, stale_after: Duration::from_secs(600) },
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::OwnerProcessRunning));
    }

    #[test]
    fn stale_timestamp_without_pid_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".instance.lock");
        std::fs::write(&lock_path, "started_at=1\n").unwrap();

        let inspection = inspect_with_staleness(&lock_path, Duration::from_secs(1)).unwrap();
        assert!(matches!(inspection, Inspection::StaleRemoved));
    }
}
