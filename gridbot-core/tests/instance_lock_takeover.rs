use std::time::Duration;

use gridbot_core::store::{InstanceLock, LockOptions};

#[test]
fn stale_owner_lock_is_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".instance.lock"), "pid=999999\nstarted_at=1\n").unwrap();

    let lock = InstanceLock::acquire(
        dir.path(),
        &LockOptions { takeover: true, stale_after: Duration::from_secs(600) },
    );
    assert!(lock.is_ok(), "lock held by a dead pid should be taken over");
}

#[test]
fn without_takeover_existing_lock_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let _first = InstanceLock::acquire(dir.path(), &LockOptions::default()).unwrap();
    let second = InstanceLock::acquire(dir.path(), &LockOptions::default());
    assert!(second.is_err());
}
