// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fresh_lock_reads_not_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let manager = InstanceLockManager::new(dir.path());
    let mut lock = manager.try_acquire_lock(1).unwrap().unwrap();
    assert_eq!(lock.id(), 1);
    assert_eq!(lock.status().unwrap(), InUseState::NotInUse);
}

#[test]
fn held_lock_blocks_concurrent_acquire() {
    let dir = tempfile::tempdir().unwrap();
    let manager = InstanceLockManager::new(dir.path());
    let _held = manager.try_acquire_lock(7).unwrap().unwrap();

    // A second open file description on the same path must not get the lock.
    assert!(manager.try_acquire_lock(7).unwrap().is_none());
}

#[test]
fn dropping_the_holder_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let manager = InstanceLockManager::new(dir.path());
    {
        let _held = manager.try_acquire_lock(3).unwrap().unwrap();
    }
    assert!(manager.try_acquire_lock(3).unwrap().is_some());
}

#[test]
fn status_round_trips_through_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let manager = InstanceLockManager::new(dir.path());
    {
        let mut lock = manager.try_acquire_lock(2).unwrap().unwrap();
        lock.set_status(InUseState::InUse).unwrap();
        assert_eq!(lock.status().unwrap(), InUseState::InUse);
    }
    // Reacquire and observe the persisted token.
    let mut lock = manager.try_acquire_lock(2).unwrap().unwrap();
    assert_eq!(lock.status().unwrap(), InUseState::InUse);
    lock.set_status(InUseState::NotInUse).unwrap();
    assert_eq!(lock.status().unwrap(), InUseState::NotInUse);
}

#[test]
fn unused_scan_returns_lowest_free_id() {
    let dir = tempfile::tempdir().unwrap();
    let manager = InstanceLockManager::new(dir.path());

    let _one = manager.try_acquire_lock(1).unwrap().unwrap();
    let mut two = manager.try_acquire_lock(2).unwrap().unwrap();
    two.set_status(InUseState::InUse).unwrap();
    drop(two);

    // 1 is lock-held, 2 is marked in use: the scan must land on 3.
    let lock = manager.try_acquire_unused_lock().unwrap();
    assert_eq!(lock.id(), 3);
}

#[test]
fn unused_scan_reuses_released_ids() {
    let dir = tempfile::tempdir().unwrap();
    let manager = InstanceLockManager::new(dir.path());
    {
        let mut one = manager.try_acquire_lock(1).unwrap().unwrap();
        one.set_status(InUseState::NotInUse).unwrap();
    }
    let lock = manager.try_acquire_unused_lock().unwrap();
    assert_eq!(lock.id(), 1);
}
