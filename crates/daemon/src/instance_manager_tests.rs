// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cvd_core::StatusKind;
use std::path::Path;

fn manager(dir: &Path) -> InstanceManager {
    InstanceManager::new(
        InstanceDatabase::new(),
        InstanceLockManager::new(dir.join("locks")),
        dir.join("instance_db.json"),
    )
}

fn group(name: &str, home: &Path, ids: &[InstanceId]) -> InstanceGroup {
    InstanceGroup {
        name: name.to_string(),
        home_dir: home.to_path_buf(),
        host_artifacts_path: home.join("host"),
        product_out_path: home.join("product"),
        start_time_sec: 0,
        instances: ids.iter().map(|&id| Instance::with_default_name(id)).collect(),
    }
}

#[test]
fn mutations_persist_to_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    mgr.add_group(group("cvd-1", &dir.path().join("h1"), &[1])).unwrap();

    let snapshot = DbSnapshot::load(&dir.path().join("instance_db.json"))
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.db.len(), 1);

    mgr.clear();
    let snapshot = DbSnapshot::load(&dir.path().join("instance_db.json"))
        .unwrap()
        .unwrap();
    assert!(snapshot.db.is_empty());
}

#[test]
fn select_group_defaults_to_the_only_group() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    mgr.add_group(group("cvd-1", &dir.path().join("h1"), &[1])).unwrap();

    let selected = mgr.select_group(&SelectorOpts::default()).unwrap();
    assert_eq!(selected.name, "cvd-1");
}

#[test]
fn select_group_with_no_groups_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    let err = mgr.select_group(&SelectorOpts::default()).unwrap_err();
    assert_eq!(err.kind, StatusKind::NotFound);
}

#[test]
fn ambiguous_selection_reports_menu() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    mgr.add_group(group("a", &dir.path().join("h1"), &[1])).unwrap();
    mgr.add_group(group("b", &dir.path().join("h2"), &[2])).unwrap();

    let err = mgr.select_group(&SelectorOpts::default()).unwrap_err();
    assert_eq!(err.kind, StatusKind::Ambiguous);
    assert!(err.message.contains("no terminal to disambiguate"));
    assert!(err.message.contains("[0] : a"));
    assert!(err.message.contains("[1] : b"));
}

#[test]
fn selector_narrows_ambiguity() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    mgr.add_group(group("a", &dir.path().join("h1"), &[1])).unwrap();
    mgr.add_group(group("b", &dir.path().join("h2"), &[2])).unwrap();

    let opts = SelectorOpts {
        group_name: Some("b".to_string()),
        ..Default::default()
    };
    assert_eq!(mgr.select_group(&opts).unwrap().name, "b");
}

#[test]
fn acquires_lowest_free_ids_first() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    let locks = mgr.acquire_instance_ids(&[], 2).unwrap();
    let ids: Vec<_> = locks.iter().map(|l| l.id()).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn skips_ids_tracked_by_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    mgr.add_group(group("a", &dir.path().join("h1"), &[1])).unwrap();

    let locks = mgr.acquire_instance_ids(&[], 1).unwrap();
    assert_eq!(locks[0].id(), 2);
}

#[test]
fn explicit_id_collision_fails_and_retains_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    mgr.add_group(group("a", &dir.path().join("h1"), &[2])).unwrap();

    let err = mgr.acquire_instance_ids(&[2], 1).unwrap_err();
    assert_eq!(err.kind, StatusKind::Precondition);
    // The id the other group holds stays untouched; a fresh id works.
    assert_eq!(mgr.acquire_instance_ids(&[3], 1).unwrap()[0].id(), 3);
}

#[test]
fn overlapping_start_loses_the_lock_race() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    let _held = mgr.acquire_instance_ids(&[1], 1).unwrap();

    let err = mgr.acquire_instance_ids(&[1], 1).unwrap_err();
    assert_eq!(err.kind, StatusKind::Precondition);
    assert!(err.message.contains("locked by another process"));
}

#[test]
fn release_resets_token() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    {
        let locks = mgr.acquire_instance_ids(&[5], 1).unwrap();
        assert_eq!(locks[0].id(), 5);
    }
    mgr.release_instance_id(5);

    // The id is immediately reusable.
    let locks = mgr.acquire_instance_ids(&[5], 1).unwrap();
    assert_eq!(locks[0].id(), 5);
}

#[test]
fn set_group_state_updates_every_instance() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    mgr.add_group(group("a", &dir.path().join("h1"), &[1, 2])).unwrap();
    mgr.set_group_state("a", InstanceState::Running).unwrap();

    let groups = mgr.groups();
    assert!(groups[0]
        .instances
        .iter()
        .all(|i| i.state == InstanceState::Running));
}
