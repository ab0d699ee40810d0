// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::instance_manager::InstanceManager;
use crate::lifecycle::Config;
use cvd_core::{Instance, InstanceGroup, InstanceState};
use cvd_storage::{InstanceDatabase, InstanceLockManager};

fn shared(dir: &std::path::Path) -> Arc<ServerShared> {
    let config = Config {
        runtime_dir: dir.to_path_buf(),
        socket_path: dir.join("cvd_server.sock"),
        lock_path: dir.join("cvd_server.pid"),
        version_path: dir.join("cvd_server.version"),
        log_path: dir.join("cvd_server.log"),
        db_snapshot_path: dir.join("instance_db.json"),
        instance_locks_dir: dir.join("instance_locks"),
    };
    let manager = Arc::new(InstanceManager::new(
        InstanceDatabase::new(),
        InstanceLockManager::new(dir.join("instance_locks")),
        dir.join("instance_db.json"),
    ));
    Arc::new(ServerShared::new(config, manager, -1))
}

fn group(name: &str, home: &std::path::Path, id: u32) -> InstanceGroup {
    let mut instance = Instance::with_default_name(id);
    instance.state = InstanceState::Running;
    InstanceGroup {
        name: name.to_string(),
        home_dir: home.to_path_buf(),
        host_artifacts_path: home.join("host"),
        product_out_path: home.join("product"),
        start_time_sec: 1_700_000_000,
        instances: vec![instance],
    }
}

#[test]
fn empty_fleet_document() {
    let dir = tempfile::tempdir().unwrap();
    let handler = FleetHandler::new(&shared(dir.path()));
    let document = handler.fleet_json();
    assert_eq!(document["groups"], serde_json::json!([]));
}

#[test]
fn fleet_lists_groups_in_sorted_order_with_states() {
    let dir = tempfile::tempdir().unwrap();
    let shared = shared(dir.path());
    shared
        .instance_manager
        .add_group(group("zebra", &dir.path().join("hz"), 2))
        .unwrap();
    shared
        .instance_manager
        .add_group(group("apple", &dir.path().join("ha"), 1))
        .unwrap();

    let handler = FleetHandler::new(&shared);
    let document = handler.fleet_json();
    let groups = document["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["group_name"], "apple");
    assert_eq!(groups[1]["group_name"], "zebra");
    assert_eq!(groups[0]["instances"][0]["id"], 1);
    assert_eq!(groups[0]["instances"][0]["state"], "RUNNING");
    assert_eq!(groups[0]["instances"][0]["name"], "cvd-1");
}
