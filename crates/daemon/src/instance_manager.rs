// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared view over the instance database and the lock manager.
//!
//! Handlers go through this type for every database mutation; each
//! mutation is persisted to the snapshot file so a daemon restart (or
//! self-exec without a carryover descriptor) can recover the fleet.

use std::path::PathBuf;

use cvd_core::{Instance, InstanceGroup, InstanceId, InstanceState, Query, SelectorOpts, Status};
use cvd_storage::{DbSnapshot, InUseState, InstanceDatabase, InstanceLockFile, InstanceLockManager};
use parking_lot::Mutex;
use tracing::warn;

pub struct InstanceManager {
    db: Mutex<InstanceDatabase>,
    lock_manager: InstanceLockManager,
    snapshot_path: PathBuf,
}

impl InstanceManager {
    pub fn new(
        db: InstanceDatabase,
        lock_manager: InstanceLockManager,
        snapshot_path: PathBuf,
    ) -> Self {
        Self {
            db: Mutex::new(db),
            lock_manager,
            snapshot_path,
        }
    }

    pub fn lock_manager(&self) -> &InstanceLockManager {
        &self.lock_manager
    }

    fn persist(&self, db: &InstanceDatabase) {
        if let Err(e) = DbSnapshot::new(db.clone()).save(&self.snapshot_path) {
            warn!(error = %e, "failed to persist instance database");
        }
    }

    pub fn has_groups(&self) -> bool {
        !self.db.lock().is_empty()
    }

    pub fn groups(&self) -> Vec<InstanceGroup> {
        self.db.lock().groups().cloned().collect()
    }

    pub fn add_group(&self, group: InstanceGroup) -> Result<(), Status> {
        let mut db = self.db.lock();
        db.add_group(group)?;
        self.persist(&db);
        Ok(())
    }

    pub fn remove_group(&self, name: &str) -> Result<InstanceGroup, Status> {
        let mut db = self.db.lock();
        let removed = db.remove_group(name)?;
        self.persist(&db);
        Ok(removed)
    }

    pub fn update_instance(&self, instance: &Instance) -> Result<(), Status> {
        let mut db = self.db.lock();
        db.update_instance(instance)?;
        self.persist(&db);
        Ok(())
    }

    /// Move every instance of `group` to `state`.
    pub fn set_group_state(&self, group_name: &str, state: InstanceState) -> Result<(), Status> {
        let mut db = self.db.lock();
        let group = db
            .find_groups(&[Query::new(cvd_core::FieldName::GroupName, group_name)])
            .into_iter()
            .next()
            .ok_or_else(|| Status::not_found(format!("no group named \"{group_name}\"")))?;
        for mut instance in group.instances {
            instance.state = state;
            db.update_instance(&instance)?;
        }
        self.persist(&db);
        Ok(())
    }

    pub fn find_groups(&self, queries: &[Query]) -> Vec<InstanceGroup> {
        self.db.lock().find_groups(queries)
    }

    pub fn clear(&self) -> Vec<InstanceGroup> {
        let mut db = self.db.lock();
        let cleared = db.clear();
        self.persist(&db);
        cleared
    }

    pub fn serialize(&self) -> Result<serde_json::Value, Status> {
        self.db.lock().serialize()
    }

    pub fn used_instance_ids(&self) -> Vec<InstanceId> {
        self.db.lock().used_instance_ids().into_iter().collect()
    }

    /// Resolve a selector to exactly one group.
    ///
    /// With no match and exactly one group tracked, that group is chosen.
    /// Multiple matches cannot be disambiguated over the wire; the error
    /// carries the group menu so the caller can rerun with a selector.
    pub fn select_group(&self, opts: &SelectorOpts) -> Result<InstanceGroup, Status> {
        let db = self.db.lock();
        let queries = opts.queries();
        let mut matches = db.find_groups(&queries);
        if matches.len() == 1 {
            return Ok(matches.remove(0));
        }
        if matches.is_empty() {
            let mut all: Vec<_> = db.groups().cloned().collect();
            if opts.is_empty() && all.len() == 1 {
                return Ok(all.remove(0));
            }
            return Err(Status::not_found("no device group matches the selector"));
        }
        Err(Status::ambiguous(format!(
            "multiple device groups match and there is no terminal to disambiguate; \
             rerun with --group_name:\n{}",
            group_menu(&matches)
        )))
    }

    /// Reserve `count` instance ids, lowest-first from the free set.
    ///
    /// Explicitly requested ids must each be lockable and unused; a
    /// collision fails the whole acquisition with nothing retained.
    pub fn acquire_instance_ids(
        &self,
        requested: &[InstanceId],
        count: usize,
    ) -> Result<Vec<InstanceLockFile>, Status> {
        let mut locks = Vec::new();
        if requested.is_empty() {
            // Holding a skipped lock keeps the scan moving past its id.
            let mut skipped = Vec::new();
            for _ in 0..count {
                loop {
                    let mut lock = self.lock_manager.try_acquire_unused_lock()?;
                    // An id the database tracks despite a free token means a
                    // stale lock file; keep scanning.
                    if self.used_instance_ids().contains(&lock.id()) {
                        skipped.push(lock);
                        continue;
                    }
                    lock.set_status(InUseState::Acquired)?;
                    locks.push(lock);
                    break;
                }
            }
            drop(skipped);
        } else {
            for &id in requested {
                let mut lock = self.acquire_specific(id)?;
                lock.set_status(InUseState::Acquired)?;
                locks.push(lock);
            }
        }
        Ok(locks)
    }

    fn acquire_specific(&self, id: InstanceId) -> Result<InstanceLockFile, Status> {
        if self.used_instance_ids().contains(&id) {
            return Err(Status::precondition(format!(
                "instance id {id} is already tracked by another group"
            )));
        }
        let Some(mut lock) = self.lock_manager.try_acquire_lock(id)? else {
            return Err(Status::precondition(format!(
                "instance id {id} is locked by another process"
            )));
        };
        if lock.status()? == InUseState::InUse {
            return Err(Status::precondition(format!(
                "instance id {id} backs an active device"
            )));
        }
        Ok(lock)
    }

    /// Release the lock token for an instance id back to `not_in_use`.
    pub fn release_instance_id(&self, id: InstanceId) {
        match self.lock_manager.try_acquire_lock(id) {
            Ok(Some(mut lock)) => {
                if let Err(e) = lock.set_status(InUseState::NotInUse) {
                    warn!(id, error = %e, "failed to reset instance lock token");
                }
            }
            Ok(None) => warn!(id, "instance lock held elsewhere, token not reset"),
            Err(e) => warn!(id, error = %e, "failed to acquire instance lock for release"),
        }
    }
}

/// Human-readable listing of device groups for disambiguation errors.
pub fn group_menu(groups: &[InstanceGroup]) -> String {
    let mut menu = String::from("List of device groups:\n");
    for (i, group) in groups.iter().enumerate() {
        menu.push_str(&format!("  [{i}] : {} (home: {})\n", group.name, group.home_dir.display()));
        for instance in &group.instances {
            menu.push_str(&format!("    {} (id : {})\n", instance.name, instance.id));
        }
    }
    menu
}

#[cfg(test)]
#[path = "instance_manager_tests.rs"]
mod tests;
