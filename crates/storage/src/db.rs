// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The in-memory instance database.
//!
//! Groups are keyed (and displayed) by name in sorted order. Uniqueness
//! invariants are enforced on insert: group name, home directory, and every
//! instance id must be unique across the whole database.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use cvd_core::{FieldName, Instance, InstanceGroup, InstanceId, Query, Status};
use serde::{Deserialize, Serialize};

/// In-memory set of instance groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceDatabase {
    groups: BTreeMap<String, InstanceGroup>,
}

impl InstanceDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Groups in canonical (sorted-name) order.
    pub fn groups(&self) -> impl Iterator<Item = &InstanceGroup> {
        self.groups.values()
    }

    /// Every instance id currently tracked, across all groups.
    pub fn used_instance_ids(&self) -> BTreeSet<InstanceId> {
        self.groups
            .values()
            .flat_map(|g| g.instances.iter().map(|i| i.id))
            .collect()
    }

    /// Insert a group, enforcing the uniqueness invariants.
    pub fn add_group(&mut self, group: InstanceGroup) -> Result<(), Status> {
        if self.groups.contains_key(&group.name) {
            return Err(Status::invariant(format!(
                "duplicate group name: \"{}\"",
                group.name
            )));
        }
        if self.groups.values().any(|g| g.home_dir == group.home_dir) {
            return Err(Status::invariant(format!(
                "duplicate home directory: \"{}\"",
                group.home_dir.display()
            )));
        }
        let used = self.used_instance_ids();
        for instance in &group.instances {
            if used.contains(&instance.id) {
                return Err(Status::invariant(format!(
                    "instance id {} is already in use",
                    instance.id
                )));
            }
        }
        self.groups.insert(group.name.clone(), group);
        Ok(())
    }

    /// Remove a group by name, returning it for cleanup.
    pub fn remove_group(&mut self, name: &str) -> Result<InstanceGroup, Status> {
        self.groups
            .remove(name)
            .ok_or_else(|| Status::not_found(format!("no group named \"{name}\"")))
    }

    /// Empty the database, returning the former contents.
    pub fn clear(&mut self) -> Vec<InstanceGroup> {
        std::mem::take(&mut self.groups).into_values().collect()
    }

    fn group_matches(group: &InstanceGroup, query: &Query) -> bool {
        match query.field {
            FieldName::Home => group.home_dir == Path::new(&query.value),
            FieldName::GroupName => group.name == query.value,
            FieldName::InstanceName => group.instances.iter().any(|i| i.name == query.value),
            FieldName::InstanceId => {
                let Ok(id) = query.value.parse::<InstanceId>() else {
                    return false;
                };
                group.instances.iter().any(|i| i.id == id)
            }
        }
    }

    fn instance_matches(instance: &Instance, query: &Query) -> bool {
        match query.field {
            FieldName::InstanceName => instance.name == query.value,
            FieldName::InstanceId => query
                .value
                .parse::<InstanceId>()
                .map(|id| instance.id == id)
                .unwrap_or(false),
            // Group-level fields already constrained the group.
            FieldName::Home | FieldName::GroupName => true,
        }
    }

    /// Groups matching every query, in canonical order.
    pub fn find_groups(&self, queries: &[Query]) -> Vec<InstanceGroup> {
        self.groups
            .values()
            .filter(|g| queries.iter().all(|q| Self::group_matches(g, q)))
            .cloned()
            .collect()
    }

    /// Instances matching every query, paired with their group name.
    pub fn find_instances(&self, queries: &[Query]) -> Vec<(String, Instance)> {
        let mut found = Vec::new();
        for group in self.groups.values() {
            if !queries.iter().all(|q| Self::group_matches(group, q)) {
                continue;
            }
            for instance in &group.instances {
                if queries.iter().all(|q| Self::instance_matches(instance, q)) {
                    found.push((group.name.clone(), instance.clone()));
                }
            }
        }
        found
    }

    /// Write back an instance's state. The instance is located by id.
    pub fn update_instance(&mut self, instance: &Instance) -> Result<(), Status> {
        for group in self.groups.values_mut() {
            if let Some(slot) = group.instances.iter_mut().find(|i| i.id == instance.id) {
                *slot = instance.clone();
                return Ok(());
            }
        }
        Err(Status::not_found(format!(
            "no instance with id {}",
            instance.id
        )))
    }

    /// Total JSON round-trip for the self-replacement path.
    pub fn serialize(&self) -> Result<serde_json::Value, Status> {
        serde_json::to_value(self)
            .map_err(|e| Status::invariant(format!("database serialization failed: {e}")))
    }

    pub fn load_from_json(value: serde_json::Value) -> Result<Self, Status> {
        serde_json::from_value(value)
            .map_err(|e| Status::invariant(format!("database deserialization failed: {e}")))
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
