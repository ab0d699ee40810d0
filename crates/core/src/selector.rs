// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Group/instance selectors.
//!
//! A selector is built from `--group_name`, `--instance_name` and `--home`
//! flags plus the `CUTTLEFISH_INSTANCE` environment variable, and is
//! resolved against the instance database as a set of field queries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::envs;
use crate::instance::InstanceId;
use crate::status::Status;

/// Queryable fields of the instance database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Home,
    GroupName,
    InstanceName,
    InstanceId,
}

/// A single `(field, value)` match condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub field: FieldName,
    pub value: String,
}

impl Query {
    pub fn new(field: FieldName, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// Parsed selector flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorOpts {
    pub group_name: Option<String>,
    pub instance_name: Option<String>,
    pub home: Option<String>,
    /// From `CUTTLEFISH_INSTANCE`, when set and numeric.
    pub instance_id: Option<InstanceId>,
}

impl SelectorOpts {
    /// Parse selector flags out of `args`, returning the remaining
    /// non-selector arguments alongside the parsed options.
    ///
    /// Both `--flag=value` and `--flag value` spellings are accepted.
    pub fn parse(
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<(Self, Vec<String>), Status> {
        let mut opts = SelectorOpts::default();
        let mut rest = Vec::new();

        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            let (name, inline) = match arg.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (arg.as_str(), None),
            };
            let target = match name {
                "--group_name" => Some(&mut opts.group_name),
                "--instance_name" => Some(&mut opts.instance_name),
                "--home" => Some(&mut opts.home),
                _ => None,
            };
            match target {
                Some(slot) => {
                    let value = match inline {
                        Some(v) => v,
                        None => iter
                            .next()
                            .cloned()
                            .ok_or_else(|| Status::precondition(format!("{name} needs a value")))?,
                    };
                    *slot = Some(value);
                }
                None => rest.push(arg.clone()),
            }
        }

        if let Some(raw) = env.get(envs::CUTTLEFISH_INSTANCE) {
            let id = raw.parse::<InstanceId>().map_err(|_| {
                Status::precondition(format!("CUTTLEFISH_INSTANCE is not numeric: \"{raw}\""))
            })?;
            opts.instance_id = Some(id);
        }

        Ok((opts, rest))
    }

    /// Lower the selector into database queries.
    pub fn queries(&self) -> Vec<Query> {
        let mut queries = Vec::new();
        if let Some(home) = &self.home {
            queries.push(Query::new(FieldName::Home, home.clone()));
        }
        if let Some(name) = &self.group_name {
            queries.push(Query::new(FieldName::GroupName, name.clone()));
        }
        if let Some(name) = &self.instance_name {
            queries.push(Query::new(FieldName::InstanceName, name.clone()));
        }
        if let Some(id) = self.instance_id {
            queries.push(Query::new(FieldName::InstanceId, id.to_string()));
        }
        queries
    }

    pub fn is_empty(&self) -> bool {
        self.group_name.is_none()
            && self.instance_name.is_none()
            && self.home.is_none()
            && self.instance_id.is_none()
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
