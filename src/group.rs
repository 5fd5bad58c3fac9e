// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Group records and membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::security::is_valid_name;
use crate::store::{KvStore, Records, StoreResult};

const GROUP_PREFIX: &str = "groups/";

fn group_key(name: &str) -> String {
    format!("{}{}", GROUP_PREFIX, name)
}

/// A named group with its own clearance mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub clearance_mark: u32,
    /// Member nicks in insertion order, without duplicates.
    #[serde(default)]
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: impl Into<String>, clearance_mark: u32) -> Self {
        Self {
            name: name.into(),
            clearance_mark,
            members: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_member(&self, nick: &str) -> bool {
        self.members.iter().any(|m| m == nick)
    }

    /// Add `nick`. Returns false if it was already a member.
    pub fn add_member(&mut self, nick: &str) -> bool {
        if self.has_member(nick) {
            return false;
        }
        self.members.push(nick.to_string());
        true
    }

    /// Remove `nick`. Returns false if it was not a member.
    pub fn remove_member(&mut self, nick: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != nick);
        self.members.len() != before
    }
}

/// Typed view over `groups/<name>` records.
pub struct GroupStore<'a, S: KvStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: KvStore + ?Sized> GroupStore<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// A name that is not a valid name has no record and reads as absent.
    pub fn get(&self, name: &str) -> StoreResult<Option<Group>> {
        if !is_valid_name(name) {
            return Ok(None);
        }
        self.store.get(&group_key(name))
    }

    pub fn exists(&self, name: &str) -> StoreResult<bool> {
        if !is_valid_name(name) {
            return Ok(false);
        }
        self.store.contains(&group_key(name))
    }

    pub fn put(&mut self, group: &Group) -> StoreResult<()> {
        self.store.put(&group_key(&group.name), group)
    }

    pub fn delete(&mut self, name: &str) -> StoreResult<bool> {
        if !is_valid_name(name) {
            return Ok(false);
        }
        self.store.delete(&group_key(name))
    }

    pub fn names(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .list_keys(GROUP_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(GROUP_PREFIX).map(str::to_string))
            .collect())
    }

    /// Names of every group `nick` belongs to, in key order.
    pub fn groups_of(&self, nick: &str) -> StoreResult<Vec<String>> {
        let mut groups = Vec::new();
        for name in self.names()? {
            if let Some(group) = self.get(&name)? {
                if group.has_member(nick) {
                    groups.push(group.name);
                }
            }
        }
        Ok(groups)
    }

    /// Remove `nick` from every group. Returns the groups that changed.
    pub fn purge_member(&mut self, nick: &str) -> StoreResult<Vec<String>> {
        let mut changed = Vec::new();
        for name in self.names()? {
            if let Some(mut group) = self.get(&name)? {
                if group.remove_member(nick) {
                    self.put(&group)?;
                    changed.push(name);
                }
            }
        }
        Ok(changed)
    }

    /// Create `name` with `mark` unless it already exists. Returns whether it was created.
    pub fn ensure(&mut self, name: &str, mark: u32) -> StoreResult<bool> {
        if self.exists(name)? {
            return Ok(false);
        }
        self.put(&Group::new(name, mark))?;
        Ok(true)
    }
}
