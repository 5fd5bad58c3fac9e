// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identity records.
//!
//! One `users/<nick>` record per identity. The record carries the salted
//! password digest, role flags, the stored clearance ceiling, the
//! single-session `is_active` flag and the audit settings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::security::{is_valid_name, PasswordHash};
use crate::store::{KvStore, Records, StoreResult};

const USER_PREFIX: &str = "users/";

fn user_key(nick: &str) -> String {
    format!("{}{}", USER_PREFIX, nick)
}

/// Persistent identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub nick: String,
    pub password: PasswordHash,
    #[serde(default)]
    pub is_admin: bool,
    /// May toggle audit logging for other identities.
    #[serde(default)]
    pub is_audit_role: bool,
    /// Highest mark a session of this identity may hold.
    pub clearance_mark: u32,
    /// Set while a session is logged in as this identity.
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub audit_enabled: bool,
    #[serde(default)]
    pub audit_retention: u32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(nick: impl Into<String>, password: &str, clearance_mark: u32) -> Self {
        Self {
            nick: nick.into(),
            password: PasswordHash::new(password),
            is_admin: false,
            is_audit_role: false,
            clearance_mark,
            is_active: false,
            audit_enabled: false,
            audit_retention: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_audit_role(mut self, is_audit_role: bool) -> Self {
        self.is_audit_role = is_audit_role;
        self
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.password.verify(password)
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = PasswordHash::new(password);
    }
}

/// One-line summary for `lsusers`. The password digest is never shown.
impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut roles = Vec::new();
        if self.is_admin {
            roles.push("admin");
        }
        if self.is_audit_role {
            roles.push("audit");
        }
        let roles = if roles.is_empty() {
            "user".to_string()
        } else {
            roles.join("+")
        };

        write!(f, "{} [{}] mark={}", self.nick, roles, self.clearance_mark)?;
        if self.is_active {
            write!(f, " active")?;
        }
        if self.audit_enabled {
            write!(f, " audited(keep={})", self.audit_retention)?;
        }
        Ok(())
    }
}

/// Typed view over `users/<nick>` records.
pub struct IdentityStore<'a, S: KvStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: KvStore + ?Sized> IdentityStore<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// A nick that is not a valid name has no record and reads as absent.
    pub fn get(&self, nick: &str) -> StoreResult<Option<User>> {
        if !is_valid_name(nick) {
            return Ok(None);
        }
        self.store.get(&user_key(nick))
    }

    pub fn exists(&self, nick: &str) -> StoreResult<bool> {
        if !is_valid_name(nick) {
            return Ok(false);
        }
        self.store.contains(&user_key(nick))
    }

    pub fn put(&mut self, user: &User) -> StoreResult<()> {
        self.store.put(&user_key(&user.nick), user)
    }

    pub fn delete(&mut self, nick: &str) -> StoreResult<bool> {
        if !is_valid_name(nick) {
            return Ok(false);
        }
        self.store.delete(&user_key(nick))
    }

    pub fn nicks(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .list_keys(USER_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(USER_PREFIX).map(str::to_string))
            .collect())
    }

    pub fn all(&self) -> StoreResult<Vec<User>> {
        let mut users = Vec::new();
        for nick in self.nicks()? {
            if let Some(user) = self.get(&nick)? {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Set `is_active` for `nick`. Returns false if the identity is gone.
    pub fn set_active(&mut self, nick: &str, active: bool) -> StoreResult<bool> {
        match self.get(nick)? {
            Some(mut user) => {
                user.is_active = active;
                self.put(&user)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Clear every `is_active` flag. Used at startup after an unclean exit.
    pub fn clear_active_flags(&mut self) -> StoreResult<Vec<String>> {
        let mut cleared = Vec::new();
        for mut user in self.all()? {
            if user.is_active {
                user.is_active = false;
                self.put(&user)?;
                cleared.push(user.nick);
            }
        }
        Ok(cleared)
    }
}
