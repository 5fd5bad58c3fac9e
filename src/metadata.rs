// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File metadata records and their store.
//!
//! All metadata lives in the single shared `files` record, keyed by the
//! canonical sandbox path (`users/alice/home/notes.txt`).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{KvStore, Records, StoreResult};

const FILES_KEY: &str = "files";

/// Group assigned to files first written by an admin.
pub const ADMINS_GROUP: &str = "admins";

/// Group assigned to files first written by anyone else.
pub const USERS_GROUP: &str = "users";

/// 4-bit rights mask, MSB to LSB: owner read, owner write, group read, group write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rights(u8);

impl Rights {
    pub const OWNER_READ: u8 = 0b1000;
    pub const OWNER_WRITE: u8 = 0b0100;
    pub const GROUP_READ: u8 = 0b0010;
    pub const GROUP_WRITE: u8 = 0b0001;

    /// Bits that grant reading.
    pub const READ_MASK: u8 = Self::OWNER_READ | Self::GROUP_READ;
    /// Bits that grant writing or appending.
    pub const WRITE_MASK: u8 = Self::OWNER_WRITE | Self::GROUP_WRITE;

    /// `rw r_`: owner read and write, group read.
    pub const DEFAULT: Rights = Rights(0b1110);

    /// Build a mask, ignoring bits above the low nibble.
    pub const fn from_bits(bits: u8) -> Self {
        Rights(bits & 0b1111)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn allows_read(self) -> bool {
        self.0 & Self::READ_MASK != 0
    }

    pub const fn allows_write(self) -> bool {
        self.0 & Self::WRITE_MASK != 0
    }

    /// Parse the `chmod` notation: exactly four `0`/`1` characters.
    pub fn parse(text: &str) -> Option<Self> {
        if text.len() != 4 || !text.chars().all(|c| c == '0' || c == '1') {
            return None;
        }
        u8::from_str_radix(text, 2).ok().map(Rights)
    }
}

impl Default for Rights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |bit: u8, c: char| if self.0 & bit != 0 { c } else { '_' };
        write!(
            f,
            "{}{}{}{}",
            flag(Self::OWNER_READ, 'r'),
            flag(Self::OWNER_WRITE, 'w'),
            flag(Self::GROUP_READ, 'r'),
            flag(Self::GROUP_WRITE, 'w'),
        )
    }
}

/// Access-control metadata for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Canonical sandbox path.
    pub path: String,
    pub owner: String,
    pub group: String,
    pub rights: Rights,
    pub clearance_mark: u32,
    /// Content length after the last write or append.
    #[serde(default)]
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl FileMetadata {
    /// Metadata established by the first write to `path`.
    pub fn new(path: impl Into<String>, owner: &str, owner_is_admin: bool, baseline_mark: u32) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            owner: owner.to_string(),
            group: if owner_is_admin { ADMINS_GROUP } else { USERS_GROUP }.to_string(),
            rights: Rights::DEFAULT,
            clearance_mark: baseline_mark,
            size: 0,
            created_at: now,
            modified_at: now,
        }
    }

    /// Record a completed write or append.
    pub fn touch(&mut self, size: u64) {
        self.size = size;
        self.modified_at = Utc::now();
    }

    /// Multi-line description used by the `rr` command.
    pub fn describe(&self) -> String {
        format!(
            "path: {}\nowner: {}\ngroup: {}\nrights: {} ({:04b})\nmark: {}\nsize: {} bytes\ncreated: {}\nmodified: {}",
            self.path,
            self.owner,
            self.group,
            self.rights,
            self.rights.bits(),
            self.clearance_mark,
            self.size,
            self.created_at.to_rfc3339(),
            self.modified_at.to_rfc3339(),
        )
    }
}

/// Typed view over the shared `files` record.
pub struct FileMetadataStore<'a, S: KvStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: KvStore + ?Sized> FileMetadataStore<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    fn load(&self) -> StoreResult<BTreeMap<String, FileMetadata>> {
        Ok(self.store.get(FILES_KEY)?.unwrap_or_default())
    }

    fn save(&mut self, files: &BTreeMap<String, FileMetadata>) -> StoreResult<()> {
        self.store.put(FILES_KEY, files)
    }

    pub fn get(&self, path: &str) -> StoreResult<Option<FileMetadata>> {
        Ok(self.load()?.remove(path))
    }

    /// Insert or replace the metadata for `meta.path`.
    pub fn upsert(&mut self, meta: FileMetadata) -> StoreResult<()> {
        let mut files = self.load()?;
        files.insert(meta.path.clone(), meta);
        self.save(&files)
    }

    /// Drop every record owned by `owner`. Returns the removed paths.
    pub fn remove_owned_by(&mut self, owner: &str) -> StoreResult<Vec<String>> {
        let mut files = self.load()?;
        let removed: Vec<String> = files
            .values()
            .filter(|meta| meta.owner == owner)
            .map(|meta| meta.path.clone())
            .collect();

        if !removed.is_empty() {
            files.retain(|_, meta| meta.owner != owner);
            self.save(&files)?;
        }
        Ok(removed)
    }

    pub fn all(&self) -> StoreResult<Vec<FileMetadata>> {
        Ok(self.load()?.into_values().collect())
    }
}
