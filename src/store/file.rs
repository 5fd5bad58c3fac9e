// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File-per-record store.
//!
//! Each key maps to `<root>/<key>.json`. Writes go to a temp file that is
//! synced and then renamed over the target, so a crash never leaves a
//! half-written record. The store holds an exclusive `fs2` lock on
//! `<root>/markfs.lock` for its whole lifetime: a single process owns the
//! data directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::{validate_key, KvStore, StoreError, StoreResult};

const RECORD_EXTENSION: &str = "json";
const LOCK_FILE_NAME: &str = "markfs.lock";

/// Durable [`KvStore`] rooted at a directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Held for the lifetime of the store; released on drop.
    _lock: File,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Fails if another process already holds the directory lock.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(LOCK_FILE_NAME, e))?;

        let lock_path = root.join(LOCK_FILE_NAME);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(LOCK_FILE_NAME, e))?;

        lock.try_lock_exclusive().map_err(|e| {
            StoreError::io(
                LOCK_FILE_NAME,
                std::io::Error::new(
                    e.kind(),
                    format!("data directory {:?} is locked by another process: {}", root, e),
                ),
            )
        })?;

        tracing::debug!("STORE_OPENED | root={:?}", root);
        Ok(Self { root, _lock: lock })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, RECORD_EXTENSION))
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_keys(&path, keys)?;
                continue;
            }
            if path.extension().map(|e| e == RECORD_EXTENSION).unwrap_or(false) {
                if let Ok(relative) = path.with_extension("").strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn put_raw(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        let path = self.record_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(key, e))?;
        }

        let temp_path = path.with_extension("tmp");
        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| StoreError::io(key, e))?;
            temp_file.write_all(value).map_err(|e| StoreError::io(key, e))?;
            temp_file.sync_all().map_err(|e| StoreError::io(key, e))?;
        }

        fs::rename(&temp_path, &path).map_err(|e| StoreError::io(key, e))
    }

    fn delete(&mut self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)
            .map_err(|e| StoreError::io(prefix, e))?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}
