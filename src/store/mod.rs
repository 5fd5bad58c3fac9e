// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent key-path record store.
//!
//! Every piece of durable state (identities, groups, file metadata) is a
//! serde record addressed by a slash-separated key such as `users/alice`.
//! The storage engine sits behind [`KvStore`] so the processor can run on
//! disk in production and fully in memory under test.
//!
//! ## Key layout
//!
//! - `users/<nick>` - one [`User`](crate::identity::User) per identity
//! - `groups/<name>` - one [`Group`](crate::group::Group) per group
//! - `files` - a single shared record holding all file metadata

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o failure on record '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record '{key}' could not be encoded or decoded: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid record key '{0}'")]
    InvalidKey(String),
}

impl StoreError {
    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn codec(key: &str, source: serde_json::Error) -> Self {
        StoreError::Codec {
            key: key.to_string(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Raw byte-level record store.
///
/// Keys are `/`-separated segments of `[A-Za-z0-9_.-]`. Implementations must
/// make `put` durable before returning; there is no cross-record atomicity.
pub trait KvStore: Send {
    /// Fetch the encoded record stored under `key`.
    fn get_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store an encoded record under `key`, replacing any previous value.
    fn put_raw(&mut self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Delete `key`. Returns whether a record was removed.
    fn delete(&mut self, key: &str) -> StoreResult<bool>;

    /// All keys starting with `prefix`, sorted.
    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Typed access on top of any [`KvStore`].
pub trait Records: KvStore {
    fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_raw(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::codec(key, e)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&mut self, key: &str, record: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| StoreError::codec(key, e))?;
        self.put_raw(key, &bytes)
    }

    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get_raw(key)?.is_some())
    }
}

impl<S: KvStore + ?Sized> Records for S {}

impl<S: KvStore + ?Sized> KvStore for Box<S> {
    fn get_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get_raw(key)
    }

    fn put_raw(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        (**self).put_raw(key, value)
    }

    fn delete(&mut self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        (**self).list_keys(prefix)
    }
}

/// Reject keys that could escape a store's root when mapped onto a path.
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        });

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
