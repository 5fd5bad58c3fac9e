// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory record store.
//!
//! Clones share the same map, so a test can keep a handle and inspect what the
//! processor persisted after moving the store into it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::{validate_key, KvStore, StoreResult};
use crate::security::locks::{resilient_read, resilient_write};

/// Shared in-memory [`KvStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        resilient_read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn get_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(resilient_read(&self.records).get(key).cloned())
    }

    fn put_raw(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        resilient_write(&self.records).insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        Ok(resilient_write(&self.records).remove(key).is_some())
    }

    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(resilient_read(&self.records)
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
