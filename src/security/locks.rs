// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers for the shared in-memory backends.
//!
//! The in-memory store, workspace and audit log hand out clones that share
//! one map. A test thread that panics while holding the lock must not turn
//! every later access into a second panic, so poisoned guards are recovered
//! and the event is logged.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read guard, recovering it if the lock was poisoned.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "security::locks",
            event = "LOCK_POISONED_READ",
            "in-memory backend lock was poisoned; continuing with recovered data"
        );
        poisoned.into_inner()
    })
}

/// Acquire a write guard, recovering it if the lock was poisoned.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "security::locks",
            event = "LOCK_POISONED_WRITE",
            "in-memory backend lock was poisoned; continuing with recovered data"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_write_then_read() {
        let lock = RwLock::new(BTreeMap::new());
        resilient_write(&lock).insert("users/alice", 1);
        assert_eq!(resilient_read(&lock).get("users/alice"), Some(&1));
    }

    #[test]
    fn test_recovers_after_poisoning() {
        let lock = Arc::new(RwLock::new(vec![1u8]));
        let poisoner = Arc::clone(&lock);

        let handle = thread::spawn(move || {
            let mut guard = poisoner.write().unwrap();
            guard.push(2);
            panic!("poison the lock");
        });
        let _ = handle.join();
        assert!(lock.is_poisoned());

        resilient_write(&lock).push(3);
        assert_eq!(*resilient_read(&lock), vec![1, 2, 3]);
    }
}
