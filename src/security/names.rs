// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identity and group name validation.
//!
//! Names become record keys and home directory names, so they are limited to
//! a conservative character set.

use regex::Regex;
use std::sync::LazyLock;

/// Longest accepted nick or group name.
pub const MAX_NAME_LEN: usize = 32;

/// JUSTIFICATION for .expect(): static pattern, validated by the tests below.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,32}$").expect("name regex is valid"));

/// Whether `name` is usable as a nick or group name.
pub fn is_valid_name(name: &str) -> bool {
    name != "." && name != ".." && NAME_PATTERN.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_names() {
        assert!(is_valid_name("alice"));
        assert!(is_valid_name("group_7"));
        assert!(is_valid_name("a.b-c"));
        assert!(is_valid_name(&"x".repeat(MAX_NAME_LEN)));
    }

    #[test]
    fn test_rejects_unsafe_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("."));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("al ice"));
        assert!(!is_valid_name(&"x".repeat(MAX_NAME_LEN + 1)));
    }
}
