// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Salted password digests.
//!
//! Passwords are stored as `hex(sha256(salt || password))` next to a random
//! 16-byte salt. Verification compares digests in constant time.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;

/// Stored password credential. Never holds the cleartext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    /// Hex-encoded salt.
    pub salt: String,
    /// Hex-encoded SHA-256 digest of salt followed by the password.
    pub digest: String,
}

impl PasswordHash {
    /// Derive a credential with a fresh random salt.
    pub fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self::with_salt(password, &salt)
    }

    fn with_salt(password: &str, salt: &[u8]) -> Self {
        Self {
            salt: hex::encode(salt),
            digest: hex::encode(digest(salt, password)),
        }
    }

    /// Check `password` against this credential in constant time.
    pub fn verify(&self, password: &str) -> bool {
        let (Ok(salt), Ok(expected)) = (hex::decode(&self.salt), hex::decode(&self.digest)) else {
            tracing::warn!("PASSWORD_RECORD_CORRUPT | stored salt or digest is not valid hex");
            return false;
        };
        let actual = digest(&salt, password);
        actual.as_slice().ct_eq(expected.as_slice()).into()
    }
}

fn digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_accepts_correct_password() {
        let hash = PasswordHash::new("secret");
        assert!(hash.verify("secret"));
        assert!(!hash.verify("Secret"));
        assert!(!hash.verify(""));
    }

    #[test]
    fn test_cleartext_is_not_stored() {
        let hash = PasswordHash::new("secret");
        assert!(!hash.digest.contains("secret"));
        assert_eq!(hash.digest.len(), 64);
        assert_eq!(hash.salt.len(), SALT_LEN * 2);
    }

    #[test]
    fn test_salts_differ_between_credentials() {
        let first = PasswordHash::new("secret");
        let second = PasswordHash::new("secret");
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.digest, second.digest);
    }

    #[test]
    fn test_fixed_salt_is_deterministic() {
        let a = PasswordHash::with_salt("pw", &[7u8; SALT_LEN]);
        let b = PasswordHash::with_salt("pw", &[7u8; SALT_LEN]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_corrupt_record_never_verifies() {
        let hash = PasswordHash {
            salt: "zz".to_string(),
            digest: "not-hex".to_string(),
        };
        assert!(!hash.verify("anything"));
    }
}
