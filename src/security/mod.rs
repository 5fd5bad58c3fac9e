// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Security primitives shared by the stores and the processor.
//!
//! - [`password`]: salted SHA-256 credentials with constant-time verification
//! - [`locks`]: poison-tolerant guards for the shared in-memory backends
//! - [`names`]: validation of identity and group names

pub mod locks;
pub mod names;
pub mod password;

pub use locks::{resilient_read, resilient_write};
pub use names::{is_valid_name, MAX_NAME_LEN};
pub use password::PasswordHash;
