// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command error taxonomy.
//!
//! Every handler returns `Result<Reply, CommandError>`. All variants except
//! [`CommandError::Persistence`] are expected outcomes that go back to the
//! issuing session verbatim. Persistence failures are logged in full and the
//! session only sees a generic message.

use std::fmt;

use thiserror::Error;

use crate::access::DenyReason;
use crate::store::StoreError;

/// Kind of object a `NotFound`/`AlreadyExists` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    User,
    Group,
    File,
    Directory,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::User => "user",
            ObjectKind::Group => "group",
            ObjectKind::File => "file",
            ObjectKind::Directory => "directory",
        };
        f.write_str(name)
    }
}

/// A command that could not be carried out.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("you must log in first")]
    AuthRequired,

    #[error("permission denied: {0}")]
    PermissionDenied(DenyReason),

    #[error("{kind} '{key}' does not exist")]
    NotFound { kind: ObjectKind, key: String },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: ObjectKind, key: String },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("cannot go higher than the root directory")]
    PathEscapesSandbox,

    #[error("storage failure: {0}")]
    Persistence(#[from] StoreError),
}

impl CommandError {
    pub fn not_found(kind: ObjectKind, key: impl Into<String>) -> Self {
        CommandError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn already_exists(kind: ObjectKind, key: impl Into<String>) -> Self {
        CommandError::AlreadyExists {
            kind,
            key: key.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CommandError::InvalidArgument(message.into())
    }

    /// Usage error carrying an example invocation.
    pub fn usage(example: &str) -> Self {
        CommandError::InvalidArgument(format!("wrong usage. Example: \"{}\"", example))
    }

    /// Text sent to the session. Storage details stay in the server log.
    pub fn user_message(&self) -> String {
        match self {
            CommandError::Persistence(_) => {
                "the request could not be completed due to a storage failure".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<DenyReason> for CommandError {
    fn from(reason: DenyReason) -> Self {
        CommandError::PermissionDenied(reason)
    }
}

/// Workspace I/O failures surface as persistence failures.
impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::Persistence(StoreError::io("workspace", err))
    }
}

/// Result alias for command handlers.
pub type CommandResult<T> = Result<T, CommandError>;
