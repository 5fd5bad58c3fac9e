// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! markfs - multi-user virtual filesystem with mark-based access control
//!
//! Sessions connect over a line-oriented TCP protocol, log in as a named
//! identity and read, write, append and list files in a sandboxed tree.
//! Every file operation passes two layers of policy:
//!
//! **Rights + group membership** -> **Clearance marks (read up / write equal / append down)**
//!
//! # Core Modules
//!
//! - [`processor`] - Single-consumer command processor, the only mutator of state
//! - [`access`] - Pure access-control evaluator
//! - [`store`] - Key-path record store (file-per-record or in-memory)
//! - [`identity`], [`group`], [`metadata`] - Typed records over the store
//! - [`vfs`] - Sandbox path resolution and raw file I/O
//! - [`audit`] - Bounded per-identity login audit logs
//! - [`server`] - TCP transport
//! - [`config`] - Server configuration file
//! - [`error`] - Command error taxonomy

pub mod access;
pub mod audit;
pub mod command;
pub mod config;
pub mod error;
pub mod group;
pub mod identity;
pub mod metadata;
pub mod processor;
pub mod security;
pub mod server;
pub mod session;
pub mod store;
pub mod utils;
pub mod vfs;

pub use access::{can_append, can_read, can_write, Decision, DenyReason, Mode, Subject};
pub use audit::{AuditEntry, AuditLog, FileAuditLog, MemoryAuditLog};
pub use command::{parse_line, Command, CommandKind, Envelope, Parsed, Reply};
pub use config::ServerConfig;
pub use error::{CommandError, CommandResult, ObjectKind};
pub use group::Group;
pub use identity::User;
pub use metadata::{FileMetadata, Rights};
pub use processor::{Processor, ProcessorConfig};
pub use server::Server;
pub use session::{LogoutReason, Outbound, Session, SessionId};
pub use store::{FileStore, KvStore, MemoryStore, Records, StoreError};
pub use vfs::{DiskWorkspace, MemoryWorkspace, Workspace};
