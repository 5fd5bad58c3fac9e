// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command Processor
//!
//! The single consumer of the command queue and the only code that mutates
//! stores, the workspace, the audit log and sessions. Envelopes are handled
//! strictly in the order they were enqueued, so every command sees all
//! mutations of the commands before it and no other locking is needed.
//!
//! Handlers are grouped by concern:
//! - [`auth`]: login, logout, quit
//! - [`admin`]: identity and group management
//! - [`files`]: sandbox file operations
//! - [`marks`]: clearance marks and audit toggling
//!
//! Every handler returns `CommandResult<Reply>`. A failed command is reported
//! to its session and never stops the loop.

mod admin;
mod auth;
mod files;
mod marks;

use std::collections::HashMap;
use std::io::{self, ErrorKind};

use tokio::sync::mpsc::{self, UnboundedSender};

use crate::access::DenyReason;
use crate::audit::AuditLog;
use crate::command::{render_result, Command, CommandKind, Envelope, Reply};
use crate::error::{CommandError, CommandResult, ObjectKind};
use crate::group::GroupStore;
use crate::identity::IdentityStore;
use crate::metadata::{FileMetadataStore, ADMINS_GROUP, USERS_GROUP};
use crate::security::names::is_valid_name;
use crate::session::{LogoutReason, Outbound, Session, SessionId};
use crate::store::{KvStore, StoreResult};
use crate::utils::redact_command;
use crate::vfs::Workspace;

/// Mark given to new files, groups and identities when none is specified.
pub const DEFAULT_BASELINE_MARK: u32 = 50;

/// Audit retention used by `watch` when none is given.
pub const DEFAULT_AUDIT_RETENTION: u32 = 100;

/// Tunables of the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub baseline_mark: u32,
    pub default_audit_retention: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            baseline_mark: DEFAULT_BASELINE_MARK,
            default_audit_retention: DEFAULT_AUDIT_RETENTION,
        }
    }
}

/// Owns all state and executes commands one at a time.
pub struct Processor<S, W, A> {
    store: S,
    workspace: W,
    audit: A,
    config: ProcessorConfig,
    sessions: HashMap<SessionId, Session>,
}

impl<S: KvStore, W: Workspace, A: AuditLog> Processor<S, W, A> {
    pub fn new(store: S, workspace: W, audit: A, config: ProcessorConfig) -> Self {
        Self {
            store,
            workspace,
            audit,
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Prepare persisted state for serving: ensure the built-in groups exist
    /// and clear `is_active` flags left behind by an unclean exit.
    pub fn bootstrap(&mut self) -> StoreResult<()> {
        let baseline = self.config.baseline_mark;
        for name in [USERS_GROUP, ADMINS_GROUP] {
            if self.groups().ensure(name, baseline)? {
                tracing::info!("GROUP_CREATED | group={} mark={} builtin=true", name, baseline);
            }
        }

        let cleared = self.users().clear_active_flags()?;
        if !cleared.is_empty() {
            tracing::warn!(
                "STALE_SESSIONS_CLEARED | count={} nicks={}",
                cleared.len(),
                cleared.join(",")
            );
        }
        Ok(())
    }

    fn users(&mut self) -> IdentityStore<'_, S> {
        IdentityStore::new(&mut self.store)
    }

    fn groups(&mut self) -> GroupStore<'_, S> {
        GroupStore::new(&mut self.store)
    }

    fn files(&mut self) -> FileMetadataStore<'_, S> {
        FileMetadataStore::new(&mut self.store)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Register a new connection.
    pub fn connect(&mut self, id: SessionId, peer: impl Into<String>, outbound: Option<UnboundedSender<Outbound>>) {
        let session = Session::new(id, peer, outbound);
        tracing::info!("SESSION_OPENED | session={} peer={}", id, session.peer);
        self.sessions.insert(id, session);
    }

    /// Drop a connection, logging its identity out.
    pub fn disconnect(&mut self, id: SessionId, reason: LogoutReason) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        if let Err(e) = self.end_login(&mut session, reason) {
            tracing::error!("LOGOUT_FAILED | session={} reason={} error={}", id, reason, e);
        }
        tracing::info!("SESSION_CLOSED | session={} reason={}", id, reason);
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Clear the login of `session` and its identity's `is_active` flag.
    /// Returns whether anyone was logged in.
    fn end_login(&mut self, session: &mut Session, reason: LogoutReason) -> CommandResult<bool> {
        let Some(nick) = session.sign_out() else {
            return Ok(false);
        };
        self.users().set_active(&nick, false)?;

        if reason == LogoutReason::ConnectionLost {
            tracing::warn!("LOGOUT | session={} nick={} reason={}", session.id, nick, reason);
        } else {
            tracing::info!("LOGOUT | session={} nick={} reason={}", session.id, nick, reason);
        }
        Ok(true)
    }

    // =========================================================================
    // Command execution
    // =========================================================================

    /// Execute one command on behalf of its session.
    pub fn handle(&mut self, cmd: Command) -> CommandResult<Reply> {
        tracing::debug!(
            "COMMAND | session={} line={}",
            cmd.session,
            redact_command(cmd.kind.word(), &cmd.args, cmd.kind.secret_arg())
        );

        let Some(mut session) = self.sessions.remove(&cmd.session) else {
            tracing::warn!("COMMAND_FROM_UNKNOWN_SESSION | session={}", cmd.session);
            return Err(CommandError::invalid("session is not connected"));
        };
        let result = self.execute(&mut session, &cmd);
        self.sessions.insert(session.id, session);
        result
    }

    fn execute(&mut self, session: &mut Session, cmd: &Command) -> CommandResult<Reply> {
        if cmd.kind.requires_login() && !session.is_logged_in() {
            return Err(CommandError::AuthRequired);
        }

        let args = cmd.args.as_slice();
        match cmd.kind {
            CommandKind::Login => self.login(session, args),
            CommandKind::Logout => self.logout(session),
            CommandKind::Quit => self.quit(session),
            CommandKind::Help => help(args),
            CommandKind::Register => self.register(session, args),
            CommandKind::ChangePassword => self.change_password(session, args),
            CommandKind::RemoveUser => self.remove_user(session, args),
            CommandKind::ListUsers => self.list_users(session),
            CommandKind::AddGroup => self.add_group(session, args),
            CommandKind::RemoveGroup => self.remove_group(session, args),
            CommandKind::AddUserToGroup => self.add_user_to_group(session, args),
            CommandKind::RemoveUserFromGroup => self.remove_user_from_group(session, args),
            CommandKind::Pwd => Ok(Reply::info(format!("/{}", session.working_dir))),
            CommandKind::Write => self.write(session, cmd),
            CommandKind::Append => self.append(session, cmd),
            CommandKind::Read => self.read(session, args),
            CommandKind::List => self.list(session, args),
            CommandKind::RecordInfo => self.record_info(session, args),
            CommandKind::ChangeRights => self.change_rights(session, args),
            CommandKind::ChangeMark => self.change_mark(session, args),
            CommandKind::GetMark => self.get_mark(session, args),
            CommandKind::ToggleAudit => self.toggle_audit(session, args),
        }
    }

    /// Execute a command and send the rendered reply to its session.
    fn execute_and_reply(&mut self, cmd: Command) {
        let (id, kind) = (cmd.session, cmd.kind);
        let result = self.handle(cmd);

        match &result {
            Err(CommandError::Persistence(e)) => {
                tracing::error!("COMMAND_FAILED | session={} command={} error={}", id, kind, e);
            }
            Err(e) => tracing::debug!("COMMAND_REFUSED | session={} command={} error={}", id, kind, e),
            Ok(_) => {}
        }

        if let Some(session) = self.sessions.get(&id) {
            session.send(Outbound::Line(render_result(&result)));
            if matches!(result, Ok(Reply::Farewell(_))) {
                session.send(Outbound::Close);
            }
        }
    }

    /// Handle one envelope. Returns false once `Shutdown` is seen.
    pub fn dispatch(&mut self, envelope: Envelope) -> bool {
        match envelope {
            Envelope::Connect { session, peer, outbound } => self.connect(session, peer, Some(outbound)),
            Envelope::Execute(cmd) => self.execute_and_reply(cmd),
            Envelope::Disconnect { session, reason } => self.disconnect(session, reason),
            Envelope::Shutdown => return false,
        }
        true
    }

    /// Log out and close every session.
    pub fn shutdown(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in &ids {
            if let Some(session) = self.sessions.get(id) {
                session.send(Outbound::Line("> Server is shutting down.".to_string()));
                session.send(Outbound::Close);
            }
            self.disconnect(*id, LogoutReason::Shutdown);
        }
        tracing::info!("PROCESSOR_STOPPED | sessions_closed={}", ids.len());
    }

    /// Consume the queue until `Shutdown` arrives or every sender is gone,
    /// then drain what is still queued and shut down. Meant to run on a
    /// blocking thread.
    pub fn run_blocking(mut self, mut rx: mpsc::Receiver<Envelope>) -> Self {
        tracing::info!("PROCESSOR_STARTED");

        while let Some(envelope) = rx.blocking_recv() {
            if !self.dispatch(envelope) {
                break;
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Ok(envelope) = rx.try_recv() {
            drained += 1;
            self.dispatch(envelope);
        }
        if drained > 0 {
            tracing::info!("QUEUE_DRAINED | envelopes={}", drained);
        }

        self.shutdown();
        self
    }
}

// =============================================================================
// Argument helpers
// =============================================================================

/// Argument `index` or a usage error for `kind`.
fn arg(args: &[String], index: usize, kind: CommandKind) -> CommandResult<&str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| CommandError::usage(kind.usage()))
}

fn parse_mark(text: &str) -> CommandResult<u32> {
    text.parse::<u32>()
        .map_err(|_| CommandError::invalid(format!("mark must be a non-negative integer, got '{}'", text)))
}

fn validate_name(name: &str, kind: ObjectKind) -> CommandResult<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(CommandError::invalid(format!(
            "invalid {} name '{}': use 1-32 letters, digits, '_', '.' or '-'",
            kind, name
        )))
    }
}

fn require_admin(session: &Session) -> CommandResult<()> {
    if session.is_admin {
        Ok(())
    } else {
        Err(DenyReason::AdminRequired.into())
    }
}

/// Map a missing workspace entry to `NotFound(kind, key)`.
fn workspace_error(err: io::Error, kind: ObjectKind, key: &str) -> CommandError {
    if err.kind() == ErrorKind::NotFound {
        CommandError::not_found(kind, key)
    } else {
        err.into()
    }
}

fn help(args: &[String]) -> CommandResult<Reply> {
    match args.first() {
        None => {
            let mut text = String::from("Commands:");
            for kind in CommandKind::ALL {
                text.push_str(&format!("\n  {:<34} {}", kind.usage(), kind.summary()));
            }
            Ok(Reply::Info(text))
        }
        Some(word) => match CommandKind::from_word(word) {
            Some(kind) => Ok(Reply::Info(format!(
                "'{}' {}. Usage: {}",
                kind.word(),
                kind.summary(),
                kind.usage()
            ))),
            None => Err(CommandError::invalid(format!("unknown command \"{}\"", word))),
        },
    }
}
