// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Login, logout and quit.

use super::{arg, parse_mark, Processor};
use crate::access::DenyReason;
use crate::audit::{self, AuditLog};
use crate::command::{CommandKind, Reply};
use crate::error::{CommandError, CommandResult, ObjectKind};
use crate::identity::User;
use crate::session::{LogoutReason, Session};
use crate::store::KvStore;
use crate::vfs::{self, Workspace};

impl<S: KvStore, W: Workspace, A: AuditLog> Processor<S, W, A> {
    /// `login <nick> <pswd> [mark]`
    ///
    /// An unknown nick changes nothing. A wrong password, or an identity that
    /// is already logged in from another session, counts as a failed attempt
    /// and is audited. On success the effective mark is the requested mark
    /// capped at the stored one.
    pub(super) fn login(&mut self, session: &mut Session, args: &[String]) -> CommandResult<Reply> {
        let nick = arg(args, 0, CommandKind::Login)?;
        let password = arg(args, 1, CommandKind::Login)?;
        let requested = args.get(2).map(|m| parse_mark(m)).transpose()?;

        let Some(mut user) = self.users().get(nick)? else {
            tracing::info!("LOGIN_UNKNOWN_USER | session={} nick={}", session.id, nick);
            return Err(CommandError::not_found(ObjectKind::User, nick));
        };

        let attempt = session.failed_login_attempts + 1;
        let ip = session.peer_ip();

        if user.is_active && session.nick() != Some(nick) {
            return Err(self.reject_login(session, &user, DenyReason::AlreadyActive, "relogin", &ip));
        }
        if !user.verify_password(password) {
            return Err(self.reject_login(session, &user, DenyReason::BadCredentials, "login", &ip));
        }

        self.end_login(session, LogoutReason::Relogin)?;

        let mark = requested.map_or(user.clearance_mark, |m| m.min(user.clearance_mark));
        let groups = self.groups().groups_of(nick)?;
        user.is_active = true;
        self.users().put(&user)?;
        self.workspace.create_dir_all(&vfs::home_dir(nick))?;

        session.sign_in(&user, mark, groups);
        audit::record(
            &mut self.audit,
            &user,
            &format!("Success login from '{}'. Attempt #{}", ip, attempt),
        );
        tracing::info!(
            "LOGIN | session={} nick={} mark={} admin={}",
            session.id,
            nick,
            mark,
            user.is_admin
        );

        Ok(Reply::info("You have successfully logged in."))
    }

    /// Count, audit and log a refused login.
    fn reject_login(
        &mut self,
        session: &mut Session,
        user: &User,
        reason: DenyReason,
        what: &str,
        ip: &str,
    ) -> CommandError {
        session.failed_login_attempts += 1;
        let attempt = session.failed_login_attempts;

        audit::record(
            &mut self.audit,
            user,
            &format!("Failed {} from '{}'. Attempt #{}", what, ip, attempt),
        );
        tracing::warn!(
            "LOGIN_FAILED | session={} nick={} reason={} attempts={}",
            session.id,
            user.nick,
            reason,
            attempt
        );

        reason.into()
    }

    /// `logout`
    pub(super) fn logout(&mut self, session: &mut Session) -> CommandResult<Reply> {
        if self.end_login(session, LogoutReason::Explicit)? {
            Ok(Reply::info("You have successfully logged out."))
        } else {
            Ok(Reply::info("You are not logged in. Proceeding nothing."))
        }
    }

    /// `quit`: log out and close the connection.
    pub(super) fn quit(&mut self, session: &mut Session) -> CommandResult<Reply> {
        self.end_login(session, LogoutReason::Quit)?;
        Ok(Reply::Farewell("Bye.".to_string()))
    }
}
