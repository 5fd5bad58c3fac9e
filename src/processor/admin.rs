// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identity and group administration. Every handler here is admin-only.

use super::{arg, parse_mark, require_admin, validate_name, Processor};
use crate::access::DenyReason;
use crate::audit::AuditLog;
use crate::command::{CommandKind, Reply};
use crate::error::{CommandError, CommandResult, ObjectKind};
use crate::group::Group;
use crate::identity::User;
use crate::metadata::{ADMINS_GROUP, USERS_GROUP};
use crate::session::Session;
use crate::store::KvStore;
use crate::vfs::{self, Workspace};

impl<S: KvStore, W: Workspace, A: AuditLog> Processor<S, W, A> {
    /// `reg <nick> <pswd> [mark] [admin] [audit]`
    pub(super) fn register(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        require_admin(session)?;
        let nick = arg(args, 0, CommandKind::Register)?;
        let password = arg(args, 1, CommandKind::Register)?;
        validate_name(nick, ObjectKind::User)?;

        let mut mark = None;
        let mut is_admin = false;
        let mut is_audit_role = false;
        for option in &args[2..] {
            match option.as_str() {
                "admin" => is_admin = true,
                "audit" => is_audit_role = true,
                text if mark.is_none() => mark = Some(parse_mark(text)?),
                _ => return Err(CommandError::usage(CommandKind::Register.usage())),
            }
        }

        if self.users().exists(nick)? {
            return Err(CommandError::already_exists(ObjectKind::User, nick));
        }

        let user = User::new(nick, password, mark.unwrap_or(self.config.baseline_mark))
            .with_admin(is_admin)
            .with_audit_role(is_audit_role);
        self.users().put(&user)?;
        self.workspace.create_dir_all(&vfs::home_dir(nick))?;

        tracing::info!(
            "USER_REGISTERED | by={} nick={} mark={} admin={} audit={}",
            session.nick().unwrap_or_default(),
            nick,
            user.clearance_mark,
            is_admin,
            is_audit_role
        );
        Ok(Reply::info(format!("You have successfully registered '{}'.", nick)))
    }

    /// `chpswd <nick> <pswd>`
    pub(super) fn change_password(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        require_admin(session)?;
        let nick = arg(args, 0, CommandKind::ChangePassword)?;
        let password = arg(args, 1, CommandKind::ChangePassword)?;

        let mut user = self
            .users()
            .get(nick)?
            .ok_or_else(|| CommandError::not_found(ObjectKind::User, nick))?;

        if user.verify_password(password) {
            return Ok(Reply::info(
                "Current password and new password are the same. Proceeding nothing.",
            ));
        }

        user.set_password(password);
        self.users().put(&user)?;
        tracing::info!("PASSWORD_CHANGED | by={} nick={}", session.nick().unwrap_or_default(), nick);
        Ok(Reply::info(format!("You have successfully changed password for '{}'.", nick)))
    }

    /// `rmuser <nick>`: delete an identity together with its file metadata,
    /// its directory tree and its group memberships. Audit logs are kept.
    pub(super) fn remove_user(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        require_admin(session)?;
        let nick = arg(args, 0, CommandKind::RemoveUser)?;

        let user = self
            .users()
            .get(nick)?
            .ok_or_else(|| CommandError::not_found(ObjectKind::User, nick))?;
        if user.is_active {
            return Err(DenyReason::TargetActive(nick.to_string()).into());
        }

        let files = self.files().remove_owned_by(nick)?;
        let groups = self.groups().purge_member(nick)?;
        self.workspace.remove_dir_all(&vfs::user_dir(nick))?;
        self.users().delete(nick)?;

        tracing::info!(
            "USER_REMOVED | by={} nick={} files={} groups={}",
            session.nick().unwrap_or_default(),
            nick,
            files.len(),
            groups.len()
        );
        Ok(Reply::info(format!("You have successfully removed '{}'.", nick)))
    }

    /// `lsusers`
    pub(super) fn list_users(&mut self, session: &Session) -> CommandResult<Reply> {
        require_admin(session)?;
        let users = self.users().all()?;

        let mut text = format!("Users ({}):", users.len());
        for user in &users {
            text.push_str(&format!("\n  {}", user));
        }
        Ok(Reply::Info(text))
    }

    /// `addgroup <group> [mark]`
    pub(super) fn add_group(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        require_admin(session)?;
        let name = arg(args, 0, CommandKind::AddGroup)?;
        validate_name(name, ObjectKind::Group)?;
        let mark = match args.get(1) {
            Some(text) => parse_mark(text)?,
            None => self.config.baseline_mark,
        };

        if self.groups().exists(name)? {
            return Err(CommandError::already_exists(ObjectKind::Group, name));
        }
        self.groups().put(&Group::new(name, mark))?;

        tracing::info!("GROUP_CREATED | group={} mark={} builtin=false", name, mark);
        Ok(Reply::info(format!("You have successfully created group '{}'.", name)))
    }

    /// `rmgroup <group>`. The built-in groups stay.
    pub(super) fn remove_group(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        require_admin(session)?;
        let name = arg(args, 0, CommandKind::RemoveGroup)?;

        if name == USERS_GROUP || name == ADMINS_GROUP {
            return Err(CommandError::invalid(format!(
                "group '{}' is built in and cannot be removed",
                name
            )));
        }
        if !self.groups().delete(name)? {
            return Err(CommandError::not_found(ObjectKind::Group, name));
        }

        tracing::info!("GROUP_REMOVED | group={}", name);
        Ok(Reply::info(format!("You have successfully removed the group '{}'.", name)))
    }

    /// Load a group and check the identity exists, for `u2g`/`trimgroup`.
    fn group_and_member(&mut self, kind: CommandKind, args: &[String]) -> CommandResult<(Group, String)> {
        let name = arg(args, 0, kind)?;
        let nick = arg(args, 1, kind)?;

        let group = self
            .groups()
            .get(name)?
            .ok_or_else(|| CommandError::not_found(ObjectKind::Group, name))?;
        if !self.users().exists(nick)? {
            return Err(CommandError::not_found(ObjectKind::User, nick));
        }
        Ok((group, nick.to_string()))
    }

    /// `u2g <group> <nick>`
    pub(super) fn add_user_to_group(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        require_admin(session)?;
        let (mut group, nick) = self.group_and_member(CommandKind::AddUserToGroup, args)?;

        if !group.add_member(&nick) {
            return Ok(Reply::info(format!(
                "User '{}' is already in '{}'. Proceeding nothing.",
                nick, group.name
            )));
        }
        self.groups().put(&group)?;

        tracing::info!("GROUP_MEMBER_ADDED | group={} nick={}", group.name, nick);
        Ok(Reply::info(format!(
            "You have successfully added '{}' to group '{}'.",
            nick, group.name
        )))
    }

    /// `trimgroup <group> <nick>`
    pub(super) fn remove_user_from_group(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        require_admin(session)?;
        let (mut group, nick) = self.group_and_member(CommandKind::RemoveUserFromGroup, args)?;

        if !group.remove_member(&nick) {
            return Ok(Reply::info(format!(
                "There is no '{}' in group '{}'. Proceeding nothing.",
                nick, group.name
            )));
        }
        self.groups().put(&group)?;

        tracing::info!("GROUP_MEMBER_REMOVED | group={} nick={}", group.name, nick);
        Ok(Reply::info(format!(
            "You have successfully removed '{}' from group '{}'.",
            nick, group.name
        )))
    }
}
