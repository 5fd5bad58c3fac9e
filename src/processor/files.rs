// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sandbox file operations.
//!
//! Every operation resolves its path from the session's working directory
//! and refreshes the session's group list before the access check, so
//! membership changes made by an admin apply to the very next command.

use super::{arg, workspace_error, Processor};
use crate::access::{self, DenyReason, Mode};
use crate::audit::AuditLog;
use crate::command::{Command, CommandKind, Reply};
use crate::error::{CommandError, CommandResult, ObjectKind};
use crate::metadata::{FileMetadata, Rights};
use crate::session::Session;
use crate::store::KvStore;
use crate::vfs::{self, Workspace};

impl<S: KvStore, W: Workspace, A: AuditLog> Processor<S, W, A> {
    fn refresh_groups(&mut self, session: &mut Session) -> CommandResult<()> {
        if let Some(nick) = session.identity.clone() {
            session.groups = self.groups().groups_of(&nick)?;
        }
        Ok(())
    }

    /// Run the evaluator for `mode` against `meta` and its group.
    fn authorize(&mut self, mode: Mode, session: &Session, meta: &FileMetadata) -> CommandResult<()> {
        let group = self
            .groups()
            .get(&meta.group)?
            .ok_or_else(|| CommandError::not_found(ObjectKind::Group, &meta.group))?;
        let subject = session.subject().ok_or(CommandError::AuthRequired)?;

        access::evaluate(mode, &subject, meta, &group)
            .into_result()
            .map_err(|reason| {
                tracing::info!(
                    "ACCESS_DENIED | session={} nick={} mode={:?} path={} reason={:?}",
                    session.id,
                    subject.nick,
                    mode,
                    meta.path,
                    reason
                );
                CommandError::from(reason)
            })
    }

    fn existing_metadata(&mut self, path: &str) -> CommandResult<FileMetadata> {
        self.files()
            .get(path)?
            .ok_or_else(|| CommandError::not_found(ObjectKind::File, path))
    }

    /// `write <file> <text>`: the first write to a path creates its
    /// metadata; later writes need write access.
    pub(super) fn write(&mut self, session: &mut Session, cmd: &Command) -> CommandResult<Reply> {
        let target = arg(&cmd.args, 0, CommandKind::Write)?;
        arg(&cmd.args, 1, CommandKind::Write)?;
        let text = cmd.text_from(1);

        let path = vfs::resolve_file(&session.working_dir, target)?;
        self.refresh_groups(session)?;

        let existing = self.files().get(&path)?;
        let mut meta = match existing {
            Some(meta) => {
                self.authorize(Mode::Write, session, &meta)?;
                meta
            }
            None => {
                let nick = session.nick().ok_or(CommandError::AuthRequired)?;
                FileMetadata::new(&path, nick, session.is_admin, self.config.baseline_mark)
            }
        };

        let size = self
            .workspace
            .write(&path, text.as_bytes())
            .map_err(|e| workspace_error(e, ObjectKind::Directory, vfs::parent(&path)))?;
        meta.touch(size);
        self.files().upsert(meta)?;

        tracing::debug!("FILE_WRITTEN | session={} path={} size={}", session.id, path, size);
        Ok(Reply::info(format!("You have successfully written text to '{}'.", target)))
    }

    /// `append <file> <text>`
    pub(super) fn append(&mut self, session: &mut Session, cmd: &Command) -> CommandResult<Reply> {
        let target = arg(&cmd.args, 0, CommandKind::Append)?;
        arg(&cmd.args, 1, CommandKind::Append)?;
        let text = cmd.text_from(1);

        let path = vfs::resolve_file(&session.working_dir, target)?;
        self.refresh_groups(session)?;

        let mut meta = self.existing_metadata(&path)?;
        self.authorize(Mode::Append, session, &meta)?;

        let size = self
            .workspace
            .append(&path, text.as_bytes())
            .map_err(|e| workspace_error(e, ObjectKind::File, &path))?;
        meta.touch(size);
        self.files().upsert(meta)?;

        tracing::debug!("FILE_APPENDED | session={} path={} size={}", session.id, path, size);
        Ok(Reply::info(format!("You have successfully appended text to '{}'.", target)))
    }

    /// `read <file>`
    pub(super) fn read(&mut self, session: &mut Session, args: &[String]) -> CommandResult<Reply> {
        let target = arg(args, 0, CommandKind::Read)?;
        let path = vfs::resolve_file(&session.working_dir, target)?;
        self.refresh_groups(session)?;

        let meta = self.existing_metadata(&path)?;
        self.authorize(Mode::Read, session, &meta)?;

        let content = self
            .workspace
            .read(&path)
            .map_err(|e| workspace_error(e, ObjectKind::File, &path))?;
        Ok(Reply::Info(format!(
            "Text from file '{}':\n{}",
            target,
            String::from_utf8_lossy(&content)
        )))
    }

    /// `ls [dir]`, defaulting to the working directory.
    pub(super) fn list(&mut self, session: &mut Session, args: &[String]) -> CommandResult<Reply> {
        let target = args.first().map(String::as_str).unwrap_or(".");
        let dir = vfs::resolve(&session.working_dir, target)?;

        let entries = self
            .workspace
            .list(&dir)
            .map_err(|e| workspace_error(e, ObjectKind::Directory, &dir))?;
        Ok(Reply::Info(format!(
            "Files from directory '{}':\n{}",
            target,
            entries.join(" ")
        )))
    }

    /// `rr <file>`
    pub(super) fn record_info(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        let target = arg(args, 0, CommandKind::RecordInfo)?;
        let path = vfs::resolve_file(&session.working_dir, target)?;
        let meta = self.existing_metadata(&path)?;
        Ok(Reply::Info(format!("File info of '{}':\n{}", target, meta.describe())))
    }

    /// `chmod <file> <rwrw>`: owner only.
    pub(super) fn change_rights(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        let target = arg(args, 0, CommandKind::ChangeRights)?;
        let mask = arg(args, 1, CommandKind::ChangeRights)?;
        let rights = Rights::parse(mask).ok_or_else(|| {
            CommandError::invalid(format!(
                "rights must be four 0/1 characters (owner read, owner write, group read, group write), got '{}'",
                mask
            ))
        })?;

        let path = vfs::resolve_file(&session.working_dir, target)?;
        let mut meta = self.existing_metadata(&path)?;
        if session.nick() != Some(meta.owner.as_str()) {
            return Err(DenyReason::NotOwner.into());
        }

        meta.rights = rights;
        self.files().upsert(meta)?;

        tracing::info!("RIGHTS_CHANGED | session={} path={} rights={}", session.id, path, rights);
        Ok(Reply::info(format!("You have successfully changed rights for '{}'.", target)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{processor, run, TestProcessor};
    use crate::access::DenyReason;
    use crate::error::{CommandError, ObjectKind};
    use crate::identity::{IdentityStore, User};
    use crate::metadata::{Rights, ADMINS_GROUP, USERS_GROUP};
    use crate::vfs::Workspace;

    /// Sessions 1 (alice) and 2 (bob) logged in, both non-admin at mark 50.
    fn two_users() -> TestProcessor {
        let mut p = processor();
        {
            let mut users = IdentityStore::new(&mut p.store);
            users.put(&User::new("alice", "a", 50)).unwrap();
            users.put(&User::new("bob", "b", 50)).unwrap();
            users.put(&User::new("root", "r", 50).with_admin(true)).unwrap();
        }
        run(&mut p, 1, "login alice a").unwrap();
        run(&mut p, 2, "login bob b").unwrap();
        p
    }

    #[test]
    fn test_first_write_creates_metadata() {
        let mut p = two_users();
        run(&mut p, 1, "write f.txt hello world").unwrap();

        let meta = p.files().get("users/alice/home/f.txt").unwrap().unwrap();
        assert_eq!(meta.owner, "alice");
        assert_eq!(meta.group, USERS_GROUP);
        assert_eq!(meta.rights, Rights::DEFAULT);
        assert_eq!(meta.clearance_mark, 50);
        assert_eq!(meta.size, 11);

        let text = run(&mut p, 1, "read f.txt").unwrap();
        assert_eq!(text.text(), "Text from file 'f.txt':\nhello world");
    }

    #[test]
    fn test_admin_files_belong_to_admins_group() {
        let mut p = two_users();
        run(&mut p, 3, "login root r").unwrap();
        run(&mut p, 3, "write f.txt x").unwrap();
        assert_eq!(p.files().get("users/root/home/f.txt").unwrap().unwrap().group, ADMINS_GROUP);
    }

    #[test]
    fn test_non_member_cannot_read() {
        let mut p = two_users();
        run(&mut p, 1, "write f.txt hello").unwrap();

        let result = run(&mut p, 2, "read /users/alice/home/f.txt");
        assert!(matches!(
            result,
            Err(CommandError::PermissionDenied(DenyReason::NotInGroup(ref g))) if g == USERS_GROUP
        ));
    }

    #[test]
    fn test_membership_is_picked_up_on_next_command() {
        let mut p = two_users();
        run(&mut p, 1, "write f.txt hello").unwrap();
        run(&mut p, 3, "login root r").unwrap();
        run(&mut p, 3, "u2g users bob").unwrap();

        let text = run(&mut p, 2, "read users/alice/home/f.txt").unwrap();
        assert!(text.text().ends_with("hello"));
    }

    #[test]
    fn test_subsequent_write_keeps_ownership() {
        let mut p = two_users();
        run(&mut p, 1, "write f.txt one").unwrap();
        let created = p.files().get("users/alice/home/f.txt").unwrap().unwrap();

        run(&mut p, 1, "write f.txt three").unwrap();
        let updated = p.files().get("users/alice/home/f.txt").unwrap().unwrap();
        assert_eq!(updated.owner, created.owner);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.size, 5);
    }

    #[test]
    fn test_append_and_read_need_metadata() {
        let mut p = two_users();
        assert!(matches!(
            run(&mut p, 1, "append missing.txt x"),
            Err(CommandError::NotFound { kind: ObjectKind::File, .. })
        ));
        assert!(matches!(
            run(&mut p, 1, "read missing.txt"),
            Err(CommandError::NotFound { kind: ObjectKind::File, .. })
        ));

        run(&mut p, 1, "write log.txt a").unwrap();
        run(&mut p, 1, "append log.txt b c").unwrap();
        assert_eq!(p.workspace.read("users/alice/home/log.txt").unwrap(), b"ab c");
        assert_eq!(p.files().get("users/alice/home/log.txt").unwrap().unwrap().size, 4);
    }

    #[test]
    fn test_write_into_missing_directory() {
        let mut p = two_users();
        assert!(matches!(
            run(&mut p, 1, "write nowhere/f.txt x"),
            Err(CommandError::NotFound { kind: ObjectKind::Directory, .. })
        ));
        assert!(p.files().get("users/alice/home/nowhere/f.txt").unwrap().is_none());
    }

    #[test]
    fn test_paths_cannot_escape_the_root() {
        let mut p = two_users();
        assert!(matches!(run(&mut p, 1, "write ../../../../x y"), Err(CommandError::PathEscapesSandbox)));
        assert!(matches!(run(&mut p, 1, "ls ../../../.."), Err(CommandError::PathEscapesSandbox)));
        assert!(run(&mut p, 1, "ls ../../..").is_ok());
    }

    #[test]
    fn test_pwd_and_ls() {
        let mut p = two_users();
        assert_eq!(run(&mut p, 1, "pwd").unwrap().text(), "/users/alice/home");

        run(&mut p, 1, "write b.txt x").unwrap();
        run(&mut p, 1, "write a.txt x").unwrap();
        assert_eq!(run(&mut p, 1, "ls").unwrap().text(), "Files from directory '.':\na.txt b.txt");
        assert!(run(&mut p, 1, "ls ..").unwrap().text().ends_with("home/"));
        assert!(matches!(
            run(&mut p, 1, "ls nope"),
            Err(CommandError::NotFound { kind: ObjectKind::Directory, .. })
        ));
        assert!(matches!(
            run(&mut p, 1, "ls a.txt"),
            Err(CommandError::NotFound { kind: ObjectKind::Directory, .. })
        ));
    }

    #[test]
    fn test_chmod_is_owner_only() {
        let mut p = two_users();
        run(&mut p, 1, "write f.txt x").unwrap();

        assert!(matches!(
            run(&mut p, 2, "chmod /users/alice/home/f.txt 1111"),
            Err(CommandError::PermissionDenied(DenyReason::NotOwner))
        ));
        assert!(matches!(run(&mut p, 1, "chmod f.txt rwrw"), Err(CommandError::InvalidArgument(_))));

        run(&mut p, 1, "chmod f.txt 0101").unwrap();
        assert!(matches!(
            run(&mut p, 1, "read f.txt"),
            Err(CommandError::PermissionDenied(DenyReason::RightsDenied))
        ));
        run(&mut p, 1, "write f.txt still writable").unwrap();
    }

    #[test]
    fn test_record_info() {
        let mut p = two_users();
        run(&mut p, 1, "write f.txt x").unwrap();

        let info = run(&mut p, 2, "rr /users/alice/home/f.txt").unwrap();
        assert!(info.text().contains("owner: alice"));
        assert!(info.text().contains("rights: rwr_ (1110)"));
        assert!(matches!(run(&mut p, 1, "rr nope"), Err(CommandError::NotFound { .. })));
    }
}
