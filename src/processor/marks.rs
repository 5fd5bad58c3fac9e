// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Clearance marks and audit toggling.
//!
//! `chmark` and `gm` take an object selector: `f` for a file, `u` for an
//! identity and `g` for a group.

use super::{arg, parse_mark, require_admin, Processor};
use crate::access::DenyReason;
use crate::audit::AuditLog;
use crate::command::{CommandKind, Reply};
use crate::error::{CommandError, CommandResult, ObjectKind};
use crate::session::Session;
use crate::store::KvStore;
use crate::vfs::{self, Workspace};

fn bad_selector(selector: &str) -> CommandError {
    CommandError::invalid(format!(
        "first option must be one of 'f', 'u', 'g', got '{}'",
        selector
    ))
}

impl<S: KvStore, W: Workspace, A: AuditLog> Processor<S, W, A> {
    /// `chmark (f|u|g) <object> <mark>`
    ///
    /// - `f`: the file's owner sets its mark.
    /// - `u` on oneself: sets the session mark, capped at the stored mark.
    /// - `u` on someone else: an admin sets the stored mark.
    /// - `g`: an admin sets the group's mark.
    pub(super) fn change_mark(&mut self, session: &mut Session, args: &[String]) -> CommandResult<Reply> {
        let selector = arg(args, 0, CommandKind::ChangeMark)?;
        let object = arg(args, 1, CommandKind::ChangeMark)?;
        let mark = parse_mark(arg(args, 2, CommandKind::ChangeMark)?)?;
        let nick = session.nick().ok_or(CommandError::AuthRequired)?.to_string();

        match selector {
            "f" => {
                let path = vfs::resolve_file(&session.working_dir, object)?;
                let mut meta = self
                    .files()
                    .get(&path)?
                    .ok_or_else(|| CommandError::not_found(ObjectKind::File, &path))?;
                if meta.owner != nick {
                    return Err(DenyReason::NotOwner.into());
                }
                let previous = meta.clearance_mark;
                meta.clearance_mark = mark;
                self.files().upsert(meta)?;
                tracing::info!("FILE_MARK_CHANGED | by={} path={} from={} to={}", nick, path, previous, mark);
            }
            "u" if object == nick => {
                let ceiling = self
                    .users()
                    .get(&nick)?
                    .ok_or_else(|| CommandError::not_found(ObjectKind::User, &nick))?
                    .clearance_mark;
                if mark > ceiling {
                    return Err(DenyReason::MarkAboveCeiling { requested: mark, ceiling }.into());
                }
                session.clearance_mark = mark;
                tracing::info!("SESSION_MARK_CHANGED | session={} nick={} mark={}", session.id, nick, mark);
            }
            "u" => {
                require_admin(session)?;
                let mut user = self
                    .users()
                    .get(object)?
                    .ok_or_else(|| CommandError::not_found(ObjectKind::User, object))?;
                user.clearance_mark = mark;
                self.users().put(&user)?;
                tracing::info!("USER_MARK_CHANGED | by={} nick={} mark={}", nick, object, mark);
            }
            "g" => {
                require_admin(session)?;
                let mut group = self
                    .groups()
                    .get(object)?
                    .ok_or_else(|| CommandError::not_found(ObjectKind::Group, object))?;
                group.clearance_mark = mark;
                self.groups().put(&group)?;
                tracing::info!("GROUP_MARK_CHANGED | by={} group={} mark={}", nick, object, mark);
            }
            other => return Err(bad_selector(other)),
        }

        Ok(Reply::info(format!("You have successfully changed mark for '{}'.", object)))
    }

    /// `gm (f|u|g) [object]`. `gm u` without an object, or naming oneself,
    /// reports the session mark; other identities need an admin.
    pub(super) fn get_mark(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        let selector = arg(args, 0, CommandKind::GetMark)?;
        let object = args.get(1).map(String::as_str);

        match (selector, object) {
            ("u", None) => Ok(Reply::info(format!("Your current mark is '{}'.", session.clearance_mark))),
            ("u", Some(nick)) if session.nick() == Some(nick) => {
                Ok(Reply::info(format!("Your current mark is '{}'.", session.clearance_mark)))
            }
            ("u", Some(nick)) => {
                require_admin(session)?;
                let user = self
                    .users()
                    .get(nick)?
                    .ok_or_else(|| CommandError::not_found(ObjectKind::User, nick))?;
                Ok(Reply::info(format!(
                    "Max mark of user '{}' is '{}'.",
                    nick, user.clearance_mark
                )))
            }
            ("f", Some(target)) => {
                let path = vfs::resolve_file(&session.working_dir, target)?;
                let meta = self
                    .files()
                    .get(&path)?
                    .ok_or_else(|| CommandError::not_found(ObjectKind::File, &path))?;
                Ok(Reply::info(format!(
                    "Mark of file '{}' is '{}'.",
                    target, meta.clearance_mark
                )))
            }
            ("g", Some(name)) => {
                let group = self
                    .groups()
                    .get(name)?
                    .ok_or_else(|| CommandError::not_found(ObjectKind::Group, name))?;
                Ok(Reply::info(format!(
                    "Mark of group '{}' is '{}'.",
                    name, group.clearance_mark
                )))
            }
            ("f" | "g", None) => Err(CommandError::usage(CommandKind::GetMark.usage())),
            (other, _) => Err(bad_selector(other)),
        }
    }

    /// `watch <nick> [retention]`: audit role only. Flips auditing of
    /// `nick` and sets how many lines its log keeps.
    pub(super) fn toggle_audit(&mut self, session: &Session, args: &[String]) -> CommandResult<Reply> {
        if !session.is_audit_role {
            return Err(DenyReason::AuditRoleRequired.into());
        }
        let nick = arg(args, 0, CommandKind::ToggleAudit)?;
        let retention = match args.get(1) {
            Some(text) => text.parse::<u32>().map_err(|_| {
                CommandError::invalid(format!("retention must be a non-negative integer, got '{}'", text))
            })?,
            None => self.config.default_audit_retention,
        };

        let mut user = self
            .users()
            .get(nick)?
            .ok_or_else(|| CommandError::not_found(ObjectKind::User, nick))?;
        user.audit_enabled = !user.audit_enabled;
        user.audit_retention = retention;
        self.users().put(&user)?;

        tracing::info!(
            "AUDIT_TOGGLED | by={} nick={} enabled={} retention={}",
            session.nick().unwrap_or_default(),
            nick,
            user.audit_enabled,
            retention
        );
        Ok(Reply::info(format!(
            "Changed audit to '{}' for user '{}' (keeping {} lines).",
            user.audit_enabled, nick, retention
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{processor, run, TestProcessor};
    use crate::access::DenyReason;
    use crate::audit::AuditLog;
    use crate::error::CommandError;
    use crate::identity::{IdentityStore, User};
    use crate::session::SessionId;

    /// alice (mark 50, session 1), bob (mark 50, session 2), root admin+audit (session 3).
    fn setup() -> TestProcessor {
        let mut p = processor();
        {
            let mut users = IdentityStore::new(&mut p.store);
            users.put(&User::new("alice", "a", 50)).unwrap();
            users.put(&User::new("bob", "b", 50)).unwrap();
            users
                .put(&User::new("root", "r", 90).with_admin(true).with_audit_role(true))
                .unwrap();
        }
        run(&mut p, 1, "login alice a").unwrap();
        run(&mut p, 2, "login bob b").unwrap();
        run(&mut p, 3, "login root r").unwrap();
        p
    }

    #[test]
    fn test_raised_file_mark_blocks_owner_write() {
        let mut p = setup();
        run(&mut p, 1, "write top.txt v1").unwrap();
        run(&mut p, 1, "chmark f top.txt 70").unwrap();

        let result = run(&mut p, 1, "write top.txt v2");
        assert!(matches!(
            result,
            Err(CommandError::PermissionDenied(DenyReason::SubjectMarkMismatch {
                subject_mark: 50,
                file_mark: 70
            }))
        ));
    }

    #[test]
    fn test_file_mark_is_owner_only() {
        let mut p = setup();
        run(&mut p, 1, "write f.txt x").unwrap();
        assert!(matches!(
            run(&mut p, 2, "chmark f /users/alice/home/f.txt 10"),
            Err(CommandError::PermissionDenied(DenyReason::NotOwner))
        ));
        assert!(matches!(run(&mut p, 1, "chmark f nope.txt 10"), Err(CommandError::NotFound { .. })));
    }

    #[test]
    fn test_self_service_mark_is_capped() {
        let mut p = setup();
        run(&mut p, 1, "chmark u alice 20").unwrap();
        assert_eq!(p.session(SessionId::new(1)).unwrap().clearance_mark, 20);

        run(&mut p, 1, "chmark u alice 50").unwrap();
        assert!(matches!(
            run(&mut p, 1, "chmark u alice 51"),
            Err(CommandError::PermissionDenied(DenyReason::MarkAboveCeiling { requested: 51, ceiling: 50 }))
        ));
        assert_eq!(p.users().get("alice").unwrap().unwrap().clearance_mark, 50);
    }

    #[test]
    fn test_other_user_and_group_marks_need_admin() {
        let mut p = setup();
        assert!(matches!(
            run(&mut p, 1, "chmark u bob 10"),
            Err(CommandError::PermissionDenied(DenyReason::AdminRequired))
        ));
        assert!(matches!(
            run(&mut p, 1, "chmark g users 10"),
            Err(CommandError::PermissionDenied(DenyReason::AdminRequired))
        ));

        run(&mut p, 3, "chmark u bob 80").unwrap();
        assert_eq!(p.users().get("bob").unwrap().unwrap().clearance_mark, 80);
        run(&mut p, 3, "chmark g users 30").unwrap();
        assert_eq!(p.groups().get("users").unwrap().unwrap().clearance_mark, 30);

        assert!(matches!(run(&mut p, 3, "chmark x bob 1"), Err(CommandError::InvalidArgument(_))));
        assert!(matches!(run(&mut p, 3, "chmark u bob high"), Err(CommandError::InvalidArgument(_))));
    }

    #[test]
    fn test_get_mark() {
        let mut p = setup();
        run(&mut p, 1, "write f.txt x").unwrap();
        run(&mut p, 1, "chmark u alice 30").unwrap();

        assert_eq!(run(&mut p, 1, "gm u").unwrap().text(), "Your current mark is '30'.");
        assert_eq!(run(&mut p, 1, "gm u alice").unwrap().text(), "Your current mark is '30'.");
        assert_eq!(run(&mut p, 1, "gm f f.txt").unwrap().text(), "Mark of file 'f.txt' is '50'.");
        assert_eq!(run(&mut p, 1, "gm g admins").unwrap().text(), "Mark of group 'admins' is '50'.");
        assert!(matches!(
            run(&mut p, 1, "gm u bob"),
            Err(CommandError::PermissionDenied(DenyReason::AdminRequired))
        ));
        assert_eq!(run(&mut p, 3, "gm u alice").unwrap().text(), "Max mark of user 'alice' is '50'.");
        assert!(matches!(run(&mut p, 1, "gm f"), Err(CommandError::InvalidArgument(_))));
    }

    #[test]
    fn test_watch_toggles_and_needs_audit_role() {
        let mut p = setup();
        assert!(matches!(
            run(&mut p, 1, "watch bob"),
            Err(CommandError::PermissionDenied(DenyReason::AuditRoleRequired))
        ));

        run(&mut p, 3, "watch bob").unwrap();
        let bob = p.users().get("bob").unwrap().unwrap();
        assert!(bob.audit_enabled);
        assert_eq!(bob.audit_retention, 100);

        run(&mut p, 3, "watch bob 5").unwrap();
        let bob = p.users().get("bob").unwrap().unwrap();
        assert!(!bob.audit_enabled);
        assert_eq!(bob.audit_retention, 5);
    }

    #[test]
    fn test_audit_log_keeps_most_recent_failures() {
        let mut p = setup();
        run(&mut p, 3, "watch alice 2").unwrap();
        run(&mut p, 1, "logout").unwrap();

        for _ in 0..3 {
            assert!(run(&mut p, 4, "login alice wrong").is_err());
        }

        let lines = p.audit.read_lines("alice").unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("alice: Failed login from '127.0.0.1'. Attempt #2."));
        assert!(lines[1].ends_with("alice: Failed login from '127.0.0.1'. Attempt #3."));
    }
}
