// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Access-Control Evaluator
//!
//! Pure decision functions combining the discretionary layer (rights mask and
//! group membership) with the mandatory layer (clearance marks).
//!
//! | Mode   | Rights bit | Mark rule (subject and group vs. file) |
//! |--------|------------|----------------------------------------|
//! | read   | `0b1010`   | `>=` (no read-up)                      |
//! | write  | `0b0101`   | `==` (no upgrade or downgrade)         |
//! | append | `0b0101`   | `<=` (no write-up)                     |
//!
//! Checks run in a fixed order and the first failure is reported:
//! rights, membership (the owner is exempt), subject mark, group mark.
//!
//! A path without metadata is not evaluated at all: the first write creates
//! the metadata and every later operation is checked against it.

use std::fmt;

use crate::group::Group;
use crate::metadata::FileMetadata;

/// The acting identity as seen by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject<'a> {
    pub nick: &'a str,
    pub clearance_mark: u32,
    pub groups: &'a [String],
}

impl Subject<'_> {
    fn is_owner(&self, file: &FileMetadata) -> bool {
        self.nick == file.owner
    }

    fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Why an operation was refused.
///
/// The first four come from the evaluator; the rest are raised by the
/// processor's administrative and authentication checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The rights mask lacks the bit for this mode.
    RightsDenied,
    /// Not the owner and not a member of the file's group.
    NotInGroup(String),
    /// The session's mark fails the mode's comparison.
    SubjectMarkMismatch { subject_mark: u32, file_mark: u32 },
    /// The file group's mark fails the mode's comparison.
    GroupMarkMismatch { group: String, group_mark: u32, file_mark: u32 },
    /// Admin role required.
    AdminRequired,
    /// Audit role required.
    AuditRoleRequired,
    /// Only the file's owner may do this.
    NotOwner,
    /// Requested mark exceeds the stored ceiling.
    MarkAboveCeiling { requested: u32, ceiling: u32 },
    /// Identity is already logged in from another session.
    AlreadyActive,
    /// Password did not match.
    BadCredentials,
    /// Target identity is logged in and cannot be removed.
    TargetActive(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::RightsDenied => write!(f, "the file's rights do not allow this"),
            DenyReason::NotInGroup(group) => write!(f, "you are not in the group '{}'", group),
            DenyReason::SubjectMarkMismatch { subject_mark, file_mark } => write!(
                f,
                "your mark '{}' does not satisfy the file's mark '{}'",
                subject_mark, file_mark
            ),
            DenyReason::GroupMarkMismatch { group, group_mark, file_mark } => write!(
                f,
                "mark '{}' of group '{}' does not satisfy the file's mark '{}'",
                group_mark, group, file_mark
            ),
            DenyReason::AdminRequired => write!(f, "only an admin can do this"),
            DenyReason::AuditRoleRequired => write!(f, "only an auditor can do this"),
            DenyReason::NotOwner => write!(f, "you are not the owner of this file"),
            DenyReason::MarkAboveCeiling { requested, ceiling } => {
                write!(f, "mark '{}' cannot be larger than '{}'", requested, ceiling)
            }
            DenyReason::AlreadyActive => write!(f, "this user is already logged in"),
            DenyReason::BadCredentials => write!(f, "wrong password"),
            DenyReason::TargetActive(nick) => write!(f, "user '{}' is logged in", nick),
        }
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// `Ok(())` on allow, the reason otherwise.
    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

/// File operation being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    Append,
}

impl Mode {
    fn rights_allow(self, file: &FileMetadata) -> bool {
        match self {
            Mode::Read => file.rights.allows_read(),
            Mode::Write | Mode::Append => file.rights.allows_write(),
        }
    }

    fn marks_allow(self, actor_mark: u32, file_mark: u32) -> bool {
        match self {
            Mode::Read => actor_mark >= file_mark,
            Mode::Write => actor_mark == file_mark,
            Mode::Append => actor_mark <= file_mark,
        }
    }
}

/// Evaluate `mode` for `subject` against a file and the file's group.
pub fn evaluate(mode: Mode, subject: &Subject<'_>, file: &FileMetadata, group: &Group) -> Decision {
    if !mode.rights_allow(file) {
        return Decision::Deny(DenyReason::RightsDenied);
    }

    if !subject.is_owner(file) && !subject.in_group(&file.group) {
        return Decision::Deny(DenyReason::NotInGroup(file.group.clone()));
    }

    if !mode.marks_allow(subject.clearance_mark, file.clearance_mark) {
        return Decision::Deny(DenyReason::SubjectMarkMismatch {
            subject_mark: subject.clearance_mark,
            file_mark: file.clearance_mark,
        });
    }

    if !mode.marks_allow(group.clearance_mark, file.clearance_mark) {
        return Decision::Deny(DenyReason::GroupMarkMismatch {
            group: group.name.clone(),
            group_mark: group.clearance_mark,
            file_mark: file.clearance_mark,
        });
    }

    Decision::Allow
}

/// Dominance rule: subject and group marks must be at least the file's.
pub fn can_read(subject: &Subject<'_>, file: &FileMetadata, group: &Group) -> Decision {
    evaluate(Mode::Read, subject, file, group)
}

/// Exact-match rule: subject and group marks must equal the file's.
pub fn can_write(subject: &Subject<'_>, file: &FileMetadata, group: &Group) -> Decision {
    evaluate(Mode::Write, subject, file, group)
}

/// No-write-up rule: subject and group marks must not exceed the file's.
pub fn can_append(subject: &Subject<'_>, file: &FileMetadata, group: &Group) -> Decision {
    evaluate(Mode::Append, subject, file, group)
}
