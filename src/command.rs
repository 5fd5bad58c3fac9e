// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command records, queue envelopes and replies.
//!
//! A connection tokenizes each line on whitespace into a word and arguments.
//! The word selects a [`CommandKind`]; the arguments are kept verbatim and
//! validated by the handler.

use std::fmt;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::CommandError;
use crate::session::{LogoutReason, Outbound, SessionId};

/// Every command word the processor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Register,
    ChangePassword,
    Login,
    Logout,
    Pwd,
    Write,
    Read,
    Append,
    List,
    Help,
    RemoveUser,
    ListUsers,
    Quit,
    AddGroup,
    AddUserToGroup,
    RemoveUserFromGroup,
    RemoveGroup,
    RecordInfo,
    ChangeRights,
    ChangeMark,
    GetMark,
    ToggleAudit,
}

impl CommandKind {
    pub const ALL: [CommandKind; 22] = [
        CommandKind::Register,
        CommandKind::ChangePassword,
        CommandKind::Login,
        CommandKind::Logout,
        CommandKind::Pwd,
        CommandKind::Write,
        CommandKind::Read,
        CommandKind::Append,
        CommandKind::List,
        CommandKind::Help,
        CommandKind::RemoveUser,
        CommandKind::ListUsers,
        CommandKind::Quit,
        CommandKind::AddGroup,
        CommandKind::AddUserToGroup,
        CommandKind::RemoveUserFromGroup,
        CommandKind::RemoveGroup,
        CommandKind::RecordInfo,
        CommandKind::ChangeRights,
        CommandKind::ChangeMark,
        CommandKind::GetMark,
        CommandKind::ToggleAudit,
    ];

    pub fn from_word(word: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.word() == word)
    }

    pub fn word(self) -> &'static str {
        match self {
            CommandKind::Register => "reg",
            CommandKind::ChangePassword => "chpswd",
            CommandKind::Login => "login",
            CommandKind::Logout => "logout",
            CommandKind::Pwd => "pwd",
            CommandKind::Write => "write",
            CommandKind::Read => "read",
            CommandKind::Append => "append",
            CommandKind::List => "ls",
            CommandKind::Help => "help",
            CommandKind::RemoveUser => "rmuser",
            CommandKind::ListUsers => "lsusers",
            CommandKind::Quit => "quit",
            CommandKind::AddGroup => "addgroup",
            CommandKind::AddUserToGroup => "u2g",
            CommandKind::RemoveUserFromGroup => "trimgroup",
            CommandKind::RemoveGroup => "rmgroup",
            CommandKind::RecordInfo => "rr",
            CommandKind::ChangeRights => "chmod",
            CommandKind::ChangeMark => "chmark",
            CommandKind::GetMark => "gm",
            CommandKind::ToggleAudit => "watch",
        }
    }

    /// Invocation example shown by `help` and in usage errors.
    pub fn usage(self) -> &'static str {
        match self {
            CommandKind::Register => "reg <nick> <pswd> [mark] [admin] [audit]",
            CommandKind::ChangePassword => "chpswd <nick> <pswd>",
            CommandKind::Login => "login <nick> <pswd> [mark]",
            CommandKind::Logout => "logout",
            CommandKind::Pwd => "pwd",
            CommandKind::Write => "write <file> <text>",
            CommandKind::Read => "read <file>",
            CommandKind::Append => "append <file> <text>",
            CommandKind::List => "ls [dir]",
            CommandKind::Help => "help [cmd]",
            CommandKind::RemoveUser => "rmuser <nick>",
            CommandKind::ListUsers => "lsusers",
            CommandKind::Quit => "quit",
            CommandKind::AddGroup => "addgroup <group> [mark]",
            CommandKind::AddUserToGroup => "u2g <group> <nick>",
            CommandKind::RemoveUserFromGroup => "trimgroup <group> <nick>",
            CommandKind::RemoveGroup => "rmgroup <group>",
            CommandKind::RecordInfo => "rr <file>",
            CommandKind::ChangeRights => "chmod <file> <rwrw>",
            CommandKind::ChangeMark => "chmark (f|u|g) <object> <mark>",
            CommandKind::GetMark => "gm (f|u|g) <object>",
            CommandKind::ToggleAudit => "watch <nick> [retention]",
        }
    }

    /// One-line description for `help`.
    pub fn summary(self) -> &'static str {
        match self {
            CommandKind::Register => "registers a new identity (admin)",
            CommandKind::ChangePassword => "changes an identity's password (admin)",
            CommandKind::Login => "logs in, optionally below the stored mark",
            CommandKind::Logout => "logs out",
            CommandKind::Pwd => "prints the current directory",
            CommandKind::Write => "replaces the text of a file, creating it if needed",
            CommandKind::Read => "prints the text of a file",
            CommandKind::Append => "adds text to the end of a file",
            CommandKind::List => "lists a directory",
            CommandKind::Help => "prints help",
            CommandKind::RemoveUser => "removes an identity and its files (admin)",
            CommandKind::ListUsers => "lists identities (admin)",
            CommandKind::Quit => "logs out and closes the connection",
            CommandKind::AddGroup => "creates a group (admin)",
            CommandKind::AddUserToGroup => "adds an identity to a group (admin)",
            CommandKind::RemoveUserFromGroup => "removes an identity from a group (admin)",
            CommandKind::RemoveGroup => "removes a group (admin)",
            CommandKind::RecordInfo => "prints the access record of a file",
            CommandKind::ChangeRights => "changes the rights of an owned file",
            CommandKind::ChangeMark => "changes the mark of a file, identity or group",
            CommandKind::GetMark => "prints the mark of a file, identity or group",
            CommandKind::ToggleAudit => "toggles login auditing of an identity (audit role)",
        }
    }

    pub fn requires_login(self) -> bool {
        !matches!(
            self,
            CommandKind::Login | CommandKind::Logout | CommandKind::Quit | CommandKind::Help
        )
    }

    /// Argument position holding a password, masked in logs.
    pub fn secret_arg(self) -> Option<usize> {
        match self {
            CommandKind::Register | CommandKind::ChangePassword | CommandKind::Login => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.word())
    }
}

/// One parsed command from one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub session: SessionId,
    pub kind: CommandKind,
    /// Tokens after the command word.
    pub args: Vec<String>,
}

impl Command {
    pub fn new(session: SessionId, kind: CommandKind, args: &[&str]) -> Self {
        Self {
            session,
            kind,
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Arguments from `from` onwards joined by single spaces.
    pub fn text_from(&self, from: usize) -> String {
        self.args.get(from..).map(|rest| rest.join(" ")).unwrap_or_default()
    }
}

/// Outcome of tokenizing one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Empty,
    Command(Command),
    Unknown(String),
}

/// Tokenize `line` on whitespace into a command for `session`.
pub fn parse_line(session: SessionId, line: &str) -> Parsed {
    let mut tokens = line.split_whitespace();
    let Some(word) = tokens.next() else {
        return Parsed::Empty;
    };

    match CommandKind::from_word(word) {
        Some(kind) => Parsed::Command(Command {
            session,
            kind,
            args: tokens.map(str::to_string).collect(),
        }),
        None => Parsed::Unknown(word.to_string()),
    }
}

/// Reply to an unrecognized command word.
pub fn unknown_command(word: &str) -> String {
    format!("Error: unknown command \"{}\"", word)
}

/// Successful handler result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Info(String),
    /// Final reply; the connection is closed after it.
    Farewell(String),
}

impl Reply {
    pub fn info(text: impl Into<String>) -> Self {
        Reply::Info(text.into())
    }

    pub fn text(&self) -> &str {
        match self {
            Reply::Info(text) | Reply::Farewell(text) => text,
        }
    }

    pub fn render(&self) -> String {
        format!("> {}", self.text())
    }
}

/// Wire form of a handler result, without the trailing newline.
pub fn render_result(result: &Result<Reply, CommandError>) -> String {
    match result {
        Ok(reply) => reply.render(),
        Err(err) => format!("Error: {}", err.user_message()),
    }
}

/// Message on the processor queue.
#[derive(Debug)]
pub enum Envelope {
    Connect {
        session: SessionId,
        peer: String,
        outbound: UnboundedSender<Outbound>,
    },
    Execute(Command),
    Disconnect {
        session: SessionId,
        reason: LogoutReason,
    },
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_word_round_trips() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_word(kind.word()), Some(kind));
            assert!(kind.usage().starts_with(kind.word()));
        }
        assert_eq!(CommandKind::from_word("cd"), None);
    }

    #[test]
    fn test_parse_line() {
        let sid = SessionId::new(3);
        assert_eq!(parse_line(sid, "   "), Parsed::Empty);
        assert_eq!(parse_line(sid, "frobnicate x"), Parsed::Unknown("frobnicate".to_string()));

        let Parsed::Command(cmd) = parse_line(sid, "write  f.txt hello   world\r") else {
            panic!("expected a command");
        };
        assert_eq!(cmd.kind, CommandKind::Write);
        assert_eq!(cmd.args, vec!["f.txt", "hello", "world"]);
        assert_eq!(cmd.text_from(1), "hello world");
        assert_eq!(cmd.text_from(5), "");
    }

    #[test]
    fn test_rendering() {
        assert_eq!(Reply::info("ok").render(), "> ok");
        assert_eq!(render_result(&Err(CommandError::AuthRequired)), "Error: you must log in first");
        assert_eq!(unknown_command("cd"), "Error: unknown command \"cd\"");
    }
}
