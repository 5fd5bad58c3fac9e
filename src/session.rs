// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-connection session state.
//!
//! Sessions are owned by the processor and never persisted. The connection
//! side only holds the receiving half of the session's outbound channel.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc::UnboundedSender;

use crate::access::Subject;
use crate::identity::User;
use crate::vfs;

/// Identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        SessionId(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// What the processor sends back to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One rendered reply line.
    Line(String),
    /// Flush and close the connection.
    Close,
}

/// Why a session ended its login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    Explicit,
    Quit,
    ConnectionLost,
    Shutdown,
    Relogin,
}

impl LogoutReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LogoutReason::Explicit => "explicit",
            LogoutReason::Quit => "quit",
            LogoutReason::ConnectionLost => "connection_lost",
            LogoutReason::Shutdown => "shutdown",
            LogoutReason::Relogin => "relogin",
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient state of one connection.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Remote address, used in audit lines.
    pub peer: String,
    /// Nick of the logged-in identity.
    pub identity: Option<String>,
    pub is_admin: bool,
    pub is_audit_role: bool,
    /// Effective mark, at most the identity's stored ceiling.
    pub clearance_mark: u32,
    pub groups: Vec<String>,
    pub working_dir: String,
    pub failed_login_attempts: u32,
    outbound: Option<UnboundedSender<Outbound>>,
}

impl Session {
    pub fn new(id: SessionId, peer: impl Into<String>, outbound: Option<UnboundedSender<Outbound>>) -> Self {
        Self {
            id,
            peer: peer.into(),
            identity: None,
            is_admin: false,
            is_audit_role: false,
            clearance_mark: 0,
            groups: Vec::new(),
            working_dir: String::new(),
            failed_login_attempts: 0,
            outbound,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn nick(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Address of the peer without the port, as written to audit lines.
    pub fn peer_ip(&self) -> String {
        self.peer
            .parse::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| self.peer.clone())
    }

    /// Evaluator view of the session, if logged in.
    pub fn subject(&self) -> Option<Subject<'_>> {
        self.identity.as_deref().map(|nick| Subject {
            nick,
            clearance_mark: self.clearance_mark,
            groups: &self.groups,
        })
    }

    /// Take on `user` with the given effective mark and groups.
    pub fn sign_in(&mut self, user: &User, clearance_mark: u32, groups: Vec<String>) {
        self.identity = Some(user.nick.clone());
        self.is_admin = user.is_admin;
        self.is_audit_role = user.is_audit_role;
        self.clearance_mark = clearance_mark;
        self.groups = groups;
        self.working_dir = vfs::home_dir(&user.nick);
        self.failed_login_attempts = 0;
    }

    /// Clear every login field. Returns the nick that was logged in.
    pub fn sign_out(&mut self) -> Option<String> {
        self.is_admin = false;
        self.is_audit_role = false;
        self.clearance_mark = 0;
        self.groups.clear();
        self.working_dir.clear();
        self.identity.take()
    }

    /// Queue a message for the connection. Returns false if it is gone.
    pub fn send(&self, message: Outbound) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_out() {
        let mut session = Session::new(SessionId::new(1), "127.0.0.1:5000", None);
        assert!(!session.is_logged_in());
        assert!(session.subject().is_none());

        session.failed_login_attempts = 2;
        let user = User::new("alice", "pw", 60).with_admin(true);
        session.sign_in(&user, 40, vec!["admins".to_string()]);

        assert!(session.is_logged_in());
        assert!(session.is_admin);
        assert_eq!(session.failed_login_attempts, 0);
        assert_eq!(session.working_dir, "users/alice/home");

        let subject = session.subject().unwrap();
        assert_eq!(subject.nick, "alice");
        assert_eq!(subject.clearance_mark, 40);

        assert_eq!(session.sign_out(), Some("alice".to_string()));
        assert!(!session.is_logged_in());
        assert!(!session.is_admin);
        assert!(session.groups.is_empty());
        assert_eq!(session.sign_out(), None);
    }

    #[test]
    fn test_send_without_connection() {
        let session = Session::new(SessionId::new(7), "test", None);
        assert!(!session.send(Outbound::Close));
        assert_eq!(session.id.to_string(), "s7");
        assert_eq!(session.peer_ip(), "test");

        let remote = Session::new(SessionId::new(8), "10.0.0.7:41000", None);
        assert_eq!(remote.peer_ip(), "10.0.0.7");
    }

    #[test]
    fn test_send_reaches_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = Session::new(SessionId::new(1), "test", Some(tx));
        assert!(session.send(Outbound::Line("> hi".to_string())));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Line("> hi".to_string()));
    }
}
