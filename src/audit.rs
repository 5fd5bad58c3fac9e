// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-identity audit trail of login activity.
//!
//! Log format, one entry per line:
//! `2024-01-15T10:23:45.123+00:00: alice: Failed login from '10.0.0.7'. Attempt #2.`
//!
//! Each audited identity has a retention count. Before a line is appended the
//! oldest lines are cut so that the log holds at most `retention` lines
//! afterwards. The cut is done on bytes: find the offset just past the last
//! dropped newline, move the tail to the front and truncate.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::User;
use crate::security::locks::{resilient_read, resilient_write};

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub message: String,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            message: message.into(),
        }
    }

    /// `timestamp: nick: message.` with newlines in the message flattened.
    pub fn to_log_line(&self) -> String {
        let message: String = self
            .message
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        format!("{}: {}: {}.", self.timestamp.to_rfc3339(), self.actor, message)
    }
}

/// Number of lines in `bytes`; an unterminated last line counts.
fn count_lines(bytes: &[u8]) -> usize {
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count();
    match bytes.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}

/// Byte offset just past the first `n` lines (or the end of `bytes`).
fn skip_lines(bytes: &[u8], n: usize) -> usize {
    let mut offset = 0;
    for _ in 0..n {
        match bytes[offset..].iter().position(|&b| b == b'\n') {
            Some(pos) => offset += pos + 1,
            None => return bytes.len(),
        }
    }
    offset
}

/// Offset of the first byte to keep so that one more line fits in `retention`.
pub fn retained_offset(bytes: &[u8], retention: usize) -> usize {
    let count = count_lines(bytes);
    if count < retention {
        return 0;
    }
    skip_lines(bytes, count + 1 - retention)
}

/// Storage for audit trails.
pub trait AuditLog: Send {
    /// Trim the log of `nick` to make room, then append `entry` (unless
    /// `retention` is zero, which keeps nothing).
    fn append_bounded(&mut self, nick: &str, entry: &AuditEntry, retention: u32) -> io::Result<()>;

    /// All lines currently held for `nick`.
    fn read_lines(&self, nick: &str) -> io::Result<Vec<String>>;
}

/// Append `message` to the trail of `user` if auditing is enabled for it.
pub fn record(log: &mut dyn AuditLog, user: &User, message: &str) {
    if !user.audit_enabled {
        return;
    }
    let entry = AuditEntry::new(&user.nick, message);
    if let Err(e) = log.append_bounded(&user.nick, &entry, user.audit_retention) {
        tracing::error!("AUDIT_WRITE_FAILED | nick={} error={}", user.nick, e);
    }
}

/// Audit trails stored as `<dir>/<nick>.log`.
#[derive(Debug, Clone)]
pub struct FileAuditLog {
    dir: PathBuf,
}

impl FileAuditLog {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn log_path(&self, nick: &str) -> PathBuf {
        self.dir.join(format!("{}.log", nick))
    }
}

impl AuditLog for FileAuditLog {
    fn append_bounded(&mut self, nick: &str, entry: &AuditEntry, retention: u32) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.log_path(nick))?;

        let mut content = Vec::new();
        file.read_to_end(&mut content)?;

        let offset = retained_offset(&content, retention as usize);
        if offset > 0 {
            let tail = &content[offset..];
            file.seek(SeekFrom::Start(0))?;
            file.write_all(tail)?;
            file.set_len(tail.len() as u64)?;
            tracing::debug!("AUDIT_TRIMMED | nick={} dropped_bytes={}", nick, offset);
        }

        if retention > 0 {
            file.seek(SeekFrom::End(0))?;
            writeln!(file, "{}", entry.to_log_line())?;
        }
        Ok(())
    }

    fn read_lines(&self, nick: &str) -> io::Result<Vec<String>> {
        match fs::read_to_string(self.log_path(nick)) {
            Ok(content) => Ok(content.lines().map(String::from).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory audit trails. Clones share the same logs.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    logs: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append_bounded(&mut self, nick: &str, entry: &AuditEntry, retention: u32) -> io::Result<()> {
        let mut logs = resilient_write(&self.logs);
        let content = logs.entry(nick.to_string()).or_default();

        let offset = retained_offset(content, retention as usize);
        content.drain(..offset);

        if retention > 0 {
            content.extend_from_slice(entry.to_log_line().as_bytes());
            content.push(b'\n');
        }
        Ok(())
    }

    fn read_lines(&self, nick: &str) -> io::Result<Vec<String>> {
        Ok(resilient_read(&self.logs)
            .get(nick)
            .map(|content| {
                String::from_utf8_lossy(content)
                    .lines()
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(message: &str) -> AuditEntry {
        AuditEntry::new("alice", message)
    }

    #[test]
    fn test_log_line_format() {
        let line = entry("Failed login from '127.0.0.1'. Attempt #1").to_log_line();
        assert!(line.ends_with(": alice: Failed login from '127.0.0.1'. Attempt #1."));
        assert!(!entry("a\nb").to_log_line().contains('\n'));
    }

    #[test]
    fn test_count_and_skip_lines() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"a\n"), 1);
        assert_eq!(count_lines(b"a\nb"), 2);
        assert_eq!(skip_lines(b"a\nbb\nc\n", 2), 5);
        assert_eq!(skip_lines(b"a\nbb", 3), 4);
    }

    #[test]
    fn test_retained_offset() {
        let log = b"1\n2\n3\n";
        assert_eq!(retained_offset(log, 5), 0);
        assert_eq!(retained_offset(log, 4), 0);
        assert_eq!(retained_offset(log, 3), 2);
        assert_eq!(retained_offset(log, 2), 4);
        assert_eq!(retained_offset(log, 1), 6);
        assert_eq!(retained_offset(log, 0), 6);
    }

    fn never_exceeds_retention(log: &mut dyn AuditLog) {
        for retention in 0..5u32 {
            let nick = format!("user{}", retention);
            for i in 0..9 {
                let e = AuditEntry::new(&nick, format!("attempt {}", i));
                log.append_bounded(&nick, &e, retention).unwrap();
                let lines = log.read_lines(&nick).unwrap();
                assert!(lines.len() <= retention as usize);
                if retention > 0 {
                    assert!(lines.last().unwrap().ends_with(&format!("attempt {}.", i)));
                }
            }
        }
    }

    #[test]
    fn test_memory_log_never_exceeds_retention() {
        never_exceeds_retention(&mut MemoryAuditLog::new());
    }

    #[test]
    fn test_file_log_never_exceeds_retention() {
        let dir = TempDir::new().unwrap();
        never_exceeds_retention(&mut FileAuditLog::open(dir.path()).unwrap());
    }

    #[test]
    fn test_file_log_keeps_most_recent_lines() {
        let dir = TempDir::new().unwrap();
        let mut log = FileAuditLog::open(dir.path()).unwrap();

        for message in ["first", "second", "third"] {
            log.append_bounded("alice", &entry(message), 2).unwrap();
        }

        let lines = log.read_lines("alice").unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("second."));
        assert!(lines[1].ends_with("third."));
    }

    #[test]
    fn test_shrinking_retention_trims_older_backlog() {
        let mut log = MemoryAuditLog::new();
        for i in 0..6 {
            log.append_bounded("alice", &entry(&format!("m{}", i)), 10).unwrap();
        }
        log.append_bounded("alice", &entry("last"), 2).unwrap();

        let lines = log.read_lines("alice").unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("m5."));
        assert!(lines[1].ends_with("last."));
    }

    #[test]
    fn test_record_respects_audit_flag() {
        let mut log = MemoryAuditLog::new();
        let mut user = User::new("alice", "pw", 50);

        record(&mut log, &user, "ignored");
        assert!(log.read_lines("alice").unwrap().is_empty());

        user.audit_enabled = true;
        user.audit_retention = 3;
        record(&mut log, &user, "kept");
        assert_eq!(log.read_lines("alice").unwrap().len(), 1);
    }

    struct UnwritableLog;

    impl AuditLog for UnwritableLog {
        fn append_bounded(&mut self, _nick: &str, _entry: &AuditEntry, _retention: u32) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn read_lines(&self, _nick: &str) -> io::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_record_survives_write_failure() {
        let mut user = User::new("alice", "pw", 50);
        user.audit_enabled = true;
        record(&mut UnwritableLog, &user, "Failed login from '127.0.0.1'. Attempt #1");
    }
}
