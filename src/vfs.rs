// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sandboxed workspace: path resolution and raw byte I/O.
//!
//! Paths are canonical, `/`-separated and relative to the sandbox root, e.g.
//! `users/alice/home/notes.txt`. Every identity's working directory is its
//! home, three levels below the root.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::error::{CommandError, CommandResult};
use crate::security::locks::{resilient_read, resilient_write};

/// Prefix under which absolute sandbox paths may be given without a leading `/`.
const USERS_DIR: &str = "users";

/// Home directory of `nick`.
pub fn home_dir(nick: &str) -> String {
    format!("{}/{}/home", USERS_DIR, nick)
}

/// Top-level directory holding everything of `nick`.
pub fn user_dir(nick: &str) -> String {
    format!("{}/{}", USERS_DIR, nick)
}

/// Resolve `arg` against `working_dir` into a canonical sandbox path.
///
/// `arg` is taken from the sandbox root when it starts with `/` or `users/`,
/// and from `working_dir` otherwise. `.` is ignored and `..` pops a level;
/// popping past the root fails with `PathEscapesSandbox`. The empty string is
/// the root itself.
pub fn resolve(working_dir: &str, arg: &str) -> CommandResult<String> {
    if arg.contains('\0') || arg.contains('\\') {
        return Err(CommandError::invalid(format!("invalid path '{}'", arg)));
    }

    let (base, relative) = if let Some(stripped) = arg.strip_prefix('/') {
        ("", stripped)
    } else if arg == USERS_DIR || arg.starts_with("users/") {
        ("", arg)
    } else {
        (working_dir, arg)
    };

    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for component in relative.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(CommandError::PathEscapesSandbox);
                }
            }
            name => parts.push(name),
        }
    }

    Ok(parts.join("/"))
}

/// Resolve a path that must name a file, not the root.
pub fn resolve_file(working_dir: &str, arg: &str) -> CommandResult<String> {
    let path = resolve(working_dir, arg)?;
    if path.is_empty() {
        return Err(CommandError::invalid(format!("'{}' is not a file", arg)));
    }
    Ok(path)
}

/// Parent directory of a canonical path (`""` for top-level entries).
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Raw byte storage behind the sandbox.
///
/// Writes never create missing parent directories; only homes are created,
/// explicitly, through [`Workspace::create_dir_all`].
pub trait Workspace: Send {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Replace the content of `path`. Returns the new length.
    fn write(&mut self, path: &str, data: &[u8]) -> io::Result<u64>;

    /// Append to an existing `path`. Returns the new length.
    fn append(&mut self, path: &str, data: &[u8]) -> io::Result<u64>;

    /// Entry names of `dir`, sorted; directories carry a trailing `/`.
    fn list(&self, dir: &str) -> io::Result<Vec<String>>;

    fn create_dir_all(&mut self, dir: &str) -> io::Result<()>;

    /// Remove `dir` and everything below it. Missing directories are fine.
    fn remove_dir_all(&mut self, dir: &str) -> io::Result<()>;
}

impl<W: Workspace + ?Sized> Workspace for Box<W> {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }

    fn write(&mut self, path: &str, data: &[u8]) -> io::Result<u64> {
        (**self).write(path, data)
    }

    fn append(&mut self, path: &str, data: &[u8]) -> io::Result<u64> {
        (**self).append(path, data)
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        (**self).list(dir)
    }

    fn create_dir_all(&mut self, dir: &str) -> io::Result<()> {
        (**self).create_dir_all(dir)
    }

    fn remove_dir_all(&mut self, dir: &str) -> io::Result<()> {
        (**self).remove_dir_all(dir)
    }
}

/// [`Workspace`] backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskWorkspace {
    root: PathBuf,
}

impl DiskWorkspace {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(USERS_DIR))?;
        Ok(Self { root })
    }

    fn full_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|p| !p.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

impl Workspace for DiskWorkspace {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.full_path(path))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> io::Result<u64> {
        fs::write(self.full_path(path), data)?;
        Ok(data.len() as u64)
    }

    fn append(&mut self, path: &str, data: &[u8]) -> io::Result<u64> {
        let mut file = OpenOptions::new().append(true).open(self.full_path(path))?;
        file.write_all(data)?;
        Ok(file.metadata()?.len())
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let full = self.full_path(dir);
        if full.is_file() {
            return Err(not_found(dir));
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(full)? {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn create_dir_all(&mut self, dir: &str) -> io::Result<()> {
        fs::create_dir_all(self.full_path(dir))
    }

    fn remove_dir_all(&mut self, dir: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.full_path(dir)) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryTree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl MemoryTree {
    fn dir_exists(&self, dir: &str) -> bool {
        dir.is_empty() || self.dirs.contains(dir)
    }
}

/// [`Workspace`] held in memory. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkspace {
    tree: Arc<RwLock<MemoryTree>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        let workspace = Self::default();
        resilient_write(&workspace.tree).dirs.insert(USERS_DIR.to_string());
        workspace
    }

    pub fn dir_exists(&self, dir: &str) -> bool {
        resilient_read(&self.tree).dir_exists(dir)
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(ErrorKind::NotFound, format!("no such file or directory: {}", path))
}

impl Workspace for MemoryWorkspace {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        resilient_read(&self.tree)
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> io::Result<u64> {
        let mut tree = resilient_write(&self.tree);
        if !tree.dir_exists(parent(path)) {
            return Err(not_found(parent(path)));
        }
        if tree.dirs.contains(path) {
            return Err(io::Error::new(ErrorKind::Other, format!("{} is a directory", path)));
        }
        tree.files.insert(path.to_string(), data.to_vec());
        Ok(data.len() as u64)
    }

    fn append(&mut self, path: &str, data: &[u8]) -> io::Result<u64> {
        let mut tree = resilient_write(&self.tree);
        let content = tree.files.get_mut(path).ok_or_else(|| not_found(path))?;
        content.extend_from_slice(data);
        Ok(content.len() as u64)
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let tree = resilient_read(&self.tree);
        if !tree.dir_exists(dir) {
            return Err(not_found(dir));
        }

        let mut names: Vec<String> = tree
            .dirs
            .iter()
            .filter(|d| parent(d) == dir && !d.is_empty())
            .map(|d| format!("{}/", d.rsplit('/').next().unwrap_or(d)))
            .chain(
                tree.files
                    .keys()
                    .filter(|f| parent(f) == dir)
                    .map(|f| f.rsplit('/').next().unwrap_or(f).to_string()),
            )
            .collect();
        names.sort();
        Ok(names)
    }

    fn create_dir_all(&mut self, dir: &str) -> io::Result<()> {
        let mut tree = resilient_write(&self.tree);
        let mut current = String::new();
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            tree.dirs.insert(current.clone());
        }
        Ok(())
    }

    fn remove_dir_all(&mut self, dir: &str) -> io::Result<()> {
        let mut tree = resilient_write(&self.tree);
        let prefix = format!("{}/", dir);
        tree.dirs.retain(|d| d != dir && !d.starts_with(&prefix));
        tree.files.retain(|f, _| !f.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOME: &str = "users/alice/home";

    #[test]
    fn test_resolve_relative_to_home() {
        assert_eq!(resolve(HOME, "f.txt").unwrap(), "users/alice/home/f.txt");
        assert_eq!(resolve(HOME, "./a/../f.txt").unwrap(), "users/alice/home/f.txt");
        assert_eq!(resolve(HOME, ".").unwrap(), HOME);
        assert_eq!(resolve(HOME, "../../bob/home/x").unwrap(), "users/bob/home/x");
    }

    #[test]
    fn test_resolve_absolute_forms() {
        assert_eq!(resolve(HOME, "users/bob/home/f").unwrap(), "users/bob/home/f");
        assert_eq!(resolve(HOME, "/users/bob/home/f").unwrap(), "users/bob/home/f");
        assert_eq!(resolve(HOME, "/").unwrap(), "");
    }

    #[test]
    fn test_resolve_rejects_escape() {
        assert_eq!(resolve(HOME, "../../..").unwrap(), "");
        assert!(matches!(resolve(HOME, "../../../.."), Err(CommandError::PathEscapesSandbox)));
        assert!(matches!(resolve(HOME, "../../../../etc/passwd"), Err(CommandError::PathEscapesSandbox)));
        assert!(matches!(resolve(HOME, "/../x"), Err(CommandError::PathEscapesSandbox)));
        assert!(matches!(resolve(HOME, "a\\b"), Err(CommandError::InvalidArgument(_))));
    }

    #[test]
    fn test_resolve_file_rejects_root() {
        assert!(resolve_file(HOME, "../../..").is_err());
        assert!(resolve_file(HOME, "f").is_ok());
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("users/alice/home/f"), "users/alice/home");
        assert_eq!(parent("users"), "");
    }

    fn exercise(ws: &mut dyn Workspace) {
        ws.create_dir_all(HOME).unwrap();
        assert_eq!(ws.write("users/alice/home/f.txt", b"hello").unwrap(), 5);
        assert_eq!(ws.append("users/alice/home/f.txt", b" world").unwrap(), 11);
        assert_eq!(ws.read("users/alice/home/f.txt").unwrap(), b"hello world");

        let err = ws.write("users/alice/nowhere/f.txt", b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(ws.append("users/alice/home/missing", b"x").is_err());

        ws.create_dir_all("users/alice/home/sub").unwrap();
        assert_eq!(ws.list(HOME).unwrap(), vec!["f.txt".to_string(), "sub/".to_string()]);
        assert_eq!(ws.list("users").unwrap(), vec!["alice/".to_string()]);
        let err = ws.list("users/alice/home/f.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        ws.remove_dir_all("users/alice").unwrap();
        assert!(ws.read("users/alice/home/f.txt").is_err());
        assert!(ws.list(HOME).is_err());
        ws.remove_dir_all("users/alice").unwrap();
    }

    #[test]
    fn test_memory_workspace() {
        let mut ws = MemoryWorkspace::new();
        exercise(&mut ws);
    }

    #[test]
    fn test_disk_workspace() {
        let dir = TempDir::new().unwrap();
        let mut ws = DiskWorkspace::open(dir.path()).unwrap();
        exercise(&mut ws);
    }
}
