// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server configuration.
//!
//! Stored as JSON at `~/.markfs/config.json`. Every field has a default, so a
//! missing file or a partial file both load. Command-line flags override the
//! loaded values.
//!
//! Layout under `data_dir`:
//!
//! ```text
//! data_dir/
//!   db/        identity, group and file records
//!   audits/    <nick>.log per audited identity
//!   fs/        sandbox root (users/<nick>/home)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::processor::{ProcessorConfig, DEFAULT_AUDIT_RETENTION, DEFAULT_BASELINE_MARK};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to. Loopback by default; "0.0.0.0" exposes the server to the network.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root of all persisted state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Mark of new files, built-in groups and identities registered without one.
    #[serde(default = "default_baseline_mark")]
    pub baseline_mark: u32,
    /// Capacity of the command queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Lines kept by `watch` when no retention is given.
    #[serde(default = "default_audit_retention")]
    pub default_audit_retention: u32,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_data_dir() -> PathBuf {
    config_dir()
        .map(|dir| dir.join("data"))
        .unwrap_or_else(|| PathBuf::from("markfs-data"))
}

fn default_baseline_mark() -> u32 {
    DEFAULT_BASELINE_MARK
}

fn default_queue_capacity() -> usize {
    64
}

fn default_audit_retention() -> u32 {
    DEFAULT_AUDIT_RETENTION
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            data_dir: default_data_dir(),
            baseline_mark: default_baseline_mark(),
            queue_capacity: default_queue_capacity(),
            default_audit_retention: default_audit_retention(),
        }
    }
}

impl ServerConfig {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audits")
    }

    pub fn fs_dir(&self) -> PathBuf {
        self.data_dir.join("fs")
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            baseline_mark: self.baseline_mark,
            default_audit_retention: self.default_audit_retention,
        }
    }
}

/// `~/.markfs`, if a home directory is known.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".markfs"))
}

/// `~/.markfs/config.json`.
pub fn default_config_path() -> Result<PathBuf> {
    config_dir()
        .map(|dir| dir.join("config.json"))
        .context("Could not find home directory")
}

/// Load the configuration at `path`, or defaults if it does not exist.
pub fn load_config(path: &Path) -> Result<ServerConfig> {
    if !path.exists() {
        return Ok(ServerConfig::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.baseline_mark, 50);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"port": 9000, "data_dir": "/srv/markfs"}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.db_dir(), PathBuf::from("/srv/markfs/db"));
        assert_eq!(config.audit_dir(), PathBuf::from("/srv/markfs/audits"));
        assert_eq!(config.default_audit_retention, 100);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = ServerConfig::default().with_data_dir(dir.path());
        config.baseline_mark = 30;

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_config(&path).is_err());
    }
}
