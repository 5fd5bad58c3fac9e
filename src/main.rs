// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! markfs command-line entry point.
//!
//! ```text
//! markfs serve [--port N] [--bind ADDR]
//! markfs admin add <nick> <password> [--mark N] [--admin] [--audit-role]
//! markfs admin reset
//! markfs audit <nick>
//! markfs init
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use markfs::audit::{AuditLog, FileAuditLog};
use markfs::config::{default_config_path, load_config, save_config, ServerConfig};
use markfs::identity::{IdentityStore, User};
use markfs::security::is_valid_name;
use markfs::server::Server;
use markfs::store::FileStore;
use markfs::vfs::{self, DiskWorkspace, Workspace};

/// Multi-user virtual filesystem server with mark-based access control
#[derive(Parser, Debug)]
#[command(name = "markfs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.markfs/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the server until Ctrl+C
    ///
    /// Examples:
    ///   markfs serve
    ///   markfs serve --port 9000 --bind 0.0.0.0
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind to (default 127.0.0.1)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Manage identities offline (the server must not be running)
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },

    /// Print the audit log of an identity
    Audit {
        nick: String,
    },

    /// Write the effective configuration to the config file
    Init,
}

#[derive(Subcommand, Debug)]
enum AdminAction {
    /// Create an identity, e.g. the first admin
    ///
    /// Examples:
    ///   markfs admin add root s3cret --admin --audit-role
    Add {
        nick: String,
        password: String,
        /// Stored clearance mark (default: baseline mark)
        #[arg(long)]
        mark: Option<u32>,
        #[arg(long)]
        admin: bool,
        /// Allow toggling audit logs of other identities
        #[arg(long)]
        audit_role: bool,
    },

    /// Clear login flags left behind by a crash
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = load_config(&config_path)?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }

    match cli.command {
        Commands::Serve { port, bind } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            tracing::info!(
                "markfs starting | bind={} data_dir={}",
                config.bind_addr(),
                config.data_dir.display()
            );
            Server::new(config).start().await
        }
        Commands::Admin { action } => run_admin(&config, action),
        Commands::Audit { nick } => {
            let log = FileAuditLog::open(config.audit_dir())?;
            for line in log.read_lines(&nick)? {
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Init => {
            save_config(&config_path, &config)?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
    }
}

fn run_admin(config: &ServerConfig, action: AdminAction) -> Result<()> {
    let mut store = FileStore::open(config.db_dir())
        .context("Failed to open the record store (is the server running?)")?;

    match action {
        AdminAction::Add {
            nick,
            password,
            mark,
            admin,
            audit_role,
        } => {
            if !is_valid_name(&nick) {
                bail!("Invalid nick '{}': use 1-32 letters, digits, '_', '.' or '-'", nick);
            }
            let mut users = IdentityStore::new(&mut store);
            if users.exists(&nick)? {
                bail!("User '{}' already exists", nick);
            }

            let user = User::new(&nick, &password, mark.unwrap_or(config.baseline_mark))
                .with_admin(admin)
                .with_audit_role(audit_role);
            users.put(&user)?;

            let mut workspace = DiskWorkspace::open(config.fs_dir())?;
            workspace.create_dir_all(&vfs::home_dir(&nick))?;

            println!("Added {}", user);
        }
        AdminAction::Reset => {
            let cleared = IdentityStore::new(&mut store).clear_active_flags()?;
            println!("Cleared {} stale login flag(s)", cleared.len());
        }
    }
    Ok(())
}
