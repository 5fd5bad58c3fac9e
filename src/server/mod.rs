// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! TCP server
//!
//! Line-oriented text protocol. Each connection gets a reader task that
//! tokenizes lines into commands and a writer task that sends replies back.
//! All commands go through one bounded queue to the processor, which runs on
//! a blocking thread.
//!
//! Replies are single lines prefixed `"> "` on success or `"Error: "` on
//! failure (multi-line bodies such as `read` output follow the prefix).
//!
//! # Example
//!
//! ```no_run
//! use markfs::config::ServerConfig;
//! use markfs::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = Server::new(ServerConfig::default());
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::audit::{AuditLog, FileAuditLog};
use crate::command::{parse_line, unknown_command, Envelope, Parsed};
use crate::config::ServerConfig;
use crate::processor::Processor;
use crate::session::{LogoutReason, Outbound, SessionId};
use crate::store::{FileStore, KvStore};
use crate::vfs::{DiskWorkspace, Workspace};

/// Processor over on-disk state.
pub type DiskProcessor = Processor<FileStore, DiskWorkspace, FileAuditLog>;

/// Open the on-disk state under `config.data_dir` and prepare it for serving.
pub fn open_processor(config: &ServerConfig) -> Result<DiskProcessor> {
    let store = FileStore::open(config.db_dir())
        .with_context(|| format!("Failed to open record store in {}", config.db_dir().display()))?;
    let workspace = DiskWorkspace::open(config.fs_dir())
        .with_context(|| format!("Failed to open sandbox in {}", config.fs_dir().display()))?;
    let audit = FileAuditLog::open(config.audit_dir())
        .with_context(|| format!("Failed to open audit directory {}", config.audit_dir().display()))?;

    let mut processor = Processor::new(store, workspace, audit, config.processor_config());
    processor
        .bootstrap()
        .context("Failed to prepare persisted state")?;
    Ok(processor)
}

/// The markfs server.
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind, serve until SIGINT/SIGTERM, then shut down cleanly.
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr();

        if self.config.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes it to the network. \
                There is no transport encryption."
            );
        }

        TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. Stop the other instance or pick another port with --port",
                    self.config.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })
    }

    /// Serve on `listener` until `shutdown` completes.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let processor = open_processor(&self.config)?;
        run(listener, processor, self.config.queue_capacity, shutdown).await?;
        Ok(())
    }
}

/// Accept connections and feed `processor` until `shutdown` completes.
///
/// On shutdown the listener stops accepting, `Shutdown` is queued, and the
/// processor drains the queue and logs every session out. The processor is
/// returned once it has stopped.
pub async fn run<S, W, A, F>(
    listener: TcpListener,
    processor: Processor<S, W, A>,
    queue_capacity: usize,
    shutdown: F,
) -> Result<Processor<S, W, A>>
where
    S: KvStore + 'static,
    W: Workspace + 'static,
    A: AuditLog + 'static,
    F: Future<Output = ()>,
{
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let worker = tokio::task::spawn_blocking(move || processor.run_blocking(rx));

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("SERVER_LISTENING | addr={}", addr);
    }

    tokio::pin!(shutdown);
    let mut next_id = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_id += 1;
                    tokio::spawn(handle_connection(stream, peer, SessionId::new(next_id), tx.clone()));
                }
                Err(e) => tracing::warn!("ACCEPT_FAILED | error={}", e),
            },
        }
    }

    tracing::info!("SHUTDOWN_REQUESTED | connections_served={}", next_id);
    drop(listener);
    // An error here means the processor already stopped.
    let _ = tx.send(Envelope::Shutdown).await;
    drop(tx);

    worker.await.context("Processor task panicked")
}

/// Serve one connection until EOF, a read error, or the processor closes it.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, id: SessionId, tx: mpsc::Sender<Envelope>) {
    let (reader, writer) = stream.into_split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();

    let connect = Envelope::Connect {
        session: id,
        peer: peer.to_string(),
        outbound: out_tx.clone(),
    };
    if tx.send(connect).await.is_err() {
        return;
    }

    let mut writer_task = tokio::spawn(write_replies(writer, out_rx, id));

    let mut lines = BufReader::new(reader).lines();
    let mut writer_done = false;
    let reason = loop {
        tokio::select! {
            closed = &mut writer_task => {
                writer_done = true;
                break writer_exit_reason(closed.unwrap_or(false));
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(id, &line) {
                    Parsed::Empty => {}
                    Parsed::Unknown(word) => {
                        let _ = out_tx.send(Outbound::Line(unknown_command(&word)));
                    }
                    Parsed::Command(cmd) => {
                        if tx.send(Envelope::Execute(cmd)).await.is_err() {
                            break LogoutReason::Shutdown;
                        }
                    }
                },
                Ok(None) => break LogoutReason::ConnectionLost,
                Err(e) => {
                    tracing::debug!("CONNECTION_READ_FAILED | session={} error={}", id, e);
                    break LogoutReason::ConnectionLost;
                }
            },
        }
    };

    let _ = tx.send(Envelope::Disconnect { session: id, reason }).await;
    drop(out_tx);
    if !writer_done {
        let _ = writer_task.await;
    }
}

/// Forward outbound messages to `writer` until `Close`, a write error, or the
/// processor dropping the session. Returns true only for `Close`.
async fn write_replies<W>(mut writer: W, mut out_rx: mpsc::UnboundedReceiver<Outbound>, id: SessionId) -> bool
where
    W: AsyncWrite + Unpin,
{
    let mut closed = false;
    while let Some(message) = out_rx.recv().await {
        match message {
            Outbound::Line(mut line) => {
                line.push('\n');
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    tracing::debug!("CONNECTION_WRITE_FAILED | session={} error={}", id, e);
                    break;
                }
            }
            Outbound::Close => {
                closed = true;
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
    closed
}

/// Logout reason once the writer has stopped on its own.
fn writer_exit_reason(closed_by_processor: bool) -> LogoutReason {
    if closed_by_processor {
        LogoutReason::Quit
    } else {
        LogoutReason::ConnectionLost
    }
}

/// Waits for SIGINT/SIGTERM (Ctrl+C only on non-Unix platforms).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to install signal handlers: {}", e);
                std::future::pending::<()>().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }
}
