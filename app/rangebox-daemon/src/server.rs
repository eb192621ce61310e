//! IPC command server.
//!
//! One newline-terminated JSON command per connection, one JSON reply,
//! close. Connection tasks only read and enqueue; all processing happens on
//! the single worker draining the queue, which gives commands a strict FIFO
//! order across every client.

use crate::protocol::ResultEnvelope;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

/// One enqueued request line awaiting processing.
pub struct WorkItem {
    /// Raw request line as read from the client.
    pub line: String,
    /// Channel the worker answers on.
    pub reply: oneshot::Sender<ResultEnvelope>,
}

/// Sending side of the engine's command queue.
pub type CommandSender = mpsc::Sender<WorkItem>;

struct SocketCleanup(PathBuf);

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "failed to remove socket");
            }
        }
    }
}

/// Accept loop over the IPC socket.
pub struct CommandServer {
    socket_path: PathBuf,
    read_timeout: Duration,
}

impl CommandServer {
    /// Creates a server bound later by [`run`](Self::run).
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>, read_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            read_timeout,
        }
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and serves connections until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn run(&self, queue: CommandSender) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create socket dir {}", parent.display()))?;
        }
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("bind socket {}", self.socket_path.display()))?;
        let _cleanup = SocketCleanup(self.socket_path.clone());

        tracing::info!(socket = %self.socket_path.display(), "command server listening");

        loop {
            let (stream, _) = listener.accept().await.context("accept connection")?;
            let queue = queue.clone();
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                handle_connection(stream, queue, read_timeout).await;
            });
        }
    }
}

async fn handle_connection(stream: UnixStream, queue: CommandSender, read_timeout: Duration) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    match tokio::time::timeout(read_timeout, reader.read_line(&mut line)).await {
        Err(_) => {
            tracing::debug!("connection read timed out, dropping");
            return;
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "connection read failed, dropping");
            return;
        }
        Ok(Ok(0)) => return,
        Ok(Ok(_)) => {}
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    if queue
        .send(WorkItem {
            line,
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        tracing::warn!("command queue closed, dropping connection");
        return;
    }

    let Ok(envelope) = reply_rx.await else {
        // Worker dropped the reply; nothing sensible to send.
        return;
    };

    let mut payload = match serde_json::to_string(&envelope) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response envelope");
            return;
        }
    };
    payload.push('\n');

    if let Err(e) = write_half.write_all(payload.as_bytes()).await {
        tracing::debug!(error = %e, "client disconnected before reply");
        return;
    }
    let _ = write_half.shutdown().await;
}
