//! Engine client for CLI communication.
//!
//! One JSON line out, one JSON line in, per connection.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Engine reply envelope.
#[derive(Debug, Deserialize)]
pub struct Reply {
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl Reply {
    /// Whether the engine reported success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Client over the engine's IPC socket.
pub struct EngineClient {
    socket_path: PathBuf,
}

impl EngineClient {
    /// Creates a client for the given socket path.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Sends one command and reads the reply.
    pub async fn call(&self, prog: &str, command: &str, args: Value) -> Result<Reply> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "failed to connect to {} (is the daemon running?)",
                    self.socket_path.display()
                )
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::json!({
            "prog": prog,
            "command": command,
            "args": args,
        })
        .to_string();
        line.push('\n');
        write_half
            .write_all(line.as_bytes())
            .await
            .context("failed to send command")?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        reader
            .read_line(&mut reply)
            .await
            .context("failed to read reply")?;

        serde_json::from_str(&reply).context("failed to parse reply")
    }
}

/// Resolves the socket path: flag, then env, then the runtime directory.
#[must_use]
pub fn resolve_socket(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var(rangebox_constants::env::SOCKET) {
        return PathBuf::from(path);
    }
    std::env::var(rangebox_constants::env::XDG_RUNTIME_DIR).map_or_else(
        |_| PathBuf::from("/tmp").join("rangebox").join("rangeboxd.sock"),
        |dir| PathBuf::from(dir).join("rangebox").join("rangeboxd.sock"),
    )
}
