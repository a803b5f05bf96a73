//! Host IPC over a Unix socket
//!
//! Streaming front-ends and the CLI drive the host's session manager with
//! length-prefixed JSON messages (u32 little-endian length, then payload).

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

mod handler;
mod messages;
pub use handler::{handle_request, spawn_listener};
pub use messages::{HostRequest, HostResponse};

use crate::constants::config::APP_DIR;
use crate::constants::ipc::{MAX_MESSAGE_SIZE, SOCKET_FILENAME};

/// `$XDG_RUNTIME_DIR/display-session/host.sock`, or the cache dir without one
pub fn default_socket_path() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir),
        None => dirs::cache_dir()
            .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?,
    };
    Ok(base.join(APP_DIR).join(SOCKET_FILENAME))
}

/// Connection to a running host
pub struct HostClient {
    stream: UnixStream,
}

impl HostClient {
    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).with_context(|| {
            format!("Failed to connect to display session host at {}", path.display())
        })?;
        Ok(Self { stream })
    }

    pub fn send_request(&mut self, request: &HostRequest) -> Result<()> {
        write_message(&mut self.stream, request)
    }

    /// Blocks until the host answers
    pub fn recv_response(&mut self) -> Result<HostResponse> {
        read_message(&mut self.stream)
    }

    pub fn request(&mut self, request: HostRequest) -> Result<HostResponse> {
        self.send_request(&request)?;
        self.recv_response()
    }
}

/// Listening socket of the host; removes the socket file when dropped
pub struct HostServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl HostServer {
    /// Bind the host socket, owner-only
    ///
    /// A socket file left by a dead host is replaced. One that still
    /// accepts connections belongs to a live host and makes this fail, so
    /// two hosts never drive the same display and state file.
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        match UnixStream::connect(&socket_path) {
            Ok(_) => bail!(
                "Another display session host is already listening at {}",
                socket_path.display()
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %socket_path.display(), error = %e, "Replacing stale host socket");
                std::fs::remove_file(&socket_path)
                    .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
            }
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket at {}", socket_path.display()))?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
            .context("Failed to set socket permissions")?;
        debug!(path = %socket_path.display(), "Host socket bound");

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Blocks until a client connects
    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .context("Failed to accept IPC connection")?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for HostServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

pub(crate) fn write_message<T: Serialize>(stream: &mut UnixStream, message: &T) -> Result<()> {
    let payload = serde_json::to_vec(message).context("Failed to encode IPC message")?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message too large: {} bytes (max: {})",
            payload.len(),
            MAX_MESSAGE_SIZE
        ));
    }

    let len = payload.len() as u32;
    stream
        .write_all(&len.to_le_bytes())
        .context("Failed to write message length")?;
    stream
        .write_all(&payload)
        .context("Failed to write message payload")?;
    stream.flush().context("Failed to flush IPC stream")
}

pub(crate) fn read_message<T: for<'de> Deserialize<'de>>(stream: &mut UnixStream) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Checked before allocating
    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {len} bytes (max: {MAX_MESSAGE_SIZE})"));
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .context("Failed to read message payload")?;
    serde_json::from_slice(&payload).context("Failed to decode IPC message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApplyResult, LaunchSession};

    #[test]
    fn test_message_framing_over_socket_pair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let request = HostRequest::Configure {
            session: LaunchSession {
                client_name: "tv".to_string(),
                width: 1920,
                height: 1080,
                fps: 60,
                enable_hdr: true,
            },
            config: None,
        };

        write_message(&mut a, &request).unwrap();
        let received: HostRequest = read_message(&mut b).unwrap();
        assert_eq!(received, request);

        write_message(&mut b, &HostResponse::Applied(ApplyResult::Applied)).unwrap();
        let response: HostResponse = read_message(&mut a).unwrap();
        assert_eq!(response, HostResponse::Applied(ApplyResult::Applied));
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(&((MAX_MESSAGE_SIZE as u32) + 1).to_le_bytes()).unwrap();

        let err = read_message::<HostRequest>(&mut b).unwrap_err();
        assert!(err.to_string().contains("Message too large"));
    }

    #[test]
    fn test_bind_refuses_socket_of_live_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.sock");
        let first = HostServer::bind_to(path.clone()).unwrap();

        let err = HostServer::bind_to(path.clone()).err().unwrap();

        assert!(err.to_string().contains("already listening"));
        assert!(path.exists());
        let mut client = HostClient::connect_to(&path).unwrap();
        // The refused bind's own connection attempt is queued first
        let _bind_check = first.accept().unwrap();
        let mut accepted = first.accept().unwrap();
        client.send_request(&HostRequest::Ping).unwrap();
        assert_eq!(read_message::<HostRequest>(&mut accepted).unwrap(), HostRequest::Ping);
    }

    #[test]
    fn test_bind_replaces_stale_socket_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("host.sock");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        // Socket file whose listener is gone
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let server = HostServer::bind_to(path.clone()).unwrap();
        assert_eq!(server.path(), path);
        drop(server);

        assert!(!path.exists());
    }
}
