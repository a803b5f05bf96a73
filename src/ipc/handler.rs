//! IPC request handling for the host process

use anyhow::{Context, Result};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{HostRequest, HostResponse, HostServer, read_message, write_message};
use crate::session::SessionManager;
use crate::types::DisplayConfig;

/// Run one request against the session manager
///
/// Returns the response and whether the host should shut down.
pub fn handle_request(
    manager: &SessionManager,
    display: &DisplayConfig,
    request: HostRequest,
) -> (HostResponse, bool) {
    match request {
        HostRequest::Configure { session, config } => {
            let config = config.as_ref().unwrap_or(display);
            let response = match manager.configure_display(config, &session) {
                Ok(result) => HostResponse::Applied(result),
                Err(e) => {
                    error!(error = %e, client = %session.client_name, "Configure request failed");
                    HostResponse::Error(e.to_string())
                }
            };
            (response, false)
        }
        HostRequest::Restore => (done_or_error(manager.restore_state()), false),
        HostRequest::ResetPersistence => (done_or_error(manager.reset_persistence()), false),
        HostRequest::Status => (HostResponse::Status(manager.phase()), false),
        HostRequest::Ping => (HostResponse::Pong, false),
        HostRequest::Shutdown => {
            info!("Shutdown requested over IPC");
            (HostResponse::Done, true)
        }
    }
}

fn done_or_error(result: crate::error::SessionResult<()>) -> HostResponse {
    match result {
        Ok(()) => HostResponse::Done,
        Err(e) => {
            error!(error = %e, "Request failed");
            HostResponse::Error(e.to_string())
        }
    }
}

/// Spawn IPC listener thread; every connection gets its own thread and
/// the session manager serializes whatever they ask for
pub fn spawn_listener(
    server: HostServer,
    manager: Arc<SessionManager>,
    display: DisplayConfig,
    shutdown_tx: mpsc::Sender<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = run_ipc_loop(&server, &manager, &display, &shutdown_tx) {
            error!(error = ?e, "IPC listener thread crashed");
        }
    })
}

fn run_ipc_loop(
    server: &HostServer,
    manager: &Arc<SessionManager>,
    display: &DisplayConfig,
    shutdown_tx: &mpsc::Sender<()>,
) -> Result<()> {
    info!(socket = ?server.path(), "IPC listener started");

    loop {
        let stream = server
            .accept()
            .context("Failed to accept IPC connection")?;

        let manager = Arc::clone(manager);
        let display = display.clone();
        let shutdown_tx = shutdown_tx.clone();
        std::thread::spawn(move || {
            if let Err(e) = serve_client(stream, &manager, &display, &shutdown_tx) {
                warn!(error = %e, "IPC client connection ended with error");
            }
        });
    }
}

fn serve_client(
    mut stream: UnixStream,
    manager: &SessionManager,
    display: &DisplayConfig,
    shutdown_tx: &mpsc::Sender<()>,
) -> Result<()> {
    debug!("IPC client connected");
    loop {
        let request: HostRequest = match read_message(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                // EOF: client closed the connection
                if e
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::UnexpectedEof)
                {
                    debug!("IPC client disconnected");
                    return Ok(());
                }
                return Err(e);
            }
        };

        debug!(?request, "Received IPC request");
        let (response, shutdown) = handle_request(manager, display, request);
        write_message(&mut stream, &response)?;

        if shutdown {
            let _ = shutdown_tx.send(());
            return Ok(());
        }
    }
}
