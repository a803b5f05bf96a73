#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use tracing::{Level as TraceLevel, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use display_session::config::HostConfig;
use display_session::constants::config::LOG_LEVEL_ENV;
use display_session::ipc::{self, HostClient, HostRequest, HostResponse, HostServer};
use display_session::{CommandEngine, DisplayConfig, FileStore, LaunchSession, SessionManager};

#[derive(Parser)]
#[command(name = "display-session", version, about = "Display configuration host for streaming sessions")]
struct Cli {
    /// Host config file (default: <config dir>/display-session/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the host: recover from a previous crash, then serve requests
    Run,
    /// Prepare the display for a session described by a JSON file
    Configure {
        /// LaunchSession JSON
        session: PathBuf,
        /// DisplayConfig JSON overriding the host's display settings
        #[arg(long)]
        display: Option<PathBuf>,
    },
    /// Put back the display configuration owed from the last session
    Restore,
    /// Forget the persisted display state without touching the display
    Reset,
    /// Show the session phase
    Status,
    /// Check that the host is running
    Ping,
    /// Ask the host to restore and exit
    Shutdown,
}

fn init_logging(config_level: &str) -> Result<()> {
    // LOG_LEVEL wins over the config file
    let log_level = match std::env::var(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| config_level.to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

fn socket_path(config: &HostConfig) -> Result<PathBuf> {
    match &config.socket_path {
        Some(path) => Ok(path.clone()),
        None => ipc::default_socket_path(),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse JSON from {}", path.display()))
}

fn run_host(config: HostConfig) -> Result<()> {
    let state_file = config.state_file();
    info!(state_file = %state_file.display(), helper = %config.engine.helper.display(), "Starting display session host");

    let engine = CommandEngine::new(config.engine.helper.clone(), config.engine.timeout());
    let manager = Arc::new(
        SessionManager::new(engine, FileStore::new(state_file), config.retry)
            .context("Failed to create session manager")?,
    );

    // Crash recovery runs before any client can connect
    let guard = manager.init().context("Crash recovery failed")?;

    let socket_path = socket_path(&config)?;
    let server = HostServer::bind_to(socket_path.clone())?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP]).context("Failed to register signal handlers")?;
    let signal_tx = shutdown_tx.clone();
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(signal, "Received signal, shutting down");
            let _ = signal_tx.send(());
        }
    });

    let _listener = ipc::spawn_listener(server, Arc::clone(&manager), config.display.clone(), shutdown_tx);
    info!(socket = %socket_path.display(), phase = %manager.phase(), "Display session host ready");

    if shutdown_rx.recv().is_err() {
        warn!("Shutdown channel closed unexpectedly");
    }

    // No new clients from here on; requests already queued on the session
    // lock are refused once the guard's final restore has run
    let _ = fs::remove_file(&socket_path);
    drop(guard);
    info!("Display session host stopped");
    Ok(())
}

fn run_client(config: &HostConfig, request: HostRequest) -> Result<()> {
    let path = socket_path(config)?;
    let mut client = HostClient::connect_to(&path)?;

    match client.request(request)? {
        HostResponse::Applied(result) => {
            println!("{result}");
            if !result.is_ok() {
                bail!("Display configuration failed, the session should not start");
            }
        }
        HostResponse::Done => println!("ok"),
        HostResponse::Status(phase) => println!("{phase}"),
        HostResponse::Pong => println!("pong"),
        HostResponse::Error(message) => bail!("Host reported an error: {message}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HostConfig::load_from(path)?,
        None => HostConfig::load()?,
    };
    init_logging(&config.log_level)?;

    let request = match cli.command {
        Command::Run => {
            return run_host(config).inspect_err(|e| error!(error = ?e, "Display session host failed"));
        }
        Command::Configure { session, display } => {
            let session: LaunchSession = read_json(&session)?;
            let config = display
                .map(|path| read_json::<DisplayConfig>(&path))
                .transpose()?;
            HostRequest::Configure { session, config }
        }
        Command::Restore => HostRequest::Restore,
        Command::Reset => HostRequest::ResetPersistence,
        Command::Status => HostRequest::Status,
        Command::Ping => HostRequest::Ping,
        Command::Shutdown => HostRequest::Shutdown,
    };

    run_client(&config, request)
}
