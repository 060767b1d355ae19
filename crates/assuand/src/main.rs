//! assuand - demonstration Assuan keystore server
//!
//! Wires together:
//! - Configuration loading
//! - The keystore protocol profile
//! - The unix socket server, or a single session on stdin/stdout

use anyhow::{Context, Result};
use assuan_config::{load_config_or_default, Settings};
use assuan_ipc::{serve_stdio, Profile, SocketServer};
use assuan_proto::ProtoError;
use assuan_util::default_config_path;
use assuand::KeystoreState;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// assuand - Assuan keystore server
#[derive(Parser, Debug)]
#[command(name = "assuand")]
#[command(about = "Demonstration Assuan keystore server", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/assuand/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set ASSUAN_SOCKET env var)
    #[arg(short, long, env = "ASSUAN_SOCKET")]
    socket: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Serve one session on stdin/stdout instead of a socket
    #[arg(long)]
    stdio: bool,
}

async fn run_stdio(profile: Arc<Profile<KeystoreState>>) -> Result<()> {
    info!("Serving on stdin/stdout");
    match serve_stdio(&profile).await {
        ProtoError::Closed => {
            debug!("Peer closed the channel");
            Ok(())
        }
        // The client may stop reading right after BYE
        ProtoError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            debug!("Peer stopped reading");
            Ok(())
        }
        e => Err(anyhow::Error::from(e).context("Session failed")),
    }
}

async fn run_socket(
    args: &Args,
    settings: &Settings,
    profile: Arc<Profile<KeystoreState>>,
) -> Result<()> {
    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(|| settings.daemon.socket_path.clone());

    let mut server = SocketServer::new(&socket_path);
    if let Some(mode) = settings.daemon.socket_mode {
        server = server.with_mode(mode);
    }
    server
        .start()
        .await
        .with_context(|| format!("Failed to listen on {:?}", socket_path))?;

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

    info!("Service running");

    tokio::select! {
        res = server.run(profile) => {
            res.context("Accepting connections failed")?;
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully");
        }
    }

    info!("Shutting down assuand");
    // Dropping the server removes the socket file
    drop(server);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout may be the protocol channel, so logs go to stderr
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "assuand starting");

    let settings = load_config_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    info!(
        config_path = %args.config.display(),
        info_keys = settings.info.len(),
        "Configuration loaded"
    );

    let profile = Arc::new(assuand::profile(&settings));

    if args.stdio {
        run_stdio(profile).await
    } else {
        run_socket(&args, &settings, profile).await
    }
}
