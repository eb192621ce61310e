use anyhow::{Context, Result};
use clap::Parser;
use rangebox_core::runtime::DockerRuntime;
use rangebox_core::DaemonConfig;
use rangebox_daemon::{run_worker, CommandServer, Dispatcher};
use rangebox_events::EventPublisher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Commands queued ahead of processing before connections start blocking.
const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "rangeboxd")]
#[command(author, version, about, long_about = None)]
pub struct DaemonArgs {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/rangebox/rangeboxd.sock).
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Data directory for Rangebox.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Configuration file overriding the default lookup.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(rangebox_constants::env::LOG)
                .unwrap_or_else(|_| "rangebox_daemon=info,rangebox_fleet=info,rangebox_core=info,rangebox_events=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(DaemonArgs::parse()).await
}

async fn run(args: DaemonArgs) -> Result<()> {
    info!("Starting Rangebox daemon...");

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from(path).context("Failed to load configuration")?,
        None => DaemonConfig::load().context("Failed to load configuration")?,
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    std::fs::create_dir_all(&config.data_dir).context("Failed to create data directory")?;
    let pid_file = config.data_dir.join("rangeboxd.pid");
    std::fs::write(&pid_file, format!("{}\n", std::process::id()))
        .context("Failed to write daemon PID file")?;

    let runtime = Arc::new(
        DockerRuntime::connect()
            .await
            .context("Failed to reach the container engine")?,
    );

    let publisher = if config.events.enabled {
        EventPublisher::connect(&config.events.redis_url).await
    } else {
        EventPublisher::disabled()
    };

    let dispatcher = Arc::new(
        Dispatcher::new(runtime, Arc::new(publisher), config.data_dir.clone())
            .context("Failed to load fleet controllers")?,
    );
    dispatcher.push_watch_list().await;

    let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);

    let worker_handle = tokio::spawn(run_worker(queue_rx, Arc::clone(&dispatcher)));

    let monitor_handle = dispatcher.spawn_monitor(
        queue_tx.clone(),
        Duration::from_secs(config.monitor.poll_interval_secs),
    );

    let server = CommandServer::new(
        config.socket_path.clone(),
        Duration::from_secs(config.server.read_timeout_secs),
    );
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(queue_tx).await {
            tracing::error!("Command server error: {e:#}");
        }
    });

    info!(
        socket = %config.socket_path.display(),
        data_dir = %config.data_dir.display(),
        "Rangebox daemon started"
    );

    shutdown_signal().await;
    info!("Shutdown signal received");

    info!("Shutting down...");
    monitor_handle.stop().await;
    server_handle.abort();
    worker_handle.abort();

    for path in [&config.socket_path, &pid_file] {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    info!("Rangebox daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
