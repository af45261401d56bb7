// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  movelog: game-move ingestion server
//
//  Data plane: tokio task-per-connection, hand-framed HTTP/1.x
//  Storage:    one append-only CSV-style log file
//  Config:     optional YAML + MOVELOG_ env overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use movelog_core::config::MovelogConfig;
use movelog_ingest::{IngestServer, ShutdownHandle};
use movelog_store::{LogFile, LogFileConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "movelog", version, about = "Append-only ingestion server for game-move logs")]
struct Cli {
    /// Path to configuration file (skipped when absent)
    #[arg(short, long, default_value = "movelog.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Listen address, overrides `server.addr`
    #[arg(long)]
    addr: Option<String>,

    /// Log file path, overrides `log.path`
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Config ──
    let config_path = cli.config.exists().then_some(cli.config.as_path());
    let mut config = MovelogConfig::load(config_path)?;
    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }
    if let Some(path) = cli.log_file {
        config.log.path = path;
    }
    config.validate()?;

    // ── Tracing ──
    movelog_observability::init_tracing(&cli.log_level, config.observability.log_format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "movelog starting");
    match config_path {
        Some(path) => info!(path = %path.display(), "Loaded config file"),
        None => info!("No config file found, using defaults"),
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("movelog-worker")
        .build()?;

    let result = rt.block_on(serve(config));
    if let Err(e) = &result {
        error!(error = %e, "movelog exiting with error");
    }
    result
}

async fn serve(config: MovelogConfig) -> anyhow::Result<()> {
    let log = Arc::new(LogFile::open(LogFileConfig::from(&config.log))?);

    let server = match IngestServer::bind(&config, Arc::clone(&log)).await {
        Ok(server) => server,
        Err(e) => {
            close_quietly(&log);
            return Err(anyhow::anyhow!("failed to bind {}: {e}", config.server.addr));
        }
    };

    // ── Graceful shutdown: SIGTERM/SIGINT trigger the server's own handle ──
    if let Err(e) = spawn_signal_listener(server.shutdown_handle()) {
        close_quietly(&log);
        return Err(e);
    }

    info!(addr = %server.local_addr()?, "movelog is ready, accepting rows");

    if let Err(e) = server.run().await {
        close_quietly(&log);
        return Err(e);
    }

    info!("movelog stopped");
    Ok(())
}

fn close_quietly(log: &LogFile) {
    if let Err(e) = log.close() {
        error!(error = %e, "Failed to close log file");
    }
}

/// Install the signal handlers now so a failure surfaces at startup, then
/// wait for the first signal on a background task.
#[cfg(unix)]
fn spawn_signal_listener(shutdown: ShutdownHandle) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    // SIGTERM (docker stop) + SIGINT (Ctrl+C)
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!(signal = name, "Shutdown signal received, stopping...");
        shutdown.trigger();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(shutdown: ShutdownHandle) -> anyhow::Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(signal = "ctrl-c", "Shutdown signal received, stopping..."),
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c, stopping"),
        }
        shutdown.trigger();
    });
    Ok(())
}
