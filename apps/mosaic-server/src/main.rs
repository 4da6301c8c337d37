//! Mosaic Server — the standalone binary for the Mosaic Cast IPTV
//! compositor.
//!
//! Loads configuration from the environment (§6), bootstraps the core
//! services, and serves the HTTP API until a shutdown signal arrives.

use anyhow::{Context, Result};
use clap::Parser;
use mosaic_core::config::AppConfig;
use mosaic_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

/// Mosaic Cast — IPTV multi-stream compositor server.
#[derive(Parser, Debug)]
#[command(name = "mosaic-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "MOSAIC_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides the `PORT` environment variable).
    #[arg(short = 'p', long, env = "MOSAIC_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Mosaic Cast v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::from_env().map_err(anyhow::Error::msg)?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let services = bootstrap_services(&config)
        .await
        .map_err(anyhow::Error::msg)
        .context("failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let server_state: AppState = services.clone();
    let port = config.port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_state, port).await {
            log::error!("Server error: {e}");
        }
    });

    log::info!("HTTP server started on port {port}");

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
