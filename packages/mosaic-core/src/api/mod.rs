//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to [`crate::catalog`],
//! [`crate::supervisor`], and [`crate::filter_graph`]. It provides the
//! router construction and server startup functionality.

use thiserror::Error;

pub mod http;
pub mod stream;

/// Shared application state for the API layer.
///
/// Unlike the desktop app's `AppState` (which layers service-discovery
/// fields — `services_started`, `mdns_advertiser`, `artwork` — on top of its
/// bootstrapped services), every field a mosaic-cast handler needs already
/// lives on [`crate::bootstrap::BootstrappedServices`], so no separate
/// builder or wrapper struct is needed here.
pub use crate::bootstrap::BootstrappedServices as AppState;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState, port: u16) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("[Server] listening on http://0.0.0.0:{port}");
    let app = http::create_router(state);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
