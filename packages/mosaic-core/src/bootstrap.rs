//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root — the single place where all
//! services are instantiated and wired together, in the dependency order
//! from §2 (leaves first): catalog, encoder profile, supervisor, watchdog.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::encoder::{self, EncoderProfile};
use crate::runtime::TokioSpawner;
use crate::supervisor::Supervisor;

const HTTP_CLIENT_TIMEOUT_SECS: u64 = 10;

/// Container for all bootstrapped services, consumed by [`crate::api::AppState`].
#[derive(Clone)]
pub struct BootstrappedServices {
    pub catalog: Arc<Catalog>,
    pub supervisor: Arc<Supervisor>,
    pub encoder_profile: &'static EncoderProfile,
    pub encoder_preference: String,
    pub spawner: TokioSpawner,
    pub cancel_token: CancellationToken,
    pub idle_timeout: Duration,
    pub max_stream_size_bytes: u64,
    /// Shared client used for the M3U fetch and the `/api/proxy-image` passthrough.
    pub http_client: Client,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown: cancels the watchdog and stops any
    /// running encoder child so connected viewers are disconnected cleanly.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] beginning graceful shutdown");
        self.cancel_token.cancel();
        if let Err(e) = self.supervisor.stop().await {
            log::warn!("[Bootstrap] error stopping encoder during shutdown: {e}");
        }
        log::info!("[Bootstrap] shutdown complete");
    }
}

fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
        .build()
        .expect("failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order (leaves first, per §2):
/// 1. Shared HTTP client and cancellation token.
/// 2. M3U catalog (C1) — loaded once synchronously so the server never
///    serves an empty `/api/channels` response on startup.
/// 3. Encoder profile (C2) — probed once, immutable thereafter.
/// 4. Subprocess supervisor (C4), which owns the broadcast fan-out (C5)
///    internally.
/// 5. Idle watchdog (C6), spawned as a background task.
///
/// # Errors
///
/// Returns an error string if the initial catalog load fails. A failed
/// initial load is fatal at startup (unlike a failed *refresh*, which
/// leaves the prior catalog intact per §4.1) since there is no prior
/// catalog to fall back to.
pub async fn bootstrap_services(config: &AppConfig) -> Result<BootstrappedServices, String> {
    let http_client = create_http_client();
    let cancel_token = CancellationToken::new();
    let spawner = TokioSpawner::current();

    let catalog = Arc::new(Catalog::new(config.m3u_source.clone(), http_client.clone()));
    catalog.load().await.map_err(|e| e.to_string())?;

    let profile = encoder::select_profile(&config.ffmpeg_binary, &config.encoder_preference).await;
    log::info!("[Bootstrap] selected encoder profile: {}", profile.name);

    let fanout = crate::broadcast::FanOut::new();
    let supervisor = Arc::new(Supervisor::new(
        fanout,
        Arc::clone(&catalog),
        profile,
        config.ffmpeg_binary.clone(),
        config.max_stream_size_bytes,
    ));

    spawner.spawn(crate::watchdog::run(
        Arc::clone(&supervisor),
        config.idle_timeout,
        config.max_stream_size_bytes,
        cancel_token.clone(),
    ));

    Ok(BootstrappedServices {
        catalog,
        supervisor,
        encoder_profile: profile,
        encoder_preference: config.encoder_preference.clone(),
        spawner,
        cancel_token,
        idle_timeout: config.idle_timeout,
        max_stream_size_bytes: config.max_stream_size_bytes,
        http_client,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_client_has_timeout() {
        let client = create_http_client();
        assert!(client.get("http://example.com").build().is_ok());
    }
}
