//! Idle watchdog (component C6).
//!
//! A single background task that periodically inspects runtime state and
//! stops an unwatched encoder or recycles one whose output has grown past
//! the size bound. Grounded in fritztv's idle-cleanup spawn loop
//! (`manager.rs`), generalized from a per-tuner idle check to a single
//! supervised child.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::protocol_constants::WATCHDOG_TICK_SECS;
use crate::state::Mode;
use crate::supervisor::Supervisor;
use crate::utils::now_millis;

/// Runs the watchdog loop until `cancel` is triggered.
pub async fn run(
    supervisor: Arc<Supervisor>,
    idle_timeout: Duration,
    max_stream_size_bytes: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(WATCHDOG_TICK_SECS));

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                log::info!("[Watchdog] shutting down");
                return;
            }
            _ = ticker.tick() => {
                tick(&supervisor, idle_timeout, max_stream_size_bytes).await;
            }
        }
    }
}

async fn tick(supervisor: &Arc<Supervisor>, idle_timeout: Duration, max_stream_size_bytes: u64) {
    if supervisor.mode() != Mode::Live {
        return;
    }

    let viewer_count = supervisor.fanout().viewer_count();
    let idle_for_ms = now_millis().saturating_sub(supervisor.last_activity_ms());

    if viewer_count == 0 && idle_for_ms >= idle_timeout.as_millis() as u64 {
        log::info!(
            "[Watchdog] idle for {idle_for_ms}ms with no viewers, stopping encoder"
        );
        if let Err(e) = supervisor.stop().await {
            log::warn!("[Watchdog] stop() failed: {e}");
        }
        return;
    }

    if supervisor.fanout().bytes_since_start() > max_stream_size_bytes {
        log::info!("[Watchdog] output size bound exceeded, recycling encoder");
        if let Err(e) = supervisor.recycle().await {
            log::warn!("[Watchdog] recycle() failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::FanOut;
    use crate::catalog::{Catalog, CatalogSource};
    use crate::encoder::PROFILES;

    fn make_supervisor() -> Arc<Supervisor> {
        let catalog = Arc::new(Catalog::new(
            CatalogSource::File("/nonexistent".into()),
            reqwest::Client::new(),
        ));
        let profile = PROFILES.iter().find(|p| p.name == "software").unwrap();
        Arc::new(Supervisor::new(
            FanOut::new(),
            catalog,
            profile,
            "definitely-not-a-real-ffmpeg-binary".to_string(),
            500 * 1024 * 1024,
        ))
    }

    #[tokio::test]
    async fn tick_is_a_noop_when_idle() {
        let sup = make_supervisor();
        // mode() starts Idle; tick must not panic or attempt to stop/recycle
        // a nonexistent child.
        tick(&sup, Duration::from_secs(60), 500 * 1024 * 1024).await;
        assert_eq!(sup.mode(), Mode::Idle);
    }
}
