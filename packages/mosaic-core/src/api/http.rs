//! HTTP route handlers.
//!
//! All handlers are thin — they delegate to [`crate::catalog`],
//! [`crate::supervisor`], and [`crate::state`] for business logic. Grounded
//! in the desktop app's `create_router`/handler layout (`api/http.rs`),
//! narrowed from the Sonos speaker-control surface to the channel/layout/
//! control surface of §6.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::protocol_constants::SERVICE_ID;
use crate::state::{Channel, CustomSlot, LayoutConfig, LayoutKind, Mode};
use crate::utils::{clamp_volume, now_millis};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/channels", get(list_channels))
        .route("/api/channels/refresh", post(refresh_channels))
        .route("/api/proxy-image", get(proxy_image))
        .route("/api/layout/set", post(set_layout))
        .route("/api/layout/current", get(get_current_layout))
        .route("/api/layout/swap-audio", post(swap_audio))
        .route("/api/audio/volume", post(set_volume))
        .route("/api/audio/volumes", get(list_volumes))
        .route("/control/status", get(control_status))
        .route("/control/stop", get(control_stop))
        .route("/stream", get(crate::api::stream::stream_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe: "Is the process running?"
async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": SERVICE_ID }))
}

#[derive(Serialize)]
struct ChannelsResponse {
    channels: Vec<Channel>,
    count: usize,
}

async fn list_channels(State(state): State<AppState>) -> Json<ChannelsResponse> {
    let channels = state.catalog.list();
    Json(ChannelsResponse {
        count: channels.len(),
        channels,
    })
}

/// Triggers a catalog reload from the configured M3U source. On transport
/// failure the prior catalog is left intact (§4.1) and the error surfaces
/// as `catalog_unavailable`.
async fn refresh_channels(State(state): State<AppState>) -> AppResult<Json<ChannelsResponse>> {
    state.catalog.load().await?;
    let channels = state.catalog.list();
    Ok(Json(ChannelsResponse {
        count: channels.len(),
        channels,
    }))
}

#[derive(Deserialize)]
struct ProxyImageQuery {
    url: String,
}

/// Pass-through image fetch helper, so the control UI can load channel logos
/// without the browser needing direct network access to each IPTV source.
async fn proxy_image(
    State(state): State<AppState>,
    Query(query): Query<ProxyImageQuery>,
) -> AppResult<Response> {
    let upstream = state
        .http_client
        .get(&query.url)
        .send()
        .await
        .map_err(|e| AppError::SourceUnavailable(e.to_string()))?
        .error_for_status()
        .map_err(|e| AppError::SourceUnavailable(e.to_string()))?;

    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| AppError::SourceUnavailable(e.to_string()))?;

    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(axum::body::Body::from(bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

#[derive(Deserialize)]
struct LayoutSetRequest {
    layout: LayoutKind,
    streams: BTreeMap<String, String>,
    audio_source: String,
    #[serde(default)]
    custom_slots: Option<Vec<CustomSlot>>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

/// Applies (or optimistically replaces) a layout. Validation and channel
/// resolution happen inside [`crate::supervisor::Supervisor::apply_layout`];
/// a failure here never disturbs a running child (§8 invariant 8).
///
/// A fresh layout has no prior volume mix to inherit, so the chosen
/// `audio_source` slot starts at full volume — otherwise `filter_graph`'s
/// "no entry means silent" default (§4.3) would mute the very slot the
/// caller just asked to hear.
async fn set_layout(
    State(state): State<AppState>,
    Json(req): Json<LayoutSetRequest>,
) -> AppResult<Json<StatusResponse>> {
    let mut per_slot_volume = BTreeMap::new();
    per_slot_volume.insert(req.audio_source.clone(), 1.0);
    let layout = LayoutConfig {
        kind: req.layout,
        slot_to_channel: req.streams,
        audio_slot: req.audio_source,
        per_slot_volume,
        custom_slots: req.custom_slots,
    };
    state.supervisor.apply_layout(layout).await?;
    state.supervisor.mark_activity();
    Ok(Json(StatusResponse { status: "ok" }))
}

async fn get_current_layout(State(state): State<AppState>) -> AppResult<Json<LayoutConfig>> {
    let layout = state
        .supervisor
        .current_layout()
        .await
        .ok_or_else(|| AppError::NotFound("no layout is currently applied".into()))?;
    Ok(Json(layout))
}

#[derive(Deserialize)]
struct SwapAudioRequest {
    audio_source: String,
}

/// Equivalent to a layout-set that changes only `audio_source`, reusing the
/// rest of the current layout's slot assignments and volumes. If the newly
/// chosen slot has never had a volume recorded, it defaults to full volume
/// for the same reason `set_layout` does — a slot nobody has ever muted or
/// turned down shouldn't come up silent just because it was the video-only
/// slot a moment ago.
async fn swap_audio(
    State(state): State<AppState>,
    Json(req): Json<SwapAudioRequest>,
) -> AppResult<Json<StatusResponse>> {
    let mut layout = state
        .supervisor
        .current_layout()
        .await
        .ok_or_else(|| AppError::NotFound("no layout is currently applied".into()))?;
    layout.audio_slot = req.audio_source.clone();
    layout.per_slot_volume.entry(req.audio_source).or_insert(1.0);
    state.supervisor.apply_layout(layout).await?;
    state.supervisor.mark_activity();
    Ok(Json(StatusResponse { status: "ok" }))
}

#[derive(Deserialize)]
struct VolumeRequest {
    slot_id: String,
    volume: f32,
}

#[derive(Serialize)]
struct VolumeResponse {
    status: &'static str,
    slot_id: String,
    volume: f32,
}

/// Clamps the requested volume to `[0, 1]` and triggers an optimistic
/// filter-graph replace (§9 open question (a): no separate live-volume
/// control channel — this is the recompile-and-replace substitute).
async fn set_volume(
    State(state): State<AppState>,
    Json(req): Json<VolumeRequest>,
) -> AppResult<Json<VolumeResponse>> {
    let mut layout = state
        .supervisor
        .current_layout()
        .await
        .ok_or_else(|| AppError::NotFound("no layout is currently applied".into()))?;
    if !layout.slot_to_channel.contains_key(&req.slot_id) {
        return Err(AppError::BadLayout(format!(
            "slot '{}' is not part of the current layout",
            req.slot_id
        )));
    }

    let volume = clamp_volume(req.volume);
    layout.per_slot_volume.insert(req.slot_id.clone(), volume);
    state.supervisor.apply_layout(layout).await?;
    state.supervisor.mark_activity();

    Ok(Json(VolumeResponse {
        status: "ok",
        slot_id: req.slot_id,
        volume,
    }))
}

#[derive(Serialize)]
struct VolumesResponse {
    volumes: BTreeMap<String, f32>,
    layout: LayoutKind,
    streams: BTreeMap<String, String>,
}

async fn list_volumes(State(state): State<AppState>) -> AppResult<Json<VolumesResponse>> {
    let layout = state
        .supervisor
        .current_layout()
        .await
        .ok_or_else(|| AppError::NotFound("no layout is currently applied".into()))?;
    Ok(Json(VolumesResponse {
        volumes: layout.per_slot_volume,
        layout: layout.kind,
        streams: layout.slot_to_channel,
    }))
}

#[derive(Serialize)]
struct EncoderStatus {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
    codec: &'static str,
    preference: String,
}

#[derive(Serialize)]
struct ControlStatusResponse {
    mode: Mode,
    connected_clients: usize,
    time_until_idle: Option<u64>,
    encoder: EncoderStatus,
    stream_url: &'static str,
}

async fn control_status(State(state): State<AppState>) -> Json<ControlStatusResponse> {
    let mode = state.supervisor.mode();
    let connected_clients = state.supervisor.fanout().viewer_count();

    let time_until_idle = (mode == Mode::Live && connected_clients == 0).then(|| {
        let idle_for_ms = now_millis().saturating_sub(state.supervisor.last_activity_ms());
        (state.idle_timeout.as_millis() as u64).saturating_sub(idle_for_ms) / 1000
    });

    Json(ControlStatusResponse {
        mode,
        connected_clients,
        time_until_idle,
        encoder: EncoderStatus {
            kind: if state.encoder_profile.supports_hw_filter {
                "hardware"
            } else {
                "software"
            },
            name: state.encoder_profile.name,
            codec: state.encoder_profile.codec,
            preference: state.encoder_preference.clone(),
        },
        stream_url: "/stream",
    })
}

#[derive(Serialize)]
struct StopResponse {
    status: &'static str,
}

/// Forces the encoder to stop, retaining `last_good_layout` for a future
/// cold start.
async fn control_stop(State(state): State<AppState>) -> AppResult<Json<StopResponse>> {
    state.supervisor.stop().await?;
    Ok(Json(StopResponse { status: "idle" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrappedServices;
    use crate::broadcast::FanOut;
    use crate::catalog::{Catalog, CatalogSource};
    use crate::encoder::PROFILES;
    use crate::runtime::TokioSpawner;
    use crate::supervisor::Supervisor;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn make_state() -> AppState {
        let catalog = Arc::new(Catalog::new(
            CatalogSource::File("/nonexistent".into()),
            reqwest::Client::new(),
        ));
        let profile = PROFILES.iter().find(|p| p.name == "software").unwrap();
        let supervisor = Arc::new(Supervisor::new(
            FanOut::new(),
            Arc::clone(&catalog),
            profile,
            "definitely-not-a-real-ffmpeg-binary".to_string(),
            500 * 1024 * 1024,
        ));
        BootstrappedServices {
            catalog,
            supervisor,
            encoder_profile: profile,
            encoder_preference: "auto".to_string(),
            spawner: TokioSpawner::current(),
            cancel_token: CancellationToken::new(),
            idle_timeout: Duration::from_secs(60),
            max_stream_size_bytes: 500 * 1024 * 1024,
            http_client: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn list_channels_reflects_empty_catalog() {
        let state = make_state();
        let Json(body) = list_channels(State(state)).await;
        assert_eq!(body.count, 0);
        assert!(body.channels.is_empty());
    }

    #[tokio::test]
    async fn current_layout_is_not_found_before_any_apply() {
        let state = make_state();
        let err = get_current_layout(State(state)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_layout_with_unknown_channel_is_not_found() {
        let state = make_state();
        let mut streams = BTreeMap::new();
        streams.insert("main".to_string(), "missing".to_string());
        streams.insert("inset".to_string(), "also-missing".to_string());
        let req = LayoutSetRequest {
            layout: LayoutKind::Pip,
            streams,
            audio_source: "main".to_string(),
            custom_slots: None,
        };
        let err = set_layout(State(state), Json(req)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn swap_audio_without_current_layout_is_not_found() {
        let state = make_state();
        let req = SwapAudioRequest {
            audio_source: "main".to_string(),
        };
        let err = swap_audio(State(state), Json(req)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_volume_without_current_layout_is_not_found() {
        let state = make_state();
        let req = VolumeRequest {
            slot_id: "main".to_string(),
            volume: 0.5,
        };
        let err = set_volume(State(state), Json(req)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn control_status_reports_idle_with_no_clients() {
        let state = make_state();
        let Json(body) = control_status(State(state)).await;
        assert_eq!(body.mode, Mode::Idle);
        assert_eq!(body.connected_clients, 0);
        assert_eq!(body.time_until_idle, None);
        assert_eq!(body.encoder.name, "software");
    }

    #[tokio::test]
    async fn control_stop_on_idle_server_reports_idle() {
        let state = make_state();
        let Json(body) = control_stop(State(state)).await.unwrap();
        assert_eq!(body.status, "idle");
    }
}
