//! The `/stream` viewer-attach endpoint.
//!
//! Implements the cold-start contract from §4.7: a viewer arriving while the
//! broadcast is idle triggers a start from `last_good_layout` and the HTTP
//! response does not complete until either the first chunk is available or
//! the startup deadline elapses. Grounded in the desktop app's
//! `stream_audio` handler (`api/stream.rs`), generalized from per-speaker
//! WAV/ICY cadence streaming to a single MPEG-TS fan-out attach.

use std::time::Duration;

use async_stream::stream;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::Stream;

use crate::api::AppState;
use crate::broadcast::ViewerHandle;
use crate::error::{AppError, AppResult};
use crate::protocol_constants::{COLD_START_DEADLINE_SECS, STREAM_CONTENT_TYPE};
use crate::state::Mode;

/// Turns an attached viewer into a byte stream, optionally prefixed with a
/// chunk already pulled off its queue while waiting out the cold-start
/// deadline. The generator owns the whole [`ViewerHandle`] (its `Drop` impl
/// forbids moving `receiver` out alone) so the viewer deregisters the moment
/// the body is dropped — natural exhaustion or client disconnect alike.
fn viewer_byte_stream(
    mut viewer: ViewerHandle,
    first_chunk: Option<Bytes>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream! {
        if let Some(chunk) = first_chunk {
            yield Ok(chunk);
        }
        while let Some(chunk) = viewer.receiver.recv().await {
            yield Ok(chunk);
        }
    }
}

fn mpeg_ts_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)
        .body(body)
        .expect("a fixed, valid header set always builds a response")
}

/// Attaches an incoming viewer to the broadcast, cold-starting from
/// `last_good_layout` if the encoder is currently idle.
pub async fn stream_handler(State(state): State<AppState>) -> AppResult<Response> {
    state.supervisor.mark_activity();

    let cold_starting = state.supervisor.mode() == Mode::Idle;
    if cold_starting {
        state.supervisor.cold_start().await?;
    }

    let viewer = state.supervisor.fanout().attach();

    if !cold_starting {
        return Ok(mpeg_ts_response(Body::from_stream(viewer_byte_stream(
            viewer, None,
        ))));
    }

    // Cold start: hold the response open until the first chunk arrives or
    // the startup deadline elapses (§4.7).
    let deadline = Duration::from_secs(COLD_START_DEADLINE_SECS);
    let mut viewer = viewer;
    match tokio::time::timeout(deadline, viewer.receiver.recv()).await {
        Ok(Some(first_chunk)) => Ok(mpeg_ts_response(Body::from_stream(viewer_byte_stream(
            viewer,
            Some(first_chunk),
        )))),
        Ok(None) => Err(AppError::EncoderFailed(
            "encoder stopped before producing any output".into(),
        )),
        Err(_) => Err(AppError::StartupTimeout(format!(
            "no output within {COLD_START_DEADLINE_SECS}s"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::FanOut;

    #[tokio::test]
    async fn viewer_byte_stream_yields_prefixed_chunk_then_queue() {
        use futures::StreamExt;

        let fanout = FanOut::new();
        let viewer = fanout.attach();
        let mut s = Box::pin(viewer_byte_stream(viewer, Some(Bytes::from_static(b"first"))));
        let first = s.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn dropping_the_body_stream_deregisters_the_viewer() {
        let fanout = FanOut::new();
        let viewer = fanout.attach();
        assert_eq!(fanout.viewer_count(), 1);
        let s = viewer_byte_stream(viewer, None);
        drop(s);
        assert_eq!(fanout.viewer_count(), 0);
    }
}
