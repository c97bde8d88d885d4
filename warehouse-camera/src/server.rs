//! Capture loop and the HTTP side of the camera server.

use crate::source::{no_camera_frame, FrameSource};
use async_stream::stream;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use warehouse_media::mjpeg::{self, encode_part};

/// Latest multipart chunk, shared by every viewer
pub type LatestPart = watch::Receiver<Option<Bytes>>;

/// Pull frames from `source` at `fps` and publish them; publishes the error frame
/// whenever the source fails.
pub async fn run_capture(
    mut source: Box<dyn FrameSource>,
    fps: u32,
    quality: u8,
    tx: watch::Sender<Option<Bytes>>,
    cancel: CancellationToken,
) {
    let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let error_part = no_camera_frame(quality).ok().map(|jpeg| encode_part(&jpeg));
    tracing::info!(source = %source.describe(), fps, "capture started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let joined = tokio::task::spawn_blocking(move || {
            let jpeg = source.next_jpeg();
            (source, jpeg)
        })
        .await;
        let (back, jpeg) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "capture task failed");
                tx.send_replace(error_part.clone());
                break;
            }
        };
        source = back;

        match jpeg {
            Ok(jpeg) => {
                tx.send_replace(Some(encode_part(&jpeg)));
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                tx.send_replace(error_part.clone());
            }
        }
    }
    tracing::info!("capture stopped");
}

/// Repeat the error frame for a source that could not be opened at all.
pub async fn run_error_feed(fps: u32, quality: u8, tx: watch::Sender<Option<Bytes>>, cancel: CancellationToken) {
    let Ok(jpeg) = no_camera_frame(quality) else {
        return;
    };
    let part = encode_part(&jpeg);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tx.send_replace(Some(part.clone()));
    }
}

pub fn build_router(latest: LatestPart) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .with_state(latest)
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn video_feed(State(latest): State<LatestPart>) -> Response {
    let body = Body::from_stream(viewer_stream(latest));
    (
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// One chunk per published frame; the current frame is sent first.
pub fn viewer_stream(mut latest: LatestPart) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    stream! {
        loop {
            let part = latest.borrow_and_update().clone();
            if let Some(part) = part {
                yield Ok(part);
            }
            if latest.changed().await.is_err() {
                break;
            }
        }
    }
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Camera Stream</title></head>
<body style="background: #1a1a2e; color: white; font-family: sans-serif; text-align: center; padding: 20px;">
    <h1>Camera Stream Server</h1>
    <img src="/video_feed" style="max-width: 100%; border: 2px solid #4a90d9; border-radius: 8px;">
</body>
</html>
"#;
