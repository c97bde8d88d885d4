/**
 * HTTP API - Device control, device channel, video feed
 *
 * ROLE : Axum router of the kernel.
 * - /raspberry-pi/devices : device CRUD (liveness read-only)
 * - /raspberry-pi/command : one-shot command dispatch
 * - /raspberry-pi/ws/{id} : device WebSocket channel
 * - /video/...            : annotated MJPEG feed, status, start/stop, cache clear
 * - /sensors, /health, /system/health
 *
 * ERRORS : (status, {"detail": ...}) bodies.
 */

use crate::connections::SharedConnectionManager;
use crate::control::{CommandDispatcher, DispatchOutcome};
use crate::devices::{RegistryError, SharedDeviceRegistry};
use crate::health::{memory_usage_mb, HealthTracker, KernelHealth};
use crate::heartbeat::{run_device_session, HeartbeatMonitor};
use crate::models::{
    Command, CommandRequest, CommandResponse, Device, DeviceCreate, DeviceUpdate, SensorReading,
};
use crate::sensors::SensorHub;
use crate::video::{SharedVideoPipeline, VideoStatus};
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use warehouse_media::mjpeg;

type ApiError = (StatusCode, Json<Value>);

fn detail(code: StatusCode, msg: impl Into<String>) -> ApiError {
    (code, Json(json!({ "detail": msg.into() })))
}

fn registry_error(e: RegistryError) -> ApiError {
    match e {
        RegistryError::AlreadyExists(_) => {
            detail(StatusCode::BAD_REQUEST, "Device with this ID already exists")
        }
        RegistryError::NotFound(_) => detail(StatusCode::NOT_FOUND, "Device not found"),
        other => {
            tracing::error!(error = %other, "device store failure");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Device store failure")
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub devices: SharedDeviceRegistry,
    pub connections: SharedConnectionManager,
    pub dispatcher: CommandDispatcher,
    pub heartbeats: HeartbeatMonitor,
    pub video: SharedVideoPipeline,
    pub sensors: SensorHub,
    pub health_tracker: HealthTracker,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    online_only: bool,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { Json(json!({ "status": "healthy" })) }))
        .route("/system/health", get(get_system_health))
        .route("/raspberry-pi/devices", get(list_devices).post(register_device))
        .route(
            "/raspberry-pi/devices/{device_id}",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/raspberry-pi/command", post(send_command))
        .route("/raspberry-pi/ws/{device_id}", get(device_socket))
        .route("/video", get(video_page))
        .route("/video/feed", get(video_feed))
        .route("/video/status", get(video_status))
        .route("/video/start", post(video_start))
        .route("/video/stop", post(video_stop))
        .route("/video/cache/clear", post(clear_cache))
        .route("/sensors", get(list_sensors))
        .with_state(app_state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Smart Warehouse API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let (registered, _) = app.devices.counts().await;
    let video = app.video.status();
    Json(KernelHealth {
        uptime_seconds: app.health_tracker.uptime_seconds(),
        devices_registered: registered,
        devices_connected: app.connections.len(),
        video_running: video.stream_running,
        video_state: video.ingestor.state.as_str().to_string(),
        viewers: video.viewers,
        cached_products: video.cached_products,
        memory_usage_mb: memory_usage_mb(),
    })
}

// POST /raspberry-pi/devices
async fn register_device(
    State(app): State<AppState>,
    Json(req): Json<DeviceCreate>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    let device = app.devices.register_device(req).await.map_err(registry_error)?;
    Ok((StatusCode::CREATED, Json(device)))
}

// GET /raspberry-pi/devices?online_only=true
async fn list_devices(
    State(app): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Device>> {
    Json(app.devices.list_devices(params.online_only).await)
}

async fn get_device(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    app.devices
        .get_device(&device_id)
        .await
        .map(Json)
        .ok_or_else(|| detail(StatusCode::NOT_FOUND, "Device not found"))
}

async fn update_device(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
    Json(update): Json<DeviceUpdate>,
) -> Result<Json<Device>, ApiError> {
    app.devices
        .update_device(&device_id, update)
        .await
        .map(Json)
        .map_err(registry_error)
}

async fn delete_device(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    app.dispatcher
        .deregister(&device_id)
        .await
        .map_err(registry_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /raspberry-pi/command
async fn send_command(
    State(app): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = Command::new(req.command, req.parameters);
    match app.dispatcher.dispatch(&req.device_id, command).await {
        DispatchOutcome::DeviceUnknown => Err(detail(StatusCode::NOT_FOUND, "Device not found")),
        outcome => Ok(Json(outcome.into_response(&req.device_id))),
    }
}

// GET /raspberry-pi/ws/{device_id}
async fn device_socket(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_device_session(socket, device_id, app.heartbeats))
}

async fn video_page() -> Html<&'static str> {
    Html(VIDEO_PAGE)
}

// GET /video/feed (starts the ingestor on first use)
async fn video_feed(State(app): State<AppState>) -> Response {
    if app.video.start() {
        tracing::info!("video ingestor started by viewer request");
    }
    let body = Body::from_stream(app.video.broadcaster().viewer_stream());
    (
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn video_status(State(app): State<AppState>) -> Json<VideoStatus> {
    Json(app.video.status())
}

async fn video_start(State(app): State<AppState>) -> Json<Value> {
    let status = if app.video.start() { "started" } else { "already_running" };
    Json(json!({ "status": status }))
}

async fn video_stop(State(app): State<AppState>) -> Json<Value> {
    let status = if app.video.stop().await { "stopped" } else { "not_running" };
    Json(json!({ "status": status }))
}

// POST /video/cache/clear
async fn clear_cache(State(app): State<AppState>) -> Json<Value> {
    let cleared = app.video.cache().clear();
    tracing::info!(cleared, "product name cache cleared");
    Json(json!({ "status": "cleared", "cleared": cleared }))
}

async fn list_sensors(State(app): State<AppState>) -> Json<Vec<SensorReading>> {
    Json(app.sensors.latest())
}

const VIDEO_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Warehouse camera</title>
    <style>
        body { background: #111; color: #eee; font-family: sans-serif; text-align: center; }
        img { max-width: 100%; border: 2px solid #0f0; }
    </style>
</head>
<body>
    <h1>Live QR detection</h1>
    <img src="/video/feed" alt="camera feed">
    <p><a href="/video/status">status</a></p>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ProductNameCache, StaticCatalog};
    use crate::config::VideoConf;
    use crate::connections::ConnectionManager;
    use crate::devices::DeviceRegistry;
    use crate::video::detect::QrDetector;
    use crate::video::ingest::{ByteSource, ByteStream, IngestError};
    use crate::video::VideoPipeline;
    use futures::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_util::sync::CancellationToken;

    struct SilentSource;

    #[async_trait::async_trait]
    impl ByteSource for SilentSource {
        fn describe(&self) -> String {
            "http://camera.test/video_feed".into()
        }

        async fn open(&self) -> Result<ByteStream, IngestError> {
            Ok(futures::stream::pending().boxed())
        }
    }

    fn test_state() -> AppState {
        let devices = Arc::new(DeviceRegistry::in_memory());
        let connections = Arc::new(ConnectionManager::new());
        let cache = Arc::new(ProductNameCache::new(Arc::new(StaticCatalog::default())));
        let video = Arc::new(VideoPipeline::new(
            &VideoConf {
                frame_interval_ms: 20,
                ..VideoConf::default()
            },
            Arc::new(SilentSource),
            Arc::new(QrDetector),
            cache,
            CancellationToken::new(),
        ));
        AppState {
            dispatcher: CommandDispatcher::new(devices.clone(), connections.clone()),
            heartbeats: HeartbeatMonitor::new(devices.clone(), connections.clone()),
            devices,
            connections,
            video,
            sensors: SensorHub::default(),
            health_tracker: HealthTracker::new(),
        }
    }

    async fn serve(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(3), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_device_crud_over_http() {
        let addr = serve(test_state()).await;
        let client = reqwest::Client::new();
        let base = format!("http://{addr}/raspberry-pi/devices");

        let created = client
            .post(&base)
            .json(&json!({"device_id": "rpi-1", "name": "Dock scanner", "location": "Dock A"}))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), reqwest::StatusCode::CREATED);

        let dup = client
            .post(&base)
            .json(&json!({"device_id": "rpi-1", "name": "again"}))
            .send()
            .await
            .unwrap();
        assert_eq!(dup.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = dup.json().await.unwrap();
        assert_eq!(body["detail"], "Device with this ID already exists");

        let updated: Value = client
            .put(format!("{base}/rpi-1"))
            .json(&json!({"name": "Renamed", "is_online": true}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["name"], "Renamed");
        assert_eq!(updated["is_online"], false);

        let online: Vec<Value> = client
            .get(format!("{base}?online_only=true"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(online.is_empty());

        let deleted = client.delete(format!("{base}/rpi-1")).send().await.unwrap();
        assert_eq!(deleted.status(), reqwest::StatusCode::NO_CONTENT);
        let missing = client.get(format!("{base}/rpi-1")).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_command_to_unknown_and_offline_device() {
        let state = test_state();
        state
            .devices
            .register_device(DeviceCreate {
                device_id: "rpi-2".into(),
                name: "Shelf".into(),
                ip_address: None,
                location: None,
            })
            .await
            .unwrap();
        let addr = serve(state).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/raspberry-pi/command");

        let unknown = client
            .post(&url)
            .json(&json!({"device_id": "nope", "command": "beep"}))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

        let offline: CommandResponse = client
            .post(&url)
            .json(&json!({"device_id": "rpi-2", "command": "beep"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(offline.status, "error");
        assert_eq!(offline.error.as_deref(), Some("Device is not connected"));
    }

    #[tokio::test]
    async fn test_device_channel_heartbeat_and_command() {
        let state = test_state();
        let devices = state.devices.clone();
        let connections = state.connections.clone();
        devices
            .register_device(DeviceCreate {
                device_id: "rpi-7".into(),
                name: "Gate".into(),
                ip_address: None,
                location: None,
            })
            .await
            .unwrap();
        let addr = serve(state).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/raspberry-pi/ws/rpi-7"))
            .await
            .unwrap();

        // garbage first: logged and dropped, the session stays up
        ws.send(WsMessage::Text("{not json".into())).await.unwrap();
        ws.send(WsMessage::Text(r#"{"type":"heartbeat"}"#.into())).await.unwrap();
        let ack = ws.next().await.unwrap().unwrap();
        let ack: Value = serde_json::from_str(ack.to_text().unwrap()).unwrap();
        assert_eq!(ack, json!({"type": "heartbeat_ack"}));
        assert!(devices.get_device("rpi-7").await.unwrap().is_online);
        assert!(connections.is_online("rpi-7"));

        let response: CommandResponse = reqwest::Client::new()
            .post(format!("http://{addr}/raspberry-pi/command"))
            .json(&json!({"device_id": "rpi-7", "command": "scan", "parameters": {"shelf": 3}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response.status, "sent");
        let pushed = ws.next().await.unwrap().unwrap();
        let pushed: Value = serde_json::from_str(pushed.to_text().unwrap()).unwrap();
        assert_eq!(pushed, json!({"command": "scan", "parameters": {"shelf": 3}}));

        ws.close(None).await.unwrap();
        eventually(|| {
            let devices = devices.clone();
            async move { !devices.get_device("rpi-7").await.unwrap().is_online }
        })
        .await;
        assert!(!connections.is_online("rpi-7"));
    }

    #[tokio::test]
    async fn test_unregistered_device_is_closed_with_4004() {
        let addr = serve(test_state()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/raspberry-pi/ws/ghost"))
            .await
            .unwrap();
        match ws.next().await {
            Some(Ok(WsMessage::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::from(4004));
                assert_eq!(frame.reason.as_str(), "Device not registered");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_video_feed_serves_placeholder_and_starts_ingestor() {
        let state = test_state();
        let video = state.video.clone();
        let addr = serve(state).await;

        let response = reqwest::get(format!("http://{addr}/video/feed")).await.unwrap();
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        assert_eq!(response.headers()[reqwest::header::CACHE_CONTROL], "no-cache");
        assert!(video.is_running());

        let mut body = response.bytes_stream();
        let mut received = Vec::new();
        while received.len() < 64 {
            received.extend_from_slice(&body.next().await.unwrap().unwrap());
        }
        assert!(received.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));
        drop(body);

        let status: Value = reqwest::get(format!("http://{addr}/video/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["camera_url"], "http://camera.test/video_feed");
        assert_eq!(status["stream_running"], true);
        assert_eq!(status["cached_products"], 0);

        let client = reqwest::Client::new();
        let stopped: Value = client
            .post(format!("http://{addr}/video/stop"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["status"], "stopped");
        assert!(!video.is_running());
    }

    #[tokio::test]
    async fn test_health_and_sensors() {
        let state = test_state();
        state.sensors.record(SensorReading {
            sensor: "bay-1".into(),
            distance_cm: 12.0,
            alert: true,
            received_at: time::OffsetDateTime::now_utc(),
        });
        let addr = serve(state).await;

        let health: Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");

        let system: KernelHealth = reqwest::get(format!("http://{addr}/system/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(system.devices_registered, 0);
        assert_eq!(system.video_state, "idle");

        let sensors: Vec<Value> = reqwest::get(format!("http://{addr}/sensors"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sensors[0]["sensor"], "bay-1");
        assert_eq!(sensors[0]["alert"], true);
    }
}
