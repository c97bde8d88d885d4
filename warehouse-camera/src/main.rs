//! Warehouse Camera - MJPEG source server
//!
//! Serves `GET /video_feed` as `multipart/x-mixed-replace` for the kernel's video
//! ingestor (or a browser), from a synthetic pattern or a looping JPEG directory.
//! When the source cannot be opened the feed shows a "No Camera Found" frame.
//!
//! Environment: CAMERA_BIND (0.0.0.0:5001), CAMERA_SOURCE (pattern | dir:<path>),
//! CAMERA_FPS (30), CAMERA_JPEG_QUALITY (85), CAMERA_WIDTH / CAMERA_HEIGHT (640x480).

mod server;
mod source;

use anyhow::{Context, Result};
use std::str::FromStr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
struct CameraConfig {
    bind: String,
    source: String,
    fps: u32,
    quality: u8,
    width: u32,
    height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5001".to_string(),
            source: "pattern".to_string(),
            fps: 30,
            quality: 85,
            width: 640,
            height: 480,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{key}: cannot parse {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl CameraConfig {
    fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            bind: env_or("CAMERA_BIND", d.bind)?,
            source: env_or("CAMERA_SOURCE", d.source)?,
            fps: env_or("CAMERA_FPS", d.fps)?,
            quality: env_or("CAMERA_JPEG_QUALITY", d.quality)?,
            width: env_or("CAMERA_WIDTH", d.width)?,
            height: env_or("CAMERA_HEIGHT", d.height)?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warehouse_camera=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CameraConfig::from_env()?;
    info!("Starting camera server v{} ({:?})", env!("CARGO_PKG_VERSION"), config);

    let cancel = CancellationToken::new();
    let (tx, rx) = watch::channel(None);

    match source::open_source(&config.source, (config.width, config.height), config.quality) {
        Ok(src) => {
            tokio::spawn(server::run_capture(src, config.fps, config.quality, tx, cancel.clone()));
        }
        Err(e) => {
            error!(error = %e, "no usable camera source, serving error frame");
            tokio::spawn(server::run_error_feed(config.fps, config.quality, tx, cancel.clone()));
        }
    }

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(addr = %listener.local_addr()?, "camera feed on /video_feed");

    let shutdown = cancel.clone();
    axum::serve(listener, server::build_router(rx))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}
