/**
 * WAREHOUSE KERNEL - Entry point of the warehouse device & video server
 *
 * ROLE : Bootstrap config, device registry, connection layer, product catalog,
 * video pipeline, sensor bridge and the HTTP API, then serve until Ctrl-C.
 *
 * ARCHITECTURE : one Arc-shared component per concern, one cancellation token
 * tree for every background worker.
 */

mod catalog;
mod config;
mod connections;
mod control;
mod devices;
mod health;
mod heartbeat;
mod http;
mod models;
mod sensors;
mod video;

use crate::catalog::{HttpCatalog, ProductLookup, ProductNameCache, StaticCatalog};
use crate::config::{load_config, KernelConfig};
use crate::connections::ConnectionManager;
use crate::control::CommandDispatcher;
use crate::devices::DeviceRegistry;
use crate::health::HealthTracker;
use crate::heartbeat::HeartbeatMonitor;
use crate::http::AppState;
use crate::sensors::{bind_sensor_listener, serve_sensors, SensorHub};
use crate::video::detect::QrDetector;
use crate::video::ingest::HttpSource;
use crate::video::VideoPipeline;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // optional .env
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warehouse_kernel=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting warehouse kernel v{}", env!("CARGO_PKG_VERSION"));

    let cfg: KernelConfig = load_config().await;
    let shutdown = CancellationToken::new();

    // devices + connections
    let devices = Arc::new(DeviceRegistry::new(&cfg.devices.data_file));
    if let Err(e) = devices.load_devices().await {
        tracing::error!(error = %e, "failed to load devices, starting empty");
    }
    let connections = Arc::new(ConnectionManager::new());
    let heartbeats = HeartbeatMonitor::new(devices.clone(), connections.clone());
    if let Some(secs) = cfg.devices.stale_after_secs {
        heartbeats.spawn_stale_sweeper(Duration::from_secs(secs), shutdown.child_token());
    }

    // catalog
    let lookup: Arc<dyn ProductLookup> = match &cfg.catalog.api_base_url {
        Some(base) => {
            tracing::info!(%base, "product names from inventory API");
            Arc::new(
                HttpCatalog::new(base, Duration::from_millis(cfg.catalog.timeout_ms))
                    .context("catalog.api_base_url")?,
            )
        }
        None => {
            tracing::info!(products = cfg.catalog.products.len(), "product names from static catalog");
            Arc::new(StaticCatalog::new(cfg.catalog.products.clone()))
        }
    };
    let cache = Arc::new(ProductNameCache::new(lookup));

    // video
    let source = HttpSource::new(
        &cfg.video.source_url,
        Duration::from_millis(cfg.video.connect_timeout_ms),
    )
    .context("video.source_url")?;
    let video = Arc::new(VideoPipeline::new(
        &cfg.video,
        Arc::new(source),
        Arc::new(QrDetector),
        cache,
        shutdown.clone(),
    ));
    if cfg.video.autostart {
        video.start();
    }

    // ESP32 distance sensors
    let sensors = SensorHub::default();
    if let Some(bind) = &cfg.sensors.bind {
        let listener = bind_sensor_listener(bind)
            .await
            .with_context(|| format!("sensors.bind {bind}"))?;
        tokio::spawn(serve_sensors(listener, sensors.clone(), shutdown.child_token()));
    }

    let app_state = AppState {
        dispatcher: CommandDispatcher::new(devices.clone(), connections.clone()),
        heartbeats,
        devices: devices.clone(),
        connections: connections.clone(),
        video: video.clone(),
        sensors,
        health_tracker: HealthTracker::new(),
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("http.bind {}", cfg.http.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let signal_token = shutdown.clone();
    let signal_connections = connections.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
            signal_token.cancel();
            signal_connections.close_all();
        })
        .await?;

    video.stop().await;
    devices.save_devices().await?;
    tracing::info!("kernel stopped");
    Ok(())
}
