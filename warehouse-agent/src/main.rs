//! warehouse-agent: runs on a field device (Raspberry Pi scanner, display...)
//! and keeps it attached to the kernel's device channel.
//!
//! Configuration comes from the environment (a `.env` file is honoured):
//! - `AGENT_KERNEL_URL`   base WebSocket URL of the kernel (default `ws://localhost:8000`)
//! - `AGENT_DEVICE_ID`    registered device id (default: the host name or `rpi-1`)
//! - `AGENT_HEARTBEAT_SECS` heartbeat period in seconds (default 30)

mod session;

use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use session::{ReconnectConfig, SessionConfig};

#[derive(Debug, Clone)]
struct AgentConfig {
    kernel_url: String,
    device_id: String,
    heartbeat_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kernel_url: "ws://localhost:8000".to_string(),
            device_id: std::env::var("HOSTNAME").unwrap_or_else(|_| "rpi-1".to_string()),
            heartbeat_secs: 30,
        }
    }
}

impl AgentConfig {
    fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("AGENT_KERNEL_URL") {
            config.kernel_url = url;
        }
        if let Ok(id) = std::env::var("AGENT_DEVICE_ID") {
            config.device_id = id;
        }
        if let Some(secs) = std::env::var("AGENT_HEARTBEAT_SECS").ok().and_then(|v| v.parse().ok()) {
            config.heartbeat_secs = secs;
        }
        config
    }

    fn channel_url(&self) -> String {
        format!(
            "{}/raspberry-pi/ws/{}",
            self.kernel_url.trim_end_matches('/'),
            self.device_id
        )
    }

    fn session(&self) -> SessionConfig {
        SessionConfig {
            url: self.channel_url(),
            device_id: self.device_id.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.max(1)),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warehouse_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env();
    info!(device_id = %config.device_id, url = %config.channel_url(), "warehouse agent starting");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c.cancel();
    });

    if let Err(e) = session::run(config.session(), cancel).await {
        error!(error = %e, "agent stopped");
        return Err(e.into());
    }
    Ok(())
}
