/**
 * DEVICE SESSIONS & HEARTBEATS - WebSocket side of the device channel
 *
 * ROLE : Run one session per connected device: register the connection, flip the
 * device online, answer heartbeats, forward queued commands, and on any kind of
 * termination release the connection and mark the device offline.
 *
 * ARCHITECTURE : split socket, writer task draining the connection queue, reader
 * loop racing the connection's close token. Optional staleness sweeper.
 */

use crate::connections::{DeviceConnection, SharedConnectionManager};
use crate::devices::SharedDeviceRegistry;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const CLOSE_NOT_REGISTERED: u16 = 4004;

/// Inbound device message, keyed by its `type` field
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Heartbeat,
    ScanResult(Value),
    SensorData(Value),
    Other(Option<String>),
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        Ok(match kind.as_deref() {
            Some("heartbeat") => Inbound::Heartbeat,
            Some("scan_result") => Inbound::ScanResult(value),
            Some("sensor_data") => Inbound::SensorData(value),
            _ => Inbound::Other(kind),
        })
    }
}

#[derive(Clone)]
pub struct HeartbeatMonitor {
    devices: SharedDeviceRegistry,
    connections: SharedConnectionManager,
}

impl HeartbeatMonitor {
    pub fn new(devices: SharedDeviceRegistry, connections: SharedConnectionManager) -> Self {
        Self {
            devices,
            connections,
        }
    }

    pub async fn on_connected(&self, device_id: &str) {
        if self.devices.mark_online(device_id).await {
            tracing::info!(device_id, "device online");
        }
    }

    pub async fn on_heartbeat(&self, device_id: &str) {
        self.devices.touch(device_id).await;
    }

    /// Release `conn_id` and mark the device offline unless a newer session took over.
    pub async fn on_disconnected(&self, device_id: &str, conn_id: Uuid) {
        self.connections.release(device_id, conn_id);
        if self.connections.is_online(device_id) {
            tracing::debug!(device_id, %conn_id, "superseded session ended");
            return;
        }
        self.devices.mark_offline(device_id).await;
        tracing::info!(device_id, "device offline");
    }

    /// Close sessions whose last heartbeat is older than `stale_after`.
    pub fn spawn_stale_sweeper(&self, stale_after: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tracing::info!(stale_after_secs = stale_after.as_secs(), "starting device staleness sweeper");

        tokio::spawn(async move {
            let period = (stale_after / 2).max(Duration::from_millis(100));
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                monitor.sweep(stale_after).await;
            }
        })
    }

    pub(crate) async fn sweep(&self, stale_after: Duration) {
        let cutoff = OffsetDateTime::now_utc() - stale_after;
        for device_id in self.devices.stale_devices(cutoff).await {
            if self.connections.close(&device_id) {
                tracing::warn!(device_id = %device_id, "closing stale device session");
            } else {
                // online flag without a session, e.g. a session task that died
                self.devices.mark_offline(&device_id).await;
            }
        }
    }
}

/// Drive one accepted device socket until it ends.
pub async fn run_device_session(
    mut socket: WebSocket,
    device_id: String,
    monitor: HeartbeatMonitor,
) {
    if !monitor.devices.contains(&device_id).await {
        tracing::warn!(device_id = %device_id, "rejecting unregistered device");
        let frame = CloseFrame {
            code: CLOSE_NOT_REGISTERED,
            reason: "Device not registered".into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }

    let (conn, handle) = DeviceConnection::open();
    let conn_id = handle.id;
    monitor.connections.register(&device_id, conn);
    monitor.on_connected(&device_id).await;

    let (mut sink, mut stream) = socket.split();
    let closed = handle.closed.clone();
    let reply = handle.reply.clone();
    let mut outbound = handle.outbound;

    let writer_closed = closed.clone();
    let writer_device = device_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = writer_closed.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                next = outbound.recv() => {
                    let Some(payload) = next else { break };
                    if let Err(e) = sink.send(Message::Text(payload.to_string().into())).await {
                        tracing::debug!(device_id = %writer_device, error = %e, "device write failed");
                        break;
                    }
                }
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match Inbound::parse(text.as_str()) {
                Ok(Inbound::Heartbeat) => {
                    monitor.on_heartbeat(&device_id).await;
                    if reply.send(json!({ "type": "heartbeat_ack" })).is_err() {
                        break;
                    }
                }
                Ok(Inbound::ScanResult(report)) | Ok(Inbound::SensorData(report)) => {
                    tracing::debug!(device_id = %device_id, %report, "device report accepted");
                }
                Ok(Inbound::Other(kind)) => {
                    tracing::debug!(device_id = %device_id, ?kind, "ignoring message type");
                }
                Err(e) => {
                    tracing::warn!(device_id = %device_id, error = %e, "malformed device message dropped");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(device_id = %device_id, error = %e, "device read failed");
                break;
            }
        }
    }

    closed.cancel();
    let _ = writer.await;
    monitor.on_disconnected(&device_id, conn_id).await;
}
