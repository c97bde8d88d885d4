//! Device channel session with auto-reconnect.
//!
//! One session = one WebSocket to `/raspberry-pi/ws/{device_id}`: heartbeats go
//! out on a timer, commands come in and are acknowledged. When the socket drops
//! the agent reconnects with exponential backoff; a 4004 close means the device
//! is not registered on the kernel and ends the agent.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLOSE_NOT_REGISTERED: u16 = 4004;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("device {0} is not registered on the kernel")]
    NotRegistered(String),
}

impl SessionError {
    fn is_fatal(&self) -> bool {
        matches!(self, SessionError::NotRegistered(_))
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Outbound heartbeat
#[derive(Debug, Serialize)]
struct Heartbeat {
    #[serde(rename = "type")]
    kind: &'static str,
    device_id: String,
    timestamp: DateTime<Utc>,
}

/// Command pushed by the kernel
#[derive(Debug, Deserialize)]
pub struct IncomingCommand {
    pub command: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CommandAck<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    command: &'a str,
    received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub device_id: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectConfig,
}

/// Keep a session alive until cancelled or the kernel rejects the device.
pub async fn run(config: SessionConfig, cancel: CancellationToken) -> Result<(), SessionError> {
    let mut attempt: u32 = 0;

    loop {
        match connect_and_serve(&config, &cancel).await {
            Ok(true) => attempt = 0,
            Ok(false) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "device channel lost"),
        }

        if cancel.is_cancelled() {
            info!("agent stopping");
            return Ok(());
        }

        let delay = calculate_backoff(attempt, &config.reconnect);
        attempt = attempt.saturating_add(1);
        info!(delay_ms = delay.as_millis() as u64, attempt, "reconnecting");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One connection. `Ok(true)` if the kernel acknowledged at least one heartbeat.
async fn connect_and_serve(config: &SessionConfig, cancel: &CancellationToken) -> Result<bool, SessionError> {
    info!(url = %config.url, "connecting to kernel");
    let (ws, _) = tokio_tungstenite::connect_async(config.url.as_str())
        .await
        .map_err(|e| SessionError::Connect(e.to_string()))?;
    info!(device_id = %config.device_id, "device channel open");

    let (mut write, mut read) = ws.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let mut acked = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(acked);
            }
            _ = heartbeat.tick() => {
                let beat = Heartbeat {
                    kind: "heartbeat",
                    device_id: config.device_id.clone(),
                    timestamp: Utc::now(),
                };
                let text = serde_json::to_string(&beat).map_err(|e| SessionError::Socket(e.to_string()))?;
                write.send(Message::Text(text.into())).await.map_err(|e| SessionError::Socket(e.to_string()))?;
                debug!("heartbeat sent");
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(text.as_str(), &mut acked) {
                        write.send(Message::Text(reply.into())).await.map_err(|e| SessionError::Socket(e.to_string()))?;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(cf) = frame {
                        if cf.code == CloseCode::from(CLOSE_NOT_REGISTERED) {
                            return Err(SessionError::NotRegistered(config.device_id.clone()));
                        }
                        info!(code = %cf.code, reason = cf.reason.as_str(), "kernel closed the channel");
                    }
                    return Ok(acked);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SessionError::Socket(e.to_string())),
                None => return Ok(acked),
            }
        }
    }
}

/// React to one inbound text frame; returns the reply to send, if any.
fn handle_text(text: &str, acked: &mut bool) -> Option<String> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unreadable message from kernel");
            return None;
        }
    };

    if value.get("type").and_then(|t| t.as_str()) == Some("heartbeat_ack") {
        *acked = true;
        debug!("heartbeat acknowledged");
        return None;
    }

    match serde_json::from_value::<IncomingCommand>(value) {
        Ok(cmd) => {
            info!(command = %cmd.command, parameters = %serde_json::Value::Object(cmd.parameters.clone()), "command received");
            let ack = CommandAck {
                kind: "command_ack",
                command: &cmd.command,
                received_at: Utc::now(),
            };
            serde_json::to_string(&ack).ok()
        }
        Err(e) => {
            debug!(error = %e, "ignoring message");
            None
        }
    }
}

/// Exponential backoff with a deterministic +-25% jitter.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(16) as i32);
    let capped = base.min(config.max_delay.as_secs_f64());
    let jitter = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = ReconnectConfig::default();
        let first = calculate_backoff(0, &config);
        assert!(first <= Duration::from_millis(1250));
        let later = calculate_backoff(3, &config);
        assert!(later > first);
        for attempt in [10, 20, 1000] {
            assert!(calculate_backoff(attempt, &config) <= Duration::from_secs_f64(30.0 * 1.25));
        }
    }

    #[test]
    fn test_handle_text() {
        let mut acked = false;
        assert!(handle_text(r#"{"type":"heartbeat_ack"}"#, &mut acked).is_none());
        assert!(acked);

        let reply = handle_text(r#"{"command":"beep","parameters":{"ms":100}}"#, &mut acked).unwrap();
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["type"], "command_ack");
        assert_eq!(reply["command"], "beep");

        assert!(handle_text("garbage", &mut acked).is_none());
        assert!(handle_text(r#"{"type":"other"}"#, &mut acked).is_none());
    }

    fn config(url: String) -> SessionConfig {
        SessionConfig {
            url,
            device_id: "rpi-7".into(),
            heartbeat_interval: Duration::from_millis(20),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
        }
    }

    #[tokio::test]
    async fn test_session_heartbeats_and_command_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let agent = tokio::spawn(run(config(format!("ws://{addr}/raspberry-pi/ws/rpi-7")), cancel.clone()));

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let beat = ws.next().await.unwrap().unwrap();
        let beat: serde_json::Value = serde_json::from_str(beat.to_text().unwrap()).unwrap();
        assert_eq!(beat["type"], "heartbeat");
        assert_eq!(beat["device_id"], "rpi-7");

        ws.send(Message::Text(r#"{"type":"heartbeat_ack"}"#.into())).await.unwrap();
        ws.send(Message::Text(r#"{"command":"scan","parameters":{}}"#.into())).await.unwrap();
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            let msg: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            if msg["type"] == "command_ack" {
                assert_eq!(msg["command"], "scan");
                break;
            }
        }

        cancel.cancel();
        assert!(agent.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_not_registered_close_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let agent = tokio::spawn(run(config(format!("ws://{addr}/raspberry-pi/ws/rpi-7")), CancellationToken::new()));

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::from(4004),
            reason: "Device not registered".into(),
        }))
        .await
        .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), agent).await.unwrap().unwrap();
        assert!(matches!(result, Err(SessionError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let agent = tokio::spawn(run(config(format!("ws://{addr}/raspberry-pi/ws/rpi-7")), cancel.clone()));

        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let beat = ws.next().await.unwrap().unwrap();
        assert!(beat.to_text().unwrap().contains("heartbeat"));

        cancel.cancel();
        assert!(agent.await.unwrap().is_ok());
    }
}
