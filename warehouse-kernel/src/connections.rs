/**
 * CONNECTION MANAGER - One live duplex channel per device
 *
 * ROLE : Owns the device-id -> connection map. It is the only writer to device
 * sockets: payloads are queued to the session's writer task, never written inline.
 *
 * INVARIANT : at most one connection per device id. Installing a second one closes
 * the first. A finished session only removes the entry if it still owns it.
 */

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Device {0} is not connected")]
    NotConnected(String),
    #[error("connection to {0} is closing")]
    Closed(String),
}

/// Manager side of a device session
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    id: Uuid,
    outbound: mpsc::UnboundedSender<Value>,
    closed: CancellationToken,
}

/// Session side: drains the outbound queue and watches for a close request
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub outbound: mpsc::UnboundedReceiver<Value>,
    /// Replies produced by the session itself (acks); never routed through the map
    pub reply: mpsc::UnboundedSender<Value>,
    pub closed: CancellationToken,
}

impl DeviceConnection {
    pub fn open() -> (Self, ConnectionHandle) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        (
            Self {
                id,
                outbound: tx.clone(),
                closed: closed.clone(),
            },
            ConnectionHandle {
                id,
                outbound: rx,
                reply: tx,
                closed,
            },
        )
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<String, DeviceConnection>>,
}

pub type SharedConnectionManager = Arc<ConnectionManager>;

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` for `device_id`, closing whatever was there before.
    pub fn register(&self, device_id: &str, conn: DeviceConnection) {
        let conn_id = conn.id;
        let previous = self.connections.lock().insert(device_id.to_string(), conn);
        if let Some(prev) = previous {
            prev.close();
            tracing::info!(device_id, old = %prev.id, new = %conn_id, "connection superseded");
        } else {
            tracing::debug!(device_id, conn_id = %conn_id, "connection registered");
        }
    }

    /// Remove and close; no-op when absent
    pub fn unregister(&self, device_id: &str) -> bool {
        let removed = self.connections.lock().remove(device_id);
        match removed {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Remove the entry only if it is still the connection `conn_id`.
    pub fn release(&self, device_id: &str, conn_id: Uuid) -> bool {
        let mut map = self.connections.lock();
        if map.get(device_id).is_some_and(|c| c.id == conn_id) {
            map.remove(device_id);
            true
        } else {
            false
        }
    }

    /// Ask the session to close without removing the entry; the session releases it.
    pub fn close(&self, device_id: &str) -> bool {
        match self.connections.lock().get(device_id) {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    pub fn is_online(&self, device_id: &str) -> bool {
        self.connections.lock().contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn send(&self, device_id: &str, payload: Value) -> Result<(), SendError> {
        let sender = self
            .connections
            .lock()
            .get(device_id)
            .map(|c| c.outbound.clone())
            .ok_or_else(|| SendError::NotConnected(device_id.to_string()))?;
        sender
            .send(payload)
            .map_err(|_| SendError::Closed(device_id.to_string()))
    }

    /// Close every connection (shutdown)
    pub fn close_all(&self) {
        let drained: Vec<DeviceConnection> =
            self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close();
        }
    }
}
