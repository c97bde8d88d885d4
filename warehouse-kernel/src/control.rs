/**
 * COMMAND DISPATCH - Route one-shot commands to connected devices
 *
 * ROLE : Check the registry, then the connection map, then queue the command on the
 * device's session. One attempt, no retry, never touches the device record.
 * Also owns deregistration, which must tear down the live connection too.
 */

use crate::connections::{SendError, SharedConnectionManager};
use crate::devices::{RegistryError, SharedDeviceRegistry};
use crate::models::{Command, CommandResponse, Device};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    DeviceUnknown,
    NotConnected,
    SendFailed(String),
}

impl DispatchOutcome {
    /// Wire response for a known device; `DeviceUnknown` is mapped to 404 by the HTTP layer.
    pub fn into_response(self, device_id: &str) -> CommandResponse {
        let (status, result, error) = match self {
            DispatchOutcome::Sent => (
                "sent",
                Some(json!({ "message": "Command sent successfully" })),
                None,
            ),
            DispatchOutcome::DeviceUnknown => ("error", None, Some("Device not found".to_string())),
            DispatchOutcome::NotConnected => {
                ("error", None, Some("Device is not connected".to_string()))
            }
            DispatchOutcome::SendFailed(reason) => {
                ("error", None, Some(format!("Failed to send command: {reason}")))
            }
        };
        CommandResponse {
            device_id: device_id.to_string(),
            status: status.to_string(),
            result,
            error,
        }
    }
}

#[derive(Clone)]
pub struct CommandDispatcher {
    devices: SharedDeviceRegistry,
    connections: SharedConnectionManager,
}

impl CommandDispatcher {
    pub fn new(devices: SharedDeviceRegistry, connections: SharedConnectionManager) -> Self {
        Self {
            devices,
            connections,
        }
    }

    pub async fn dispatch(&self, device_id: &str, command: Command) -> DispatchOutcome {
        if !self.devices.contains(device_id).await {
            tracing::debug!(device_id, "command for unknown device");
            return DispatchOutcome::DeviceUnknown;
        }

        let name = command.command.clone();
        let payload = match serde_json::to_value(&command) {
            Ok(v) => v,
            Err(e) => return DispatchOutcome::SendFailed(e.to_string()),
        };

        match self.connections.send(device_id, payload) {
            Ok(()) => {
                tracing::info!(device_id, command = %name, "command queued");
                DispatchOutcome::Sent
            }
            Err(SendError::NotConnected(_)) => DispatchOutcome::NotConnected,
            Err(e @ SendError::Closed(_)) => {
                tracing::warn!(device_id, command = %name, error = %e, "command not delivered");
                DispatchOutcome::SendFailed(e.to_string())
            }
        }
    }

    /// Remove the device and close its connection if one is open.
    pub async fn deregister(&self, device_id: &str) -> Result<Device, RegistryError> {
        let device = self.devices.remove_device(device_id).await?;
        if self.connections.unregister(device_id) {
            tracing::info!(device_id, "closed connection of deregistered device");
        }
        Ok(device)
    }
}
