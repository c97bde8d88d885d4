use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub ip_address: Option<String>,
    pub location: Option<String>,
    /// Liveness, owned by the connection layer
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceCreate {
    pub device_id: String,
    pub name: String,
    pub ip_address: Option<String>,
    pub location: Option<String>,
}

/// Descriptive fields only; `is_online` / `last_seen` in a request body are dropped.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
}

/// One-shot directive for a device, as written on the wire
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Command {
    pub fn new(command: impl Into<String>, parameters: Option<Map<String, Value>>) -> Self {
        Self {
            command: command.into(),
            parameters: parameters.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub device_id: String,
    pub command: String,
    pub parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub device_id: String,
    pub status: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Latest reading of a distance sensor bridge
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor: String,
    pub distance_cm: f64,
    #[serde(default)]
    pub alert: bool,
    #[serde(default = "OffsetDateTime::now_utc", with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

pub type DevicesMap = HashMap<String, Device>;
pub type SensorsMap = HashMap<String, SensorReading>;
