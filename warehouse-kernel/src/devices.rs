/**
 * DEVICE REGISTRY - Known field devices with JSON persistence
 *
 * ROLE : Registration, lookup, update and removal of devices (Raspberry Pi units).
 * Durable fields are saved to a JSON file; liveness (is_online / last_seen) is
 * written only by the connection layer through the crate-private mark_* methods.
 *
 * ARCHITECTURE : tokio RwLock map + JSON file, loaded once at boot.
 */

use crate::models::{Device, DeviceCreate, DeviceUpdate, DevicesMap};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Device {0} already registered")]
    AlreadyExists(String),
    #[error("Device {0} not found")]
    NotFound(String),
    #[error("device store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("device store format: {0}")]
    Format(#[from] serde_json::Error),
}

pub struct DeviceRegistry {
    devices: RwLock<DevicesMap>,
    data_file: Option<PathBuf>,
}

pub type SharedDeviceRegistry = Arc<DeviceRegistry>;

impl DeviceRegistry {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            data_file: Some(data_file.into()),
        }
    }

    /// Registry without a backing file (tests, ephemeral setups)
    pub fn in_memory() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            data_file: None,
        }
    }

    /// Load devices from the JSON file. Every device starts offline.
    pub async fn load_devices(&self) -> Result<usize, RegistryError> {
        let Some(path) = &self.data_file else {
            return Ok(0);
        };
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "no device file yet, starting fresh");
            return Ok(0);
        }

        let content = tokio::fs::read_to_string(path).await?;
        let mut loaded: DevicesMap = serde_json::from_str(&content)?;
        for device in loaded.values_mut() {
            device.is_online = false;
        }

        let count = loaded.len();
        *self.devices.write().await = loaded;
        tracing::info!(count, path = %path.display(), "devices loaded");
        Ok(count)
    }

    pub async fn save_devices(&self) -> Result<(), RegistryError> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let content = {
            let devices = self.devices.read().await;
            serde_json::to_string_pretty(&*devices)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn persist(&self, reason: &str) {
        if let Err(e) = self.save_devices().await {
            tracing::warn!(error = %e, reason, "failed to save devices");
        }
    }

    pub async fn register_device(&self, req: DeviceCreate) -> Result<Device, RegistryError> {
        let device = {
            let mut devices = self.devices.write().await;
            if devices.contains_key(&req.device_id) {
                return Err(RegistryError::AlreadyExists(req.device_id));
            }
            let device = Device {
                device_id: req.device_id.clone(),
                name: req.name,
                ip_address: req.ip_address,
                location: req.location,
                is_online: false,
                last_seen: None,
                created_at: OffsetDateTime::now_utc(),
            };
            devices.insert(req.device_id, device.clone());
            device
        };

        self.persist("register").await;
        tracing::info!(device_id = %device.device_id, name = %device.name, "device registered");
        Ok(device)
    }

    /// All devices ordered by identifier, optionally only those online
    pub async fn list_devices(&self, online_only: bool) -> Vec<Device> {
        let devices = self.devices.read().await;
        let mut list: Vec<Device> = devices
            .values()
            .filter(|d| !online_only || d.is_online)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        list
    }

    pub async fn get_device(&self, device_id: &str) -> Option<Device> {
        self.devices.read().await.get(device_id).cloned()
    }

    pub async fn contains(&self, device_id: &str) -> bool {
        self.devices.read().await.contains_key(device_id)
    }

    pub async fn update_device(
        &self,
        device_id: &str,
        update: DeviceUpdate,
    ) -> Result<Device, RegistryError> {
        let device = {
            let mut devices = self.devices.write().await;
            let device = devices
                .get_mut(device_id)
                .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;
            if let Some(name) = update.name {
                device.name = name;
            }
            if update.ip_address.is_some() {
                device.ip_address = update.ip_address;
            }
            if update.location.is_some() {
                device.location = update.location;
            }
            device.clone()
        };

        self.persist("update").await;
        Ok(device)
    }

    pub async fn remove_device(&self, device_id: &str) -> Result<Device, RegistryError> {
        let removed = self
            .devices
            .write()
            .await
            .remove(device_id)
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;

        self.persist("remove").await;
        tracing::info!(device_id, "device removed");
        Ok(removed)
    }

    pub async fn counts(&self) -> (usize, usize) {
        let devices = self.devices.read().await;
        let online = devices.values().filter(|d| d.is_online).count();
        (devices.len(), online)
    }

    pub(crate) async fn mark_online(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write().await;
        match devices.get_mut(device_id) {
            Some(device) => {
                device.is_online = true;
                device.last_seen = Some(OffsetDateTime::now_utc());
                true
            }
            None => false,
        }
    }

    /// Refresh last-seen (heartbeat)
    pub(crate) async fn touch(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write().await;
        match devices.get_mut(device_id) {
            Some(device) => {
                device.last_seen = Some(OffsetDateTime::now_utc());
                true
            }
            None => false,
        }
    }

    pub(crate) async fn mark_offline(&self, device_id: &str) {
        let found = {
            let mut devices = self.devices.write().await;
            match devices.get_mut(device_id) {
                Some(device) => {
                    device.is_online = false;
                    device.last_seen = Some(OffsetDateTime::now_utc());
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist("disconnect").await;
        }
    }

    /// Online devices whose last heartbeat is older than `cutoff`
    pub(crate) async fn stale_devices(&self, cutoff: OffsetDateTime) -> Vec<String> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.is_online && d.last_seen.is_some_and(|seen| seen < cutoff))
            .map(|d| d.device_id.clone())
            .collect()
    }
}
