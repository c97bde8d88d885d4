/**
 * KERNEL CONFIGURATION - YAML file + defaults
 *
 * ROLE : Load kernel.yaml (path from WAREHOUSE_KERNEL_CONFIG) into typed sections.
 * A missing or empty file means defaults; an invalid file is reported and ignored.
 */

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub devices: DevicesConf,
    pub video: VideoConf,
    pub catalog: CatalogConf,
    pub sensors: SensorsConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8000".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DevicesConf {
    pub data_file: String,
    /// Close device sessions silent for longer than this; no sweeper when unset
    pub stale_after_secs: Option<u64>,
}

impl Default for DevicesConf {
    fn default() -> Self {
        Self {
            data_file: "./data/devices.json".into(),
            stale_after_secs: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct VideoConf {
    pub source_url: String,
    pub autostart: bool,
    pub backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub frame_interval_ms: u64,
    pub jpeg_quality: u8,
    pub max_buffer_bytes: usize,
}

impl Default for VideoConf {
    fn default() -> Self {
        Self {
            source_url: "http://192.168.1.100:5001/video_feed".into(),
            autostart: false,
            backoff_ms: 2000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 10_000,
            frame_interval_ms: 33,
            jpeg_quality: 85,
            max_buffer_bytes: warehouse_media::mjpeg::DEFAULT_MAX_BUFFER,
        }
    }
}

impl VideoConf {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConf {
    /// Base URL of the inventory API; the static map below is used when unset
    pub api_base_url: Option<String>,
    pub timeout_ms: u64,
    pub products: HashMap<String, String>,
}

impl Default for CatalogConf {
    fn default() -> Self {
        Self {
            api_base_url: None,
            timeout_ms: 2000,
            products: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SensorsConf {
    /// e.g. "0.0.0.0:5003"; listener disabled when unset
    pub bind: Option<String>,
}

pub fn parse_config(path: &str, txt: &str) -> Result<KernelConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

pub async fn read_config(path: &str) -> Result<KernelConfig, ConfigError> {
    let txt = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
    parse_config(path, &txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("WAREHOUSE_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if !Path::new(&path).exists() {
        tracing::warn!(%path, "no config file, using defaults");
        return KernelConfig::default();
    }
    read_config(&path).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config rejected, using defaults");
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = parse_config(
            "kernel.yaml",
            "video:\n  source_url: http://cam:5001/video_feed\n  autostart: true\ncatalog:\n  products:\n    QR-1: Widget-A\n",
        )
        .unwrap();
        assert_eq!(cfg.video.source_url, "http://cam:5001/video_feed");
        assert!(cfg.video.autostart);
        assert_eq!(cfg.video.backoff_ms, 2000);
        assert_eq!(cfg.video.jpeg_quality, 85);
        assert_eq!(cfg.catalog.products.get("QR-1").map(String::as_str), Some("Widget-A"));
        assert_eq!(cfg.catalog.timeout_ms, 2000);
        assert_eq!(cfg.http.bind, "0.0.0.0:8000");
    }

    #[test]
    fn test_empty_and_invalid_yaml() {
        assert!(parse_config("k.yaml", "  \n").unwrap().sensors.bind.is_none());
        assert!(matches!(
            parse_config("k.yaml", "video: [unterminated"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(&path, "devices:\n  stale_after_secs: 90\n").unwrap();
        let cfg = read_config(path.to_str().unwrap()).await.unwrap();
        assert_eq!(cfg.devices.stale_after_secs, Some(90));
        assert!(read_config("/nonexistent/kernel.yaml").await.is_err());
    }
}
