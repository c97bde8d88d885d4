use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub devices_registered: usize,
    pub devices_connected: usize,
    pub video_running: bool,
    pub video_state: String,
    pub viewers: usize,
    pub cached_products: usize,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

pub fn memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_and_memory() {
        let tracker = HealthTracker::new();
        assert!(tracker.uptime_seconds() < 5);
        #[cfg(target_os = "linux")]
        assert!(memory_usage_mb() > 0.0);
    }
}
