//! Engine configuration
//!
//! Loaded from a JSON file by the host; every key is optional.
//!
//! ```json
//! {
//!   "data_root": "/sdcard/scenarios",
//!   "app_info": { "app_type": "cdc-mobile-app", "app_version": "1.4.0.212" },
//!   "logger_buffer_count": 10
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metadata::{AppInfo, SystemInfo};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Directory receiving one sub-directory per run
    pub data_root: PathBuf,
    pub app_info: AppInfo,
    pub system_info: SystemInfo,
    /// Pending writes kept in memory by file loggers before a flush
    pub logger_buffer_count: usize,
    /// Listener report interval when the sensor config has no `report_interval`
    pub default_report_interval_ms: u64,
    pub mic_sample_rate: u32,
    pub mic_channels: u16,
    /// `version` field of `metadata.json`
    pub metadata_version: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("scenarios"),
            app_info: AppInfo::default(),
            system_info: SystemInfo {
                os_type: std::env::consts::OS.to_string(),
                ..Default::default()
            },
            logger_buffer_count: sensor_log::FileLogger::DEFAULT_BUFFER_COUNT,
            default_report_interval_ms: 100,
            mic_sample_rate: 16_000,
            mic_channels: 2,
            metadata_version: 1,
        }
    }
}

impl ScenarioConfig {
    /// Load from a JSON file, missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&content)?;
        log::info!("Loaded scenario config from {:?}", path.as_ref());
        Ok(config)
    }

    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = data_root.into();
        self
    }
}
