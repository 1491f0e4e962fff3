//! Acquisition metadata
//!
//! Every run writes `metadata.json` (updated as the scenario progresses)
//! and `scenario.json` (a snapshot of the definition written at start)
//! into its data directory.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ScenarioConfig;
use crate::devices::merge_config;
use crate::error::Result;
use crate::types::{ProfileData, ScenarioDefinition};

pub const METADATA_FILE: &str = "metadata.json";
pub const SCENARIO_FILE: &str = "scenario.json";

/// Current time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn iso_datetime(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Host platform description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os_type: String,
    pub os_version: String,
    pub device_model: String,
    pub device_manufacturer: String,
}

/// Recording application description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_type: String,
    pub app_version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            app_type: "cdc-mobile-app".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordInfo {
    pub filename: String,
    pub create_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent {
    /// `create`, `close`, `pause` or `unpause`
    pub event: String,
    pub record_name: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub timestamp: i64,
    pub record_name: String,
    pub label: String,
}

/// Why a scenario was aborted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortInfo {
    pub reason: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_start_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_end_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_start_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_end_timestamp: Option<i64>,
    pub scenario_id: i64,
    pub data_collection_id: i64,
    pub profile_id: i64,
    pub system_info: SystemInfo,
    pub app_info: AppInfo,
    #[serde(default)]
    pub sensor_device_info: Map<String, Value>,
    #[serde(default)]
    pub sensor_device_config: Map<String, Value>,
    #[serde(default)]
    pub record_info: BTreeMap<String, RecordInfo>,
    #[serde(default)]
    pub record_events: Vec<RecordEvent>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub extra_metadata: Map<String, Value>,
    pub abort: Option<AbortInfo>,
}

impl ScenarioMetadata {
    pub fn new(definition: &ScenarioDefinition, profile: &ProfileData, config: &ScenarioConfig) -> Self {
        Self {
            version: config.metadata_version,
            acquisition_start_datetime: None,
            acquisition_end_datetime: None,
            acquisition_start_timestamp: None,
            acquisition_end_timestamp: None,
            scenario_id: definition.scenario_id,
            data_collection_id: definition.data_collection_id,
            profile_id: profile.profile_id,
            system_info: config.system_info.clone(),
            app_info: config.app_info.clone(),
            sensor_device_info: Map::new(),
            sensor_device_config: Map::new(),
            record_info: BTreeMap::new(),
            record_events: Vec::new(),
            annotations: Vec::new(),
            extra_metadata: Map::new(),
            abort: None,
        }
    }

    pub fn mark_start(&mut self, timestamp_ms: i64) {
        self.acquisition_start_timestamp = Some(timestamp_ms);
        self.acquisition_start_datetime = Some(iso_datetime(timestamp_ms));
    }

    pub fn mark_end(&mut self, timestamp_ms: i64) {
        self.acquisition_end_timestamp = Some(timestamp_ms);
        self.acquisition_end_datetime = Some(iso_datetime(timestamp_ms));
    }

    pub fn push_record_event(&mut self, event: &str, record_name: &str) {
        self.record_events.push(RecordEvent {
            event: event.to_string(),
            record_name: record_name.to_string(),
            timestamp: now_millis(),
        });
    }

    /// Merge keys into `sensor_device_config[device]`
    pub fn merge_device_config(&mut self, device: &str, values: &Map<String, Value>) {
        let entry = self
            .sensor_device_config
            .entry(device.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(config) = entry {
            merge_config(config, values);
        }
    }

    /// Write `metadata.json` into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(METADATA_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        log::debug!("Saved scenario metadata to {:?}", path);
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Serialize)]
struct ScenarioSnapshot<'a> {
    id: i64,
    content: &'a crate::types::ScenarioContent,
    info: &'a crate::types::ScenarioInfo,
}

/// Write the `{id, content, info}` snapshot into `dir`
pub fn save_scenario_snapshot(dir: &Path, definition: &ScenarioDefinition) -> Result<()> {
    let snapshot = ScenarioSnapshot {
        id: definition.scenario_id,
        content: &definition.scenario_content,
        info: &definition.scenario_info,
    };
    let path = dir.join(SCENARIO_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
    log::debug!("Saved scenario snapshot to {:?}", path);
    Ok(())
}
