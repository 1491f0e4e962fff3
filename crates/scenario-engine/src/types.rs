//! Scenario definition types
//!
//! A scenario is a directed graph of primitive operations. Each node names
//! a primitive, carries free-form keyword arguments and lists its successors
//! indexed by the integer result code the primitive returns.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::devices::SensorDeviceType;

/// Unique identifier of a node in the scenario graph
pub type NodeId = String;

/// The closed vocabulary of primitives a node can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveName {
    Nop,
    Fork,
    Join,
    Abort,
    WaitDelay,
    WaitNext,
    WaitOption,
    DisableScreenSleep,
    DisplayMsg,
    DisplayPage,
    DisplayClear,
    DisplayProgress,
    EventCreate,
    EventReset,
    EventSet,
    EventWait,
    EventWaitAll,
    CounterSet,
    CounterInc,
    CounterDec,
    CounterEqu,
    CounterCmp,
    MetadataSet,
    LogInfo,
    RecordCreate,
    RecordClose,
    RecordPause,
    RecordUnpause,
    RecordAnnotate,
    LogCreate,
    LogClose,
    LogPause,
    LogUnpause,
    LogAnnotate,
    SensorDeviceSelect,
    SensorDeviceSetConfig,
    SensorDeviceDumpConfig,
    SensorDevicePauseSensor,
    SensorDeviceUnpauseSensor,
    SensorDeviceStartSensor,
    SensorDeviceStopSensor,
    SensorDeviceStartRecord,
    SensorDeviceStopRecord,
    SensorDeviceTagRecord,
    SensorDeviceDownloadRecord,
}

impl PrimitiveName {
    /// Name as written in scenario definitions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Fork => "fork",
            Self::Join => "join",
            Self::Abort => "abort",
            Self::WaitDelay => "wait_delay",
            Self::WaitNext => "wait_next",
            Self::WaitOption => "wait_option",
            Self::DisableScreenSleep => "disable_screen_sleep",
            Self::DisplayMsg => "display_msg",
            Self::DisplayPage => "display_page",
            Self::DisplayClear => "display_clear",
            Self::DisplayProgress => "display_progress",
            Self::EventCreate => "event_create",
            Self::EventReset => "event_reset",
            Self::EventSet => "event_set",
            Self::EventWait => "event_wait",
            Self::EventWaitAll => "event_wait_all",
            Self::CounterSet => "counter_set",
            Self::CounterInc => "counter_inc",
            Self::CounterDec => "counter_dec",
            Self::CounterEqu => "counter_equ",
            Self::CounterCmp => "counter_cmp",
            Self::MetadataSet => "metadata_set",
            Self::LogInfo => "log_info",
            Self::RecordCreate => "record_create",
            Self::RecordClose => "record_close",
            Self::RecordPause => "record_pause",
            Self::RecordUnpause => "record_unpause",
            Self::RecordAnnotate => "record_annotate",
            Self::LogCreate => "log_create",
            Self::LogClose => "log_close",
            Self::LogPause => "log_pause",
            Self::LogUnpause => "log_unpause",
            Self::LogAnnotate => "log_annotate",
            Self::SensorDeviceSelect => "sensor_device_select",
            Self::SensorDeviceSetConfig => "sensor_device_set_config",
            Self::SensorDeviceDumpConfig => "sensor_device_dump_config",
            Self::SensorDevicePauseSensor => "sensor_device_pause_sensor",
            Self::SensorDeviceUnpauseSensor => "sensor_device_unpause_sensor",
            Self::SensorDeviceStartSensor => "sensor_device_start_sensor",
            Self::SensorDeviceStopSensor => "sensor_device_stop_sensor",
            Self::SensorDeviceStartRecord => "sensor_device_start_record",
            Self::SensorDeviceStopRecord => "sensor_device_stop_record",
            Self::SensorDeviceTagRecord => "sensor_device_tag_record",
            Self::SensorDeviceDownloadRecord => "sensor_device_download_record",
        }
    }
}

impl fmt::Display for PrimitiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the scenario graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub primitive_name: PrimitiveName,
    /// Keyword arguments, shape depends on `primitive_name`
    #[serde(default)]
    pub primitive_kwargs: Value,
    /// Successors indexed by result code; `null` means no successor
    #[serde(default)]
    pub next_nodes: Vec<Option<NodeId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl NodeDef {
    pub fn new(primitive_name: PrimitiveName) -> Self {
        Self {
            primitive_name,
            primitive_kwargs: Value::Object(Map::new()),
            next_nodes: Vec::new(),
            step: None,
        }
    }

    pub fn with_kwargs(mut self, kwargs: Value) -> Self {
        self.primitive_kwargs = kwargs;
        self
    }

    /// Append a successor for the next result code
    pub fn then(mut self, node_id: impl Into<NodeId>) -> Self {
        self.next_nodes.push(Some(node_id.into()));
        self
    }

    pub fn with_next_nodes<I, S>(mut self, next_nodes: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<NodeId>,
    {
        self.next_nodes = next_nodes.into_iter().map(|n| n.map(Into::into)).collect();
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Successor for a result code, if declared
    pub fn next_node(&self, result: i32) -> Option<&str> {
        let index = usize::try_from(result).ok()?;
        self.next_nodes
            .get(index)?
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// A device type the scenario cannot run without
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredSensorDevice {
    pub sensor_device_type: SensorDeviceType,
    #[serde(default)]
    pub required_sensors: Vec<String>,
}

/// Descriptive part of a scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required_sensor_devices: Vec<RequiredSensorDevice>,
    /// Any other keys, kept verbatim for the snapshot
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The executable part of a scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioContent {
    #[serde(default)]
    pub version: u32,
    pub nodes: HashMap<NodeId, NodeDef>,
    pub entry_node: NodeId,
    #[serde(default)]
    pub texts: HashMap<String, String>,
    #[serde(default)]
    pub resources: HashMap<String, String>,
    #[serde(default)]
    pub steps: Map<String, Value>,
}

impl ScenarioContent {
    pub fn new(entry_node: impl Into<NodeId>) -> Self {
        Self {
            entry_node: entry_node.into(),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, id: impl Into<NodeId>, node: NodeDef) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }

    pub fn with_text(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.texts.insert(key.into(), text.into());
        self
    }

    pub fn with_resource(mut self, key: impl Into<String>, resource: impl Into<String>) -> Self {
        self.resources.insert(key.into(), resource.into());
        self
    }
}

/// A complete scenario as delivered by the service layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub data_collection_id: i64,
    pub scenario_id: i64,
    #[serde(default)]
    pub scenario_info: ScenarioInfo,
    pub scenario_content: ScenarioContent,
}

impl ScenarioDefinition {
    pub fn new(scenario_id: i64, content: ScenarioContent) -> Self {
        Self {
            scenario_id,
            scenario_content: content,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Participant running the scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    pub profile_id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileData {
    pub fn new(profile_id: i64) -> Self {
        Self {
            profile_id,
            extra: Map::new(),
        }
    }
}

/// Scenario lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Stopped,
    Paused,
    Running,
}

/// Point a branch can be resumed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPoint {
    pub node_id: NodeId,
    /// Result code of the node that led here; `None` for a branch entry
    pub prev_result: Option<i32>,
}

impl ExecutionPoint {
    pub fn entry(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            prev_result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_def_deserialize() {
        let node: NodeDef = serde_json::from_value(json!({
            "primitive_name": "counter_equ",
            "primitive_kwargs": {"name": "x", "value": 5},
            "next_nodes": ["ok", null, "greater"],
            "step": "intro"
        }))
        .unwrap();

        assert_eq!(node.primitive_name, PrimitiveName::CounterEqu);
        assert_eq!(node.next_node(0), Some("ok"));
        assert_eq!(node.next_node(1), None);
        assert_eq!(node.next_node(2), Some("greater"));
        assert_eq!(node.next_node(3), None);
        assert_eq!(node.next_node(-1), None);
        assert_eq!(node.step.as_deref(), Some("intro"));
    }

    #[test]
    fn test_unknown_primitive_rejected() {
        let result: std::result::Result<NodeDef, _> =
            serde_json::from_value(json!({"primitive_name": "teleport"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_primitive_name_matches_serde() {
        for name in [
            PrimitiveName::Nop,
            PrimitiveName::EventWaitAll,
            PrimitiveName::SensorDeviceDownloadRecord,
            PrimitiveName::DisableScreenSleep,
        ] {
            assert_eq!(serde_json::to_value(name).unwrap(), json!(name.as_str()));
        }
    }

    #[test]
    fn test_definition_keeps_unknown_info() {
        let def = ScenarioDefinition::from_json(
            r#"{
                "data_collection_id": 3,
                "scenario_id": 12,
                "scenario_info": {
                    "title": "Walk",
                    "priority": 2,
                    "required_sensor_devices": [
                        {"sensor_device_type": "mobile_phone", "required_sensors": ["generic.acc"]}
                    ]
                },
                "scenario_content": {
                    "entry_node": "a",
                    "nodes": {"a": {"primitive_name": "nop"}}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(def.scenario_info.extra.get("priority"), Some(&json!(2)));
        assert_eq!(def.scenario_info.required_sensor_devices.len(), 1);
        assert_eq!(def.scenario_content.nodes["a"].primitive_kwargs, Value::Null);
    }
}
