//! Sensor devices and the backend that drives them
//!
//! Devices are described by the service layer. The engine only filters
//! them, keeps per-role configuration and asks a [`SensorBackend`] to start
//! or stop listeners. Samples flow back through
//! [`Scenario::on_sensor_sample`](crate::Scenario::on_sensor_sample).

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::RequiredSensorDevice;

/// Generic sensor type names understood by the engine
pub mod sensor_types {
    pub const ACC: &str = "generic.acc";
    pub const GYR: &str = "generic.gyr";
    pub const UNCAL_ACC: &str = "generic.uncal_acc";
    pub const UNCAL_GYR: &str = "generic.uncal_gyr";
    pub const MIC: &str = "generic.mic";

    /// Motion sensors delivered as listener callbacks
    pub fn is_motion(sensor: &str) -> bool {
        matches!(sensor, ACC | GYR | UNCAL_ACC | UNCAL_GYR)
    }
}

/// Kind of sensor device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorDeviceType {
    MobilePhone,
    Esp32Logger,
}

impl SensorDeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MobilePhone => "mobile_phone",
            Self::Esp32Logger => "esp32_logger",
        }
    }
}

/// One sensor exposed by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    /// Manufacturer, model, odr range...
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl SensorInfo {
    pub fn new(sensor_type: impl Into<String>) -> Self {
        let sensor_type = sensor_type.into();
        Self {
            name: sensor_type.clone(),
            sensor_type,
            properties: Map::new(),
        }
    }

    /// Property lookup including `name` and `type`
    pub fn property(&self, key: &str) -> Option<Value> {
        match key {
            "name" => Some(Value::String(self.name.clone())),
            "type" => Some(Value::String(self.sensor_type.clone())),
            _ => self.properties.get(key).cloned(),
        }
    }
}

/// A physical device able to produce sensor data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDevice {
    pub sensor_device_type: SensorDeviceType,
    #[serde(default)]
    pub sensors_list: Vec<SensorInfo>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl SensorDevice {
    pub fn new(sensor_device_type: SensorDeviceType, sensors: &[&str]) -> Self {
        Self {
            sensor_device_type,
            sensors_list: sensors.iter().map(|s| SensorInfo::new(*s)).collect(),
            properties: Map::new(),
        }
    }

    pub fn mobile_phone(sensors: &[&str]) -> Self {
        Self::new(SensorDeviceType::MobilePhone, sensors)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn has_sensor(&self, sensor_type: &str) -> bool {
        self.sensors_list.iter().any(|s| s.sensor_type == sensor_type)
    }

    /// Property lookup including `sensor_device_type`
    pub fn property(&self, key: &str) -> Option<Value> {
        match key {
            "sensor_device_type" => Some(Value::String(self.sensor_device_type.as_str().to_string())),
            _ => self.properties.get(key).cloned(),
        }
    }
}

/// A selected device bound to a role name, with its runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    pub name: String,
    pub device: SensorDevice,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl DeviceData {
    pub fn new(name: impl Into<String>, device: SensorDevice) -> Self {
        Self {
            name: name.into(),
            device,
            config: Map::new(),
        }
    }

    /// `paused` config flag set by `sensor_device_pause_sensor`
    pub fn is_paused(&self) -> bool {
        self.config.get("paused").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Per-sensor config object (`config["generic.acc"]`)
    pub fn sensor_config(&self, sensor: &str) -> Map<String, Value> {
        self.config
            .get(sensor)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// Merge `values` into `target`; object values are merged one level deep
///
/// `{"generic.acc": {"report_interval": 20}}` only replaces that key of the
/// existing `generic.acc` object.
pub fn merge_config(target: &mut Map<String, Value>, values: &Map<String, Value>) {
    for (key, value) in values {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(update)) => {
                for (k, v) in update {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Predicates used by `sensor_device_select`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceFilter {
    #[serde(default)]
    pub sensor_device_type: Option<SensorDeviceType>,
    #[serde(default, deserialize_with = "crate::nodes::one_or_many")]
    pub required_sensors: Option<Vec<String>>,
    /// `{property: value | [allowed values]}`
    #[serde(default)]
    pub required_properties: Option<Map<String, Value>>,
    /// `{sensor_type: {property: value | [allowed values]}}`
    #[serde(default)]
    pub required_sensor_properties: Option<Map<String, Value>>,
}

/// `expected` is either the exact value or an array of allowed values
fn property_matches(actual: Option<Value>, expected: &Value) -> bool {
    let actual = actual.unwrap_or(Value::Null);
    match expected {
        Value::Array(allowed) => allowed.contains(&actual),
        other => &actual == other,
    }
}

impl DeviceFilter {
    pub fn matches(&self, device: &SensorDevice) -> bool {
        if let Some(device_type) = self.sensor_device_type {
            if device.sensor_device_type != device_type {
                return false;
            }
        }
        if let Some(required) = &self.required_sensors {
            if !required.iter().all(|s| device.has_sensor(s)) {
                return false;
            }
        }
        if let Some(required) = &self.required_properties {
            if !required
                .iter()
                .all(|(key, expected)| property_matches(device.property(key), expected))
            {
                return false;
            }
        }
        if let Some(required) = &self.required_sensor_properties {
            for sensor in &device.sensors_list {
                let Some(props) = required.get(&sensor.sensor_type).and_then(Value::as_object) else {
                    continue;
                };
                if !props
                    .iter()
                    .all(|(key, expected)| property_matches(sensor.property(key), expected))
                {
                    return false;
                }
            }
        }
        true
    }

    /// Devices passing every predicate, in input order
    pub fn filter<'a>(&self, devices: &'a [SensorDevice]) -> Vec<&'a SensorDevice> {
        devices.iter().filter(|d| self.matches(d)).collect()
    }
}

/// Devices satisfying at least one entry of a scenario's required device list
///
/// An empty requirement list accepts every device.
pub fn filter_required_devices(
    devices: &[SensorDevice],
    required: &[RequiredSensorDevice],
) -> Vec<SensorDevice> {
    if required.is_empty() {
        return devices.to_vec();
    }
    devices
        .iter()
        .filter(|device| {
            required.iter().any(|r| {
                r.sensor_device_type == device.sensor_device_type
                    && r.required_sensors.iter().all(|s| device.has_sensor(s))
            })
        })
        .cloned()
        .collect()
}

/// Platform sensor access
///
/// Implemented by the host. Listener callbacks must be forwarded to
/// [`Scenario::on_sensor_sample`](crate::Scenario::on_sensor_sample).
#[async_trait]
pub trait SensorBackend: Send + Sync {
    /// Start a motion sensor listener; `false` when the sensor is unavailable
    async fn start_listening(
        &self,
        device: &DeviceData,
        sensor: &str,
        report_interval_ms: u64,
        config: &Map<String, Value>,
    ) -> Result<bool>;

    /// Stop a running listener; `false` when it could not be stopped
    async fn stop_listening(&self, device: &DeviceData, sensor: &str) -> Result<bool>;

    /// Whether the microphone can be recorded
    fn can_record(&self) -> bool;

    /// Start recording the microphone into a PCM `.wav` file
    async fn start_recording(
        &self,
        device: &DeviceData,
        path: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> Result<()>;

    async fn stop_recording(&self, device: &DeviceData) -> Result<()>;

    /// Description stored in `metadata.sensor_device_info`
    async fn device_info(&self, device: &SensorDevice) -> Result<Value> {
        Ok(serde_json::to_value(device)?)
    }
}

/// A backend without any sensors
pub struct NullSensorBackend;

#[async_trait]
impl SensorBackend for NullSensorBackend {
    async fn start_listening(
        &self,
        _device: &DeviceData,
        _sensor: &str,
        _report_interval_ms: u64,
        _config: &Map<String, Value>,
    ) -> Result<bool> {
        Ok(false)
    }

    async fn stop_listening(&self, _device: &DeviceData, _sensor: &str) -> Result<bool> {
        Ok(true)
    }

    fn can_record(&self) -> bool {
        false
    }

    async fn start_recording(
        &self,
        _device: &DeviceData,
        _path: &Path,
        _sample_rate: u32,
        _channels: u16,
    ) -> Result<()> {
        Err(crate::ScenarioError::capability("microphone recording"))
    }

    async fn stop_recording(&self, _device: &DeviceData) -> Result<()> {
        Ok(())
    }
}
