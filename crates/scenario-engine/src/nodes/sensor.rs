//! Sensor device selection, configuration and listeners

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{one_or_many, NodeContext};
use crate::devices::{sensor_types, DeviceData, DeviceFilter, SensorDevice, SensorDeviceType};
use crate::error::{Result, ScenarioError};
use crate::events::ScenarioEvent;

/// Role given to a selected device when the node names none
pub const DEFAULT_DEVICE_NAME: &str = "main";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SelectArgs {
    #[serde(flatten)]
    pub filter: DeviceFilter,
    #[serde(default)]
    pub device_name: Option<String>,
    /// Message shown when several devices match
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceArgs {
    #[serde(default)]
    pub devices: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetConfigArgs {
    #[serde(default)]
    pub devices: Option<Vec<String>>,
    /// `[["generic.acc.report_interval", 20], ["paused", false]]`
    #[serde(default)]
    pub config: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DumpConfigArgs {
    #[serde(default)]
    pub devices: Option<Vec<String>>,
    /// Config keys copied into the metadata
    #[serde(default)]
    pub config: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SensorArgs {
    #[serde(default)]
    pub devices: Option<Vec<String>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub sensors: Option<Vec<String>>,
}

/// Build a config object from `[key, value]` pairs
///
/// Dotted keys are split on their last dot: `generic.acc.report_interval`
/// sets `report_interval` inside the `generic.acc` object.
pub(crate) fn config_object(pairs: &[(String, Value)]) -> Map<String, Value> {
    let mut object = Map::new();
    for (key, value) in pairs {
        match key.rsplit_once('.') {
            Some((sensor, property)) => {
                let entry = object
                    .entry(sensor.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(sensor_config) = entry {
                    sensor_config.insert(property.to_string(), value.clone());
                }
            }
            None => {
                object.insert(key.clone(), value.clone());
            }
        }
    }
    object
}

/// Pick a device matching the filter and bind it to a role
///
/// Returns 1 when no device matches or the chosen option is out of range.
pub(super) async fn select(ctx: &NodeContext<'_>, args: &SelectArgs) -> Result<i32> {
    let scenario = ctx.scenario;
    let candidates: Vec<SensorDevice> = args
        .filter
        .filter(scenario.available_devices())
        .into_iter()
        .cloned()
        .collect();

    let device = match candidates.as_slice() {
        [] => {
            log::info!("'{}': no device matches the selection filter", ctx.node_id);
            return Ok(1);
        }
        [device] => device.clone(),
        _ => {
            let options = candidates
                .iter()
                .map(|d| d.sensor_device_type.as_str().to_string())
                .collect();
            let msg = ctx.format(args.prompt.as_deref());
            let index = ctx
                .prompt(move |prompt_id| ScenarioEvent::WaitOption {
                    prompt_id,
                    title: None,
                    msg,
                    options,
                })
                .await?;
            match usize::try_from(index).ok().and_then(|i| candidates.get(i)) {
                Some(device) => device.clone(),
                None => {
                    log::warn!("'{}': no device at option {}", ctx.node_id, index);
                    return Ok(1);
                }
            }
        }
    };

    let name = args
        .device_name
        .clone()
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());
    let info = scenario.backend().device_info(&device).await?;
    log::info!(
        "Selected {} device as '{}'",
        device.sensor_device_type.as_str(),
        name
    );

    scenario.select_device(DeviceData::new(name.clone(), device));
    scenario.update_metadata(|metadata| {
        metadata.sensor_device_info.insert(name, info);
    });
    scenario.save_metadata()?;
    Ok(0)
}

pub(super) fn set_config(ctx: &NodeContext<'_>, args: &SetConfigArgs) -> Result<i32> {
    let values = config_object(&args.config);
    ctx.scenario.merge_device_config(args.devices.as_deref(), &values);
    ctx.scenario.save_metadata()?;
    Ok(0)
}

/// Copy the listed config keys of each device into the metadata
pub(super) fn dump_config(ctx: &NodeContext<'_>, args: &DumpConfigArgs) -> Result<i32> {
    let scenario = ctx.scenario;
    let devices = scenario.devices_for(args.devices.as_deref());
    scenario.update_metadata(|metadata| {
        for device in &devices {
            let values: Map<String, Value> = args
                .config
                .iter()
                .filter_map(|key| device.config.get(key).map(|v| (key.clone(), v.clone())))
                .collect();
            metadata.merge_device_config(&device.name, &values);
        }
    });
    scenario.save_metadata()?;
    Ok(0)
}

/// Samples of paused devices are dropped before reaching any record
pub(super) fn set_paused(ctx: &NodeContext<'_>, args: &DeviceArgs, paused: bool) -> Result<i32> {
    let mut values = Map::new();
    values.insert("paused".to_string(), Value::Bool(paused));
    ctx.scenario.merge_device_config(args.devices.as_deref(), &values);
    ctx.scenario.save_metadata()?;
    Ok(0)
}

/// Start listeners and the microphone
///
/// Returns 1 when the backend cannot start a sensor.
pub(super) async fn start(ctx: &NodeContext<'_>, args: &SensorArgs) -> Result<i32> {
    let scenario = ctx.scenario;
    let backend = scenario.backend();
    let sensors = args.sensors.clone().unwrap_or_default();

    for device in scenario.devices_for(args.devices.as_deref()) {
        if device.device.sensor_device_type != SensorDeviceType::MobilePhone {
            log::debug!("'{}': skipping non-phone device '{}'", ctx.node_id, device.name);
            continue;
        }
        for sensor in &sensors {
            let config = device.sensor_config(sensor);
            if sensor_types::is_motion(sensor) {
                if scenario.is_sensor_running(&device.name, sensor) {
                    continue;
                }
                let interval = config
                    .get("report_interval")
                    .and_then(Value::as_u64)
                    .unwrap_or(scenario.config().default_report_interval_ms);
                if !backend.start_listening(&device, sensor, interval, &config).await? {
                    log::warn!("Could not start {} on '{}'", sensor, device.name);
                    return Ok(1);
                }
                scenario.sensor_started(&device.name, sensor);
            } else if sensor == sensor_types::MIC {
                if !backend.can_record() {
                    log::warn!("Microphone recording unavailable on '{}'", device.name);
                    return Ok(1);
                }
                if scenario.is_mic_running(&device.name) {
                    return Err(ScenarioError::capability(format!(
                        "microphone already recording on '{}'",
                        device.name
                    )));
                }
                let filename = config
                    .get("filename")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}.wav", device.name));
                let path = scenario.data_path().join(filename);
                let cfg = scenario.config();
                backend
                    .start_recording(&device, &path, cfg.mic_sample_rate, cfg.mic_channels)
                    .await?;
                scenario.mic_started(&device.name);
                scenario.emit(ScenarioEvent::MicRecording { recording: true });
            } else {
                log::warn!("'{}': unsupported sensor '{}'", ctx.node_id, sensor);
            }
        }
    }
    Ok(0)
}

pub(super) async fn stop(ctx: &NodeContext<'_>, args: &SensorArgs) -> Result<i32> {
    let scenario = ctx.scenario;
    let backend = scenario.backend();
    let sensors = args.sensors.clone().unwrap_or_default();

    for device in scenario.devices_for(args.devices.as_deref()) {
        if device.device.sensor_device_type != SensorDeviceType::MobilePhone {
            continue;
        }
        for sensor in &sensors {
            if sensor_types::is_motion(sensor) {
                if !scenario.is_sensor_running(&device.name, sensor) {
                    continue;
                }
                if !backend.stop_listening(&device, sensor).await? {
                    log::warn!("Could not stop {} on '{}'", sensor, device.name);
                    return Ok(1);
                }
                scenario.sensor_stopped(&device.name, sensor);
            } else if sensor == sensor_types::MIC && scenario.mic_stopped(&device.name) {
                backend.stop_recording(&device).await?;
                scenario.emit(ScenarioEvent::MicRecording { recording: false });
            }
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_object_nests_dotted_keys() {
        let pairs = vec![
            ("generic.acc.report_interval".to_string(), json!(20)),
            ("generic.acc.filename".to_string(), json!("acc.bin")),
            ("paused".to_string(), json!(false)),
        ];
        assert_eq!(
            Value::Object(config_object(&pairs)),
            json!({
                "generic.acc": {"report_interval": 20, "filename": "acc.bin"},
                "paused": false
            })
        );
    }

    #[test]
    fn test_select_args_flatten_filter() {
        let args: SelectArgs = serde_json::from_value(json!({
            "sensor_device_type": "mobile_phone",
            "required_sensors": "generic.acc",
            "device_name": "phone"
        }))
        .unwrap();
        assert_eq!(args.filter.required_sensors, Some(vec!["generic.acc".to_string()]));
        assert_eq!(args.device_name.as_deref(), Some("phone"));
    }
}
