//! Record files, annotations and free-form metadata

use serde::Deserialize;
use serde_json::{json, Map, Value};

use sensor_log::{
    file_name_with_extension, FileLogger, RecordWriter, SensorDescriptor, RECORD_EXTENSION,
};

use super::{one_or_many, NodeContext};
use crate::devices::sensor_types;
use crate::error::Result;
use crate::metadata::{now_millis, Annotation, RecordInfo};

const MIC_EXTENSION: &str = "wav";

/// Frame id carrying samples of a motion sensor
pub(crate) fn frame_id_for_sensor(sensor: &str) -> Option<u8> {
    match sensor {
        sensor_types::ACC => Some(SensorDescriptor::ID_ACC),
        sensor_types::GYR => Some(SensorDescriptor::ID_GYR),
        sensor_types::UNCAL_ACC => Some(SensorDescriptor::ID_UNCAL_ACC),
        sensor_types::UNCAL_GYR => Some(SensorDescriptor::ID_UNCAL_GYR),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    Create,
    Close,
    Pause,
    Unpause,
    Annotate,
}

impl RecordOp {
    /// Name stored in `record_events`, annotations are not record events
    fn event_name(self) -> Option<&'static str> {
        match self {
            Self::Create => Some("create"),
            Self::Close => Some("close"),
            Self::Pause => Some("pause"),
            Self::Unpause => Some("unpause"),
            Self::Annotate => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordArgs {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub sensors: Option<Vec<String>>,
    /// Device roles the record applies to; all selected devices when absent
    #[serde(default)]
    pub devices: Option<Vec<String>>,
    /// Create the record paused
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetadataSetArgs {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogInfoArgs {
    #[serde(default)]
    pub message: String,
}

pub(super) fn execute(ctx: &NodeContext<'_>, op: RecordOp, args: &RecordArgs) -> Result<i32> {
    let scenario = ctx.scenario;
    match op {
        RecordOp::Create => create(ctx, args)?,
        RecordOp::Close => {
            if !scenario.close_writer(&args.name)? {
                log::debug!("record '{}' has no open writer", args.name);
            }
        }
        RecordOp::Pause | RecordOp::Unpause => {
            if !scenario.set_writer_paused(&args.name, op == RecordOp::Pause) {
                log::debug!("record '{}' has no open writer", args.name);
            }
        }
        RecordOp::Annotate => {
            let annotation = Annotation {
                timestamp: now_millis(),
                record_name: args.name.clone(),
                label: args.label.clone().unwrap_or_default(),
            };
            scenario.update_metadata(|metadata| metadata.annotations.push(annotation));
        }
    }

    if let Some(event) = op.event_name() {
        scenario.update_metadata(|metadata| metadata.push_record_event(event, &args.name));
    }
    scenario.save_metadata()?;
    Ok(0)
}

/// Open the record file, or hand the file name to the microphone device
fn create(ctx: &NodeContext<'_>, args: &RecordArgs) -> Result<()> {
    let scenario = ctx.scenario;
    let sensors = args.sensors.clone().unwrap_or_default();
    let Some(first) = sensors.first() else {
        log::warn!("record '{}' lists no sensors", args.name);
        return Ok(());
    };

    let filename = if first == sensor_types::MIC {
        let filename = file_name_with_extension(&args.name, MIC_EXTENSION);
        let mut values = Map::new();
        values.insert(sensor_types::MIC.to_string(), json!({ "filename": filename }));
        scenario.merge_device_config(args.devices.as_deref(), &values);
        filename
    } else {
        if !scenario.has_writer(&args.name) {
            let logger = FileLogger::new(scenario.data_path(), &args.name, RECORD_EXTENSION)
                .with_buffer_count(scenario.config().logger_buffer_count);
            // The header is always written, pausing only affects frames
            let mut writer = RecordWriter::new(logger, SensorDescriptor::mobile_phone(true, true))?;
            writer.set_paused(args.paused);
            scenario.add_writer(&args.name, writer, &sensors);
        }
        file_name_with_extension(&args.name, RECORD_EXTENSION)
    };

    let info = RecordInfo {
        filename,
        create_timestamp: now_millis(),
    };
    scenario.update_metadata(|metadata| {
        metadata.record_info.insert(args.name.clone(), info);
    });
    Ok(())
}

pub(super) fn metadata_set(ctx: &NodeContext<'_>, args: &MetadataSetArgs) -> Result<i32> {
    let (key, value) = (args.key.clone(), args.value.clone());
    ctx.scenario.update_metadata(|metadata| {
        metadata.extra_metadata.insert(key, value);
    });
    ctx.scenario.save_metadata()?;
    Ok(0)
}

pub(super) fn log_info(ctx: &NodeContext<'_>, args: &LogInfoArgs) -> Result<i32> {
    ctx.scenario.write_log_info(&args.message)?;
    Ok(0)
}
