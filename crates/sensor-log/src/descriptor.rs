//! Sensor descriptor model
//!
//! The descriptor is the self-describing text header at the start of every
//! binary record file. It is line oriented: `KEYWORD=value` lines grouped
//! into blocks opened by a bare keyword line.
//!
//! ```text
//! SENSOR
//! ID=0
//! SENSOR_NAME=generic.acc
//! DRIVER_VERSION=0.0.0
//! FRAME_DESC
//! FRAME_ID=0
//! TIMESTAMP_DATATYPE=UNSIGNED,64BIT,LITTLEENDIAN
//! AXIS
//! NAME=acc_x
//! DATATYPE=FLOAT,32BIT,LITTLEENDIAN
//! ```
//!
//! Parsing is greedy: a block consumes lines for as long as their keyword
//! belongs to it, then hands control back to the enclosing block.

use crate::codec::{FormatCode, StructFormat};
use crate::error::{Result, SensorLogError};

/// Cursor over pre-split `(key, value)` lines
struct LineCursor<'a> {
    lines: Vec<(&'a str, Option<&'a str>)>,
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn new(content: &'a str) -> Self {
        let lines = content
            .split('\n')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_item)
            .collect();
        Self { lines, pos: 0 }
    }

    fn peek_key(&self) -> Option<&'a str> {
        self.lines.get(self.pos).map(|(k, _)| *k)
    }

    fn next(&mut self) -> Option<(&'a str, Option<&'a str>)> {
        let item = self.lines.get(self.pos).copied();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }
}

fn parse_item(line: &str) -> (&str, Option<&str>) {
    match line.split_once('=') {
        Some((key, value)) => {
            let value = value.trim();
            (key.trim(), (!value.is_empty()).then_some(value))
        }
        None => (line, None),
    }
}

fn split_values(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_int<T: std::str::FromStr>(key: &str, value: Option<&str>) -> Result<T> {
    let raw = value.unwrap_or_default();
    raw.parse().map_err(|_| SensorLogError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_datatype(value: Option<&str>) -> Result<StructFormat> {
    StructFormat::from_datatype(value.unwrap_or_default())
}

/// A keyword block of the descriptor
trait Block: Default {
    const KEYWORDS: &'static [&'static str];

    fn apply(&mut self, key: &str, value: Option<&str>, lines: &mut LineCursor<'_>) -> Result<()>;

    fn parse(lines: &mut LineCursor<'_>) -> Result<Self> {
        let mut block = Self::default();
        while let Some(key) = lines.peek_key() {
            if !Self::KEYWORDS.contains(&key) {
                break;
            }
            if let Some((key, value)) = lines.next() {
                block.apply(key, value, lines)?;
            }
        }
        Ok(block)
    }
}

/// Sensor parameter (`PARAM` block)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorParam {
    pub name: Option<String>,
    pub datatype: Option<StructFormat>,
    pub values: Vec<String>,
    pub unit: Option<String>,
}

impl Block for SensorParam {
    const KEYWORDS: &'static [&'static str] = &["NAME", "DATATYPE", "VALUES", "UNIT"];

    fn apply(&mut self, key: &str, value: Option<&str>, _lines: &mut LineCursor<'_>) -> Result<()> {
        match key {
            "NAME" => self.name = value.map(str::to_string),
            "DATATYPE" => self.datatype = Some(parse_datatype(value)?),
            "VALUES" => self.values = split_values(value),
            "UNIT" => self.unit = value.map(str::to_string),
            _ => {}
        }
        Ok(())
    }
}

impl SensorParam {
    fn format_desc(&self, lines: &mut Vec<String>) {
        if let Some(name) = &self.name {
            lines.push(format!("NAME={}", name));
        }
        if let Some(datatype) = &self.datatype {
            lines.push(format!("DATATYPE={}", datatype.to_datatype()));
        }
        lines.push(format!("VALUES={}", self.values.join(",")));
        if let Some(unit) = &self.unit {
            lines.push(format!("UNIT={}", unit));
        }
    }
}

/// One physical sensor (`SENSOR` block)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorItem {
    pub id: u32,
    pub sensor_name: Option<String>,
    pub driver_version: Option<String>,
    pub params: Vec<SensorParam>,
}

impl SensorItem {
    pub fn new(id: u32, sensor_name: impl Into<String>, driver_version: impl Into<String>) -> Self {
        Self {
            id,
            sensor_name: Some(sensor_name.into()),
            driver_version: Some(driver_version.into()),
            params: Vec::new(),
        }
    }

    fn format_desc(&self, lines: &mut Vec<String>) {
        lines.push(format!("ID={}", self.id));
        if let Some(name) = &self.sensor_name {
            lines.push(format!("SENSOR_NAME={}", name));
        }
        if let Some(version) = &self.driver_version {
            lines.push(format!("DRIVER_VERSION={}", version));
        }
        for param in &self.params {
            lines.push("PARAM".to_string());
            param.format_desc(lines);
        }
    }
}

impl Block for SensorItem {
    const KEYWORDS: &'static [&'static str] = &["ID", "SENSOR_NAME", "DRIVER_VERSION", "PARAM"];

    fn apply(&mut self, key: &str, value: Option<&str>, lines: &mut LineCursor<'_>) -> Result<()> {
        match key {
            "ID" => self.id = parse_int(key, value)?,
            "SENSOR_NAME" => self.sensor_name = value.map(str::to_string),
            "DRIVER_VERSION" => self.driver_version = value.map(str::to_string),
            "PARAM" => self.params.push(SensorParam::parse(lines)?),
            _ => {}
        }
        Ok(())
    }
}

/// One axis of a frame (`AXIS` block)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAxis {
    pub name: Option<String>,
    pub datatype: Option<StructFormat>,
    pub plot_id: Option<String>,
    pub bar_id: Option<String>,
    pub picture_id: Option<String>,
}

impl FrameAxis {
    pub fn new(name: impl Into<String>, datatype: StructFormat) -> Self {
        Self {
            name: Some(name.into()),
            datatype: Some(datatype),
            ..Default::default()
        }
    }

    fn format_desc(&self, lines: &mut Vec<String>) {
        if let Some(name) = &self.name {
            lines.push(format!("NAME={}", name));
        }
        if let Some(datatype) = &self.datatype {
            lines.push(format!("DATATYPE={}", datatype.to_datatype()));
        }
        if let Some(plot_id) = &self.plot_id {
            lines.push(format!("PLOT_ID={}", plot_id));
        }
        if let Some(bar_id) = &self.bar_id {
            lines.push(format!("BAR_ID={}", bar_id));
        }
        if let Some(picture_id) = &self.picture_id {
            lines.push(format!("PICTURE_ID={}", picture_id));
        }
    }
}

impl Block for FrameAxis {
    const KEYWORDS: &'static [&'static str] = &["NAME", "DATATYPE", "PLOT_ID", "BAR_ID", "PICTURE_ID"];

    fn apply(&mut self, key: &str, value: Option<&str>, _lines: &mut LineCursor<'_>) -> Result<()> {
        match key {
            "NAME" => self.name = value.map(str::to_string),
            "DATATYPE" => self.datatype = Some(parse_datatype(value)?),
            "PLOT_ID" => self.plot_id = value.map(str::to_string),
            "BAR_ID" => self.bar_id = value.map(str::to_string),
            "PICTURE_ID" => self.picture_id = value.map(str::to_string),
            _ => {}
        }
        Ok(())
    }
}

/// Layout of one frame id (`FRAME_DESC` block)
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDesc {
    pub frame_id: u8,
    pub timestamp_datatype: StructFormat,
    /// Present for multi frames: per-sample timestamp increment
    pub incr_time_datatype: Option<StructFormat>,
    pub axis: Vec<FrameAxis>,
}

impl Default for FrameDesc {
    fn default() -> Self {
        Self {
            frame_id: 0,
            timestamp_datatype: StructFormat::le(FormatCode::U64),
            incr_time_datatype: None,
            axis: Vec::new(),
        }
    }
}

impl FrameDesc {
    pub fn new(frame_id: u8, axis: Vec<FrameAxis>) -> Self {
        Self {
            frame_id,
            axis,
            ..Default::default()
        }
    }

    pub fn with_increment(mut self, datatype: StructFormat) -> Self {
        self.incr_time_datatype = Some(datatype);
        self
    }

    pub fn is_multi_frame(&self) -> bool {
        self.incr_time_datatype.is_some()
    }

    /// Axis formats in descriptor order
    pub fn axis_formats(&self) -> Result<Vec<StructFormat>> {
        self.axis
            .iter()
            .map(|axis| {
                axis.datatype.ok_or_else(|| SensorLogError::InvalidValue {
                    key: "DATATYPE".to_string(),
                    value: axis.name.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    fn format_desc(&self, lines: &mut Vec<String>) {
        lines.push(format!("FRAME_ID={}", self.frame_id));
        lines.push(format!("TIMESTAMP_DATATYPE={}", self.timestamp_datatype.to_datatype()));
        if let Some(incr) = &self.incr_time_datatype {
            lines.push(format!("INCR_TIME_DATATYPE={}", incr.to_datatype()));
        }
        for axis in &self.axis {
            lines.push("AXIS".to_string());
            axis.format_desc(lines);
        }
    }
}

impl Block for FrameDesc {
    const KEYWORDS: &'static [&'static str] =
        &["FRAME_ID", "TIMESTAMP_DATATYPE", "INCR_TIME_DATATYPE", "AXIS"];

    fn apply(&mut self, key: &str, value: Option<&str>, lines: &mut LineCursor<'_>) -> Result<()> {
        match key {
            "FRAME_ID" => self.frame_id = parse_int(key, value)?,
            "TIMESTAMP_DATATYPE" => self.timestamp_datatype = parse_datatype(value)?,
            "INCR_TIME_DATATYPE" => self.incr_time_datatype = Some(parse_datatype(value)?),
            "AXIS" => self.axis.push(FrameAxis::parse(lines)?),
            _ => {}
        }
        Ok(())
    }
}

/// UI button (`BUTTON` block)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ButtonItem {
    pub name: Option<String>,
    pub datatype: Option<StructFormat>,
    pub info: Option<String>,
    pub values: Vec<String>,
}

impl ButtonItem {
    fn format_desc(&self, lines: &mut Vec<String>) {
        if let Some(name) = &self.name {
            lines.push(format!("NAME={}", name));
        }
        if let Some(datatype) = &self.datatype {
            lines.push(format!("DATATYPE={}", datatype.to_datatype()));
        }
        if let Some(info) = &self.info {
            lines.push(format!("INFO={}", info));
        }
        lines.push(format!("VALUES={}", self.values.join(",")));
    }
}

impl Block for ButtonItem {
    const KEYWORDS: &'static [&'static str] = &["NAME", "DATATYPE", "INFO", "VALUES"];

    fn apply(&mut self, key: &str, value: Option<&str>, _lines: &mut LineCursor<'_>) -> Result<()> {
        match key {
            "NAME" => self.name = value.map(str::to_string),
            "DATATYPE" => self.datatype = Some(parse_datatype(value)?),
            "INFO" => self.info = value.map(str::to_string),
            "VALUES" => self.values = split_values(value),
            _ => {}
        }
        Ok(())
    }
}

/// Complete sensor descriptor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorDescriptor {
    pub sensor: Vec<SensorItem>,
    pub frame_desc: Vec<FrameDesc>,
    pub plot_name: Vec<String>,
    pub picture_name: Vec<String>,
    pub button: Vec<ButtonItem>,
}

impl Block for SensorDescriptor {
    const KEYWORDS: &'static [&'static str] =
        &["SENSOR", "FRAME_DESC", "PLOT_NAME", "PICTURE_NAME", "BUTTON"];

    fn apply(&mut self, key: &str, value: Option<&str>, lines: &mut LineCursor<'_>) -> Result<()> {
        match key {
            "SENSOR" => self.sensor.push(SensorItem::parse(lines)?),
            "FRAME_DESC" => self.frame_desc.push(FrameDesc::parse(lines)?),
            "PLOT_NAME" => self.plot_name.extend(value.map(str::to_string)),
            "PICTURE_NAME" => self.picture_name.extend(value.map(str::to_string)),
            "BUTTON" => self.button.push(ButtonItem::parse(lines)?),
            _ => {}
        }
        Ok(())
    }
}

impl SensorDescriptor {
    /// Frame ids of the mobile phone descriptor
    pub const ID_ACC: u8 = 0;
    pub const ID_GYR: u8 = 1;
    pub const ID_UNCAL_ACC: u8 = 2;
    pub const ID_UNCAL_GYR: u8 = 3;

    /// Parse a descriptor from its text form
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = LineCursor::new(content);
        let descriptor = <Self as Block>::parse(&mut lines)?;
        if let Some(key) = lines.peek_key() {
            log::debug!("Sensor descriptor parsing stopped at unknown keyword '{}'", key);
        }
        Ok(descriptor)
    }

    /// Decode the header bytes (without the `\r\0` terminator)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let content = std::str::from_utf8(data)
            .map_err(|e| SensorLogError::InvalidHeader(e.to_string()))?;
        Self::parse(content)
    }

    /// Serialize as newline-joined `KEYWORD=value` lines
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut lines = Vec::new();
        for sensor in &self.sensor {
            lines.push("SENSOR".to_string());
            sensor.format_desc(&mut lines);
        }
        for frame_desc in &self.frame_desc {
            lines.push("FRAME_DESC".to_string());
            frame_desc.format_desc(&mut lines);
        }
        for plot_name in &self.plot_name {
            lines.push(format!("PLOT_NAME={}", plot_name));
        }
        for picture_name in &self.picture_name {
            lines.push(format!("PICTURE_NAME={}", picture_name));
        }
        for button in &self.button {
            lines.push("BUTTON".to_string());
            button.format_desc(&mut lines);
        }
        lines.join("\n").into_bytes()
    }

    pub fn get_frame_desc(&self, frame_id: u8) -> Result<&FrameDesc> {
        self.frame_desc
            .iter()
            .find(|f| f.frame_id == frame_id)
            .ok_or(SensorLogError::UnknownFrame(frame_id))
    }

    pub fn get_sensor_desc(&self, sensor_id: u32) -> Result<&SensorItem> {
        self.sensor
            .iter()
            .find(|s| s.id == sensor_id)
            .ok_or(SensorLogError::UnknownSensor(sensor_id))
    }

    /// The low nibble of a frame id names its sensor
    pub fn get_sensor_desc_from_frame_id(&self, frame_id: u8) -> Result<&SensorItem> {
        self.get_sensor_desc((frame_id & 0x0f) as u32)
    }

    /// Descriptor of the phone's built-in motion sensors
    pub fn mobile_phone(has_gyr: bool, has_acc: bool) -> Self {
        let f32_le = StructFormat::le(FormatCode::F32);
        let axes = |names: &[&str]| names.iter().map(|n| FrameAxis::new(*n, f32_le)).collect::<Vec<_>>();

        let mut descriptor = Self::default();
        if has_gyr {
            descriptor.sensor.push(SensorItem::new(Self::ID_GYR as u32, "generic.gyr", "0.0.0"));
            descriptor
                .sensor
                .push(SensorItem::new(Self::ID_UNCAL_GYR as u32, "generic.uncal_gyr", "0.0.0"));
            descriptor
                .frame_desc
                .push(FrameDesc::new(Self::ID_GYR, axes(&["gyr_x", "gyr_y", "gyr_z"])));
            descriptor.frame_desc.push(FrameDesc::new(
                Self::ID_UNCAL_GYR,
                axes(&[
                    "uncal_gyr_x",
                    "uncal_gyr_y",
                    "uncal_gyr_z",
                    "bias_gyr_x",
                    "bias_gyr_y",
                    "bias_gyr_z",
                ]),
            ));
        }
        if has_acc {
            descriptor.sensor.push(SensorItem::new(Self::ID_ACC as u32, "generic.acc", "0.0.0"));
            descriptor
                .sensor
                .push(SensorItem::new(Self::ID_UNCAL_ACC as u32, "generic.uncal_acc", "0.0.0"));
            descriptor
                .frame_desc
                .push(FrameDesc::new(Self::ID_ACC, axes(&["acc_x", "acc_y", "acc_z"])));
            descriptor.frame_desc.push(FrameDesc::new(
                Self::ID_UNCAL_ACC,
                axes(&[
                    "uncal_acc_x",
                    "uncal_acc_y",
                    "uncal_acc_z",
                    "bias_acc_x",
                    "bias_acc_y",
                    "bias_acc_z",
                ]),
            ));
        }
        descriptor
    }
}
