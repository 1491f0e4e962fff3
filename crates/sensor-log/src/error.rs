//! Error types for the sensor log codec

use thiserror::Error;

/// Result type alias using SensorLogError
pub type Result<T> = std::result::Result<T, SensorLogError>;

/// Errors that can occur while encoding or decoding sensor logs
#[derive(Debug, Error)]
pub enum SensorLogError {
    /// A `DATATYPE` or struct format string could not be decoded
    #[error("Unknown datatype: {0}")]
    UnknownDatatype(String),

    /// A descriptor line had an unparsable value
    #[error("Invalid descriptor value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    /// Frame id has no `FRAME_DESC` entry
    #[error("frame_id {0} not found in sensor descriptor")]
    UnknownFrame(u8),

    /// Sensor id has no `SENSOR` entry
    #[error("sensor_id {0} not found in sensor descriptor")]
    UnknownSensor(u32),

    /// Multi frame with more samples than the sub-count byte can express
    #[error("Multi frame holds {0} samples, at most 256 allowed")]
    TooManySamples(usize),

    /// A multi frame was requested on a frame without increment format
    #[error("frame_id {0} has no INCR_TIME_DATATYPE")]
    NotMultiFrame(u8),

    /// The record header was not terminated or not valid UTF-8
    #[error("Invalid record header: {0}")]
    InvalidHeader(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
