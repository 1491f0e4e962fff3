//! Sensor Log - self-describing binary sensor recordings
//!
//! A recording is a text descriptor header followed by binary frames:
//!
//! - [`codec`]: fixed-width, endian-tagged field packing (`<H`, `>d`, ...)
//! - [`descriptor`]: the keyword text header describing sensors and frame layouts
//! - [`record`]: frame writer and reader driven by the descriptor
//! - [`logger`]: buffered append-only file sink
//!
//! # Example
//!
//! ```no_run
//! use sensor_log::{FileLogger, RecordWriter, SensorDescriptor, RECORD_EXTENSION};
//!
//! let logger = FileLogger::new("/tmp/run", "walk", RECORD_EXTENSION);
//! let mut writer = RecordWriter::new(logger, SensorDescriptor::mobile_phone(true, true))?;
//! writer.write(SensorDescriptor::ID_ACC, 1_700_000_000_000u64, &[0.1f32.into(), 9.8f32.into(), 0.0f32.into()])?;
//! writer.close()?;
//! # Ok::<(), sensor_log::SensorLogError>(())
//! ```

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod logger;
pub mod record;

pub use codec::{Endian, FormatCode, Scalar, StructFormat};
pub use descriptor::{ButtonItem, FrameAxis, FrameDesc, SensorDescriptor, SensorItem, SensorParam};
pub use error::{Result, SensorLogError};
pub use logger::{file_name_with_extension, FileLogger, RECORD_EXTENSION, TEXT_EXTENSION};
pub use record::{Frame, RecordReader, RecordSink, RecordWriter};
