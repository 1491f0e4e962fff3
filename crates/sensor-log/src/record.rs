//! Binary record stream
//!
//! A record file is the descriptor header terminated by `\r\0`, followed by
//! frames. Every frame starts with a `<BB` header `(frame_id, sub_count)`.
//!
//! - single frame: `timestamp, axis...`
//! - multi frame (descriptor has `INCR_TIME_DATATYPE`): `timestamp`, then
//!   `sub_count + 1` groups of `(increment, axis...)`
//!
//! Field widths and byte order come from the per-frame-id layout compiled
//! from the descriptor once, when the writer or reader is created.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::ReadBytesExt;

use crate::codec::{FormatCode, Scalar, StructFormat};
use crate::descriptor::{FrameDesc, SensorDescriptor};
use crate::error::{Result, SensorLogError};

/// Bytes terminating the descriptor header
pub const HEADER_TERMINATOR: &[u8] = b"\r\0";

/// Maximum number of samples in one multi frame
pub const MAX_MULTI_SAMPLES: usize = 256;

const FRAME_HEADER: StructFormat = StructFormat::le(FormatCode::U8);

/// Byte sink a [`RecordWriter`] writes into
pub trait RecordSink: Write {
    /// Suppress (or resume) writes
    fn set_paused(&mut self, paused: bool);

    /// Flush and release the underlying resource
    fn close(&mut self) -> io::Result<()>;
}

impl RecordSink for Vec<u8> {
    fn set_paused(&mut self, _paused: bool) {}

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compiled field layout of one frame id
#[derive(Debug, Clone)]
struct FrameLayout {
    timestamp: StructFormat,
    increment: Option<StructFormat>,
    axes: Vec<StructFormat>,
}

impl FrameLayout {
    fn compile(desc: &FrameDesc) -> Result<Self> {
        Ok(Self {
            timestamp: desc.timestamp_datatype,
            increment: desc.incr_time_datatype,
            axes: desc.axis_formats()?,
        })
    }

    fn pack_axes(&self, out: &mut Vec<u8>, values: &[Scalar]) -> Result<()> {
        // Missing trailing values are written as zero, extra ones are dropped
        for (i, fmt) in self.axes.iter().enumerate() {
            fmt.pack(out, values.get(i).copied().unwrap_or_default())?;
        }
        Ok(())
    }

    fn unpack_axes<R: Read>(&self, input: &mut R) -> Result<Vec<Scalar>> {
        self.axes.iter().map(|fmt| fmt.unpack(input)).collect()
    }
}

fn compile_layouts(descriptor: &SensorDescriptor) -> Result<HashMap<u8, FrameLayout>> {
    descriptor
        .frame_desc
        .iter()
        .map(|desc| Ok((desc.frame_id, FrameLayout::compile(desc)?)))
        .collect()
}

/// Encodes sensor frames into a [`RecordSink`]
pub struct RecordWriter<W: RecordSink> {
    sink: W,
    descriptor: SensorDescriptor,
    layouts: HashMap<u8, FrameLayout>,
    paused: bool,
}

impl<W: RecordSink> RecordWriter<W> {
    /// Create a writer and emit the descriptor header
    pub fn new(mut sink: W, descriptor: SensorDescriptor) -> Result<Self> {
        let layouts = compile_layouts(&descriptor)?;
        sink.write_all(&descriptor.to_bytes())?;
        sink.write_all(HEADER_TERMINATOR)?;
        Ok(Self {
            sink,
            descriptor,
            layouts,
            paused: false,
        })
    }

    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.sink.set_paused(paused);
    }

    fn layout(&self, frame_id: u8) -> Result<&FrameLayout> {
        self.layouts
            .get(&frame_id)
            .ok_or(SensorLogError::UnknownFrame(frame_id))
    }

    /// Write a single frame
    ///
    /// On a multi-frame layout the sample is written with a zero increment.
    pub fn write(&mut self, frame_id: u8, timestamp: impl Into<Scalar>, values: &[Scalar]) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        let layout = self.layout(frame_id)?;

        let mut frame = Vec::new();
        FRAME_HEADER.pack(&mut frame, frame_id.into())?;
        FRAME_HEADER.pack(&mut frame, 0u8.into())?;
        layout.timestamp.pack(&mut frame, timestamp.into())?;
        if let Some(incr) = layout.increment {
            incr.pack(&mut frame, Scalar::default())?;
        }
        layout.pack_axes(&mut frame, values)?;

        self.sink.write_all(&frame)?;
        Ok(())
    }

    /// Write a multi frame: one absolute timestamp then `(increment, values)` groups
    pub fn write_multi(
        &mut self,
        frame_id: u8,
        timestamp: impl Into<Scalar>,
        samples: &[(Scalar, Vec<Scalar>)],
    ) -> Result<()> {
        if self.paused || samples.is_empty() {
            return Ok(());
        }
        if samples.len() > MAX_MULTI_SAMPLES {
            return Err(SensorLogError::TooManySamples(samples.len()));
        }
        let layout = self.layout(frame_id)?;
        let incr_fmt = layout
            .increment
            .ok_or(SensorLogError::NotMultiFrame(frame_id))?;

        let mut frame = Vec::new();
        FRAME_HEADER.pack(&mut frame, frame_id.into())?;
        FRAME_HEADER.pack(&mut frame, ((samples.len() - 1) as u8).into())?;
        layout.timestamp.pack(&mut frame, timestamp.into())?;
        for (incr, values) in samples {
            incr_fmt.pack(&mut frame, *incr)?;
            layout.pack_axes(&mut frame, values)?;
        }

        self.sink.write_all(&frame)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    /// Flush and close the sink
    pub fn close(&mut self) -> Result<()> {
        self.sink.close()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// One decoded sample
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_id: u8,
    pub timestamp: i64,
    pub values: Vec<Scalar>,
}

/// Decodes a record stream written by [`RecordWriter`]
pub struct RecordReader<R: Read> {
    input: R,
    descriptor: SensorDescriptor,
    layouts: HashMap<u8, FrameLayout>,
}

impl<R: Read> RecordReader<R> {
    /// Read and parse the descriptor header
    pub fn new(mut input: R) -> Result<Self> {
        let mut header = Vec::new();
        loop {
            let byte = input.read_u8().map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    SensorLogError::InvalidHeader("missing \\r\\0 terminator".to_string())
                }
                _ => SensorLogError::Io(e),
            })?;
            if byte == HEADER_TERMINATOR[0] {
                break;
            }
            header.push(byte);
        }
        if input.read_u8()? != HEADER_TERMINATOR[1] {
            return Err(SensorLogError::InvalidHeader(
                "expected NUL after header".to_string(),
            ));
        }

        let descriptor = SensorDescriptor::from_bytes(&header)?;
        let layouts = compile_layouts(&descriptor)?;
        Ok(Self {
            input,
            descriptor,
            layouts,
        })
    }

    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    /// Read the next frame record; `None` at end of stream
    ///
    /// A multi frame yields one [`Frame`] per sample with absolute timestamps.
    pub fn read_frame(&mut self) -> Result<Option<Vec<Frame>>> {
        let frame_id = match self.input.read_u8() {
            Ok(id) => id,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sub_count = self.input.read_u8()? as usize;
        let layout = self
            .layouts
            .get(&frame_id)
            .ok_or(SensorLogError::UnknownFrame(frame_id))?;

        let timestamp = layout.timestamp.unpack(&mut self.input)?.as_i64();

        let Some(incr_fmt) = layout.increment else {
            let values = layout.unpack_axes(&mut self.input)?;
            return Ok(Some(vec![Frame {
                frame_id,
                timestamp,
                values,
            }]));
        };

        let mut samples = Vec::with_capacity(sub_count + 1);
        for _ in 0..=sub_count {
            let incr = incr_fmt.unpack(&mut self.input)?.as_i64();
            let values = layout.unpack_axes(&mut self.input)?;
            samples.push((incr, values));
        }

        // The stored timestamp is the one of the last sample
        let total: i64 = samples.iter().map(|(incr, _)| incr).sum();
        let mut current = timestamp - total;
        Ok(Some(
            samples
                .into_iter()
                .map(|(incr, values)| {
                    current += incr;
                    Frame {
                        frame_id,
                        timestamp: current,
                        values,
                    }
                })
                .collect(),
        ))
    }

    /// Read every remaining frame
    pub fn read_all(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(batch) = self.read_frame()? {
            frames.extend(batch);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Endian;
    use crate::descriptor::{FrameAxis, SensorItem};
    use std::io::Cursor;

    fn multi_descriptor() -> SensorDescriptor {
        let i16_be = StructFormat::new(Endian::Big, FormatCode::I16);
        SensorDescriptor {
            sensor: vec![SensorItem::new(5, "ext.imu", "1.0.0")],
            frame_desc: vec![FrameDesc {
                frame_id: 5,
                timestamp_datatype: StructFormat::le(FormatCode::U32),
                incr_time_datatype: Some(StructFormat::le(FormatCode::U16)),
                axis: vec![FrameAxis::new("x", i16_be), FrameAxis::new("y", i16_be)],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_header_and_single_frame_layout() {
        let descriptor = SensorDescriptor::mobile_phone(false, true);
        let header = descriptor.to_bytes();
        let mut writer = RecordWriter::new(Vec::new(), descriptor).unwrap();
        writer
            .write(SensorDescriptor::ID_ACC, 1_000u64, &[1.5f32.into(), (-2.0f32).into(), 0.25f32.into()])
            .unwrap();

        let bytes = writer.into_inner();
        assert!(bytes.starts_with(&header));
        let body = &bytes[header.len()..];
        assert_eq!(&body[..2], b"\r\0");
        // header + timestamp + 3 axes
        assert_eq!(body.len(), 2 + 2 + 8 + 3 * 4);
        assert_eq!(&body[2..4], &[0, 0]);
        assert_eq!(&body[4..12], &1_000u64.to_le_bytes());
        assert_eq!(&body[12..16], &1.5f32.to_le_bytes());
    }

    #[test]
    fn test_single_frame_round_trip() {
        let descriptor = SensorDescriptor::mobile_phone(true, true);
        let mut writer = RecordWriter::new(Vec::new(), descriptor).unwrap();
        writer
            .write(SensorDescriptor::ID_GYR, 42u64, &[0.5f32.into(), 1.25f32.into(), (-3.0f32).into()])
            .unwrap();
        // missing axes are zero filled
        writer.write(SensorDescriptor::ID_ACC, 43u64, &[9.81f32.into()]).unwrap();

        let mut reader = RecordReader::new(Cursor::new(writer.into_inner())).unwrap();
        let frames = reader.read_all().unwrap();
        assert_eq!(frames.len(), 2);

        assert_eq!(frames[0].frame_id, SensorDescriptor::ID_GYR);
        assert_eq!(frames[0].timestamp, 42);
        let gyr: Vec<f64> = frames[0].values.iter().map(|v| v.as_f64()).collect();
        assert_eq!(gyr, vec![0.5, 1.25, -3.0]);

        let acc: Vec<f64> = frames[1].values.iter().map(|v| v.as_f64()).collect();
        assert!((acc[0] - 9.81).abs() < 1e-5);
        assert_eq!(&acc[1..], &[0.0, 0.0]);
    }

    #[test]
    fn test_multi_frame_timestamps() {
        let mut writer = RecordWriter::new(Vec::new(), multi_descriptor()).unwrap();
        let samples = vec![
            (Scalar::from(0u32), vec![Scalar::Int(1), Scalar::Int(-1)]),
            (Scalar::from(10u32), vec![Scalar::Int(2), Scalar::Int(-2)]),
            (Scalar::from(5u32), vec![Scalar::Int(3), Scalar::Int(-3)]),
        ];
        writer.write_multi(5, 1_015u32, &samples).unwrap();

        let mut reader = RecordReader::new(Cursor::new(writer.into_inner())).unwrap();
        let frames = reader.read_all().unwrap();
        let stamps: Vec<i64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 1_010, 1_015]);
        assert_eq!(frames[2].values, vec![Scalar::Int(3), Scalar::Int(-3)]);
    }

    #[test]
    fn test_multi_frame_limits() {
        let mut writer = RecordWriter::new(Vec::new(), multi_descriptor()).unwrap();
        let samples = vec![(Scalar::default(), Vec::new()); MAX_MULTI_SAMPLES + 1];
        assert!(matches!(
            writer.write_multi(5, 0u32, &samples),
            Err(SensorLogError::TooManySamples(257))
        ));

        let mut phone = RecordWriter::new(Vec::new(), SensorDescriptor::mobile_phone(true, true)).unwrap();
        assert!(matches!(
            phone.write_multi(0, 0u64, &samples[..2]),
            Err(SensorLogError::NotMultiFrame(0))
        ));
        assert!(matches!(phone.write(9, 0u64, &[]), Err(SensorLogError::UnknownFrame(9))));
    }

    #[test]
    fn test_paused_writer_drops_frames() {
        let descriptor = SensorDescriptor::mobile_phone(false, true);
        let header_len = descriptor.to_bytes().len() + HEADER_TERMINATOR.len();
        let mut writer = RecordWriter::new(Vec::new(), descriptor).unwrap();
        writer.set_paused(true);
        writer.write(0, 1u64, &[]).unwrap();
        writer.set_paused(false);
        writer.write(0, 2u64, &[]).unwrap();

        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), header_len + 2 + 8 + 12);
    }

    #[test]
    fn test_reader_rejects_unterminated_header() {
        let err = RecordReader::new(Cursor::new(b"SENSOR\nID=0".to_vec())).err();
        assert!(matches!(err, Some(SensorLogError::InvalidHeader(_))));
    }
}
