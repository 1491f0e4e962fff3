//! Struct codec for fixed-width, endian-tagged numeric fields
//!
//! Every field of a record frame is described by a two character struct
//! format such as `<H` (unsigned 16-bit little-endian) or `>d` (64-bit float
//! big-endian). The descriptor header spells the same information as a
//! `DATATYPE` triple, e.g. `UNSIGNED,16BIT,LITTLEENDIAN`.
//!
//! | class | 8BIT | 12BIT | 16BIT | 20BIT | 32BIT | 64BIT |
//! |-------|------|-------|-------|-------|-------|-------|
//! | SIGNED | b | h | h | l | l | q |
//! | UNSIGNED | B | H | H | L | L | Q |
//! | FLOAT | f | f | f | f | f | d |

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, SensorLogError};

/// Byte order of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn prefix(self) -> char {
        match self {
            Endian::Little => '<',
            Endian::Big => '>',
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Endian::Little => "LITTLEENDIAN",
            Endian::Big => "BIGENDIAN",
        }
    }
}

/// Single-character struct format code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatCode {
    /// `b`: signed 8-bit
    I8,
    /// `B`: unsigned 8-bit
    U8,
    /// `h`: signed 16-bit
    I16,
    /// `H`: unsigned 16-bit
    U16,
    /// `l`: signed 32-bit
    I32,
    /// `L`: unsigned 32-bit
    U32,
    /// `q`: signed 64-bit
    I64,
    /// `Q`: unsigned 64-bit
    U64,
    /// `f`: 32-bit float
    F32,
    /// `d`: 64-bit float
    F64,
}

impl FormatCode {
    /// Parse a struct format character
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'b' => FormatCode::I8,
            'B' => FormatCode::U8,
            'h' => FormatCode::I16,
            'H' => FormatCode::U16,
            'l' => FormatCode::I32,
            'L' => FormatCode::U32,
            'q' => FormatCode::I64,
            'Q' => FormatCode::U64,
            'f' => FormatCode::F32,
            'd' => FormatCode::F64,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            FormatCode::I8 => 'b',
            FormatCode::U8 => 'B',
            FormatCode::I16 => 'h',
            FormatCode::U16 => 'H',
            FormatCode::I32 => 'l',
            FormatCode::U32 => 'L',
            FormatCode::I64 => 'q',
            FormatCode::U64 => 'Q',
            FormatCode::F32 => 'f',
            FormatCode::F64 => 'd',
        }
    }

    /// Encoded width in bytes
    pub fn size(self) -> usize {
        match self {
            FormatCode::I8 | FormatCode::U8 => 1,
            FormatCode::I16 | FormatCode::U16 => 2,
            FormatCode::I32 | FormatCode::U32 | FormatCode::F32 => 4,
            FormatCode::I64 | FormatCode::U64 | FormatCode::F64 => 8,
        }
    }

    /// `(sign class, bit width)` keywords used by `DATATYPE`
    fn keywords(self) -> (&'static str, &'static str) {
        match self {
            FormatCode::I8 => ("SIGNED", "8BIT"),
            FormatCode::I16 => ("SIGNED", "16BIT"),
            FormatCode::I32 => ("SIGNED", "32BIT"),
            FormatCode::I64 => ("SIGNED", "64BIT"),
            FormatCode::U8 => ("UNSIGNED", "8BIT"),
            FormatCode::U16 => ("UNSIGNED", "16BIT"),
            FormatCode::U32 => ("UNSIGNED", "32BIT"),
            FormatCode::U64 => ("UNSIGNED", "64BIT"),
            FormatCode::F32 => ("FLOAT", "32BIT"),
            FormatCode::F64 => ("FLOAT", "64BIT"),
        }
    }
}

/// A numeric value carried by one field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Int(v) => v,
            Scalar::UInt(v) => v as i64,
            Scalar::Float(v) => v.round() as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Scalar::Int(v) => v as u64,
            Scalar::UInt(v) => v,
            Scalar::Float(v) => v.round() as u64,
        }
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::Int(0)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Scalar::UInt(v)
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::UInt(v as u64)
    }
}

impl From<u8> for Scalar {
    fn from(v: u8) -> Self {
        Scalar::UInt(v as u64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v as f64)
    }
}

/// A compiled field format: endianness plus format code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructFormat {
    pub endian: Endian,
    pub code: FormatCode,
}

impl StructFormat {
    pub const fn new(endian: Endian, code: FormatCode) -> Self {
        Self { endian, code }
    }

    /// Little-endian shorthand
    pub const fn le(code: FormatCode) -> Self {
        Self::new(Endian::Little, code)
    }

    /// Decode a `DATATYPE` value such as `FLOAT,32BIT,LITTLEENDIAN`
    pub fn from_datatype(datatype: &str) -> Result<Self> {
        let unknown = || SensorLogError::UnknownDatatype(datatype.to_string());

        let mut parts = datatype.split(',').map(str::trim);
        let class = parts.next().ok_or_else(unknown)?;
        let width = parts.next().ok_or_else(unknown)?;
        let endian = match parts.next().ok_or_else(unknown)? {
            "LITTLEENDIAN" => Endian::Little,
            "BIGENDIAN" => Endian::Big,
            _ => return Err(unknown()),
        };

        let code = match (class, width) {
            ("SIGNED", "8BIT") => FormatCode::I8,
            ("SIGNED", "12BIT" | "16BIT") => FormatCode::I16,
            ("SIGNED", "20BIT" | "32BIT") => FormatCode::I32,
            ("SIGNED", "64BIT") => FormatCode::I64,
            ("UNSIGNED", "8BIT") => FormatCode::U8,
            ("UNSIGNED", "12BIT" | "16BIT") => FormatCode::U16,
            ("UNSIGNED", "20BIT" | "32BIT") => FormatCode::U32,
            ("UNSIGNED", "64BIT") => FormatCode::U64,
            ("FLOAT", "8BIT" | "12BIT" | "16BIT" | "20BIT" | "32BIT") => FormatCode::F32,
            ("FLOAT", "64BIT") => FormatCode::F64,
            _ => return Err(unknown()),
        };

        Ok(Self { endian, code })
    }

    /// Encode back into the `DATATYPE` triple
    pub fn to_datatype(&self) -> String {
        let (class, width) = self.code.keywords();
        format!("{},{},{}", class, width, self.endian.keyword())
    }

    pub fn size(&self) -> usize {
        self.code.size()
    }

    /// Pack one value, casting it to the field's width
    pub fn pack<W: Write>(&self, out: &mut W, value: Scalar) -> Result<()> {
        match self.endian {
            Endian::Little => pack_with::<LittleEndian, W>(out, self.code, value)?,
            Endian::Big => pack_with::<BigEndian, W>(out, self.code, value)?,
        }
        Ok(())
    }

    /// Unpack one value
    pub fn unpack<R: Read>(&self, input: &mut R) -> Result<Scalar> {
        let value = match self.endian {
            Endian::Little => unpack_with::<LittleEndian, R>(input, self.code)?,
            Endian::Big => unpack_with::<BigEndian, R>(input, self.code)?,
        };
        Ok(value)
    }
}

fn pack_with<B: byteorder::ByteOrder, W: Write>(
    out: &mut W,
    code: FormatCode,
    value: Scalar,
) -> std::io::Result<()> {
    match code {
        FormatCode::I8 => out.write_i8(value.as_i64() as i8),
        FormatCode::U8 => out.write_u8(value.as_u64() as u8),
        FormatCode::I16 => out.write_i16::<B>(value.as_i64() as i16),
        FormatCode::U16 => out.write_u16::<B>(value.as_u64() as u16),
        FormatCode::I32 => out.write_i32::<B>(value.as_i64() as i32),
        FormatCode::U32 => out.write_u32::<B>(value.as_u64() as u32),
        FormatCode::I64 => out.write_i64::<B>(value.as_i64()),
        FormatCode::U64 => out.write_u64::<B>(value.as_u64()),
        FormatCode::F32 => out.write_f32::<B>(value.as_f64() as f32),
        FormatCode::F64 => out.write_f64::<B>(value.as_f64()),
    }
}

fn unpack_with<B: byteorder::ByteOrder, R: Read>(
    input: &mut R,
    code: FormatCode,
) -> std::io::Result<Scalar> {
    Ok(match code {
        FormatCode::I8 => Scalar::Int(input.read_i8()? as i64),
        FormatCode::U8 => Scalar::UInt(input.read_u8()? as u64),
        FormatCode::I16 => Scalar::Int(input.read_i16::<B>()? as i64),
        FormatCode::U16 => Scalar::UInt(input.read_u16::<B>()? as u64),
        FormatCode::I32 => Scalar::Int(input.read_i32::<B>()? as i64),
        FormatCode::U32 => Scalar::UInt(input.read_u32::<B>()? as u64),
        FormatCode::I64 => Scalar::Int(input.read_i64::<B>()?),
        FormatCode::U64 => Scalar::UInt(input.read_u64::<B>()?),
        FormatCode::F32 => Scalar::Float(input.read_f32::<B>()? as f64),
        FormatCode::F64 => Scalar::Float(input.read_f64::<B>()?),
    })
}

impl fmt::Display for StructFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.endian.prefix(), self.code.as_char())
    }
}

impl FromStr for StructFormat {
    type Err = SensorLogError;

    /// Parse the compact form, e.g. `<H`
    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let endian = match chars.next() {
            Some('<') => Endian::Little,
            Some('>') => Endian::Big,
            _ => return Err(SensorLogError::UnknownDatatype(s.to_string())),
        };
        let code = chars
            .next()
            .and_then(FormatCode::from_char)
            .filter(|_| chars.next().is_none())
            .ok_or_else(|| SensorLogError::UnknownDatatype(s.to_string()))?;
        Ok(Self { endian, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_datatype_mapping() {
        let fmt = StructFormat::from_datatype("UNSIGNED,16BIT,LITTLEENDIAN").unwrap();
        assert_eq!(fmt.to_string(), "<H");

        let fmt = StructFormat::from_datatype("SIGNED,20BIT,BIGENDIAN").unwrap();
        assert_eq!(fmt.to_string(), ">l");

        let fmt = StructFormat::from_datatype("FLOAT,64BIT,LITTLEENDIAN").unwrap();
        assert_eq!(fmt.to_string(), "<d");

        // 12-bit values are carried in 16-bit fields
        let fmt = StructFormat::from_datatype("SIGNED,12BIT,LITTLEENDIAN").unwrap();
        assert_eq!(fmt.to_datatype(), "SIGNED,16BIT,LITTLEENDIAN");
    }

    #[test]
    fn test_unknown_datatype() {
        assert!(StructFormat::from_datatype("COMPLEX,16BIT,LITTLEENDIAN").is_err());
        assert!(StructFormat::from_datatype("SIGNED,16BIT").is_err());
        assert!("<x".parse::<StructFormat>().is_err());
        assert!("H".parse::<StructFormat>().is_err());
    }

    #[test]
    fn test_pack_byte_order() {
        let mut buf = Vec::new();
        StructFormat::le(FormatCode::U16)
            .pack(&mut buf, Scalar::from(0x1234u32))
            .unwrap();
        StructFormat::new(Endian::Big, FormatCode::U16)
            .pack(&mut buf, Scalar::from(0x1234u32))
            .unwrap();
        assert_eq!(buf, vec![0x34, 0x12, 0x12, 0x34]);
    }

    #[test]
    fn test_unpack_signed() {
        let fmt: StructFormat = "<h".parse().unwrap();
        let mut buf = Vec::new();
        fmt.pack(&mut buf, Scalar::Int(-2)).unwrap();
        assert_eq!(buf.len(), 2);

        let value = fmt.unpack(&mut Cursor::new(buf)).unwrap();
        assert_eq!(value, Scalar::Int(-2));
    }
}
