//! Core data types for tilemosaic

/// Represents pixel data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
}

impl DataType {
    /// Returns the size in bytes for this data type
    pub fn size(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// Returns the name of this data type
    pub fn name(&self) -> &'static str {
        match self {
            DataType::U8 => "U8",
            DataType::U16 => "U16",
            DataType::U32 => "U32",
            DataType::I8 => "I8",
            DataType::I16 => "I16",
            DataType::I32 => "I32",
            DataType::F32 => "F32",
            DataType::F64 => "F64",
        }
    }

    /// Resolves a data type from TIFF SampleFormat and BitsPerSample
    pub fn from_tiff(sample_format: u64, bits: u64) -> Option<Self> {
        match (sample_format, bits) {
            (1, 8) => Some(DataType::U8),
            (1, 16) => Some(DataType::U16),
            (1, 32) => Some(DataType::U32),
            (2, 8) => Some(DataType::I8),
            (2, 16) => Some(DataType::I16),
            (2, 32) => Some(DataType::I32),
            (3, 32) => Some(DataType::F32),
            (3, 64) => Some(DataType::F64),
            _ => None,
        }
    }

    /// TIFF SampleFormat value (1=unsigned, 2=signed, 3=float)
    pub fn tiff_sample_format(&self) -> u16 {
        match self {
            DataType::U8 | DataType::U16 | DataType::U32 => 1,
            DataType::I8 | DataType::I16 | DataType::I32 => 2,
            DataType::F32 | DataType::F64 => 3,
        }
    }

    /// Bits per sample
    pub fn bits(&self) -> u16 {
        (self.size() * 8) as u16
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Decodes one little-endian sample as f64
    ///
    /// `bytes` must hold at least `self.size()` bytes.
    pub fn read_le(&self, bytes: &[u8]) -> f64 {
        match self {
            DataType::U8 => bytes[0] as f64,
            DataType::I8 => bytes[0] as i8 as f64,
            DataType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            DataType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            DataType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            DataType::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            DataType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            DataType::F64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(buf)
            }
        }
    }

    /// Encodes a value as one little-endian sample
    ///
    /// Integer types saturate at their range and round to nearest.
    pub fn write_le(&self, value: f64, out: &mut [u8]) {
        match self {
            DataType::U8 => out[0] = value.round() as u8,
            DataType::I8 => out[0] = value.round() as i8 as u8,
            DataType::U16 => out[..2].copy_from_slice(&(value.round() as u16).to_le_bytes()),
            DataType::I16 => out[..2].copy_from_slice(&(value.round() as i16).to_le_bytes()),
            DataType::U32 => out[..4].copy_from_slice(&(value.round() as u32).to_le_bytes()),
            DataType::I32 => out[..4].copy_from_slice(&(value.round() as i32).to_le_bytes()),
            DataType::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            DataType::F64 => out[..8].copy_from_slice(&value.to_le_bytes()),
        }
    }
}

/// Represents image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Width in pixels
    pub width: u64,
    /// Height in pixels
    pub height: u64,
}

impl Dimensions {
    /// Creates new dimensions
    pub fn new(width: u64, height: u64) -> Self {
        Self { width, height }
    }

    /// Returns the total number of pixels
    pub fn pixel_count(&self) -> u64 {
        self.width * self.height
    }
}
