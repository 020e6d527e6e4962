//! Byte order (endianness) handling
//!
//! TIFF files may be little- or big-endian. Header and IFD parsing decode
//! values with the file's order; decoded pixel blocks are normalised to
//! little-endian once so the rest of the crate only deals with one layout.

use crate::error::{Error, Result};

/// Represents the byte order (endianness) of binary data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian byte order (least significant byte first)
    LittleEndian,
    /// Big-endian byte order (most significant byte first)
    BigEndian,
}

impl ByteOrder {
    /// Detects byte order from TIFF magic bytes
    ///
    /// TIFF files start with either "II" (0x4949) for little-endian
    /// or "MM" (0x4D4D) for big-endian.
    pub fn from_tiff_magic(magic: [u8; 2]) -> Option<Self> {
        match &magic {
            b"II" => Some(ByteOrder::LittleEndian),
            b"MM" => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }

    /// Detects byte order from the first two bytes of a buffer
    pub fn detect(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::InvalidFormat("File too short for a TIFF header".to_string()));
        }

        Self::from_tiff_magic([data[0], data[1]]).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "Invalid byte order magic bytes: {:02X}{:02X}",
                data[0], data[1]
            ))
        })
    }

    pub fn u16(&self, b: [u8; 2]) -> u16 {
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(b),
            ByteOrder::BigEndian => u16::from_be_bytes(b),
        }
    }

    pub fn u32(&self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(b),
            ByteOrder::BigEndian => u32::from_be_bytes(b),
        }
    }

    pub fn u64(&self, b: [u8; 8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(b),
            ByteOrder::BigEndian => u64::from_be_bytes(b),
        }
    }

    pub fn f32(&self, b: [u8; 4]) -> f32 {
        f32::from_bits(self.u32(b))
    }

    pub fn f64(&self, b: [u8; 8]) -> f64 {
        f64::from_bits(self.u64(b))
    }

    /// Rewrites samples of `sample_size` bytes in place to little-endian
    pub fn normalize_samples(&self, data: &mut [u8], sample_size: usize) {
        if *self == ByteOrder::LittleEndian || sample_size < 2 {
            return;
        }
        for sample in data.chunks_exact_mut(sample_size) {
            sample.reverse();
        }
    }
}

/// Bounds-checked cursor over a byte slice decoding values in one byte order
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, pos: 0, order }
    }

    /// Creates a reader positioned at `offset`
    pub fn at(data: &'a [u8], order: ByteOrder, offset: u64) -> Result<Self> {
        let mut reader = Self::new(data, order);
        reader.seek(offset)?;
        Ok(reader)
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let offset = offset as usize;
        if offset > self.data.len() {
            return Err(Error::OutOfBounds(format!(
                "Offset {} beyond end of file ({} bytes)",
                offset,
                self.data.len()
            )));
        }
        self.pos = offset;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(Error::OutOfBounds(format!(
                "Read of {} bytes at offset {} exceeds file size {}",
                len,
                self.pos,
                self.data.len()
            ))),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_array()?;
        Ok(self.order.u16(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_array()?;
        Ok(self.order.u32(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_array()?;
        Ok(self.order.u64(bytes))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.read_array()?;
        Ok(self.order.f32(bytes))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_array()?;
        Ok(self.order.f64(bytes))
    }
}
