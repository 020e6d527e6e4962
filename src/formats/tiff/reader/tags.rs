//! Tag value decoding over the mapped file

use crate::error::{Error, Result};
use crate::formats::tiff::tags::{field_types, tag_name};
use crate::formats::tiff::IFDEntry;
use crate::io::{ByteOrder, SliceReader};

/// Decodes the values of IFD entries from the file bytes
pub struct TagReader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> TagReader<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, order }
    }

    fn reader_for(&self, entry: &IFDEntry) -> Result<SliceReader<'a>> {
        let end = entry.data_offset.checked_add(entry.byte_len());
        if end.map_or(true, |end| end > self.data.len() as u64) {
            return Err(Error::OutOfBounds(format!(
                "Values of tag {} ({}) extend past end of file",
                entry.tag,
                tag_name(entry.tag)
            )));
        }
        SliceReader::at(self.data, self.order, entry.data_offset)
    }

    /// Reads integer values of any unsigned or signed integer field type
    pub fn read_u64s(&self, entry: &IFDEntry) -> Result<Vec<u64>> {
        let mut reader = self.reader_for(entry)?;
        let mut values = Vec::with_capacity(entry.count as usize);

        for _ in 0..entry.count {
            let value = match entry.field_type {
                field_types::BYTE | field_types::UNDEFINED => reader.read_bytes(1)?[0] as u64,
                field_types::SBYTE => reader.read_bytes(1)?[0] as i8 as i64 as u64,
                field_types::SHORT => reader.read_u16()? as u64,
                field_types::SSHORT => reader.read_u16()? as i16 as i64 as u64,
                field_types::LONG => reader.read_u32()? as u64,
                field_types::SLONG => reader.read_u32()? as i32 as i64 as u64,
                field_types::LONG8 | field_types::SLONG8 | field_types::IFD8 => reader.read_u64()?,
                other => {
                    return Err(Error::InvalidFormat(format!(
                        "Tag {} has non-integer field type {}",
                        entry.tag, other
                    )))
                }
            };
            values.push(value);
        }

        Ok(values)
    }

    /// Reads integer values narrowed to u16
    pub fn read_u16s(&self, entry: &IFDEntry) -> Result<Vec<u16>> {
        self.read_u64s(entry)?
            .into_iter()
            .map(|v| {
                u16::try_from(v).map_err(|_| {
                    Error::InvalidFormat(format!("Tag {} value {} exceeds 16 bits", entry.tag, v))
                })
            })
            .collect()
    }

    /// Reads the first integer value
    pub fn read_u64(&self, entry: &IFDEntry) -> Result<u64> {
        self.read_u64s(entry)?
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidFormat(format!("Tag {} has no values", entry.tag)))
    }

    /// Reads numeric values as f64 (floating, rational and integer types)
    pub fn read_doubles(&self, entry: &IFDEntry) -> Result<Vec<f64>> {
        let mut reader = self.reader_for(entry)?;
        let mut values = Vec::with_capacity(entry.count as usize);

        match entry.field_type {
            field_types::DOUBLE => {
                for _ in 0..entry.count {
                    values.push(reader.read_f64()?);
                }
            }
            field_types::FLOAT => {
                for _ in 0..entry.count {
                    values.push(reader.read_f32()? as f64);
                }
            }
            field_types::RATIONAL => {
                for _ in 0..entry.count {
                    let num = reader.read_u32()? as f64;
                    let den = reader.read_u32()? as f64;
                    values.push(num / den);
                }
            }
            field_types::SRATIONAL => {
                for _ in 0..entry.count {
                    let num = reader.read_u32()? as i32 as f64;
                    let den = reader.read_u32()? as i32 as f64;
                    values.push(num / den);
                }
            }
            _ => {
                return Ok(self.read_u64s(entry)?.into_iter().map(|v| v as f64).collect());
            }
        }

        Ok(values)
    }

    /// Reads an ASCII value, dropping trailing NULs
    pub fn read_ascii(&self, entry: &IFDEntry) -> Result<String> {
        let mut reader = self.reader_for(entry)?;
        let bytes = reader.read_bytes(entry.count as usize)?;
        Ok(String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
    }
}
