//! Compression and decompression of TIFF blocks

pub mod deflate;
pub mod lzw;
pub mod packbits;

use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

/// Compression types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression
    None,
    /// Deflate/ZIP compression
    #[default]
    Deflate,
    /// LZW compression
    Lzw,
    /// PackBits compression (read only)
    PackBits,
}

impl Compression {
    /// Creates compression from TIFF compression tag value
    pub fn from_tag(value: u64) -> Result<Self> {
        match value {
            1 => Ok(Compression::None),
            5 => Ok(Compression::Lzw),
            8 | 32946 => Ok(Compression::Deflate),
            32773 => Ok(Compression::PackBits),
            7 => Err(Error::Unsupported(
                "JPEG-in-TIFF compression is not supported".to_string(),
            )),
            _ => Err(Error::Unsupported(format!("Compression type {}", value))),
        }
    }

    /// TIFF compression tag value written for this scheme
    pub fn tag(&self) -> u16 {
        match self {
            Compression::None => 1,
            Compression::Lzw => 5,
            Compression::Deflate => 8,
            Compression::PackBits => 32773,
        }
    }

    /// Returns the name of this compression type
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Deflate => "Deflate/ZIP",
            Compression::Lzw => "LZW",
            Compression::PackBits => "PackBits",
        }
    }

    /// Decompresses data
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Deflate => deflate::decompress(data),
            Compression::Lzw => lzw::decompress(data),
            Compression::PackBits => packbits::decompress(data),
        }
    }

    /// Compresses data
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Deflate => deflate::compress(data),
            Compression::Lzw => Ok(lzw::compress(data)),
            Compression::PackBits => Err(Error::Unsupported(
                "PackBits is only supported for reading".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_tag() {
        assert_eq!(Compression::from_tag(1).unwrap(), Compression::None);
        assert_eq!(Compression::from_tag(8).unwrap(), Compression::Deflate);
        assert_eq!(Compression::from_tag(32946).unwrap(), Compression::Deflate);
        assert_eq!(Compression::from_tag(5).unwrap(), Compression::Lzw);
        assert!(matches!(Compression::from_tag(7), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_tag_matches_from_tag() {
        for c in [Compression::None, Compression::Deflate, Compression::Lzw, Compression::PackBits] {
            assert_eq!(Compression::from_tag(c.tag() as u64).unwrap(), c);
        }
    }

    #[test]
    fn test_packbits_write_unsupported() {
        assert!(Compression::PackBits.compress(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_no_compression() {
        let data = vec![1u8, 2, 3, 4];
        let result = Compression::None.decompress(&data).unwrap();
        assert_eq!(result, data);
    }
}
