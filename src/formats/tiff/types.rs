//! TIFF data structures

use std::fmt;
use crate::compression::Compression;
use crate::io::ByteOrder;
use crate::types::DataType;
use super::ifd::IFD;

/// Represents a parsed TIFF or BigTIFF file
#[derive(Debug)]
pub struct Tiff {
    pub is_big_tiff: bool,
    pub byte_order: ByteOrder,
    pub ifds: Vec<IFD>,
}

impl Tiff {
    pub fn new(is_big_tiff: bool, byte_order: ByteOrder) -> Self {
        Self {
            is_big_tiff,
            byte_order,
            ifds: Vec::new(),
        }
    }

    pub fn add_ifd(&mut self, ifd: IFD) {
        self.ifds.push(ifd);
    }

    /// Returns the main (first) IFD
    pub fn main_ifd(&self) -> Option<&IFD> {
        self.ifds.first()
    }

    pub fn ifd_count(&self) -> usize {
        self.ifds.len()
    }
}

impl fmt::Display for Tiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TIFF File Information:")?;
        writeln!(f, "  Format: {}", if self.is_big_tiff { "BigTIFF" } else { "TIFF" })?;
        writeln!(
            f,
            "  Byte order: {}",
            match self.byte_order {
                ByteOrder::LittleEndian => "little-endian",
                ByteOrder::BigEndian => "big-endian",
            }
        )?;
        writeln!(f, "  Number of IFDs: {}", self.ifds.len())
    }
}

/// Storage blocks (tiles or strips) of one image
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLayout {
    pub tiled: bool,
    pub block_width: u64,
    pub block_height: u64,
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
}

impl BlockLayout {
    /// Number of blocks across the image
    pub fn blocks_across(&self, image_width: u64) -> u64 {
        image_width.div_ceil(self.block_width)
    }

    /// Number of blocks down the image
    pub fn blocks_down(&self, image_height: u64) -> u64 {
        image_height.div_ceil(self.block_height)
    }

    pub fn block_count(&self) -> usize {
        self.offsets.len()
    }
}

/// Resolved metadata of one image needed to decode its pixels
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub width: u64,
    pub height: u64,
    pub bands: usize,
    pub data_type: DataType,
    pub compression: Compression,
    pub predictor: u16,
    pub layout: BlockLayout,
    pub nodata: Option<f64>,
}

impl ImageInfo {
    /// Bytes of one pixel across all bands
    pub fn pixel_size(&self) -> usize {
        self.bands * self.data_type.size()
    }

    /// Bytes of one fully decoded block
    pub fn block_bytes(&self) -> usize {
        (self.layout.block_width * self.layout.block_height) as usize * self.pixel_size()
    }

    /// Index of the block holding pixel (x, y)
    pub fn block_index(&self, x: u64, y: u64) -> usize {
        let across = self.layout.blocks_across(self.width);
        ((y / self.layout.block_height) * across + x / self.layout.block_width) as usize
    }
}

impl fmt::Display for ImageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nMain Image (IFD 0):")?;
        writeln!(f, "  Dimensions: {} x {}", self.width, self.height)?;
        writeln!(f, "  Bands: {}", self.bands)?;
        writeln!(f, "  Data type: {}", self.data_type.name())?;
        writeln!(f, "  Compression: {}", self.compression.name())?;
        if self.predictor != 1 {
            writeln!(f, "  Predictor: {}", self.predictor)?;
        }
        writeln!(
            f,
            "  {}: {} x {} ({} blocks)",
            if self.layout.tiled { "Tile size" } else { "Strip size" },
            self.layout.block_width,
            self.layout.block_height,
            self.layout.block_count()
        )?;
        if let Some(nodata) = self.nodata {
            writeln!(f, "  NoData: {}", nodata)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiled_info(width: u64, height: u64) -> ImageInfo {
        let layout = BlockLayout {
            tiled: true,
            block_width: 16,
            block_height: 16,
            offsets: vec![0; 12],
            byte_counts: vec![0; 12],
        };
        ImageInfo {
            width,
            height,
            bands: 2,
            data_type: DataType::I16,
            compression: Compression::None,
            predictor: 1,
            layout,
            nodata: Some(-1.0),
        }
    }

    #[test]
    fn test_block_arithmetic() {
        let info = tiled_info(40, 60);
        assert_eq!(info.layout.blocks_across(40), 3);
        assert_eq!(info.layout.blocks_down(60), 4);
        assert_eq!(info.pixel_size(), 4);
        assert_eq!(info.block_bytes(), 16 * 16 * 4);
        assert_eq!(info.block_index(0, 0), 0);
        assert_eq!(info.block_index(39, 0), 2);
        assert_eq!(info.block_index(17, 33), 7);
    }

    #[test]
    fn test_display() {
        let tiff = Tiff::new(true, ByteOrder::BigEndian);
        let output = tiff.to_string();
        assert!(output.contains("BigTIFF"));
        assert!(output.contains("big-endian"));

        let info = tiled_info(40, 60).to_string();
        assert!(info.contains("40 x 60"));
        assert!(info.contains("Tile size: 16 x 16"));
        assert!(info.contains("NoData: -1"));
    }
}
