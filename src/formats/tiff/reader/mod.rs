//! TIFF reader over a memory-mapped file

pub mod blocks;
pub mod tags;

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use memmap2::Mmap;
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::formats::tiff::{
    tags as tiff_tags, BlockLayout, GeoInfo, ImageInfo, Tiff, BIGTIFF_MAGIC, IFD, IFDEntry,
    TIFF_MAGIC,
};
use crate::io::{ByteOrder, SliceReader};
use crate::types::DataType;

use self::tags::TagReader;

const MAX_IFDS: usize = 1000;

/// Memory-mapped TIFF/BigTIFF reader
///
/// The whole IFD chain is parsed on open; tag values and pixel blocks are
/// decoded lazily from the mapping. The reader is `Send + Sync` and can be
/// shared between worker threads.
pub struct TiffReader {
    mmap: Arc<Mmap>,
    tiff: Tiff,
}

impl TiffReader {
    /// Opens and parses a TIFF file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };

        #[cfg(unix)]
        unsafe {
            libc::madvise(
                mmap.as_ptr() as *mut libc::c_void,
                mmap.len(),
                libc::MADV_WILLNEED,
            );
        }

        let tiff = parse(&mmap)?;
        Ok(Self {
            mmap: Arc::new(mmap),
            tiff,
        })
    }

    /// Raw file bytes
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.tiff.byte_order
    }

    pub fn is_big_tiff(&self) -> bool {
        self.tiff.is_big_tiff
    }

    pub fn tiff(&self) -> &Tiff {
        &self.tiff
    }

    /// Returns the first IFD or an error for a file without images
    pub fn main_ifd(&self) -> Result<&IFD> {
        self.tiff
            .main_ifd()
            .ok_or_else(|| Error::InvalidFormat("TIFF file contains no IFD".to_string()))
    }

    pub fn tag_reader(&self) -> TagReader<'_> {
        TagReader::new(self.data(), self.byte_order())
    }

    pub fn read_tag_u64s(&self, ifd: &IFD, tag: u16) -> Result<Option<Vec<u64>>> {
        ifd.get_entry(tag)
            .map(|entry| self.tag_reader().read_u64s(entry))
            .transpose()
    }

    pub fn read_tag_u64(&self, ifd: &IFD, tag: u16) -> Result<Option<u64>> {
        ifd.get_entry(tag)
            .map(|entry| self.tag_reader().read_u64(entry))
            .transpose()
    }

    pub fn read_tag_u16s(&self, ifd: &IFD, tag: u16) -> Result<Option<Vec<u16>>> {
        ifd.get_entry(tag)
            .map(|entry| self.tag_reader().read_u16s(entry))
            .transpose()
    }

    pub fn read_tag_doubles(&self, ifd: &IFD, tag: u16) -> Result<Option<Vec<f64>>> {
        ifd.get_entry(tag)
            .map(|entry| self.tag_reader().read_doubles(entry))
            .transpose()
    }

    pub fn read_tag_ascii(&self, ifd: &IFD, tag: u16) -> Result<Option<String>> {
        ifd.get_entry(tag)
            .map(|entry| self.tag_reader().read_ascii(entry))
            .transpose()
    }

    fn required_u64(&self, ifd: &IFD, tag: u16) -> Result<u64> {
        self.read_tag_u64(ifd, tag)?.ok_or(Error::MissingTag(tag))
    }

    /// Resolves the metadata needed to decode the pixels of an IFD
    pub fn image_info(&self, ifd: &IFD) -> Result<ImageInfo> {
        let width = self.required_u64(ifd, tiff_tags::IMAGE_WIDTH)?;
        let height = self.required_u64(ifd, tiff_tags::IMAGE_LENGTH)?;
        if width == 0 || height == 0 {
            return Err(Error::InvalidFormat(format!("Empty image {} x {}", width, height)));
        }

        let bands = self.read_tag_u64(ifd, tiff_tags::SAMPLES_PER_PIXEL)?.unwrap_or(1) as usize;
        let bits = self
            .read_tag_u16s(ifd, tiff_tags::BITS_PER_SAMPLE)?
            .unwrap_or_else(|| vec![1]);
        let formats = self
            .read_tag_u16s(ifd, tiff_tags::SAMPLE_FORMAT)?
            .unwrap_or_else(|| vec![1]);

        if bits.iter().any(|&b| b != bits[0]) || formats.iter().any(|&f| f != formats[0]) {
            return Err(Error::Unsupported("Mixed sample types across bands".to_string()));
        }
        let data_type = DataType::from_tiff(formats[0] as u64, bits[0] as u64).ok_or_else(|| {
            Error::Unsupported(format!(
                "Sample format {} with {} bits per sample",
                formats[0], bits[0]
            ))
        })?;

        let planar = self.read_tag_u64(ifd, tiff_tags::PLANAR_CONFIGURATION)?.unwrap_or(1);
        if planar != 1 && bands > 1 {
            return Err(Error::Unsupported("Separate-plane (planar) band layout".to_string()));
        }

        let compression =
            Compression::from_tag(self.read_tag_u64(ifd, tiff_tags::COMPRESSION)?.unwrap_or(1))?;
        let predictor = self.read_tag_u64(ifd, tiff_tags::PREDICTOR)?.unwrap_or(1) as u16;

        let layout = if ifd.is_tiled() {
            BlockLayout {
                tiled: true,
                block_width: self.required_u64(ifd, tiff_tags::TILE_WIDTH)?,
                block_height: self.required_u64(ifd, tiff_tags::TILE_LENGTH)?,
                offsets: self
                    .read_tag_u64s(ifd, tiff_tags::TILE_OFFSETS)?
                    .ok_or(Error::MissingTag(tiff_tags::TILE_OFFSETS))?,
                byte_counts: self
                    .read_tag_u64s(ifd, tiff_tags::TILE_BYTE_COUNTS)?
                    .ok_or(Error::MissingTag(tiff_tags::TILE_BYTE_COUNTS))?,
            }
        } else {
            let rows_per_strip = self
                .read_tag_u64(ifd, tiff_tags::ROWS_PER_STRIP)?
                .unwrap_or(height)
                .min(height);
            BlockLayout {
                tiled: false,
                block_width: width,
                block_height: rows_per_strip,
                offsets: self
                    .read_tag_u64s(ifd, tiff_tags::STRIP_OFFSETS)?
                    .ok_or(Error::MissingTag(tiff_tags::STRIP_OFFSETS))?,
                byte_counts: self
                    .read_tag_u64s(ifd, tiff_tags::STRIP_BYTE_COUNTS)?
                    .ok_or(Error::MissingTag(tiff_tags::STRIP_BYTE_COUNTS))?,
            }
        };

        if layout.block_width == 0 || layout.block_height == 0 {
            return Err(Error::InvalidFormat("Zero block dimension".to_string()));
        }
        let expected = (layout.blocks_across(width) * layout.blocks_down(height)) as usize;
        if layout.offsets.len() < expected || layout.byte_counts.len() < expected {
            return Err(Error::InvalidFormat(format!(
                "Expected {} blocks, found {} offsets and {} byte counts",
                expected,
                layout.offsets.len(),
                layout.byte_counts.len()
            )));
        }

        let nodata = match self.read_tag_ascii(ifd, tiff_tags::GDAL_NODATA)? {
            Some(text) => Some(text.trim().parse::<f64>().map_err(|_| {
                Error::InvalidFormat(format!("Unparsable GDAL_NODATA value '{}'", text))
            })?),
            None => None,
        };

        Ok(ImageInfo {
            width,
            height,
            bands,
            data_type,
            compression,
            predictor,
            layout,
            nodata,
        })
    }

    /// Reads GeoTIFF georeferencing of an IFD, if present
    pub fn geo_info(&self, ifd: &IFD) -> Result<Option<GeoInfo>> {
        GeoInfo::from_ifd(ifd, self)
    }

    /// Decodes one block of the given image to little-endian samples
    pub fn read_block(&self, info: &ImageInfo, index: usize) -> Result<Vec<u8>> {
        blocks::decode_block(self.data(), self.byte_order(), info, index)
    }
}

/// Parses the header and the IFD chain of a TIFF file
fn parse(data: &[u8]) -> Result<Tiff> {
    let byte_order = ByteOrder::detect(data)?;
    let mut header = SliceReader::at(data, byte_order, 2)?;

    let is_big_tiff = match header.read_u16()? {
        TIFF_MAGIC => false,
        BIGTIFF_MAGIC => true,
        magic => return Err(Error::InvalidMagic(magic)),
    };

    let first_offset = if is_big_tiff {
        let offset_size = header.read_u16()?;
        if offset_size != 8 {
            return Err(Error::InvalidFormat(format!(
                "Invalid BigTIFF offset size: {}",
                offset_size
            )));
        }
        let _reserved = header.read_u16()?;
        header.read_u64()?
    } else {
        header.read_u32()? as u64
    };

    let mut tiff = Tiff::new(is_big_tiff, byte_order);
    let mut visited = HashSet::new();
    let mut next_offset = first_offset;

    while next_offset != 0 {
        if tiff.ifd_count() >= MAX_IFDS || !visited.insert(next_offset) {
            return Err(Error::InvalidFormat("Too many or cyclic IFDs".to_string()));
        }
        let (ifd, following) = read_ifd(data, byte_order, is_big_tiff, tiff.ifd_count(), next_offset)?;
        tiff.add_ifd(ifd);
        next_offset = following;
    }

    Ok(tiff)
}

/// Reads one IFD and returns it with the offset of the next one
fn read_ifd(
    data: &[u8],
    order: ByteOrder,
    is_big_tiff: bool,
    number: usize,
    offset: u64,
) -> Result<(IFD, u64)> {
    let mut reader = SliceReader::at(data, order, offset)?;
    let entry_count = if is_big_tiff {
        reader.read_u64()?
    } else {
        reader.read_u16()? as u64
    };

    let mut ifd = IFD::new(number, offset);
    for _ in 0..entry_count {
        let tag = reader.read_u16()?;
        let field_type = reader.read_u16()?;
        let count = if is_big_tiff {
            reader.read_u64()?
        } else {
            reader.read_u32()? as u64
        };

        let value_field = reader.position();
        let pointer = if is_big_tiff {
            reader.read_u64()?
        } else {
            reader.read_u32()? as u64
        };

        let data_offset = if IFDEntry::fits_inline(field_type, count, is_big_tiff) {
            value_field
        } else {
            pointer
        };
        ifd.add_entry(IFDEntry::new(tag, field_type, count, data_offset));
    }

    let next = if is_big_tiff {
        reader.read_u64()?
    } else {
        reader.read_u32()? as u64
    };

    Ok((ifd, next))
}
