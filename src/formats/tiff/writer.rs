//! GeoTIFF writer
//!
//! Produces little-endian tiled TIFFs with pixel-interleaved bands, GeoTIFF
//! georeferencing and a GDAL_NODATA tag. Blocks are streamed to the output
//! one row of blocks at a time; the directory follows the pixel data and the
//! header is patched last. Files that outgrow 32-bit offsets are written as
//! BigTIFF.

use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::Path;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::types::DataType;
use super::tags::{self, field_types, geo_keys};
use super::{BIGTIFF_MAGIC, TIFF_MAGIC};

/// Default internal tile edge in pixels
pub const DEFAULT_BLOCK_SIZE: u32 = 256;

/// Bytes reserved for the header, enough for BigTIFF
const HEADER_LEN: u64 = 16;

/// Pixel buffer to encode: little-endian samples, bands interleaved per pixel
pub struct ImageData<'a> {
    pub width: u32,
    pub height: u32,
    pub bands: u16,
    pub data_type: DataType,
    pub samples: &'a [u8],
}

impl ImageData<'_> {
    pub fn shape(&self) -> ImageShape {
        ImageShape {
            width: self.width,
            height: self.height,
            bands: self.bands,
            data_type: self.data_type,
        }
    }
}

/// Dimensions and sample type of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub width: u32,
    pub height: u32,
    pub bands: u16,
    pub data_type: DataType,
}

impl ImageShape {
    fn row_bytes(&self) -> usize {
        self.width as usize * self.bands as usize * self.data_type.size()
    }
}

/// North-up georeferencing written as ModelPixelScale + ModelTiepoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Georeference {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub epsg: Option<u32>,
}

/// When to write BigTIFF rather than classic TIFF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BigTiff {
    /// Only when the file does not fit 32-bit offsets
    #[default]
    IfNeeded,
    Always,
}

/// Writes single-image tiled GeoTIFF files
#[derive(Debug, Clone, Copy)]
pub struct GeoTiffWriter {
    compression: Compression,
    block_size: u32,
    big_tiff: BigTiff,
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    bytes: Vec<u8>,
}

impl Entry {
    fn shorts(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: field_types::SHORT,
            count: values.len() as u64,
            bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn longs(tag: u16, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: field_types::LONG,
            count: values.len() as u64,
            bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// File offsets or sizes: LONG8 in BigTIFF, LONG otherwise
    fn offsets(tag: u16, values: &[u64], big: bool) -> Result<Self> {
        if big {
            return Ok(Self {
                tag,
                field_type: field_types::LONG8,
                count: values.len() as u64,
                bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            });
        }
        let narrowed = values.iter().map(|&v| to_u32(v)).collect::<Result<Vec<_>>>()?;
        Ok(Self::longs(tag, &narrowed))
    }

    fn doubles(tag: u16, values: &[f64]) -> Self {
        Self {
            tag,
            field_type: field_types::DOUBLE,
            count: values.len() as u64,
            bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        Self {
            tag,
            field_type: field_types::ASCII,
            count: bytes.len() as u64,
            bytes,
        }
    }
}

impl GeoTiffWriter {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            block_size: DEFAULT_BLOCK_SIZE,
            big_tiff: BigTiff::default(),
        }
    }

    /// Overrides the nominal tile edge (rounded up to a multiple of 16)
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = round_up_16(block_size.max(16));
        self
    }

    pub fn with_big_tiff(mut self, big_tiff: BigTiff) -> Self {
        self.big_tiff = big_tiff;
        self
    }

    /// Tile edge used for an image dimension
    fn block_edge(&self, dimension: u32) -> u32 {
        self.block_size.min(round_up_16(dimension))
    }

    /// Starts streaming an image of `shape` into `out`
    pub fn begin<W: Write + Seek>(&self, mut out: W, shape: ImageShape, nodata: Option<f64>) -> Result<BlockWriter<W>> {
        if shape.width == 0 || shape.height == 0 || shape.bands == 0 {
            return Err(Error::InvalidFormat(format!(
                "Cannot write empty image {} x {} x {}",
                shape.width, shape.height, shape.bands
            )));
        }
        out.write_all(&[0u8; HEADER_LEN as usize])?;
        let block_width = self.block_edge(shape.width);
        let block_height = self.block_edge(shape.height);
        let blocks = (shape.width.div_ceil(block_width) as usize) * (shape.height.div_ceil(block_height) as usize);
        Ok(BlockWriter {
            out,
            shape,
            block_width,
            block_height,
            compression: self.compression,
            big_tiff: self.big_tiff,
            nodata,
            fill: fill_pixel(shape, nodata),
            position: HEADER_LEN,
            offsets: Vec::with_capacity(blocks),
            byte_counts: Vec::with_capacity(blocks),
            rows_written: 0,
        })
    }

    /// Starts streaming an image into a new file at `path`
    pub fn create<P: AsRef<Path>>(
        &self,
        path: P,
        shape: ImageShape,
        nodata: Option<f64>,
    ) -> Result<BlockWriter<BufWriter<File>>> {
        self.begin(BufWriter::new(File::create(path.as_ref())?), shape, nodata)
    }

    fn write_image<W: Write + Seek>(
        &self,
        out: W,
        image: &ImageData<'_>,
        geo: &Georeference,
        nodata: Option<f64>,
    ) -> Result<W> {
        validate(image)?;
        let mut writer = self.begin(out, image.shape(), nodata)?;
        let band_bytes = writer.block_height as usize * image.shape().row_bytes();
        for band in image.samples.chunks(band_bytes) {
            writer.write_rows(band)?;
        }
        writer.finish(geo)
    }

    /// Encodes a complete GeoTIFF file in memory
    pub fn encode(&self, image: &ImageData<'_>, geo: &Georeference, nodata: Option<f64>) -> Result<Vec<u8>> {
        Ok(self.write_image(Cursor::new(Vec::new()), image, geo, nodata)?.into_inner())
    }

    /// Encodes and writes a GeoTIFF file
    pub fn write<P: AsRef<Path>>(
        &self,
        path: P,
        image: &ImageData<'_>,
        geo: &Georeference,
        nodata: Option<f64>,
    ) -> Result<()> {
        let file = BufWriter::new(File::create(path.as_ref())?);
        self.write_image(file, image, geo, nodata)?;
        Ok(())
    }
}

impl Default for GeoTiffWriter {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

/// A GeoTIFF being written one row of blocks at a time
///
/// Each [`write_rows`](Self::write_rows) call takes exactly the next
/// [`block_height`](Self::block_height) image rows (fewer for the last call);
/// blocks of a row are compressed in parallel and appended in order.
pub struct BlockWriter<W: Write + Seek> {
    out: W,
    shape: ImageShape,
    block_width: u32,
    block_height: u32,
    compression: Compression,
    big_tiff: BigTiff,
    nodata: Option<f64>,
    fill: Vec<u8>,
    position: u64,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    rows_written: u32,
}

impl<W: Write + Seek> BlockWriter<W> {
    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Image rows expected by each call to `write_rows`
    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn align(&mut self) -> Result<()> {
        if self.position % 2 == 1 {
            self.put(&[0])?;
        }
        Ok(())
    }

    /// Appends the next row of blocks from `samples`, whole image rows
    pub fn write_rows(&mut self, samples: &[u8]) -> Result<()> {
        let remaining = self.shape.height - self.rows_written;
        let rows = self.block_height.min(remaining);
        let expected = rows as usize * self.shape.row_bytes();
        if rows == 0 || samples.len() != expected {
            return Err(Error::InvalidFormat(format!(
                "Block row at image row {} holds {} bytes, expected {}",
                self.rows_written,
                samples.len(),
                expected
            )));
        }

        let band = ImageData {
            width: self.shape.width,
            height: rows,
            bands: self.shape.bands,
            data_type: self.shape.data_type,
            samples,
        };
        let across = self.shape.width.div_ceil(self.block_width);
        let (block_w, block_h) = (self.block_width, self.block_height);
        let (fill, compression) = (&self.fill, self.compression);
        let blocks: Vec<Vec<u8>> = (0..across)
            .into_par_iter()
            .map(|block_x| compression.compress(&extract_block(&band, fill, block_x, 0, block_w, block_h)))
            .collect::<Result<_>>()?;

        for block in &blocks {
            self.offsets.push(self.position);
            self.byte_counts.push(block.len() as u64);
            self.put(block)?;
        }
        self.rows_written += rows;
        Ok(())
    }

    fn entries(&self, geo: &Georeference, big: bool) -> Result<Vec<Entry>> {
        let shape = &self.shape;
        let bands = shape.bands as usize;
        let mut entries = vec![
            Entry::longs(tags::IMAGE_WIDTH, &[shape.width]),
            Entry::longs(tags::IMAGE_LENGTH, &[shape.height]),
            Entry::shorts(tags::BITS_PER_SAMPLE, &vec![shape.data_type.bits(); bands]),
            Entry::shorts(tags::COMPRESSION, &[self.compression.tag()]),
            Entry::shorts(tags::PHOTOMETRIC_INTERPRETATION, &[1]),
            Entry::shorts(tags::SAMPLES_PER_PIXEL, &[shape.bands]),
            Entry::shorts(tags::PLANAR_CONFIGURATION, &[1]),
            Entry::longs(tags::TILE_WIDTH, &[self.block_width]),
            Entry::longs(tags::TILE_LENGTH, &[self.block_height]),
            Entry::offsets(tags::TILE_OFFSETS, &self.offsets, big)?,
            Entry::offsets(tags::TILE_BYTE_COUNTS, &self.byte_counts, big)?,
        ];
        if bands > 1 {
            entries.push(Entry::shorts(tags::EXTRA_SAMPLES, &vec![0; bands - 1]));
        }
        entries.push(Entry::shorts(
            tags::SAMPLE_FORMAT,
            &vec![shape.data_type.tiff_sample_format(); bands],
        ));
        entries.push(Entry::doubles(
            tags::MODEL_PIXEL_SCALE,
            &[geo.pixel_width, geo.pixel_height, 0.0],
        ));
        entries.push(Entry::doubles(
            tags::MODEL_TIEPOINT,
            &[0.0, 0.0, 0.0, geo.origin_x, geo.origin_y, 0.0],
        ));
        entries.push(Entry::shorts(tags::GEO_KEY_DIRECTORY, &geo_key_directory(geo.epsg)?));
        if let Some(value) = self.nodata {
            entries.push(Entry::ascii(tags::GDAL_NODATA, &format_nodata(value)));
        }
        Ok(entries)
    }

    /// Whether the finished file needs 64-bit offsets
    fn needs_big_tiff(&self, geo: &Georeference) -> Result<bool> {
        let limit = u32::MAX as u64;
        if self.big_tiff == BigTiff::Always || self.position > limit {
            return Ok(true);
        }
        Ok(directory_end(self.position, &self.entries(geo, false)?, false) > limit)
    }

    /// Writes the directory and header and returns the output
    pub fn finish(mut self, geo: &Georeference) -> Result<W> {
        if self.rows_written != self.shape.height {
            return Err(Error::InvalidFormat(format!(
                "Image has {} rows but {} were written",
                self.shape.height, self.rows_written
            )));
        }

        let big = self.needs_big_tiff(geo)?;
        let entries = self.entries(geo, big)?;
        let inline = if big { 8 } else { 4 };

        // Out-of-line values go before the IFD, word aligned
        let mut value_offsets = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.bytes.len() > inline {
                self.align()?;
                value_offsets.push(Some(self.position));
                self.put(&entry.bytes)?;
            } else {
                value_offsets.push(None);
            }
        }

        self.align()?;
        let ifd_offset = self.position;
        let mut ifd = Vec::with_capacity(16 + entries.len() * 20);
        if big {
            ifd.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        } else {
            ifd.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        }
        for (entry, value_offset) in entries.iter().zip(&value_offsets) {
            ifd.extend_from_slice(&entry.tag.to_le_bytes());
            ifd.extend_from_slice(&entry.field_type.to_le_bytes());
            if big {
                ifd.extend_from_slice(&entry.count.to_le_bytes());
            } else {
                ifd.extend_from_slice(&to_u32(entry.count)?.to_le_bytes());
            }
            let mut value = [0u8; 8];
            match value_offset {
                Some(offset) if big => value.copy_from_slice(&offset.to_le_bytes()),
                Some(offset) => value[..4].copy_from_slice(&to_u32(*offset)?.to_le_bytes()),
                None => value[..entry.bytes.len()].copy_from_slice(&entry.bytes),
            }
            ifd.extend_from_slice(&value[..inline]);
        }
        ifd.extend_from_slice(&[0u8; 8][..inline]);
        self.put(&ifd)?;

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(b"II");
        if big {
            header.extend_from_slice(&BIGTIFF_MAGIC.to_le_bytes());
            header.extend_from_slice(&8u16.to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes());
            header.extend_from_slice(&ifd_offset.to_le_bytes());
        } else {
            header.extend_from_slice(&TIFF_MAGIC.to_le_bytes());
            header.extend_from_slice(&to_u32(ifd_offset)?.to_le_bytes());
        }
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header)?;
        self.out.seek(SeekFrom::End(0))?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// File size once values and the IFD of `entries` follow offset `start`
fn directory_end(start: u64, entries: &[Entry], big: bool) -> u64 {
    let inline = if big { 8 } else { 4 };
    let mut end = start;
    for entry in entries.iter().filter(|e| e.bytes.len() > inline) {
        end += end % 2 + entry.bytes.len() as u64;
    }
    end += end % 2;
    let n = entries.len() as u64;
    end + if big { 16 + 20 * n } else { 6 + 12 * n }
}

fn validate(image: &ImageData<'_>) -> Result<()> {
    if image.width == 0 || image.height == 0 || image.bands == 0 {
        return Err(Error::InvalidFormat(format!(
            "Cannot write empty image {} x {} x {}",
            image.width, image.height, image.bands
        )));
    }
    let expected = image.width as usize * image.height as usize * image.bands as usize * image.data_type.size();
    if image.samples.len() != expected {
        return Err(Error::InvalidFormat(format!(
            "Sample buffer holds {} bytes, expected {}",
            image.samples.len(),
            expected
        )));
    }
    Ok(())
}

fn round_up_16(value: u32) -> u32 {
    value.div_ceil(16) * 16
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Unsupported(format!("Value {} exceeds classic TIFF offsets", value)))
}

/// Encoded pixel used to pad partial edge tiles
fn fill_pixel(shape: ImageShape, nodata: Option<f64>) -> Vec<u8> {
    let size = shape.data_type.size();
    let mut pixel = vec![0u8; size * shape.bands as usize];
    if let Some(value) = nodata {
        for sample in pixel.chunks_exact_mut(size) {
            shape.data_type.write_le(value, sample);
        }
    }
    pixel
}

fn extract_block(
    image: &ImageData<'_>,
    fill: &[u8],
    block_x: u32,
    block_y: u32,
    block_w: u32,
    block_h: u32,
) -> Vec<u8> {
    let pixel = fill.len();
    let mut block = Vec::with_capacity(block_w as usize * block_h as usize * pixel);
    let x0 = block_x * block_w;
    let y0 = block_y * block_h;
    let valid_w = block_w.min(image.width - x0) as usize;

    for y in y0..y0 + block_h {
        if y < image.height {
            let start = (y as usize * image.width as usize + x0 as usize) * pixel;
            block.extend_from_slice(&image.samples[start..start + valid_w * pixel]);
            for _ in valid_w..block_w as usize {
                block.extend_from_slice(fill);
            }
        } else {
            for _ in 0..block_w {
                block.extend_from_slice(fill);
            }
        }
    }
    block
}

/// GeoKeyDirectory values for a north-up, pixel-is-area raster
fn geo_key_directory(epsg: Option<u32>) -> Result<Vec<u16>> {
    let geographic = epsg.is_some_and(is_geographic_epsg);
    let model_type = if geographic {
        geo_keys::MODEL_TYPE_GEOGRAPHIC
    } else {
        geo_keys::MODEL_TYPE_PROJECTED
    };

    let mut keys = vec![
        geo_keys::GT_MODEL_TYPE, 0, 1, model_type,
        geo_keys::GT_RASTER_TYPE, 0, 1, geo_keys::RASTER_PIXEL_IS_AREA,
    ];
    if let Some(code) = epsg {
        let code = u16::try_from(code)
            .map_err(|_| Error::Projection(format!("EPSG code {} does not fit a GeoKey", code)))?;
        let key = if geographic {
            geo_keys::GEOGRAPHIC_TYPE
        } else {
            geo_keys::PROJECTED_CS_TYPE
        };
        keys.extend_from_slice(&[key, 0, 1, code]);
    }

    let mut directory = vec![1, 1, 0, (keys.len() / 4) as u16];
    directory.extend(keys);
    Ok(directory)
}

/// EPSG geographic 2D CRS codes live in 4000..=4999
pub fn is_geographic_epsg(code: u32) -> bool {
    (4000..=4999).contains(&code)
}

/// Formats nodata the way GDAL writes it
fn format_nodata(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::tiff::TiffReader;
    use tempfile::TempDir;

    fn georef() -> Georeference {
        Georeference {
            origin_x: 500.0,
            origin_y: 1000.0,
            pixel_width: 2.0,
            pixel_height: 2.0,
            epsg: Some(2154),
        }
    }

    #[test]
    fn test_block_edge() {
        let writer = GeoTiffWriter::default();
        assert_eq!(writer.block_edge(1000), 256);
        assert_eq!(writer.block_edge(37), 48);
        assert_eq!(writer.block_edge(16), 16);
        assert_eq!(writer.with_block_size(20).block_edge(1000), 32);
    }

    #[test]
    fn test_geo_key_directory() {
        assert_eq!(
            geo_key_directory(Some(2154)).unwrap(),
            vec![1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 2154]
        );
        assert_eq!(geo_key_directory(Some(4326)).unwrap()[12], 2048);
        assert_eq!(geo_key_directory(None).unwrap()[3], 2);
        assert!(geo_key_directory(Some(100_000)).is_err());
    }

    #[test]
    fn test_rejects_wrong_buffer_length() {
        let image = ImageData {
            width: 4,
            height: 4,
            bands: 1,
            data_type: DataType::U16,
            samples: &[0u8; 16],
        };
        assert!(GeoTiffWriter::default().encode(&image, &georef(), None).is_err());
    }

    #[test]
    fn test_tags_written_in_ascending_order() {
        let samples = vec![7u8; 20 * 10 * 2];
        let image = ImageData {
            width: 20,
            height: 10,
            bands: 2,
            data_type: DataType::U8,
            samples: &samples,
        };
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("two_band.tif");
        GeoTiffWriter::new(Compression::Lzw)
            .write(&path, &image, &georef(), Some(0.0))
            .unwrap();

        let reader = TiffReader::open(&path).unwrap();
        let ifd = reader.main_ifd().unwrap();
        let tag_ids: Vec<u16> = ifd.entries.iter().map(|e| e.tag).collect();
        let mut sorted = tag_ids.clone();
        sorted.sort_unstable();
        assert_eq!(tag_ids, sorted);
        assert!(tag_ids.contains(&tags::EXTRA_SAMPLES));

        let info = reader.image_info(ifd).unwrap();
        assert_eq!(info.bands, 2);
        assert_eq!(info.compression, Compression::Lzw);
        assert_eq!((info.layout.block_width, info.layout.block_height), (32, 16));
        assert_eq!(info.nodata, Some(0.0));

        let block = reader.read_block(&info, 0).unwrap();
        // First row: 20 real pixels then 12 padding pixels of nodata
        assert_eq!(&block[..40], &samples[..40]);
        assert!(block[40..64].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_classic_header_when_small() {
        let samples = vec![3u8; 8 * 8];
        let image = ImageData {
            width: 8,
            height: 8,
            bands: 1,
            data_type: DataType::U8,
            samples: &samples,
        };
        let bytes = GeoTiffWriter::default().encode(&image, &georef(), None).unwrap();
        assert_eq!(&bytes[..4], &[b'I', b'I', 42, 0]);
        let ifd_offset = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        assert!(ifd_offset > 16 && ifd_offset < bytes.len());
    }

    #[test]
    fn test_big_tiff_round_trip() {
        let samples: Vec<u8> = (0..40u16 * 36).flat_map(|v| v.to_le_bytes()).collect();
        let image = ImageData {
            width: 40,
            height: 36,
            bands: 1,
            data_type: DataType::U16,
            samples: &samples,
        };
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.tif");
        GeoTiffWriter::new(Compression::Deflate)
            .with_block_size(16)
            .with_big_tiff(BigTiff::Always)
            .write(&path, &image, &georef(), Some(0.0))
            .unwrap();

        let reader = TiffReader::open(&path).unwrap();
        assert!(reader.is_big_tiff());
        let ifd = reader.main_ifd().unwrap();
        let info = reader.image_info(ifd).unwrap();
        assert_eq!((info.width, info.height), (40, 36));
        assert_eq!(info.nodata, Some(0.0));
        assert_eq!(reader.geo_info(ifd).unwrap().unwrap().epsg_code, Some(2154));

        let raster = crate::raster::Raster::read(&path).unwrap();
        assert_eq!(raster.data, samples);
    }

    #[test]
    fn test_block_rows_must_be_complete() {
        let shape = ImageShape {
            width: 10,
            height: 20,
            bands: 1,
            data_type: DataType::U8,
        };
        let mut writer = GeoTiffWriter::default()
            .with_block_size(16)
            .begin(Cursor::new(Vec::new()), shape, None)
            .unwrap();
        assert_eq!(writer.block_height(), 16);
        assert!(writer.write_rows(&[0u8; 10 * 15]).is_err());

        writer.write_rows(&[1u8; 10 * 16]).unwrap();
        writer.write_rows(&[2u8; 10 * 4]).unwrap();
        assert!(writer.write_rows(&[2u8; 10]).is_err());
        let bytes = writer.finish(&georef()).unwrap().into_inner();
        assert_eq!(&bytes[..2], b"II");

        let unfinished = GeoTiffWriter::default()
            .begin(Cursor::new(Vec::new()), shape, None)
            .unwrap();
        assert!(unfinished.finish(&georef()).is_err());
    }

    #[test]
    fn test_directory_end_accounts_for_wider_entries() {
        let entries = vec![
            Entry::longs(tags::IMAGE_WIDTH, &[1]),
            Entry::doubles(tags::MODEL_PIXEL_SCALE, &[1.0, 1.0, 0.0]),
        ];
        // 24 out-of-line bytes, then 2 + 2 * 12 + 4
        assert_eq!(directory_end(16, &entries, false), 16 + 24 + 30);
        // 24 out-of-line bytes, then 8 + 2 * 20 + 8
        assert_eq!(directory_end(17, &entries, true), 18 + 24 + 56);
    }

    #[test]
    fn test_georeference_round_trip() {
        let samples: Vec<u8> = (0..16u16).flat_map(|v| (v as i16 - 8).to_le_bytes()).collect();
        let image = ImageData {
            width: 4,
            height: 4,
            bands: 1,
            data_type: DataType::I16,
            samples: &samples,
        };
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geo.tif");
        GeoTiffWriter::default()
            .write(&path, &image, &georef(), Some(-9999.0))
            .unwrap();

        let reader = TiffReader::open(&path).unwrap();
        let ifd = reader.main_ifd().unwrap();
        let geo = reader.geo_info(ifd).unwrap().unwrap();
        assert_eq!(geo.epsg_code, Some(2154));
        assert_eq!(geo.affine_transform().unwrap(), [500.0, 2.0, 0.0, 1000.0, 0.0, -2.0]);
        assert_eq!(reader.image_info(ifd).unwrap().nodata, Some(-9999.0));
    }
}
