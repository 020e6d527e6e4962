//! Block (tile or strip) decoding

use crate::error::{Error, Result};
use crate::formats::tiff::ImageInfo;
use crate::io::ByteOrder;
use crate::raster::encode_pixel;
use crate::types::DataType;

/// Decodes block `index` into a full-size little-endian block buffer
///
/// Short strips at the bottom of the image are padded with zeros to the
/// nominal block size so callers can address every block the same way.
pub fn decode_block(data: &[u8], order: ByteOrder, info: &ImageInfo, index: usize) -> Result<Vec<u8>> {
    let layout = &info.layout;
    let (offset, count) = match (layout.offsets.get(index), layout.byte_counts.get(index)) {
        (Some(&offset), Some(&count)) => (offset as usize, count as usize),
        _ => {
            return Err(Error::OutOfBounds(format!(
                "Block {} out of range ({} blocks)",
                index,
                layout.block_count()
            )))
        }
    };

    let block_bytes = info.block_bytes();
    if count == 0 {
        // Sparse block: every pixel is nodata, zero without GDAL_NODATA
        let pixel = encode_pixel(info.data_type, info.bands, info.nodata.unwrap_or(0.0));
        return Ok(pixel.repeat(block_bytes / pixel.len().max(1)));
    }

    let end = offset.checked_add(count).filter(|&end| end <= data.len()).ok_or_else(|| {
        Error::OutOfBounds(format!(
            "Block {} at offset {} with {} bytes exceeds file size {}",
            index,
            offset,
            count,
            data.len()
        ))
    })?;

    let mut decoded = info.compression.decompress(&data[offset..end])?;

    let rows = if layout.tiled {
        layout.block_height
    } else {
        let first_row = index as u64 * layout.block_height;
        layout.block_height.min(info.height.saturating_sub(first_row))
    };
    let required = (rows * layout.block_width) as usize * info.pixel_size();
    if decoded.len() < required {
        return Err(Error::InvalidFormat(format!(
            "Block {} decoded to {} bytes, expected {}",
            index,
            decoded.len(),
            required
        )));
    }
    decoded.resize(block_bytes, 0);

    order.normalize_samples(&mut decoded, info.data_type.size());

    match info.predictor {
        1 => {}
        2 => undo_horizontal_predictor(
            &mut decoded,
            info.data_type,
            layout.block_width as usize,
            info.bands,
        )?,
        3 => {
            return Err(Error::Unsupported("Floating point predictor".to_string()));
        }
        other => {
            return Err(Error::Unsupported(format!("Predictor {}", other)));
        }
    }

    Ok(decoded)
}

/// Reverses horizontal differencing on little-endian integer samples
///
/// Each sample of a row is stored as the difference to the same band of the
/// previous pixel.
pub fn undo_horizontal_predictor(
    data: &mut [u8],
    data_type: DataType,
    row_pixels: usize,
    bands: usize,
) -> Result<()> {
    let row_bytes = row_pixels * bands * data_type.size();
    if row_bytes == 0 {
        return Ok(());
    }

    match data_type {
        DataType::U8 | DataType::I8 => {
            for row in data.chunks_exact_mut(row_bytes) {
                for i in bands..row.len() {
                    row[i] = row[i].wrapping_add(row[i - bands]);
                }
            }
        }
        DataType::U16 | DataType::I16 => {
            for row in data.chunks_exact_mut(row_bytes) {
                for i in bands..row.len() / 2 {
                    let prev = u16::from_le_bytes([row[(i - bands) * 2], row[(i - bands) * 2 + 1]]);
                    let cur = u16::from_le_bytes([row[i * 2], row[i * 2 + 1]]);
                    row[i * 2..i * 2 + 2].copy_from_slice(&cur.wrapping_add(prev).to_le_bytes());
                }
            }
        }
        DataType::U32 | DataType::I32 => {
            for row in data.chunks_exact_mut(row_bytes) {
                for i in bands..row.len() / 4 {
                    let p = (i - bands) * 4;
                    let prev = u32::from_le_bytes([row[p], row[p + 1], row[p + 2], row[p + 3]]);
                    let c = i * 4;
                    let cur = u32::from_le_bytes([row[c], row[c + 1], row[c + 2], row[c + 3]]);
                    row[c..c + 4].copy_from_slice(&cur.wrapping_add(prev).to_le_bytes());
                }
            }
        }
        DataType::F32 | DataType::F64 => {
            return Err(Error::Unsupported(
                "Horizontal predictor on floating point samples".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::formats::tiff::BlockLayout;

    fn info(data_type: DataType, predictor: u16, compression: Compression) -> ImageInfo {
        ImageInfo {
            width: 4,
            height: 3,
            bands: 1,
            data_type,
            compression,
            predictor,
            layout: BlockLayout {
                tiled: false,
                block_width: 4,
                block_height: 2,
                offsets: vec![0, 0],
                byte_counts: vec![0, 0],
            },
            nodata: None,
        }
    }

    #[test]
    fn test_predictor_u8() {
        let mut data = vec![10, 1, 1, 1, 5, 255, 0, 2];
        undo_horizontal_predictor(&mut data, DataType::U8, 4, 1).unwrap();
        assert_eq!(data, vec![10, 11, 12, 13, 5, 4, 4, 6]);
    }

    #[test]
    fn test_predictor_u16_two_bands() {
        let samples: [u16; 4] = [1000, 7, 5, 65535];
        let mut data: Vec<u8> = samples.iter().flat_map(|v| v.to_le_bytes()).collect();
        undo_horizontal_predictor(&mut data, DataType::U16, 2, 2).unwrap();
        let decoded: Vec<u16> = data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded, vec![1000, 7, 1005, 6]);
    }

    #[test]
    fn test_predictor_rejects_float() {
        let mut data = vec![0u8; 16];
        assert!(undo_horizontal_predictor(&mut data, DataType::F32, 4, 1).is_err());
    }

    #[test]
    fn test_short_last_strip_is_padded() {
        // Second strip holds a single row of a 3-row image
        let mut file = vec![0u8; 8];
        file.extend_from_slice(&[9, 8, 7, 6]);
        let mut info = info(DataType::U8, 1, Compression::None);
        info.layout.offsets = vec![0, 8];
        info.layout.byte_counts = vec![8, 4];

        let block = decode_block(&file, ByteOrder::LittleEndian, &info, 1).unwrap();
        assert_eq!(block, vec![9, 8, 7, 6, 0, 0, 0, 0]);
    }

    #[test]
    fn test_truncated_block_is_error() {
        let file = vec![1u8; 4];
        let mut info = info(DataType::U8, 1, Compression::None);
        info.layout.byte_counts = vec![4, 0];
        assert!(decode_block(&file, ByteOrder::LittleEndian, &info, 0).is_err());
    }

    #[test]
    fn test_deflate_block_with_predictor() {
        let raw = vec![3u8, 1, 1, 1, 0, 2, 2, 2];
        let compressed = Compression::Deflate.compress(&raw).unwrap();
        let mut info = info(DataType::U8, 2, Compression::Deflate);
        info.layout.byte_counts = vec![compressed.len() as u64, 0];

        let block = decode_block(&compressed, ByteOrder::LittleEndian, &info, 0).unwrap();
        assert_eq!(block, vec![3, 4, 5, 6, 0, 2, 4, 6]);
    }

    #[test]
    fn test_sparse_block_is_nodata() {
        let mut info = info(DataType::I16, 1, Compression::None);
        let block = decode_block(&[], ByteOrder::LittleEndian, &info, 1).unwrap();
        assert_eq!(block, vec![0u8; 16]);

        info.nodata = Some(-9999.0);
        let block = decode_block(&[], ByteOrder::LittleEndian, &info, 1).unwrap();
        let samples: Vec<i16> = block.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
        assert_eq!(samples, vec![-9999; 8]);
    }

    #[test]
    fn test_block_index_out_of_range() {
        let info = info(DataType::U8, 1, Compression::None);
        assert!(matches!(
            decode_block(&[], ByteOrder::LittleEndian, &info, 5),
            Err(Error::OutOfBounds(_))
        ));
    }
}
