//! Image File Directory (IFD) structures

use std::collections::HashMap;
use super::tags;

/// One IFD entry with its value location resolved
///
/// `data_offset` always points at the first value byte: the entry's own
/// value field when the data fits inline, the referenced offset otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IFDEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u64,
    pub data_offset: u64,
}

impl IFDEntry {
    pub fn new(tag: u16, field_type: u16, count: u64, data_offset: u64) -> Self {
        Self {
            tag,
            field_type,
            count,
            data_offset,
        }
    }

    /// Total byte length of the entry's values
    pub fn byte_len(&self) -> u64 {
        tags::field_type_size(self.field_type) as u64 * self.count
    }

    /// Whether values of this size are stored inside the entry itself
    pub fn fits_inline(field_type: u16, count: u64, is_big_tiff: bool) -> bool {
        let inline_size = if is_big_tiff { 8 } else { 4 };
        tags::field_type_size(field_type) as u64 * count <= inline_size
    }
}

/// An Image File Directory
#[derive(Debug, Clone)]
pub struct IFD {
    /// IFD number (0-based)
    pub number: usize,
    /// Offset of this IFD in the file
    pub offset: u64,
    pub entries: Vec<IFDEntry>,
    tag_map: HashMap<u16, usize>,
}

impl IFD {
    pub fn new(number: usize, offset: u64) -> Self {
        Self {
            number,
            offset,
            entries: Vec::new(),
            tag_map: HashMap::new(),
        }
    }

    pub fn add_entry(&mut self, entry: IFDEntry) {
        let index = self.entries.len();
        self.tag_map.insert(entry.tag, index);
        self.entries.push(entry);
    }

    pub fn get_entry(&self, tag: u16) -> Option<&IFDEntry> {
        self.tag_map.get(&tag).and_then(|&idx| self.entries.get(idx))
    }

    pub fn has_tag(&self, tag: u16) -> bool {
        self.tag_map.contains_key(&tag)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether this IFD stores its pixels in tiles rather than strips
    pub fn is_tiled(&self) -> bool {
        self.has_tag(tags::TILE_WIDTH) && self.has_tag(tags::TILE_OFFSETS)
    }

    /// Returns all GeoTIFF related entries
    pub fn geotiff_tags(&self) -> Vec<&IFDEntry> {
        self.entries
            .iter()
            .filter(|e| {
                matches!(
                    e.tag,
                    tags::MODEL_PIXEL_SCALE
                        | tags::MODEL_TIEPOINT
                        | tags::MODEL_TRANSFORMATION
                        | tags::GEO_KEY_DIRECTORY
                        | tags::GEO_DOUBLE_PARAMS
                        | tags::GEO_ASCII_PARAMS
                )
            })
            .collect()
    }

    pub fn is_geotiff(&self) -> bool {
        !self.geotiff_tags().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::tags::field_types;

    #[test]
    fn test_fits_inline() {
        assert!(IFDEntry::fits_inline(field_types::SHORT, 2, false));
        assert!(!IFDEntry::fits_inline(field_types::LONG, 2, false));
        assert!(IFDEntry::fits_inline(field_types::LONG, 2, true));
        assert!(!IFDEntry::fits_inline(field_types::DOUBLE, 1, false));
    }

    #[test]
    fn test_byte_len() {
        let entry = IFDEntry::new(tags::MODEL_TIEPOINT, field_types::DOUBLE, 6, 200);
        assert_eq!(entry.byte_len(), 48);
    }

    #[test]
    fn test_lookup_and_tiling() {
        let mut ifd = IFD::new(0, 8);
        assert!(!ifd.is_tiled());

        ifd.add_entry(IFDEntry::new(tags::TILE_WIDTH, field_types::SHORT, 1, 20));
        ifd.add_entry(IFDEntry::new(tags::TILE_OFFSETS, field_types::LONG, 4, 400));
        assert!(ifd.is_tiled());
        assert_eq!(ifd.entry_count(), 2);
        assert_eq!(ifd.get_entry(tags::TILE_OFFSETS).unwrap().count, 4);
        assert!(ifd.get_entry(tags::STRIP_OFFSETS).is_none());
    }

    #[test]
    fn test_geotiff_detection() {
        let mut ifd = IFD::new(0, 8);
        assert!(!ifd.is_geotiff());
        ifd.add_entry(IFDEntry::new(tags::MODEL_PIXEL_SCALE, field_types::DOUBLE, 3, 100));
        assert!(ifd.is_geotiff());
        assert_eq!(ifd.geotiff_tags().len(), 1);
    }
}
