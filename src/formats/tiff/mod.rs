//! TIFF and BigTIFF format support

pub mod tags;
pub mod ifd;
pub mod types;
pub mod reader;
pub mod geotiff;
pub mod writer;

pub use ifd::{IFD, IFDEntry};
pub use types::{BlockLayout, ImageInfo, Tiff};
pub use reader::TiffReader;
pub use geotiff::GeoInfo;
pub use writer::{BigTiff, BlockWriter, GeoTiffWriter, Georeference, ImageData, ImageShape};

/// TIFF magic number (42)
pub const TIFF_MAGIC: u16 = 42;

/// BigTIFF magic number (43)
pub const BIGTIFF_MAGIC: u16 = 43;
